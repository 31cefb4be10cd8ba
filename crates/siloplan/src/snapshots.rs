// Copyright 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! The snapshot directory client.

use std::collections::BTreeMap;

use siloutil::plan::Snapshots;
use siloutil::snapname::SnapName;
use thiserror::Error;

/// The published directory of available snapshots.
pub const SNAPSHOTS_URL: &str = "https://www.stackage.org/download/snapshots.json";

#[derive(Debug, Error)]
pub enum SnapshotsError {
    /// A directory value whose variant disagrees with its key, or a
    /// missing `nightly` entry.
    #[error("invalid snapshot directory")]
    InvalidSnapshotDirectory,
    #[error("invalid snapshot name in directory: {0}")]
    BadSnapName(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("failed to decode snapshot directory: {0}")]
    Decode(#[from] serde_json_lenient::Error),
}

/// Download and parse the snapshot directory.
pub fn get_snapshots() -> Result<Snapshots, SnapshotsError> {
    log::debug!("fetching snapshot directory from {}", SNAPSHOTS_URL);
    let body = reqwest::blocking::get(SNAPSHOTS_URL)?
        .error_for_status()?
        .text()?;
    parse_snapshot_directory(&body)
}

/// Parse the directory document: the `nightly` key must hold a nightly
/// name, `lts-*` keys must hold LTS names contributing their newest minor,
/// and every other key is ignored.
pub fn parse_snapshot_directory(body: &str) -> Result<Snapshots, SnapshotsError> {
    let raw: BTreeMap<String, String> = serde_json_lenient::from_str(body)?;

    let mut nightly = None;
    let mut lts = BTreeMap::new();
    for (key, value) in &raw {
        if key == "nightly" {
            match value.parse::<SnapName>() {
                Ok(SnapName::Nightly(date)) => nightly = Some(date),
                Ok(SnapName::Lts(_, _)) => return Err(SnapshotsError::InvalidSnapshotDirectory),
                Err(_) => return Err(SnapshotsError::BadSnapName(value.clone())),
            }
        } else if key.starts_with("lts-") {
            match value.parse::<SnapName>() {
                Ok(SnapName::Lts(major, minor)) => {
                    lts.insert(major, minor);
                }
                Ok(SnapName::Nightly(_)) => {
                    return Err(SnapshotsError::InvalidSnapshotDirectory)
                }
                Err(_) => return Err(SnapshotsError::BadSnapName(value.clone())),
            }
        }
    }

    let nightly = nightly.ok_or(SnapshotsError::InvalidSnapshotDirectory)?;
    Ok(Snapshots { nightly, lts })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_directory() {
        let body = r#"{
            "nightly": "nightly-2017-04-20",
            "lts": "lts-8.9",
            "lts-8": "lts-8.9",
            "lts-6": "lts-6.35",
            "comment": "not a snapshot"
        }"#;
        let snapshots = parse_snapshot_directory(body).unwrap();
        assert_eq!(snapshots.nightly.to_string(), "2017-04-20");
        assert_eq!(
            snapshots.lts,
            [(6, 35), (8, 9)].into_iter().collect::<BTreeMap<_, _>>()
        );
    }

    #[test]
    fn test_variant_mismatch_is_rejected() {
        let body = r#"{"nightly": "lts-8.9"}"#;
        assert!(matches!(
            parse_snapshot_directory(body),
            Err(SnapshotsError::InvalidSnapshotDirectory)
        ));

        let body = r#"{"nightly": "nightly-2017-04-20", "lts-8": "nightly-2017-04-20"}"#;
        assert!(matches!(
            parse_snapshot_directory(body),
            Err(SnapshotsError::InvalidSnapshotDirectory)
        ));
    }

    #[test]
    fn test_missing_nightly_is_rejected() {
        let body = r#"{"lts-8": "lts-8.9"}"#;
        assert!(matches!(
            parse_snapshot_directory(body),
            Err(SnapshotsError::InvalidSnapshotDirectory)
        ));
    }

    #[test]
    fn test_unparseable_name_is_rejected() {
        let body = r#"{"nightly": "nightly-20170420"}"#;
        assert!(matches!(
            parse_snapshot_directory(body),
            Err(SnapshotsError::BadSnapName(_))
        ));
    }
}
