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

//! Snapshot names: `lts-8.9` and `nightly-2017-04-20`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The name of a curated snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SnapName {
    /// An LTS snapshot, `lts-major.minor`.
    Lts(u32, u32),
    /// A nightly snapshot keyed by date.
    Nightly(NaiveDate),
}

impl SnapName {
    pub fn is_lts(&self) -> bool {
        matches!(self, SnapName::Lts(_, _))
    }
}

impl fmt::Display for SnapName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapName::Lts(major, minor) => write!(f, "lts-{}.{}", major, minor),
            SnapName::Nightly(date) => write!(f, "nightly-{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid snapshot name: {0}")]
pub struct ParseSnapNameError(pub String);

impl FromStr for SnapName {
    type Err = ParseSnapNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseSnapNameError(s.to_string());
        if let Some(rest) = s.strip_prefix("lts-") {
            let (major, minor) = rest.split_once('.').ok_or_else(bad)?;
            let major = major.parse::<u32>().map_err(|_| bad())?;
            let minor = minor.parse::<u32>().map_err(|_| bad())?;
            Ok(SnapName::Lts(major, minor))
        } else if let Some(rest) = s.strip_prefix("nightly-") {
            let date = NaiveDate::parse_from_str(rest, "%Y-%m-%d").map_err(|_| bad())?;
            Ok(SnapName::Nightly(date))
        } else {
            Err(bad())
        }
    }
}

impl Serialize for SnapName {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SnapName {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct SnapNameVisitor;

        impl Visitor<'_> for SnapNameVisitor {
            type Value = SnapName;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snapshot name like `lts-8.9` or `nightly-2017-04-20`")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<SnapName, E> {
                v.parse().map_err(E::custom)
            }
        }

        d.deserialize_str(SnapNameVisitor)
    }
}
