// silo: Snapshot-driven build planning for Haskell packages.
// Copyright (C) 2024 International Digital Economy Academy
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
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

//! Locating and decoding raw snapshot documents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use siloutil::compiler::CompilerVersion;
use siloutil::packages::{FlagAssignment, PackageName, FlagName};
use siloutil::snapname::SnapName;
use siloutil::version::Version;
use thiserror::Error;

use crate::config::PlanConfig;

const RAW_URL_BASE: &str = "https://raw.githubusercontent.com/fpco";

fn snapshot_url(name: &SnapName) -> String {
    let flavor = if name.is_lts() {
        "lts-haskell"
    } else {
        "stackage-nightly"
    };
    format!("{}/{}/master/{}.yaml", RAW_URL_BASE, flavor, name)
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("snapshot not found: {0}; the directory of available snapshots is https://www.stackage.org/download/snapshots.json")]
    SnapshotNotFound(SnapName),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("failed to decode snapshot document `{path}`: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid snapshot document: {0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub(crate) enum DownloadError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Download `url` into `dest` atomically. A 404 is reported separately so
/// callers can translate it into their own terminating error.
pub(crate) fn download_to(url: &str, dest: &Path) -> Result<(), DownloadError> {
    let resp = reqwest::blocking::get(url)?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(DownloadError::NotFound);
    }
    let bytes = resp.error_for_status()?.bytes()?;
    crate::cache::write_atomic(dest, &bytes)?;
    Ok(())
}

/// A decoded snapshot document.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub compiler_version: CompilerVersion,
    pub core_packages: BTreeMap<PackageName, Version>,
    pub packages: BTreeMap<PackageName, PlanPackage>,
}

#[derive(Debug, Clone)]
pub struct PlanPackage {
    pub version: Version,
    pub flags: FlagAssignment,
}

// The YAML representation takes a detour through strings so snapshot
// documents stay forgiving about scalar types.
#[derive(Debug, Deserialize)]
struct BuildPlanYaml {
    #[serde(rename = "system-info")]
    system_info: SystemInfoYaml,
    #[serde(default)]
    packages: BTreeMap<String, PlanPackageYaml>,
}

#[derive(Debug, Deserialize)]
struct SystemInfoYaml {
    #[serde(rename = "compiler-version")]
    compiler_version: String,
    #[serde(rename = "core-packages", default)]
    core_packages: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PlanPackageYaml {
    version: String,
    #[serde(default)]
    constraints: PlanConstraintsYaml,
}

#[derive(Debug, Default, Deserialize)]
struct PlanConstraintsYaml {
    #[serde(default)]
    flags: BTreeMap<String, bool>,
}

impl TryFrom<BuildPlanYaml> for BuildPlan {
    type Error = LoadError;

    fn try_from(y: BuildPlanYaml) -> Result<Self, Self::Error> {
        let invalid = |what: &str, detail: String| LoadError::Invalid(format!("{what}: {detail}"));

        let compiler_version = y
            .system_info
            .compiler_version
            .parse::<CompilerVersion>()
            .map_err(|e| invalid("compiler-version", e.to_string()))?;

        let mut core_packages = BTreeMap::new();
        for (name, version) in y.system_info.core_packages {
            core_packages.insert(
                name.parse::<PackageName>()
                    .map_err(|e| invalid("core package name", e))?,
                version
                    .parse::<Version>()
                    .map_err(|e| invalid("core package version", e.to_string()))?,
            );
        }

        let mut packages = BTreeMap::new();
        for (name, pkg) in y.packages {
            let flags = pkg
                .constraints
                .flags
                .into_iter()
                .map(|(flag, value)| (FlagName::new(flag), value))
                .collect();
            packages.insert(
                name.parse::<PackageName>()
                    .map_err(|e| invalid("package name", e))?,
                PlanPackage {
                    version: pkg
                        .version
                        .parse::<Version>()
                        .map_err(|e| invalid("package version", e.to_string()))?,
                    flags,
                },
            );
        }

        Ok(BuildPlan {
            compiler_version,
            core_packages,
            packages,
        })
    }
}

pub fn decode_build_plan(path: &Path) -> Result<BuildPlan, LoadError> {
    let bytes = std::fs::read(path)?;
    let yaml: BuildPlanYaml = serde_yaml::from_slice(&bytes).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    BuildPlan::try_from(yaml)
}

/// Load the raw document of a snapshot: from the local snapshots directory
/// if a decodable copy is present, otherwise freshly downloaded. Decode
/// errors from a just-downloaded document are surfaced unchanged; a 404
/// means the snapshot does not exist and is never retried.
pub fn load_build_plan(config: &PlanConfig, name: &SnapName) -> Result<BuildPlan, LoadError> {
    let path = config.snapshot_doc_path(name);
    if path.exists() {
        match decode_build_plan(&path) {
            Ok(plan) => return Ok(plan),
            Err(e) => {
                log::debug!(
                    "ignoring undecodable snapshot document at {} ({}), re-downloading",
                    path.display(),
                    e
                );
            }
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let url = snapshot_url(name);
    log::info!("downloading snapshot {} from {}", name, url);
    download_to(&url, &path).map_err(|e| match e {
        DownloadError::NotFound => LoadError::SnapshotNotFound(*name),
        DownloadError::Http(e) => LoadError::Http(e),
        DownloadError::Io(e) => LoadError::Io(e),
    })?;
    decode_build_plan(&path)
}

#[cfg(test)]
mod test {
    use super::*;
    use siloutil::platform::Platform;

    const EXAMPLE: &str = r#"
system-info:
  compiler-version: "ghc-8.0.1"
  core-packages:
    base: "4.9.0.0"
    rts: "1.0"
packages:
  conduit:
    version: "1.2.10"
    constraints:
      flags:
        use-network: false
  text:
    version: "1.2.2.1"
"#;

    #[test]
    fn test_decode_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lts-8.9.yaml");
        std::fs::write(&path, EXAMPLE).unwrap();

        let plan = decode_build_plan(&path).unwrap();
        assert_eq!(plan.compiler_version.to_string(), "ghc-8.0.1");
        assert_eq!(plan.core_packages.len(), 2);
        let conduit = &plan.packages[&"conduit".parse::<PackageName>().unwrap()];
        assert_eq!(conduit.version.to_string(), "1.2.10");
        assert_eq!(
            conduit.flags.get(&FlagName::new("use-network")),
            Some(&false)
        );
        assert!(plan.packages[&"text".parse::<PackageName>().unwrap()]
            .flags
            .is_empty());
    }

    #[test]
    fn test_local_document_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlanConfig {
            platform: Platform::host(),
            silo_root: dir.path().to_path_buf(),
            manifest_path: dir.path().join("silo.yaml"),
        };
        let name: SnapName = "lts-8.9".parse().unwrap();
        let path = config.snapshot_doc_path(&name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, EXAMPLE).unwrap();

        // no network involved: the local document decodes
        let plan = load_build_plan(&config, &name).unwrap();
        assert_eq!(plan.packages.len(), 2);
    }

    #[test]
    fn test_snapshot_urls() {
        let lts: SnapName = "lts-8.9".parse().unwrap();
        let nightly: SnapName = "nightly-2017-04-20".parse().unwrap();
        assert_eq!(
            snapshot_url(&lts),
            "https://raw.githubusercontent.com/fpco/lts-haskell/master/lts-8.9.yaml"
        );
        assert_eq!(
            snapshot_url(&nightly),
            "https://raw.githubusercontent.com/fpco/stackage-nightly/master/nightly-2017-04-20.yaml"
        );
    }
}
