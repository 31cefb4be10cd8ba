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

//! User-supplied custom snapshots: a YAML document pinning a compiler and
//! a package set, fetched from a URL or a local file and materialized
//! through the same pipeline as curated snapshots.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use serde::Deserialize;
use siloutil::compiler::{parse_compiler_version, InvalidCompiler};
use siloutil::hash::sha256_hex;
use siloutil::packages::{FlagAssignment, FlagName, PackageIdentifier, PackageName};
use siloutil::plan::{CustomSnapshot, MiniPlan};

use crate::config::PlanConfig;
use crate::index::PackageIndex;
use crate::loader::{download_to, DownloadError};
use crate::materialize::{apply_build_plan_fixes, to_mini_build_plan, MINI_PLAN_CACHE_TAG};

#[derive(Debug, thiserror::Error)]
pub enum CustomSnapshotError {
    #[error(transparent)]
    InvalidCompiler(#[from] InvalidCompiler),
    #[error("invalid package identifier in custom snapshot: {0}")]
    BadIdentifier(String),
    #[error("invalid package name in custom snapshot flags: {0}")]
    BadName(String),
    #[error("failed to decode custom snapshot: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize)]
struct CustomSnapshotYaml {
    compiler: String,
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    flags: Option<BTreeMap<String, BTreeMap<String, bool>>>,
}

/// Decode a custom snapshot document.
pub fn parse_custom_snapshot(bytes: &[u8]) -> Result<CustomSnapshot, CustomSnapshotError> {
    let yaml: CustomSnapshotYaml = serde_yaml::from_slice(bytes)?;

    let compiler = parse_compiler_version(&yaml.compiler)?;

    let mut packages = BTreeSet::new();
    for ident in &yaml.packages {
        packages.insert(
            ident
                .parse::<PackageIdentifier>()
                .map_err(|_| CustomSnapshotError::BadIdentifier(ident.clone()))?,
        );
    }

    let flags = match yaml.flags {
        None => None,
        Some(raw) => {
            let mut converted: BTreeMap<PackageName, FlagAssignment> = BTreeMap::new();
            for (package, assignment) in raw {
                let package = package
                    .parse::<PackageName>()
                    .map_err(CustomSnapshotError::BadName)?;
                let assignment = assignment
                    .into_iter()
                    .map(|(flag, value)| (FlagName::new(flag), value))
                    .collect();
                converted.insert(package, assignment);
            }
            Some(converted)
        }
    };

    Ok(CustomSnapshot {
        compiler,
        packages,
        flags,
    })
}

/// Obtain the raw bytes of a custom snapshot source. `file://` and `file:`
/// prefixes are stripped and the remainder resolved relative to the
/// project manifest; URLs are downloaded once into a cache file addressed
/// by the hash of the URL itself.
pub fn fetch_custom_snapshot_bytes(config: &PlanConfig, url0: &str) -> anyhow::Result<Vec<u8>> {
    if let Some(path) = url0
        .strip_prefix("file://")
        .or_else(|| url0.strip_prefix("file:"))
    {
        let path = dunce::canonicalize(config.manifest_dir().join(path))
            .with_context(|| format!("failed to resolve custom snapshot path `{}`", path))?;
        return Ok(std::fs::read(path)?);
    }
    if url0.contains("://") {
        let dest = config.custom_doc_path(&sha256_hex(url0.as_bytes()));
        if !dest.exists() {
            log::info!("downloading custom snapshot from {}", url0);
            download_to(url0, &dest).map_err(|e| match e {
                DownloadError::NotFound => {
                    anyhow::anyhow!("custom snapshot not found at {}", url0)
                }
                DownloadError::Http(e) => e.into(),
                DownloadError::Io(e) => e.into(),
            })?;
        }
        return Ok(std::fs::read(dest)?);
    }
    // a bare filesystem reference
    let path = dunce::canonicalize(config.manifest_dir().join(url0))
        .with_context(|| format!("failed to resolve custom snapshot path `{}`", url0))?;
    Ok(std::fs::read(path)?)
}

/// Materialize a custom snapshot, cached under the SHA-256 of the source
/// document. Custom snapshots carry no core packages; every pin goes
/// through user-land resolution.
pub fn load_custom_mini_build_plan(
    config: &PlanConfig,
    index: &dyn PackageIndex,
    url0: &str,
) -> anyhow::Result<MiniPlan> {
    let bytes = fetch_custom_snapshot_bytes(config, url0)?;
    let hash = sha256_hex(&bytes);
    let path = config.custom_plan_cache_path(&hash);

    let mut plan = crate::cache::tagged_decode_or_load(&path, MINI_PLAN_CACHE_TAG, || {
        let custom = parse_custom_snapshot(&bytes)?;
        let packages = custom
            .packages
            .iter()
            .map(|ident| {
                let flags = custom
                    .flags
                    .as_ref()
                    .and_then(|flag_map| flag_map.get(&ident.name))
                    .cloned()
                    .unwrap_or_default();
                (ident.name.clone(), (ident.version.clone(), flags))
            })
            .collect();
        to_mini_build_plan(
            config.platform,
            index,
            custom.compiler.clone(),
            BTreeMap::new(),
            packages,
        )
    })?;
    apply_build_plan_fixes(&mut plan);
    Ok(plan)
}
