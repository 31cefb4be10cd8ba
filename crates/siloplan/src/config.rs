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

//! The environment build planning runs in: target platform, the silo root
//! directory with its caches, and the project manifest location.

use std::path::{Path, PathBuf};

use siloutil::platform::Platform;
use siloutil::snapname::SnapName;

#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub platform: Platform,
    pub silo_root: PathBuf,
    /// The project's `silo.yaml`; used for error rendering and to resolve
    /// relative `file:` references in custom snapshot sources.
    pub manifest_path: PathBuf,
}

impl PlanConfig {
    pub fn from_env(platform: Platform, manifest_path: PathBuf) -> Self {
        PlanConfig {
            platform,
            silo_root: siloutil::silo_dir::root(),
            manifest_path,
        }
    }

    pub fn manifest_dir(&self) -> &Path {
        self.manifest_path.parent().unwrap_or(Path::new("."))
    }

    /// Where the raw document of a snapshot lives locally.
    pub fn snapshot_doc_path(&self, name: &SnapName) -> PathBuf {
        self.silo_root
            .join("snapshots")
            .join(format!("{}.yaml", name))
    }

    /// Where the materialized plan of a snapshot is cached.
    pub fn build_plan_cache_path(&self, name: &SnapName) -> PathBuf {
        self.silo_root
            .join("build-plan-cache")
            .join(format!("{}.bin", name))
    }

    /// Where the raw document of a custom snapshot is cached, addressed by
    /// the SHA-256 of the source URL.
    pub fn custom_doc_path(&self, hash: &str) -> PathBuf {
        self.silo_root
            .join("custom-plan-cache")
            .join(format!("{}.yaml", hash))
    }

    /// Where the materialized plan of a custom snapshot is cached,
    /// addressed by the SHA-256 of the source document.
    pub fn custom_plan_cache_path(&self, hash: &str) -> PathBuf {
        self.silo_root
            .join("custom-plan-cache")
            .join(format!("{}.bin", hash))
    }
}
