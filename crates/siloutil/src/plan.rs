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

//! The materialized plan types: a snapshot distilled to exactly the
//! metadata build planning needs, plus the dependency-error bookkeeping
//! shared by the flag selector and the snapshot picker.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::compiler::CompilerVersion;
use crate::packages::{FlagAssignment, PackageName};
use crate::snapname::SnapName;
use crate::version::{Version, VersionRange};

/// Per-package summary inside a [`MiniPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniPackageInfo {
    pub version: Version,
    /// Flag overrides the snapshot pins for this package. Defaults are
    /// applied underneath by the description oracle.
    pub flags: FlagAssignment,
    /// Library and executable dependencies, self excluded.
    pub package_deps: BTreeSet<PackageName>,
    /// Executable names this package needs at build time, unresolved.
    pub tool_deps: BTreeSet<String>,
    /// Executables this package provides.
    pub exes: BTreeSet<String>,
    pub has_library: bool,
}

/// A materialized snapshot: the compiler plus one entry per package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniPlan {
    pub compiler_version: CompilerVersion,
    pub packages: BTreeMap<PackageName, MiniPackageInfo>,
}

/// The snapshot directory: the latest nightly plus the newest minor of
/// every LTS major release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshots {
    pub nightly: NaiveDate,
    pub lts: BTreeMap<u32, u32>,
}

impl Snapshots {
    pub fn latest_nightly(&self) -> SnapName {
        SnapName::Nightly(self.nightly)
    }

    pub fn latest_lts(&self) -> Option<SnapName> {
        self.lts
            .iter()
            .next_back()
            .map(|(major, minor)| SnapName::Lts(*major, *minor))
    }

    pub fn latest_lts_major(&self, major: u32) -> Option<SnapName> {
        self.lts
            .get(&major)
            .map(|minor| SnapName::Lts(major, *minor))
    }

    /// The order the snapshot picker walks when nothing is pinned: newest
    /// LTS majors first, the latest nightly last.
    pub fn default_candidates(&self) -> Vec<SnapName> {
        let mut candidates: Vec<SnapName> = self
            .lts
            .iter()
            .rev()
            .map(|(major, minor)| SnapName::Lts(*major, *minor))
            .collect();
        candidates.push(self.latest_nightly());
        candidates
    }
}

/// A user-supplied snapshot: a compiler, a set of pinned packages, and
/// optional per-package flag overrides. Unlike curated snapshots it carries
/// no core package listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSnapshot {
    pub compiler: CompilerVersion,
    pub packages: BTreeSet<crate::packages::PackageIdentifier>,
    pub flags: Option<BTreeMap<PackageName, FlagAssignment>>,
}

/// Why a dependency could not be satisfied from a version pool: the version
/// present (if any), and every package that wanted it, with their ranges
/// intersected as requirers accumulate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepError {
    pub observed: Option<Version>,
    pub needed_by: BTreeMap<PackageName, VersionRange>,
}

impl DepError {
    pub fn new(observed: Option<Version>) -> Self {
        DepError {
            observed,
            needed_by: BTreeMap::new(),
        }
    }

    pub fn required_by(mut self, requirer: PackageName, range: VersionRange) -> Self {
        self.add_requirer(requirer, range);
        self
    }

    pub fn add_requirer(&mut self, requirer: PackageName, range: VersionRange) {
        self.needed_by
            .entry(requirer)
            .and_modify(|r| *r = r.intersect(&range))
            .or_insert(range);
    }

    /// Monoidal combine: the right-hand observation wins when present, so a
    /// later requirer that saw a concrete version enriches the diagnostic.
    pub fn combine(self, other: DepError) -> DepError {
        let mut merged = DepError {
            observed: other.observed.or(self.observed),
            needed_by: self.needed_by,
        };
        for (requirer, range) in other.needed_by {
            merged.add_requirer(requirer, range);
        }
        merged
    }
}

/// All dependency errors for one check, keyed by the missing or mismatched
/// package.
pub type DepErrors = BTreeMap<PackageName, DepError>;

/// Merge `other` into `errors` with the [`DepError`] monoid.
pub fn combine_dep_errors(errors: &mut DepErrors, other: DepErrors) {
    for (name, err) in other {
        match errors.remove(&name) {
            Some(existing) => {
                errors.insert(name, existing.combine(err));
            }
            None => {
                errors.insert(name, err);
            }
        }
    }
}

/// Flag assignments chosen for a set of local packages.
pub type FlagMap = BTreeMap<PackageName, FlagAssignment>;

/// The verdict on one snapshot for a set of local packages. `Fail` is
/// reserved for conflicts with packages wired into the compiler, which no
/// flag assignment can ever fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlanCheck {
    Ok(FlagMap),
    Partial(FlagMap, DepErrors),
    Fail(CompilerVersion, DepErrors),
}
