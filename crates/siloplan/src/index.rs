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

//! The package index interface: where declaration blobs come from.

#[cfg(test)]
pub mod mock;

pub mod dir;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::bail;
use siloutil::packages::{FlagAssignment, PackageIdentifier, PackageName};
use siloutil::version::Version;

/// The result of resolving names and identifiers against an index.
#[derive(Debug, Default)]
pub struct ResolvedPackages {
    /// Names the index knows nothing about, not even as identifiers.
    pub missing_names: BTreeSet<PackageName>,
    /// Identifiers the index has no declaration for.
    pub missing_idents: BTreeSet<PackageIdentifier>,
    pub resolved: BTreeMap<PackageName, PackageIdentifier>,
}

/// A source of package declarations. Names resolve to their best known
/// version; identifiers resolve exactly.
pub trait PackageIndex {
    fn resolve_packages_allow_missing(
        &self,
        names: &BTreeSet<PackageName>,
        idents: &BTreeSet<PackageIdentifier>,
    ) -> anyhow::Result<ResolvedPackages>;

    /// Like [`PackageIndex::resolve_packages_allow_missing`], but any miss
    /// is an error.
    fn resolve_packages(
        &self,
        names: &BTreeSet<PackageName>,
        idents: &BTreeSet<PackageIdentifier>,
    ) -> anyhow::Result<BTreeMap<PackageName, PackageIdentifier>> {
        let resolved = self.resolve_packages_allow_missing(names, idents)?;
        if !resolved.missing_names.is_empty() || !resolved.missing_idents.is_empty() {
            bail!(
                "packages not found in index: {}",
                resolved
                    .missing_names
                    .iter()
                    .map(|n| n.to_string())
                    .chain(resolved.missing_idents.iter().map(|i| i.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(resolved.resolved)
    }

    /// Stream the declaration blob of each requested package to the
    /// callback, along with the flag overrides the caller attached.
    fn with_descriptions(
        &self,
        pkgs: &[(PackageIdentifier, FlagAssignment)],
        f: &mut dyn FnMut(&PackageIdentifier, &FlagAssignment, Vec<u8>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()>;

    /// The newest version the index knows for a name, across everything it
    /// covers. Used to suggest pins for unknown packages.
    fn best_version(&self, name: &PackageName) -> Option<Version>;
}
