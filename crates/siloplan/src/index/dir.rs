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

//! A package index backed by a local directory of declaration files,
//! `<root>/<name>/<version>.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Context;
use siloutil::packages::{FlagAssignment, PackageIdentifier, PackageName};
use siloutil::version::Version;

use super::{PackageIndex, ResolvedPackages};

pub struct DirIndex {
    root: PathBuf,
}

impl DirIndex {
    pub fn new(root: PathBuf) -> Self {
        DirIndex { root }
    }

    fn desc_path(&self, ident: &PackageIdentifier) -> PathBuf {
        self.root
            .join(ident.name.as_str())
            .join(format!("{}.json", ident.version))
    }

    fn versions_of(&self, name: &PackageName) -> BTreeSet<Version> {
        let dir = self.root.join(name.as_str());
        let mut versions = BTreeSet::new();
        let Ok(entries) = dir.read_dir() else {
            return versions;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(version) = stem.parse::<Version>() {
                        versions.insert(version);
                    }
                }
            }
        }
        versions
    }
}

impl PackageIndex for DirIndex {
    fn resolve_packages_allow_missing(
        &self,
        names: &BTreeSet<PackageName>,
        idents: &BTreeSet<PackageIdentifier>,
    ) -> anyhow::Result<ResolvedPackages> {
        let mut result = ResolvedPackages::default();
        for name in names {
            match self.versions_of(name).into_iter().next_back() {
                Some(version) => {
                    result
                        .resolved
                        .insert(name.clone(), PackageIdentifier::new(name.clone(), version));
                }
                None => {
                    result.missing_names.insert(name.clone());
                }
            }
        }
        for ident in idents {
            if self.desc_path(ident).exists() {
                result.resolved.insert(ident.name.clone(), ident.clone());
            } else {
                result.missing_idents.insert(ident.clone());
            }
        }
        Ok(result)
    }

    fn with_descriptions(
        &self,
        pkgs: &[(PackageIdentifier, FlagAssignment)],
        f: &mut dyn FnMut(&PackageIdentifier, &FlagAssignment, Vec<u8>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        for (ident, flags) in pkgs {
            let path = self.desc_path(ident);
            log::debug!("reading declaration of {} from {}", ident, path.display());
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read declaration `{}`", path.display()))?;
            f(ident, flags, bytes)?;
        }
        Ok(())
    }

    fn best_version(&self, name: &PackageName) -> Option<Version> {
        self.versions_of(name).into_iter().next_back()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use siloutil::desc::convert_description_to_json;

    use crate::index::mock::create_mock_description;

    fn write_desc(root: &std::path::Path, name: &str, version: &str) {
        let desc = create_mock_description(name, version, []);
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{}.json", version)),
            serde_json_lenient::to_vec(&convert_description_to_json(&desc)).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_dir_index() {
        let dir = tempfile::tempdir().unwrap();
        write_desc(dir.path(), "foo", "0.1.0");
        write_desc(dir.path(), "foo", "0.2.0");

        let index = DirIndex::new(dir.path().to_path_buf());
        let foo: PackageName = "foo".parse().unwrap();
        assert_eq!(index.best_version(&foo), Some("0.2.0".parse().unwrap()));

        let idents: BTreeSet<PackageIdentifier> =
            ["foo-0.1.0".parse().unwrap()].into_iter().collect();
        let resolved = index
            .resolve_packages_allow_missing(&BTreeSet::new(), &idents)
            .unwrap();
        assert_eq!(resolved.resolved.len(), 1);

        let mut seen = Vec::new();
        index
            .with_descriptions(
                &[("foo-0.1.0".parse().unwrap(), FlagAssignment::new())],
                &mut |ident, _, bytes| {
                    seen.push((ident.clone(), bytes.len()));
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(seen.len(), 1);
    }
}
