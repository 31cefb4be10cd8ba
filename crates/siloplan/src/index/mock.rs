//! A mock package index for testing purposes; currently only available in
//! tests

use std::collections::{BTreeMap, BTreeSet};

use siloutil::desc::{
    convert_description_to_json, Component, CondDep, PackageDescription, PackageDescriptionJson,
};
use siloutil::packages::{FlagAssignment, PackageIdentifier, PackageName};
use siloutil::version::Version;

use super::{PackageIndex, ResolvedPackages};

/// A mock index, primarily used in tests. Declarations are stored as
/// in-memory descriptions and serialized on demand.
pub struct MockIndex {
    descs: BTreeMap<PackageName, BTreeMap<Version, PackageDescription>>,
}

impl MockIndex {
    pub fn new() -> Self {
        MockIndex {
            descs: BTreeMap::new(),
        }
    }

    pub fn add_description(&mut self, desc: PackageDescription) -> &mut Self {
        self.descs
            .entry(desc.name.clone())
            .or_default()
            .insert(desc.version.clone(), desc);
        self
    }

    /// Add a library-only package with unconditional dependencies, given as
    /// `(name, range)` pairs.
    pub fn add_package_full<'a>(
        &mut self,
        name: &str,
        version: &str,
        deps: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> &mut Self {
        self.add_description(create_mock_description(name, version, deps))
    }
}

impl Default for MockIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_mock_description<'a>(
    name: &str,
    version: &str,
    deps: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> PackageDescription {
    PackageDescription {
        name: name.parse().unwrap(),
        version: version.parse().unwrap(),
        flags: Vec::new(),
        library: Some(Component {
            buildable: true,
            deps: deps
                .into_iter()
                .map(|(name, range)| CondDep {
                    name: name.parse().unwrap(),
                    range: range.parse().unwrap(),
                    condition: None,
                })
                .collect(),
            tools: Vec::new(),
        }),
        executables: Default::default(),
        test_suites: Default::default(),
        benchmarks: Default::default(),
    }
}

impl PackageIndex for MockIndex {
    fn resolve_packages_allow_missing(
        &self,
        names: &BTreeSet<PackageName>,
        idents: &BTreeSet<PackageIdentifier>,
    ) -> anyhow::Result<ResolvedPackages> {
        let mut result = ResolvedPackages::default();
        for name in names {
            match self.best_version(name) {
                Some(version) => {
                    result.resolved.insert(
                        name.clone(),
                        PackageIdentifier::new(name.clone(), version),
                    );
                }
                None => {
                    result.missing_names.insert(name.clone());
                }
            }
        }
        for ident in idents {
            let known = self
                .descs
                .get(&ident.name)
                .is_some_and(|versions| versions.contains_key(&ident.version));
            if known {
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
            let desc = self
                .descs
                .get(&ident.name)
                .and_then(|versions| versions.get(&ident.version))
                .ok_or_else(|| anyhow::anyhow!("{} not in mock index", ident))?;
            let json: PackageDescriptionJson = convert_description_to_json(desc);
            let bytes = serde_json_lenient::to_vec(&json)?;
            f(ident, flags, bytes)?;
        }
        Ok(())
    }

    fn best_version(&self, name: &PackageName) -> Option<Version> {
        self.descs
            .get(name)?
            .keys()
            .next_back()
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mock_index_resolution() {
        let mut index = MockIndex::new();
        index
            .add_package_full("foo", "0.2.0", [])
            .add_package_full("foo", "0.1.0", [])
            .add_package_full("bar", "1.0", [("foo", ">=0.1")]);

        let foo: PackageName = "foo".parse().unwrap();
        assert_eq!(index.best_version(&foo), Some("0.2.0".parse().unwrap()));

        let idents: BTreeSet<PackageIdentifier> =
            ["foo-0.1.0".parse().unwrap(), "baz-1.0".parse().unwrap()]
                .into_iter()
                .collect();
        let resolved = index
            .resolve_packages_allow_missing(&BTreeSet::new(), &idents)
            .unwrap();
        assert_eq!(resolved.resolved.len(), 1);
        assert_eq!(resolved.missing_idents.len(), 1);
        assert!(resolved.missing_names.is_empty());
    }
}
