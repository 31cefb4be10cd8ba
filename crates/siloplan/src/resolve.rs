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

//! Resolving a target set against a materialized plan: transitive closure
//! with memoization, plus the bookkeeping that turns unknown and shadowed
//! packages into an actionable error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use siloutil::packages::{FlagAssignment, PackageIdentifier, PackageName};
use siloutil::plan::MiniPlan;
use siloutil::version::Version;

use crate::index::PackageIndex;

/// Executable name to the packages providing it. Deliberately without
/// identity entries: a tool dependency on `foo` does not resolve to the
/// package `foo` unless `foo` declares an executable of that name.
pub type ToolMap = BTreeMap<String, BTreeSet<PackageName>>;

pub fn get_tool_map(plan: &MiniPlan) -> ToolMap {
    let mut map = ToolMap::new();
    for (name, info) in &plan.packages {
        for exe in &info.exes {
            map.entry(exe.clone()).or_default().insert(name.clone());
        }
    }
    map
}

/// Everything that needs installing: package to its pinned version and flag
/// assignment.
pub type ToInstall = BTreeMap<PackageName, (Version, FlagAssignment)>;

/// Package to the set of packages that require it. Targets carry their
/// original requirers (usually the local packages naming them).
pub type UsedBy = BTreeMap<PackageName, BTreeSet<PackageName>>;

/// Target resolution failed: some targets are not in the plan at all, or
/// are masked by locally built packages.
#[derive(Debug)]
pub struct UnknownPackages {
    pub manifest_path: PathBuf,
    /// Unknown package to its best known version across indexes (if any)
    /// and the packages that wanted it.
    pub unknown: BTreeMap<PackageName, (Option<Version>, BTreeSet<PackageName>)>,
    /// Shadowed package to the identifiers that (transitively) require it.
    pub shadowed: BTreeMap<PackageName, BTreeSet<PackageIdentifier>>,
}

impl fmt::Display for UnknownPackages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.unknown.is_empty() {
            writeln!(
                f,
                "The following packages do not appear in your snapshot (see {}):",
                self.manifest_path.display()
            )?;
            let mut pins = Vec::new();
            let mut versionless = Vec::new();
            for (name, (best, required_by)) in &self.unknown {
                write!(f, "    {}", name)?;
                if !required_by.is_empty() {
                    let requirers: Vec<String> =
                        required_by.iter().map(|r| r.to_string()).collect();
                    write!(f, " (required by {})", requirers.join(", "))?;
                }
                writeln!(f)?;
                match best {
                    Some(version) => {
                        pins.push(PackageIdentifier::new(name.clone(), version.clone()))
                    }
                    None => versionless.push(name.clone()),
                }
            }
            if !pins.is_empty() {
                writeln!(f, "Recommended `extra-deps` additions:")?;
                for pin in pins {
                    writeln!(f, "    - {}", pin)?;
                }
            }
            if !versionless.is_empty() {
                writeln!(f, "No known versions for:")?;
                for name in versionless {
                    writeln!(f, "    {}", name)?;
                }
            }
        }
        if !self.shadowed.is_empty() {
            writeln!(
                f,
                "The following snapshot packages are shadowed by local packages:"
            )?;
            for (name, requirers) in &self.shadowed {
                let requirers: Vec<String> = requirers.iter().map(|r| r.to_string()).collect();
                writeln!(f, "    {} (required by {})", name, requirers.join(", "))?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for UnknownPackages {}

#[derive(Default)]
struct ResolveState {
    /// Memoized shadowed-closure per package. An entry is inserted empty
    /// before recursing into a package's dependencies, which doubles as the
    /// cycle cutoff.
    visited: BTreeMap<PackageName, BTreeSet<PackageName>>,
    unknown: BTreeMap<PackageName, BTreeSet<PackageName>>,
    shadowed: BTreeMap<PackageName, BTreeSet<PackageIdentifier>>,
    to_install: ToInstall,
    used_by: UsedBy,
}

/// Compute the transitive closure of `targets` over the plan.
///
/// On success returns what to install and who uses what. If any target is
/// unknown to the plan or any dependency is shadowed, fails with
/// [`UnknownPackages`] enumerating every chain involved; `index` is only
/// consulted at that point, for best-version suggestions.
pub fn resolve_build_plan(
    plan: &MiniPlan,
    index: &dyn PackageIndex,
    manifest_path: &Path,
    is_shadowed: &dyn Fn(&PackageName) -> bool,
    targets: &BTreeMap<PackageName, BTreeSet<PackageName>>,
) -> Result<(ToInstall, UsedBy), UnknownPackages> {
    let tool_map = get_tool_map(plan);
    let mut state = ResolveState::default();
    for (target, requirers) in targets {
        go(
            &mut state,
            plan,
            &tool_map,
            is_shadowed,
            target,
            requirers.clone(),
        );
    }

    if state.unknown.is_empty() && state.shadowed.is_empty() {
        Ok((state.to_install, state.used_by))
    } else {
        Err(UnknownPackages {
            manifest_path: manifest_path.to_path_buf(),
            unknown: state
                .unknown
                .into_iter()
                .map(|(name, requirers)| {
                    let best = index.best_version(&name);
                    (name, (best, requirers))
                })
                .collect(),
            shadowed: state.shadowed,
        })
    }
}

/// Visit one package, returning the set of shadowed names reachable from
/// it. Shadowing taints every transitive requirer on the way back up.
fn go(
    state: &mut ResolveState,
    plan: &MiniPlan,
    tool_map: &ToolMap,
    is_shadowed: &dyn Fn(&PackageName) -> bool,
    name: &PackageName,
    requirers: BTreeSet<PackageName>,
) -> BTreeSet<PackageName> {
    state
        .used_by
        .entry(name.clone())
        .or_default()
        .extend(requirers.iter().cloned());

    let Some(info) = plan.packages.get(name) else {
        state
            .unknown
            .entry(name.clone())
            .or_default()
            .extend(requirers);
        return BTreeSet::new();
    };

    if let Some(shadow_closure) = state.visited.get(name) {
        return shadow_closure.clone();
    }
    state.visited.insert(name.clone(), BTreeSet::new());

    let mut deps = info.package_deps.clone();
    for tool in &info.tool_deps {
        // tools with no providing package are assumed to come from the
        // system and are not planned
        if let Some(providers) = tool_map.get(tool) {
            deps.extend(providers.iter().cloned());
        }
    }
    deps.remove(name);

    let ident = PackageIdentifier::new(name.clone(), info.version.clone());
    let mut shadow_closure = BTreeSet::new();
    for dep in deps {
        if is_shadowed(&dep) {
            state
                .shadowed
                .entry(dep.clone())
                .or_default()
                .insert(ident.clone());
            shadow_closure.insert(dep);
        } else {
            let child_shadowed = go(
                state,
                plan,
                tool_map,
                is_shadowed,
                &dep,
                [name.clone()].into_iter().collect(),
            );
            for shadowed_name in child_shadowed {
                state
                    .shadowed
                    .entry(shadowed_name.clone())
                    .or_default()
                    .insert(ident.clone());
                shadow_closure.insert(shadowed_name);
            }
        }
    }

    state
        .to_install
        .insert(name.clone(), (info.version.clone(), info.flags.clone()));
    state.visited.insert(name.clone(), shadow_closure.clone());
    shadow_closure
}

#[cfg(test)]
mod test {
    use super::*;
    use siloutil::compiler::parse_compiler_version;
    use siloutil::plan::MiniPackageInfo;

    use crate::index::mock::MockIndex;

    fn name(s: &str) -> PackageName {
        s.parse().unwrap()
    }

    fn info(version: &str, deps: &[&str]) -> MiniPackageInfo {
        MiniPackageInfo {
            version: version.parse().unwrap(),
            flags: FlagAssignment::new(),
            package_deps: deps.iter().map(|d| name(d)).collect(),
            tool_deps: BTreeSet::new(),
            exes: BTreeSet::new(),
            has_library: true,
        }
    }

    fn plan(packages: Vec<(&str, MiniPackageInfo)>) -> MiniPlan {
        MiniPlan {
            compiler_version: parse_compiler_version("ghc-8.0.1").unwrap(),
            packages: packages.into_iter().map(|(n, i)| (name(n), i)).collect(),
        }
    }

    fn targets(entries: &[(&str, &[&str])]) -> BTreeMap<PackageName, BTreeSet<PackageName>> {
        entries
            .iter()
            .map(|(target, requirers)| {
                (name(target), requirers.iter().map(|r| name(r)).collect())
            })
            .collect()
    }

    fn resolve(
        plan: &MiniPlan,
        shadowed: &[&str],
        target_set: &[(&str, &[&str])],
    ) -> Result<(ToInstall, UsedBy), UnknownPackages> {
        let shadowed: BTreeSet<PackageName> = shadowed.iter().map(|s| name(s)).collect();
        resolve_build_plan(
            plan,
            &MockIndex::new(),
            Path::new("silo.yaml"),
            &|n| shadowed.contains(n),
            &targets(target_set),
        )
    }

    #[test]
    fn test_simple_closure() {
        let plan = plan(vec![("a", info("1.0", &["b"])), ("b", info("2.0", &[]))]);
        let (to_install, used_by) = resolve(&plan, &[], &[("a", &[])]).unwrap();

        assert_eq!(to_install.len(), 2);
        assert_eq!(to_install[&name("a")].0.to_string(), "1.0");
        assert_eq!(to_install[&name("b")].0.to_string(), "2.0");

        assert!(used_by[&name("a")].is_empty());
        assert_eq!(
            used_by[&name("b")],
            [name("a")].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_shadowed_dependency() {
        let plan = plan(vec![("a", info("1.0", &["b"])), ("b", info("2.0", &[]))]);
        let err = resolve(&plan, &["b"], &[("a", &[])]).unwrap_err();

        assert!(err.unknown.is_empty());
        assert_eq!(
            err.shadowed[&name("b")],
            ["a-1.0".parse::<PackageIdentifier>().unwrap()]
                .into_iter()
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_unknown_target() {
        let plan = plan(vec![("a", info("1.0", &[]))]);
        let err = resolve(&plan, &[], &[("z", &["local"])]).unwrap_err();

        assert!(err.shadowed.is_empty());
        let (best, required_by) = &err.unknown[&name("z")];
        assert!(best.is_none());
        assert_eq!(
            required_by,
            &[name("local")].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_unknown_with_best_version_suggestion() {
        let plan = plan(vec![]);
        let mut index = MockIndex::new();
        index.add_package_full("z", "0.9", []);
        index.add_package_full("z", "1.1", []);

        let err = resolve_build_plan(
            &plan,
            &index,
            Path::new("silo.yaml"),
            &|_| false,
            &targets(&[("z", &["local"])]),
        )
        .unwrap_err();
        let (best, _) = &err.unknown[&name("z")];
        assert_eq!(best.as_ref().unwrap().to_string(), "1.1");

        let rendered = err.to_string();
        assert!(rendered.contains("z-1.1"), "rendered: {}", rendered);
    }

    #[test]
    fn test_unknown_packages_rendering() {
        use expect_test::expect;

        let err = UnknownPackages {
            manifest_path: "silo.yaml".into(),
            unknown: [
                (
                    name("z"),
                    (
                        Some("1.1".parse().unwrap()),
                        [name("local")].into_iter().collect(),
                    ),
                ),
                (name("zz"), (None, BTreeSet::new())),
            ]
            .into_iter()
            .collect(),
            shadowed: [(
                name("b"),
                ["a-1.0".parse::<PackageIdentifier>().unwrap()]
                    .into_iter()
                    .collect(),
            )]
            .into_iter()
            .collect(),
        };
        expect![[r#"
            The following packages do not appear in your snapshot (see silo.yaml):
                z (required by local)
                zz
            Recommended `extra-deps` additions:
                - z-1.1
            No known versions for:
                zz
            The following snapshot packages are shadowed by local packages:
                b (required by a-1.0)
        "#]]
        .assert_eq(&err.to_string());
    }

    #[test]
    fn test_shadow_propagates_to_transitive_requirers() {
        // t -> mid -> x, x shadowed: both t and mid are requirers of x
        let plan = plan(vec![
            ("t", info("1.0", &["mid"])),
            ("mid", info("2.0", &["x"])),
            ("x", info("3.0", &[])),
        ]);
        let err = resolve(&plan, &["x"], &[("t", &[])]).unwrap_err();
        assert_eq!(
            err.shadowed[&name("x")],
            ["mid-2.0", "t-1.0"]
                .into_iter()
                .map(|s| s.parse::<PackageIdentifier>().unwrap())
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_cycle_terminates() {
        let plan = plan(vec![
            ("a", info("1.0", &["b"])),
            ("b", info("2.0", &["a"])),
        ]);
        let (to_install, used_by) = resolve(&plan, &[], &[("a", &[])]).unwrap();
        assert_eq!(to_install.len(), 2);
        assert_eq!(
            used_by[&name("a")],
            [name("b")].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_tool_deps_resolve_via_tool_map_only() {
        // `parser` needs tool `happy`; package `happy` provides exe `happy`.
        // Package `alex` does NOT auto-provide tool `alex`.
        let mut happy = info("1.19", &[]);
        happy.exes.insert("happy".to_string());
        let mut parser = info("0.1", &[]);
        parser.tool_deps.insert("happy".to_string());
        parser.tool_deps.insert("alex".to_string());
        let alex = info("3.0", &[]);

        let plan = plan(vec![("happy", happy), ("parser", parser), ("alex", alex)]);
        let (to_install, _) = resolve(&plan, &[], &[("parser", &[])]).unwrap();
        assert!(to_install.contains_key(&name("happy")));
        // alex declares no executable, so the tool dep does not pull it in
        assert!(!to_install.contains_key(&name("alex")));
    }

    #[test]
    fn test_closure_soundness() {
        // every installed non-target is a dep of some other installed package
        let plan = plan(vec![
            ("a", info("1.0", &["b", "c"])),
            ("b", info("1.0", &["c"])),
            ("c", info("1.0", &[])),
            ("d", info("1.0", &[])),
        ]);
        let (to_install, _) = resolve(&plan, &[], &[("a", &[])]).unwrap();
        assert!(!to_install.contains_key(&name("d")));
        for installed in to_install.keys() {
            if *installed == name("a") {
                continue;
            }
            let required = to_install.keys().any(|other| {
                plan.packages[other].package_deps.contains(installed)
            });
            assert!(required, "{} installed but required by nothing", installed);
        }
    }

    #[test]
    fn test_tool_map_has_no_identity_entries() {
        let mut provider = info("1.0", &[]);
        provider.exes.insert("tool".to_string());
        let plain = info("1.0", &[]);
        let plan = plan(vec![("provider", provider), ("plain", plain)]);

        let tool_map = get_tool_map(&plan);
        assert_eq!(
            tool_map.get("tool"),
            Some(&[name("provider")].into_iter().collect())
        );
        assert!(!tool_map.contains_key("plain"));
        assert!(!tool_map.contains_key("provider"));
    }
}
