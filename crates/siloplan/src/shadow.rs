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

//! Projecting shadowed packages out of a plan.

use std::collections::{BTreeMap, BTreeSet};

use siloutil::packages::PackageName;
use siloutil::plan::{MiniPackageInfo, MiniPlan};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Met(bool),
}

/// Remove the shadowed packages from a plan, along with every package
/// whose transitive dependencies are no longer satisfiable. Returns the
/// surviving plan and the packages that were dropped because of broken
/// dependencies.
///
/// A dependency absent from the plan that was *not* shadowed is treated as
/// satisfied: snapshot plans legitimately omit platform-conditional
/// packages (`Win32` outside Windows being the classic case).
pub fn shadow_mini_build_plan(
    plan: &MiniPlan,
    shadowed: &BTreeSet<PackageName>,
) -> (MiniPlan, BTreeMap<PackageName, MiniPackageInfo>) {
    let remaining: BTreeMap<PackageName, MiniPackageInfo> = plan
        .packages
        .iter()
        .filter(|(name, _)| !shadowed.contains(*name))
        .map(|(name, info)| (name.clone(), info.clone()))
        .collect();

    fn deps_met(
        name: &PackageName,
        remaining: &BTreeMap<PackageName, MiniPackageInfo>,
        shadowed: &BTreeSet<PackageName>,
        marks: &mut BTreeMap<PackageName, Mark>,
    ) -> bool {
        match marks.get(name) {
            Some(Mark::Met(met)) => return *met,
            Some(Mark::InProgress) => {
                // the input plan is malformed; materialization never
                // produces dependency cycles
                panic!("dependency cycle in build plan involving {}", name);
            }
            None => {}
        }
        let Some(info) = remaining.get(name) else {
            return !shadowed.contains(name);
        };
        marks.insert(name.clone(), Mark::InProgress);
        let mut met = true;
        for dep in &info.package_deps {
            if !deps_met(dep, remaining, shadowed, marks) {
                met = false;
            }
        }
        marks.insert(name.clone(), Mark::Met(met));
        met
    }

    let mut marks = BTreeMap::new();
    let mut kept = BTreeMap::new();
    let mut removed = BTreeMap::new();
    for (name, info) in remaining.iter() {
        if deps_met(name, &remaining, shadowed, &mut marks) {
            kept.insert(name.clone(), info.clone());
        } else {
            removed.insert(name.clone(), info.clone());
        }
    }

    (
        MiniPlan {
            compiler_version: plan.compiler_version.clone(),
            packages: kept,
        },
        removed,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use siloutil::compiler::parse_compiler_version;
    use siloutil::packages::FlagAssignment;

    fn name(s: &str) -> PackageName {
        s.parse().unwrap()
    }

    fn info(deps: &[&str]) -> MiniPackageInfo {
        MiniPackageInfo {
            version: "1.0".parse().unwrap(),
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

    #[test]
    fn test_empty_shadow_set_is_identity() {
        let plan = plan(vec![
            ("a", info(&["b"])),
            ("b", info(&[])),
            ("c", info(&["a", "b"])),
        ]);
        let (projected, removed) = shadow_mini_build_plan(&plan, &BTreeSet::new());
        assert_eq!(projected, plan);
        assert!(removed.is_empty());
    }

    #[test]
    fn test_shadow_removes_transitive_dependents() {
        // c -> a -> b, b shadowed: a and c both go
        let plan = plan(vec![
            ("a", info(&["b"])),
            ("b", info(&[])),
            ("c", info(&["a"])),
            ("d", info(&[])),
        ]);
        let shadowed = [name("b")].into_iter().collect();
        let (projected, removed) = shadow_mini_build_plan(&plan, &shadowed);

        assert_eq!(
            projected.packages.keys().collect::<Vec<_>>(),
            vec![&name("d")]
        );
        assert_eq!(
            removed.keys().collect::<Vec<_>>(),
            vec![&name("a"), &name("c")]
        );
    }

    #[test]
    fn test_missing_non_shadowed_dep_is_tolerated() {
        // `win-only` is not in the plan at all; assumed platform-absent
        let plan = plan(vec![("a", info(&["win-only"]))]);
        let (projected, removed) = shadow_mini_build_plan(&plan, &BTreeSet::new());
        assert!(projected.packages.contains_key(&name("a")));
        assert!(removed.is_empty());
    }

    #[test]
    #[should_panic(expected = "dependency cycle")]
    fn test_cycle_is_fatal() {
        let plan = plan(vec![("a", info(&["b"])), ("b", info(&["a"]))]);
        shadow_mini_build_plan(&plan, &BTreeSet::new());
    }
}
