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

//! Checking local packages against snapshots: per-package dependency
//! checks, bounded flag-assignment search, bundle aggregation, and the
//! snapshot picker.

use std::collections::{BTreeMap, BTreeSet};

use siloutil::compiler::CompilerVersion;
use siloutil::desc::{
    resolve_package_description, FlagSpec, PackageConfig, PackageDescription,
};
use siloutil::packages::{FlagAssignment, PackageName};
use siloutil::plan::{
    combine_dep_errors, BuildPlanCheck, DepError, DepErrors, FlagMap, MiniPlan,
};
use siloutil::platform::Platform;
use siloutil::snapname::SnapName;
use siloutil::version::Version;

/// Packages GHC treats as part of itself. A dependency error on one of
/// these invalidates the snapshot outright, because no other version can
/// ever be installed next to the compiler.
pub const WIRED_IN_PACKAGES: &[&str] = &[
    "ghc",
    "ghc-prim",
    "ghc-bignum",
    "integer-gmp",
    "integer-simple",
    "base",
    "rts",
    "template-haskell",
];

fn is_wired_in(name: &PackageName) -> bool {
    WIRED_IN_PACKAGES.contains(&name.as_str())
}

/// The flag search never evaluates more combinations than this, however
/// many flags a package declares.
pub const MAX_FLAG_COMBINATIONS: usize = 128;

/// Check one local package against a version pool under a fixed flag
/// assignment. Tests and benchmarks are enabled here: their dependencies
/// must also be satisfiable for the snapshot to count as fitting.
pub fn check_package_build_plan(
    platform: Platform,
    compiler: &CompilerVersion,
    pool: &BTreeMap<PackageName, Version>,
    flags: &FlagAssignment,
    desc: &PackageDescription,
) -> DepErrors {
    let config = PackageConfig {
        enable_tests: true,
        enable_benchmarks: true,
        flags: flags.clone(),
        compiler: compiler.clone(),
        platform,
    };
    let resolved = resolve_package_description(desc, &config);

    let mut errors = DepErrors::new();
    for (name, range) in &resolved.package_dependencies {
        if *name == desc.name {
            continue;
        }
        let error = match pool.get(name) {
            None => DepError::new(None),
            Some(version) if !range.within_range(version) => DepError::new(Some(version.clone())),
            Some(_) => continue,
        };
        combine_dep_errors(
            &mut errors,
            [(
                name.clone(),
                error.required_by(desc.name.clone(), range.clone()),
            )]
            .into_iter()
            .collect(),
        );
    }
    errors
}

/// The values tried for one flag, most preferred first.
fn flag_options(spec: &FlagSpec) -> Vec<bool> {
    if spec.manual {
        vec![spec.default]
    } else {
        vec![spec.default, !spec.default]
    }
}

/// Lazy enumeration of flag assignments, all-defaults first, the last flag
/// varying fastest. With no flags it yields exactly the empty assignment.
struct FlagCombinations<'a> {
    flags: &'a [FlagSpec],
    options: Vec<Vec<bool>>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a> FlagCombinations<'a> {
    fn new(flags: &'a [FlagSpec]) -> Self {
        FlagCombinations {
            flags,
            options: flags.iter().map(flag_options).collect(),
            indices: vec![0; flags.len()],
            done: false,
        }
    }
}

impl Iterator for FlagCombinations<'_> {
    type Item = FlagAssignment;

    fn next(&mut self) -> Option<FlagAssignment> {
        if self.done {
            return None;
        }
        let assignment: FlagAssignment = self
            .flags
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), self.options[i][self.indices[i]]))
            .collect();

        // advance the mixed-radix counter
        let mut pos = self.indices.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.indices[pos] += 1;
            if self.indices[pos] < self.options[pos].len() {
                break;
            }
            self.indices[pos] = 0;
        }
        Some(assignment)
    }
}

/// Search for the flag assignment with the fewest dependency errors,
/// preferring defaults. Manual flags are pinned to their defaults; the
/// search evaluates at most [`MAX_FLAG_COMBINATIONS`] assignments and
/// stops early on a clean one. Ties keep the earlier assignment, so the
/// all-defaults combination wins whenever it is as good as anything else.
pub fn select_package_build_plan(
    platform: Platform,
    compiler: &CompilerVersion,
    pool: &BTreeMap<PackageName, Version>,
    desc: &PackageDescription,
) -> (FlagAssignment, DepErrors) {
    let mut best: Option<(FlagAssignment, DepErrors)> = None;
    for flags in FlagCombinations::new(&desc.flags).take(MAX_FLAG_COMBINATIONS) {
        let errors = check_package_build_plan(platform, compiler, pool, &flags, desc);
        if errors.is_empty() {
            return (flags, errors);
        }
        let better = best
            .as_ref()
            .map_or(true, |(_, best_errors)| errors.len() < best_errors.len());
        if better {
            best = Some((flags, errors));
        }
    }
    // the enumeration yields at least the all-defaults assignment
    best.unwrap_or_default()
}

/// Check a set of local packages together: each package sees the pool
/// extended with every local's self-declared version, so locals satisfy
/// each other without being in the snapshot.
pub fn check_bundle_build_plan(
    platform: Platform,
    compiler: &CompilerVersion,
    pool: &BTreeMap<PackageName, Version>,
    external_flags: Option<&FlagMap>,
    descs: &[PackageDescription],
) -> (FlagMap, DepErrors) {
    let mut seen = BTreeSet::new();
    for desc in descs {
        assert!(
            seen.insert(desc.name.clone()),
            "duplicate local package: {}",
            desc.name
        );
    }

    let mut pool = pool.clone();
    for desc in descs {
        pool.insert(desc.name.clone(), desc.version.clone());
    }

    let mut flag_map = FlagMap::new();
    let mut all_errors = DepErrors::new();
    for desc in descs {
        let (flags, errors) = match external_flags {
            Some(map) => {
                let flags = map.get(&desc.name).cloned().unwrap_or_default();
                let errors = check_package_build_plan(platform, compiler, &pool, &flags, desc);
                (flags, errors)
            }
            None => select_package_build_plan(platform, compiler, &pool, desc),
        };
        flag_map.insert(desc.name.clone(), flags);
        combine_dep_errors(&mut all_errors, errors);
    }
    (flag_map, all_errors)
}

/// Classify one snapshot for a set of local packages. Errors touching
/// wired-in packages make the whole snapshot a `Fail`; anything else
/// recoverable is a `Partial`.
pub fn check_snap_build_plan(
    platform: Platform,
    descs: &[PackageDescription],
    external_flags: Option<&FlagMap>,
    plan: &MiniPlan,
) -> BuildPlanCheck {
    let pool: BTreeMap<PackageName, Version> = plan
        .packages
        .iter()
        .map(|(name, info)| (name.clone(), info.version.clone()))
        .collect();
    let (flags, errors) = check_bundle_build_plan(
        platform,
        &plan.compiler_version,
        &pool,
        external_flags,
        descs,
    );

    let mut compiler_errors = DepErrors::new();
    let mut other_errors = DepErrors::new();
    for (name, error) in errors {
        if is_wired_in(&name) {
            compiler_errors.insert(name, error);
        } else {
            other_errors.insert(name, error);
        }
    }

    if !compiler_errors.is_empty() {
        BuildPlanCheck::Fail(plan.compiler_version.clone(), compiler_errors)
    } else if !other_errors.is_empty() {
        BuildPlanCheck::Partial(flags, other_errors)
    } else {
        BuildPlanCheck::Ok(flags)
    }
}

fn render_dep_errors(errors: &DepErrors) -> String {
    let mut lines = Vec::new();
    for (name, error) in errors {
        let observed = match &error.observed {
            Some(version) => format!("{}-{}", name, version),
            None => format!("{} (not present)", name),
        };
        let needed: Vec<String> = error
            .needed_by
            .iter()
            .map(|(requirer, range)| format!("{} wants {}", requirer, range))
            .collect();
        lines.push(format!("{}: {}", observed, needed.join("; ")));
    }
    lines.join("\n    ")
}

/// Walk candidate snapshots in order and pick the best fit: the first
/// clean check wins outright, otherwise the partial match with strictly
/// the fewest dependency errors is remembered. Snapshots conflicting with
/// wired-in packages can never win and are skipped entirely.
pub fn find_build_plan(
    platform: Platform,
    descs: &[PackageDescription],
    candidates: &[SnapName],
    mut load: impl FnMut(&SnapName) -> anyhow::Result<MiniPlan>,
) -> anyhow::Result<Option<(SnapName, FlagMap)>> {
    let mut best: Option<(SnapName, FlagMap, DepErrors)> = None;
    for snap in candidates {
        let plan = load(snap)?;
        match check_snap_build_plan(platform, descs, None, &plan) {
            BuildPlanCheck::Ok(flags) => {
                log::info!("selected snapshot {}", snap);
                return Ok(Some((*snap, flags)));
            }
            BuildPlanCheck::Partial(flags, errors) => {
                log::info!(
                    "snapshot {} matches partially, {} dependency issue(s):\n    {}",
                    snap,
                    errors.len(),
                    render_dep_errors(&errors)
                );
                let better = best
                    .as_ref()
                    .map_or(true, |(_, _, best_errors)| errors.len() < best_errors.len());
                if better {
                    best = Some((*snap, flags, errors));
                }
            }
            BuildPlanCheck::Fail(compiler, errors) => {
                log::info!(
                    "rejecting snapshot {}: conflicts with packages wired into {}:\n    {}",
                    snap,
                    compiler,
                    render_dep_errors(&errors)
                );
            }
        }
    }
    // a partial winner counts only when nothing is actually wrong with it
    Ok(best.and_then(|(snap, flags, errors)| {
        if errors.is_empty() {
            Some((snap, flags))
        } else {
            None
        }
    }))
}
