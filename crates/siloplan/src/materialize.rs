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

//! Materializing snapshots: resolving every package of a raw snapshot
//! document through the index and the description oracle into a
//! [`MiniPlan`], with the result cached in tagged binary form.

use std::collections::{BTreeMap, BTreeSet};

use siloutil::compiler::CompilerVersion;
use siloutil::desc::{read_package_description, resolve_package_description, PackageConfig};
use siloutil::packages::{FlagAssignment, FlagName, PackageIdentifier, PackageName};
use siloutil::plan::{MiniPackageInfo, MiniPlan};
use siloutil::platform::Platform;
use siloutil::snapname::SnapName;
use siloutil::version::Version;

use crate::cache::tagged_decode_or_load;
use crate::config::PlanConfig;
use crate::index::PackageIndex;
use crate::loader;

/// Bump whenever [`MiniPlan`] or anything it embeds changes shape.
pub const MINI_PLAN_CACHE_TAG: &str = "silo-mini-plan-v1";

/// Materialize a snapshot given its core and user-land package maps.
///
/// Core packages are resolved with misses allowed: the index has no reason
/// to know about every compiler-shipped package, and identifiers it cannot
/// resolve are synthesized as dependency-less library entries. User-land
/// misses are fatal, a curated snapshot vouches for their presence.
pub fn to_mini_build_plan(
    platform: Platform,
    index: &dyn PackageIndex,
    compiler_version: CompilerVersion,
    core_packages: BTreeMap<PackageName, Version>,
    packages: BTreeMap<PackageName, (Version, FlagAssignment)>,
) -> anyhow::Result<MiniPlan> {
    let core_idents: BTreeSet<PackageIdentifier> = core_packages
        .iter()
        .map(|(name, version)| PackageIdentifier::new(name.clone(), version.clone()))
        .collect();
    let resolved_cores = index.resolve_packages_allow_missing(&BTreeSet::new(), &core_idents)?;
    assert!(
        resolved_cores.missing_names.is_empty(),
        "core packages unresolvable even by name: {:?}",
        resolved_cores.missing_names
    );

    let user_idents: BTreeSet<PackageIdentifier> = packages
        .iter()
        .map(|(name, (version, _))| PackageIdentifier::new(name.clone(), version.clone()))
        .collect();
    let resolved_users = index.resolve_packages(&BTreeSet::new(), &user_idents)?;

    let mut requests: Vec<(PackageIdentifier, FlagAssignment)> = Vec::new();
    for ident in resolved_cores.resolved.values() {
        requests.push((ident.clone(), FlagAssignment::new()));
    }
    for ident in resolved_users.values() {
        let flags = packages
            .get(&ident.name)
            .map(|(_, flags)| flags.clone())
            .unwrap_or_default();
        requests.push((ident.clone(), flags));
    }

    let mut infos: BTreeMap<PackageName, MiniPackageInfo> = BTreeMap::new();
    index.with_descriptions(&requests, &mut |ident, flags, bytes| {
        let (warnings, desc) = read_package_description(&bytes)?;
        for warning in warnings {
            log::warn!("{}: {}", ident, warning);
        }
        let config = PackageConfig {
            enable_tests: false,
            enable_benchmarks: false,
            flags: flags.clone(),
            compiler: compiler_version.clone(),
            platform,
        };
        let resolved = resolve_package_description(&desc, &config);
        let mut package_deps: BTreeSet<PackageName> =
            resolved.package_dependencies.into_keys().collect();
        package_deps.remove(&ident.name);
        infos.insert(
            ident.name.clone(),
            MiniPackageInfo {
                version: ident.version.clone(),
                flags: flags.clone(),
                package_deps,
                tool_deps: resolved.tool_dependencies,
                exes: resolved.executables,
                has_library: resolved.has_library,
            },
        );
        Ok(())
    })?;

    for ident in &resolved_cores.missing_idents {
        log::debug!("synthesizing missing core package {}", ident);
        infos.insert(
            ident.name.clone(),
            MiniPackageInfo {
                version: ident.version.clone(),
                flags: FlagAssignment::new(),
                package_deps: BTreeSet::new(),
                tool_deps: BTreeSet::new(),
                exes: BTreeSet::new(),
                has_library: true,
            },
        );
    }

    // Core packages must not drag in anything the compiler does not ship;
    // their dependency sets are restricted to the core key set.
    let core_names: BTreeSet<PackageName> = core_packages.into_keys().collect();
    for name in &core_names {
        if let Some(info) = infos.get_mut(name) {
            info.package_deps.retain(|dep| core_names.contains(dep));
        }
    }

    let mut plan = MiniPlan {
        compiler_version,
        packages: infos,
    };
    apply_build_plan_fixes(&mut plan);
    Ok(plan)
}

/// Deterministic post-processing for packages whose default flags are known
/// not to work against a plain snapshot. The set is closed.
pub fn apply_build_plan_fixes(plan: &mut MiniPlan) {
    insert_flag(plan, "persistent-sqlite", "systemlib", false);
    insert_flag(plan, "yaml", "system-libyaml", false);
}

fn insert_flag(plan: &mut MiniPlan, package: &str, flag: &str, value: bool) {
    if let Some(info) = plan.packages.get_mut(&PackageName::new(package)) {
        info.flags.insert(FlagName::new(flag), value);
    }
}

/// Load the materialized plan of a snapshot, building and caching it on
/// first use. Fixes are reapplied after every cache decode.
pub fn load_mini_build_plan(
    config: &PlanConfig,
    index: &dyn PackageIndex,
    name: &SnapName,
) -> anyhow::Result<MiniPlan> {
    let path = config.build_plan_cache_path(name);
    let mut plan = tagged_decode_or_load(&path, MINI_PLAN_CACHE_TAG, || {
        let raw = loader::load_build_plan(config, name)?;
        to_mini_build_plan(
            config.platform,
            index,
            raw.compiler_version,
            raw.core_packages,
            raw.packages
                .into_iter()
                .map(|(name, pkg)| (name, (pkg.version, pkg.flags)))
                .collect(),
        )
    })?;
    apply_build_plan_fixes(&mut plan);
    Ok(plan)
}
