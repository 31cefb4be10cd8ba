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

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use siloplan::check::find_build_plan;
use siloplan::config::PlanConfig;
use siloplan::index::dir::DirIndex;
use siloplan::materialize::load_mini_build_plan;
use siloplan::resolve::resolve_build_plan;
use siloplan::snapshots::get_snapshots;
use siloutil::desc::{read_package_description, PackageDescription};
use siloutil::packages::PackageName;
use siloutil::platform::Platform;
use siloutil::snapname::SnapName;

#[derive(Debug, Parser)]
#[command(
    name = "silo",
    version,
    about = "Snapshot-driven build planning for Haskell packages"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the available snapshots
    Snapshots,
    /// Resolve an install plan for the given targets against a snapshot
    Plan {
        /// Snapshot to plan against: `lts-8.9`, `lts-8`, `lts` or `nightly`
        #[arg(long)]
        snapshot: String,
        /// Packages to plan for
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Pick the snapshot that best fits a set of package descriptions
    Fit {
        /// Candidate snapshots, in preference order. Defaults to the newest
        /// minor of every LTS major (newest first) plus the latest nightly.
        #[arg(long = "snapshot")]
        snapshots: Vec<String>,
        /// Package description files
        #[arg(required = true)]
        descs: Vec<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Snapshots => cmd_snapshots(),
        Commands::Plan { snapshot, targets } => cmd_plan(&snapshot, &targets),
        Commands::Fit { snapshots, descs } => cmd_fit(&snapshots, &descs),
    };
    if let Err(e) = result {
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn default_config() -> anyhow::Result<PlanConfig> {
    let manifest_path = std::env::current_dir()
        .context("failed to get current directory")?
        .join("silo.yaml");
    Ok(PlanConfig::from_env(Platform::host(), manifest_path))
}

fn resolve_snap_spec(spec: &str) -> anyhow::Result<SnapName> {
    if let Ok(name) = spec.parse::<SnapName>() {
        return Ok(name);
    }
    let snapshots = get_snapshots()?;
    if spec == "nightly" {
        return Ok(snapshots.latest_nightly());
    }
    if spec == "lts" {
        return snapshots
            .latest_lts()
            .context("no LTS snapshots have been published");
    }
    if let Some(major) = spec.strip_prefix("lts-").and_then(|s| s.parse::<u32>().ok()) {
        return snapshots
            .latest_lts_major(major)
            .with_context(|| format!("no LTS snapshots with major version {}", major));
    }
    anyhow::bail!("unrecognized snapshot `{}`", spec)
}

fn cmd_snapshots() -> anyhow::Result<()> {
    let snapshots = get_snapshots()?;
    println!("{}", snapshots.latest_nightly());
    for (major, minor) in snapshots.lts.iter().rev() {
        println!("lts-{}.{}", major, minor);
    }
    Ok(())
}

fn cmd_plan(snapshot: &str, targets: &[String]) -> anyhow::Result<()> {
    let config = default_config()?;
    let index = DirIndex::new(siloutil::silo_dir::index());
    let snap = resolve_snap_spec(snapshot)?;
    let plan = load_mini_build_plan(&config, &index, &snap)?;

    let mut target_map: BTreeMap<PackageName, BTreeSet<PackageName>> = BTreeMap::new();
    for target in targets {
        let name = target
            .parse::<PackageName>()
            .map_err(|e| anyhow::anyhow!("invalid target `{}`: {}", target, e))?;
        target_map.insert(name, BTreeSet::new());
    }

    match resolve_build_plan(&plan, &index, &config.manifest_path, &|_| false, &target_map) {
        Ok((to_install, _used_by)) => {
            println!(
                "{} {} package(s) against {}",
                "planned".green().bold(),
                to_install.len(),
                snap
            );
            for (name, (version, flags)) in &to_install {
                if flags.is_empty() {
                    println!("    {}-{}", name, version);
                } else {
                    let rendered: Vec<String> = flags
                        .iter()
                        .map(|(flag, value)| {
                            format!("{}{}", if *value { "+" } else { "-" }, flag)
                        })
                        .collect();
                    println!("    {}-{} ({})", name, version, rendered.join(" "));
                }
            }
            Ok(())
        }
        Err(unknown) => {
            eprintln!("{}", unknown);
            anyhow::bail!("could not resolve a build plan against {}", snap)
        }
    }
}

fn cmd_fit(snapshots: &[String], desc_paths: &[PathBuf]) -> anyhow::Result<()> {
    let config = default_config()?;
    let index = DirIndex::new(siloutil::silo_dir::index());

    let mut descs: Vec<PackageDescription> = Vec::new();
    for path in desc_paths {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read description `{}`", path.display()))?;
        let (warnings, desc) = read_package_description(&bytes)
            .with_context(|| format!("failed to decode description `{}`", path.display()))?;
        for warning in warnings {
            log::warn!("{}: {}", path.display(), warning);
        }
        descs.push(desc);
    }

    let candidates: Vec<SnapName> = if snapshots.is_empty() {
        get_snapshots()?.default_candidates()
    } else {
        snapshots
            .iter()
            .map(|spec| resolve_snap_spec(spec))
            .collect::<anyhow::Result<_>>()?
    };

    let found = find_build_plan(config.platform, &descs, &candidates, |snap| {
        load_mini_build_plan(&config, &index, snap)
    })?;

    match found {
        Some((snap, flag_map)) => {
            println!("{} {}", "selected".green().bold(), snap);
            for (package, flags) in &flag_map {
                if flags.is_empty() {
                    continue;
                }
                let rendered: Vec<String> = flags
                    .iter()
                    .map(|(flag, value)| format!("{}{}", if *value { "+" } else { "-" }, flag))
                    .collect();
                println!("    {}: {}", package, rendered.join(" "));
            }
            Ok(())
        }
        None => anyhow::bail!("no candidate snapshot fits the given packages"),
    }
}
