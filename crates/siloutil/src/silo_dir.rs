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

use std::path::PathBuf;

pub fn root() -> PathBuf {
    if let Ok(silo_home) = std::env::var("SILO_HOME") {
        return PathBuf::from(silo_home);
    }

    let h = home::home_dir();
    if h.is_none() {
        eprintln!("Failed to get home directory");
        std::process::exit(1);
    }
    let root = h.unwrap().join(".silo");
    if !root.exists() {
        std::fs::create_dir_all(&root).unwrap();
    }
    root
}

/// Where raw snapshot documents are stored, one `<snap>.yaml` per snapshot.
pub fn snapshots() -> PathBuf {
    root().join("snapshots")
}

/// Where materialized plans are cached, one tagged binary per snapshot.
pub fn build_plan_cache() -> PathBuf {
    root().join("build-plan-cache")
}

/// Where custom snapshots and their materialized plans are cached,
/// addressed by the SHA-256 of the source document.
pub fn custom_plan_cache() -> PathBuf {
    root().join("custom-plan-cache")
}

/// The local package index: `<index>/<name>/<version>.json` declaration
/// files.
pub fn index() -> PathBuf {
    root().join("index")
}

#[test]
fn test_silo_dir() {
    use expect_test::expect;

    let dirs = [
        root(),
        snapshots(),
        build_plan_cache(),
        custom_plan_cache(),
        index(),
    ];
    let dirs = dirs
        .iter()
        .map(|p| {
            p.strip_prefix(root())
                .unwrap()
                .to_str()
                .unwrap()
                .replace(['\\', '/'], "|")
        })
        .collect::<Vec<_>>();
    expect![[r#"
        [
            "",
            "snapshots",
            "build-plan-cache",
            "custom-plan-cache",
            "index",
        ]
    "#]]
    .assert_debug_eq(&dirs);
}
