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

//! Package descriptions and their resolution.
//!
//! A description declares components (library, executables, test suites,
//! benchmarks) whose dependencies may be guarded by conditions over flags,
//! the operating system, and the compiler. Resolving a description under a
//! [`PackageConfig`] evaluates the guards and yields flat dependency,
//! tool and executable sets.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::compiler::{CompilerVersion, WhichCompiler};
use crate::packages::{FlagAssignment, FlagName, PackageName};
use crate::platform::{Os, Platform};
use crate::version::{Version, VersionRange};

/// A flag a package declares. Manual flags are only ever set explicitly;
/// automatic flags may be toggled away from their default by the flag
/// selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSpec {
    pub name: FlagName,
    pub default: bool,
    pub manual: bool,
}

#[derive(Debug, Clone)]
pub enum LogicOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone)]
pub enum CondAtom {
    Flag(FlagName),
    Os(Os),
    Impl(WhichCompiler, VersionRange),
}

#[derive(Debug, Clone)]
pub enum CondExpr {
    Atom(CondAtom),
    Condition(LogicOp, Vec<CondExpr>),
}

impl CondExpr {
    pub fn eval(&self, flags: &FlagAssignment, platform: Platform, compiler: &CompilerVersion) -> bool {
        match self {
            CondExpr::Atom(atom) => match atom {
                CondAtom::Flag(name) => flags.get(name).copied().unwrap_or(false),
                CondAtom::Os(os) => *os == platform.os,
                CondAtom::Impl(which, range) => {
                    *which == compiler.which_compiler() && range.within_range(compiler.version())
                }
            },
            CondExpr::Condition(op, exprs) => match op {
                LogicOp::And => exprs.iter().all(|x| x.eval(flags, platform, compiler)),
                LogicOp::Or => exprs.iter().any(|x| x.eval(flags, platform, compiler)),
                LogicOp::Not => !exprs.iter().any(|x| x.eval(flags, platform, compiler)),
            },
        }
    }
}

/// A dependency declaration, possibly guarded by a condition.
#[derive(Debug, Clone)]
pub struct CondDep {
    pub name: PackageName,
    pub range: VersionRange,
    pub condition: Option<CondExpr>,
}

/// A build-tool declaration, possibly guarded by a condition. Tools are
/// referred to by executable name and resolved through the tool map, never
/// by package name.
#[derive(Debug, Clone)]
pub struct CondTool {
    pub name: String,
    pub condition: Option<CondExpr>,
}

/// One component of a package.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub buildable: bool,
    pub deps: Vec<CondDep>,
    pub tools: Vec<CondTool>,
}

/// An unresolved package description.
#[derive(Debug, Clone)]
pub struct PackageDescription {
    pub name: PackageName,
    pub version: Version,
    pub flags: Vec<FlagSpec>,
    pub library: Option<Component>,
    pub executables: IndexMap<String, Component>,
    pub test_suites: IndexMap<String, Component>,
    pub benchmarks: IndexMap<String, Component>,
}

/// The environment a description is resolved against.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    pub enable_tests: bool,
    pub enable_benchmarks: bool,
    /// Flag overrides, applied on top of the declared defaults.
    pub flags: FlagAssignment,
    pub compiler: CompilerVersion,
    pub platform: Platform,
}

/// A description resolved under a concrete [`PackageConfig`].
#[derive(Debug, Clone)]
pub struct ResolvedPackageDescription {
    pub name: PackageName,
    pub version: Version,
    /// The effective flag assignment the resolution used.
    pub flags: FlagAssignment,
    /// All dependencies of enabled, buildable components, ranges
    /// intersected when one package is wanted by several components.
    pub package_dependencies: BTreeMap<PackageName, VersionRange>,
    pub tool_dependencies: BTreeSet<String>,
    pub executables: BTreeSet<String>,
    pub has_library: bool,
}

/// The default assignment: every declared flag at its default value.
pub fn default_flag_assignment(flags: &[FlagSpec]) -> FlagAssignment {
    flags
        .iter()
        .map(|spec| (spec.name.clone(), spec.default))
        .collect()
}

pub fn resolve_package_description(
    desc: &PackageDescription,
    config: &PackageConfig,
) -> ResolvedPackageDescription {
    let mut flags = default_flag_assignment(&desc.flags);
    for (name, value) in &config.flags {
        flags.insert(name.clone(), *value);
    }

    let mut package_dependencies: BTreeMap<PackageName, VersionRange> = BTreeMap::new();
    let mut tool_dependencies = BTreeSet::new();

    let mut components: Vec<&Component> = Vec::new();
    if let Some(library) = &desc.library {
        components.push(library);
    }
    components.extend(desc.executables.values());
    if config.enable_tests {
        components.extend(desc.test_suites.values());
    }
    if config.enable_benchmarks {
        components.extend(desc.benchmarks.values());
    }

    for component in components {
        if !component.buildable {
            continue;
        }
        for dep in &component.deps {
            let enabled = dep
                .condition
                .as_ref()
                .map_or(true, |c| c.eval(&flags, config.platform, &config.compiler));
            if !enabled {
                continue;
            }
            package_dependencies
                .entry(dep.name.clone())
                .and_modify(|r| *r = r.intersect(&dep.range))
                .or_insert_with(|| dep.range.clone());
        }
        for tool in &component.tools {
            let enabled = tool
                .condition
                .as_ref()
                .map_or(true, |c| c.eval(&flags, config.platform, &config.compiler));
            if enabled {
                tool_dependencies.insert(tool.name.clone());
            }
        }
    }

    let executables = desc
        .executables
        .iter()
        .filter(|(_, c)| c.buildable)
        .map(|(name, _)| name.clone())
        .collect();

    ResolvedPackageDescription {
        name: desc.name.clone(),
        version: desc.version.clone(),
        flags,
        package_dependencies,
        tool_dependencies,
        executables,
        has_library: desc.library.as_ref().map_or(false, |c| c.buildable),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseCondError {
    #[error("empty condition")]
    Empty,
    #[error("unknown condition atom: {0}")]
    UnknownAtom(String),
    #[error("unknown logic operator: {0}")]
    UnknownLogicOp(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DescFormatError {
    #[error("failed to decode package description: {0}")]
    Json(#[from] serde_json_lenient::Error),
    #[error("invalid package name: {0}")]
    Name(String),
    #[error("invalid version: {0}")]
    Version(#[from] crate::version::ParseVersionError),
    #[error("invalid range `{range}` for dependency {name}")]
    Range { name: String, range: String },
    #[error(transparent)]
    Cond(#[from] ParseCondError),
}

/// A string or a nested array of strings; the JSON encoding of condition
/// trees, e.g. `["and", "flag:debug", ["not", "os:windows"]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    String(String),
    Array(Vec<StringOrArray>),
}

fn parse_cond_logic_op(expr: &str) -> Result<LogicOp, ParseCondError> {
    match expr {
        "and" => Ok(LogicOp::And),
        "or" => Ok(LogicOp::Or),
        "not" => Ok(LogicOp::Not),
        "" => Err(ParseCondError::Empty),
        _ => Err(ParseCondError::UnknownLogicOp(expr.to_string())),
    }
}

fn parse_cond_atom(expr: &str) -> Result<CondAtom, ParseCondError> {
    if expr.is_empty() {
        return Err(ParseCondError::Empty);
    }
    if let Some(flag) = expr.strip_prefix("flag:") {
        return Ok(CondAtom::Flag(FlagName::new(flag)));
    }
    if let Some(os) = expr.strip_prefix("os:") {
        return Os::from_name(os)
            .map(CondAtom::Os)
            .ok_or_else(|| ParseCondError::UnknownAtom(expr.to_string()));
    }
    if let Some(rest) = expr.strip_prefix("impl:") {
        let (family, range) = match rest.split_once(' ') {
            Some((family, range)) => (family, range.trim()),
            None => (rest, ""),
        };
        if family != "ghc" {
            return Err(ParseCondError::UnknownAtom(expr.to_string()));
        }
        let range = if range.is_empty() {
            VersionRange::any()
        } else {
            VersionRange::from_str(range)
                .map_err(|_| ParseCondError::UnknownAtom(expr.to_string()))?
        };
        return Ok(CondAtom::Impl(WhichCompiler::Ghc, range));
    }
    Err(ParseCondError::UnknownAtom(expr.to_string()))
}

fn parse_cond_expr(value: &StringOrArray) -> Result<CondExpr, ParseCondError> {
    match value {
        StringOrArray::String(s) => parse_cond_atom(s).map(CondExpr::Atom),
        StringOrArray::Array(arr) => {
            let mut iter = arr.iter();
            match iter.next() {
                Some(StringOrArray::String(op)) => {
                    let logic_op = parse_cond_logic_op(op)?;
                    let sub_exprs: Result<Vec<CondExpr>, ParseCondError> =
                        iter.map(parse_cond_expr).collect();
                    Ok(CondExpr::Condition(logic_op, sub_exprs?))
                }
                _ => Err(ParseCondError::Empty),
            }
        }
    }
}

fn render_cond_expr(expr: &CondExpr) -> StringOrArray {
    match expr {
        CondExpr::Atom(atom) => StringOrArray::String(match atom {
            CondAtom::Flag(name) => format!("flag:{}", name),
            CondAtom::Os(os) => format!("os:{}", os.as_str()),
            CondAtom::Impl(WhichCompiler::Ghc, range) => {
                if *range == VersionRange::any() {
                    "impl:ghc".to_string()
                } else {
                    format!("impl:ghc {}", range)
                }
            }
        }),
        CondExpr::Condition(op, exprs) => {
            let op = match op {
                LogicOp::And => "and",
                LogicOp::Or => "or",
                LogicOp::Not => "not",
            };
            let mut arr = vec![StringOrArray::String(op.to_string())];
            arr.extend(exprs.iter().map(render_cond_expr));
            StringOrArray::Array(arr)
        }
    }
}

/// The JSON representation of a package description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescriptionJson {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<FlagSpecJson>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<ComponentJson>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub executables: IndexMap<String, ComponentJson>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tests: IndexMap<String, ComponentJson>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub benchmarks: IndexMap<String, ComponentJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSpecJson {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentJson {
    #[serde(default = "default_buildable")]
    pub buildable: bool,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    /// Conditionally enabled dependency groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<WhenJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenJson {
    #[serde(rename = "if")]
    pub condition: StringOrArray,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

fn default_buildable() -> bool {
    true
}

fn convert_deps(
    deps: &IndexMap<String, String>,
    condition: Option<&CondExpr>,
    out: &mut Vec<CondDep>,
) -> Result<(), DescFormatError> {
    for (name, range) in deps {
        let pkg_name = name
            .parse::<PackageName>()
            .map_err(DescFormatError::Name)?;
        let parsed_range =
            VersionRange::from_str(range).map_err(|_| DescFormatError::Range {
                name: name.clone(),
                range: range.clone(),
            })?;
        out.push(CondDep {
            name: pkg_name,
            range: parsed_range,
            condition: condition.cloned(),
        });
    }
    Ok(())
}

impl TryFrom<ComponentJson> for Component {
    type Error = DescFormatError;

    fn try_from(j: ComponentJson) -> Result<Self, Self::Error> {
        let mut deps = Vec::new();
        let mut tools = Vec::new();
        convert_deps(&j.dependencies, None, &mut deps)?;
        for tool in &j.tools {
            tools.push(CondTool {
                name: tool.clone(),
                condition: None,
            });
        }
        for when in &j.when {
            let condition = parse_cond_expr(&when.condition)?;
            convert_deps(&when.dependencies, Some(&condition), &mut deps)?;
            for tool in &when.tools {
                tools.push(CondTool {
                    name: tool.clone(),
                    condition: Some(condition.clone()),
                });
            }
        }
        Ok(Component {
            buildable: j.buildable,
            deps,
            tools,
        })
    }
}

impl TryFrom<PackageDescriptionJson> for PackageDescription {
    type Error = DescFormatError;

    fn try_from(j: PackageDescriptionJson) -> Result<Self, Self::Error> {
        let name = j.name.parse::<PackageName>().map_err(DescFormatError::Name)?;
        let version = j.version.parse::<Version>()?;
        let flags = j
            .flags
            .into_iter()
            .map(|f| FlagSpec {
                name: FlagName::new(f.name),
                default: f.default,
                manual: f.manual,
            })
            .collect();

        let convert_components = |components: IndexMap<String, ComponentJson>| {
            components
                .into_iter()
                .map(|(name, c)| Ok((name, Component::try_from(c)?)))
                .collect::<Result<IndexMap<String, Component>, DescFormatError>>()
        };

        Ok(PackageDescription {
            name,
            version,
            flags,
            library: j.library.map(Component::try_from).transpose()?,
            executables: convert_components(j.executables)?,
            test_suites: convert_components(j.tests)?,
            benchmarks: convert_components(j.benchmarks)?,
        })
    }
}

/// Decode a declaration blob. Returns decode warnings alongside the
/// description; warnings never fail the decode.
pub fn read_package_description(
    bytes: &[u8],
) -> Result<(Vec<String>, PackageDescription), DescFormatError> {
    let json: PackageDescriptionJson = serde_json_lenient::from_slice(bytes)?;

    let mut warnings = Vec::new();
    let mut seen = BTreeSet::new();
    for flag in &json.flags {
        if !seen.insert(flag.name.clone()) {
            warnings.push(format!("duplicate flag declaration: {}", flag.name));
        }
    }

    let desc = PackageDescription::try_from(json)?;
    Ok((warnings, desc))
}

fn convert_component_to_json(component: &Component) -> ComponentJson {
    // Unconditional declarations are emitted inline; each distinct guard
    // gets its own `when` group, in first-appearance order.
    let mut json = ComponentJson {
        buildable: component.buildable,
        dependencies: IndexMap::new(),
        tools: Vec::new(),
        when: Vec::new(),
    };
    let mut groups: Vec<(String, WhenJson)> = Vec::new();
    let group_for = |condition: &CondExpr, groups: &mut Vec<(String, WhenJson)>| -> usize {
        let rendered = serde_json_lenient::to_string(&render_cond_expr(condition)).unwrap();
        if let Some(i) = groups.iter().position(|(key, _)| *key == rendered) {
            return i;
        }
        groups.push((
            rendered,
            WhenJson {
                condition: render_cond_expr(condition),
                dependencies: IndexMap::new(),
                tools: Vec::new(),
            },
        ));
        groups.len() - 1
    };
    for dep in &component.deps {
        match &dep.condition {
            None => {
                json.dependencies
                    .insert(dep.name.to_string(), dep.range.to_string());
            }
            Some(condition) => {
                let i = group_for(condition, &mut groups);
                groups[i]
                    .1
                    .dependencies
                    .insert(dep.name.to_string(), dep.range.to_string());
            }
        }
    }
    for tool in &component.tools {
        match &tool.condition {
            None => json.tools.push(tool.name.clone()),
            Some(condition) => {
                let i = group_for(condition, &mut groups);
                groups[i].1.tools.push(tool.name.clone());
            }
        }
    }
    json.when = groups.into_iter().map(|(_, w)| w).collect();
    json
}

/// The inverse of decoding, used when descriptions are stored back into an
/// index.
pub fn convert_description_to_json(desc: &PackageDescription) -> PackageDescriptionJson {
    let convert = |components: &IndexMap<String, Component>| {
        components
            .iter()
            .map(|(name, c)| (name.clone(), convert_component_to_json(c)))
            .collect()
    };
    PackageDescriptionJson {
        name: desc.name.to_string(),
        version: desc.version.to_string(),
        flags: desc
            .flags
            .iter()
            .map(|f| FlagSpecJson {
                name: f.name.to_string(),
                default: f.default,
                manual: f.manual,
            })
            .collect(),
        library: desc.library.as_ref().map(convert_component_to_json),
        executables: convert(&desc.executables),
        tests: convert(&desc.test_suites),
        benchmarks: convert(&desc.benchmarks),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::parse_compiler_version;
    use crate::platform::Arch;

    fn config(flags: FlagAssignment) -> PackageConfig {
        PackageConfig {
            enable_tests: false,
            enable_benchmarks: false,
            flags,
            compiler: parse_compiler_version("ghc-8.0.1").unwrap(),
            platform: Platform {
                os: Os::Linux,
                arch: Arch::X86_64,
            },
        }
    }

    const EXAMPLE: &str = r#"
    {
        "name": "conduit-extra",
        "version": "1.1.13",
        "flags": [
            {"name": "debug", "default": false, "manual": false},
            {"name": "network", "default": true, "manual": true}
        ],
        "library": {
            "dependencies": {"base": ">=4.7 && <5", "conduit": ">=1.2"},
            "tools": ["alex"],
            "when": [
                {"if": "flag:debug", "dependencies": {"pretty": "-any"}},
                {"if": ["and", "flag:network", ["not", "os:windows"]],
                 "dependencies": {"network": ">=2.6"}},
                {"if": "impl:ghc <7.10", "dependencies": {"old-time": "-any"}}
            ]
        },
        "executables": {
            "conduit-tool": {"dependencies": {"base": "-any"}},
            "broken-tool": {"buildable": false, "dependencies": {"missing": "-any"}}
        },
        "tests": {
            "spec": {"dependencies": {"hspec": ">=2"}}
        }
    }
    "#;

    #[test]
    fn test_resolve_defaults() {
        let (warnings, desc) = read_package_description(EXAMPLE.as_bytes()).unwrap();
        assert!(warnings.is_empty());

        let resolved = resolve_package_description(&desc, &config(FlagAssignment::new()));
        // debug is off by default, network defaults on, ghc is 8.0.1
        let deps: Vec<&str> = resolved
            .package_dependencies
            .keys()
            .map(|n| n.as_str())
            .collect();
        assert_eq!(deps, ["base", "conduit", "network"]);
        assert_eq!(
            resolved.tool_dependencies,
            ["alex".to_string()].into_iter().collect()
        );
        // non-buildable executables provide nothing
        assert_eq!(
            resolved.executables,
            ["conduit-tool".to_string()].into_iter().collect()
        );
        assert!(resolved.has_library);
    }

    #[test]
    fn test_resolve_flag_override() {
        let (_, desc) = read_package_description(EXAMPLE.as_bytes()).unwrap();
        let mut flags = FlagAssignment::new();
        flags.insert(FlagName::new("debug"), true);
        flags.insert(FlagName::new("network"), false);
        let resolved = resolve_package_description(&desc, &config(flags));
        assert!(resolved
            .package_dependencies
            .contains_key(&PackageName::new("pretty")));
        assert!(!resolved
            .package_dependencies
            .contains_key(&PackageName::new("network")));
    }

    #[test]
    fn test_tests_only_when_enabled() {
        let (_, desc) = read_package_description(EXAMPLE.as_bytes()).unwrap();
        let mut cfg = config(FlagAssignment::new());
        assert!(!resolve_package_description(&desc, &cfg)
            .package_dependencies
            .contains_key(&PackageName::new("hspec")));
        cfg.enable_tests = true;
        assert!(resolve_package_description(&desc, &cfg)
            .package_dependencies
            .contains_key(&PackageName::new("hspec")));
    }

    #[test]
    fn test_range_intersection_across_components() {
        let blob = r#"
        {
            "name": "demo", "version": "1.0",
            "library": {"dependencies": {"base": ">=4"}},
            "executables": {"demo": {"dependencies": {"base": "<5"}}}
        }
        "#;
        let (_, desc) = read_package_description(blob.as_bytes()).unwrap();
        let resolved = resolve_package_description(&desc, &config(FlagAssignment::new()));
        assert_eq!(
            resolved.package_dependencies[&PackageName::new("base")].to_string(),
            ">=4 && <5"
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let (_, desc) = read_package_description(EXAMPLE.as_bytes()).unwrap();
        let bytes =
            serde_json_lenient::to_vec(&convert_description_to_json(&desc)).unwrap();
        let (_, desc2) = read_package_description(&bytes).unwrap();

        let a = resolve_package_description(&desc, &config(FlagAssignment::new()));
        let b = resolve_package_description(&desc2, &config(FlagAssignment::new()));
        assert_eq!(a.package_dependencies, b.package_dependencies);
        assert_eq!(a.tool_dependencies, b.tool_dependencies);
        assert_eq!(a.executables, b.executables);
    }

    #[test]
    fn test_duplicate_flag_warning() {
        let blob = r#"
        {
            "name": "demo", "version": "1.0",
            "flags": [
                {"name": "x", "default": true},
                {"name": "x", "default": false}
            ]
        }
        "#;
        let (warnings, _) = read_package_description(blob.as_bytes()).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_bad_condition_rejected() {
        let blob = r#"
        {
            "name": "demo", "version": "1.0",
            "library": {"when": [{"if": "arch:sparc", "dependencies": {"x": "-any"}}]}
        }
        "#;
        assert!(read_package_description(blob.as_bytes()).is_err());
    }
}
