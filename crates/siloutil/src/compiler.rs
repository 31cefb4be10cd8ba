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

//! Compiler identification.

use std::fmt;
use std::str::FromStr;

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::version::Version;

/// The compiler family, without a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhichCompiler {
    Ghc,
}

/// A compiler at an exact version, rendered `ghc-8.0.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompilerVersion {
    Ghc(Version),
}

impl CompilerVersion {
    pub fn which_compiler(&self) -> WhichCompiler {
        match self {
            CompilerVersion::Ghc(_) => WhichCompiler::Ghc,
        }
    }

    pub fn version(&self) -> &Version {
        match self {
            CompilerVersion::Ghc(v) => v,
        }
    }
}

impl fmt::Display for CompilerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerVersion::Ghc(v) => write!(f, "ghc-{}", v),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid compiler: {0}")]
pub struct InvalidCompiler(pub String);

/// The shared parser for compiler strings, used by snapshot documents and
/// custom snapshots alike.
pub fn parse_compiler_version(s: &str) -> Result<CompilerVersion, InvalidCompiler> {
    let rest = s
        .strip_prefix("ghc-")
        .ok_or_else(|| InvalidCompiler(s.to_string()))?;
    let version = rest
        .parse::<Version>()
        .map_err(|_| InvalidCompiler(s.to_string()))?;
    Ok(CompilerVersion::Ghc(version))
}

impl FromStr for CompilerVersion {
    type Err = InvalidCompiler;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_compiler_version(s)
    }
}

impl Serialize for CompilerVersion {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompilerVersion {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct CompilerVisitor;

        impl Visitor<'_> for CompilerVisitor {
            type Value = CompilerVersion;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a compiler string like `ghc-8.0.1`")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<CompilerVersion, E> {
                parse_compiler_version(v).map_err(E::custom)
            }
        }

        d.deserialize_str(CompilerVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_compiler_version() {
        let c = parse_compiler_version("ghc-8.0.1").unwrap();
        assert_eq!(c.to_string(), "ghc-8.0.1");
        assert_eq!(c.which_compiler(), WhichCompiler::Ghc);

        assert!(parse_compiler_version("ghc").is_err());
        assert!(parse_compiler_version("ghcjs-0.2").is_err());
        assert!(parse_compiler_version("ghc-eight").is_err());
    }
}
