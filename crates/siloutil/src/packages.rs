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

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// The name of a package, e.g. `text` or `unordered-containers`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl Into<String>) -> Self {
        PackageName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty package name".to_string());
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("invalid character in package name: {}", s));
        }
        Ok(PackageName(s.to_string()))
    }
}

/// The name of a package flag.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagName(String);

impl FlagName {
    pub fn new(name: impl Into<String>) -> Self {
        FlagName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FlagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FlagName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty flag name".to_string());
        }
        Ok(FlagName(s.to_string()))
    }
}

/// A chosen value for each flag that deviates from (or pins) the default.
pub type FlagAssignment = BTreeMap<FlagName, bool>;

/// A package at an exact version, rendered `name-1.2.3`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentifier {
    pub name: PackageName,
    pub version: Version,
}

impl PackageIdentifier {
    pub fn new(name: PackageName, version: Version) -> Self {
        PackageIdentifier { name, version }
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

impl fmt::Debug for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for PackageIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The version is everything after the last dash that is followed by
        // a digit: `unordered-containers-0.2.11.0`.
        let dash = s
            .char_indices()
            .rev()
            .find(|&(i, c)| c == '-' && s[i + 1..].starts_with(|c: char| c.is_ascii_digit()))
            .map(|(i, _)| i)
            .ok_or_else(|| format!("missing version in package identifier: {}", s))?;
        let name = s[..dash].parse::<PackageName>()?;
        let version = s[dash + 1..]
            .parse::<Version>()
            .map_err(|e| format!("invalid version in package identifier {}: {}", s, e))?;
        Ok(PackageIdentifier { name, version })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identifier_roundtrip() {
        for s in ["foo-1.0", "unordered-containers-0.2.11.0", "mtl-2.2.1"] {
            let ident: PackageIdentifier = s.parse().unwrap();
            assert_eq!(ident.to_string(), s);
        }
    }

    #[test]
    fn test_identifier_name_with_digits() {
        let ident: PackageIdentifier = "base64-bytestring-1.0".parse().unwrap();
        assert_eq!(ident.name.as_str(), "base64-bytestring");
        assert_eq!(ident.version.to_string(), "1.0");
    }

    #[test]
    fn test_identifier_rejects_bare_name() {
        assert!("justaname".parse::<PackageIdentifier>().is_err());
        assert!("".parse::<PackageIdentifier>().is_err());
    }
}
