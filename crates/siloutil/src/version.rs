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

//! Version utilities
//!
//! Haskell package versions are dotted sequences of integers of arbitrary
//! arity (`0.5.0.2` is common), so the usual three-component semver type
//! does not fit. Versions compare lexicographically component-wise, which
//! means `1.0 < 1.0.0`.

use std::fmt;
use std::str::FromStr;

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A dotted-integer package version, e.g. `1.2.3.4`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(Vec<u32>);

impl Version {
    pub fn new(components: Vec<u32>) -> Self {
        Version(components)
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseVersionError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version component: {0}")]
    BadComponent(String),
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        let mut components = Vec::new();
        for part in s.split('.') {
            let n = part
                .parse::<u32>()
                .map_err(|_| ParseVersionError::BadComponent(part.to_string()))?;
            components.push(n);
        }
        Ok(Version(components))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct VersionVisitor;

        impl Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a dotted version string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Version, E> {
                v.parse().map_err(E::custom)
            }
        }

        d.deserialize_str(VersionVisitor)
    }
}

/// One end of a version interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// A contiguous range of versions, closed under intersection.
///
/// `None` bounds are unbounded in that direction; the `empty` flag marks a
/// range no version satisfies (the result of intersecting disjoint ranges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    lower: Option<Bound>,
    upper: Option<Bound>,
    empty: bool,
}

impl VersionRange {
    /// The range every version is within.
    pub fn any() -> Self {
        VersionRange {
            lower: None,
            upper: None,
            empty: false,
        }
    }

    /// The range containing exactly one version.
    pub fn exactly(v: Version) -> Self {
        VersionRange {
            lower: Some(Bound {
                version: v.clone(),
                inclusive: true,
            }),
            upper: Some(Bound {
                version: v,
                inclusive: true,
            }),
            empty: false,
        }
    }

    pub fn at_least(v: Version) -> Self {
        VersionRange {
            lower: Some(Bound {
                version: v,
                inclusive: true,
            }),
            upper: None,
            empty: false,
        }
    }

    pub fn below(v: Version) -> Self {
        VersionRange {
            lower: None,
            upper: Some(Bound {
                version: v,
                inclusive: false,
            }),
            empty: false,
        }
    }

    pub fn is_empty_range(&self) -> bool {
        self.empty
    }

    pub fn within_range(&self, v: &Version) -> bool {
        if self.empty {
            return false;
        }
        if let Some(lower) = &self.lower {
            let ok = if lower.inclusive {
                *v >= lower.version
            } else {
                *v > lower.version
            };
            if !ok {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            let ok = if upper.inclusive {
                *v <= upper.version
            } else {
                *v < upper.version
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Intersection of two ranges. Disjoint inputs produce the empty range,
    /// so the operation is total.
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        if self.empty || other.empty {
            return VersionRange {
                lower: None,
                upper: None,
                empty: true,
            };
        }
        let lower = tighter_bound(&self.lower, &other.lower, true);
        let upper = tighter_bound(&self.upper, &other.upper, false);
        let empty = match (&lower, &upper) {
            (Some(l), Some(u)) => {
                l.version > u.version
                    || (l.version == u.version && !(l.inclusive && u.inclusive))
            }
            _ => false,
        };
        VersionRange { lower, upper, empty }
    }
}

fn tighter_bound(a: &Option<Bound>, b: &Option<Bound>, is_lower: bool) -> Option<Bound> {
    match (a, b) {
        (None, b) => b.clone(),
        (a, None) => a.clone(),
        (Some(a), Some(b)) => {
            let pick_a = if a.version != b.version {
                // lower bounds keep the larger version, upper bounds the smaller
                (a.version > b.version) == is_lower
            } else {
                // same version: the exclusive bound is the tighter one
                !a.inclusive
            };
            Some(if pick_a { a.clone() } else { b.clone() })
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        VersionRange::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return f.write_str("-none");
        }
        match (&self.lower, &self.upper) {
            (None, None) => f.write_str("-any"),
            (Some(l), Some(u)) if l.version == u.version && l.inclusive && u.inclusive => {
                write!(f, "=={}", l.version)
            }
            (lower, upper) => {
                let mut wrote = false;
                if let Some(l) = lower {
                    write!(f, "{}{}", if l.inclusive { ">=" } else { ">" }, l.version)?;
                    wrote = true;
                }
                if let Some(u) = upper {
                    if wrote {
                        f.write_str(" && ")?;
                    }
                    write!(f, "{}{}", if u.inclusive { "<=" } else { "<" }, u.version)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseRangeError {
    #[error("empty version range")]
    Empty,
    #[error("invalid range term: {0}")]
    BadTerm(String),
    #[error(transparent)]
    Version(#[from] ParseVersionError),
}

impl FromStr for VersionRange {
    type Err = ParseRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseRangeError::Empty);
        }
        if s == "-any" {
            return Ok(VersionRange::any());
        }
        if s == "-none" {
            return Ok(VersionRange {
                lower: None,
                upper: None,
                empty: true,
            });
        }
        let mut range = VersionRange::any();
        for term in s.split("&&") {
            let term = term.trim();
            let parsed = if let Some(v) = term.strip_prefix("==") {
                VersionRange::exactly(v.trim().parse()?)
            } else if let Some(v) = term.strip_prefix(">=") {
                VersionRange::at_least(v.trim().parse()?)
            } else if let Some(v) = term.strip_prefix("<=") {
                VersionRange {
                    lower: None,
                    upper: Some(Bound {
                        version: v.trim().parse()?,
                        inclusive: true,
                    }),
                    empty: false,
                }
            } else if let Some(v) = term.strip_prefix('>') {
                VersionRange {
                    lower: Some(Bound {
                        version: v.trim().parse()?,
                        inclusive: false,
                    }),
                    upper: None,
                    empty: false,
                }
            } else if let Some(v) = term.strip_prefix('<') {
                VersionRange::below(v.trim().parse()?)
            } else {
                return Err(ParseRangeError::BadTerm(term.to_string()));
            };
            range = range.intersect(&parsed);
        }
        Ok(range)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct RangeVisitor;

        impl Visitor<'_> for RangeVisitor {
            type Value = VersionRange;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a version range string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<VersionRange, E> {
                v.parse().map_err(E::custom)
            }
        }

        d.deserialize_str(RangeVisitor)
    }
}
