//! Package versions and version ranges.
//!
//! Versions have four parts (`major.minor.micro.qualifier`). The numeric
//! parts are compared numerically, the qualifier lexicographically and only
//! when the numeric triple is equal. Ranges are either "at least V" or an
//! explicit interval such as `[1.0.0,2.0.0)`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A package version.
///
/// Field order matters: the derived ordering compares `major`, `minor`,
/// `micro` and then `qualifier`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

impl Version {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Version::default());
        }

        let mut parts = s.splitn(4, '.');
        let mut number = |label: &str| -> Result<u32> {
            match parts.next() {
                Some(part) => part
                    .parse::<u32>()
                    .with_context(|| format!("Invalid {} version component in '{}'", label, s)),
                None => Ok(0),
            }
        };

        let major = number("major")?;
        let minor = number("minor")?;
        let micro = number("micro")?;
        let qualifier = parts.next().unwrap_or_default().to_string();

        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            anyhow::bail!("Invalid version qualifier in '{}'", s);
        }

        Ok(Version {
            major,
            minor,
            micro,
            qualifier,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

/// Version constraint carried by an import.
///
/// A bare version (`1.2`) means "at least 1.2". An interval names both
/// ends; an empty ceiling (`[1.0,)`) is unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    floor: Version,
    floor_inclusive: bool,
    ceiling: Option<Version>,
    ceiling_inclusive: bool,
    interval: bool,
}

impl VersionRange {
    /// Range accepting every version.
    pub fn any() -> Self {
        Self::at_least(Version::default())
    }

    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
            interval: false,
        }
    }

    /// Half-open interval `[floor, ceiling)`.
    pub fn between(floor: Version, ceiling: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: Some(ceiling),
            ceiling_inclusive: false,
            interval: true,
        }
    }

    pub fn floor(&self) -> &Version {
        &self.floor
    }

    pub fn ceiling(&self) -> Option<&Version> {
        self.ceiling.as_ref()
    }

    /// Place `version` relative to this range.
    ///
    /// `Less` means below the floor, `Greater` above the ceiling and
    /// `Equal` inside the range.
    pub fn compare(&self, version: &Version) -> Ordering {
        match version.cmp(&self.floor) {
            Ordering::Less => return Ordering::Less,
            Ordering::Equal if !self.floor_inclusive => return Ordering::Less,
            _ => {}
        }

        if let Some(ceiling) = &self.ceiling {
            match version.cmp(ceiling) {
                Ordering::Greater => return Ordering::Greater,
                Ordering::Equal if !self.ceiling_inclusive => return Ordering::Greater,
                _ => {}
            }
        }

        Ordering::Equal
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.compare(version) == Ordering::Equal
    }

    /// Human readable form used in diagnostics, e.g. `>= 1.0.0`.
    pub fn describe(&self) -> String {
        if self.interval {
            format!("in {}", self)
        } else {
            format!(">= {}", self.floor)
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for VersionRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(open) = s.chars().next().filter(|c| *c == '[' || *c == '(') else {
            let floor = s
                .parse()
                .with_context(|| format!("Invalid version range '{}'", s))?;
            return Ok(Self::at_least(floor));
        };

        let close = s
            .chars()
            .last()
            .filter(|c| *c == ']' || *c == ')')
            .with_context(|| format!("Unterminated version range '{}'", s))?;

        let body = &s[1..s.len() - 1];
        let (floor, ceiling) = body
            .split_once(',')
            .with_context(|| format!("Version range '{}' is missing a ','", s))?;

        let floor: Version = floor
            .parse()
            .with_context(|| format!("Invalid floor in version range '{}'", s))?;
        let ceiling = match ceiling.trim() {
            "" => None,
            c => Some(
                c.parse::<Version>()
                    .with_context(|| format!("Invalid ceiling in version range '{}'", s))?,
            ),
        };

        if let Some(ceiling) = &ceiling
            && *ceiling < floor
        {
            anyhow::bail!("Version range '{}' has a ceiling below its floor", s);
        }

        Ok(Self {
            floor,
            floor_inclusive: open == '[',
            ceiling,
            ceiling_inclusive: close == ']',
            interval: true,
        })
    }
}

impl TryFrom<String> for VersionRange {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(r: VersionRange) -> Self {
        r.to_string()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.interval {
            return write!(f, "{}", self.floor);
        }

        let open = if self.floor_inclusive { '[' } else { '(' };
        let close = if self.ceiling_inclusive { ']' } else { ')' };
        match &self.ceiling {
            Some(ceiling) => write!(f, "{}{},{}{}", open, self.floor, ceiling, close),
            None => write!(f, "{}{},{}", open, self.floor, close),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn r(s: &str) -> VersionRange {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_full_version() {
        let version = v("1.2.3.beta");
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 2);
        assert_eq!(version.micro, 3);
        assert_eq!(version.qualifier, "beta");
    }

    #[test]
    fn test_parse_short_versions_default_to_zero() {
        assert_eq!(v("1"), Version::new(1, 0, 0));
        assert_eq!(v("1.5"), Version::new(1, 5, 0));
        assert_eq!(v(""), Version::default());
    }

    #[test]
    fn test_parse_invalid_version() {
        assert!("1.x".parse::<Version>().is_err());
        assert!("1.0.0.bad qualifier".parse::<Version>().is_err());
        assert!("-1".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(v("1.2").to_string(), "1.2.0");
        assert_eq!(v("1.2.3.rc1").to_string(), "1.2.3.rc1");
    }

    #[test]
    fn test_numeric_ordering_beats_lexical() {
        // 1.10 is newer than 1.9 even though "10" < "9" as strings
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2.0.0") > v("1.99.99"));
    }

    #[test]
    fn test_qualifier_only_breaks_ties() {
        assert!(v("1.0.0.b") > v("1.0.0.a"));
        assert!(v("1.0.0.a") > v("1.0.0"));
        // Qualifier never outweighs a numeric difference
        assert!(v("1.0.1") > v("1.0.0.zzz"));
    }

    #[test]
    fn test_at_least_range() {
        let range = r("1.2");
        assert!(!range.contains(&v("1.1.9")));
        assert!(range.contains(&v("1.2.0")));
        assert!(range.contains(&v("99.0.0")));
        assert_eq!(range.describe(), ">= 1.2.0");
    }

    #[test]
    fn test_half_open_interval() {
        let range = r("[1.0.0,2.0.0)");
        assert_eq!(range.compare(&v("0.9.0")), Ordering::Less);
        assert_eq!(range.compare(&v("1.0.0")), Ordering::Equal);
        assert_eq!(range.compare(&v("1.9.9")), Ordering::Equal);
        assert_eq!(range.compare(&v("2.0.0")), Ordering::Greater);
    }

    #[test]
    fn test_closed_and_open_ends() {
        let range = r("(1.0.0,2.0.0]");
        assert!(!range.contains(&v("1.0.0")));
        assert!(range.contains(&v("1.0.0.a")));
        assert!(range.contains(&v("2.0.0")));
        assert!(!range.contains(&v("2.0.0.a")));
    }

    #[test]
    fn test_unbounded_interval() {
        let range = r("[1.0.0,)");
        assert!(range.contains(&v("1.0.0")));
        assert!(range.contains(&v("42.0.0")));
        assert!(range.ceiling().is_none());
        assert_eq!(range.to_string(), "[1.0.0,)");
    }

    #[test]
    fn test_invalid_ranges() {
        assert!("[1.0.0,2.0.0".parse::<VersionRange>().is_err());
        assert!("[1.0.0)".parse::<VersionRange>().is_err());
        assert!("[2.0.0,1.0.0)".parse::<VersionRange>().is_err());
    }

    #[test]
    fn test_any_range_accepts_everything() {
        let range = VersionRange::any();
        assert!(range.contains(&Version::default()));
        assert!(range.contains(&v("7.7.7")));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&r("[1.0,2.0)")).unwrap();
        assert_eq!(json, "\"[1.0.0,2.0.0)\"");
        let back: VersionRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r("[1.0.0,2.0.0)"));

        let version: Version = serde_json::from_str("\"3.1\"").unwrap();
        assert_eq!(version, Version::new(3, 1, 0));
    }
}
