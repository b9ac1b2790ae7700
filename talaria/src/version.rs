//! Game version parsing and comparison utilities
//!
//! Minecraft release identifiers are not valid semver: `1.20` has no patch
//! segment and `1.7.10` has a two-digit patch, so lexicographic comparison
//! orders them incorrectly. This module parses release identifiers into a
//! structured form with numeric ordering and inclusive range-membership
//! queries, which the resolver uses for its security advisory table.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A structured game release version (major.minor.patch). Never mutated
/// after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameVersion {
    /// Major version, `1` for every release to date
    pub major: u32,
    /// Minor version (`20` in `1.20.4`)
    pub minor: u32,
    /// Patch version, zero when the identifier omits it (`1.20`)
    pub patch: u32,
}

impl GameVersion {
    /// Creates a version from its numeric components
    pub fn new(major: u32, minor: u32, patch: u32) -> GameVersion {
        GameVersion {
            major,
            minor,
            patch,
        }
    }

    /// Returns whether this version lies within the inclusive range
    /// `[min, max]`
    pub fn is_between(&self, min: GameVersion, max: GameVersion) -> bool {
        *self >= min && *self <= max
    }
}

impl FromStr for GameVersion {
    type Err = crate::Error;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = version.split('.').collect();

        let major = parts
            .first()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| {
                crate::Error::ParseError(format!(
                    "Invalid major version in '{}'",
                    version
                ))
            })?;

        let minor = parts
            .get(1)
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| {
                crate::Error::ParseError(format!(
                    "Invalid minor version in '{}'",
                    version
                ))
            })?;

        let patch = match parts.get(2) {
            Some(s) => s.parse::<u32>().map_err(|_| {
                crate::Error::ParseError(format!(
                    "Invalid patch version in '{}'",
                    version
                ))
            })?,
            None => 0,
        };

        Ok(GameVersion {
            major,
            minor,
            patch,
        })
    }
}

impl Display for GameVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // release identifiers omit a zero patch (1.20, not 1.20.0)
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl Serialize for GameVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GameVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_release() {
        let v: GameVersion = "1.20.4".parse().unwrap();
        assert_eq!(v, GameVersion::new(1, 20, 4));
    }

    #[test]
    fn parse_without_patch() {
        let v: GameVersion = "1.12".parse().unwrap();
        assert_eq!(v, GameVersion::new(1, 12, 0));
    }

    #[test]
    fn reject_garbage() {
        assert!("".parse::<GameVersion>().is_err());
        assert!("1".parse::<GameVersion>().is_err());
        assert!("one.two".parse::<GameVersion>().is_err());
    }

    #[test]
    fn numeric_ordering() {
        let a: GameVersion = "1.7.10".parse().unwrap();
        let b: GameVersion = "1.12.2".parse().unwrap();
        assert!(a < b, "1.7.10 should be less than 1.12.2");
    }

    #[test]
    fn display_omits_zero_patch() {
        assert_eq!("1.12".parse::<GameVersion>().unwrap().to_string(), "1.12");
        assert_eq!(
            "1.20.4".parse::<GameVersion>().unwrap().to_string(),
            "1.20.4"
        );
    }
}
