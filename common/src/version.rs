use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Firmware version triple as carried on the wire and in the
/// application header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version string {0:?} (expected major.minor.patch)")]
pub struct ParseVersionError(pub String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .ok_or_else(|| ParseVersionError(s.to_string()))
        };

        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Version::new(1, 2, 0).to_string(), "1.2.0");
    }

    #[test]
    fn test_parse() {
        assert_eq!("1.2.0".parse(), Ok(Version::new(1, 2, 0)));
        assert_eq!("0.0.255".parse(), Ok(Version::new(0, 0, 255)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("1.2.x".parse::<Version>().is_err());
        assert!("1.2.300".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }
}
