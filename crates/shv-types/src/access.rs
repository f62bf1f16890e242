//! # Access Levels
//!
//! The permission tiers a role grants on a resource. Levels form a strict
//! total order, lowest first:
//!
//! ```text
//! BROWSE < READ < WRITE < COMMAND < SERVICE < SUPER_SERVICE < DEVICE < ADMIN
//! ```
//!
//! The short names (`bws`, `rd`, ...) are what configuration files and the
//! wire use.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Access level granted to a caller for a path and method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccessLevel {
    /// Discover nodes and methods (`ls`, `dir`).
    Browse,
    /// Read values.
    Read,
    /// Write values.
    Write,
    /// Invoke commands.
    Command,
    /// Service operations.
    Service,
    /// Broker administration visible to service tooling.
    SuperService,
    /// Reserved for devices talking to their own broker.
    Device,
    /// Everything.
    Admin,
}

impl AccessLevel {
    /// All levels in ascending order.
    pub const ALL: [AccessLevel; 8] = [
        AccessLevel::Browse,
        AccessLevel::Read,
        AccessLevel::Write,
        AccessLevel::Command,
        AccessLevel::Service,
        AccessLevel::SuperService,
        AccessLevel::Device,
        AccessLevel::Admin,
    ];

    /// Short name as used in configuration and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Browse => "bws",
            AccessLevel::Read => "rd",
            AccessLevel::Write => "wr",
            AccessLevel::Command => "cmd",
            AccessLevel::Service => "srv",
            AccessLevel::SuperService => "ssrv",
            AccessLevel::Device => "dev",
            AccessLevel::Admin => "su",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no access level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown access level: {0}")]
pub struct ParseAccessLevelError(pub String);

impl FromStr for AccessLevel {
    type Err = ParseAccessLevelError;

    /// Accepts both the short names and the long upper/lower case names
    /// (`browse`, `SUPER_SERVICE`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.to_ascii_lowercase().as_str() {
            "bws" | "browse" => AccessLevel::Browse,
            "rd" | "read" => AccessLevel::Read,
            "wr" | "write" => AccessLevel::Write,
            "cmd" | "command" => AccessLevel::Command,
            "srv" | "service" => AccessLevel::Service,
            "ssrv" | "super_service" | "superservice" => AccessLevel::SuperService,
            "dev" | "device" => AccessLevel::Device,
            "su" | "admin" => AccessLevel::Admin,
            _ => return Err(ParseAccessLevelError(s.to_string())),
        };
        Ok(level)
    }
}

impl TryFrom<String> for AccessLevel {
    type Error = ParseAccessLevelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccessLevel> for String {
    fn from(level: AccessLevel) -> Self {
        level.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_totally_ordered() {
        for pair in AccessLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_parse_short_and_long_names() {
        assert_eq!("bws".parse::<AccessLevel>().unwrap(), AccessLevel::Browse);
        assert_eq!("SUPER_SERVICE".parse::<AccessLevel>().unwrap(), AccessLevel::SuperService);
        assert_eq!("su".parse::<AccessLevel>().unwrap(), AccessLevel::Admin);
        assert!("root".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_serde_uses_short_names() {
        let json = serde_json::to_string(&AccessLevel::Command).unwrap();
        assert_eq!(json, "\"cmd\"");
        let back: AccessLevel = serde_json::from_str("\"ssrv\"").unwrap();
        assert_eq!(back, AccessLevel::SuperService);
    }
}
