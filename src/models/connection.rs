//! Connection-related data models.
//!
//! This module defines the enums that select a driver, a credential set and
//! a process execution mode.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Includes MariaDB
    #[default]
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Quote an identifier (column name) for this dialect.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", name.replace('`', "``")),
            Self::SQLite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Which credential set a connection is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Self::Read),
            "WRITE" => Ok(Self::Write),
            other => Err(DbError::configuration(format!(
                "Invalid access mode '{}': expected READ or WRITE",
                other
            ))),
        }
    }
}

/// Process-wide execution mode.
///
/// In `Debug` mode every schema manager opens an outer transaction that is
/// never committed, and all traffic is routed to write connections held in a
/// separate key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Live,
    Debug,
}

impl ExecutionMode {
    pub fn is_debug(&self) -> bool {
        matches!(self, Self::Debug)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_parse() {
        assert_eq!("READ".parse::<AccessMode>().unwrap(), AccessMode::Read);
        assert_eq!("WRITE".parse::<AccessMode>().unwrap(), AccessMode::Write);
    }

    #[test]
    fn test_access_mode_rejects_unknown() {
        let err = "ADMIN".parse::<AccessMode>().unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        // Matching is exact, as in the credential files
        assert!("read".parse::<AccessMode>().is_err());
    }

    #[test]
    fn test_access_mode_serde_uppercase() {
        let json = serde_json::to_string(&AccessMode::Write).unwrap();
        assert_eq!(json, "\"WRITE\"");
        let mode: AccessMode = serde_json::from_str("\"READ\"").unwrap();
        assert_eq!(mode, AccessMode::Read);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(DatabaseType::MySQL.quote_identifier("first_name"), "`first_name`");
        assert_eq!(DatabaseType::SQLite.quote_identifier("first_name"), "\"first_name\"");
        assert_eq!(DatabaseType::MySQL.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_database_type_defaults() {
        assert_eq!(DatabaseType::default(), DatabaseType::MySQL);
        assert_eq!(DatabaseType::MySQL.default_port(), Some(3306));
        assert_eq!(DatabaseType::SQLite.default_port(), None);
    }

    #[test]
    fn test_execution_mode() {
        assert!(ExecutionMode::Debug.is_debug());
        assert!(!ExecutionMode::default().is_debug());
        assert_eq!(ExecutionMode::Live.to_string(), "live");
    }
}
