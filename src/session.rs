// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key/value lookups against the persistent entity layer.
//!
//! Query templates may reference values from two well-known tables with the
//! `[%table.key%]` syntax; mirroring writes progress flags back through the
//! same interface. The engine never talks to those tables directly: an
//! application provides a [`KeyValueSession`] implementation and owns the
//! transaction semantics behind it.

use async_trait::async_trait;
use std::str::FromStr;

use crate::error::SyncError;

/// The two tables addressable from query templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyValueTable {
    ApplicationState,
    Config,
}

impl KeyValueTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyValueTable::ApplicationState => "applicationstate",
            KeyValueTable::Config => "config",
        }
    }
}

impl FromStr for KeyValueTable {
    type Err = ();

    /// Case-insensitive, matching how schemas in the field spell the tables.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("applicationstate") {
            Ok(KeyValueTable::ApplicationState)
        } else if s.eq_ignore_ascii_case("config") {
            Ok(KeyValueTable::Config)
        } else {
            Err(())
        }
    }
}

impl std::fmt::Display for KeyValueTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access to the key/value tables. Implementations own sessions and
/// transactions; `set` is expected to upsert.
#[async_trait]
pub trait KeyValueSession: Send + Sync {
    async fn get(&self, table: KeyValueTable, key: &str) -> Result<Option<String>, SyncError>;
    async fn set(&self, table: KeyValueTable, key: &str, value: &str) -> Result<(), SyncError>;
}

/// Naming handle for a partitioned key/value table, handed to session
/// implementations that lock per partition before templated queries run.
/// The engine itself never inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedTableScope {
    pub partition_id: i64,
    pub table_name: String,
}

impl LockedTableScope {
    pub fn new(partition_id: i64, table_name: impl Into<String>) -> Self {
        Self {
            partition_id,
            table_name: table_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_parse_is_case_insensitive() {
        assert_eq!(
            "ApplicationState".parse::<KeyValueTable>(),
            Ok(KeyValueTable::ApplicationState)
        );
        assert_eq!("CONFIG".parse::<KeyValueTable>(), Ok(KeyValueTable::Config));
        assert!("machine".parse::<KeyValueTable>().is_err());
    }

    #[test]
    fn test_table_display() {
        assert_eq!(KeyValueTable::ApplicationState.to_string(), "applicationstate");
        assert_eq!(KeyValueTable::Config.to_string(), "config");
    }
}
