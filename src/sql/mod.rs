// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Relational source and destination.
//!
//! [`SqlFactory`] materializes a document by running the query templates of a
//! schema; [`SqlBuilder`] pushes a document back by merging it with a schema
//! and executing the resulting statements. Both sides connect through the
//! runtime-dispatched `Any` driver so the same schema works against SQLite
//! in tests and PostgreSQL in production.

pub mod builder;
pub mod factory;

pub use builder::SqlBuilder;
pub use factory::SqlFactory;

use std::sync::Once;

use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use crate::error::SyncError;
use crate::retry::{retry, RetryConfig};
use crate::schema::ConnectionParameters;

static INSTALL_DRIVERS: Once = Once::new();

/// Open a small pool for the connection declared on a schema root.
/// Connection setup is retried with backoff; everything after that is not.
pub(crate) async fn open_pool(params: &ConnectionParameters) -> Result<AnyPool, SyncError> {
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
    let url = params.url();
    retry("connect", &RetryConfig::startup(), || {
        AnyPoolOptions::new().max_connections(2).connect(&url)
    })
    .await
    .map_err(|e| SyncError::database("connect", e))
}

pub(crate) async fn fetch_rows(pool: &AnyPool, statement: &str) -> Result<Vec<AnyRow>, SyncError> {
    sqlx::query(statement)
        .fetch_all(pool)
        .await
        .map_err(|e| SyncError::database(statement, e))
}

pub(crate) async fn execute_statement(pool: &AnyPool, statement: &str) -> Result<(), SyncError> {
    sqlx::query(statement)
        .execute(pool)
        .await
        .map_err(|e| SyncError::database(statement, e))?;
    Ok(())
}

/// Render a column value as attribute text. The `Any` driver hands most
/// values back as strings already; numeric and boolean columns are rendered
/// in their canonical form, NULL becomes the empty string.
pub(crate) fn column_text(row: &AnyRow, index: usize) -> String {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.unwrap_or_default();
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return value.to_string();
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return value.to_string();
    }
    if let Ok(value) = row.try_get::<bool, _>(index) {
        return value.to_string();
    }
    if let Ok(value) = row.try_get::<Vec<u8>, _>(index) {
        return String::from_utf8_lossy(&value).into_owned();
    }
    String::new()
}
