// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-wide error type.
//!
//! Every fallible operation in the engine returns [`SyncError`]. The variants
//! double as an error taxonomy: [`SyncError::is_recoverable`] tells callers
//! (most importantly [`Repository::force_refresh`](crate::Repository::force_refresh))
//! whether retrying later can possibly help.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The schema document is malformed or misses a required declaration.
    #[error("schema error: {0}")]
    Schema(String),

    /// A path expression could not be parsed or resolved in strict mode.
    #[error("path expression error: {0}")]
    PathEval(String),

    /// A database operation failed. `context` carries the statement text
    /// (or "connect" for connection failures) so operators can see which
    /// templated query went wrong.
    #[error("database error ({context}): {message}")]
    Database { context: String, message: String },

    /// The markup document could not be parsed or written.
    #[error("markup error: {0}")]
    Xml(String),

    /// A repository operation needed a main factory, but none is attached.
    #[error("the main factory is missing")]
    MissingMainFactory,

    /// A repository operation needed a copy builder, but none is attached.
    #[error("the copy builder is missing")]
    MissingCopyBuilder,

    /// Neither the main source, the copy source nor a previously stored
    /// document can serve data.
    #[error("no data is accessible")]
    NoData,

    /// The operation was interrupted by a shutdown request.
    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether a later retry of the failed operation can succeed.
    ///
    /// Database outages and empty sources are transient. Schema or markup
    /// defects, bad path expressions and missing collaborators require an
    /// operator fix, so retrying them would loop forever.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Database { .. } | SyncError::NoData | SyncError::Io(_)
        )
    }

    /// Shorthand for a database error with a statement context.
    pub(crate) fn database(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SyncError::Database {
            context: context.into(),
            message: message.to_string(),
        }
    }
}
