// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The two seams of the engine.
//!
//! A [`Factory`] produces a [`Document`] from somewhere (a relational source,
//! a file, a literal string); a [`Builder`] persists one somewhere. The
//! [`Repository`](crate::Repository) drives any factory/builder pair without
//! knowing what is behind them, which is what makes the main-source /
//! copy-source arrangement possible: the copy of a relational source is just
//! a file factory plus a file builder.

use async_trait::async_trait;

use crate::document::Document;
use crate::error::SyncError;
use crate::shutdown::ShutdownToken;

/// Produces documents.
#[async_trait]
pub trait Factory: Send + Sync {
    /// Build a document from the source.
    ///
    /// With `optional` set, a source that does not exist at all (a missing
    /// copy file, typically) yields `Ok(None)` instead of an error. A source
    /// that exists but fails to produce data is always an error.
    async fn read(
        &self,
        cancel: &ShutdownToken,
        optional: bool,
    ) -> Result<Option<Document>, SyncError>;

    /// Whether this factory runs statements or writes flags after a
    /// successful mirror. Lets the repository skip a durability downgrade
    /// when nothing depends on the copy being committed first.
    fn has_success_action(&self) -> bool {
        false
    }

    /// Called after the document was successfully mirrored to the copy.
    async fn on_success(&self, _doc: &Document) -> Result<(), SyncError> {
        Ok(())
    }

    /// Called after mirroring the document failed.
    async fn on_failure(&self, _doc: &Document) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Persists documents.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Write the document to the destination.
    async fn write(&self, doc: &Document, cancel: &ShutdownToken) -> Result<(), SyncError>;

    /// Allow the destination to trade durability for latency on the next
    /// write. Only meaningful for transactional destinations; the default
    /// does nothing.
    fn set_asynchronous_commit(&self) {}
}
