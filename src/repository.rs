// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-source document repository.
//!
//! A repository holds the latest [`Document`] produced by a main factory,
//! keeps a copy of it current through a copy builder, and falls back to the
//! copy factory when the main source is unreachable. All state transitions
//! happen under one lock; the factories and builders themselves are awaited
//! outside it so a slow source never blocks readers.
//!
//! The `copy_up_to_date` flag is the heart of the arrangement: it is cleared
//! when a refresh produces a document that differs from the stored one, and
//! set again once the copy builder has written it out.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::document::{self, Document};
use crate::error::SyncError;
use crate::factory::{Builder, Factory};
use crate::path;
use crate::shutdown::ShutdownToken;

/// Which source produced the stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Main,
    Copy,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DataSource::Main => "main",
            DataSource::Copy => "copy",
        })
    }
}

struct State {
    main: Option<Arc<dyn Factory>>,
    copy: Option<Arc<dyn Factory>>,
    builder: Option<Arc<dyn Builder>>,
    document: Option<Arc<Document>>,
    source: DataSource,
    copy_up_to_date: bool,
    /// Cached `has_success_action` of the main factory, consulted on every
    /// mirror without touching the factory.
    main_success_action: bool,
}

pub struct Repository {
    state: RwLock<State>,
}

impl Repository {
    /// Full arrangement: main source, copy source, copy destination.
    pub fn new(
        main: Arc<dyn Factory>,
        copy: Arc<dyn Factory>,
        builder: Arc<dyn Builder>,
    ) -> Self {
        let main_success_action = main.has_success_action();
        Self {
            state: RwLock::new(State {
                main: Some(main),
                copy: Some(copy),
                builder: Some(builder),
                document: None,
                source: DataSource::Main,
                // the copy freshness is unknown until the first mirror
                copy_up_to_date: false,
                main_success_action,
            }),
        }
    }

    /// Main source only, nothing to mirror.
    pub fn with_main(main: Arc<dyn Factory>) -> Self {
        let main_success_action = main.has_success_action();
        Self {
            state: RwLock::new(State {
                main: Some(main),
                copy: None,
                builder: None,
                document: None,
                source: DataSource::Main,
                copy_up_to_date: true,
                main_success_action,
            }),
        }
    }

    pub fn set_main_factory(&self, main: Arc<dyn Factory>) {
        let mut state = self.state.write();
        state.main_success_action = main.has_success_action();
        state.main = Some(main);
    }

    pub fn set_copy_factory(&self, copy: Arc<dyn Factory>) {
        self.state.write().copy = Some(copy);
    }

    /// Attaching a builder marks the copy stale: whatever the destination
    /// currently holds was not written by this repository.
    pub fn set_copy_builder(&self, builder: Arc<dyn Builder>) {
        let mut state = self.state.write();
        state.builder = Some(builder);
        state.copy_up_to_date = false;
    }

    pub fn main_factory(&self) -> Result<Arc<dyn Factory>, SyncError> {
        self.state
            .read()
            .main
            .clone()
            .ok_or(SyncError::MissingMainFactory)
    }

    pub fn copy_factory(&self) -> Option<Arc<dyn Factory>> {
        self.state.read().copy.clone()
    }

    pub fn copy_builder(&self) -> Result<Arc<dyn Builder>, SyncError> {
        self.state
            .read()
            .builder
            .clone()
            .ok_or(SyncError::MissingCopyBuilder)
    }

    pub fn source(&self) -> DataSource {
        self.state.read().source
    }

    pub fn is_copy_up_to_date(&self) -> bool {
        self.state.read().copy_up_to_date
    }

    pub fn document(&self) -> Option<Arc<Document>> {
        self.state.read().document.clone()
    }

    /// Re-read the main source and install the result.
    ///
    /// When the main source fails and a copy factory is attached, the copy is
    /// read and installed so readers keep being served, but the main error is
    /// still returned: callers must keep treating the refresh as failed or
    /// the stale copy would silently become the truth.
    pub async fn refresh(&self, cancel: &ShutdownToken) -> Result<Arc<Document>, SyncError> {
        let (main, copy) = {
            let state = self.state.read();
            (
                state.main.clone().ok_or(SyncError::MissingMainFactory)?,
                state.copy.clone(),
            )
        };

        let main_err = match main.read(cancel, false).await {
            Ok(Some(doc)) => {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                let doc = Arc::new(doc);
                let mut state = self.state.write();
                if state.builder.is_some() {
                    let changed = state.document.as_deref() != Some(doc.as_ref());
                    if changed {
                        state.copy_up_to_date = false;
                    }
                }
                state.document = Some(doc.clone());
                state.source = DataSource::Main;
                return Ok(doc);
            }
            Ok(None) => SyncError::NoData,
            Err(e) => e,
        };

        warn!(error = %main_err, "main source failed");
        if let Some(copy) = copy {
            match copy.read(cancel, true).await {
                Ok(Some(doc)) => {
                    info!(
                        document = %document::summarize(&doc),
                        "serving the copy instead"
                    );
                    let mut state = self.state.write();
                    state.document = Some(Arc::new(doc));
                    state.source = DataSource::Copy;
                    // the copy is what we just read, nothing to write back
                    state.copy_up_to_date = true;
                }
                Ok(None) => info!("no copy available"),
                Err(e) => warn!(error = %e, "copy source failed too"),
            }
        }
        Err(main_err)
    }

    /// Write the stored document to the copy destination if it is stale.
    ///
    /// Post-synchronization hooks of the main factory run after the write;
    /// their own failures are logged but never override the write outcome.
    pub async fn mirror(&self, cancel: &ShutdownToken) -> Result<(), SyncError> {
        let (doc, builder, main, main_success_action) = {
            let state = self.state.read();
            if state.copy_up_to_date || state.source == DataSource::Copy {
                return Ok(());
            }
            let Some(doc) = state.document.clone() else {
                return Ok(());
            };
            (
                doc,
                state.builder.clone(),
                state.main.clone(),
                state.main_success_action,
            )
        };

        let Some(builder) = builder else {
            warn!("no copy builder attached, nothing to mirror");
            self.state.write().copy_up_to_date = true;
            return Ok(());
        };

        if !main_success_action {
            // nothing downstream depends on the copy commit, trade
            // durability for latency
            builder.set_asynchronous_commit();
        }

        match builder.write(&doc, cancel).await {
            Ok(()) => {
                self.state.write().copy_up_to_date = true;
                if let Some(main) = main {
                    if let Err(e) = main.on_success(&doc).await {
                        warn!(error = %e, "success hook failed");
                    }
                }
                Ok(())
            }
            Err(e) => {
                if let Some(main) = main {
                    if let Err(hook_err) = main.on_failure(&doc).await {
                        warn!(error = %hook_err, "failure hook failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// One synchronization round: refresh from the main source, then mirror.
    ///
    /// When the refresh fails but an earlier document is still waiting to be
    /// mirrored, the mirror runs anyway (best effort) so a flaky main source
    /// cannot starve the copy forever. The refresh error is returned either
    /// way.
    pub async fn refresh_and_mirror(
        &self,
        cancel: &ShutdownToken,
    ) -> Result<Arc<Document>, SyncError> {
        match self.refresh(cancel).await {
            Ok(doc) => {
                self.mirror(cancel).await?;
                Ok(doc)
            }
            Err(e) => {
                let pending = {
                    let state = self.state.read();
                    !state.copy_up_to_date && state.document.is_some()
                };
                if pending {
                    if let Err(mirror_err) = self.mirror(cancel).await {
                        warn!(error = %mirror_err, "mirroring the stored document failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// The stored document, refreshing first when it is missing or the copy
    /// is stale. A failed refresh still serves the stored document, if any.
    async fn current_document(
        &self,
        cancel: &ShutdownToken,
    ) -> Result<Arc<Document>, SyncError> {
        {
            let state = self.state.read();
            if state.copy_up_to_date {
                if let Some(doc) = &state.document {
                    return Ok(doc.clone());
                }
            }
        }
        match self.refresh(cancel).await {
            Ok(doc) => Ok(doc),
            Err(e) => {
                let (stored, source) = {
                    let state = self.state.read();
                    (state.document.clone(), state.source)
                };
                match stored {
                    Some(doc) => {
                        warn!(error = %e, %source, "refresh failed, serving the stored document");
                        Ok(doc)
                    }
                    None => {
                        warn!(error = %e, "refresh failed and nothing is stored");
                        Err(SyncError::NoData)
                    }
                }
            }
        }
    }

    /// Look up a value in the stored document.
    pub async fn read(
        &self,
        expr: &str,
        cancel: &ShutdownToken,
    ) -> Result<Option<String>, SyncError> {
        let doc = self.current_document(cancel).await?;
        path::select_first(&doc, doc.root(), expr)
    }

    /// Whether the stored document carries any data at all.
    pub async fn is_empty(&self, cancel: &ShutdownToken) -> Result<bool, SyncError> {
        let doc = self.current_document(cancel).await?;
        Ok(doc.is_empty())
    }

    /// Refresh until some document is available, sleeping `interval` between
    /// recoverable failures. Used at startup, where running without any data
    /// would be worse than waiting.
    ///
    /// A refresh that failed on the main source but installed the copy counts
    /// as available: the copy is exactly what this is waiting for.
    pub async fn force_refresh(
        &self,
        interval: Duration,
        cancel: &ShutdownToken,
    ) -> Result<Arc<Document>, SyncError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self.refresh(cancel).await {
                Ok(doc) => return Ok(doc),
                Err(e) if e.is_recoverable() => {
                    if let Some(doc) = self.document() {
                        warn!(error = %e, source = %self.source(), "starting from the fallback document");
                        return Ok(doc);
                    }
                    warn!(error = %e, interval = ?interval, "no data yet, retrying");
                }
                Err(e) => return Err(e),
            }
            if !cancel.sleep(interval).await {
                return Err(SyncError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_display() {
        assert_eq!(DataSource::Main.to_string(), "main");
        assert_eq!(DataSource::Copy.to_string(), "copy");
    }
}
