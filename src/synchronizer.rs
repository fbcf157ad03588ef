// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background synchronization loop.
//!
//! Runs [`Repository::refresh_and_mirror`] on a cadence: a shorter interval
//! while the repository holds data, a longer one while it is empty. Failures
//! are logged and the loop keeps going; only a shutdown request stops it.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SynchronizerConfig;
use crate::repository::Repository;
use crate::shutdown::ShutdownToken;

pub struct Synchronizer {
    repository: Arc<Repository>,
    config: SynchronizerConfig,
}

impl Synchronizer {
    pub fn new(repository: Arc<Repository>, config: SynchronizerConfig) -> Self {
        Self { repository, config }
    }

    /// Run the loop on the current task until shutdown.
    pub async fn run(&self, token: ShutdownToken) {
        info!("synchronizer started");
        loop {
            let started = Instant::now();

            match self.repository.refresh_and_mirror(&token).await {
                Ok(_) => debug!("synchronization round done"),
                Err(e) => warn!(error = %e, "synchronization round failed"),
            }

            // the round above already refreshed; never hit the source again
            let empty = self
                .repository
                .document()
                .map(|doc| doc.is_empty())
                .unwrap_or(true);
            let interval = if empty {
                self.config.no_data_interval()
            } else {
                self.config.data_found_interval()
            };

            let pause = interval.saturating_sub(started.elapsed());
            if !token.sleep(pause).await {
                break;
            }
        }
        info!("synchronizer stopped");
    }

    /// Spawn the loop on the runtime.
    pub fn spawn(self, token: ShutdownToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }
}
