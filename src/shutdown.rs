// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cooperative shutdown signaling.
//!
//! A [`ShutdownController`] is held by the process owner; cloneable
//! [`ShutdownToken`]s are handed to every long-running operation. Tokens are
//! checked at loop boundaries and before committing repository mutations, and
//! they make every sleep interruptible.

use std::time::Duration;
use tokio::sync::watch;

/// Owner side of the shutdown signal.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> (Self, ShutdownToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownToken { rx })
    }

    /// Signal every token. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver side of the shutdown signal.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// A token that never fires. Useful for one-shot tools and tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested. A closed channel counts as shutdown.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|v| *v).await;
    }

    /// Sleep for `duration`, waking up early on shutdown.
    ///
    /// Returns `true` when the full duration elapsed, `false` when the sleep
    /// was interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_starts_uncancelled() {
        let (_controller, token) = ShutdownController::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_reaches_all_tokens() {
        let (controller, token) = ShutdownController::new();
        let second = controller.token();

        controller.shutdown();

        assert!(token.is_cancelled());
        assert!(second.is_cancelled());
        // cancelled() resolves immediately once the flag is set
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_shutdown() {
        let (controller, token) = ShutdownController::new();

        let handle = tokio::spawn(async move { token.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.shutdown();

        let completed = handle.await.unwrap();
        assert!(!completed, "sleep should report interruption");
    }

    #[tokio::test]
    async fn test_sleep_completes_without_shutdown() {
        let token = ShutdownToken::never();
        assert!(token.sleep(Duration::from_millis(5)).await);
    }
}
