//! Background synchronization and initial-sync readiness.
//!
//! This module provides the [`SyncGate`], resolved exactly once when the first
//! sync response has been processed, and [`spawn_sync_loop`] which runs the
//! Matrix SDK sync loop in a background task and drives the gate.
//!
//! # Overview
//!
//! ```text
//! Pending ──first successful sync──▶ Ready
//!    │
//!    └──sync error before ready───▶ Failed
//! ```
//!
//! Once `Ready` or `Failed`, the state never changes again. Sync errors after
//! the gate opened are logged and the loop keeps running.

use std::sync::Arc;

use log::{error, info, trace, warn};
use matrix_sdk::{Client, LoopCtrl, config::SyncSettings};
use tokio::{sync::watch, task::JoinHandle};

use crate::error::PuppetError;

/// Readiness of the puppet session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Initial sync not finished yet
    Pending,
    /// Initial sync processed, room state is available
    Ready,
    /// Sync stopped before the initial sync finished
    Failed(String),
}

/// Set-once readiness signal shared between the sync loop and its waiters.
///
/// # Fields
///
/// * `state` - Watch channel holding the [`SyncState`]
#[derive(Clone, Debug)]
pub struct SyncGate {
    /// Current state, observed by every waiter
    state: Arc<watch::Sender<SyncState>>,
}

impl SyncGate {
    /// Creates a gate in the [`SyncState::Pending`] state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(SyncState::Pending);
        SyncGate {
            state: Arc::new(state),
        }
    }

    /// Opens the gate. Returns `true` only for the call that opened it.
    pub fn mark_ready(&self) -> bool {
        self.transition(SyncState::Ready)
    }

    /// Fails the gate. Returns `true` only if the gate was still pending.
    pub fn mark_failed(&self, reason: String) -> bool {
        self.transition(SyncState::Failed(reason))
    }

    /// Whether the initial sync has completed.
    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == SyncState::Ready
    }

    /// Returns a receiver following the state.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Suspends until the gate leaves [`SyncState::Pending`].
    ///
    /// There is no timeout: if the sync loop never answers, this never
    /// returns. Wrap it with [`tokio::time::timeout`] to bound the wait.
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::Sync`] if the gate failed.
    pub async fn wait_until_ready(&self) -> Result<(), PuppetError> {
        let mut receiver = self.state.subscribe();
        let state = receiver
            .wait_for(|state| *state != SyncState::Pending)
            .await
            .map_err(|e| PuppetError::Sync(e.to_string()))?
            .clone();

        match state {
            SyncState::Failed(reason) => Err(PuppetError::Sync(reason)),
            _ => Ok(()),
        }
    }

    /// Moves from `Pending` to `next`, leaving any final state untouched.
    fn transition(&self, next: SyncState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != SyncState::Pending {
                return false;
            }
            *state = next;
            true
        })
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts the sync loop of `client` in a background task.
///
/// The first successful sync response opens `gate`. An error before that
/// fails the gate and stops the loop; later errors are logged and syncing
/// continues. The task runs until the process exits.
///
/// # Arguments
///
/// * `client` - Client with a restored session
/// * `gate` - Gate opened by the first sync response
///
/// # Returns
///
/// The handle of the background task.
pub fn spawn_sync_loop(client: Client, gate: SyncGate) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("start syncing");

        let result = client
            .sync_with_result_callback(SyncSettings::default(), |sync_result| {
                let gate = gate.clone();
                async move {
                    match sync_result {
                        Ok(response) => {
                            if gate.mark_ready() {
                                info!("initial sync complete");
                            }
                            trace!("synced up to {}", response.next_batch);
                            Ok(LoopCtrl::Continue)
                        }
                        Err(err) if gate.is_ready() => {
                            warn!("sync failed, retrying: {err}");
                            Ok(LoopCtrl::Continue)
                        }
                        Err(err) => {
                            gate.mark_failed(err.to_string());
                            Err(err)
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(_) => info!("matrix sync ended"),
            Err(e) => {
                error!("matrix sync ended with error: {:?}", e);
                gate.mark_failed(e.to_string());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_new_gate_is_pending() {
        let gate = SyncGate::new();

        assert!(!gate.is_ready());
        assert_eq!(*gate.subscribe().borrow(), SyncState::Pending);
    }

    #[tokio::test]
    async fn test_wait_returns_once_ready() {
        let gate = SyncGate::new();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_until_ready().await }
        });

        tokio::task::yield_now().await;
        assert!(gate.mark_ready());

        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_wait_after_ready_returns_immediately() {
        let gate = SyncGate::new();
        gate.mark_ready();

        let result = timeout(Duration::from_secs(1), gate.wait_until_ready())
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_ready_is_resolved_once() {
        let gate = SyncGate::new();

        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
        assert!(!gate.mark_failed("late error".to_owned()));
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_failed_gate_reports_sync_error() {
        let gate = SyncGate::new();

        assert!(gate.mark_failed("M_UNKNOWN_TOKEN".to_owned()));
        assert!(!gate.mark_ready());

        let result = gate.wait_until_ready().await;
        assert!(matches!(result, Err(PuppetError::Sync(reason)) if reason == "M_UNKNOWN_TOKEN"));
    }

    #[tokio::test]
    async fn test_wait_blocks_while_pending() {
        let gate = SyncGate::new();

        let result = timeout(Duration::from_millis(50), gate.wait_until_ready()).await;
        assert!(result.is_err());
    }
}
