//! State synchronization coordination
//!
//! One synchronization attempt moves through lock → parent wait → fetch →
//! post-processing → unlock. Overlapping attempts serialize through the
//! lock chain without blocking callers, and the fetch is bounded by a
//! first-wins race between completion and a timeout: whichever claims the
//! lock first settles it, and the loser becomes a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use nudge_core::sync_payload::decode_state_payload;
use nudge_core::{EngineError, PostProcessConfig, SyncConfig, UserData};

use crate::lock_chain::LockChain;
use crate::state::{StateOwner, StateStore};
use crate::traits::{StateRequest, StateTransport};

// ----------------------------------------------------------------------------
// Sync Report
// ----------------------------------------------------------------------------

/// Result of a successful synchronization
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Post-application user snapshot, used to emit the internal
    /// sync-completed event; absent when no fetch ran (channel disabled)
    pub user_snapshot: Option<UserData>,
}

// ----------------------------------------------------------------------------
// Sync Coordinator
// ----------------------------------------------------------------------------

/// Orchestrates remote state refreshes against the store
pub struct SyncCoordinator {
    store: Arc<StateStore>,
    transport: Arc<dyn StateTransport>,
    locks: Arc<LockChain>,
    config: SyncConfig,
    enabled: Arc<AtomicBool>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<StateStore>,
        transport: Arc<dyn StateTransport>,
        config: SyncConfig,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            transport,
            locks: Arc::new(LockChain::new()),
            config,
            enabled,
        }
    }

    /// Number of synchronizations still in flight
    pub fn pending_locks(&self) -> usize {
        self.locks.pending()
    }

    /// Run one synchronization attempt to completion
    pub async fn sync_state(
        &self,
        request: StateRequest,
        post: PostProcessConfig,
    ) -> Result<SyncReport, EngineError> {
        if !self.enabled.load(Ordering::SeqCst) {
            debug!("messaging channel disabled, resolving stacked locks without fetch");
            self.locks.complete_all(Ok(()));
            if post.clear {
                self.store.clear_user_state().await;
            }
            return Ok(SyncReport::default());
        }

        let (token, parent) = self.locks.acquire();
        let waiter = self
            .locks
            .waiter(token)
            .ok_or_else(|| EngineError::ChannelClosed("sync lock chain".to_string()))?;

        // Serialize behind the previously stacked sync; its outcome does not
        // gate this one.
        if let Some(parent) = parent {
            let _ = parent.wait().await;
        }

        let timer = self.arm_unlock_timer(token);
        // The snapshot is sent before the lock completes, so on a success
        // outcome it is already available without awaiting the fetch task.
        let (snapshot_tx, mut snapshot_rx) = oneshot::channel();
        self.spawn_fetch(token, request, post, snapshot_tx);

        let outcome = waiter.wait().await;
        timer.abort();
        match outcome {
            Ok(()) => Ok(SyncReport {
                user_snapshot: snapshot_rx.try_recv().ok(),
            }),
            Err(error) => {
                // The fetch task keeps running but can no longer claim the
                // lock, so a late response is a no-op.
                if post.clear {
                    self.store.clear_user_state().await;
                }
                Err(error)
            }
        }
    }

    /// Auto-unlock with a timeout error if fetching never completes
    fn arm_unlock_timer(&self, token: u64) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let timeout = self.config.fetch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if locks.claim(token) {
                warn!(token, "state fetch timed out, auto-unlocking");
                locks.complete(
                    token,
                    Err(EngineError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    }),
                );
            }
        })
    }

    /// Fetch, then apply under the claim guard
    fn spawn_fetch(
        &self,
        token: u64,
        request: StateRequest,
        post: PostProcessConfig,
        snapshot_tx: oneshot::Sender<UserData>,
    ) {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let locks = self.locks.clone();
        tokio::spawn(async move {
            let decoded = transport
                .fetch_state(request.clone())
                .await
                .and_then(|raw| decode_state_payload(&raw));

            if !locks.claim(token) {
                debug!(token, "fetch settled after release, ignoring result");
                return;
            }

            match decoded {
                Ok(snapshot) => {
                    let owner = StateOwner {
                        external_user_id: request.external_user_id,
                        device_id: request.device_id,
                    };
                    let user = store.apply_sync(snapshot, post, owner).await;
                    let _ = snapshot_tx.send(user);
                    locks.complete(token, Ok(()));
                }
                Err(error) => {
                    warn!(token, %error, "state fetch failed, cached state retained");
                    locks.complete(token, Err(error));
                }
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
