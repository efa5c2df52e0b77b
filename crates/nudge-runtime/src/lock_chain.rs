//! Synchronization lock chain
//!
//! Each in-flight synchronization holds an integer lock token. Tokens form
//! an ordered chain: a new sync first awaits the completion of its parent
//! (the previously stacked lock) so overlapping refreshes serialize without
//! blocking the caller thread. Completion is observable through a watch
//! channel, and an atomic claim flag gives exact first-wins semantics
//! between the success and timeout paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use nudge_core::{EngineError, Result};

/// Integer handle identifying one in-flight synchronization
pub type LockToken = u64;

/// Outcome published when a lock completes
pub type SyncOutcome = Result<()>;

// ----------------------------------------------------------------------------
// Lock Entry
// ----------------------------------------------------------------------------

struct LockEntry {
    id: LockToken,
    claimed: Arc<AtomicBool>,
    outcome_tx: watch::Sender<Option<SyncOutcome>>,
}

/// Awaits the completion of one lock
pub struct LockWaiter {
    rx: watch::Receiver<Option<SyncOutcome>>,
}

impl LockWaiter {
    /// Resolve once the lock completes
    pub async fn wait(mut self) -> SyncOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return Err(EngineError::ChannelClosed("sync lock".to_string()));
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Lock Chain
// ----------------------------------------------------------------------------

/// Ordered registry of synchronization locks
#[derive(Default)]
pub struct LockChain {
    entries: Mutex<Vec<LockEntry>>,
    next_id: AtomicU64,
}

impl LockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new lock onto the chain
    ///
    /// Returns the new token and, when another lock was already stacked, a
    /// waiter for that parent lock.
    pub fn acquire(&self) -> (LockToken, Option<LockWaiter>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (outcome_tx, _) = watch::channel(None);

        let mut entries = self.entries.lock().expect("lock chain poisoned");
        let parent = entries.last().map(|entry| LockWaiter {
            rx: entry.outcome_tx.subscribe(),
        });
        entries.push(LockEntry {
            id,
            claimed: Arc::new(AtomicBool::new(false)),
            outcome_tx,
        });
        debug!(token = id, "sync lock acquired");
        (id, parent)
    }

    /// A waiter observing the given lock's completion
    pub fn waiter(&self, id: LockToken) -> Option<LockWaiter> {
        let entries = self.entries.lock().expect("lock chain poisoned");
        entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| LockWaiter {
                rx: entry.outcome_tx.subscribe(),
            })
    }

    /// Claim the exclusive right to complete the lock
    ///
    /// Exactly one of the competing release paths (completion vs. timeout)
    /// wins; every later claim returns false and its caller must treat the
    /// lock as already settled.
    pub fn claim(&self, id: LockToken) -> bool {
        let entries = self.entries.lock().expect("lock chain poisoned");
        match entries.iter().find(|entry| entry.id == id) {
            Some(entry) => entry
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            None => false,
        }
    }

    /// Publish the outcome of a claimed lock and drop it from the chain
    pub fn complete(&self, id: LockToken, outcome: SyncOutcome) {
        let mut entries = self.entries.lock().expect("lock chain poisoned");
        if let Some(index) = entries.iter().position(|entry| entry.id == id) {
            let entry = entries.remove(index);
            debug!(token = id, ok = outcome.is_ok(), "sync lock completed");
            let _ = entry.outcome_tx.send(Some(outcome));
        }
    }

    /// Claim and complete every stacked lock with the same outcome
    ///
    /// Used when the messaging channel is disabled and pending waits must
    /// resolve without a fetch.
    pub fn complete_all(&self, outcome: SyncOutcome) {
        let mut entries = self.entries.lock().expect("lock chain poisoned");
        // A lock another path already claimed stays; that path owns its
        // completion.
        entries.retain(|entry| {
            let won = entry
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if won {
                let _ = entry.outcome_tx.send(Some(outcome.clone()));
            }
            !won
        });
    }

    /// Number of locks still stacked
    pub fn pending(&self) -> usize {
        self.entries.lock().expect("lock chain poisoned").len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiter_resolves_on_complete() {
        let chain = LockChain::new();
        let (token, parent) = chain.acquire();
        assert!(parent.is_none());

        let waiter = chain.waiter(token).unwrap();
        assert!(chain.claim(token));
        chain.complete(token, Ok(()));

        assert!(waiter.wait().await.is_ok());
        assert_eq!(chain.pending(), 0);
    }

    #[tokio::test]
    async fn test_claim_is_first_wins() {
        let chain = LockChain::new();
        let (token, _) = chain.acquire();

        assert!(chain.claim(token));
        assert!(!chain.claim(token));

        chain.complete(token, Err(EngineError::Timeout { duration_ms: 5000 }));
        // Completed locks cannot be reclaimed.
        assert!(!chain.claim(token));
    }

    #[tokio::test]
    async fn test_parent_chaining_orders_completions() {
        let chain = Arc::new(LockChain::new());
        let (first, none) = chain.acquire();
        assert!(none.is_none());
        let (second, parent) = chain.acquire();
        let parent = parent.expect("second lock has a parent");

        let order = Arc::new(Mutex::new(Vec::new()));
        let chained = {
            let chain = chain.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _ = parent.wait().await;
                order.lock().unwrap().push("second");
                assert!(chain.claim(second));
                chain.complete(second, Ok(()));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        assert!(chain.claim(first));
        chain.complete(first, Ok(()));

        chained.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_complete_all_resolves_every_waiter() {
        let chain = LockChain::new();
        let (a, _) = chain.acquire();
        let (b, _) = chain.acquire();
        let wait_a = chain.waiter(a).unwrap();
        let wait_b = chain.waiter(b).unwrap();

        chain.complete_all(Ok(()));

        assert!(wait_a.wait().await.is_ok());
        assert!(wait_b.wait().await.is_ok());
        assert_eq!(chain.pending(), 0);
    }
}
