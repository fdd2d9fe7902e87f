//! Delayed follow-up sends, at most one pending per user.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub type StepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct PendingStep {
    id: u64,
    trigger: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct UserChain {
    generation: u64,
    pending: Option<PendingStep>,
}

/// Every inbound event for a user starts a new generation. Work captured
/// under an older generation must not schedule or write anything.
///
/// Once a step's delay has elapsed it leaves the pending slot and can no
/// longer be aborted, only outdated through its generation.
#[derive(Default)]
pub struct ChainScheduler {
    users: Mutex<HashMap<String, UserChain>>,
    next_id: AtomicU64,
}

impl ChainScheduler {
    /// Runs `step` after `delay`, replacing any step already pending for
    /// `user_id`. Returns false and drops `step` when `generation` is stale.
    pub async fn schedule(
        self: &Arc<Self>,
        user_id: &str,
        trigger: &str,
        delay: Duration,
        generation: u64,
        step: StepFuture,
    ) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Held across spawn so the task cannot claim before it is registered.
        let mut users = self.users.lock().await;
        let chain = users.entry(user_id.to_string()).or_default();
        if chain.generation != generation {
            return false;
        }
        if let Some(previous) = chain.pending.take() {
            previous.handle.abort();
        }

        let scheduler = Arc::clone(self);
        let owner = user_id.to_string();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if scheduler.claim(&owner, id).await {
                step.await;
            }
        });
        chain.pending = Some(PendingStep {
            id,
            trigger: trigger.to_string(),
            handle,
        });
        true
    }

    /// Starts a new generation for `user_id` and aborts its pending step.
    /// Returns the new generation and the trigger that was dropped.
    pub async fn cancel(&self, user_id: &str) -> (u64, Option<String>) {
        let mut users = self.users.lock().await;
        let chain = users.entry(user_id.to_string()).or_default();
        chain.generation += 1;
        let dropped = chain.pending.take().map(|step| {
            step.handle.abort();
            step.trigger
        });
        (chain.generation, dropped)
    }

    pub async fn generation(&self, user_id: &str) -> u64 {
        let users = self.users.lock().await;
        users.get(user_id).map(|chain| chain.generation).unwrap_or(0)
    }

    #[cfg(test)]
    async fn pending_trigger(&self, user_id: &str) -> Option<String> {
        let users = self.users.lock().await;
        users
            .get(user_id)
            .and_then(|chain| chain.pending.as_ref())
            .map(|step| step.trigger.clone())
    }

    async fn claim(&self, user_id: &str, id: u64) -> bool {
        let mut users = self.users.lock().await;
        match users.get_mut(user_id) {
            Some(chain) if chain.pending.as_ref().map(|step| step.id) == Some(id) => {
                chain.pending = None;
                true
            }
            _ => false,
        }
    }
}
