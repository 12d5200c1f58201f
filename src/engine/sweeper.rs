use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::info;

use super::Engine;
use crate::observability;

/// Request-driven trigger for the expired-hold sweep. Owned by the engine:
/// there is no background scheduler and no global flag, every Nth inbound
/// request pays for one sweep.
pub struct HoldSweeper {
    every: u64,
    counter: AtomicU64,
}

impl HoldSweeper {
    pub fn new(every: u64) -> Self {
        Self { every, counter: AtomicU64::new(0) }
    }

    pub fn should_sweep(&self) -> bool {
        if self.every == 0 {
            return false;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        n % self.every == 0
    }
}

impl Engine {
    pub(crate) async fn maybe_sweep(&self) {
        if self.sweeper.should_sweep() {
            self.sweep_expired_holds().await;
        }
    }

    /// Cancel provisional holds whose verification window has lapsed,
    /// releasing their slots back to availability. One conditional bulk
    /// update: idempotent, and safe to run concurrently with itself and
    /// with the booking composer: a hold confirmed in the meantime no
    /// longer matches the PENDING predicate and is left alone.
    pub async fn sweep_expired_holds(&self) -> u64 {
        self.sweep_expired_holds_at(OffsetDateTime::now_utc()).await
    }

    pub async fn sweep_expired_holds_at(&self, now: OffsetDateTime) -> u64 {
        let cutoff = now - self.config.hold_window();
        let canceled = self.store.cancel_stale_pending(cutoff, now).await;
        if canceled > 0 {
            metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(canceled);
            info!(canceled, "expired provisional holds released");
        }
        canceled
    }
}
