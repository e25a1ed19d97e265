//! Process-wide, in-memory points ledger.
//!
//! Balances live for the lifetime of the process and are discarded at shutdown; nothing is
//! written to disk. The map is sharded (`DashMap`), so lookups for different users contend
//! only when they hash to the same shard, and only for the duration of the lookup. Each
//! balance is an `AtomicU64` updated with a single compare-and-swap, so a credit is either
//! fully applied or not applied at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::PipelineError;

/// Upper bound on compare-and-swap attempts for one credit.
pub const MAX_CREDIT_ATTEMPTS: u32 = 1_000;

/// Attempts after which a contended credit starts yielding its time slice.
const SPIN_ATTEMPTS: u32 = 16;

#[derive(Default)]
pub struct PointsLedger {
    balances: DashMap<String, Arc<AtomicU64>>,
}

impl PointsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, 0 for a user that was never credited. Never creates an entry.
    pub fn get(&self, user_id: &str) -> u64 {
        self.balances
            .get(user_id)
            .map(|balance| balance.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Atomically add `delta` to the user's balance and return the new total.
    ///
    /// The entry is created at 0 on first credit. Concurrent credits for the same user are
    /// linearizable: each returned total reflects every credit that completed before it.
    pub fn credit_and_get(&self, user_id: &str, delta: u64) -> Result<u64, PipelineError> {
        let balance = self.entry(user_id);

        let mut current = balance.load(Ordering::Acquire);
        for attempt in 1..=MAX_CREDIT_ATTEMPTS {
            let next = current
                .checked_add(delta)
                .ok_or_else(|| PipelineError::BalanceOverflow {
                    user_id: user_id.to_string(),
                })?;
            match balance.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(next),
                Err(observed) => {
                    current = observed;
                    if attempt < SPIN_ATTEMPTS {
                        std::hint::spin_loop();
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
        }

        log::warn!(
            "credit of {} for '{}' abandoned after {} attempts",
            delta,
            user_id,
            MAX_CREDIT_ATTEMPTS
        );
        Err(PipelineError::LedgerContention {
            user_id: user_id.to_string(),
            attempts: MAX_CREDIT_ATTEMPTS,
        })
    }

    /// Number of users with an entry.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Clone the balance handle so the shard lock is released before the update loop.
    fn entry(&self, user_id: &str) -> Arc<AtomicU64> {
        if let Some(existing) = self.balances.get(user_id) {
            return existing.value().clone();
        }
        self.balances
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone()
    }
}
