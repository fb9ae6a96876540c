//! Per-provider quota cool-down.
//!
//! Entries are only ever overwritten: an expired entry is simply ignored on
//! the next lookup. State lives for the lifetime of the tracker and is never
//! persisted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;

use super::providers::ProviderKind;

/// Cool-down applied when a rate-limited provider gives no `Retry-After`.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Source of the current time, injected so tests control cool-down expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Default)]
pub struct QuotaTracker {
    expiries: Mutex<HashMap<ProviderKind, OffsetDateTime>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `now` is strictly before the recorded expiry.
    pub fn is_exhausted(&self, provider: ProviderKind, now: OffsetDateTime) -> bool {
        self.exhausted_until(provider)
            .map_or(false, |until| now < until)
    }

    pub fn mark_exhausted(&self, provider: ProviderKind, until: OffsetDateTime) {
        let mut expiries = self.expiries.lock().unwrap_or_else(|e| e.into_inner());
        expiries.insert(provider, until);
    }

    pub fn exhausted_until(&self, provider: ProviderKind) -> Option<OffsetDateTime> {
        let expiries = self.expiries.lock().unwrap_or_else(|e| e.into_inner());
        expiries.get(&provider).copied()
    }
}
