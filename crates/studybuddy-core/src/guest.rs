//! Daily usage counters for anonymous guests.
//!
//! One record per device, replaced wholesale on every write. The daily reset
//! is discovered lazily: whichever access first sees a record dated before
//! today replaces it with a zeroed one. Storage failures never block a guest;
//! they are logged and treated as "no usage recorded".

use crate::clock::{DateKey, UsageClock};
use crate::constants::paths;
use crate::error::Result;
use crate::feature::{Feature, FeatureCounts};
use crate::plan::EntitlementService;
use crate::policy::PlanLimits;
use crate::remote::{guarded, CancelToken};
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestUsage {
    pub date: DateKey,
    #[serde(flatten)]
    pub counts: FeatureCounts,
}

impl GuestUsage {
    pub fn fresh(date: DateKey) -> Self {
        Self {
            date,
            counts: FeatureCounts::default(),
        }
    }

    pub fn get(&self, feature: Feature) -> u32 {
        self.counts.get(feature)
    }
}

pub struct GuestUsageStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn UsageClock>,
    limits: RwLock<PlanLimits>,
    /// Reservations not yet committed. The mutex doubles as the single-writer
    /// guard around the usage key.
    pending: Mutex<FeatureCounts>,
}

impl GuestUsageStore {
    /// `fallback` is used until server-issued guest limits have been cached.
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn UsageClock>,
        fallback: PlanLimits,
    ) -> Self {
        let limits = read_cached_limits(storage.as_ref()).unwrap_or(fallback);
        Self {
            storage,
            clock,
            limits: RwLock::new(limits),
            pending: Mutex::new(FeatureCounts::default()),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, FeatureCounts> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current record, reset to zero if it belongs to an earlier day.
    pub fn load(&self) -> GuestUsage {
        let today = self.clock.today();
        match self.read_record() {
            Some(record) if record.date == today => record,
            stale => {
                if let Some(old) = stale {
                    tracing::info!("Guest usage rolled over from {} to {}", old.date, today);
                }
                let fresh = GuestUsage::fresh(today);
                self.write_record(&fresh);
                fresh
            }
        }
    }

    /// True iff another action of `feature` fits in today's allowance.
    pub fn check_limit(&self, feature: Feature) -> bool {
        self.used(feature) < self.limit(feature)
    }

    /// Recorded plus reserved usage for today.
    pub fn used(&self, feature: Feature) -> u32 {
        let pending = self.lock_pending();
        self.load().get(feature).saturating_add(pending.get(feature))
    }

    pub fn increment(&self, feature: Feature) {
        let _guard = self.lock_pending();
        self.bump(feature);
    }

    pub fn remaining(&self, feature: Feature) -> u32 {
        self.limit(feature).saturating_sub(self.used(feature))
    }

    /// Check and hold one unit in a single critical section.
    pub fn try_reserve(&self, feature: Feature) -> bool {
        let mut pending = self.lock_pending();
        let used = self.load().get(feature).saturating_add(pending.get(feature));
        if used < self.limit(feature) {
            pending.increment(feature);
            true
        } else {
            false
        }
    }

    /// Turn a reservation into a persisted increment.
    pub fn commit(&self, feature: Feature) {
        let mut pending = self.lock_pending();
        pending.decrement(feature);
        self.bump(feature);
    }

    pub fn release(&self, feature: Feature) {
        self.lock_pending().decrement(feature);
    }

    pub fn limits(&self) -> PlanLimits {
        match self.limits.read() {
            Ok(limits) => limits.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn limit(&self, feature: Feature) -> u32 {
        match self.limits.read() {
            Ok(limits) => limits.quota(feature),
            Err(poisoned) => poisoned.into_inner().quota(feature),
        }
    }

    /// Fetch server-issued guest limits and cache them. On failure the
    /// previously cached (or hardcoded) limits stay in effect.
    pub async fn refresh_limits(
        &self,
        service: &dyn EntitlementService,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<PlanLimits> {
        let fetched = guarded("guest limits fetch", timeout, cancel, service.guest_limits()).await;

        let limits = match fetched {
            Ok(limits) => limits,
            Err(e) => {
                tracing::warn!("Guest limits fetch failed, keeping cached limits: {}", e);
                return Err(e);
            }
        };

        match serde_json::to_string(&limits) {
            Ok(json) => {
                if let Err(e) = self.storage.set(paths::GUEST_LIMITS_KEY, &json) {
                    tracing::warn!("Failed to cache guest limits: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize guest limits: {}", e),
        }

        match self.limits.write() {
            Ok(mut current) => *current = limits.clone(),
            Err(poisoned) => *poisoned.into_inner() = limits.clone(),
        }
        Ok(limits)
    }

    /// Forget today's record entirely.
    pub fn clear(&self) {
        let _guard = self.lock_pending();
        if let Err(e) = self.storage.remove(paths::GUEST_USAGE_KEY) {
            tracing::warn!("Failed to clear guest usage: {}", e);
        }
    }

    fn bump(&self, feature: Feature) {
        let mut usage = self.load();
        usage.counts.increment(feature);
        self.write_record(&usage);
    }

    fn read_record(&self) -> Option<GuestUsage> {
        let raw = match self.storage.get(paths::GUEST_USAGE_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Failed to read guest usage, treating as empty: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Corrupt guest usage record, treating as empty: {}", e);
                None
            }
        }
    }

    fn write_record(&self, record: &GuestUsage) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize guest usage: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(paths::GUEST_USAGE_KEY, &json) {
            tracing::warn!("Failed to persist guest usage, dropping write: {}", e);
        }
    }
}

fn read_cached_limits(storage: &dyn KeyValueStore) -> Option<PlanLimits> {
    let raw = storage.get(paths::GUEST_LIMITS_KEY).ok()??;
    serde_json::from_str(&raw)
        .map_err(|e| tracing::warn!("Ignoring corrupt cached guest limits: {}", e))
        .ok()
}
