use crate::clock::{DateKey, UsageClock};
use crate::constants::{paths, timeouts};
use crate::error::{Result, StudyError};
use crate::feature::{Feature, FeatureCounts};
use crate::plan::remote::EntitlementService;
use crate::plan::status::{validate_transition, PlanStatus, SubscriptionStatus, UsageView};
use crate::policy::{PlanLimits, PlanTier};
use crate::remote::{guarded, CancelToken};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Result of a [`PlanStateMachine::fetch_status`] call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server response replaced the cached status.
    Updated,
    /// Another fetch was already in flight; this call did nothing.
    Coalesced,
    /// The session was cleared while the request was in flight; the response was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct PlanState {
    status: Option<PlanStatus>,
    /// Optimistic increments since the last fetch.
    provisional: FeatureCounts,
    /// Approved actions whose dispatch has not completed yet.
    pending: FeatureCounts,
    loading: bool,
    last_error: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
}

/// What survives a restart: the last server answer plus local provisional counts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedPlan {
    status: PlanStatus,
    synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    provisional: FeatureCounts,
    /// Day the provisional counts were recorded on.
    written_on: DateKey,
}

impl PlanState {
    fn used(&self, feature: Feature) -> u32 {
        let confirmed = self
            .status
            .as_ref()
            .map(|s| s.usage.get(feature))
            .unwrap_or(0);
        confirmed
            .saturating_add(self.provisional.get(feature))
            .saturating_add(self.pending.get(feature))
    }
}

/// Owner of the signed-in user's cached plan status.
///
/// The server is authoritative: a successful fetch replaces everything and
/// discards provisional counts. Nothing outside this type writes the status.
///
/// With [`with_storage`](Self::with_storage) the last good status is cached on
/// the device, so a restart with the server unreachable still enforces it.
pub struct PlanStateMachine {
    remote: Arc<dyn EntitlementService>,
    clock: Arc<dyn UsageClock>,
    storage: Option<Arc<dyn KeyValueStore>>,
    state: Mutex<PlanState>,
    fetch_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    timeout: Duration,
}

impl PlanStateMachine {
    pub fn new(remote: Arc<dyn EntitlementService>, clock: Arc<dyn UsageClock>) -> Self {
        Self {
            remote,
            clock,
            storage: None,
            state: Mutex::new(PlanState::default()),
            fetch_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            timeout: Duration::from_secs(timeouts::REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist the status to `storage` and restore whatever was cached there.
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        if let Some(cached) = read_cached_plan(storage.as_ref()) {
            let today = self.clock.today();
            let state = self.state.get_mut().unwrap_or_else(|p| p.into_inner());
            tracing::debug!(
                "Restored cached plan status (tier={:?}, synced {:?})",
                cached.status.tier,
                cached.synced_at
            );
            state.status = Some(cached.status);
            state.last_synced_at = cached.synced_at;
            if cached.written_on == today {
                state.provisional = cached.provisional;
            }
        }
        self.storage = Some(storage);
        self.reset_daily_usage();
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, PlanState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Best effort: a failed write is logged and the in-memory state stands.
    fn persist(&self, state: &PlanState) {
        let (Some(storage), Some(status)) = (self.storage.as_ref(), state.status.as_ref()) else {
            return;
        };
        let cached = CachedPlan {
            status: status.clone(),
            synced_at: state.last_synced_at,
            provisional: state.provisional,
            written_on: self.clock.today(),
        };
        let result = serde_json::to_string(&cached)
            .map_err(StudyError::from)
            .and_then(|json| storage.set(paths::PLAN_STATUS_KEY, &json));
        if let Err(e) = result {
            tracing::warn!("Failed to cache plan status: {}", e);
        }
    }

    /// Pull the authoritative status from the entitlement service.
    pub async fn fetch_status(&self) -> Result<FetchOutcome> {
        self.fetch_status_with(&CancelToken::never()).await
    }

    /// Like [`fetch_status`](Self::fetch_status) but abandonable through `cancel`.
    ///
    /// On failure the previous status stays cached and `last_error` is set.
    pub async fn fetch_status_with(&self, cancel: &CancelToken) -> Result<FetchOutcome> {
        let _in_flight = match self.fetch_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Plan status fetch already in flight, coalescing");
                return Ok(FetchOutcome::Coalesced);
            }
        };
        self.fetch_locked(cancel).await
    }

    /// Fetch after a subscription mutation. Waits for any in-flight fetch to
    /// finish first, since that one may have been issued before the mutation.
    pub async fn refresh_status_with(&self, cancel: &CancelToken) -> Result<FetchOutcome> {
        let _in_flight = tokio::select! {
            guard = self.fetch_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(StudyError::Cancelled),
        };
        self.fetch_locked(cancel).await
    }

    /// Caller must hold `fetch_lock`.
    async fn fetch_locked(&self, cancel: &CancelToken) -> Result<FetchOutcome> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.lock_state().loading = true;

        let result = guarded(
            "plan status fetch",
            self.timeout,
            cancel,
            self.remote.plan_status(),
        )
        .await;

        let mut state = self.lock_state();
        state.loading = false;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Dropping plan status response from a cleared session");
            return Ok(FetchOutcome::Superseded);
        }

        match result {
            Ok(status) => {
                let previous = state.status.as_ref().and_then(|s| s.subscription_status);
                if let Err(e) = validate_transition(previous, status.subscription_status) {
                    // Server wins; the log is there to catch backend regressions.
                    tracing::warn!("Server reported unexpected subscription change: {}", e);
                }

                tracing::info!(
                    "Plan status synced: tier={:?} subscription={:?}",
                    status.tier,
                    status.subscription_status
                );

                let stale_day = status.usage.last_reset_date < self.clock.today();
                state.status = Some(status);
                state.provisional = FeatureCounts::default();
                state.last_error = None;
                state.last_synced_at = Some(Utc::now());
                self.persist(&state);
                drop(state);

                if stale_day {
                    self.reset_daily_usage();
                }
                Ok(FetchOutcome::Updated)
            }
            Err(e) => {
                tracing::warn!("Plan status fetch failed, keeping cached status: {}", e);
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Count an action before the server has. Overwritten by the next fetch.
    pub fn increment_usage_optimistic(&self, feature: Feature) {
        let mut state = self.lock_state();
        state.provisional.increment(feature);
        self.persist(&state);
        tracing::debug!(
            "Provisional {} usage now {}",
            feature,
            state.provisional.get(feature)
        );
    }

    /// Zero the displayed confirmed counts when the server has not rolled over yet.
    /// Never authoritative: the next fetch replaces whatever this did.
    pub fn reset_daily_usage(&self) {
        let today = self.clock.today();
        let mut state = self.lock_state();
        if let Some(status) = state.status.as_mut() {
            if status.usage.last_reset_date < today {
                tracing::debug!(
                    "Server usage dated {}, showing zeroed counts for {}",
                    status.usage.last_reset_date,
                    today
                );
                status.usage.counts = FeatureCounts::default();
                status.usage.last_reset_date = today;
            }
        }
    }

    /// Drop everything on logout. An in-flight fetch will not repopulate it.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock_state();
        *state = PlanState::default();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove(paths::PLAN_STATUS_KEY) {
                tracing::warn!("Failed to remove cached plan status: {}", e);
            }
        }
        drop(state);
        tracing::info!("Plan status cleared");
    }

    /// Errors unless the cached subscription can be cancelled by the user.
    pub fn ensure_cancellable(&self) -> Result<()> {
        match self.subscription_status() {
            Some(status) if status.is_cancellable() => Ok(()),
            Some(status) => Err(StudyError::InvalidTransition(format!(
                "cannot cancel a {} subscription",
                status
            ))),
            None => Err(StudyError::InvalidTransition(
                "no subscription to cancel".to_string(),
            )),
        }
    }

    pub fn snapshot(&self) -> Option<PlanStatus> {
        self.lock_state().status.clone()
    }

    pub fn has_status(&self) -> bool {
        self.lock_state().status.is_some()
    }

    pub fn tier(&self) -> Option<PlanTier> {
        self.lock_state().status.as_ref().map(|s| s.tier)
    }

    pub fn limits(&self) -> Option<PlanLimits> {
        self.lock_state().status.as_ref().map(|s| s.limits.clone())
    }

    pub fn subscription_status(&self) -> Option<SubscriptionStatus> {
        self.lock_state()
            .status
            .as_ref()
            .and_then(|s| s.subscription_status)
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_synced_at
    }

    pub fn usage_view(&self, feature: Feature) -> UsageView {
        let state = self.lock_state();
        UsageView {
            confirmed: state
                .status
                .as_ref()
                .map(|s| s.usage.get(feature))
                .unwrap_or(0),
            provisional: state.provisional.get(feature),
        }
    }

    /// Confirmed + provisional + reserved.
    pub fn used(&self, feature: Feature) -> u32 {
        self.lock_state().used(feature)
    }

    /// Atomically check `used < limit` and hold one unit for an action about to be dispatched.
    pub fn try_reserve(&self, feature: Feature, limit: u32) -> bool {
        let mut state = self.lock_state();
        if state.used(feature) < limit {
            state.pending.increment(feature);
            true
        } else {
            false
        }
    }

    /// The reserved action was dispatched; count it provisionally.
    pub fn commit_reservation(&self, feature: Feature) {
        let mut state = self.lock_state();
        state.pending.decrement(feature);
        state.provisional.increment(feature);
        self.persist(&state);
    }

    pub fn release_reservation(&self, feature: Feature) {
        self.lock_state().pending.decrement(feature);
    }
}

fn read_cached_plan(storage: &dyn KeyValueStore) -> Option<CachedPlan> {
    let raw = match storage.get(paths::PLAN_STATUS_KEY) {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!("Failed to read cached plan status: {}", e);
            return None;
        }
    };
    serde_json::from_str(&raw)
        .map_err(|e| tracing::warn!("Ignoring corrupt cached plan status: {}", e))
        .ok()
}
