use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use studybuddy_core::clock::FixedClock;
use studybuddy_core::constants::paths;
use studybuddy_core::*;

/// Entitlement service that replays scripted responses, optionally after a delay.
struct ScriptedEntitlements {
    responses: Arc<Mutex<Vec<std::result::Result<PlanStatus, String>>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedEntitlements {
    /// Responses are served first to last.
    fn new(mut responses: Vec<std::result::Result<PlanStatus, String>>) -> Self {
        responses.reverse();
        Self {
            responses: Arc::new(Mutex::new(responses)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EntitlementService for ScriptedEntitlements {
    async fn plan_status(&self) -> std::result::Result<PlanStatus, StudyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.responses.lock().unwrap().pop();
        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(StudyError::server(message)),
            None => Err(StudyError::server("script exhausted")),
        }
    }

    async fn guest_limits(&self) -> std::result::Result<PlanLimits, StudyError> {
        Ok(PlanPolicy::standard().guest_fallback().clone())
    }
}

fn today() -> DateKey {
    DateKey::from_ymd(2024, 11, 20).unwrap()
}

fn status(
    tier: PlanTier,
    doubts: u32,
    subscription: Option<SubscriptionStatus>,
    reset: DateKey,
) -> PlanStatus {
    PlanStatus {
        tier,
        limits: PlanPolicy::standard().limits_for(tier).clone(),
        usage: PlanUsage {
            counts: FeatureCounts::new(doubts, 0, 0, 0),
            last_reset_date: reset,
        },
        subscription_status: subscription,
        trial_ends_at: None,
        current_period_end: None,
    }
}

fn machine(service: Arc<ScriptedEntitlements>) -> PlanStateMachine {
    PlanStateMachine::new(service, Arc::new(FixedClock::new(today())))
}

#[tokio::test]
async fn test_fetch_replaces_status() {
    let service = Arc::new(ScriptedEntitlements::new(vec![Ok(status(
        PlanTier::Pro,
        3,
        Some(SubscriptionStatus::Active),
        today(),
    ))]));
    let plan = machine(service);

    assert!(!plan.has_status());
    assert_eq!(plan.fetch_status().await.unwrap(), FetchOutcome::Updated);
    assert_eq!(plan.tier(), Some(PlanTier::Pro));
    assert_eq!(plan.subscription_status(), Some(SubscriptionStatus::Active));
    assert_eq!(plan.usage_view(Feature::Doubts).confirmed, 3);
    assert!(plan.last_synced_at().is_some());
    assert!(!plan.is_loading());
}

#[tokio::test]
async fn test_failed_fetch_keeps_cached_status() {
    let cached = status(PlanTier::Pro, 1, Some(SubscriptionStatus::Active), today());
    let service = Arc::new(ScriptedEntitlements::new(vec![
        Ok(cached.clone()),
        Err("503 Service Unavailable".to_string()),
    ]));
    let plan = machine(service);

    plan.fetch_status().await.unwrap();
    plan.increment_usage_optimistic(Feature::Doubts);

    let err = plan.fetch_status().await.unwrap_err();
    assert_eq!(err.code(), "SERVER_ERROR");
    assert_eq!(plan.snapshot(), Some(cached));
    assert!(plan.last_error().unwrap().contains("503"));
    // Provisional counts survive a failed fetch; only a successful one overwrites them.
    assert_eq!(plan.usage_view(Feature::Doubts).provisional, 1);
}

#[tokio::test]
async fn test_successful_fetch_clears_last_error() {
    let service = Arc::new(ScriptedEntitlements::new(vec![
        Err("boom".to_string()),
        Ok(status(PlanTier::Free, 0, None, today())),
    ]));
    let plan = machine(service);

    assert!(plan.fetch_status().await.is_err());
    assert!(plan.last_error().is_some());
    plan.fetch_status().await.unwrap();
    assert!(plan.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_coalesce() {
    let service = Arc::new(
        ScriptedEntitlements::new(vec![
            Ok(status(PlanTier::Free, 0, None, today())),
            Ok(status(PlanTier::Pro, 0, Some(SubscriptionStatus::Active), today())),
        ])
        .with_delay(Duration::from_millis(200)),
    );
    let plan = machine(service.clone());

    let (first, second) = tokio::join!(plan.fetch_status(), plan.fetch_status());

    assert_eq!(first.unwrap(), FetchOutcome::Updated);
    assert_eq!(second.unwrap(), FetchOutcome::Coalesced);
    assert_eq!(service.calls(), 1);
    assert_eq!(plan.tier(), Some(PlanTier::Free));
}

#[tokio::test(start_paused = true)]
async fn test_clear_during_fetch_drops_response() {
    let service = Arc::new(
        ScriptedEntitlements::new(vec![Ok(status(PlanTier::Pro, 0, None, today()))])
            .with_delay(Duration::from_millis(200)),
    );
    let plan = Arc::new(machine(service));

    let fetching = {
        let plan = plan.clone();
        tokio::spawn(async move { plan.fetch_status().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    plan.clear();

    assert_eq!(fetching.await.unwrap().unwrap(), FetchOutcome::Superseded);
    assert!(!plan.has_status());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_is_server_error() {
    let service = Arc::new(
        ScriptedEntitlements::new(vec![Ok(status(PlanTier::Pro, 0, None, today()))])
            .with_delay(Duration::from_secs(30)),
    );
    let plan = machine(service).with_timeout(Duration::from_secs(5));

    let err = plan.fetch_status().await.unwrap_err();
    assert!(matches!(err, StudyError::Server(_)));
    assert!(!plan.has_status());
    assert!(!plan.is_loading());
}

#[tokio::test]
async fn test_stale_server_day_is_zeroed_for_display() {
    let yesterday = today().pred();
    let service = Arc::new(ScriptedEntitlements::new(vec![Ok(status(
        PlanTier::Free,
        5,
        None,
        yesterday,
    ))]));
    let plan = machine(service);

    plan.fetch_status().await.unwrap();
    let snapshot = plan.snapshot().unwrap();
    assert_eq!(snapshot.usage.last_reset_date, today());
    assert_eq!(snapshot.usage.get(Feature::Doubts), 0);
}

#[tokio::test]
async fn test_expiry_is_never_inferred_locally() {
    let mut lapsed = status(PlanTier::Pro, 0, Some(SubscriptionStatus::Active), today());
    lapsed.current_period_end = Some(chrono::Utc::now() - chrono::Duration::days(3));
    let service = Arc::new(ScriptedEntitlements::new(vec![
        Ok(lapsed),
        Ok(status(PlanTier::Free, 0, Some(SubscriptionStatus::Expired), today())),
    ]));
    let plan = machine(service);

    plan.fetch_status().await.unwrap();
    assert_eq!(plan.subscription_status(), Some(SubscriptionStatus::Active));
    assert!(plan.snapshot().unwrap().looks_lapsed(chrono::Utc::now()));
    assert!(plan.ensure_cancellable().is_ok());

    plan.fetch_status().await.unwrap();
    assert_eq!(plan.subscription_status(), Some(SubscriptionStatus::Expired));
    assert!(plan.ensure_cancellable().is_err());
}

#[tokio::test]
async fn test_cancel_only_valid_from_trial_or_active() {
    let service = Arc::new(ScriptedEntitlements::new(vec![
        Ok(status(PlanTier::Pro, 0, Some(SubscriptionStatus::Trial), today())),
        Ok(status(PlanTier::Pro, 0, Some(SubscriptionStatus::Cancelled), today())),
        Ok(status(PlanTier::Free, 0, None, today())),
    ]));
    let plan = machine(service);

    assert!(plan.ensure_cancellable().is_err());

    plan.fetch_status().await.unwrap();
    assert!(plan.ensure_cancellable().is_ok());

    plan.fetch_status().await.unwrap();
    let err = plan.ensure_cancellable().unwrap_err();
    assert!(matches!(err, StudyError::InvalidTransition(_)));

    plan.fetch_status().await.unwrap();
    assert!(plan.ensure_cancellable().is_err());
}

#[tokio::test]
async fn test_optimistic_increment_adds_exactly_one() {
    let service = Arc::new(ScriptedEntitlements::new(vec![Ok(status(
        PlanTier::Free,
        2,
        None,
        today(),
    ))]));
    let plan = machine(service);
    plan.fetch_status().await.unwrap();

    for feature in Feature::ALL {
        let before = plan.used(feature);
        plan.increment_usage_optimistic(feature);
        assert_eq!(plan.used(feature), before + 1);
    }
    assert_eq!(plan.usage_view(Feature::Doubts).total(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_waits_for_in_flight_fetch() {
    let service = Arc::new(
        ScriptedEntitlements::new(vec![
            Ok(status(PlanTier::Free, 0, Some(SubscriptionStatus::Trial), today())),
            Ok(status(PlanTier::Pro, 0, Some(SubscriptionStatus::Active), today())),
        ])
        .with_delay(Duration::from_millis(200)),
    );
    let plan = machine(service.clone());

    let token = CancelToken::never();
    let (first, refreshed) = tokio::join!(plan.fetch_status(), plan.refresh_status_with(&token));

    assert_eq!(first.unwrap(), FetchOutcome::Updated);
    assert_eq!(refreshed.unwrap(), FetchOutcome::Updated);
    assert_eq!(service.calls(), 2);
    assert_eq!(plan.subscription_status(), Some(SubscriptionStatus::Active));
}

// ========================================================================
// Device cache
// ========================================================================

fn cached_machine(
    service: Arc<ScriptedEntitlements>,
    storage: Arc<MemoryStore>,
    day: DateKey,
) -> PlanStateMachine {
    PlanStateMachine::new(service, Arc::new(FixedClock::new(day))).with_storage(storage)
}

#[tokio::test]
async fn test_status_and_provisional_counts_survive_restart() {
    let storage = Arc::new(MemoryStore::new());
    let cached = status(PlanTier::Free, 4, None, today());
    {
        let service = Arc::new(ScriptedEntitlements::new(vec![Ok(cached.clone())]));
        let plan = cached_machine(service, storage.clone(), today());
        plan.fetch_status().await.unwrap();
        plan.increment_usage_optimistic(Feature::Doubts);
    }

    let offline = Arc::new(ScriptedEntitlements::new(vec![Err("offline".to_string())]));
    let plan = cached_machine(offline, storage, today());
    assert_eq!(plan.snapshot(), Some(cached.clone()));
    assert!(plan.last_synced_at().is_some());
    assert_eq!(plan.usage_view(Feature::Doubts).provisional, 1);

    assert!(plan.fetch_status().await.is_err());
    assert_eq!(plan.snapshot(), Some(cached));
    assert_eq!(plan.used(Feature::Doubts), 5);
}

#[tokio::test]
async fn test_cache_from_earlier_day_restores_zeroed_usage() {
    let storage = Arc::new(MemoryStore::new());
    {
        let service = Arc::new(ScriptedEntitlements::new(vec![Ok(status(
            PlanTier::Pro,
            9,
            Some(SubscriptionStatus::Active),
            today(),
        ))]));
        let plan = cached_machine(service, storage.clone(), today());
        plan.fetch_status().await.unwrap();
        plan.increment_usage_optimistic(Feature::Notes);
    }

    let offline = Arc::new(ScriptedEntitlements::new(vec![]));
    let plan = cached_machine(offline, storage, today().succ());
    assert_eq!(plan.tier(), Some(PlanTier::Pro));
    assert_eq!(plan.used(Feature::Doubts), 0);
    assert_eq!(plan.usage_view(Feature::Notes).provisional, 0);
}

#[tokio::test]
async fn test_clear_removes_cached_status() {
    let storage = Arc::new(MemoryStore::new());
    let service = Arc::new(ScriptedEntitlements::new(vec![Ok(status(
        PlanTier::Free,
        1,
        None,
        today(),
    ))]));
    let plan = cached_machine(service, storage.clone(), today());
    plan.fetch_status().await.unwrap();
    assert!(storage.get(paths::PLAN_STATUS_KEY).unwrap().is_some());

    plan.clear();
    assert!(storage.get(paths::PLAN_STATUS_KEY).unwrap().is_none());

    let offline = Arc::new(ScriptedEntitlements::new(vec![]));
    assert!(!cached_machine(offline, storage, today()).has_status());
}

#[test]
fn test_corrupt_cache_is_ignored() {
    let storage = Arc::new(MemoryStore::new());
    storage.set(paths::PLAN_STATUS_KEY, "{not json").unwrap();

    let offline = Arc::new(ScriptedEntitlements::new(vec![]));
    assert!(!cached_machine(offline, storage, today()).has_status());
}
