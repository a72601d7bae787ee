//! The single decision point consulted before any metered action.
//!
//! Calling convention for screens:
//! 1. `can_proceed` (or `reserve`) before dispatching the generation call.
//! 2. Dispatch.
//! 3. `record_usage` (or `permit.commit()`) only once dispatch succeeded.
//!
//! A user who was approved but whose network call failed is never charged.

use crate::error::{Result, StudyError};
use crate::feature::{Difficulty, Feature, NoteLength};
use crate::guest::GuestUsageStore;
use crate::identity::Identity;
use crate::plan::PlanStateMachine;
use crate::policy::{PlanLimits, PlanPolicy, PlanTier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitErrorKind {
    /// Today's count for the feature is exhausted.
    DailyLimitReached,
    /// A requested parameter is outside what the tier allows.
    FeatureLocked,
}

impl LimitErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DailyLimitReached => "DAILY_LIMIT_REACHED",
            Self::FeatureLocked => "FEATURE_LOCKED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::DailyLimitReached => {
                "You've used today's allowance. Upgrade for more, or come back tomorrow."
            }
            Self::FeatureLocked => "This option isn't included in your plan. Upgrade to unlock it.",
        }
    }
}

/// A metered action and the parameters that sub-limits apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeteredRequest {
    pub feature: Feature,
    pub question_count: Option<u32>,
    pub difficulty: Option<Difficulty>,
    pub note_length: Option<NoteLength>,
}

impl MeteredRequest {
    pub fn new(feature: Feature) -> Self {
        Self {
            feature,
            question_count: None,
            difficulty: None,
            note_length: None,
        }
    }

    pub fn with_question_count(mut self, count: u32) -> Self {
        self.question_count = Some(count);
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_note_length(mut self, length: NoteLength) -> Self {
        self.note_length = Some(length);
        self
    }

    /// Parameters must make sense for the feature. Failures are caller bugs.
    pub fn validate(&self) -> Result<()> {
        let takes_questions = matches!(self.feature, Feature::Questions | Feature::Flashcards);

        if let Some(count) = self.question_count {
            if !takes_questions {
                return Err(StudyError::validation(format!(
                    "question count does not apply to {}",
                    self.feature
                )));
            }
            if count == 0 {
                return Err(StudyError::validation("question count must be at least 1"));
            }
        }
        if self.difficulty.is_some() && !takes_questions {
            return Err(StudyError::validation(format!(
                "difficulty does not apply to {}",
                self.feature
            )));
        }
        if self.note_length.is_some() && self.feature != Feature::Notes {
            return Err(StudyError::validation(format!(
                "note length does not apply to {}",
                self.feature
            )));
        }
        Ok(())
    }

    /// True when any requested parameter exceeds `limits`.
    fn is_locked_by(&self, limits: &PlanLimits) -> bool {
        let count_locked = self
            .question_count
            .map(|n| n > limits.max_questions_per_set)
            .unwrap_or(false);
        let difficulty_locked = self
            .difficulty
            .map(|d| !limits.allows_difficulty(d))
            .unwrap_or(false);
        let length_locked = self
            .note_length
            .map(|l| !limits.allows_note_length(l))
            .unwrap_or(false);
        count_locked || difficulty_locked || length_locked
    }
}

impl From<Feature> for MeteredRequest {
    fn from(feature: Feature) -> Self {
        Self::new(feature)
    }
}

/// The gate's answer. When denied, `reason` is the primary cause (count
/// exhaustion wins) and `violations` lists every failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<LimitErrorKind>,
    pub violations: Vec<LimitErrorKind>,
    pub used: u32,
    pub limit: u32,
    /// `None` for guests.
    pub tier: Option<PlanTier>,
}

impl Decision {
    fn evaluate(used: u32, limit: u32, locked: bool, tier: Option<PlanTier>) -> Self {
        let mut violations = Vec::new();
        if used >= limit {
            violations.push(LimitErrorKind::DailyLimitReached);
        }
        if locked {
            violations.push(LimitErrorKind::FeatureLocked);
        }
        Self {
            allowed: violations.is_empty(),
            reason: violations.first().copied(),
            violations,
            used,
            limit,
            tier,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// Whether the UI should offer an upgrade.
    pub fn suggests_upgrade(&self) -> bool {
        !self.allowed && self.tier != Some(PlanTier::Pro)
    }
}

/// Outcome of [`QuotaGate::reserve`].
#[derive(Debug)]
pub enum Reservation<'a> {
    Granted(UsagePermit<'a>),
    Denied(Decision),
}

/// One unit of quota held for an action being dispatched. Commit on dispatch
/// success; dropping it uncommitted gives the unit back.
#[derive(Debug)]
#[must_use = "dropping a permit releases the reserved quota"]
pub struct UsagePermit<'a> {
    gate: &'a QuotaGate,
    guest: bool,
    feature: Feature,
    settled: bool,
}

impl UsagePermit<'_> {
    pub fn feature(&self) -> Feature {
        self.feature
    }

    pub fn commit(mut self) {
        self.settled = true;
        if self.guest {
            self.gate.guest.commit(self.feature);
        } else {
            self.gate.plan.commit_reservation(self.feature);
        }
    }
}

impl Drop for UsagePermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!("Releasing uncommitted {} reservation", self.feature);
        if self.guest {
            self.gate.guest.release(self.feature);
        } else {
            self.gate.plan.release_reservation(self.feature);
        }
    }
}

pub struct QuotaGate {
    policy: Arc<PlanPolicy>,
    guest: Arc<GuestUsageStore>,
    plan: Arc<PlanStateMachine>,
}

impl std::fmt::Debug for QuotaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGate").finish_non_exhaustive()
    }
}

impl QuotaGate {
    pub fn new(
        policy: Arc<PlanPolicy>,
        guest: Arc<GuestUsageStore>,
        plan: Arc<PlanStateMachine>,
    ) -> Self {
        Self {
            policy,
            guest,
            plan,
        }
    }

    /// May `identity` perform `request` right now?
    pub fn can_proceed(
        &self,
        identity: &Identity,
        request: impl Into<MeteredRequest>,
    ) -> Result<Decision> {
        let request = request.into();
        request.validate()?;

        let decision = match identity {
            Identity::Guest { .. } => {
                let limits = self.guest.limits();
                Decision::evaluate(
                    self.guest.used(request.feature),
                    limits.quota(request.feature),
                    request.is_locked_by(&limits),
                    None,
                )
            }
            Identity::User { .. } => {
                let (tier, limits) = self.user_limits();
                Decision::evaluate(
                    self.plan.used(request.feature),
                    limits.quota(request.feature),
                    request.is_locked_by(&limits),
                    Some(tier),
                )
            }
        };

        if !decision.allowed {
            tracing::debug!(
                "Denied {} for {}: {:?}",
                request.feature,
                identity.label(),
                decision.violations
            );
        }
        Ok(decision)
    }

    /// Count one dispatched action. Call only after dispatch succeeded.
    pub fn record_usage(&self, identity: &Identity, feature: Feature) {
        match identity {
            Identity::Guest { .. } => self.guest.increment(feature),
            Identity::User { .. } => self.plan.increment_usage_optimistic(feature),
        }
    }

    /// Atomic check-and-hold. Prefer this over `can_proceed` + `record_usage`
    /// when repeated taps could race.
    pub fn reserve(
        &self,
        identity: &Identity,
        request: impl Into<MeteredRequest>,
    ) -> Result<Reservation<'_>> {
        let request = request.into();
        let decision = self.can_proceed(identity, request)?;
        if !decision.allowed {
            return Ok(Reservation::Denied(decision));
        }

        let feature = request.feature;
        let held = match identity {
            Identity::Guest { .. } => self.guest.try_reserve(feature),
            Identity::User { .. } => {
                let limit = self.user_limits().1.quota(feature);
                self.plan.try_reserve(feature, limit)
            }
        };

        if held {
            Ok(Reservation::Granted(UsagePermit {
                gate: self,
                guest: identity.is_guest(),
                feature,
                settled: false,
            }))
        } else {
            // Lost the race to a concurrent reservation between the check and the hold.
            Ok(Reservation::Denied(Decision::evaluate(
                decision.limit,
                decision.limit,
                false,
                decision.tier,
            )))
        }
    }

    pub fn remaining(&self, identity: &Identity, feature: Feature) -> u32 {
        match identity {
            Identity::Guest { .. } => self.guest.remaining(feature),
            Identity::User { .. } => {
                let limit = self.user_limits().1.quota(feature);
                limit.saturating_sub(self.plan.used(feature))
            }
        }
    }

    /// Tier and limits row for a signed-in user: the server's row when a
    /// status is cached, else the policy row for the tier (free before the
    /// first fetch). Counts and sub-limits are always judged on the same row.
    pub fn user_limits(&self) -> (PlanTier, PlanLimits) {
        let tier = self.plan.tier().unwrap_or_default();
        let limits = self
            .plan
            .limits()
            .unwrap_or_else(|| self.policy.limits_for(tier).clone());
        (tier, limits)
    }
}
