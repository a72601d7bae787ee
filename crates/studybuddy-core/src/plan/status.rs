use crate::clock::DateKey;
use crate::error::StudyError;
use crate::feature::{Feature, FeatureCounts};
use crate::policy::{PlanLimits, PlanTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a paid subscription. Only meaningful for signed-in users on a paid tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    /// No automatic transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// The states from which a user may cancel.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Trial | Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a subscription status change against the lifecycle graph.
///
/// | From      | To        | Trigger                              |
/// |-----------|-----------|--------------------------------------|
/// | (none)    | Trial     | subscription created                 |
/// | Trial     | Active    | payment verified                     |
/// | Trial     | Cancelled | user cancel                          |
/// | Active    | Cancelled | user cancel                          |
/// | Trial     | Expired   | server-detected lapse                |
/// | Active    | Expired   | server-detected lapse                |
/// | Cancelled | *any*     | never                                |
/// | Expired   | *any*     | never                                |
/// | *any*     | same      | idempotent                           |
pub fn validate_transition(
    from: Option<SubscriptionStatus>,
    to: Option<SubscriptionStatus>,
) -> Result<(), StudyError> {
    use SubscriptionStatus::*;

    if from == to {
        return Ok(());
    }

    let valid = match (from, to) {
        (None, Some(Trial)) => true,
        (Some(Trial), Some(Active | Cancelled | Expired)) => true,
        (Some(Active), Some(Cancelled | Expired)) => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StudyError::InvalidTransition(format!(
            "{} -> {}",
            describe(from),
            describe(to)
        )))
    }
}

fn describe(status: Option<SubscriptionStatus>) -> &'static str {
    status.map(|s| s.as_str()).unwrap_or("none")
}

/// Per-feature counts for the current day plus the day they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanUsage {
    #[serde(flatten)]
    pub counts: FeatureCounts,
    pub last_reset_date: DateKey,
}

impl PlanUsage {
    pub fn empty(day: DateKey) -> Self {
        Self {
            counts: FeatureCounts::default(),
            last_reset_date: day,
        }
    }

    pub fn get(&self, feature: Feature) -> u32 {
        self.counts.get(feature)
    }
}

/// What the entitlement service reports for a signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    pub tier: PlanTier,
    pub limits: PlanLimits,
    pub usage: PlanUsage,
    #[serde(default)]
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

impl PlanStatus {
    /// A period end in the past while the server still says trial/active.
    /// Display hint only; the status itself only changes when the server says so.
    pub fn looks_lapsed(&self, now: DateTime<Utc>) -> bool {
        let end = match self.subscription_status {
            Some(SubscriptionStatus::Trial) => self.trial_ends_at.or(self.current_period_end),
            Some(SubscriptionStatus::Active) => self.current_period_end,
            _ => None,
        };
        end.map(|end| end < now).unwrap_or(false)
    }
}

/// Confirmed (server-reported) and provisional (optimistic, local) usage of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageView {
    pub confirmed: u32,
    pub provisional: u32,
}

impl UsageView {
    pub fn total(&self) -> u32 {
        self.confirmed.saturating_add(self.provisional)
    }
}
