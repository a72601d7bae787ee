use crate::constants::plans;
use crate::feature::{Difficulty, Feature, FeatureCounts, NoteLength};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// StudyBuddy subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

impl PlanTier {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Pro => "StudyBuddy Pro",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Pro)
    }
}

/// Daily ceilings plus the parameter constraints of one plan row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub quotas: FeatureCounts,
    pub max_questions_per_set: u32,
    pub difficulties: Vec<Difficulty>,
    pub note_lengths: Vec<NoteLength>,
}

impl PlanLimits {
    pub fn quota(&self, feature: Feature) -> u32 {
        self.quotas.get(feature)
    }

    pub fn allows_difficulty(&self, difficulty: Difficulty) -> bool {
        self.difficulties.contains(&difficulty)
    }

    pub fn allows_note_length(&self, length: NoteLength) -> bool {
        self.note_lengths.contains(&length)
    }

    fn guest() -> Self {
        Self {
            quotas: FeatureCounts::from_array(plans::GUEST_QUOTAS),
            max_questions_per_set: plans::GUEST_MAX_QUESTIONS,
            difficulties: vec![Difficulty::Easy],
            note_lengths: vec![NoteLength::Brief],
        }
    }

    fn free() -> Self {
        Self {
            quotas: FeatureCounts::from_array(plans::FREE_QUOTAS),
            max_questions_per_set: plans::FREE_MAX_QUESTIONS,
            difficulties: vec![Difficulty::Easy, Difficulty::Medium],
            note_lengths: vec![NoteLength::Brief],
        }
    }

    fn pro() -> Self {
        Self {
            quotas: FeatureCounts::from_array(plans::PRO_QUOTAS),
            max_questions_per_set: plans::PRO_MAX_QUESTIONS,
            difficulties: Difficulty::ALL.to_vec(),
            note_lengths: NoteLength::ALL.to_vec(),
        }
    }
}

/// Entitlement table keyed by tier. Pure lookups, no I/O.
#[derive(Debug, Clone)]
pub struct PlanPolicy {
    rows: HashMap<PlanTier, PlanLimits>,
    guest: PlanLimits,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlanPolicy {
    /// The shipped table.
    pub fn standard() -> Self {
        let mut rows = HashMap::new();
        rows.insert(PlanTier::Free, PlanLimits::free());
        rows.insert(PlanTier::Pro, PlanLimits::pro());
        Self {
            rows,
            guest: PlanLimits::guest(),
        }
    }

    /// Add or replace a row.
    pub fn with_row(mut self, tier: PlanTier, limits: PlanLimits) -> Self {
        self.rows.insert(tier, limits);
        self
    }

    pub fn with_guest_fallback(mut self, limits: PlanLimits) -> Self {
        self.guest = limits;
        self
    }

    /// Missing rows resolve to the free row so an unknown tier is never more generous.
    pub fn limits_for(&self, tier: PlanTier) -> &PlanLimits {
        self.rows
            .get(&tier)
            .or_else(|| self.rows.get(&PlanTier::Free))
            .unwrap_or(&self.guest)
    }

    pub fn allowed_difficulties(&self, tier: PlanTier) -> &[Difficulty] {
        &self.limits_for(tier).difficulties
    }

    pub fn allowed_note_lengths(&self, tier: PlanTier) -> &[NoteLength] {
        &self.limits_for(tier).note_lengths
    }

    pub fn max_questions_per_set(&self, tier: PlanTier) -> u32 {
        self.limits_for(tier).max_questions_per_set
    }

    /// Hardcoded guest limits used when the server-issued ones were never fetched.
    pub fn guest_fallback(&self) -> &PlanLimits {
        &self.guest
    }

    pub fn tiers(&self) -> impl Iterator<Item = &PlanTier> {
        self.rows.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_only_allows_brief_notes() {
        let policy = PlanPolicy::standard();
        assert_eq!(policy.allowed_note_lengths(PlanTier::Free), &[NoteLength::Brief]);
        assert_eq!(policy.allowed_note_lengths(PlanTier::Pro).len(), 3);
    }

    #[test]
    fn test_guest_is_stricter_than_free() {
        let policy = PlanPolicy::standard();
        let guest = policy.guest_fallback();
        let free = policy.limits_for(PlanTier::Free);
        for feature in Feature::ALL {
            assert!(guest.quota(feature) <= free.quota(feature));
        }
        assert!(guest.max_questions_per_set <= free.max_questions_per_set);
    }

    #[test]
    fn test_pro_is_most_generous() {
        let policy = PlanPolicy::standard();
        assert_eq!(policy.max_questions_per_set(PlanTier::Pro), 30);
        assert!(policy
            .allowed_difficulties(PlanTier::Pro)
            .contains(&Difficulty::Hard));
        assert!(!policy
            .allowed_difficulties(PlanTier::Free)
            .contains(&Difficulty::Hard));
    }

    #[test]
    fn test_rows_can_be_replaced() {
        let mut custom = PlanPolicy::standard().limits_for(PlanTier::Free).clone();
        custom.quotas.doubts = 42;
        let policy = PlanPolicy::standard().with_row(PlanTier::Free, custom);
        assert_eq!(policy.limits_for(PlanTier::Free).quota(Feature::Doubts), 42);
    }

    #[test]
    fn test_limits_wire_format_is_camel_case() {
        let json = serde_json::to_value(PlanPolicy::standard().guest_fallback()).unwrap();
        assert_eq!(json["maxQuestionsPerSet"], 5);
        assert_eq!(json["noteLengths"][0], "brief");
        assert_eq!(json["quotas"]["doubts"], 3);
    }
}
