use serde::{Deserialize, Serialize};
use std::fmt;

/// A metered feature. Adding one means adding a field to [`FeatureCounts`],
/// which every counter shape (policy, guest usage, plan usage) shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Doubts,
    Questions,
    Notes,
    Flashcards,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::Doubts,
        Feature::Questions,
        Feature::Notes,
        Feature::Flashcards,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doubts => "doubts",
            Self::Questions => "questions",
            Self::Notes => "notes",
            Self::Flashcards => "flashcards",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Doubts => "Doubts",
            Self::Questions => "Question sets",
            Self::Notes => "Notes",
            Self::Flashcards => "Flashcards",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "doubts" | "doubt" => Ok(Self::Doubts),
            "questions" | "question" => Ok(Self::Questions),
            "notes" | "note" => Ok(Self::Notes),
            "flashcards" | "flashcard" => Ok(Self::Flashcards),
            other => Err(format!("unknown feature: {}", other)),
        }
    }
}

/// One integer per feature. Used for quotas, confirmed usage and provisional usage alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureCounts {
    #[serde(default)]
    pub doubts: u32,
    #[serde(default)]
    pub questions: u32,
    #[serde(default)]
    pub notes: u32,
    #[serde(default)]
    pub flashcards: u32,
}

impl FeatureCounts {
    pub const fn new(doubts: u32, questions: u32, notes: u32, flashcards: u32) -> Self {
        Self {
            doubts,
            questions,
            notes,
            flashcards,
        }
    }

    pub const fn from_array(values: [u32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn get(&self, feature: Feature) -> u32 {
        match feature {
            Feature::Doubts => self.doubts,
            Feature::Questions => self.questions,
            Feature::Notes => self.notes,
            Feature::Flashcards => self.flashcards,
        }
    }

    pub fn get_mut(&mut self, feature: Feature) -> &mut u32 {
        match feature {
            Feature::Doubts => &mut self.doubts,
            Feature::Questions => &mut self.questions,
            Feature::Notes => &mut self.notes,
            Feature::Flashcards => &mut self.flashcards,
        }
    }

    pub fn increment(&mut self, feature: Feature) {
        let slot = self.get_mut(feature);
        *slot = slot.saturating_add(1);
    }

    pub fn decrement(&mut self, feature: Feature) {
        let slot = self.get_mut(feature);
        *slot = slot.saturating_sub(1);
    }

    pub fn is_zero(&self) -> bool {
        Feature::ALL.iter().all(|f| self.get(*f) == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown difficulty: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteLength {
    Brief,
    Detailed,
    Exam,
}

impl NoteLength {
    pub const ALL: [NoteLength; 3] = [NoteLength::Brief, NoteLength::Detailed, NoteLength::Exam];
}

impl std::str::FromStr for NoteLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brief" => Ok(Self::Brief),
            "detailed" => Ok(Self::Detailed),
            "exam" => Ok(Self::Exam),
            other => Err(format!("unknown note length: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_wire_names() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).unwrap();
            assert_eq!(json, format!("\"{}\"", feature.as_str()));
        }
    }

    #[test]
    fn test_feature_parse_accepts_singular() {
        assert_eq!("note".parse::<Feature>().unwrap(), Feature::Notes);
        assert_eq!("Doubts".parse::<Feature>().unwrap(), Feature::Doubts);
        assert!("essays".parse::<Feature>().is_err());
    }

    #[test]
    fn test_counts_missing_fields_default_to_zero() {
        let counts: FeatureCounts = serde_json::from_str(r#"{"doubts": 2}"#).unwrap();
        assert_eq!(counts.get(Feature::Doubts), 2);
        assert_eq!(counts.get(Feature::Flashcards), 0);
    }

    #[test]
    fn test_decrement_saturates() {
        let mut counts = FeatureCounts::default();
        counts.decrement(Feature::Notes);
        assert_eq!(counts.notes, 0);
        counts.increment(Feature::Notes);
        assert_eq!(counts.notes, 1);
    }
}
