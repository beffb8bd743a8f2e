//! Trait entry view
//!
//! Typed read view over one advantage/disadvantage/special-ability instance
//! stored in a hero category. The document stays the source of truth; the
//! view exists for listing and for the bookkeeping fields the traits stage
//! needs (`additional_levels`, `times_cheaper`).

use crate::domain::document::{bool_or, int_or, string, JsonMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraitCategory {
    Advantages,
    Disadvantages,
    SpecialAbilities,
    CheaperSpecialAbilities,
}

impl TraitCategory {
    pub fn key(self) -> &'static str {
        match self {
            Self::Advantages => "advantages",
            Self::Disadvantages => "disadvantages",
            Self::SpecialAbilities => "special_abilities",
            Self::CheaperSpecialAbilities => "cheaper_special_abilities",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "advantages" => Some(Self::Advantages),
            "disadvantages" => Some(Self::Disadvantages),
            "special_abilities" => Some(Self::SpecialAbilities),
            "cheaper_special_abilities" => Some(Self::CheaperSpecialAbilities),
            _ => None,
        }
    }

    pub fn is_disadvantages(self) -> bool {
        matches!(self, Self::Disadvantages)
    }

    pub fn is_cheaper(self) -> bool {
        matches!(self, Self::CheaperSpecialAbilities)
    }
}

#[derive(Debug, Clone)]
pub struct TraitEntry {
    pub name: String,
    pub level: Option<i64>,
    /// Enumerated sub-selection, when the trait definition offers one.
    pub selection: Option<String>,
    /// Free-text sub-selection.
    pub text: Option<String>,
    /// Granted automatically by a rule source; not removable by the user.
    pub fixed: bool,
    /// Preview entry whose game effects are not applied.
    pub suppress_effects: bool,
    /// Levels folded in from redundant grants; the level may not drop below
    /// `level - additional_levels` without invalidating a grant.
    pub additional_levels: i64,
    /// Redundant cheaper-skill grants folded into this entry.
    pub times_cheaper: i64,
}

impl TraitEntry {
    pub fn from_actual(name: &str, actual: &JsonMap) -> Self {
        Self {
            name: name.to_string(),
            level: actual.get("level").and_then(serde_json::Value::as_i64),
            selection: string(actual, "selection").map(str::to_string),
            text: string(actual, "text").map(str::to_string),
            fixed: !bool_or(actual, "temporary:chosen", false),
            suppress_effects: bool_or(actual, "temporary:suppress_effects", false),
            additional_levels: int_or(actual, "temporary:additional_levels", 0),
            times_cheaper: int_or(actual, "times_cheaper", 0),
        }
    }

    pub fn min_level(&self) -> i64 {
        self.level.unwrap_or(0) - self.additional_levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn min_level_respects_folded_grants() {
        let actual = json!({
            "level": 5,
            "temporary:chosen": true,
            "temporary:additional_levels": 2
        });
        let entry = TraitEntry::from_actual("Fear of Heights", actual.as_object().unwrap());
        assert_eq!(entry.min_level(), 3);
        assert!(!entry.fixed);
    }

    #[test]
    fn granted_entries_are_fixed() {
        let actual = json!({ "selection": "Heights" });
        let entry = TraitEntry::from_actual("Fear of", actual.as_object().unwrap());
        assert!(entry.fixed);
        assert_eq!(entry.selection.as_deref(), Some("Heights"));
    }
}
