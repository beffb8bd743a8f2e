//! Rule catalogs
//!
//! Read-only, injected at engine construction. The engine never mutates a
//! catalog; it clones subtrees into the build document. Traits are looked
//! up across the advantage/disadvantage/special-ability catalogs, talents
//! across their group pages.

use crate::domain::document::{bool_or, int_or, obj, JsonMap};
use crate::domain::entities::TraitCategory;

#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    pub races: JsonMap,
    pub cultures: JsonMap,
    pub professions: JsonMap,
    pub advantages: JsonMap,
    pub disadvantages: JsonMap,
    pub special_abilities: JsonMap,
    /// Talent group pages: group name -> { talent name -> definition }.
    pub talents: JsonMap,
    pub spells: JsonMap,
    pub equipment: JsonMap,
    /// Name-generator lists keyed by list name.
    pub names: JsonMap,
}

impl Catalogs {
    /// Definition for a trait of the given category. Cheaper special
    /// abilities share the special-ability catalog.
    pub fn find_trait(&self, category: TraitCategory, name: &str) -> Option<&JsonMap> {
        let source = match category {
            TraitCategory::Advantages => &self.advantages,
            TraitCategory::Disadvantages => &self.disadvantages,
            TraitCategory::SpecialAbilities | TraitCategory::CheaperSpecialAbilities => {
                &self.special_abilities
            }
        };
        obj(source, name)
    }

    /// Search all trait catalogs for a name.
    pub fn find_any_trait(&self, name: &str) -> Option<(TraitCategory, &JsonMap)> {
        if let Some(def) = obj(&self.advantages, name) {
            return Some((TraitCategory::Advantages, def));
        }
        if let Some(def) = obj(&self.disadvantages, name) {
            return Some((TraitCategory::Disadvantages, def));
        }
        obj(&self.special_abilities, name).map(|def| (TraitCategory::SpecialAbilities, def))
    }

    pub fn find_talent(&self, name: &str) -> Option<&JsonMap> {
        self.talents
            .values()
            .filter_map(|group| group.as_object())
            .find_map(|group| obj(group, name))
    }

    pub fn talent_group(&self, name: &str) -> Option<&str> {
        self.talents
            .iter()
            .find(|(_, group)| group.as_object().is_some_and(|g| g.contains_key(name)))
            .map(|(group_name, _)| group_name.as_str())
    }

    pub fn find_spell(&self, name: &str) -> Option<&JsonMap> {
        obj(&self.spells, name)
    }

    /// Learning complexity of a talent; 1 when undeclared.
    pub fn talent_complexity(&self, name: &str) -> i64 {
        self.find_talent(name).map(|def| int_or(def, "complexity", 1)).unwrap_or(1)
    }

    /// Base learning complexity of a spell; 1 when undeclared.
    pub fn spell_complexity(&self, name: &str) -> i64 {
        self.find_spell(name).map(|def| int_or(def, "complexity", 1)).unwrap_or(1)
    }

    /// All language (or script) talents, for wildcard choice expansion.
    pub fn languages(&self, scripts: bool) -> Vec<String> {
        let group = if scripts { "scripts" } else { "languages" };
        obj(&self.talents, group)
            .map(|g| {
                g.iter()
                    .filter(|(_, def)| {
                        def.as_object().is_none_or(|d| !bool_or(d, "native_only", false))
                    })
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalogs() -> Catalogs {
        Catalogs {
            advantages: json!({ "Luck": { "cost": 5 } }).as_object().unwrap().clone(),
            special_abilities: json!({ "Ambidextrous": { "cost": 200 } })
                .as_object()
                .unwrap()
                .clone(),
            talents: json!({
                "melee": { "Swords": { "complexity": 2 } },
                "languages": { "Garethi": {}, "Isdira": {} },
                "scripts": { "Kusliker Zeichen": {} }
            })
            .as_object()
            .unwrap()
            .clone(),
            ..Default::default()
        }
    }

    #[test]
    fn cheaper_abilities_resolve_against_special_abilities() {
        let catalogs = catalogs();
        assert!(catalogs
            .find_trait(TraitCategory::CheaperSpecialAbilities, "Ambidextrous")
            .is_some());
    }

    #[test]
    fn talents_found_across_groups() {
        let catalogs = catalogs();
        assert_eq!(catalogs.talent_group("Swords"), Some("melee"));
        assert_eq!(catalogs.talent_complexity("Swords"), 2);
        assert_eq!(catalogs.talent_complexity("Unknown"), 1);
    }

    #[test]
    fn language_listing_excludes_scripts() {
        let catalogs = catalogs();
        let languages = catalogs.languages(false);
        assert_eq!(languages, vec!["Garethi".to_string(), "Isdira".to_string()]);
        assert_eq!(catalogs.languages(true), vec!["Kusliker Zeichen".to_string()]);
    }
}
