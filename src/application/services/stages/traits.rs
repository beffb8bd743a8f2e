//! Traits stage
//!
//! User-picked advantages, disadvantages and special abilities. Each
//! category's `temporary:pool` credit (banked by the deduplication engine)
//! is drained before build points are touched; disadvantages credit the
//! capped disadvantage budget instead of charging. Cheaper-skill stacks
//! halve the priced skill's cost per stack and are consumed by the
//! purchase. Every pick records its pool drain and build-point impact on
//! the entry itself, making removal an exact inverse.

use serde_json::Value;
use tracing::debug;

use crate::application::services::dedup::DeduplicationEngine;
use crate::application::services::effects::{apply_effect, unapply_effect};
use crate::application::services::merge::match_entry;
use crate::application::services::requirements::requirements_met;
use crate::application::services::stages::{Stage, StageId};
use crate::application::services::state::GenerationState;
use crate::domain::document::{
    add_int, bool_or, ensure_arr, ensure_obj, int_or, obj, JsonMap,
};
use crate::domain::entities::{TraitCategory, TraitEntry};
use crate::domain::value_objects::cost::{cheaper_skill_marginal, round_cost};
use crate::error::EngineError;

const USER_CATEGORIES: [TraitCategory; 4] = [
    TraitCategory::Advantages,
    TraitCategory::Disadvantages,
    TraitCategory::SpecialAbilities,
    TraitCategory::CheaperSpecialAbilities,
];

pub struct TraitsStage;

impl TraitsStage {
    pub fn new() -> Self {
        Self
    }

    /// Unused pool credit for one category.
    pub fn pool_remaining(state: &GenerationState, category: TraitCategory) -> i64 {
        let Some(target) = obj(state.doc.hero(), category.key()) else { return 0 };
        let capacity = int_or(target, "temporary:pool", 0);
        let drained: i64 = target
            .iter()
            .filter(|(key, _)| !key.starts_with("temporary:"))
            .map(|(_, entry)| match entry {
                Value::Object(entry) => int_or(entry, "temporary:pool_drain", 0),
                Value::Array(entries) => entries
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|e| int_or(e, "temporary:pool_drain", 0))
                    .sum(),
                _ => 0,
            })
            .sum();
        capacity - drained
    }

    /// Read views over one category's entries, for listing.
    pub fn list(state: &GenerationState, category: TraitCategory) -> Vec<TraitEntry> {
        let Some(target) = obj(state.doc.hero(), category.key()) else { return Vec::new() };
        let mut entries = Vec::new();
        for (name, value) in target {
            if name.starts_with("temporary:") {
                continue;
            }
            match value {
                Value::Object(entry) => entries.push(TraitEntry::from_actual(name, entry)),
                Value::Array(rows) => entries.extend(
                    rows.iter()
                        .filter_map(Value::as_object)
                        .map(|entry| TraitEntry::from_actual(name, entry)),
                ),
                _ => {}
            }
        }
        entries
    }

    /// Buy a trait. The payload carries level / selection / text.
    pub fn add_trait(
        &self,
        state: &mut GenerationState,
        category: TraitCategory,
        name: &str,
        payload: JsonMap,
    ) -> Result<(), EngineError> {
        let def = state
            .catalogs
            .find_trait(category, name)
            .ok_or_else(|| EngineError::missing("trait", name))?
            .clone();
        if !requirements_met(&state.catalogs, state.doc.hero(), obj(&def, "prerequisites")) {
            return Err(EngineError::invalid(format!("prerequisites for '{name}' are not met")));
        }
        let leveled = bool_or(&def, "leveled", false);
        let has_choice = def.contains_key("selection");
        let has_text = def.contains_key("text");
        let level = if leveled { int_or(&payload, "level", 1).max(1) } else { 1 };

        if category.is_cheaper() {
            return self.add_cheaper(state, name, &def, &payload, has_choice, has_text);
        }
        if self.find_existing(state, category, name, &payload, has_choice, has_text).is_some() {
            return Err(EngineError::invalid(format!("'{name}' is already owned")));
        }

        let base = int_or(&def, "cost", 0)
            + state.rules.cost_adjustment(state.doc.hero(), category, name);
        let mut cost = base * level;

        // Cheaper-skill stacks discount the purchase and are consumed by it.
        let mut discount_times = 0i64;
        if category == TraitCategory::SpecialAbilities {
            if let Some(times) =
                self.take_cheaper_stacks(state, name, &payload, has_choice, has_text)
            {
                discount_times = times;
                cost = round_cost(cost as f64 * 0.5f64.powi(times.min(i32::MAX as i64) as i32));
            }
        }

        let drain = cost.max(0).min(Self::pool_remaining(state, category).max(0));
        let gp = cost - drain;
        if category.is_disadvantages() {
            state.ledger.credit_disadvantage(gp, bool_or(&def, "bad_trait", false));
        } else {
            state.ledger.charge(gp);
        }

        let mut entry = payload;
        entry.insert("temporary:chosen".into(), Value::Bool(true));
        if leveled {
            entry.insert("level".into(), Value::from(level));
        }
        set_or_remove(&mut entry, "temporary:pool_drain", drain);
        set_or_remove(&mut entry, "temporary:gp", gp);
        set_or_remove(&mut entry, "temporary:discount_times", discount_times);

        let target = ensure_obj(state.doc.hero_mut(), category.key());
        if has_choice || has_text {
            ensure_arr(target, name).push(Value::Object(entry.clone()));
        } else {
            target.insert(name.into(), Value::Object(entry.clone()));
        }
        apply_effect(&state.catalogs, state.doc.hero_mut(), &def, &entry);
        debug!(trait_name = name, cost, drain, "trait bought");
        Ok(())
    }

    /// Remove a user-chosen trait, reversing its cost exactly.
    pub fn remove_trait(
        &self,
        state: &mut GenerationState,
        category: TraitCategory,
        name: &str,
        probe: &JsonMap,
    ) -> Result<(), EngineError> {
        let def = state
            .catalogs
            .find_trait(category, name)
            .ok_or_else(|| EngineError::missing("trait", name))?
            .clone();
        let has_choice = def.contains_key("selection");
        let has_text = def.contains_key("text");

        let entry = self
            .find_existing(state, category, name, probe, has_choice, has_text)
            .ok_or_else(|| EngineError::invalid(format!("'{name}' is not owned")))?;
        if TraitEntry::from_actual(name, &entry).fixed {
            return Err(EngineError::invalid(format!("'{name}' was granted and cannot be removed")));
        }

        if category.is_cheaper() {
            return self.remove_cheaper(state, name, &def, &entry, has_choice, has_text);
        }

        let gp = int_or(&entry, "temporary:gp", 0);
        if category.is_disadvantages() {
            state.ledger.credit_disadvantage(-gp, bool_or(&def, "bad_trait", false));
        } else {
            state.ledger.refund(gp);
        }

        let target = ensure_obj(state.doc.hero_mut(), category.key());
        if has_choice || has_text {
            if let Some(entries) = target.get_mut(name).and_then(Value::as_array_mut) {
                if let Some(found) = match_entry(entries, probe, has_choice, has_text) {
                    entries.remove(found);
                }
                if entries.is_empty() {
                    target.remove(name);
                }
            }
        } else {
            target.remove(name);
        }
        unapply_effect(&state.catalogs, state.doc.hero_mut(), &def, &entry);

        // Restore the cheaper stacks the purchase consumed.
        let discount_times = int_or(&entry, "temporary:discount_times", 0);
        if discount_times > 0 {
            let cheaper =
                ensure_obj(state.doc.hero_mut(), TraitCategory::CheaperSpecialAbilities.key());
            if has_choice || has_text {
                let mut restored = JsonMap::new();
                for key in ["selection", "text"] {
                    if let Some(value) = entry.get(key) {
                        restored.insert(key.into(), value.clone());
                    }
                }
                restored.insert("times_cheaper".into(), Value::from(discount_times));
                ensure_arr(cheaper, name).push(Value::Object(restored));
            } else {
                cheaper.insert(
                    name.into(),
                    serde_json::json!({ "times_cheaper": discount_times }),
                );
            }
        }
        Ok(())
    }

    fn add_cheaper(
        &self,
        state: &mut GenerationState,
        name: &str,
        def: &JsonMap,
        payload: &JsonMap,
        has_choice: bool,
        has_text: bool,
    ) -> Result<(), EngineError> {
        let base = int_or(def, "cost", 0);
        let category = TraitCategory::CheaperSpecialAbilities;
        let times = self
            .find_existing(state, category, name, payload, has_choice, has_text)
            .map(|entry| int_or(&entry, "times_cheaper", 0))
            .unwrap_or(0);
        let new_times = (times + 1).max(1) as u32;
        let cost = round_cost(cheaper_skill_marginal(base, new_times));

        let drain = cost.max(0).min(Self::pool_remaining(state, category).max(0));
        state.ledger.charge(cost - drain);

        let target = ensure_obj(state.doc.hero_mut(), category.key());
        if has_choice || has_text {
            let entries = ensure_arr(target, name);
            if let Some(found) = match_entry(entries, payload, has_choice, has_text) {
                if let Some(entry) = entries[found].as_object_mut() {
                    add_int(entry, "times_cheaper", 1);
                    add_int(entry, "temporary:pool_drain", drain);
                    add_int(entry, "temporary:gp", cost - drain);
                    entry.insert("temporary:chosen".into(), Value::Bool(true));
                }
            } else {
                let mut entry = payload.clone();
                entry.insert("times_cheaper".into(), Value::from(1));
                entry.insert("temporary:chosen".into(), Value::Bool(true));
                set_or_remove(&mut entry, "temporary:pool_drain", drain);
                set_or_remove(&mut entry, "temporary:gp", cost - drain);
                entries.push(Value::Object(entry));
            }
        } else if target.contains_key(name) {
            let entry = ensure_obj(target, name);
            add_int(entry, "times_cheaper", 1);
            add_int(entry, "temporary:pool_drain", drain);
            add_int(entry, "temporary:gp", cost - drain);
            entry.insert("temporary:chosen".into(), Value::Bool(true));
        } else {
            let mut entry = payload.clone();
            entry.insert("times_cheaper".into(), Value::from(1));
            entry.insert("temporary:chosen".into(), Value::Bool(true));
            set_or_remove(&mut entry, "temporary:pool_drain", drain);
            set_or_remove(&mut entry, "temporary:gp", cost - drain);
            target.insert(name.into(), Value::Object(entry));
        }
        Ok(())
    }

    fn remove_cheaper(
        &self,
        state: &mut GenerationState,
        name: &str,
        def: &JsonMap,
        entry: &JsonMap,
        has_choice: bool,
        has_text: bool,
    ) -> Result<(), EngineError> {
        let base = int_or(def, "cost", 0);
        let times = int_or(entry, "times_cheaper", 0);
        if times <= 0 {
            return Err(EngineError::invalid(format!("'{name}' has no stacks to remove")));
        }
        let marginal = round_cost(cheaper_skill_marginal(base, times.max(1) as u32));
        let drain = int_or(entry, "temporary:pool_drain", 0).min(marginal).max(0);
        state.ledger.refund(marginal - drain);

        let category = TraitCategory::CheaperSpecialAbilities;
        let target = ensure_obj(state.doc.hero_mut(), category.key());
        if has_choice || has_text {
            if let Some(entries) = target.get_mut(name).and_then(Value::as_array_mut) {
                if let Some(found) = match_entry(entries, entry, has_choice, has_text) {
                    let drop_entry = entries[found]
                        .as_object_mut()
                        .map(|e| {
                            add_int(e, "times_cheaper", -1);
                            add_int(e, "temporary:pool_drain", -drain);
                            add_int(e, "temporary:gp", -(marginal - drain));
                            int_or(e, "times_cheaper", 0) <= 0
                        })
                        .unwrap_or(false);
                    if drop_entry {
                        entries.remove(found);
                    }
                }
                if entries.is_empty() {
                    target.remove(name);
                }
            }
        } else if let Some(owned) = target.get_mut(name).and_then(Value::as_object_mut) {
            add_int(owned, "times_cheaper", -1);
            add_int(owned, "temporary:pool_drain", -drain);
            add_int(owned, "temporary:gp", -(marginal - drain));
            if int_or(owned, "times_cheaper", 0) <= 0 {
                target.remove(name);
            }
        }
        Ok(())
    }

    fn take_cheaper_stacks(
        &self,
        state: &mut GenerationState,
        name: &str,
        probe: &JsonMap,
        has_choice: bool,
        has_text: bool,
    ) -> Option<i64> {
        let category = TraitCategory::CheaperSpecialAbilities;
        let times = self
            .find_existing(state, category, name, probe, has_choice, has_text)
            .map(|entry| int_or(&entry, "times_cheaper", 0))
            .filter(|times| *times > 0)?;
        let target = state
            .doc
            .hero_mut()
            .get_mut(category.key())
            .and_then(Value::as_object_mut)?;
        if has_choice || has_text {
            if let Some(entries) = target.get_mut(name).and_then(Value::as_array_mut) {
                if let Some(found) = match_entry(entries, probe, has_choice, has_text) {
                    entries.remove(found);
                }
                if entries.is_empty() {
                    target.remove(name);
                }
            }
        } else {
            target.remove(name);
        }
        Some(times)
    }

    fn find_existing(
        &self,
        state: &GenerationState,
        category: TraitCategory,
        name: &str,
        probe: &JsonMap,
        has_choice: bool,
        has_text: bool,
    ) -> Option<JsonMap> {
        let target = obj(state.doc.hero(), category.key())?;
        if has_choice || has_text {
            let entries = target.get(name)?.as_array()?;
            let found = match_entry(entries, probe, has_choice, has_text)?;
            entries[found].as_object().cloned()
        } else {
            obj(target, name).cloned()
        }
    }
}

impl Default for TraitsStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for TraitsStage {
    fn id(&self) -> StageId {
        StageId::Traits
    }

    fn activate(&mut self, state: &mut GenerationState) -> Result<(), EngineError> {
        // Reconcile cheaper-skill grants against already-owned skills.
        let dedup = DeduplicationEngine::from_state(state);
        dedup.cleanup_cheaper_skills(state.doc.hero_mut());
        Ok(())
    }

    fn deactivate(
        &mut self,
        state: &mut GenerationState,
        forward: bool,
    ) -> Result<(), EngineError> {
        if forward {
            return Ok(());
        }
        // Retreat removes every user pick, granted entries stay.
        for category in USER_CATEGORIES {
            loop {
                let Some(target) = obj(state.doc.hero(), category.key()) else { break };
                let next = target.iter().find_map(|(name, entry)| {
                    if name.starts_with("temporary:") {
                        return None;
                    }
                    match entry {
                        Value::Object(entry) if bool_or(entry, "temporary:chosen", false) => {
                            Some((name.clone(), entry.clone()))
                        }
                        Value::Array(entries) => entries
                            .iter()
                            .filter_map(Value::as_object)
                            .find(|e| bool_or(e, "temporary:chosen", false))
                            .map(|e| (name.clone(), e.clone())),
                        _ => None,
                    }
                });
                match next {
                    Some((name, entry)) => {
                        self.remove_trait(state, category, &name, &entry)?;
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn can_advance(&self, state: &GenerationState) -> bool {
        let remaining = state.ledger.remaining();
        let bonus_active = state.rkp_section("bonus_profession").is_some();
        let budget_ok = remaining == 0 || (bonus_active && remaining >= 0);
        budget_ok
            && state.ledger.disadvantage_points() <= state.settings.disadvantage_cap
            && state.ledger.bad_trait_points() <= state.settings.bad_trait_cap
            && USER_CATEGORIES
                .iter()
                .all(|category| Self::pool_remaining(state, *category) == 0)
    }
}

fn set_or_remove(entry: &mut JsonMap, key: &str, value: i64) {
    if value == 0 {
        entry.remove(key);
    } else {
        entry.insert(key.into(), Value::from(value));
    }
}
