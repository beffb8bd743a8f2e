//! Trait deduplication engine
//!
//! Race, culture, profession and the bonus track frequently grant the same
//! trait. Instead of stacking naively, grants merge: leveled traits sum
//! their levels into one entry, choice traits match on their sub-selection,
//! and flat duplicates bank their cost in the owning category's pool
//! counter for the traits stage to reconcile. Runs on RKP commit and on
//! traits-stage entry; individual grant/revoke pairs are also used by the
//! choice resolver.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::application::catalog::Catalogs;
use crate::application::services::effects::{apply_effect, unapply_effect};
use crate::application::services::merge::match_entry;
use crate::application::services::special_rules::{
    GrantContext, GrantDecision, SpecialRuleRegistry,
};
use crate::application::services::state::{GenerationState, RKP_SECTIONS};
use crate::domain::document::{
    add_int, arr, bool_or, ensure_arr, ensure_obj, int_or, obj, string, JsonMap,
};
use crate::domain::entities::TraitCategory;
use crate::domain::CostLedger;
use crate::error::EngineError;

/// Hero categories owned and rebuilt by a collection run.
const COLLECTED_CATEGORIES: [TraitCategory; 4] = [
    TraitCategory::Advantages,
    TraitCategory::Disadvantages,
    TraitCategory::SpecialAbilities,
    TraitCategory::CheaperSpecialAbilities,
];

/// Base values the bonus track grants at half strength.
const HALVED_BASE_VALUES: [&str; 4] =
    ["life_energy", "endurance", "initiative", "magic_resistance"];

/// How one grant landed, recorded so it can be reversed exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// A new entry was created and its effects applied.
    Created,
    /// Levels were folded into an existing entry.
    MergedLevels(i64),
    /// A matching cheaper-skill entry had its repeat counter raised.
    Cheapened,
    /// A flat duplicate banked its cost in the category pool.
    Pooled(i64),
    /// A special rule absorbed the grant, refunding build points.
    Absorbed(i64),
}

impl GrantOutcome {
    pub fn to_value(&self) -> Value {
        let (kind, amount) = match self {
            Self::Created => ("created", 0),
            Self::MergedLevels(n) => ("merged_levels", *n),
            Self::Cheapened => ("cheapened", 0),
            Self::Pooled(n) => ("pooled", *n),
            Self::Absorbed(n) => ("absorbed", *n),
        };
        serde_json::json!({ "kind": kind, "amount": amount })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let amount = int_or(map, "amount", 0);
        match string(map, "kind")? {
            "created" => Some(Self::Created),
            "merged_levels" => Some(Self::MergedLevels(amount)),
            "cheapened" => Some(Self::Cheapened),
            "pooled" => Some(Self::Pooled(amount)),
            "absorbed" => Some(Self::Absorbed(amount)),
            _ => None,
        }
    }
}

pub struct DeduplicationEngine {
    catalogs: Arc<Catalogs>,
    rules: Arc<SpecialRuleRegistry>,
}

impl DeduplicationEngine {
    pub fn new(catalogs: Arc<Catalogs>, rules: Arc<SpecialRuleRegistry>) -> Self {
        Self { catalogs, rules }
    }

    pub fn from_state(state: &GenerationState) -> Self {
        Self::new(state.catalogs.clone(), state.rules.clone())
    }

    /// Rebuild every collected hero category from the merged rule records.
    ///
    /// Skips the run entirely when the merged records are unchanged since
    /// the last collection, so recommitting an untouched RKP stage leaves
    /// the document byte-identical.
    pub fn collect_all(&self, state: &mut GenerationState) -> Result<(), EngineError> {
        let sources = self.sources(state);
        let fingerprint = Value::Array(
            sources.iter().map(|s| Value::Object(s.record.clone())).collect(),
        );
        if state.doc.scratch().get("temporary:collected_state") == Some(&fingerprint) {
            debug!("rule sources unchanged, skipping collection");
            return Ok(());
        }

        let GenerationState { doc, ledger, .. } = state;

        // Retract what the previous run refunded, then start clean.
        let old_refund = int_or(doc.scratch(), "temporary:collection_refund", 0);
        ledger.charge(old_refund);
        Self::clear_collected(doc.hero_mut());
        clear_applied_markers(doc.scratch_mut());

        let mut refunded = 0i64;
        {
            let hero = doc.hero_mut();
            self.collect_base_values(hero, &sources);
            self.collect_traits(hero, ledger, &mut refunded, &sources)?;
            self.collect_talents(hero, &sources)?;
            self.collect_spells(hero, &sources);
            self.collect_equipment(hero, &sources);
        }

        let scratch = doc.scratch_mut();
        scratch.insert("temporary:collection_refund".into(), Value::from(refunded));
        scratch.insert("temporary:collected_state".into(), fingerprint);
        debug!(refunded, "trait collection complete");
        Ok(())
    }

    fn sources(&self, state: &GenerationState) -> Vec<SourceRecord> {
        RKP_SECTIONS
            .iter()
            .filter_map(|section| {
                state.rkp_section(section).map(|record| SourceRecord {
                    record: record.clone(),
                    is_bonus: *section == "bonus_profession",
                })
            })
            .collect()
    }

    fn clear_collected(hero: &mut JsonMap) {
        for category in COLLECTED_CATEGORIES {
            hero.remove(category.key());
        }
        hero.remove("talents");
        hero.remove("spells");
        hero.remove("possessions");
        if let Some(base_values) = hero.get_mut("base_values").and_then(Value::as_object_mut) {
            for entry in base_values.values_mut().filter_map(Value::as_object_mut) {
                entry.remove("modifier");
            }
            base_values.retain(|_, entry| {
                entry.as_object().is_none_or(|e| !e.is_empty())
            });
        }
        // Granted-effect attribute modifiers belong to the collection run;
        // bought values and the tracked rule share survive it.
        if let Some(attributes) = hero.get_mut("attributes").and_then(Value::as_object_mut) {
            for entry in attributes.values_mut().filter_map(Value::as_object_mut) {
                let rule_share = int_or(entry, "temporary:rkp_modifier", 0);
                if rule_share == 0 {
                    entry.remove("modifier");
                } else {
                    entry.insert("modifier".into(), Value::from(rule_share));
                }
            }
            attributes.retain(|_, entry| {
                entry.as_object().is_none_or(|e| !e.is_empty())
            });
        }
    }

    fn collect_base_values(&self, hero: &mut JsonMap, sources: &[SourceRecord]) {
        for source in sources {
            let Some(changes) = obj(&source.record, "base_value_changes") else { continue };
            let changes = changes.clone();
            let base_values = ensure_obj(hero, "base_values");
            for (name, delta) in &changes {
                let Some(delta) = delta.as_i64() else { continue };
                let entry = ensure_obj(base_values, name);
                if source.is_bonus {
                    if HALVED_BASE_VALUES.contains(&name.as_str()) {
                        add_int(entry, "modifier", (delta + 1) / 2);
                    } else if name == "social_status" {
                        let current = int_or(entry, "modifier", 0);
                        if delta > current {
                            entry.insert("modifier".into(), Value::from(delta));
                        }
                    } else {
                        add_int(entry, "modifier", delta);
                    }
                } else {
                    add_int(entry, "modifier", delta);
                }
            }
        }
    }

    fn collect_traits(
        &self,
        hero: &mut JsonMap,
        ledger: &mut CostLedger,
        refunded: &mut i64,
        sources: &[SourceRecord],
    ) -> Result<(), EngineError> {
        // Base profession grants, for the bonus track's only-new filter.
        let base_abilities: Vec<String> = sources
            .iter()
            .filter(|s| !s.is_bonus)
            .filter_map(|s| obj(&s.record, "special_abilities"))
            .flat_map(|abilities| abilities.keys().cloned())
            .collect();

        for source in sources {
            for category in COLLECTED_CATEGORIES {
                let (read_key, target) = if source.is_bonus
                    && category == TraitCategory::SpecialAbilities
                {
                    // Bonus-track abilities arrive cheapened, not granted.
                    ("special_abilities", TraitCategory::CheaperSpecialAbilities)
                } else {
                    (category.key(), category)
                };
                if source.is_bonus && category == TraitCategory::CheaperSpecialAbilities {
                    continue;
                }
                let Some(granted) = obj(&source.record, read_key) else { continue };
                let granted = granted.clone();
                for (name, payload) in &granted {
                    if name == "choice" || name.starts_with("temporary:") {
                        continue;
                    }
                    if source.is_bonus
                        && target == TraitCategory::CheaperSpecialAbilities
                        && base_abilities.contains(name)
                    {
                        continue;
                    }
                    for payload in payload_instances(payload) {
                        self.grant(hero, ledger, refunded, target, name, &payload)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge one grant into the hero record.
    pub fn grant(
        &self,
        hero: &mut JsonMap,
        ledger: &mut CostLedger,
        refunded: &mut i64,
        category: TraitCategory,
        name: &str,
        payload: &JsonMap,
    ) -> Result<GrantOutcome, EngineError> {
        let def = self
            .catalogs
            .find_trait(category, name)
            .ok_or_else(|| EngineError::missing("trait", name))?
            .clone();

        let before = *refunded;
        let decision = self.rules.on_grant(
            &mut GrantContext {
                catalogs: &self.catalogs,
                hero: &mut *hero,
                ledger: &mut *ledger,
                refunded: &mut *refunded,
            },
            category,
            name,
        );
        if decision == GrantDecision::Skip {
            return Ok(GrantOutcome::Absorbed(*refunded - before));
        }

        let leveled = bool_or(&def, "leveled", false);
        let has_choice = def.contains_key("selection");
        let has_text = def.contains_key("text");
        let cost = grant_cost(&def, payload, leveled);
        let target = ensure_obj(hero, category.key());

        if has_choice || has_text {
            let entries = ensure_arr(target, name);
            if let Some(found) = match_entry(entries, payload, has_choice, has_text) {
                let Some(entry) = entries[found].as_object_mut() else {
                    return Err(EngineError::malformed(name, "non-object choice entry"));
                };
                if category.is_cheaper() {
                    add_int(entry, "times_cheaper", int_or(payload, "times_cheaper", 1));
                    return Ok(GrantOutcome::Cheapened);
                }
                if leveled {
                    let granted = int_or(payload, "level", 1);
                    let entry = entry.clone();
                    unapply_effect(&self.catalogs, hero, &def, &entry);
                    let target = ensure_obj(hero, category.key());
                    let entries = ensure_arr(target, name);
                    if let Some(entry) = entries[found].as_object_mut() {
                        add_int(entry, "level", granted);
                        add_int(entry, "temporary:additional_levels", granted);
                        let entry = entry.clone();
                        apply_effect(&self.catalogs, hero, &def, &entry);
                    }
                    return Ok(GrantOutcome::MergedLevels(granted));
                }
                entry.insert("pooled".into(), Value::Bool(true));
                add_int(target, "temporary:pool", cost);
                return Ok(GrantOutcome::Pooled(cost));
            }
            let mut entry = payload.clone();
            if leveled && !entry.contains_key("level") {
                entry.insert("level".into(), Value::from(1));
            }
            if category.is_cheaper() && !entry.contains_key("times_cheaper") {
                entry.insert("times_cheaper".into(), Value::from(1));
            }
            entries.push(Value::Object(entry.clone()));
            if !category.is_cheaper() {
                apply_effect(&self.catalogs, hero, &def, &entry);
            }
            return Ok(GrantOutcome::Created);
        }

        if target.contains_key(name) {
            if category.is_cheaper() {
                let entry = ensure_obj(target, name);
                add_int(entry, "times_cheaper", int_or(payload, "times_cheaper", 1));
                return Ok(GrantOutcome::Cheapened);
            }
            if leveled {
                let granted = int_or(payload, "level", 1);
                let old = ensure_obj(target, name).clone();
                unapply_effect(&self.catalogs, hero, &def, &old);
                let target = ensure_obj(hero, category.key());
                let entry = ensure_obj(target, name);
                add_int(entry, "level", granted);
                add_int(entry, "temporary:additional_levels", granted);
                let entry = entry.clone();
                apply_effect(&self.catalogs, hero, &def, &entry);
                return Ok(GrantOutcome::MergedLevels(granted));
            }
            add_int(target, "temporary:pool", cost);
            return Ok(GrantOutcome::Pooled(cost));
        }

        let mut entry = payload.clone();
        if leveled && !entry.contains_key("level") {
            entry.insert("level".into(), Value::from(1));
        }
        if category.is_cheaper() && !entry.contains_key("times_cheaper") {
            entry.insert("times_cheaper".into(), Value::from(1));
        }
        target.insert(name.into(), Value::Object(entry.clone()));
        if !category.is_cheaper() {
            apply_effect(&self.catalogs, hero, &def, &entry);
        }
        Ok(GrantOutcome::Created)
    }

    /// Exact inverse of [`Self::grant`] for the same payload and outcome.
    pub fn revoke(
        &self,
        hero: &mut JsonMap,
        ledger: &mut CostLedger,
        category: TraitCategory,
        name: &str,
        payload: &JsonMap,
        outcome: &GrantOutcome,
    ) -> Result<(), EngineError> {
        let def = self
            .catalogs
            .find_trait(category, name)
            .ok_or_else(|| EngineError::missing("trait", name))?
            .clone();
        let leveled = bool_or(&def, "leveled", false);
        let has_choice = def.contains_key("selection");
        let has_text = def.contains_key("text");

        match outcome {
            GrantOutcome::Created => {
                let target = ensure_obj(hero, category.key());
                let removed = if has_choice || has_text {
                    let entries = ensure_arr(target, name);
                    if let Some(found) = match_entry(entries, payload, has_choice, has_text) {
                        let removed = entries.remove(found);
                        let emptied = entries.is_empty();
                        if emptied {
                            target.remove(name);
                        }
                        removed.as_object().cloned()
                    } else {
                        None
                    }
                } else {
                    target.remove(name).and_then(|v| v.as_object().cloned())
                };
                if let Some(removed) = removed {
                    if !category.is_cheaper() {
                        unapply_effect(&self.catalogs, hero, &def, &removed);
                    }
                } else {
                    warn!(trait_name = name, "revoke found no entry to remove");
                }
            }
            GrantOutcome::MergedLevels(granted) => {
                let target = ensure_obj(hero, category.key());
                let entry = if has_choice || has_text {
                    let entries = ensure_arr(target, name);
                    match_entry(entries, payload, has_choice, has_text)
                        .and_then(|found| entries[found].as_object().cloned())
                } else {
                    obj(target, name).cloned()
                };
                if let Some(old) = entry {
                    unapply_effect(&self.catalogs, hero, &def, &old);
                    let target = ensure_obj(hero, category.key());
                    let mut reduced = None;
                    if has_choice || has_text {
                        let entries = ensure_arr(target, name);
                        if let Some(found) = match_entry(entries, payload, has_choice, has_text) {
                            if let Some(entry) = entries[found].as_object_mut() {
                                add_int(entry, "level", -granted);
                                add_int(entry, "temporary:additional_levels", -granted);
                                reduced = Some(entry.clone());
                            }
                        }
                    } else if let Some(entry) = target.get_mut(name).and_then(Value::as_object_mut)
                    {
                        add_int(entry, "level", -granted);
                        add_int(entry, "temporary:additional_levels", -granted);
                        reduced = Some(entry.clone());
                    }
                    if let Some(entry) = reduced {
                        apply_effect(&self.catalogs, hero, &def, &entry);
                    }
                }
            }
            GrantOutcome::Cheapened => {
                let target = ensure_obj(hero, category.key());
                if has_choice || has_text {
                    let entries = ensure_arr(target, name);
                    if let Some(found) = match_entry(entries, payload, has_choice, has_text) {
                        if let Some(entry) = entries[found].as_object_mut() {
                            add_int(entry, "times_cheaper", -1);
                        }
                    }
                } else if let Some(entry) = target.get_mut(name).and_then(Value::as_object_mut) {
                    add_int(entry, "times_cheaper", -1);
                }
            }
            GrantOutcome::Pooled(cost) => {
                let target = ensure_obj(hero, category.key());
                add_int(target, "temporary:pool", -cost);
                if has_choice || has_text {
                    let entries = ensure_arr(target, name);
                    if let Some(found) = match_entry(entries, payload, has_choice, has_text) {
                        if let Some(entry) = entries[found].as_object_mut() {
                            entry.remove("pooled");
                        }
                    }
                }
            }
            GrantOutcome::Absorbed(refund) => {
                ledger.charge(*refund);
            }
        }
        Ok(())
    }

    fn collect_talents(
        &self,
        hero: &mut JsonMap,
        sources: &[SourceRecord],
    ) -> Result<(), EngineError> {
        for source in sources {
            for key in ["talents", "languages"] {
                let Some(granted) = obj(&source.record, key) else { continue };
                let granted = granted.clone();
                for (name, delta) in &granted {
                    if name == "choice" || name.starts_with("temporary:") {
                        continue;
                    }
                    match delta {
                        Value::Number(n) => {
                            let Some(delta) = n.as_i64() else { continue };
                            self.grant_talent_value(hero, name, delta)?;
                        }
                        Value::Array(instances) => {
                            // Selection-bearing talents keep one entry per
                            // sub-selection.
                            let group = self
                                .catalogs
                                .talent_group(name)
                                .ok_or_else(|| EngineError::missing("talent", name))?
                                .to_string();
                            let page = ensure_obj(ensure_obj(hero, "talents"), &group);
                            let entries = ensure_arr(page, name);
                            entries.extend(instances.iter().cloned());
                        }
                        _ => {}
                    }
                }
            }
            if let Some(primary) = source.record.get("primary_talents") {
                let names: Vec<String> = match primary {
                    Value::Array(names) => {
                        names.iter().filter_map(Value::as_str).map(str::to_string).collect()
                    }
                    Value::Object(map) => map.keys().cloned().collect(),
                    _ => Vec::new(),
                };
                for name in names {
                    self.grant_talent_value(hero, &name, 0)?;
                    self.mark_primary(hero, "talents", &name)?;
                }
            }
        }
        Ok(())
    }

    fn grant_talent_value(
        &self,
        hero: &mut JsonMap,
        name: &str,
        delta: i64,
    ) -> Result<(), EngineError> {
        let group = self
            .catalogs
            .talent_group(name)
            .ok_or_else(|| EngineError::missing("talent", name))?
            .to_string();
        let page = ensure_obj(ensure_obj(hero, "talents"), &group);
        let entry = ensure_obj(page, name);
        add_int(entry, "value", delta);
        Ok(())
    }

    fn mark_primary(
        &self,
        hero: &mut JsonMap,
        kind: &str,
        name: &str,
    ) -> Result<(), EngineError> {
        let entry = if kind == "spells" {
            ensure_obj(ensure_obj(hero, "spells"), name)
        } else {
            let group = self
                .catalogs
                .talent_group(name)
                .ok_or_else(|| EngineError::missing("talent", name))?
                .to_string();
            ensure_obj(ensure_obj(ensure_obj(hero, "talents"), &group), name)
        };
        entry.insert("primary".into(), Value::Bool(true));
        entry.insert("temporary:primary_origin".into(), Value::from("rule"));
        Ok(())
    }

    fn collect_spells(&self, hero: &mut JsonMap, sources: &[SourceRecord]) {
        for source in sources {
            for (key, primary) in [("spells", false), ("house_spells", true)] {
                let Some(granted) = obj(&source.record, key) else { continue };
                let granted = granted.clone();
                for (name, delta) in &granted {
                    if name == "choice" || name.starts_with("temporary:") {
                        continue;
                    }
                    let total = match delta {
                        Value::Number(n) => n.as_i64().unwrap_or(0),
                        // Per-representation grants sum into one value.
                        Value::Object(map) => {
                            map.values().filter_map(Value::as_i64).sum()
                        }
                        _ => continue,
                    };
                    let entry = ensure_obj(ensure_obj(hero, "spells"), name);
                    add_int(entry, "value", total);
                    if primary {
                        entry.insert("primary".into(), Value::Bool(true));
                        entry.insert("temporary:primary_origin".into(), Value::from("rule"));
                    }
                }
            }
        }
    }

    fn collect_equipment(&self, hero: &mut JsonMap, sources: &[SourceRecord]) {
        for source in sources {
            let Some(granted) = obj(&source.record, "equipment") else { continue };
            let granted = granted.clone();
            for (name, payload) in &granted {
                if name == "choice" {
                    continue;
                }
                for actual in payload_instances(payload) {
                    let mut item = obj(&self.catalogs.equipment, name).cloned().unwrap_or_default();
                    for (key, value) in &actual {
                        item.insert(key.clone(), value.clone());
                    }
                    item.entry("name").or_insert_with(|| Value::from(name.clone()));
                    let possessions = ensure_obj(hero, "possessions");
                    ensure_arr(possessions, "equipment").push(Value::Object(item));
                }
            }
        }
    }

    /// Cheaper-skill entries whose skill is already owned convert into pool
    /// credit on traits-stage entry.
    pub fn cleanup_cheaper_skills(&self, hero: &mut JsonMap) {
        let owned: Vec<String> = obj(hero, "special_abilities")
            .map(|abilities| abilities.keys().cloned().collect())
            .unwrap_or_default();
        let Some(cheaper) = hero
            .get_mut(TraitCategory::CheaperSpecialAbilities.key())
            .and_then(Value::as_object_mut)
        else {
            return;
        };

        let mut pool_credit = 0i64;
        let names: Vec<String> = cheaper
            .keys()
            .filter(|name| !name.starts_with("temporary:"))
            .cloned()
            .collect();
        for name in names {
            if !owned.contains(&name) {
                continue;
            }
            let Some(def) = self.catalogs.find_trait(TraitCategory::SpecialAbilities, &name)
            else {
                continue;
            };
            let cost = int_or(def, "cost", 0);
            let has_choice = def.contains_key("selection");
            let has_text = def.contains_key("text");
            if has_choice || has_text {
                let owned_entries: Vec<Value> = obj(hero, "special_abilities")
                    .and_then(|a| arr(a, &name))
                    .cloned()
                    .unwrap_or_default();
                let Some(cheaper) = hero
                    .get_mut(TraitCategory::CheaperSpecialAbilities.key())
                    .and_then(Value::as_object_mut)
                else {
                    return;
                };
                if let Some(entries) = cheaper.get_mut(&name).and_then(Value::as_array_mut) {
                    entries.retain(|entry| {
                        let Some(entry) = entry.as_object() else { return true };
                        let matched =
                            match_entry(&owned_entries, entry, has_choice, has_text).is_some();
                        if matched {
                            pool_credit += cost * int_or(entry, "times_cheaper", 1).max(1);
                        }
                        !matched
                    });
                    if entries.is_empty() {
                        cheaper.remove(&name);
                    }
                }
            } else {
                let Some(cheaper) = hero
                    .get_mut(TraitCategory::CheaperSpecialAbilities.key())
                    .and_then(Value::as_object_mut)
                else {
                    return;
                };
                if let Some(entry) = obj(cheaper, &name) {
                    pool_credit += cost * int_or(entry, "times_cheaper", 1).max(1);
                }
                cheaper.remove(&name);
            }
        }
        if pool_credit != 0 {
            let cheaper = ensure_obj(hero, TraitCategory::CheaperSpecialAbilities.key());
            add_int(cheaper, "temporary:pool", pool_credit);
        }
    }
}

struct SourceRecord {
    record: JsonMap,
    is_bonus: bool,
}

fn payload_instances(payload: &Value) -> Vec<JsonMap> {
    match payload {
        Value::Object(map) => vec![map.clone()],
        Value::Array(items) => items.iter().filter_map(|i| i.as_object().cloned()).collect(),
        Value::Bool(true) => vec![JsonMap::new()],
        Value::Number(n) => {
            let mut map = JsonMap::new();
            if let Some(level) = n.as_i64() {
                map.insert("level".into(), Value::from(level));
            }
            vec![map]
        }
        _ => Vec::new(),
    }
}

fn grant_cost(def: &JsonMap, payload: &JsonMap, leveled: bool) -> i64 {
    let base = int_or(payload, "cost", int_or(def, "cost", 0));
    if leveled {
        base * int_or(payload, "level", 1)
    } else {
        base
    }
}

/// Choice re-application markers become stale once the hero categories are
/// rebuilt; clear them everywhere in scratch.
fn clear_applied_markers(scratch: &mut JsonMap) {
    for section in RKP_SECTIONS {
        let Some(record) = scratch.get_mut(section).and_then(Value::as_object_mut) else {
            continue;
        };
        for category in record.values_mut().filter_map(Value::as_object_mut) {
            if let Some(choices) = category.get_mut("choice").and_then(Value::as_array_mut) {
                for choice in choices.iter_mut().filter_map(Value::as_object_mut) {
                    choice.remove("temporary:applied");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn engine() -> DeduplicationEngine {
        let catalogs = Catalogs {
            advantages: as_map(json!({
                "Luck": { "cost": 5 },
                "Nightvision": { "cost": 4 },
                "Fear of": { "cost": 3, "selection": true, "leveled": true }
            })),
            disadvantages: as_map(json!({
                "Obligations": { "cost": 8, "leveled": true,
                    "effects": { "base_value_changes": { "social_status": -1 } } }
            })),
            special_abilities: as_map(json!({
                "Ambidextrous": { "cost": 200 },
                "Area Lore": { "cost": 100, "selection": true }
            })),
            talents: as_map(json!({
                "body": { "Self-Control": { "complexity": 1 } }
            })),
            ..Default::default()
        };
        DeduplicationEngine::new(Arc::new(catalogs), Arc::new(SpecialRuleRegistry::empty()))
    }

    #[test]
    fn flat_duplicate_banks_cost_in_pool() {
        let engine = engine();
        let mut hero = JsonMap::new();
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let payload = JsonMap::new();
        let first = engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Luck", &payload)
            .unwrap();
        let second = engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Luck", &payload)
            .unwrap();
        assert_eq!(first, GrantOutcome::Created);
        assert_eq!(second, GrantOutcome::Pooled(5));
        let advantages = obj(&hero, "advantages").unwrap();
        assert!(advantages.contains_key("Luck"));
        assert_eq!(int_or(advantages, "temporary:pool", 0), 5);
    }

    #[test]
    fn duplicate_revoke_restores_single_source_state() {
        let engine = engine();
        let mut hero = JsonMap::new();
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let payload = JsonMap::new();
        engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Luck", &payload)
            .unwrap();
        let single_source = hero.clone();
        let outcome = engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Luck", &payload)
            .unwrap();
        engine
            .revoke(&mut hero, &mut ledger, TraitCategory::Advantages, "Luck", &payload, &outcome)
            .unwrap();
        assert_eq!(hero, single_source);
    }

    #[test]
    fn leveled_grants_sum_into_one_entry() {
        let engine = engine();
        let mut hero = JsonMap::new();
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let payload = as_map(json!({ "level": 2 }));
        engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Disadvantages, "Obligations", &payload)
            .unwrap();
        let more = as_map(json!({ "level": 3 }));
        engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Disadvantages, "Obligations", &more)
            .unwrap();
        let entry = obj(obj(&hero, "disadvantages").unwrap(), "Obligations").unwrap();
        assert_eq!(int_or(entry, "level", 0), 5);
        assert_eq!(int_or(entry, "temporary:additional_levels", 0), 3);
        // Effects track the summed level.
        let so = obj(obj(&hero, "base_values").unwrap(), "social_status").unwrap();
        assert_eq!(int_or(so, "modifier", 0), -5);
    }

    #[test]
    fn choice_traits_match_on_selection() {
        let engine = engine();
        let mut hero = JsonMap::new();
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let heights = as_map(json!({ "selection": "Heights" }));
        let spiders = as_map(json!({ "selection": "Spiders" }));
        engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Fear of", &heights)
            .unwrap();
        engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Fear of", &spiders)
            .unwrap();
        let entries = arr(obj(&hero, "advantages").unwrap(), "Fear of").unwrap();
        assert_eq!(entries.len(), 2);
        let outcome = engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::Advantages, "Fear of", &heights)
            .unwrap();
        assert_eq!(outcome, GrantOutcome::MergedLevels(1));
        let entries = arr(obj(&hero, "advantages").unwrap(), "Fear of").unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn cheaper_duplicates_raise_repeat_counter() {
        let engine = engine();
        let mut hero = JsonMap::new();
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let payload = JsonMap::new();
        engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::CheaperSpecialAbilities, "Ambidextrous", &payload)
            .unwrap();
        let outcome = engine
            .grant(&mut hero, &mut ledger, &mut refunded, TraitCategory::CheaperSpecialAbilities, "Ambidextrous", &payload)
            .unwrap();
        assert_eq!(outcome, GrantOutcome::Cheapened);
        let entry = obj(obj(&hero, "cheaper_special_abilities").unwrap(), "Ambidextrous").unwrap();
        assert_eq!(int_or(entry, "times_cheaper", 0), 2);
    }

    #[test]
    fn cleanup_converts_owned_cheaper_skills_into_pool() {
        let engine = engine();
        let mut hero = as_map(json!({
            "special_abilities": { "Ambidextrous": {} },
            "cheaper_special_abilities": {
                "Ambidextrous": { "times_cheaper": 2 }
            }
        }));
        engine.cleanup_cheaper_skills(&mut hero);
        let cheaper = obj(&hero, "cheaper_special_abilities").unwrap();
        assert!(!cheaper.contains_key("Ambidextrous"));
        assert_eq!(int_or(cheaper, "temporary:pool", 0), 400);
    }

    #[test]
    fn recollection_retracts_granted_attribute_modifiers() {
        let catalogs = Catalogs {
            advantages: as_map(json!({
                "Strong": { "cost": 5, "effects": { "attribute_changes": { "KK": 1 } } }
            })),
            ..Default::default()
        };
        let mut state = GenerationState::new(
            Arc::new(catalogs),
            crate::domain::value_objects::GenerationSettings::default(),
        );
        state
            .doc
            .scratch_mut()
            .insert("race".into(), json!({ "advantages": { "Strong": true } }));
        let engine = DeduplicationEngine::from_state(&state);
        engine.collect_all(&mut state).unwrap();
        let kk = obj(obj(state.doc.hero(), "attributes").unwrap(), "KK").unwrap();
        assert_eq!(int_or(kk, "modifier", 0), 1);

        // A bought value on the same attribute must survive re-collection.
        if let Some(entry) = state
            .doc
            .hero_mut()
            .get_mut("attributes")
            .and_then(Value::as_object_mut)
            .and_then(|attributes| attributes.get_mut("KK"))
            .and_then(Value::as_object_mut)
        {
            entry.insert("value".into(), Value::from(10));
        }

        state
            .doc
            .scratch_mut()
            .insert("race".into(), json!({ "advantages": {} }));
        engine.collect_all(&mut state).unwrap();
        let kk = obj(obj(state.doc.hero(), "attributes").unwrap(), "KK").unwrap();
        assert_eq!(int_or(kk, "modifier", 0), 0);
        assert_eq!(int_or(kk, "value", 0), 10);
    }

    #[test]
    fn missing_catalog_reference_is_fatal() {
        let engine = engine();
        let mut hero = JsonMap::new();
        let mut ledger = CostLedger::new(110);
        let mut refunded = 0;
        let result = engine.grant(
            &mut hero,
            &mut ledger,
            &mut refunded,
            TraitCategory::Advantages,
            "No Such Trait",
            &JsonMap::new(),
        );
        assert!(matches!(result, Err(EngineError::MissingCatalogEntry { .. })));
    }
}
