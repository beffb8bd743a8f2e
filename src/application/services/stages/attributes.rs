//! Attributes stage
//!
//! The eight attributes plus social status are bought from a separate
//! attribute budget. Values below the normal floor convert into a
//! miserable-attribute disadvantage (refunding build points per level),
//! values above the ceiling into an exceptional-attribute advantage with a
//! triangular cost curve. Every conversion records its build-point impact
//! under `temporary:` keys so stage retreat reverses it exactly.

use serde_json::Value;
use tracing::debug;

use crate::application::services::stages::{Stage, StageId};
use crate::application::services::state::{GenerationState, RKP_SECTIONS};
use crate::domain::document::{
    add_int, arr, ensure_arr, ensure_obj, int_or, obj, JsonMap,
};
use crate::domain::value_objects::cost::exceptional_attribute_cost;
use crate::error::EngineError;

pub const ATTRIBUTE_CODES: [&str; 8] = ["MU", "KL", "IN", "CH", "FF", "GE", "KO", "KK"];

const MISERABLE_TRAIT: &str = "Miserable Eigenschaft";
const EXCEPTIONAL_TRAIT: &str = "Herausragende Eigenschaft";
/// Build points per level outside the normal buying span.
const CONVERSION_COST: i64 = 2;
const SOCIAL_STATUS_CAP: i64 = 21;

pub struct AttributesStage;

impl AttributesStage {
    pub fn new() -> Self {
        Self
    }

    /// Summed RKP attribute delta for one code.
    pub fn modifier_for(state: &GenerationState, code: &str) -> i64 {
        RKP_SECTIONS
            .iter()
            .filter_map(|section| state.rkp_section(section))
            .filter_map(|record| obj(record, "attribute_changes"))
            .map(|changes| int_or(changes, code, 0))
            .sum()
    }

    /// Strictest requirement minimum over the merged records. Alternative
    /// minima inside one block bind at their cheapest member.
    pub fn minimum_for(state: &GenerationState, code: &str) -> i64 {
        RKP_SECTIONS
            .iter()
            .filter_map(|section| state.rkp_section(section))
            .filter_map(|record| obj(record, "prerequisites"))
            .filter_map(|prereq| obj(prereq, "attributes"))
            .filter_map(|attributes| attributes.get(code))
            .map(|minimum| match minimum {
                Value::Array(alternatives) => {
                    alternatives.iter().filter_map(Value::as_i64).min().unwrap_or(0)
                }
                other => other.as_i64().unwrap_or(0),
            })
            .max()
            .unwrap_or(0)
    }

    /// Buy an attribute to `value`, reconciling budget and conversions.
    pub fn set_value(
        &self,
        state: &mut GenerationState,
        code: &str,
        value: i64,
    ) -> Result<(), EngineError> {
        if !ATTRIBUTE_CODES.contains(&code) {
            return Err(EngineError::invalid(format!("unknown attribute '{code}'")));
        }
        let floor = state.settings.attribute_min;
        let ceiling = state.settings.attribute_max;

        let below = (floor - value).max(0);
        let above = (value - ceiling).max(0);
        let paid = value.clamp(floor, ceiling) - floor;
        let exceptional_gp =
            if above > 0 { exceptional_attribute_cost(CONVERSION_COST, above) } else { 0 };
        let miserable_gp = below * CONVERSION_COST;

        let (old_exceptional, old_miserable) = {
            let entry = attribute_entry(state.doc.hero_mut(), code);
            let old_exceptional = int_or(entry, "temporary:gp", 0);
            let old_miserable = int_or(entry, "temporary:gained", 0);
            entry.insert("value".into(), Value::from(value));
            set_or_remove(entry, "temporary:paid", paid);
            set_or_remove(entry, "temporary:gp", exceptional_gp);
            set_or_remove(entry, "temporary:gained", miserable_gp);
            (old_exceptional, old_miserable)
        };

        state.ledger.replace(old_exceptional, exceptional_gp);
        state.ledger.credit_disadvantage(miserable_gp - old_miserable, false);

        sync_conversion(
            state.doc.hero_mut(),
            "disadvantages",
            MISERABLE_TRAIT,
            code,
            below,
        );
        sync_conversion(state.doc.hero_mut(), "advantages", EXCEPTIONAL_TRAIT, code, above);
        debug!(code, value, paid, "attribute bought");
        Ok(())
    }

    pub fn value_of(state: &GenerationState, code: &str) -> i64 {
        obj(state.doc.hero(), "attributes")
            .and_then(|attributes| obj(attributes, code))
            .map(|entry| int_or(entry, "value", state.settings.attribute_min))
            .unwrap_or(state.settings.attribute_min)
    }

    /// Buy social status. Bounds: requirement minimum up to the absolute cap.
    pub fn set_social_status(
        &self,
        state: &mut GenerationState,
        value: i64,
    ) -> Result<(), EngineError> {
        let minimum = Self::social_minimum(state).max(1);
        if value < minimum || value > SOCIAL_STATUS_CAP {
            return Err(EngineError::invalid("social status outside the allowed bounds"));
        }
        let base_values = ensure_obj(state.doc.hero_mut(), "base_values");
        let entry = ensure_obj(base_values, "social_status");
        entry.insert("value".into(), Value::from(value));
        set_or_remove(entry, "temporary:paid", value - 1);
        Ok(())
    }

    pub fn social_minimum(state: &GenerationState) -> i64 {
        RKP_SECTIONS
            .iter()
            .filter_map(|section| state.rkp_section(section))
            .filter_map(|record| obj(record, "prerequisites"))
            .map(|prereq| int_or(prereq, "social_status", 0))
            .max()
            .unwrap_or(0)
    }

    /// Attribute points left in the stage's own budget.
    pub fn points_remaining(state: &GenerationState) -> i64 {
        let hero = state.doc.hero();
        let attributes: i64 = obj(hero, "attributes")
            .map(|attributes| {
                ATTRIBUTE_CODES
                    .iter()
                    .filter_map(|code| obj(attributes, code))
                    .map(|entry| int_or(entry, "temporary:paid", 0))
                    .sum()
            })
            .unwrap_or(0);
        let social = obj(hero, "base_values")
            .and_then(|base_values| obj(base_values, "social_status"))
            .map(|entry| int_or(entry, "temporary:paid", 0))
            .unwrap_or(0);
        state.settings.attribute_points - attributes - social
    }
}

impl Default for AttributesStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AttributesStage {
    fn id(&self) -> StageId {
        StageId::Attributes
    }

    fn activate(&mut self, state: &mut GenerationState) -> Result<(), EngineError> {
        let floor = state.settings.attribute_min;
        for code in ATTRIBUTE_CODES {
            let rkp = Self::modifier_for(state, code);
            let entry = attribute_entry(state.doc.hero_mut(), code);
            if !entry.contains_key("value") {
                entry.insert("value".into(), Value::from(floor));
            }
            // Re-sync the RKP share of the modifier; effect modifiers stack
            // on top and stay untouched.
            let old = int_or(entry, "temporary:rkp_modifier", 0);
            add_int(entry, "modifier", rkp - old);
            set_or_remove(entry, "temporary:rkp_modifier", rkp);
        }
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
        // Retreating to RKP: refund everything bought here and detach the
        // RKP modifier share, so a fresh collection starts clean.
        let floor = state.settings.attribute_min;
        for code in ATTRIBUTE_CODES {
            self.set_value(state, code, floor)?;
            let entry = attribute_entry(state.doc.hero_mut(), code);
            let rkp = int_or(entry, "temporary:rkp_modifier", 0);
            add_int(entry, "modifier", -rkp);
            entry.remove("temporary:rkp_modifier");
            entry.remove("temporary:paid");
        }
        if let Some(entry) = state
            .doc
            .hero_mut()
            .get_mut("base_values")
            .and_then(Value::as_object_mut)
            .and_then(|base_values| base_values.get_mut("social_status"))
            .and_then(Value::as_object_mut)
        {
            entry.remove("temporary:paid");
            entry.remove("value");
        }
        Ok(())
    }

    fn can_advance(&self, state: &GenerationState) -> bool {
        if Self::points_remaining(state) < 0 {
            return false;
        }
        ATTRIBUTE_CODES
            .iter()
            .all(|code| Self::value_of(state, code) >= Self::minimum_for(state, code))
    }
}

fn attribute_entry<'a>(hero: &'a mut JsonMap, code: &str) -> &'a mut JsonMap {
    ensure_obj(ensure_obj(hero, "attributes"), code)
}

fn set_or_remove(entry: &mut JsonMap, key: &str, value: i64) {
    if value == 0 {
        entry.remove(key);
    } else {
        entry.insert(key.into(), Value::from(value));
    }
}

/// Keep exactly one conversion entry per attribute at the given level;
/// level zero removes it.
fn sync_conversion(hero: &mut JsonMap, category: &str, name: &str, code: &str, level: i64) {
    let target = ensure_obj(hero, category);
    let exists = arr(target, name)
        .map(|entries| {
            entries.iter().any(|entry| {
                entry.as_object().is_some_and(|e| {
                    e.get("selection").and_then(Value::as_str) == Some(code)
                })
            })
        })
        .unwrap_or(false);

    if level == 0 {
        if exists {
            if let Some(entries) = target.get_mut(name).and_then(Value::as_array_mut) {
                entries.retain(|entry| {
                    entry
                        .as_object()
                        .is_none_or(|e| e.get("selection").and_then(Value::as_str) != Some(code))
                });
                if entries.is_empty() {
                    target.remove(name);
                }
            }
        }
        if target.is_empty() {
            hero.remove(category);
        }
        return;
    }

    let entries = ensure_arr(target, name);
    if exists {
        for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
            if entry.get("selection").and_then(Value::as_str) == Some(code) {
                entry.insert("level".into(), Value::from(level));
            }
        }
    } else {
        entries.push(serde_json::json!({
            "selection": code,
            "level": level,
            "temporary:conversion": true,
            "temporary:suppress_effects": true
        }));
    }
}
