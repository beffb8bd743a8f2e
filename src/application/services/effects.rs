//! Trait game effects
//!
//! Applies and reverts the mechanical side effects a trait definition
//! declares (base-value modifiers, attribute modifiers, talent deltas).
//! Apply and unapply use the same delta with opposite sign so a grant is
//! always exactly reversible.

use crate::application::catalog::Catalogs;
use crate::domain::document::{add_int, bool_or, ensure_obj, int_or, obj, JsonMap};
use serde_json::Value;

/// Apply the effects of a trait with the given instance data.
pub fn apply_effect(catalogs: &Catalogs, hero: &mut JsonMap, def: &JsonMap, actual: &JsonMap) {
    apply_scaled(catalogs, hero, def, actual, 1);
}

/// Exact inverse of [`apply_effect`] for the same definition and instance.
pub fn unapply_effect(catalogs: &Catalogs, hero: &mut JsonMap, def: &JsonMap, actual: &JsonMap) {
    apply_scaled(catalogs, hero, def, actual, -1);
}

fn apply_scaled(catalogs: &Catalogs, hero: &mut JsonMap, def: &JsonMap, actual: &JsonMap, sign: i64) {
    if bool_or(actual, "temporary:suppress_effects", false) {
        return;
    }
    let Some(effects) = obj(def, "effects") else { return };
    // Leveled traits scale their effects with the instance level.
    let scale = if bool_or(def, "leveled", false) { int_or(actual, "level", 1) } else { 1 };
    let factor = sign * scale;

    if let Some(changes) = obj(effects, "base_value_changes") {
        let changes = changes.clone();
        let base_values = ensure_obj(hero, "base_values");
        for (name, delta) in &changes {
            if let Some(delta) = delta.as_i64() {
                let entry = ensure_obj(base_values, name);
                add_int(entry, "modifier", delta * factor);
            }
        }
    }

    if let Some(changes) = obj(effects, "attribute_changes") {
        let changes = changes.clone();
        let attributes = ensure_obj(hero, "attributes");
        for (code, delta) in &changes {
            if let Some(delta) = delta.as_i64() {
                let entry = ensure_obj(attributes, code);
                add_int(entry, "modifier", delta * factor);
            }
        }
    }

    if let Some(changes) = obj(effects, "talent_changes") {
        let changes = changes.clone();
        for (name, delta) in &changes {
            if let Some(delta) = delta.as_i64() {
                adjust_talent(catalogs, hero, name, delta * factor);
            }
        }
    }
}

/// Add a delta to a talent's value, creating a deactivated entry on demand
/// and collapsing entries that only ever existed for the delta.
pub fn adjust_talent(catalogs: &Catalogs, hero: &mut JsonMap, name: &str, delta: i64) {
    let Some(group) = catalogs.talent_group(name) else { return };
    let group = group.to_string();
    let talents = ensure_obj(hero, "talents");
    let page = ensure_obj(talents, &group);
    let created = !page.contains_key(name);
    let entry = ensure_obj(page, name);
    if created {
        entry.insert("activated".into(), Value::Bool(false));
        entry.insert("temporary:choice_only".into(), Value::Bool(true));
    }
    add_int(entry, "value", delta);
    let collapses = bool_or(entry, "temporary:choice_only", false)
        && int_or(entry, "value", 0) == 0
        && !bool_or(entry, "primary", false);
    if collapses {
        page.remove(name);
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

    fn catalogs() -> Catalogs {
        Catalogs {
            talents: as_map(json!({ "body": { "Self-Control": { "complexity": 1 } } })),
            ..Default::default()
        }
    }

    #[test]
    fn leveled_effects_scale_and_reverse() {
        let catalogs = catalogs();
        let def = as_map(json!({
            "leveled": true,
            "effects": { "base_value_changes": { "life_energy": -1 } }
        }));
        let actual = as_map(json!({ "level": 3 }));
        let mut hero = JsonMap::new();
        apply_effect(&catalogs, &mut hero, &def, &actual);
        let le = obj(obj(&hero, "base_values").unwrap(), "life_energy").unwrap();
        assert_eq!(int_or(le, "modifier", 0), -3);
        unapply_effect(&catalogs, &mut hero, &def, &actual);
        assert!(obj(&hero, "base_values").unwrap().get("life_energy").is_none()
            || int_or(obj(obj(&hero, "base_values").unwrap(), "life_energy").unwrap(), "modifier", 0) == 0);
    }

    #[test]
    fn suppressed_entries_apply_nothing() {
        let catalogs = catalogs();
        let def = as_map(json!({ "effects": { "talent_changes": { "Self-Control": 2 } } }));
        let actual = as_map(json!({ "temporary:suppress_effects": true }));
        let mut hero = JsonMap::new();
        apply_effect(&catalogs, &mut hero, &def, &actual);
        assert!(hero.is_empty());
    }

    #[test]
    fn choice_only_talents_collapse_at_baseline() {
        let catalogs = catalogs();
        let mut hero = JsonMap::new();
        adjust_talent(&catalogs, &mut hero, "Self-Control", 2);
        assert!(obj(obj(&hero, "talents").unwrap(), "body").unwrap().contains_key("Self-Control"));
        adjust_talent(&catalogs, &mut hero, "Self-Control", -2);
        assert!(!obj(obj(&hero, "talents").unwrap(), "body").unwrap().contains_key("Self-Control"));
    }
}
