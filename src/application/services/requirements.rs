//! Prerequisite checks
//!
//! Evaluates a catalog prerequisite block against the current hero record.
//! Unmet prerequisites are state (`valid = false`), never errors.

use crate::application::catalog::Catalogs;
use crate::domain::document::{int_or, obj, JsonMap};
use serde_json::Value;

/// Check a prerequisite block. Absent blocks are trivially fulfilled.
pub fn requirements_met(catalogs: &Catalogs, hero: &JsonMap, prereq: Option<&JsonMap>) -> bool {
    let Some(prereq) = prereq else { return true };

    for (category, required) in
        [("advantages", "advantages"), ("disadvantages", "disadvantages"), ("special_abilities", "special_abilities")]
        .map(|(c, k)| (c, prereq.get(k)))
    {
        if let Some(Value::Array(required)) = required {
            let owned = obj(hero, category);
            for name in required.iter().filter_map(Value::as_str) {
                if !owned.is_some_and(|o| o.contains_key(name)) {
                    return false;
                }
            }
        }
    }

    if let Some(Value::Array(forbidden)) = prereq.get("not") {
        for name in forbidden.iter().filter_map(Value::as_str) {
            let owned = ["advantages", "disadvantages", "special_abilities"]
                .iter()
                .any(|cat| obj(hero, cat).is_some_and(|o| o.contains_key(name)));
            if owned {
                return false;
            }
        }
    }

    if let Some(required) = obj(prereq, "attributes") {
        for (code, minimum) in required {
            let minimum = match minimum {
                // Alternative minima: the cheapest alternative binds.
                Value::Array(alternatives) => {
                    alternatives.iter().filter_map(Value::as_i64).min().unwrap_or(0)
                }
                other => other.as_i64().unwrap_or(0),
            };
            if attribute_value(hero, code) < minimum {
                return false;
            }
        }
    }

    if let Some(required) = obj(prereq, "talents") {
        for (name, minimum) in required {
            let minimum = minimum.as_i64().unwrap_or(0);
            if talent_value(catalogs, hero, name).unwrap_or(i64::MIN) < minimum {
                return false;
            }
        }
    }

    true
}

/// Effective attribute total: bought value plus accumulated modifiers.
pub fn attribute_value(hero: &JsonMap, code: &str) -> i64 {
    obj(hero, "attributes")
        .and_then(|attributes| obj(attributes, code))
        .map(|attribute| int_or(attribute, "value", 0) + int_or(attribute, "modifier", 0))
        .unwrap_or(0)
}

/// Current value of a talent, if the hero has it at all.
pub fn talent_value(catalogs: &Catalogs, hero: &JsonMap, name: &str) -> Option<i64> {
    let group = catalogs.talent_group(name)?;
    let entry = obj(obj(hero, "talents")?, group)?.get(name)?;
    match entry {
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => Some(int_or(map, "value", 0)),
        Value::Array(entries) => arr_max(entries),
        _ => None,
    }
}

fn arr_max(entries: &[Value]) -> Option<i64> {
    entries
        .iter()
        .filter_map(|e| e.as_object().map(|m| int_or(m, "value", 0)))
        .max()
}
