//! Modifier merging
//!
//! Accumulates list-valued modifier fields (attribute deltas, talent
//! deltas, spell and language grants) across a rule node's parent chain
//! and its selected variants. Numeric deltas sum; arrays append; nested
//! objects merge recursively; open choices merge by option list. Signed
//! deltas that cancel to zero are dropped, as are choices emptied by
//! symmetric +N/-N cancellation.

use crate::domain::document::{add_int, arr, bool_or, int_or, JsonMap};
use serde_json::Value;

/// Merge `source` into `target` with summation semantics.
pub fn collect_modifications(target: &mut JsonMap, source: &JsonMap) {
    for (key, value) in source {
        if key == "choice" {
            if let Some(new_choices) = value.as_array() {
                let existing = match target.get_mut("choice") {
                    Some(Value::Array(existing)) => existing,
                    _ => {
                        target.insert("choice".into(), Value::Array(Vec::new()));
                        target
                            .get_mut("choice")
                            .and_then(Value::as_array_mut)
                            .unwrap_or_else(|| unreachable!("entry was just inserted"))
                    }
                };
                for choice in new_choices.iter().filter_map(Value::as_object) {
                    merge_choice(existing, choice);
                }
            }
            continue;
        }
        match value {
            Value::Number(n) => {
                if let Some(delta) = n.as_i64() {
                    add_int(target, key, delta);
                }
            }
            Value::Array(items) => {
                let entry = match target.get_mut(key) {
                    Some(Value::Array(entry)) => entry,
                    _ => {
                        target.insert(key.clone(), Value::Array(Vec::new()));
                        target
                            .get_mut(key)
                            .and_then(Value::as_array_mut)
                            .unwrap_or_else(|| unreachable!("entry was just inserted"))
                    }
                };
                entry.extend(items.iter().cloned());
            }
            Value::Object(nested) => {
                let entry = match target.get_mut(key) {
                    Some(Value::Object(entry)) => entry,
                    _ => {
                        target.insert(key.clone(), Value::Object(JsonMap::new()));
                        target
                            .get_mut(key)
                            .and_then(Value::as_object_mut)
                            .unwrap_or_else(|| unreachable!("entry was just inserted"))
                    }
                };
                collect_modifications(entry, nested);
                if entry.is_empty() {
                    target.remove(key);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
    prune_choices(target);
}

/// Merge one choice into an existing choice list. Choices with the same
/// option list combine; value grids cancel symmetric deltas per group,
/// point pools with matching bounds sum their points.
fn merge_choice(choices: &mut Vec<Value>, new_choice: &JsonMap) {
    let position = choices.iter().position(|existing| {
        existing
            .as_object()
            .is_some_and(|e| e.get("options") == new_choice.get("options"))
    });
    let Some(position) = position else {
        choices.push(Value::Object(new_choice.clone()));
        return;
    };
    let Some(existing) = choices[position].as_object_mut() else { return };

    if new_choice.contains_key("values") && existing.contains_key("values") {
        merge_grid_values(existing, new_choice);
    } else if new_choice.contains_key("points")
        && existing.contains_key("points")
        && int_or(existing, "min", 0) == int_or(new_choice, "min", 0)
        && int_or(existing, "max", i64::MAX) == int_or(new_choice, "max", i64::MAX)
        && bool_or(existing, "complexity_weighted", false)
            == bool_or(new_choice, "complexity_weighted", false)
    {
        add_int(existing, "points", int_or(new_choice, "points", 0));
    } else {
        choices.push(Value::Object(new_choice.clone()));
        return;
    }

    // Resolution and marker state travels with the later grant.
    for carried in ["chosen", "primary_chosen", "primary_talents", "primary_spells"] {
        if let Some(value) = new_choice.get(carried) {
            let Some(existing) = choices[position].as_object_mut() else { return };
            existing.insert(carried.into(), value.clone());
        }
    }
}

fn merge_grid_values(existing: &mut JsonMap, new_choice: &JsonMap) {
    let new_groups: Vec<Vec<Value>> = arr(new_choice, "values")
        .map(|groups| {
            groups
                .iter()
                .map(|g| g.as_array().cloned().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let Some(groups) = existing.get_mut("values").and_then(Value::as_array_mut) else { return };
    for (index, new_group) in new_groups.into_iter().enumerate() {
        if groups.len() <= index {
            groups.push(Value::Array(Vec::new()));
        }
        let Some(group) = groups[index].as_array_mut() else { continue };
        for value in new_group {
            let cancelled = value
                .as_i64()
                .filter(|v| *v != 0)
                .and_then(|v| group.iter().position(|g| g.as_i64() == Some(-v)));
            match cancelled {
                Some(at) => {
                    group.remove(at);
                }
                None => group.push(value),
            }
        }
    }
}

/// Drop choices whose every value group cancelled away, unless they still
/// carry a primary-talent grant.
fn prune_choices(target: &mut JsonMap) {
    let Some(choices) = target.get_mut("choice").and_then(Value::as_array_mut) else { return };
    choices.retain(|choice| {
        let Some(choice) = choice.as_object() else { return false };
        if int_or(choice, "primary_talents", 0) > 0 {
            return true;
        }
        match choice.get("values").and_then(Value::as_array) {
            Some(groups) => groups
                .iter()
                .any(|g| g.as_array().is_some_and(|vals| !vals.is_empty())),
            None => true,
        }
    });
    if choices.is_empty() {
        target.remove("choice");
    }
}

/// Find an entry matching `probe` by sub-selection and free text.
pub fn match_entry(
    entries: &[Value],
    probe: &JsonMap,
    has_choice: bool,
    has_text: bool,
) -> Option<usize> {
    entries.iter().position(|entry| {
        let Some(entry) = entry.as_object() else { return false };
        let selection_matches =
            !has_choice || entry.get("selection") == probe.get("selection");
        let text_matches = !has_text || entry.get("text") == probe.get("text");
        selection_matches && text_matches
    })
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

    #[test]
    fn numeric_deltas_sum_and_cancel() {
        let mut target = as_map(json!({ "Swords": 2, "Bows": 1 }));
        collect_modifications(&mut target, &as_map(json!({ "Swords": 3, "Bows": -1 })));
        assert_eq!(int_or(&target, "Swords", 0), 5);
        assert!(!target.contains_key("Bows"));
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let mut target = as_map(json!({ "Ignifaxius": { "Gildenmagier": 1 } }));
        collect_modifications(
            &mut target,
            &as_map(json!({ "Ignifaxius": { "Gildenmagier": -1 } })),
        );
        assert!(!target.contains_key("Ignifaxius"));
    }

    #[test]
    fn grid_choices_with_same_options_cancel_symmetric_values() {
        let mut target = as_map(json!({
            "choice": [{ "options": ["A", "B"], "values": [[1, 2]] }]
        }));
        collect_modifications(
            &mut target,
            &as_map(json!({
                "choice": [{ "options": ["A", "B"], "values": [[-2, 3]] }]
            })),
        );
        let choices = arr(&target, "choice").unwrap();
        assert_eq!(choices.len(), 1);
        let values = choices[0]["values"][0].as_array().unwrap();
        assert_eq!(values, &[json!(1), json!(3)]);
    }

    #[test]
    fn fully_cancelled_choice_is_dropped() {
        let mut target = as_map(json!({
            "choice": [{ "options": ["A"], "values": [[2]] }]
        }));
        collect_modifications(
            &mut target,
            &as_map(json!({ "choice": [{ "options": ["A"], "values": [[-2]] }] })),
        );
        assert!(!target.contains_key("choice"));
    }

    #[test]
    fn point_pools_with_same_bounds_sum() {
        let mut target = as_map(json!({
            "choice": [{ "options": ["A", "B"], "points": 10, "min": 0, "max": 5 }]
        }));
        collect_modifications(
            &mut target,
            &as_map(json!({
                "choice": [{ "options": ["A", "B"], "points": 5, "min": 0, "max": 5 }]
            })),
        );
        let choices = arr(&target, "choice").unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0]["points"], json!(15));
    }

    #[test]
    fn differing_option_lists_stay_separate() {
        let mut target = as_map(json!({
            "choice": [{ "options": ["A"], "values": [[1]] }]
        }));
        collect_modifications(
            &mut target,
            &as_map(json!({ "choice": [{ "options": ["B"], "values": [[1]] }] })),
        );
        assert_eq!(arr(&target, "choice").unwrap().len(), 2);
    }

    #[test]
    fn match_entry_compares_selection_and_text() {
        let entries = vec![
            json!({ "selection": "Heights" }),
            json!({ "selection": "Spiders", "text": "hairy ones" }),
        ];
        let probe = as_map(json!({ "selection": "Spiders", "text": "hairy ones" }));
        assert_eq!(match_entry(&entries, &probe, true, true), Some(1));
        let probe = as_map(json!({ "selection": "Snakes" }));
        assert_eq!(match_entry(&entries, &probe, true, false), None);
    }
}
