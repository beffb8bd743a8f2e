//! Open choices
//!
//! A choice is an unresolved decision a catalog entry leaves to the player.
//! Three kinds share one engine: exclusive single-pick, value grids with
//! optional mutually exclusive alternative groups, and point-pool
//! distribution with capacity and primary-marker constraints. The choice
//! object itself lives inside the scratch section of the build document so
//! its resolution survives navigation.

use crate::domain::document::{arr, bool_or, int_or, JsonMap};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceKind {
    ExclusivePick,
    ValueGrid,
    PointPool,
}

pub fn kind_of(choice: &JsonMap) -> ChoiceKind {
    if choice.contains_key("points") {
        ChoiceKind::PointPool
    } else if choice.contains_key("values") {
        ChoiceKind::ValueGrid
    } else {
        ChoiceKind::ExclusivePick
    }
}

/// Row index sentinel for an unassigned grid column.
pub const UNASSIGNED: i64 = -1;

#[derive(Debug, Clone)]
pub struct GridSpec {
    pub options: Vec<String>,
    /// Alternative groups of candidate values; `None` is the inactive
    /// sentinel that deactivates the target instead of assigning a value.
    pub groups: Vec<Vec<Option<i64>>>,
    /// Whether one value may be assigned to several rows.
    pub multiple: bool,
}

impl GridSpec {
    pub fn parse(choice: &JsonMap) -> Option<Self> {
        let options = names(choice)?;
        let groups = arr(choice, "values")?
            .iter()
            .map(|group| {
                group
                    .as_array()
                    .map(|vals| vals.iter().map(Value::as_i64).collect::<Vec<_>>())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        if groups.is_empty() {
            return None;
        }
        Some(Self { options, groups, multiple: bool_or(choice, "multiple", false) })
    }
}

#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub options: Vec<String>,
    pub points: i64,
    /// Each assigned unit costs the target's complexity instead of 1.
    pub complexity_weighted: bool,
    /// Maximum number of rows that may hold a non-zero value (0 = no cap).
    pub max_count: i64,
    pub min_value: i64,
    pub max_value: i64,
    /// Capacity of the primary-spell marker sub-pool.
    pub primary_spells: i64,
    /// Capacity of the primary-talent marker sub-pool.
    pub primary_talents: i64,
}

impl PoolSpec {
    pub fn parse(choice: &JsonMap) -> Option<Self> {
        Some(Self {
            options: names(choice)?,
            points: int_or(choice, "points", 0),
            complexity_weighted: bool_or(choice, "complexity_weighted", false),
            max_count: int_or(choice, "max_count", 0),
            min_value: int_or(choice, "min", 0),
            max_value: int_or(choice, "max", i64::MAX),
            primary_spells: int_or(choice, "primary_spells", 0),
            primary_talents: int_or(choice, "primary_talents", 0),
        })
    }
}

fn names(choice: &JsonMap) -> Option<Vec<String>> {
    Some(
        arr(choice, "options")?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// Initialize the persisted resolution state for a choice if absent.
pub fn ensure_resolution(choice: &mut JsonMap) {
    match kind_of(choice) {
        ChoiceKind::ExclusivePick => {
            if !choice.contains_key("chosen") {
                choice.insert("chosen".into(), Value::from(UNASSIGNED));
            }
        }
        ChoiceKind::ValueGrid => {
            let columns: Vec<usize> = arr(choice, "values")
                .map(|groups| {
                    groups
                        .iter()
                        .map(|g| g.as_array().map(Vec::len).unwrap_or(0))
                        .collect()
                })
                .unwrap_or_default();
            let initialized = matches!(choice.get("chosen"), Some(Value::Array(a)) if a.len() == columns.len());
            if !initialized {
                let chosen: Vec<Value> = columns
                    .iter()
                    .map(|cols| Value::Array(vec![Value::from(UNASSIGNED); *cols]))
                    .collect();
                choice.insert("chosen".into(), Value::Array(chosen));
            }
        }
        ChoiceKind::PointPool => {
            if !matches!(choice.get("chosen"), Some(Value::Object(_))) {
                choice.insert("chosen".into(), Value::Object(JsonMap::new()));
            }
            if !matches!(choice.get("primary_chosen"), Some(Value::Object(_))) {
                choice.insert("primary_chosen".into(), Value::Object(JsonMap::new()));
            }
        }
    }
}

/// A grid choice is resolved when one alternative group is fully assigned.
pub fn grid_resolved(choice: &JsonMap) -> bool {
    let Some(chosen) = arr(choice, "chosen") else { return false };
    chosen.iter().any(|group| {
        group
            .as_array()
            .map(|cols| !cols.is_empty() && cols.iter().all(|c| c.as_i64() != Some(UNASSIGNED)))
            .unwrap_or(false)
    })
}

pub fn pick_resolved(choice: &JsonMap) -> bool {
    int_or(choice, "chosen", UNASSIGNED) != UNASSIGNED
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
    fn kind_detection() {
        assert_eq!(kind_of(&as_map(json!({ "options": [], "points": 3 }))), ChoiceKind::PointPool);
        assert_eq!(kind_of(&as_map(json!({ "options": [], "values": [[1]] }))), ChoiceKind::ValueGrid);
        assert_eq!(kind_of(&as_map(json!({ "options": [] }))), ChoiceKind::ExclusivePick);
    }

    #[test]
    fn grid_resolution_initialized_per_group() {
        let mut choice = as_map(json!({
            "options": ["A", "B"],
            "values": [[-1, 0, 1], [2]]
        }));
        ensure_resolution(&mut choice);
        let chosen = arr(&choice, "chosen").unwrap();
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen[0].as_array().unwrap().len(), 3);
        assert_eq!(chosen[1].as_array().unwrap().len(), 1);
        assert!(!grid_resolved(&choice));
    }

    #[test]
    fn grid_resolved_when_any_group_complete() {
        let choice = as_map(json!({
            "options": ["A", "B"],
            "values": [[1, 2], [3]],
            "chosen": [[-1, 0], [0]]
        }));
        assert!(grid_resolved(&choice));
    }

    #[test]
    fn inactive_sentinel_parses_as_none() {
        let choice = as_map(json!({ "options": ["A"], "values": [[null, 1]] }));
        let spec = GridSpec::parse(&choice).unwrap();
        assert_eq!(spec.groups[0], vec![None, Some(1)]);
    }
}
