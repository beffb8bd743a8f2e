//! The shared build document
//!
//! A schemaless key-ordered tree holding two root sections: `hero` (the
//! persisted character) and `scratch` (generation-only state, discarded on
//! save). Keys prefixed `temporary:` are ephemeral bookkeeping; stripping
//! them must never change the rules-legal state of the character.

use serde_json::Value;

pub type JsonMap = serde_json::Map<String, Value>;

/// Prefix for keys that never survive a save.
pub const TEMPORARY_PREFIX: &str = "temporary:";

pub const HERO: &str = "hero";
pub const SCRATCH: &str = "scratch";

#[derive(Debug, Clone)]
pub struct BuildDocument {
    root: JsonMap,
}

impl Default for BuildDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildDocument {
    pub fn new() -> Self {
        let mut root = JsonMap::new();
        root.insert(HERO.into(), Value::Object(JsonMap::new()));
        root.insert(SCRATCH.into(), Value::Object(JsonMap::new()));
        Self { root }
    }

    /// Resume a build around an existing hero record.
    pub fn from_hero(hero: JsonMap) -> Self {
        let mut doc = Self::new();
        *doc.hero_mut() = hero;
        doc
    }

    pub fn hero(&self) -> &JsonMap {
        obj(&self.root, HERO).unwrap_or(EMPTY.get_or_init(JsonMap::new))
    }

    pub fn hero_mut(&mut self) -> &mut JsonMap {
        ensure_obj(&mut self.root, HERO)
    }

    pub fn scratch(&self) -> &JsonMap {
        obj(&self.root, SCRATCH).unwrap_or(EMPTY.get_or_init(JsonMap::new))
    }

    pub fn scratch_mut(&mut self) -> &mut JsonMap {
        ensure_obj(&mut self.root, SCRATCH)
    }

    /// Clone of the hero section with every `temporary:` key removed.
    pub fn export_hero(&self) -> JsonMap {
        let mut hero = self.hero().clone();
        strip_temporaries(&mut hero);
        hero
    }
}

static EMPTY: std::sync::OnceLock<JsonMap> = std::sync::OnceLock::new();

/// Recursively remove `temporary:` keys. Array elements emptied by the
/// removal are dropped; emptied objects stay, since a flat trait with no
/// data is a legal entry.
pub fn strip_temporaries(map: &mut JsonMap) {
    map.retain(|key, _| !key.starts_with(TEMPORARY_PREFIX));
    for value in map.values_mut() {
        strip_value(value);
    }
}

fn strip_value(value: &mut Value) {
    match value {
        Value::Object(map) => strip_temporaries(map),
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_value(item);
            }
            items.retain(|item| !matches!(item, Value::Object(map) if map.is_empty()));
        }
        _ => {}
    }
}

// Accessors over key-ordered maps. The document is schemaless; readers state
// the shape they expect and fall back to defaults on mismatch.

pub fn obj<'a>(map: &'a JsonMap, key: &str) -> Option<&'a JsonMap> {
    map.get(key).and_then(Value::as_object)
}

pub fn obj_mut<'a>(map: &'a mut JsonMap, key: &str) -> Option<&'a mut JsonMap> {
    map.get_mut(key).and_then(Value::as_object_mut)
}

pub fn ensure_obj<'a>(map: &'a mut JsonMap, key: &str) -> &'a mut JsonMap {
    if !matches!(map.get(key), Some(Value::Object(_))) {
        map.insert(key.into(), Value::Object(JsonMap::new()));
    }
    map.get_mut(key)
        .and_then(Value::as_object_mut)
        .unwrap_or_else(|| unreachable!("entry was just inserted"))
}

pub fn arr<'a>(map: &'a JsonMap, key: &str) -> Option<&'a Vec<Value>> {
    map.get(key).and_then(Value::as_array)
}

pub fn arr_mut<'a>(map: &'a mut JsonMap, key: &str) -> Option<&'a mut Vec<Value>> {
    map.get_mut(key).and_then(Value::as_array_mut)
}

pub fn ensure_arr<'a>(map: &'a mut JsonMap, key: &str) -> &'a mut Vec<Value> {
    if !matches!(map.get(key), Some(Value::Array(_))) {
        map.insert(key.into(), Value::Array(Vec::new()));
    }
    map.get_mut(key)
        .and_then(Value::as_array_mut)
        .unwrap_or_else(|| unreachable!("entry was just inserted"))
}

pub fn int(map: &JsonMap, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_i64)
}

pub fn int_or(map: &JsonMap, key: &str, default: i64) -> i64 {
    int(map, key).unwrap_or(default)
}

pub fn string<'a>(map: &'a JsonMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

pub fn bool_or(map: &JsonMap, key: &str, default: bool) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Add a delta to an integer entry, removing the entry when it reaches zero.
pub fn add_int(map: &mut JsonMap, key: &str, delta: i64) {
    let total = int_or(map, key, 0) + delta;
    if total == 0 {
        map.remove(key);
    } else {
        map.insert(key.into(), Value::from(total));
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

    #[test]
    fn strips_temporary_keys_recursively() {
        let mut hero = as_map(json!({
            "advantages": {
                "Keen Hearing": { "temporary:chosen": true },
                "temporary:pool": 4
            },
            "talents": {
                "melee": { "Swords": { "value": 3, "temporary:choice_only": true } }
            }
        }));
        strip_temporaries(&mut hero);
        let advantages = obj(&hero, "advantages").unwrap();
        assert!(advantages.contains_key("Keen Hearing"));
        assert!(!advantages.contains_key("temporary:pool"));
        let swords = obj(obj(obj(&hero, "talents").unwrap(), "melee").unwrap(), "Swords").unwrap();
        assert_eq!(swords.len(), 1);
        assert_eq!(int(swords, "value"), Some(3));
    }

    #[test]
    fn strip_drops_array_entries_emptied_by_removal() {
        let mut hero = as_map(json!({
            "disadvantages": {
                "Fear of": [
                    { "selection": "Heights", "level": 3 },
                    { "temporary:applied_choice": true }
                ]
            }
        }));
        strip_temporaries(&mut hero);
        let entries = arr(obj(&hero, "disadvantages").unwrap(), "Fear of").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn empty_flat_traits_survive_stripping() {
        let mut hero = as_map(json!({ "advantages": { "Luck": {} } }));
        strip_temporaries(&mut hero);
        assert!(obj(&hero, "advantages").unwrap().contains_key("Luck"));
    }

    #[test]
    fn add_int_removes_zeroed_entries() {
        let mut map = JsonMap::new();
        add_int(&mut map, "CO", 2);
        add_int(&mut map, "CO", -2);
        assert!(!map.contains_key("CO"));
    }
}
