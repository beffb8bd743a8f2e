//! Biography stage
//!
//! Names, gender, looks. Everything here is flavour: nothing costs build
//! points and `can_advance` is always true. Random generators draw from the
//! merged race record (weighted d20 color tables, the size derivation, the
//! weight offset) and the culture's name lists; manual edits set a
//! `temporary:` flag so a later re-roll leaves them alone.

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::application::services::stages::{Stage, StageId};
use crate::application::services::state::GenerationState;
use crate::domain::document::{arr, bool_or, ensure_obj, int_or, obj, string};
use crate::error::EngineError;

/// Disadvantages that cap the size roll at its minimum.
const SHORT_STATURE: [&str; 2] = ["Kleinwüchsig", "Zwergenwuchs"];

const COLOR_FIELDS: [(&str, &str); 3] =
    [("eyes", "eye_color"), ("hair", "hair_color"), ("skin", "skin_color")];

pub struct BiographyStage;

impl BiographyStage {
    pub fn new() -> Self {
        Self
    }

    /// Roll every field a manual edit has not pinned.
    pub fn randomize(
        &self,
        state: &mut GenerationState,
        rng: &mut impl Rng,
    ) -> Result<(), EngineError> {
        self.randomize_colors(state, rng);
        self.randomize_size(state, rng)?;
        self.randomize_name(state, rng);
        Ok(())
    }

    /// Roll the eye/hair/skin colors from the race's weighted d20 tables.
    pub fn randomize_colors(&self, state: &mut GenerationState, rng: &mut impl Rng) {
        let Some(tables) = state.rkp_section("race").and_then(|race| obj(race, "colors")) else {
            return;
        };
        let mut rolled = Vec::new();
        for (table_key, field) in COLOR_FIELDS {
            if let Some(color) = arr(tables, table_key).and_then(|table| weighted_roll(table, rng))
            {
                rolled.push((field, color));
            }
        }
        let biography = ensure_obj(state.doc.hero_mut(), "biography");
        for (field, color) in rolled {
            biography.insert(field.into(), Value::String(color));
        }
    }

    /// Roll size from the race derivation and derive weight from it.
    pub fn randomize_size(
        &self,
        state: &mut GenerationState,
        rng: &mut impl Rng,
    ) -> Result<(), EngineError> {
        let Some(race) = state.rkp_section("race") else { return Ok(()) };
        let Some(derivation) = obj(race, "size") else { return Ok(()) };
        let base = int_or(derivation, "base", 0);
        let dice = int_or(derivation, "dice", 0).max(0);
        let sides = int_or(derivation, "sides", 6).max(1);

        let rolled: i64 = if self.short_stature(state) {
            dice
        } else {
            (0..dice).map(|_| rng.gen_range(1..=sides)).sum()
        };
        let size = base + rolled;
        debug!(size, "size rolled");

        let biography = ensure_obj(state.doc.hero_mut(), "biography");
        biography.insert("size".into(), Value::from(size));
        self.sync_weight(state, rng)
    }

    /// Pick a name from the culture's lists for the hero's gender.
    pub fn randomize_name(&self, state: &mut GenerationState, rng: &mut impl Rng) {
        let biography = obj(state.doc.hero(), "biography");
        if biography.is_some_and(|b| bool_or(b, "temporary:custom_name", false)) {
            return;
        }
        let gender = biography
            .and_then(|b| string(b, "gender"))
            .unwrap_or("male")
            .to_string();
        let Some(names) = state.rkp_section("culture").and_then(|c| obj(c, "names")) else {
            return;
        };
        let first = arr(names, &gender).and_then(|list| pick(list, rng));
        let last = arr(names, "last").and_then(|list| pick(list, rng));
        let biography = ensure_obj(state.doc.hero_mut(), "biography");
        if let Some(first) = first {
            biography.insert("first_name".into(), Value::String(first));
        }
        if let Some(last) = last {
            biography.insert("last_name".into(), Value::String(last));
        }
    }

    /// Manual name entry. Pins the name against later re-rolls.
    pub fn set_name(&self, state: &mut GenerationState, first: &str, last: &str) {
        let biography = ensure_obj(state.doc.hero_mut(), "biography");
        biography.insert("first_name".into(), Value::String(first.to_string()));
        biography.insert("last_name".into(), Value::String(last.to_string()));
        biography.insert("temporary:custom_name".into(), Value::Bool(true));
    }

    pub fn set_gender(&self, state: &mut GenerationState, gender: &str) {
        ensure_obj(state.doc.hero_mut(), "biography")
            .insert("gender".into(), Value::String(gender.to_string()));
    }

    /// Manual size entry. Weight follows unless it was decoupled.
    pub fn set_size(
        &self,
        state: &mut GenerationState,
        size: i64,
        rng: &mut impl Rng,
    ) -> Result<(), EngineError> {
        ensure_obj(state.doc.hero_mut(), "biography").insert("size".into(), Value::from(size));
        self.sync_weight(state, rng)
    }

    /// Manual weight entry, bounded by the configured deviation from the
    /// size-derived default. Decouples weight from later size changes.
    pub fn set_weight(&self, state: &mut GenerationState, weight: i64) -> Result<(), EngineError> {
        if let Some(expected) = self.derived_weight(state) {
            let allowed = expected * state.settings.weight_deviation_percent / 100;
            if (weight - expected).abs() > allowed {
                return Err(EngineError::invalid(format!(
                    "weight {weight} deviates more than {allowed} from {expected}"
                )));
            }
        }
        let biography = ensure_obj(state.doc.hero_mut(), "biography");
        biography.insert("weight".into(), Value::from(weight));
        biography.insert("temporary:custom_weight".into(), Value::Bool(true));
        Ok(())
    }

    fn sync_weight(&self, state: &mut GenerationState, rng: &mut impl Rng) -> Result<(), EngineError> {
        let biography = obj(state.doc.hero(), "biography");
        if biography.is_some_and(|b| bool_or(b, "temporary:custom_weight", false)) {
            return Ok(());
        }
        let Some(expected) = self.derived_weight(state) else { return Ok(()) };
        let allowed = expected * state.settings.weight_deviation_percent / 100;
        let weight = if allowed > 0 {
            expected + rng.gen_range(-allowed..=allowed)
        } else {
            expected
        };
        ensure_obj(state.doc.hero_mut(), "biography")
            .insert("weight".into(), Value::from(weight));
        Ok(())
    }

    fn derived_weight(&self, state: &GenerationState) -> Option<i64> {
        let offset = state.rkp_section("race").and_then(|race| race.get("weight"))?.as_i64()?;
        let size = obj(state.doc.hero(), "biography").map(|b| int_or(b, "size", 0))?;
        (size > 0).then_some(size - offset)
    }

    fn short_stature(&self, state: &GenerationState) -> bool {
        obj(state.doc.hero(), "disadvantages")
            .is_some_and(|d| SHORT_STATURE.iter().any(|name| d.contains_key(*name)))
    }
}

impl Default for BiographyStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for BiographyStage {
    fn id(&self) -> StageId {
        StageId::Biography
    }

    fn activate(&mut self, _state: &mut GenerationState) -> Result<(), EngineError> {
        Ok(())
    }

    fn deactivate(
        &mut self,
        _state: &mut GenerationState,
        _forward: bool,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn can_advance(&self, _state: &GenerationState) -> bool {
        true
    }
}

/// Roll a d20 against a table of `[weight, name]` rows. Weights are expected
/// to sum to 20; short tables simply re-use the last row for high rolls.
fn weighted_roll(table: &[Value], rng: &mut impl Rng) -> Option<String> {
    let mut roll = rng.gen_range(1..=20i64);
    let mut last = None;
    for row in table {
        let row = row.as_array()?;
        let weight = row.first().and_then(Value::as_i64).unwrap_or(0);
        let name = row.get(1).and_then(Value::as_str)?;
        last = Some(name.to_string());
        roll -= weight;
        if roll <= 0 {
            return last;
        }
    }
    last
}

fn pick(list: &[Value], rng: &mut impl Rng) -> Option<String> {
    if list.is_empty() {
        return None;
    }
    list[rng.gen_range(0..list.len())].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::catalog::Catalogs;
    use crate::domain::value_objects::GenerationSettings;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::sync::Arc;

    fn state_with_race() -> GenerationState {
        let mut state =
            GenerationState::new(Arc::new(Catalogs::default()), GenerationSettings::default());
        state.doc.scratch_mut().insert(
            "race".into(),
            json!({
                "colors": {
                    "eyes": [[10, "green"], [10, "brown"]],
                    "hair": [[20, "black"]],
                    "skin": [[20, "fair"]]
                },
                "size": { "base": 160, "dice": 2, "sides": 6 },
                "weight": 110
            }),
        );
        state.doc.scratch_mut().insert(
            "culture".into(),
            json!({
                "names": {
                    "male": ["Alrik", "Gerbald"],
                    "female": ["Alrike"],
                    "last": ["von Gareth"]
                }
            }),
        );
        state
    }

    #[test]
    fn randomize_fills_every_field_within_bounds() {
        let mut state = state_with_race();
        let stage = BiographyStage::new();
        let mut rng = StdRng::seed_from_u64(7);
        stage.randomize(&mut state, &mut rng).unwrap();

        let biography = obj(state.doc.hero(), "biography").unwrap();
        assert!(biography.contains_key("eye_color"));
        assert_eq!(string(biography, "hair_color"), Some("black"));
        let size = int_or(biography, "size", 0);
        assert!((162..=172).contains(&size));
        let weight = int_or(biography, "weight", 0);
        let expected = size - 110;
        assert!((weight - expected).abs() <= expected * 15 / 100);
        assert!(biography.contains_key("first_name"));
        assert_eq!(string(biography, "last_name"), Some("von Gareth"));
    }

    #[test]
    fn custom_name_survives_rerolls() {
        let mut state = state_with_race();
        let stage = BiographyStage::new();
        stage.set_name(&mut state, "Eigen", "Name");
        let mut rng = StdRng::seed_from_u64(3);
        stage.randomize_name(&mut state, &mut rng);
        let biography = obj(state.doc.hero(), "biography").unwrap();
        assert_eq!(string(biography, "first_name"), Some("Eigen"));
    }

    #[test]
    fn short_stature_pins_the_size_roll_to_its_minimum() {
        let mut state = state_with_race();
        ensure_obj(state.doc.hero_mut(), "disadvantages").insert("Kleinwüchsig".into(), json!({}));
        let stage = BiographyStage::new();
        let mut rng = StdRng::seed_from_u64(11);
        stage.randomize_size(&mut state, &mut rng).unwrap();
        let biography = obj(state.doc.hero(), "biography").unwrap();
        assert_eq!(int_or(biography, "size", 0), 162);
    }

    #[test]
    fn manual_weight_is_bounded_by_the_deviation() {
        let mut state = state_with_race();
        let stage = BiographyStage::new();
        let mut rng = StdRng::seed_from_u64(5);
        stage.set_size(&mut state, 170, &mut rng).unwrap();
        // Derived weight 60, 15% deviation allows 51..=69.
        assert!(stage.set_weight(&mut state, 75).unwrap_err().to_string().contains("deviat"));
        stage.set_weight(&mut state, 55).unwrap();
        let biography = obj(state.doc.hero(), "biography").unwrap();
        assert_eq!(int_or(biography, "weight", 0), 55);
    }

    #[test]
    fn decoupled_weight_ignores_size_changes() {
        let mut state = state_with_race();
        let stage = BiographyStage::new();
        let mut rng = StdRng::seed_from_u64(5);
        stage.set_size(&mut state, 170, &mut rng).unwrap();
        stage.set_weight(&mut state, 58).unwrap();
        stage.set_size(&mut state, 180, &mut rng).unwrap();
        let biography = obj(state.doc.hero(), "biography").unwrap();
        assert_eq!(int_or(biography, "weight", 0), 58);
    }

    #[test]
    fn weighted_tables_cover_the_whole_die() {
        let table = json!([[5, "a"], [15, "b"]]);
        let Value::Array(table) = table else { unreachable!() };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let rolled = weighted_roll(&table, &mut rng).unwrap();
            assert!(rolled == "a" || rolled == "b");
        }
    }
}
