//! Character generator
//!
//! Drives one build through the five stages. `advance` and `retreat` are
//! the only stage transitions; a stage is entered through `activate` and
//! left through `deactivate`, so every cost effect is bracketed. Saving
//! finalizes the hero (aptitudes, adventure points, money, base speed),
//! strips the generation bookkeeping and hands the record to the store.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::application::catalog::Catalogs;
use crate::application::ports::CharacterStorePort;
use crate::application::services::requirements::attribute_value;
use crate::application::services::stages::{
    AttributesStage, BiographyStage, ChoicesStage, RkpStage, Stage, StageId, TraitsStage,
};
use crate::application::services::state::GenerationState;
use crate::domain::document::{bool_or, ensure_obj, int_or, obj, JsonMap};
use crate::domain::value_objects::GenerationSettings;
use crate::domain::BuildDocument;
use crate::error::EngineError;

const EDUCATED_TRAIT: &str = "Gebildet";
const UNEDUCATED_TRAIT: &str = "Ungebildet";
const ADVENTURE_POINTS_PER_GP: i64 = 50;
const BASE_SPEED: i64 = 8;

pub struct CharacterGenerator {
    pub state: GenerationState,
    pub rkp: RkpStage,
    pub attributes: AttributesStage,
    pub choices: ChoicesStage,
    pub traits: TraitsStage,
    pub biography: BiographyStage,
    store: Arc<dyn CharacterStorePort>,
    current: StageId,
}

impl CharacterGenerator {
    pub fn new(
        catalogs: Arc<Catalogs>,
        settings: GenerationSettings,
        store: Arc<dyn CharacterStorePort>,
    ) -> Result<Self, EngineError> {
        Self::with_state(GenerationState::new(catalogs, settings), store)
    }

    /// Resume a build around a stored hero record.
    pub fn resume(
        name: &str,
        catalogs: Arc<Catalogs>,
        settings: GenerationSettings,
        store: Arc<dyn CharacterStorePort>,
    ) -> Result<Self, EngineError> {
        let hero = store
            .load(name)?
            .ok_or_else(|| EngineError::invalid(format!("no stored character '{name}'")))?;
        let mut state = GenerationState::new(catalogs, settings);
        state.doc = BuildDocument::from_hero(hero);
        Self::with_state(state, store)
    }

    fn with_state(
        state: GenerationState,
        store: Arc<dyn CharacterStorePort>,
    ) -> Result<Self, EngineError> {
        let mut generator = Self {
            state,
            rkp: RkpStage::new(),
            attributes: AttributesStage::new(),
            choices: ChoicesStage::new(),
            traits: TraitsStage::new(),
            biography: BiographyStage::new(),
            store,
            current: StageId::Rkp,
        };
        generator.activate(StageId::Rkp)?;
        Ok(generator)
    }

    pub fn current(&self) -> StageId {
        self.current
    }

    pub fn can_advance(&self) -> bool {
        match self.current {
            StageId::Rkp => self.rkp.can_advance(&self.state),
            StageId::Attributes => self.attributes.can_advance(&self.state),
            StageId::Choices => self.choices.can_advance(&self.state),
            StageId::Traits => self.traits.can_advance(&self.state),
            StageId::Biography => self.biography.can_advance(&self.state),
        }
    }

    /// Move to the next stage. Fails when the current stage is incomplete.
    pub fn advance(&mut self) -> Result<StageId, EngineError> {
        if !self.can_advance() {
            return Err(EngineError::invalid(format!(
                "stage '{}' is not complete",
                self.current.label()
            )));
        }
        let next = self
            .current
            .next()
            .ok_or_else(|| EngineError::invalid("already at the last stage"))?;
        self.deactivate(self.current, true)?;
        self.activate(next)?;
        info!(from = self.current.label(), to = next.label(), "stage advanced");
        self.current = next;
        Ok(next)
    }

    /// Move back one stage, reversing the current stage's cost effects.
    pub fn retreat(&mut self) -> Result<StageId, EngineError> {
        let previous = self
            .current
            .previous()
            .ok_or_else(|| EngineError::invalid("already at the first stage"))?;
        self.deactivate(self.current, false)?;
        self.activate(previous)?;
        info!(from = self.current.label(), to = previous.label(), "stage retreated");
        self.current = previous;
        Ok(previous)
    }

    /// Finalize the hero and hand it to the character store.
    pub fn save(&mut self, name: &str) -> Result<JsonMap, EngineError> {
        self.deactivate(self.current, true)?;
        self.finalize();

        let mut hero = self.state.doc.export_hero();
        remove_empty_talents(&mut hero);
        self.store.save(name, &hero)?;
        info!(name, "character saved");

        // Saving from mid-build keeps the build usable.
        self.activate(self.current)?;
        Ok(hero)
    }

    fn activate(&mut self, id: StageId) -> Result<(), EngineError> {
        let state = &mut self.state;
        match id {
            StageId::Rkp => self.rkp.activate(state),
            StageId::Attributes => self.attributes.activate(state),
            StageId::Choices => self.choices.activate(state),
            StageId::Traits => self.traits.activate(state),
            StageId::Biography => self.biography.activate(state),
        }
    }

    fn deactivate(&mut self, id: StageId, forward: bool) -> Result<(), EngineError> {
        let state = &mut self.state;
        match id {
            StageId::Rkp => self.rkp.deactivate(state, forward),
            StageId::Attributes => self.attributes.deactivate(state, forward),
            StageId::Choices => self.choices.deactivate(state, forward),
            StageId::Traits => self.traits.deactivate(state, forward),
            StageId::Biography => self.biography.deactivate(state, forward),
        }
    }

    fn finalize(&mut self) {
        self.apply_aptitudes();
        self.write_adventure_points();
        self.write_money();
        let base_values = ensure_obj(self.state.doc.hero_mut(), "base_values");
        ensure_obj(base_values, "speed").insert("value".into(), Value::from(BASE_SPEED));
    }

    /// Aptitude traits grant +1 to their named talent or spell.
    fn apply_aptitudes(&mut self) {
        let catalogs = Arc::clone(&self.state.catalogs);
        let owned: Vec<String> = obj(self.state.doc.hero(), "advantages")
            .map(|advantages| advantages.keys().cloned().collect())
            .unwrap_or_default();
        for name in owned {
            let Some(target) = catalogs
                .advantages
                .get(&name)
                .and_then(Value::as_object)
                .and_then(|def| def.get("aptitude"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            bump_skill_value(&catalogs, self.state.doc.hero_mut(), target);
        }
    }

    fn write_adventure_points(&mut self) {
        let hero = self.state.doc.hero();
        let mut ap = (attribute_value(hero, "KL") + attribute_value(hero, "IN")) * 20;
        ap += 40 * trait_level(hero, "advantages", EDUCATED_TRAIT);
        ap -= 40 * trait_level(hero, "disadvantages", UNEDUCATED_TRAIT);
        if self.state.rkp_section("bonus_profession").is_some() {
            ap += self.state.ledger.remaining().max(0) * ADVENTURE_POINTS_PER_GP;
        }
        self.state
            .doc
            .hero_mut()
            .insert("adventure_points".into(), Value::from(ap));
    }

    /// Starting money: social status squared, doubled for nobility, plus
    /// flat bonuses from equipment advantages.
    fn write_money(&mut self) {
        let catalogs = Arc::clone(&self.state.catalogs);
        let hero = self.state.doc.hero();
        let status = obj(hero, "base_values")
            .and_then(|base_values| obj(base_values, "social_status"))
            .map(|entry| int_or(entry, "value", 1) + int_or(entry, "modifier", 0))
            .unwrap_or(1)
            .max(1);
        let mut money = status * status;
        let mut bonus = 0;
        if let Some(advantages) = obj(hero, "advantages") {
            for name in advantages.keys() {
                if let Some(def) = catalogs.advantages.get(name).and_then(Value::as_object) {
                    if bool_or(def, "noble", false) {
                        money *= 2;
                    }
                    bonus += int_or(def, "money", 0);
                }
            }
        }
        let possessions = ensure_obj(self.state.doc.hero_mut(), "possessions");
        possessions.insert("money".into(), Value::from(money + bonus));
    }
}

fn trait_level(hero: &JsonMap, category: &str, name: &str) -> i64 {
    obj(hero, category)
        .and_then(|target| obj(target, name))
        .map(|entry| int_or(entry, "level", 1))
        .unwrap_or(0)
}

/// +1 on a talent or spell entry, whichever the name resolves to.
fn bump_skill_value(catalogs: &Catalogs, hero: &mut JsonMap, name: &str) {
    if catalogs.find_spell(name).is_some() {
        if let Some(entry) = hero
            .get_mut("spells")
            .and_then(Value::as_object_mut)
            .and_then(|spells| spells.get_mut(name))
            .and_then(Value::as_object_mut)
        {
            let value = int_or(entry, "value", 0);
            entry.insert("value".into(), Value::from(value + 1));
        }
        return;
    }
    let Some(group) = catalogs.talent_group(name) else { return };
    let Some(entry) = hero
        .get_mut("talents")
        .and_then(Value::as_object_mut)
        .and_then(|talents| talents.get_mut(group))
        .and_then(Value::as_object_mut)
        .and_then(|page| page.get_mut(name))
    else {
        return;
    };
    match entry {
        Value::Number(n) => {
            if let Some(value) = n.as_i64() {
                *entry = Value::from(value + 1);
            }
        }
        Value::Object(map) => {
            let value = int_or(map, "value", 0);
            map.insert("value".into(), Value::from(value + 1));
        }
        _ => {}
    }
}

/// Drop talent rows that only state "not activated" and pages emptied by it.
fn remove_empty_talents(hero: &mut JsonMap) {
    let Some(talents) = hero.get_mut("talents").and_then(Value::as_object_mut) else { return };
    for page in talents.values_mut().filter_map(Value::as_object_mut) {
        page.retain(|_, entry| match entry {
            Value::Object(map) => {
                bool_or(map, "activated", true)
                    || int_or(map, "value", 0) != 0
                    || bool_or(map, "primary", false)
            }
            _ => true,
        });
    }
    talents.retain(|_, page| page.as_object().is_none_or(|p| !p.is_empty()));
    if talents.is_empty() {
        hero.remove("talents");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct MemoryStore {
        saved: Mutex<Option<(String, JsonMap)>>,
    }

    impl MemoryStore {
        fn new() -> Arc<Self> {
            Arc::new(Self { saved: Mutex::new(None) })
        }
    }

    impl CharacterStorePort for MemoryStore {
        fn load(&self, name: &str) -> anyhow::Result<Option<JsonMap>> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .as_ref()
                .filter(|(stored, _)| stored == name)
                .map(|(_, hero)| hero.clone()))
        }

        fn save(&self, name: &str, hero: &JsonMap) -> anyhow::Result<()> {
            *self.saved.lock().unwrap() = Some((name.to_string(), hero.clone()));
            Ok(())
        }
    }

    fn as_map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn catalogs() -> Arc<Catalogs> {
        Arc::new(Catalogs {
            races: as_map(json!({ "Mittelländer": { "cost": 4 } })),
            cultures: as_map(json!({ "Andergast": { "cost": 0 } })),
            professions: as_map(json!({ "Krieger": { "cost": 6 } })),
            advantages: as_map(json!({
                "Gebildet": { "cost": 3, "leveled": true },
                "Adlig": { "cost": 0, "noble": true },
                "Begabung Schwerter": { "cost": 0, "aptitude": "Schwerter" }
            })),
            talents: as_map(json!({ "melee": { "Schwerter": { "complexity": 1 } } })),
            ..Catalogs::default()
        })
    }

    fn settings(budget: i64) -> GenerationSettings {
        GenerationSettings { starting_budget: budget, ..GenerationSettings::default() }
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn advance_is_gated_on_stage_completion() {
        let mut generator =
            CharacterGenerator::new(catalogs(), settings(10), MemoryStore::new()).unwrap();
        assert_eq!(generator.current(), StageId::Rkp);
        assert!(generator.advance().is_err());
    }

    fn select_origin(generator: &mut CharacterGenerator) {
        let state = &mut generator.state;
        let resolver = generator.rkp.resolver_mut().unwrap();
        resolver.select_race(state, &path(&["Mittelländer"]), &[]).unwrap();
        resolver.select_culture(state, &path(&["Andergast"]), &[]).unwrap();
        resolver.select_profession(state, &path(&["Krieger"]), &[]).unwrap();
    }

    #[test]
    fn full_walkthrough_saves_a_finalized_hero() {
        let store = MemoryStore::new();
        let mut generator =
            CharacterGenerator::new(catalogs(), settings(10), store.clone()).unwrap();
        select_origin(&mut generator);
        assert_eq!(generator.state.ledger.remaining(), 0);

        assert_eq!(generator.advance().unwrap(), StageId::Attributes);
        generator.attributes.set_value(&mut generator.state, "KL", 12).unwrap();
        generator.attributes.set_value(&mut generator.state, "IN", 11).unwrap();
        assert_eq!(generator.advance().unwrap(), StageId::Choices);
        assert_eq!(generator.advance().unwrap(), StageId::Traits);
        assert_eq!(generator.advance().unwrap(), StageId::Biography);

        let hero = generator.save("Alrik").unwrap();
        // (12 + 11) * 20, no education traits.
        assert_eq!(hero.get("adventure_points"), Some(&Value::from(460)));
        let base_values = obj(&hero, "base_values").unwrap();
        assert_eq!(int_or(obj(base_values, "speed").unwrap(), "value", 0), 8);
        assert!(store.saved.lock().unwrap().is_some());
        assert!(!format!("{hero:?}").contains("temporary:"));
    }

    #[test]
    fn elf_hunter_scenario_keeps_the_ledger_exact() {
        let catalogs = Arc::new(Catalogs {
            races: as_map(json!({ "Elf": { "cost": 18 } })),
            cultures: as_map(json!({ "Waldelfenstamm": { "cost": 0 } })),
            professions: as_map(json!({ "Jäger": { "cost": 10 } })),
            ..Catalogs::default()
        });
        let mut generator = CharacterGenerator::new(
            catalogs,
            GenerationSettings::default(),
            MemoryStore::new(),
        )
        .unwrap();
        {
            let state = &mut generator.state;
            let resolver = generator.rkp.resolver_mut().unwrap();
            resolver.select_race(state, &path(&["Elf"]), &[]).unwrap();
            resolver.select_culture(state, &path(&["Waldelfenstamm"]), &[]).unwrap();
            resolver.select_profession(state, &path(&["Jäger"]), &[]).unwrap();
        }
        assert_eq!(generator.state.ledger.spent(), 28);

        generator.advance().unwrap();
        assert_eq!(generator.state.ledger.spent(), 28);
        generator.advance().unwrap();
        generator.advance().unwrap();
        assert_eq!(generator.current(), StageId::Traits);

        while generator.current() != StageId::Rkp {
            generator.retreat().unwrap();
        }
        assert_eq!(generator.state.ledger.spent(), 28);
    }

    #[test]
    fn retreat_after_advance_restores_the_ledger() {
        let mut generator =
            CharacterGenerator::new(catalogs(), settings(10), MemoryStore::new()).unwrap();
        select_origin(&mut generator);
        let snapshot = generator.state.ledger.snapshot();
        generator.advance().unwrap();
        generator.attributes.set_value(&mut generator.state, "KO", 7).unwrap();
        generator.retreat().unwrap();
        assert_eq!(generator.state.ledger.snapshot(), snapshot);
    }

    fn to_biography(generator: &mut CharacterGenerator) {
        while generator.current() != StageId::Biography {
            generator.advance().unwrap();
        }
    }

    #[test]
    fn money_squares_social_status_and_doubles_for_nobility() {
        let store = MemoryStore::new();
        let mut generator =
            CharacterGenerator::new(catalogs(), settings(10), store).unwrap();
        select_origin(&mut generator);
        to_biography(&mut generator);
        ensure_obj(generator.state.doc.hero_mut(), "advantages")
            .insert("Adlig".into(), json!({}));
        ensure_obj(
            ensure_obj(generator.state.doc.hero_mut(), "base_values"),
            "social_status",
        )
        .insert("value".into(), Value::from(7));

        let hero = generator.save("Alrik").unwrap();
        let possessions = obj(&hero, "possessions").unwrap();
        assert_eq!(int_or(possessions, "money", 0), 98);
    }

    #[test]
    fn aptitude_bumps_the_named_talent() {
        let store = MemoryStore::new();
        let mut generator = CharacterGenerator::new(catalogs(), settings(10), store).unwrap();
        select_origin(&mut generator);
        to_biography(&mut generator);
        ensure_obj(generator.state.doc.hero_mut(), "advantages")
            .insert("Begabung Schwerter".into(), json!({}));
        ensure_obj(
            ensure_obj(generator.state.doc.hero_mut(), "talents"),
            "melee",
        )
        .insert("Schwerter".into(), json!({ "value": 4, "activated": true }));

        let hero = generator.save("Alrik").unwrap();
        let melee = obj(obj(&hero, "talents").unwrap(), "melee").unwrap();
        assert_eq!(int_or(obj(melee, "Schwerter").unwrap(), "value", 0), 5);
    }
}
