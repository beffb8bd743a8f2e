//! Choice resolution
//!
//! Drives the open choices the merged rule records leave to the player.
//! Choices live inside the scratch sections, addressed by
//! (section, category, index); their resolution state (`chosen`,
//! `primary_chosen`) persists across navigation while the applied game
//! effects are reversed on stage retreat via the `temporary:applied`
//! marker. Every apply has an exact inverse.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::application::catalog::Catalogs;
use crate::application::services::dedup::{DeduplicationEngine, GrantOutcome};
use crate::application::services::effects::adjust_talent;
use crate::application::services::state::{GenerationState, RKP_SECTIONS};
use crate::domain::document::{
    add_int, arr, bool_or, ensure_obj, int_or, obj, string, JsonMap,
};
use crate::domain::entities::choice::{
    ensure_resolution, grid_resolved, kind_of, pick_resolved, GridSpec, PoolSpec, UNASSIGNED,
};
use crate::domain::entities::{ChoiceKind, TraitCategory};
use crate::error::EngineError;

/// Categories whose merged records may carry open choices.
const CHOICE_CATEGORIES: [&str; 8] = [
    "advantages",
    "disadvantages",
    "special_abilities",
    "cheaper_special_abilities",
    "talents",
    "spells",
    "house_spells",
    "languages",
];

/// Address of one choice inside the scratch data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceRef {
    pub section: String,
    pub category: String,
    pub index: usize,
}

impl ChoiceRef {
    pub fn new(section: &str, category: &str, index: usize) -> Self {
        Self { section: section.into(), category: category.into(), index }
    }

    fn origin(&self) -> String {
        format!("choice:{}/{}/{}", self.section, self.category, self.index)
    }
}

pub struct ChoiceResolver {
    catalogs: Arc<Catalogs>,
    dedup: DeduplicationEngine,
}

impl ChoiceResolver {
    pub fn from_state(state: &GenerationState) -> Self {
        Self {
            catalogs: state.catalogs.clone(),
            dedup: DeduplicationEngine::from_state(state),
        }
    }

    /// Every choice currently present in the scratch sections.
    pub fn list(&self, state: &GenerationState) -> Vec<ChoiceRef> {
        let mut refs = Vec::new();
        for section in RKP_SECTIONS {
            let Some(record) = state.rkp_section(section) else { continue };
            for category in CHOICE_CATEGORIES {
                let count = obj(record, category)
                    .and_then(|c| arr(c, "choice"))
                    .map(Vec::len)
                    .unwrap_or(0);
                for index in 0..count {
                    refs.push(ChoiceRef::new(section, category, index));
                }
            }
        }
        refs
    }

    /// Prepare every choice on stage activation: expand wildcard rows,
    /// initialize resolution state, and re-apply persisted resolutions that
    /// are not currently applied.
    pub fn initialize(&self, state: &mut GenerationState) -> Result<(), EngineError> {
        for choice_ref in self.list(state) {
            let mut choice = self.get(state, &choice_ref)?;
            self.expand_wildcards(&mut choice);
            ensure_resolution(&mut choice);
            put_choice(state, &choice_ref, choice);
            if !self.is_applied(state, &choice_ref)? {
                self.apply_resolution(state, &choice_ref)?;
            }
        }
        Ok(())
    }

    /// Reverse every applied choice, keeping the persisted resolution.
    pub fn suspend(&self, state: &mut GenerationState) -> Result<(), EngineError> {
        for choice_ref in self.list(state) {
            if self.is_applied(state, &choice_ref)? {
                self.unapply_resolution(state, &choice_ref)?;
            }
        }
        Ok(())
    }

    fn is_applied(
        &self,
        state: &GenerationState,
        choice_ref: &ChoiceRef,
    ) -> Result<bool, EngineError> {
        Ok(bool_or(&self.get(state, choice_ref)?, "temporary:applied", false))
    }

    /// Resolve an exclusive pick to one option, replacing any previous pick.
    pub fn pick(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
        option: usize,
    ) -> Result<(), EngineError> {
        let mut choice = self.get(state, choice_ref)?;
        if kind_of(&choice) != ChoiceKind::ExclusivePick {
            return Err(EngineError::invalid("not an exclusive pick"));
        }
        let options = option_names(&choice);
        let name = options
            .get(option)
            .ok_or_else(|| EngineError::invalid("pick index out of range"))?
            .clone();
        let category = trait_category(&choice_ref.category)?;

        self.revoke_pick(state, &mut choice, category)?;

        let mut refunded = 0i64;
        let payload = JsonMap::new();
        let doc = &mut state.doc;
        let outcome = self.dedup.grant(
            doc.hero_mut(),
            &mut state.ledger,
            &mut refunded,
            category,
            &name,
            &payload,
        )?;
        choice.insert("chosen".into(), Value::from(option as i64));
        choice.insert("temporary:granted".into(), outcome.to_value());
        choice.insert("temporary:applied".into(), Value::Bool(true));
        put_choice(state, choice_ref, choice);
        debug!(option = %name, "exclusive pick resolved");
        Ok(())
    }

    fn revoke_pick(
        &self,
        state: &mut GenerationState,
        choice: &mut JsonMap,
        category: TraitCategory,
    ) -> Result<(), EngineError> {
        let previous = int_or(choice, "chosen", UNASSIGNED);
        if previous == UNASSIGNED {
            return Ok(());
        }
        let options = option_names(choice);
        let Some(name) = options.get(previous as usize) else { return Ok(()) };
        let outcome = choice
            .get("temporary:granted")
            .and_then(GrantOutcome::from_value)
            .unwrap_or(GrantOutcome::Created);
        let payload = JsonMap::new();
        let doc = &mut state.doc;
        self.dedup.revoke(doc.hero_mut(), &mut state.ledger, category, name, &payload, &outcome)?;
        choice.insert("chosen".into(), Value::from(UNASSIGNED));
        choice.remove("temporary:granted");
        Ok(())
    }

    /// Assign a grid column to a row (`UNASSIGNED` clears the column).
    ///
    /// Selecting inside one alternative group clears every other group.
    /// A row collision moves the displaced row to the next free column
    /// cyclically, so no previous selection is silently lost.
    pub fn assign(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
        group: usize,
        column: usize,
        row: i64,
    ) -> Result<(), EngineError> {
        let mut choice = self.get(state, choice_ref)?;
        ensure_resolution(&mut choice);
        let spec = GridSpec::parse(&choice)
            .ok_or_else(|| EngineError::invalid("not a value grid"))?;
        let values = spec
            .groups
            .get(group)
            .ok_or_else(|| EngineError::invalid("grid group out of range"))?;
        if column >= values.len() {
            return Err(EngineError::invalid("grid column out of range"));
        }
        if row != UNASSIGNED && (row < 0 || row as usize >= spec.options.len()) {
            return Err(EngineError::invalid("grid row out of range"));
        }

        let mut chosen = grid_chosen(&choice);

        // Alternative groups are exclusive as a whole.
        for (other, columns) in chosen.iter_mut().enumerate() {
            if other == group {
                continue;
            }
            for (c, assigned) in columns.iter_mut().enumerate() {
                if *assigned != UNASSIGNED {
                    self.apply_grid_cell(state, choice_ref, &spec, other, c, *assigned, -1)?;
                    *assigned = UNASSIGNED;
                }
            }
        }

        // Row exclusivity: the row moves here from any other column.
        if row != UNASSIGNED && !spec.multiple {
            for c in 0..chosen[group].len() {
                if c != column && chosen[group][c] == row {
                    self.apply_grid_cell(state, choice_ref, &spec, group, c, row, -1)?;
                    chosen[group][c] = UNASSIGNED;
                }
            }
        }

        // Column collision: bump the displaced row to the next free column.
        // Clearing (`row == UNASSIGNED`) removes the occupant outright.
        let displaced = chosen[group][column];
        if displaced != UNASSIGNED && displaced != row {
            self.apply_grid_cell(state, choice_ref, &spec, group, column, displaced, -1)?;
            chosen[group][column] = UNASSIGNED;
            if row != UNASSIGNED {
                if let Some(free) = next_free_column(&chosen[group], column) {
                    chosen[group][free] = displaced;
                    self.apply_grid_cell(state, choice_ref, &spec, group, free, displaced, 1)?;
                }
            }
        }

        if chosen[group][column] != row {
            chosen[group][column] = row;
            if row != UNASSIGNED {
                self.apply_grid_cell(state, choice_ref, &spec, group, column, row, 1)?;
            }
        }

        store_grid_chosen(&mut choice, &chosen);
        choice.insert("temporary:applied".into(), Value::Bool(true));
        put_choice(state, choice_ref, choice);
        Ok(())
    }

    fn apply_grid_cell(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
        spec: &GridSpec,
        group: usize,
        column: usize,
        row: i64,
        sign: i64,
    ) -> Result<(), EngineError> {
        let name = spec
            .options
            .get(row as usize)
            .ok_or_else(|| EngineError::invalid("grid row out of range"))?
            .clone();
        match spec.groups[group][column] {
            Some(value) => {
                self.adjust_target(state, &choice_ref.category, &name, value * sign);
            }
            // Inactive sentinel: deactivate the target instead of valuing it.
            None => {
                let hero = state.doc.hero_mut();
                if let Some(entry) = talent_entry_mut(&self.catalogs, hero, &name) {
                    if sign > 0 {
                        let was_active = bool_or(entry, "activated", true);
                        entry.insert("temporary:was_activated".into(), Value::from(was_active));
                        entry.insert("activated".into(), Value::Bool(false));
                    } else {
                        let was_active = bool_or(entry, "temporary:was_activated", true);
                        entry.remove("temporary:was_activated");
                        entry.insert("activated".into(), Value::from(was_active));
                    }
                }
            }
        }
        Ok(())
    }

    /// Set a point-pool row to a value within the configured bounds.
    pub fn set_value(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
        name: &str,
        value: i64,
    ) -> Result<(), EngineError> {
        let mut choice = self.get(state, choice_ref)?;
        let spec = PoolSpec::parse(&choice)
            .ok_or_else(|| EngineError::invalid("not a point pool"))?;
        if !spec.options.iter().any(|o| o == name) {
            return Err(EngineError::invalid(format!("'{name}' is not offered by this choice")));
        }
        if value < spec.min_value || value > spec.max_value {
            return Err(EngineError::invalid("value outside the allowed bounds"));
        }

        let chosen = ensure_obj(&mut choice, "chosen");
        let old = int_or(chosen, name, 0);
        if value != 0 && old == 0 && spec.max_count > 0 {
            let assigned = chosen.values().filter(|v| v.as_i64().unwrap_or(0) != 0).count();
            if assigned as i64 >= spec.max_count {
                return Err(EngineError::invalid("maximum row count reached"));
            }
        }
        if value == 0 {
            chosen.remove(name);
        } else {
            chosen.insert(name.into(), Value::from(value));
        }

        self.adjust_target(state, &choice_ref.category, name, value - old);
        choice.insert("temporary:applied".into(), Value::Bool(true));
        put_choice(state, choice_ref, choice);
        Ok(())
    }

    /// Toggle a primary marker on a pool row. An externally granted primary
    /// always wins: the toggle is refused while a foreign origin holds the
    /// marker.
    pub fn toggle_primary(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
        name: &str,
        on: bool,
    ) -> Result<(), EngineError> {
        let mut choice = self.get(state, choice_ref)?;
        let spec = PoolSpec::parse(&choice)
            .ok_or_else(|| EngineError::invalid("not a point pool"))?;
        if !spec.options.iter().any(|o| o == name) {
            return Err(EngineError::invalid(format!("'{name}' is not offered by this choice")));
        }
        let is_spell = self.catalogs.find_spell(name).is_some();
        let marker = if is_spell { "spell" } else { "talent" };
        let capacity = if is_spell { spec.primary_spells } else { spec.primary_talents };
        if capacity == 0 {
            return Err(EngineError::invalid("this choice carries no primary markers"));
        }
        let origin = choice_ref.origin();

        let holder = if is_spell {
            obj(state.doc.hero(), "spells")
                .and_then(|spells| obj(spells, name))
                .and_then(|entry| string(entry, "temporary:primary_origin"))
                .map(str::to_string)
        } else {
            let hero = state.doc.hero_mut();
            let Some(entry) = talent_entry_mut(&self.catalogs, hero, name) else {
                return Err(EngineError::missing("talent", name));
            };
            string(entry, "temporary:primary_origin").map(str::to_string)
        };
        if holder.as_deref().is_some_and(|h| h != origin) {
            return Err(EngineError::invalid(
                "primary marker is held by an unrelated grant",
            ));
        }

        let primary_chosen = ensure_obj(&mut choice, "primary_chosen");
        if on {
            let used = primary_chosen.values().filter(|v| v.as_str() == Some(marker)).count();
            if used as i64 >= capacity {
                return Err(EngineError::invalid("primary sub-pool exhausted"));
            }
            primary_chosen.insert(name.into(), Value::from(marker));
        } else {
            primary_chosen.remove(name);
        }

        // The hero record is touched only once the toggle is accepted; a
        // refused toggle must leave no trace.
        let hero = state.doc.hero_mut();
        if is_spell {
            if on {
                let entry = ensure_obj(ensure_obj(hero, "spells"), name);
                entry.insert("primary".into(), Value::Bool(true));
                entry.insert("temporary:primary_origin".into(), Value::from(origin));
            } else if let Some(spells) = hero.get_mut("spells").and_then(Value::as_object_mut) {
                let mut emptied = false;
                if let Some(entry) = spells.get_mut(name).and_then(Value::as_object_mut) {
                    entry.remove("primary");
                    entry.remove("temporary:primary_origin");
                    emptied = entry.is_empty();
                }
                if emptied {
                    spells.remove(name);
                }
            }
        } else if let Some(entry) = talent_entry_mut(&self.catalogs, hero, name) {
            if on {
                entry.insert("primary".into(), Value::Bool(true));
                entry.insert("temporary:primary_origin".into(), Value::from(origin));
            } else {
                entry.remove("primary");
                entry.remove("temporary:primary_origin");
            }
        }
        choice.insert("temporary:applied".into(), Value::Bool(true));
        put_choice(state, choice_ref, choice);
        Ok(())
    }

    /// Remaining points in a pool choice, after complexity weighting.
    pub fn pool_remaining(&self, state: &GenerationState, choice_ref: &ChoiceRef) -> i64 {
        let Ok(choice) = self.get(state, choice_ref) else { return 0 };
        let Some(spec) = PoolSpec::parse(&choice) else { return 0 };
        let Some(chosen) = obj(&choice, "chosen") else { return spec.points };
        let hero = state.doc.hero();
        let spent: i64 = chosen
            .iter()
            .filter_map(|(name, value)| value.as_i64().map(|v| (name, v)))
            .map(|(name, value)| value * self.unit_cost(&spec, hero, name))
            .sum();
        spec.points - spent
    }

    fn unit_cost(&self, spec: &PoolSpec, hero: &JsonMap, name: &str) -> i64 {
        if !spec.complexity_weighted {
            return 1;
        }
        if self.catalogs.find_spell(name).is_some() {
            let primary = obj(hero, "spells")
                .and_then(|spells| obj(spells, name))
                .is_some_and(|entry| bool_or(entry, "primary", false));
            let base = self.catalogs.spell_complexity(name);
            if primary {
                (base - 1).max(1)
            } else {
                base
            }
        } else {
            self.catalogs.talent_complexity(name)
        }
    }

    pub fn resolved(&self, state: &GenerationState, choice_ref: &ChoiceRef) -> bool {
        let Ok(choice) = self.get(state, choice_ref) else { return false };
        match kind_of(&choice) {
            ChoiceKind::ExclusivePick => pick_resolved(&choice),
            ChoiceKind::ValueGrid => grid_resolved(&choice),
            ChoiceKind::PointPool => {
                if self.pool_remaining(state, choice_ref) != 0 {
                    return false;
                }
                let Some(spec) = PoolSpec::parse(&choice) else { return false };
                let markers = obj(&choice, "primary_chosen");
                let count = |kind: &str| {
                    markers
                        .map(|m| m.values().filter(|v| v.as_str() == Some(kind)).count() as i64)
                        .unwrap_or(0)
                };
                count("spell") == spec.primary_spells && count("talent") == spec.primary_talents
            }
        }
    }

    pub fn all_resolved(&self, state: &GenerationState) -> bool {
        self.list(state).iter().all(|choice_ref| self.resolved(state, choice_ref))
    }

    /// Re-apply a persisted resolution after the hero categories were
    /// rebuilt.
    fn apply_resolution(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
    ) -> Result<(), EngineError> {
        let mut choice = self.get(state, choice_ref)?;
        match kind_of(&choice) {
            ChoiceKind::ExclusivePick => {
                let chosen = int_or(&choice, "chosen", UNASSIGNED);
                if chosen != UNASSIGNED {
                    // Re-grant through the pick path for a fresh outcome.
                    choice.insert("chosen".into(), Value::from(UNASSIGNED));
                    choice.remove("temporary:granted");
                    put_choice(state, choice_ref, choice);
                    return self.pick(state, choice_ref, chosen as usize);
                }
            }
            ChoiceKind::ValueGrid => {
                if let Some(spec) = GridSpec::parse(&choice) {
                    let chosen = grid_chosen(&choice);
                    for (group, columns) in chosen.iter().enumerate() {
                        for (column, row) in columns.iter().enumerate() {
                            if *row != UNASSIGNED {
                                self.apply_grid_cell(
                                    state, choice_ref, &spec, group, column, *row, 1,
                                )?;
                            }
                        }
                    }
                }
            }
            ChoiceKind::PointPool => {
                let values: Vec<(String, i64)> = obj(&choice, "chosen")
                    .map(|chosen| {
                        chosen
                            .iter()
                            .filter_map(|(n, v)| v.as_i64().map(|v| (n.clone(), v)))
                            .collect()
                    })
                    .unwrap_or_default();
                for (name, value) in values {
                    self.adjust_target(state, &choice_ref.category, &name, value);
                }
                let markers: Vec<String> = obj(&choice, "primary_chosen")
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                let origin = choice_ref.origin();
                for name in markers {
                    let is_spell = self.catalogs.find_spell(&name).is_some();
                    let hero = state.doc.hero_mut();
                    let entry = if is_spell {
                        Some(ensure_obj(ensure_obj(hero, "spells"), &name))
                    } else {
                        talent_entry_mut(&self.catalogs, hero, &name)
                    };
                    if let Some(entry) = entry {
                        entry.insert("primary".into(), Value::Bool(true));
                        entry
                            .insert("temporary:primary_origin".into(), Value::from(origin.clone()));
                    }
                }
            }
        }
        let mut choice = self.get(state, choice_ref)?;
        choice.insert("temporary:applied".into(), Value::Bool(true));
        put_choice(state, choice_ref, choice);
        Ok(())
    }

    /// Exact inverse of [`Self::apply_resolution`].
    fn unapply_resolution(
        &self,
        state: &mut GenerationState,
        choice_ref: &ChoiceRef,
    ) -> Result<(), EngineError> {
        let mut choice = self.get(state, choice_ref)?;
        match kind_of(&choice) {
            ChoiceKind::ExclusivePick => {
                let chosen = int_or(&choice, "chosen", UNASSIGNED);
                if chosen != UNASSIGNED {
                    let category = trait_category(&choice_ref.category)?;
                    self.revoke_pick(state, &mut choice, category)?;
                    // Keep the resolution itself for re-application.
                    choice.insert("chosen".into(), Value::from(chosen));
                }
            }
            ChoiceKind::ValueGrid => {
                if let Some(spec) = GridSpec::parse(&choice) {
                    let chosen = grid_chosen(&choice);
                    for (group, columns) in chosen.iter().enumerate() {
                        for (column, row) in columns.iter().enumerate() {
                            if *row != UNASSIGNED {
                                self.apply_grid_cell(
                                    state, choice_ref, &spec, group, column, *row, -1,
                                )?;
                            }
                        }
                    }
                }
            }
            ChoiceKind::PointPool => {
                let values: Vec<(String, i64)> = obj(&choice, "chosen")
                    .map(|chosen| {
                        chosen
                            .iter()
                            .filter_map(|(n, v)| v.as_i64().map(|v| (n.clone(), v)))
                            .collect()
                    })
                    .unwrap_or_default();
                for (name, value) in values {
                    self.adjust_target(state, &choice_ref.category, &name, -value);
                }
                let markers: Vec<String> = obj(&choice, "primary_chosen")
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                let origin = choice_ref.origin();
                for name in markers {
                    let is_spell = self.catalogs.find_spell(&name).is_some();
                    let hero = state.doc.hero_mut();
                    let entry = if is_spell {
                        hero.get_mut("spells")
                            .and_then(Value::as_object_mut)
                            .and_then(|s| s.get_mut(&name))
                            .and_then(Value::as_object_mut)
                    } else {
                        talent_entry_mut(&self.catalogs, hero, &name)
                    };
                    if let Some(entry) = entry {
                        if string(entry, "temporary:primary_origin") == Some(origin.as_str()) {
                            entry.remove("primary");
                            entry.remove("temporary:primary_origin");
                        }
                    }
                }
            }
        }
        choice.insert("temporary:applied".into(), Value::Bool(false));
        put_choice(state, choice_ref, choice);
        Ok(())
    }

    /// Route a value delta to the category's target kind.
    fn adjust_target(&self, state: &mut GenerationState, category: &str, name: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        let hero = state.doc.hero_mut();
        if category == "spells" || category == "house_spells" {
            adjust_spell(hero, name, delta);
        } else {
            adjust_talent(&self.catalogs, hero, name, delta);
        }
    }

    /// Replace wildcard rows with the concrete language/script talents.
    fn expand_wildcards(&self, choice: &mut JsonMap) {
        let Some(options) = choice.get_mut("options").and_then(Value::as_array_mut) else {
            return;
        };
        let mut expanded = Vec::with_capacity(options.len());
        for option in options.iter() {
            match option.as_str() {
                Some("any foreign language") => {
                    for name in self.catalogs.languages(false) {
                        expanded.push(Value::from(name));
                    }
                }
                Some("any foreign script") => {
                    for name in self.catalogs.languages(true) {
                        expanded.push(Value::from(name));
                    }
                }
                _ => expanded.push(option.clone()),
            }
        }
        expanded.dedup();
        *options = expanded;
    }

    fn get(&self, state: &GenerationState, choice_ref: &ChoiceRef) -> Result<JsonMap, EngineError> {
        obj(state.doc.scratch(), &choice_ref.section)
            .and_then(|record| obj(record, &choice_ref.category))
            .and_then(|category| arr(category, "choice"))
            .and_then(|choices| choices.get(choice_ref.index))
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSelection { path: choice_ref.origin() })
    }
}

fn put_choice(state: &mut GenerationState, choice_ref: &ChoiceRef, choice: JsonMap) {
    let Some(choices) = state
        .doc
        .scratch_mut()
        .get_mut(&choice_ref.section)
        .and_then(Value::as_object_mut)
        .and_then(|record| record.get_mut(&choice_ref.category))
        .and_then(Value::as_object_mut)
        .and_then(|category| category.get_mut("choice"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    if let Some(slot) = choices.get_mut(choice_ref.index) {
        *slot = Value::Object(choice);
    }
}

fn option_names(choice: &JsonMap) -> Vec<String> {
    arr(choice, "options")
        .map(|options| {
            options.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
        .unwrap_or_default()
}

fn trait_category(category: &str) -> Result<TraitCategory, EngineError> {
    TraitCategory::from_key(category)
        .ok_or_else(|| EngineError::invalid(format!("'{category}' offers no exclusive picks")))
}

fn grid_chosen(choice: &JsonMap) -> Vec<Vec<i64>> {
    arr(choice, "chosen")
        .map(|groups| {
            groups
                .iter()
                .map(|group| {
                    group
                        .as_array()
                        .map(|cols| {
                            cols.iter().map(|c| c.as_i64().unwrap_or(UNASSIGNED)).collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn store_grid_chosen(choice: &mut JsonMap, chosen: &[Vec<i64>]) {
    let stored: Vec<Value> = chosen
        .iter()
        .map(|group| Value::Array(group.iter().map(|row| Value::from(*row)).collect()))
        .collect();
    choice.insert("chosen".into(), Value::Array(stored));
}

fn next_free_column(columns: &[i64], from: usize) -> Option<usize> {
    let len = columns.len();
    (1..len)
        .map(|offset| (from + offset) % len)
        .find(|c| columns[*c] == UNASSIGNED)
}

fn adjust_spell(hero: &mut JsonMap, name: &str, delta: i64) {
    let spells = ensure_obj(hero, "spells");
    let created = !spells.contains_key(name);
    let entry = ensure_obj(spells, name);
    if created {
        entry.insert("temporary:choice_only".into(), Value::Bool(true));
    }
    add_int(entry, "value", delta);
    let collapses = bool_or(entry, "temporary:choice_only", false)
        && int_or(entry, "value", 0) == 0
        && !bool_or(entry, "primary", false);
    if collapses {
        spells.remove(name);
    }
}

fn talent_entry_mut<'a>(
    catalogs: &Catalogs,
    hero: &'a mut JsonMap,
    name: &str,
) -> Option<&'a mut JsonMap> {
    let group = catalogs.talent_group(name)?.to_string();
    hero.get_mut("talents")
        .and_then(Value::as_object_mut)?
        .get_mut(&group)
        .and_then(Value::as_object_mut)?
        .get_mut(name)
        .and_then(Value::as_object_mut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::GenerationSettings;
    use serde_json::json;

    fn as_map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn catalogs() -> Catalogs {
        Catalogs {
            advantages: as_map(json!({
                "Luck": { "cost": 5 },
                "Nightvision": { "cost": 4 }
            })),
            talents: as_map(json!({
                "nature": {
                    "Tracking": { "complexity": 1 },
                    "Stalking": { "complexity": 1 }
                },
                "languages": {
                    "Garethi": {},
                    "Isdira": {},
                    "Rogolan": { "native_only": true }
                }
            })),
            spells: as_map(json!({
                "Ignifaxius": { "complexity": 3 },
                "Fulminictus": { "complexity": 2 }
            })),
            ..Default::default()
        }
    }

    fn state_with_choice(category: &str, choice: Value) -> GenerationState {
        let mut state = GenerationState::new(
            std::sync::Arc::new(catalogs()),
            GenerationSettings::default(),
        );
        let record = json!({ category: { "choice": [choice] } });
        state
            .doc
            .scratch_mut()
            .insert("profession".into(), record);
        state
    }

    #[test]
    fn exclusive_pick_switches_atomically() {
        let mut state = state_with_choice(
            "advantages",
            json!({ "options": ["Luck", "Nightvision"] }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "advantages", 0);
        resolver.pick(&mut state, &choice_ref, 0).unwrap();
        assert!(obj(state.doc.hero(), "advantages").unwrap().contains_key("Luck"));
        resolver.pick(&mut state, &choice_ref, 1).unwrap();
        let advantages = obj(state.doc.hero(), "advantages").unwrap();
        assert!(!advantages.contains_key("Luck"));
        assert!(advantages.contains_key("Nightvision"));
    }

    #[test]
    fn grid_bumps_displaced_row_to_next_free_column() {
        let mut state = state_with_choice(
            "talents",
            json!({ "options": ["Tracking", "Stalking"], "values": [[-1, 0, 1]] }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "talents", 0);
        let mut choice = resolver.get(&state, &choice_ref).unwrap();
        ensure_resolution(&mut choice);
        put_choice(&mut state, &choice_ref, choice);

        // Tracking takes the +1 column, then Stalking displaces it.
        resolver.assign(&mut state, &choice_ref, 0, 2, 0).unwrap();
        resolver.assign(&mut state, &choice_ref, 0, 2, 1).unwrap();
        let choice = resolver.get(&state, &choice_ref).unwrap();
        let chosen = grid_chosen(&choice);
        assert_eq!(chosen[0][2], 1);
        // Tracking landed on the next free column (-1).
        assert_eq!(chosen[0][0], 0);
        let talents = obj(obj(state.doc.hero(), "talents").unwrap(), "nature").unwrap();
        assert_eq!(int_or(obj(talents, "Stalking").unwrap(), "value", 0), 1);
        assert_eq!(int_or(obj(talents, "Tracking").unwrap(), "value", 0), -1);
    }

    #[test]
    fn clearing_a_grid_column_does_not_relocate_the_row() {
        let mut state = state_with_choice(
            "talents",
            json!({ "options": ["Tracking", "Stalking"], "values": [[-1, 0, 1]] }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "talents", 0);
        let mut choice = resolver.get(&state, &choice_ref).unwrap();
        ensure_resolution(&mut choice);
        put_choice(&mut state, &choice_ref, choice);

        resolver.assign(&mut state, &choice_ref, 0, 2, 0).unwrap();
        resolver.assign(&mut state, &choice_ref, 0, 2, UNASSIGNED).unwrap();
        let choice = resolver.get(&state, &choice_ref).unwrap();
        let chosen = grid_chosen(&choice);
        assert_eq!(chosen[0], vec![UNASSIGNED, UNASSIGNED, UNASSIGNED]);
        // The +1 on Tracking was reverted, not moved to another column.
        let tracking = obj(state.doc.hero(), "talents")
            .and_then(|pages| obj(pages, "nature"))
            .and_then(|page| obj(page, "Tracking"));
        assert!(tracking.is_none());
    }

    #[test]
    fn alternative_groups_are_mutually_exclusive() {
        let mut state = state_with_choice(
            "talents",
            json!({ "options": ["Tracking", "Stalking"], "values": [[2], [1, 1]] }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "talents", 0);
        let mut choice = resolver.get(&state, &choice_ref).unwrap();
        ensure_resolution(&mut choice);
        put_choice(&mut state, &choice_ref, choice);

        resolver.assign(&mut state, &choice_ref, 0, 0, 0).unwrap();
        resolver.assign(&mut state, &choice_ref, 1, 0, 1).unwrap();
        let choice = resolver.get(&state, &choice_ref).unwrap();
        let chosen = grid_chosen(&choice);
        assert_eq!(chosen[0][0], UNASSIGNED);
        assert_eq!(chosen[1][0], 1);
        // The first group's +2 on Tracking was fully reverted.
        let talents = obj(obj(state.doc.hero(), "talents").unwrap(), "nature").unwrap();
        assert!(!talents.contains_key("Tracking"));
    }

    #[test]
    fn pool_tracks_complexity_weighted_spending() {
        let mut state = state_with_choice(
            "spells",
            json!({
                "options": ["Ignifaxius", "Fulminictus"],
                "points": 8,
                "complexity_weighted": true,
                "min": 0,
                "max": 4
            }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "spells", 0);
        resolver.set_value(&mut state, &choice_ref, "Ignifaxius", 2).unwrap();
        // 2 units at complexity 3.
        assert_eq!(resolver.pool_remaining(&state, &choice_ref), 2);
        resolver.set_value(&mut state, &choice_ref, "Fulminictus", 1).unwrap();
        assert_eq!(resolver.pool_remaining(&state, &choice_ref), 0);
        assert!(resolver.resolved(&state, &choice_ref));
    }

    #[test]
    fn external_primary_blocks_the_toggle() {
        let mut state = state_with_choice(
            "spells",
            json!({
                "options": ["Ignifaxius"],
                "points": 3,
                "primary_spells": 1
            }),
        );
        let hero = state.doc.hero_mut();
        let entry = ensure_obj(ensure_obj(hero, "spells"), "Ignifaxius");
        entry.insert("primary".into(), Value::Bool(true));
        entry.insert("temporary:primary_origin".into(), Value::from("rule"));

        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "spells", 0);
        let result = resolver.toggle_primary(&mut state, &choice_ref, "Ignifaxius", true);
        assert!(matches!(result, Err(EngineError::InvalidSelection { .. })));
        // The external marker stays untouched.
        let entry = obj(obj(state.doc.hero(), "spells").unwrap(), "Ignifaxius").unwrap();
        assert!(bool_or(entry, "primary", false));
    }

    #[test]
    fn refused_primary_toggle_leaves_no_spell_entry() {
        let mut state = state_with_choice(
            "spells",
            json!({
                "options": ["Ignifaxius", "Fulminictus"],
                "points": 3,
                "primary_spells": 1
            }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "spells", 0);
        resolver.toggle_primary(&mut state, &choice_ref, "Ignifaxius", true).unwrap();
        let result = resolver.toggle_primary(&mut state, &choice_ref, "Fulminictus", true);
        assert!(matches!(result, Err(EngineError::InvalidSelection { .. })));
        let spells = obj(state.doc.hero(), "spells").unwrap();
        assert!(!spells.contains_key("Fulminictus"));

        // Toggling off removes the marker-only entry outright.
        resolver.toggle_primary(&mut state, &choice_ref, "Ignifaxius", false).unwrap();
        let ghost = obj(state.doc.hero(), "spells")
            .and_then(|spells| obj(spells, "Ignifaxius"));
        assert!(ghost.is_none());
    }

    #[test]
    fn wildcard_rows_expand_to_foreign_languages() {
        let state = state_with_choice(
            "languages",
            json!({ "options": ["any foreign language"], "points": 4 }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "languages", 0);
        let mut choice = resolver.get(&state, &choice_ref).unwrap();
        resolver.expand_wildcards(&mut choice);
        let options = option_names(&choice);
        assert_eq!(options, vec!["Garethi".to_string(), "Isdira".to_string()]);
    }

    #[test]
    fn suspend_and_initialize_round_trip() {
        let mut state = state_with_choice(
            "talents",
            json!({ "options": ["Tracking", "Stalking"], "values": [[1, 2]] }),
        );
        let resolver = ChoiceResolver::from_state(&state);
        let choice_ref = ChoiceRef::new("profession", "talents", 0);
        resolver.initialize(&mut state).unwrap();
        resolver.assign(&mut state, &choice_ref, 0, 1, 0).unwrap();
        let applied = state.doc.hero().clone();

        resolver.suspend(&mut state).unwrap();
        let talents = obj(state.doc.hero(), "talents").and_then(|t| obj(t, "nature"));
        assert!(talents.is_none_or(|t| !t.contains_key("Tracking")));

        resolver.initialize(&mut state).unwrap();
        assert_eq!(state.doc.hero(), &applied);
    }
}
