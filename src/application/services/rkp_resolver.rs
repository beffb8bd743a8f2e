//! Race/culture/profession resolution
//!
//! Owns the three selector trees and the merged rule records in the
//! document's scratch area. Selecting a node merges its parent chain and
//! chosen variants into one record, replaces the selector's cost in the
//! ledger, and re-runs suggestion/possibility propagation on the other
//! selectors. The bonus track is a fourth, profession-shaped pick.

use serde_json::Value;
use tracing::{debug, instrument};

use crate::application::catalog::Catalogs;
use crate::application::services::dedup::DeduplicationEngine;
use crate::application::services::merge::collect_modifications;
use crate::application::services::requirements::requirements_met;
use crate::application::services::state::GenerationState;
use crate::domain::document::{
    arr, ensure_obj, int_or, obj, string, JsonMap,
};
use crate::domain::entities::{DirectState, NodeId, RuleNode, RuleTree, SelectorKind};
use crate::error::EngineError;

/// Fields where the deepest node in the chain wins; object values overlay
/// per key instead of replacing wholesale.
const OVERRIDDEN_KEYS: [&str; 17] = [
    "prerequisites",
    "advantages",
    "disadvantages",
    "special_abilities",
    "cheaper_special_abilities",
    "primary_talents",
    "equipment",
    "suggested_cultures",
    "possible_cultures",
    "professions",
    "races",
    "names",
    "area_lore",
    "colors",
    "size",
    "weight",
    "time_consuming",
];

/// Fields summed across the whole chain.
const ACCUMULATED_KEYS: [&str; 6] = [
    "attribute_changes",
    "base_value_changes",
    "talents",
    "spells",
    "house_spells",
    "languages",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusTrack {
    /// Second profession from the full catalog, minus the current root.
    BroadEducation,
    /// Deeper pick inside the current profession's subtree.
    Veteran,
}

impl BonusTrack {
    pub fn advantage_name(self) -> &'static str {
        match self {
            Self::BroadEducation => "Breitgefächerte Bildung",
            Self::Veteran => "Veteran",
        }
    }

    pub fn advantage_cost(self) -> i64 {
        match self {
            Self::BroadEducation => 7,
            Self::Veteran => 3,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::BroadEducation => "broad_education",
            Self::Veteran => "veteran",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "broad_education" => Some(Self::BroadEducation),
            "veteran" => Some(Self::Veteran),
            _ => None,
        }
    }
}

pub struct RkpResolver {
    races: RuleTree,
    cultures: RuleTree,
    professions: RuleTree,
    /// Re-entrancy guard: propagation must never trigger itself.
    rebuilding: bool,
}

impl RkpResolver {
    pub fn new(catalogs: &Catalogs) -> Self {
        Self {
            races: RuleTree::build(SelectorKind::Race, &catalogs.races),
            cultures: RuleTree::build(SelectorKind::Culture, &catalogs.cultures),
            professions: RuleTree::build(SelectorKind::Profession, &catalogs.professions),
            rebuilding: false,
        }
    }

    pub fn races(&self) -> &RuleTree {
        &self.races
    }

    pub fn cultures(&self) -> &RuleTree {
        &self.cultures
    }

    pub fn professions(&self) -> &RuleTree {
        &self.professions
    }

    /// Recompute flags from the persisted selections, without touching the
    /// ledger. Used on stage re-activation.
    pub fn restore(&mut self, state: &GenerationState) {
        self.refresh(state, None);
    }

    #[instrument(skip(self, state))]
    pub fn select_race(
        &mut self,
        state: &mut GenerationState,
        path: &[String],
        variants: &[String],
    ) -> Result<(), EngineError> {
        self.select(state, "race", path, variants)
    }

    #[instrument(skip(self, state))]
    pub fn select_culture(
        &mut self,
        state: &mut GenerationState,
        path: &[String],
        variants: &[String],
    ) -> Result<(), EngineError> {
        self.select(state, "culture", path, variants)
    }

    #[instrument(skip(self, state))]
    pub fn select_profession(
        &mut self,
        state: &mut GenerationState,
        path: &[String],
        variants: &[String],
    ) -> Result<(), EngineError> {
        self.select(state, "profession", path, variants)
    }

    fn tree_for(&self, section: &str) -> &RuleTree {
        match section {
            "race" => &self.races,
            "culture" => &self.cultures,
            _ => &self.professions,
        }
    }

    fn select(
        &mut self,
        state: &mut GenerationState,
        section: &str,
        path: &[String],
        variants: &[String],
    ) -> Result<(), EngineError> {
        let tree = self.tree_for(section);
        let (node, variant_ids) = resolve_selection(tree, path, variants)?;
        if !tree.node(node).valid {
            return Err(EngineError::invalid(format!(
                "{} '{}' is not valid for the current build",
                section,
                path.join("/")
            )));
        }

        let cost = tree.cost(node) + variant_ids.iter().map(|v| tree.cost(*v)).sum::<i64>();
        let mut record = build_rkp(tree, node, &variant_ids);
        record.insert("cost".into(), Value::from(cost));
        decorate_record(section, cost, &mut record);

        self.store_selection(state, section, path, variants, cost, record);
        self.refresh(state, Some(section));
        debug!(section, cost, "selector changed");
        Ok(())
    }

    /// Pick the bonus profession. Requires a selected base profession.
    #[instrument(skip(self, state))]
    pub fn select_bonus(
        &mut self,
        state: &mut GenerationState,
        track: BonusTrack,
        path: &[String],
        variants: &[String],
    ) -> Result<(), EngineError> {
        let base_path = self
            .selection_path(state, "profession")
            .ok_or_else(|| EngineError::invalid("bonus track requires a selected profession"))?;
        for section in ["race", "culture", "profession"] {
            if let Some(record) = state.rkp_section(section) {
                if list_contains(record, "disallowed_advantages", track.advantage_name()) {
                    return Err(EngineError::invalid(format!(
                        "'{}' is disallowed by the selected {}",
                        track.advantage_name(),
                        section
                    )));
                }
            }
        }
        match track {
            BonusTrack::BroadEducation => {
                if path.first() == base_path.first() {
                    return Err(EngineError::invalid(
                        "broad education must pick outside the current profession",
                    ));
                }
            }
            BonusTrack::Veteran => {
                let inside = path.len() > base_path.len() && path.starts_with(&base_path);
                if !inside {
                    return Err(EngineError::invalid(
                        "veteran must pick inside the current profession subtree",
                    ));
                }
            }
        }

        let (node, variant_ids) = resolve_selection(&self.professions, path, variants)?;
        let picked_cost = self.professions.cost(node)
            + variant_ids.iter().map(|v| self.professions.cost(*v)).sum::<i64>();
        let cost = picked_cost + track.advantage_cost();
        let mut record = build_rkp(&self.professions, node, &variant_ids);
        record.insert("cost".into(), Value::from(cost));
        record.insert("track".into(), Value::from(track.key()));
        // The track's own advantage is part of the grant.
        ensure_obj(&mut record, "advantages")
            .insert(track.advantage_name().into(), Value::Bool(true));

        self.store_selection(state, "bonus_profession", path, variants, cost, record);
        self.refresh(state, Some("bonus_profession"));
        Ok(())
    }

    /// Undo one selector, refunding its cost.
    pub fn deselect(&mut self, state: &mut GenerationState, section: &str) {
        let old = self.stored_cost(state, section);
        state.ledger.replace(old, 0);
        ensure_obj(state.doc.scratch_mut(), "rkp_costs").remove(section);
        state.doc.scratch_mut().remove(section);
        state.selections_mut().remove(section);
        self.refresh(state, Some(section));
    }

    fn store_selection(
        &self,
        state: &mut GenerationState,
        section: &str,
        path: &[String],
        variants: &[String],
        cost: i64,
        record: JsonMap,
    ) {
        let old = self.stored_cost(state, section);
        state.ledger.replace(old, cost);
        let costs = ensure_obj(state.doc.scratch_mut(), "rkp_costs");
        costs.insert(section.into(), Value::from(cost));
        state.doc.scratch_mut().insert(section.into(), Value::Object(record));
        let selection = serde_json::json!({ "path": path, "variants": variants });
        state.selections_mut().insert(section.into(), selection);
    }

    fn stored_cost(&self, state: &GenerationState, section: &str) -> i64 {
        obj(state.doc.scratch(), "rkp_costs")
            .map(|costs| int_or(costs, section, 0))
            .unwrap_or(0)
    }

    fn selection_path(&self, state: &GenerationState, section: &str) -> Option<Vec<String>> {
        let selection = obj(state.selections()?, section)?;
        Some(
            arr(selection, "path")?
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    /// Re-run propagation on every selector except the one that changed.
    fn refresh(&mut self, state: &GenerationState, changed: Option<&str>) {
        if self.rebuilding {
            return;
        }
        self.rebuilding = true;

        let hero = state.doc.hero().clone();
        let catalogs = state.catalogs.clone();
        let race = state.rkp_section("race").cloned();
        let culture = state.rkp_section("culture").cloned();
        let profession = state.rkp_section("profession").cloned();
        let bonus = state.rkp_section("bonus_profession").cloned();
        let race_names: Vec<String> =
            self.selection_path(state, "race").unwrap_or_default();

        if changed != Some("race") {
            self.races.propagate(&|node| {
                judge_race(&catalogs, &hero, profession.as_ref(), bonus.as_ref(), node)
            });
        }
        if changed != Some("culture") {
            self.cultures
                .propagate(&|node| judge_culture(&catalogs, &hero, race.as_ref(), node));
        }
        if changed != Some("profession") {
            self.professions.propagate(&|node| {
                judge_profession(&catalogs, &hero, culture.as_ref(), &race_names, node)
            });
        }
        self.rebuilding = false;
    }

    /// All three primary selectors picked; the bonus track stays optional.
    pub fn can_advance(&self, state: &GenerationState) -> bool {
        ["race", "culture", "profession"]
            .iter()
            .all(|section| state.rkp_section(section).is_some())
    }

    /// Commit the stage: write biography fields from the merged records and
    /// rebuild the collected hero categories.
    pub fn commit(&self, state: &mut GenerationState) -> Result<(), EngineError> {
        let mut labels = Vec::new();
        for section in ["race", "culture", "profession"] {
            let label = state
                .rkp_section(section)
                .and_then(|record| string(record, "name"))
                .map(str::to_string);
            labels.push((section, label));
        }
        let biography = ensure_obj(state.doc.hero_mut(), "biography");
        for (section, label) in labels {
            match label {
                Some(label) => {
                    biography.insert(section.into(), Value::from(label));
                }
                None => {
                    biography.remove(section);
                }
            }
        }
        DeduplicationEngine::from_state(state).collect_all(state)
    }
}

/// Resolve a root path plus variant names against one tree.
fn resolve_selection(
    tree: &RuleTree,
    path: &[String],
    variants: &[String],
) -> Result<(NodeId, Vec<NodeId>), EngineError> {
    let node = tree
        .find_path(path)
        .ok_or_else(|| EngineError::UnknownSelection { path: path.join("/") })?;
    let mut variant_ids = Vec::with_capacity(variants.len());
    for name in variants {
        let id = tree.find_variant(node, name).ok_or_else(|| EngineError::UnknownSelection {
            path: format!("{}/{}", path.join("/"), name),
        })?;
        variant_ids.push(id);
    }
    Ok((node, variant_ids))
}

/// Merge the parent chain and the selected variants into one record.
/// Scalar and structured fields follow child-wins overlay; modifier lists
/// accumulate by summation, with symmetric deltas cancelling.
pub fn build_rkp(tree: &RuleTree, node: NodeId, variants: &[NodeId]) -> JsonMap {
    let mut record = JsonMap::new();
    let mut chain = tree.chain(node);
    chain.extend_from_slice(variants);

    for id in &chain {
        let data = &tree.node(*id).data;
        for (key, value) in data {
            if key == "cost" || key == "combinable" {
                continue;
            }
            if ACCUMULATED_KEYS.contains(&key.as_str()) {
                if let Some(source) = value.as_object() {
                    let entry = ensure_obj(&mut record, key);
                    collect_modifications(entry, source);
                    if entry.is_empty() {
                        record.remove(key);
                    }
                }
                continue;
            }
            if OVERRIDDEN_KEYS.contains(&key.as_str()) {
                overlay(&mut record, key, value);
                continue;
            }
            record.insert(key.clone(), value.clone());
        }
    }

    let display: Vec<String> =
        chain.iter().map(|id| tree.node(*id).name.clone()).collect();
    record.insert("name".into(), Value::from(display.join(", ")));
    record
}

fn overlay(record: &mut JsonMap, key: &str, value: &Value) {
    match value {
        Value::Object(source) => {
            let entry = ensure_obj(record, key);
            for (sub_key, sub_value) in source {
                entry.insert(sub_key.clone(), sub_value.clone());
            }
        }
        other => {
            record.insert(key.into(), other.clone());
        }
    }
}

/// Section-specific record fixups after the merge.
fn decorate_record(section: &str, cost: i64, record: &mut JsonMap) {
    if section == "culture" {
        let area = string(record, "area_lore").map(str::to_string);
        if let Some(area) = area {
            let abilities = ensure_obj(record, "special_abilities");
            abilities
                .entry("Ortskenntnis")
                .or_insert_with(|| serde_json::json!({ "selection": area }));
        }
    }
    if section == "profession" && cost > 15 {
        record.insert("time_consuming".into(), Value::Bool(true));
    }
}

fn list_contains(record: &JsonMap, key: &str, name: &str) -> bool {
    arr(record, key)
        .is_some_and(|list| list.iter().filter_map(Value::as_str).any(|n| n == name))
}

fn judge_race(
    catalogs: &Catalogs,
    hero: &JsonMap,
    profession: Option<&JsonMap>,
    bonus: Option<&JsonMap>,
    node: &RuleNode,
) -> DirectState {
    if !requirements_met(catalogs, hero, obj(&node.data, "prerequisites")) {
        return DirectState::Unsuitable;
    }
    for record in [profession, bonus].into_iter().flatten() {
        if record.contains_key("races") && !list_contains(record, "races", &node.name) {
            return DirectState::Unsuitable;
        }
    }
    DirectState::Possible
}

fn judge_culture(
    catalogs: &Catalogs,
    hero: &JsonMap,
    race: Option<&JsonMap>,
    node: &RuleNode,
) -> DirectState {
    if !requirements_met(catalogs, hero, obj(&node.data, "prerequisites")) {
        return DirectState::Unsuitable;
    }
    let Some(race) = race else { return DirectState::Possible };
    if list_contains(race, "suggested_cultures", &node.name) {
        return DirectState::Suggested;
    }
    if list_contains(race, "possible_cultures", &node.name) {
        return DirectState::Possible;
    }
    if race.contains_key("suggested_cultures") || race.contains_key("possible_cultures") {
        return DirectState::Unsuitable;
    }
    DirectState::Possible
}

fn judge_profession(
    catalogs: &Catalogs,
    hero: &JsonMap,
    culture: Option<&JsonMap>,
    race_path: &[String],
    node: &RuleNode,
) -> DirectState {
    if !requirements_met(catalogs, hero, obj(&node.data, "prerequisites")) {
        return DirectState::Unsuitable;
    }
    // The profession's own race restriction.
    if node.data.contains_key("races") && !race_path.is_empty() {
        let allowed = race_path.iter().any(|name| list_contains(&node.data, "races", name));
        if !allowed {
            return DirectState::Unsuitable;
        }
    }
    let Some(culture) = culture else { return DirectState::Possible };
    if !culture.contains_key("professions") {
        return DirectState::Possible;
    }
    if list_contains(culture, "professions", &node.name) {
        DirectState::Suggested
    } else {
        DirectState::Unsuitable
    }
}
