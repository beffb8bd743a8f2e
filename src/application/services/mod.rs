//! Application services - the build use cases
//!
//! Resolvers and stages operate on a shared `GenerationState`; the
//! `CharacterGenerator` sequences them and owns the store port.

pub mod choice_resolver;
pub mod dedup;
pub mod effects;
pub mod generator;
pub mod merge;
pub mod requirements;
pub mod rkp_resolver;
pub mod special_rules;
pub mod stages;
pub mod state;

pub use choice_resolver::ChoiceResolver;
pub use dedup::DeduplicationEngine;
pub use generator::CharacterGenerator;
pub use rkp_resolver::{BonusTrack, RkpResolver};
pub use special_rules::{SpecialRule, SpecialRuleRegistry};
pub use stages::{Stage, StageId};
pub use state::GenerationState;
