//! Heldengine - DSA 4.1 character generation rules engine
//!
//! The engine drives a single character build through five stages
//! (race/culture/profession, attributes, choices, traits, biography),
//! keeping every cost effect exactly reversible so that backward
//! navigation restores the previous state. Rendering, catalog curation
//! and persistence formats are host concerns; the engine consumes
//! read-only catalogs and a character store port.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::services::CharacterGenerator;
pub use application::Catalogs;
pub use domain::value_objects::GenerationSettings;
pub use error::EngineError;
