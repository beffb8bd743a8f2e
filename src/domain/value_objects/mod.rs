//! Value objects - Immutable objects defined by their attributes

pub mod cost;
mod settings;

pub use settings::GenerationSettings;
