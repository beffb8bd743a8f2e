//! Generation stages
//!
//! One stage owns the screen-sized slice of the build the player works on.
//! `activate`/`deactivate` bracket the stage's effects; `forward = false`
//! on deactivation must reverse every cost effect the stage applied, so
//! retreating restores the ledger exactly.

use crate::application::services::state::GenerationState;
use crate::error::EngineError;

pub mod attributes;
pub mod biography;
pub mod choices;
pub mod rkp;
pub mod traits;

pub use attributes::AttributesStage;
pub use biography::BiographyStage;
pub use choices::ChoicesStage;
pub use rkp::RkpStage;
pub use traits::TraitsStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Rkp,
    Attributes,
    Choices,
    Traits,
    Biography,
}

impl StageId {
    pub const ORDER: [StageId; 5] =
        [Self::Rkp, Self::Attributes, Self::Choices, Self::Traits, Self::Biography];

    pub fn next(self) -> Option<Self> {
        let index = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(index + 1).copied()
    }

    pub fn previous(self) -> Option<Self> {
        let index = Self::ORDER.iter().position(|s| *s == self)?;
        index.checked_sub(1).map(|i| Self::ORDER[i])
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Rkp => "origin",
            Self::Attributes => "attributes",
            Self::Choices => "choices",
            Self::Traits => "traits",
            Self::Biography => "biography",
        }
    }
}

pub trait Stage {
    fn id(&self) -> StageId;

    fn activate(&mut self, state: &mut GenerationState) -> Result<(), EngineError>;

    /// Leave the stage. `forward = false` must undo every cost effect.
    fn deactivate(&mut self, state: &mut GenerationState, forward: bool)
        -> Result<(), EngineError>;

    fn can_advance(&self, state: &GenerationState) -> bool;
}
