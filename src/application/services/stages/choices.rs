//! Choices stage: resolve the open decisions the merged records left.

use crate::application::services::choice_resolver::ChoiceResolver;
use crate::application::services::stages::{Stage, StageId};
use crate::application::services::state::GenerationState;
use crate::error::EngineError;

pub struct ChoicesStage {
    resolver: Option<ChoiceResolver>,
}

impl ChoicesStage {
    pub fn new() -> Self {
        Self { resolver: None }
    }

    pub fn resolver(&self) -> Option<&ChoiceResolver> {
        self.resolver.as_ref()
    }
}

impl Default for ChoicesStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ChoicesStage {
    fn id(&self) -> StageId {
        StageId::Choices
    }

    fn activate(&mut self, state: &mut GenerationState) -> Result<(), EngineError> {
        let resolver = ChoiceResolver::from_state(state);
        resolver.initialize(state)?;
        self.resolver = Some(resolver);
        Ok(())
    }

    fn deactivate(
        &mut self,
        state: &mut GenerationState,
        forward: bool,
    ) -> Result<(), EngineError> {
        if !forward {
            if let Some(resolver) = &self.resolver {
                resolver.suspend(state)?;
            }
        }
        self.resolver = None;
        Ok(())
    }

    fn can_advance(&self, state: &GenerationState) -> bool {
        self.resolver.as_ref().is_some_and(|resolver| resolver.all_resolved(state))
    }
}
