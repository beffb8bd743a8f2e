//! Origin stage: race, culture, profession, bonus track.

use crate::application::services::rkp_resolver::RkpResolver;
use crate::application::services::stages::{Stage, StageId};
use crate::application::services::state::GenerationState;
use crate::error::EngineError;

pub struct RkpStage {
    resolver: Option<RkpResolver>,
}

impl RkpStage {
    pub fn new() -> Self {
        Self { resolver: None }
    }

    /// The live resolver; present while the stage is active.
    pub fn resolver_mut(&mut self) -> Option<&mut RkpResolver> {
        self.resolver.as_mut()
    }

    pub fn resolver(&self) -> Option<&RkpResolver> {
        self.resolver.as_ref()
    }
}

impl Default for RkpStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for RkpStage {
    fn id(&self) -> StageId {
        StageId::Rkp
    }

    fn activate(&mut self, state: &mut GenerationState) -> Result<(), EngineError> {
        let mut resolver = RkpResolver::new(&state.catalogs);
        resolver.restore(state);
        self.resolver = Some(resolver);
        Ok(())
    }

    fn deactivate(
        &mut self,
        state: &mut GenerationState,
        forward: bool,
    ) -> Result<(), EngineError> {
        if forward {
            if let Some(resolver) = &self.resolver {
                resolver.commit(state)?;
            }
        }
        // Selections and their costs persist either way.
        self.resolver = None;
        Ok(())
    }

    fn can_advance(&self, state: &GenerationState) -> bool {
        self.resolver.as_ref().is_some_and(|resolver| resolver.can_advance(state))
    }
}
