//! Shared generation state
//!
//! One build in progress: the document, the ledger, and the injected
//! read-only collaborators. Exclusively owned by a single engine instance;
//! nothing here is shared across builds.

use std::sync::Arc;

use crate::application::catalog::Catalogs;
use crate::application::services::special_rules::SpecialRuleRegistry;
use crate::domain::document::{ensure_obj, obj, JsonMap};
use crate::domain::value_objects::GenerationSettings;
use crate::domain::{BuildDocument, CostLedger};

/// Scratch keys for the merged rule records of the four selectors.
pub const RKP_SECTIONS: [&str; 4] = ["race", "culture", "profession", "bonus_profession"];

#[derive(Clone)]
pub struct GenerationState {
    pub doc: BuildDocument,
    pub ledger: CostLedger,
    pub catalogs: Arc<Catalogs>,
    pub settings: GenerationSettings,
    pub rules: Arc<SpecialRuleRegistry>,
}

impl GenerationState {
    pub fn new(catalogs: Arc<Catalogs>, settings: GenerationSettings) -> Self {
        Self {
            doc: BuildDocument::new(),
            ledger: CostLedger::new(settings.starting_budget),
            catalogs,
            settings,
            rules: Arc::new(SpecialRuleRegistry::standard()),
        }
    }

    /// Merged rule record for one selector, if selected.
    pub fn rkp_section(&self, section: &str) -> Option<&JsonMap> {
        obj(self.doc.scratch(), section).filter(|record| !record.is_empty())
    }

    /// Persisted selection paths, keyed by selector.
    pub fn selections(&self) -> Option<&JsonMap> {
        obj(self.doc.scratch(), "selections")
    }

    pub fn selections_mut(&mut self) -> &mut JsonMap {
        ensure_obj(self.doc.scratch_mut(), "selections")
    }
}
