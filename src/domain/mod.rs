//! Domain layer - Core build state with no external dependencies
//!
//! This layer contains:
//! - The build document (hero + scratch generation state)
//! - The cost ledger with its sub-budgets
//! - Entities: rule trees, trait entries, choices
//! - Value objects: generation settings, cost curves

pub mod document;
pub mod entities;
pub mod ledger;
pub mod value_objects;

pub use document::BuildDocument;
pub use ledger::{CostLedger, LedgerSnapshot};
