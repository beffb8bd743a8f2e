//! Domain entities - Core build objects with identity

pub mod choice;
pub mod rule_node;
pub mod trait_entry;

pub use choice::{ChoiceKind, GridSpec, PoolSpec};
pub use rule_node::{DirectState, NodeId, RuleNode, RuleTree, SelectorKind};
pub use trait_entry::{TraitCategory, TraitEntry};
