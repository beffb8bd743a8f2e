//! Ports - Interfaces for external collaborators
//!
//! These traits define the contracts that infrastructure adapters must
//! implement. Application services depend on these traits, not concrete
//! implementations.

use anyhow::Result;

use crate::domain::document::JsonMap;

/// Store port for completed (or in-progress) hero records
///
/// The engine hands over a fully reconciled, temporary-key-stripped record
/// at commit time and may load one back to resume a build.
pub trait CharacterStorePort: Send + Sync {
    /// Load a hero record by character name
    fn load(&self, name: &str) -> Result<Option<JsonMap>>;

    /// Save a hero record under the character's name
    fn save(&self, name: &str, hero: &JsonMap) -> Result<()>;
}
