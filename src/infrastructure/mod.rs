//! Infrastructure layer - filesystem adapters
//!
//! This layer contains:
//! - Catalog loader: read-only rule catalogs from JSON files
//! - Store: JSON-file implementation of the character store port
//! - Settings: layered configuration (file + environment)

pub mod catalog_loader;
pub mod settings;
pub mod store;

pub use catalog_loader::load_catalogs;
pub use settings::load_settings;
pub use store::FileCharacterStore;
