//! File-backed character store
//!
//! One JSON file per character under the store directory, stamped with the
//! save time. The stamp lives outside the `temporary:` namespace on purpose:
//! it is persisted metadata, not generation bookkeeping, and is dropped
//! again on load.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::application::ports::CharacterStorePort;
use crate::domain::document::JsonMap;

const SAVED_AT_KEY: &str = "saved_at";

pub struct FileCharacterStore {
    dir: PathBuf,
}

impl FileCharacterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl CharacterStorePort for FileCharacterStore {
    fn load(&self, name: &str) -> Result<Option<JsonMap>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading character file {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing character file {}", path.display()))?;
        match value {
            Value::Object(mut hero) => {
                hero.remove(SAVED_AT_KEY);
                Ok(Some(hero))
            }
            _ => anyhow::bail!("character file {} is not a JSON object", path.display()),
        }
    }

    fn save(&self, name: &str, hero: &JsonMap) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating store directory {}", self.dir.display()))?;
        let mut record = hero.clone();
        record.insert(SAVED_AT_KEY.into(), Value::String(Utc::now().to_rfc3339()));
        let path = self.path_for(name);
        let text = serde_json::to_string_pretty(&record)?;
        fs::write(&path, text)
            .with_context(|| format!("writing character file {}", path.display()))?;
        info!(name, path = %path.display(), "character written");
        Ok(())
    }
}
