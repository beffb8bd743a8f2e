//! Catalog loader
//!
//! Reads the rule catalogs from a directory of JSON files, one file per
//! catalog (`races.json`, `talents.json`, ...). Missing files load as empty
//! catalogs so a host can ship a subset; malformed files are fatal.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::application::catalog::Catalogs;
use crate::domain::document::JsonMap;

pub fn load_catalogs(dir: &Path) -> Result<Catalogs> {
    let catalogs = Catalogs {
        races: load_map(dir, "races")?,
        cultures: load_map(dir, "cultures")?,
        professions: load_map(dir, "professions")?,
        advantages: load_map(dir, "advantages")?,
        disadvantages: load_map(dir, "disadvantages")?,
        special_abilities: load_map(dir, "special_abilities")?,
        talents: load_map(dir, "talents")?,
        spells: load_map(dir, "spells")?,
        equipment: load_map(dir, "equipment")?,
        names: load_map(dir, "names")?,
    };
    if catalogs.races.is_empty() || catalogs.cultures.is_empty() || catalogs.professions.is_empty()
    {
        warn!(dir = %dir.display(), "origin catalogs are empty, no build can complete");
    }
    Ok(catalogs)
}

fn load_map(dir: &Path, name: &str) -> Result<JsonMap> {
    let path = dir.join(format!("{name}.json"));
    if !path.exists() {
        debug!(catalog = name, "catalog file absent, loading empty");
        return Ok(JsonMap::new());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading catalog file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing catalog file {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("catalog '{name}' must be a JSON object"),
    }
}
