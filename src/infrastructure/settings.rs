//! Settings loader
//!
//! Layered configuration: built-in defaults, an optional settings file,
//! then `HELDENGINE_*` environment variables, each layer overriding the
//! previous one.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};

use crate::domain::value_objects::GenerationSettings;

pub fn load_settings(file: Option<&Path>) -> Result<GenerationSettings> {
    let mut builder = Config::builder()
        .add_source(Config::try_from(&GenerationSettings::default())?);
    if let Some(file) = file {
        builder = builder.add_source(File::from(file).required(false));
    }
    let settings = builder
        .add_source(Environment::with_prefix("HELDENGINE"))
        .build()
        .context("building settings configuration")?
        .try_deserialize()
        .context("deserializing generation settings")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings, GenerationSettings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "starting_budget = 60\n").unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.starting_budget, 60);
        assert_eq!(settings.attribute_points, 100);
    }
}
