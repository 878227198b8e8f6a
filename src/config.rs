use crate::Result;
use anyhow::Context;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Site configuration, read once per binary from `config.toml`.
///
/// `site_name` is metadata only (it labels artifacts); nothing in the engine branches on it.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site_name: String,
    pub tables_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read site config \"{}\"", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("malformed site config \"{}\"", path.display()))?;
        Ok(config)
    }

    /// Path of a source table extract. Table files follow the consortium naming scheme
    /// (`clif_<table>.csv`).
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.tables_dir.join(format!("clif_{}.csv", table))
    }

    /// Path of the binary cache for an imported table.
    pub fn cache_path(&self, table: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.bin", table))
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}
