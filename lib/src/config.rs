//! Defines the configuration for a quadlog catalog.
//! A `Config` names the root directory that holds every store and controls how
//! generations are written to disk.

use crate::consts::{CONFIG_FILE, IMPORT_DIR, STORES_DIR};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub root: PathBuf,
    // if true, stores live only in memory and nothing is written under root
    #[serde(default)]
    pub temporary: bool,
    // zstd-compress generation files
    #[serde(default = "default_true")]
    pub compress: bool,
    // fsync generation files and manifests before they are published
    #[serde(default = "default_true")]
    pub sync_writes: bool,
    // where import sources are read from and export targets are written to
    #[serde(default)]
    pub import_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding one sub-directory per store.
    pub fn stores_dir(&self) -> PathBuf {
        self.root.join(STORES_DIR)
    }

    /// Directory used to resolve import sources and export targets.
    pub fn import_dir(&self) -> PathBuf {
        self.import_dir
            .clone()
            .unwrap_or_else(|| self.root.join(IMPORT_DIR))
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Prints out the current Config in a clear and readable way for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Root: {}", self.root.display());
        println!("  Import directory: {}", self.import_dir().display());
        println!("  Temporary: {}", self.temporary);
        println!("  Compress generations: {}", self.compress);
        println!("  Sync writes: {}", self.sync_writes);
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigBuilder {
    root: Option<PathBuf>,
    temporary: Option<bool>,
    compress: Option<bool>,
    sync_writes: Option<bool>,
    import_dir: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn root(mut self, root: PathBuf) -> Self {
        self.root = Some(root);
        self
    }

    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = Some(temporary);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = Some(sync_writes);
        self
    }

    pub fn import_dir(mut self, import_dir: PathBuf) -> Self {
        self.import_dir = Some(import_dir);
        self
    }

    pub fn build(self) -> Result<Config> {
        let root = self
            .root
            .ok_or_else(|| anyhow!("A root directory is required to build a Config"))?;
        Ok(Config {
            root,
            temporary: self.temporary.unwrap_or(false),
            compress: self.compress.unwrap_or(true),
            sync_writes: self.sync_writes.unwrap_or(true),
            import_dir: self.import_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builder_requires_root() {
        assert!(Config::builder().temporary(true).build().is_err());
    }

    #[test]
    fn builder_defaults() {
        let config = Config::builder()
            .root(PathBuf::from("/data/quads"))
            .build()
            .unwrap();
        assert!(!config.temporary);
        assert!(config.compress);
        assert!(config.sync_writes);
        assert_eq!(config.import_dir(), PathBuf::from("/data/quads/import"));
        assert_eq!(config.stores_dir(), PathBuf::from("/data/quads/stores"));
    }

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let config = Config::builder()
            .root(dir.path().to_path_buf())
            .compress(false)
            .import_dir(dir.path().join("incoming"))
            .build()
            .unwrap();
        let path = dir.path().join("config.json");
        config.save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
