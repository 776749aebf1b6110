use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};

use crate::analysis::similarity::ComparisonScope;
use crate::error::{Error, Result};
use crate::fingerprint::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_CATALOG_PATH: &str = "dupe_ledger.db";
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog_path: String,
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub scan: ScanConfig,
    pub similarity: SimilarityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_path: DEFAULT_CATALOG_PATH.to_string(),
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            scan: ScanConfig::default(),
            similarity: SimilarityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hash the target of symbolic links instead of skipping them.
    pub follow_symlinks: bool,
    /// Reuse the previous fingerprint when size and mtime are unchanged.
    /// Disable for integrity-critical runs.
    pub trust_mtime: bool,
    pub chunk_size: usize,
    /// Fingerprint worker threads; 0 uses rayon's default.
    pub workers: usize,
    /// Append tombstones for cataloged files no longer present on disk.
    pub record_vanished: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            trust_mtime: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 0,
            record_vanished: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub threshold: f64,
    pub scope: ComparisonScope,
    pub max_key_fanout: Option<usize>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            scope: ComparisonScope::All,
            max_key_fanout: None,
        }
    }
}

/// Load `DupeLedger.toml` (optional) overlaid with `DUPE_LEDGER_*` env vars.
pub fn load_configuration() -> Result<AppConfig> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("DupeLedger").required(false))
        .add_source(
            Environment::with_prefix("DUPE_LEDGER")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns")
                .try_parsing(true),
        )
        .build()?;
    Ok(builder.try_deserialize::<AppConfig>()?)
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.catalog_path.trim().is_empty() {
            return Err(Error::config("catalog_path must not be empty"));
        }
        if self.scan.chunk_size == 0 {
            return Err(Error::config("scan.chunk_size must be greater than zero"));
        }
        validate_threshold(self.similarity.threshold)?;
        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::config(format!("invalid ignore pattern '{}': {}", pattern, e)))?;
        }
        Ok(())
    }
}

pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::config(format!(
            "similarity threshold {} is outside [0, 1]",
            threshold
        )));
    }
    Ok(())
}
