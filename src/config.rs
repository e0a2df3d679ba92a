//! Engine configuration
//!
//! Buffer size and size caps are caller-supplied values rather than
//! constants. An [`EngineConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! [archive]
//! buffer_size = 65536
//! max_entry_size = 10485760
//! max_total_size = 524288000
//! compression = "deflated"
//!
//! [validation]
//! min_valid_ratio = 0.9
//!
//! [restore]
//! table_order = ["facilities", "clients", "checkups"]
//! ```

use crate::archive::CompressionMethod;
use crate::error::{Result, SnapError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default streaming buffer (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default per-entry cap (10 MiB)
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 10 * 1024 * 1024;

/// Default whole-archive cap (500 MiB)
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 500 * 1024 * 1024;

/// Below this share of hash-valid entries a validation result carries a
/// summary warning
pub const DEFAULT_MIN_VALID_RATIO: f64 = 0.90;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub archive: ArchiveConfig,
    pub validation: ValidationConfig,
    pub restore: RestoreConfig,
}

/// Archive builder/extractor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Fixed read buffer used for the fused hash + compress pass
    pub buffer_size: usize,

    /// Sources larger than this are skipped
    pub max_entry_size: u64,

    /// The build stops accepting entries once this many bytes are written
    pub max_total_size: u64,

    /// Compression for regular entries
    pub compression: CompressionMethod,

    /// Store already-compressed payloads (jpg, png, zip, ...) as-is
    pub store_precompressed: bool,

    /// Recompute entry hashes during extraction
    pub verify_on_extract: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            compression: CompressionMethod::Deflated,
            store_precompressed: true,
            verify_on_extract: true,
        }
    }
}

/// Integrity validator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_valid_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_valid_ratio: DEFAULT_MIN_VALID_RATIO,
        }
    }
}

/// Restore orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Tables in application order; referenced tables come first
    pub table_order: Vec<String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            table_order: DEFAULT_TABLE_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Facilities own clients, clients own checkups, checkups own their
/// photo and signature records.
pub const DEFAULT_TABLE_ORDER: &[&str] =
    &["facilities", "clients", "checkups", "photos", "signatures"];

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SnapError::at_path(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let archive = &self.archive;
        if archive.buffer_size == 0 {
            return Err(SnapError::Config("archive.buffer_size must be > 0".into()));
        }
        if archive.max_entry_size > archive.max_total_size {
            return Err(SnapError::Config(format!(
                "archive.max_entry_size ({}) exceeds archive.max_total_size ({})",
                archive.max_entry_size, archive.max_total_size
            )));
        }

        let ratio = self.validation.min_valid_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(SnapError::Config(format!(
                "validation.min_valid_ratio must be in (0, 1], got {}",
                ratio
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for table in &self.restore.table_order {
            if !seen.insert(table.as_str()) {
                return Err(SnapError::Config(format!(
                    "restore.table_order lists {} twice",
                    table
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [archive]
            max_entry_size = 1024
            compression = "zstd"
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.max_entry_size, 1024);
        assert_eq!(config.archive.compression, CompressionMethod::Zstd);
        assert_eq!(config.archive.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.validation.min_valid_ratio, DEFAULT_MIN_VALID_RATIO);
        assert_eq!(config.restore.table_order.len(), DEFAULT_TABLE_ORDER.len());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let err = EngineConfig::from_toml_str("[archive]\nbuffer_size = 0\n").unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let err =
            EngineConfig::from_toml_str("[validation]\nmin_valid_ratio = 1.5\n").unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_rejects_entry_cap_above_total_cap() {
        let err = EngineConfig::from_toml_str(
            "[archive]\nmax_entry_size = 100\nmax_total_size = 10\n",
        )
        .unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_table() {
        let err = EngineConfig::from_toml_str(
            "[restore]\ntable_order = [\"clients\", \"clients\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("[archive"),
            Err(SnapError::Config(_))
        ));
    }
}
