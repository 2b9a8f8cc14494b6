//! Open/extract policies and engine tuning.
//!
//! The engine only reads configuration; persisting it is the host
//! application's business. [`PakConfig`] can be built in code or parsed
//! from a TOML document the host hands over.

use crate::codec::{DEFAULT_ZSTD_LEVEL, MIN_COMPRESSION_SIZE};
use crate::error::{PakError, Result};
use bitflags::bitflags;
use encoding_rs::Encoding;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Tables smaller than this are extracted sequentially unless overridden
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 8;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PakConfig {
    /// Directory for scratch files; the system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
    pub zstd_level: i32,
    pub min_compression_size: usize,
    /// Worker pool size; available parallelism when unset
    pub worker_threads: Option<usize>,
    pub parallel_threshold: usize,
    /// Encoding label for display-encoded paths (WHATWG label, e.g. "euc-kr")
    pub text_encoding: String,
}

impl Default for PakConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            min_compression_size: MIN_COMPRESSION_SIZE,
            worker_threads: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            text_encoding: "utf-8".to_string(),
        }
    }
}

impl PakConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=22).contains(&self.zstd_level) {
            return Err(PakError::Config(format!(
                "zstd_level must be within 1..=22, got {}",
                self.zstd_level
            )));
        }
        if self.worker_threads == Some(0) {
            return Err(PakError::Config("worker_threads must be at least 1".to_string()));
        }
        self.encoding()?;
        Ok(())
    }

    /// Resolve the configured path text encoding
    pub fn encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.text_encoding.as_bytes()).ok_or_else(|| {
            PakError::Config(format!("unknown text encoding: {}", self.text_encoding))
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// How [`crate::Container::open`] treats the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPolicy {
    /// The archive must exist
    #[default]
    Normal,
    /// Create an empty PAK archive when the path does not exist
    OpenOrCreate,
    /// Create an empty PAK archive; fail if the path exists
    CreateNew,
    /// Tolerate damaged tables and keep whatever parses
    Repair,
}

bitflags! {
    /// Extraction policy
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtractFlags: u32 {
        const OVERRIDE_PERFORMANCE_HINT = 1 << 0;
        const OPEN_AFTER_EXTRACTION = 1 << 1;
        const USE_APP_DATA_SCRATCH_PATH = 1 << 2;
        const SINGLE_THREADED = 1 << 3;
        const EXTRACT_ALL_TO_ONE_FOLDER = 1 << 4;
        const IGNORE_CASE = 1 << 5;
    }
}

impl ExtractFlags {
    pub const NORMAL: Self = Self::empty();
}

/// Options consumed when opening a container
#[derive(Clone, Default)]
pub struct OpenOptions {
    pub policy: OpenPolicy,
    pub passphrase: Option<String>,
    pub editor_passphrase: Option<String>,
    pub ignore_case: bool,
    pub config: PakConfig,
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("policy", &self.policy)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("editor_passphrase", &self.editor_passphrase.as_ref().map(|_| "***"))
            .field("ignore_case", &self.ignore_case)
            .field("config", &self.config)
            .finish()
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: OpenPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn editor_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.editor_passphrase = Some(passphrase.into());
        self
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn config(mut self, config: PakConfig) -> Self {
        self.config = config;
        self
    }
}

/// Options consumed by extraction
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub flags: ExtractFlags,
    pub config: PakConfig,
}

impl ExtractOptions {
    pub fn new(flags: ExtractFlags) -> Self {
        Self {
            flags,
            config: PakConfig::default(),
        }
    }

    pub fn config(mut self, config: PakConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = PakConfig::from_toml_str(
            r#"
            scratch_dir = "/var/tmp/pak"
            zstd_level = 9
            worker_threads = 3
            text_encoding = "euc-kr"
            "#,
        )
        .unwrap();
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/tmp/pak")));
        assert_eq!(config.zstd_level, 9);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.min_compression_size, MIN_COMPRESSION_SIZE);
        assert_eq!(config.encoding().unwrap(), encoding_rs::EUC_KR);
    }

    #[test]
    fn test_defaults_and_validation() {
        let config = PakConfig::from_toml_str("").unwrap();
        assert_eq!(config, PakConfig::default());
        assert!(PakConfig::from_toml_str("zstd_level = 40").is_err());
        assert!(PakConfig::from_toml_str("worker_threads = 0").is_err());
        assert!(PakConfig::from_toml_str("text_encoding = \"klingon\"").is_err());
        assert!(PakConfig::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn test_passphrase_hidden_in_debug() {
        let options = OpenOptions::new().passphrase("topsecret");
        assert!(!format!("{:?}", options).contains("topsecret"));
    }
}
