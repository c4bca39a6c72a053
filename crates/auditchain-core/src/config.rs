//! Ledger configuration, loaded from TOML.
//!
//! Every section is optional; omitted values take the defaults below.
//!
//! ```toml
//! [store]
//! backend = "sqlite"          # "memory" | "filesystem" | "sqlite"
//! path = "/var/lib/auditchain/ledger.db"
//!
//! [append]
//! max_attempts = 3
//!
//! [verify]
//! max_limit = 10000
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use auditchain_contracts::error::{LedgerError, LedgerResult};

use crate::head::DEFAULT_MAX_ATTEMPTS;

/// Verification walks longer than this are truncated unless configured.
pub const DEFAULT_VERIFY_MAX_LIMIT: u64 = 10_000;

/// Which `ChainStore` backs the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// Process-local, lost on exit.  Tests and dry runs.
    #[default]
    Memory,
    /// Content-addressed WORM files under a root directory.
    Filesystem,
    /// A single SQLite database file.
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Filesystem => "filesystem",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StoreBackend::Memory),
            "filesystem" | "fs" => Ok(StoreBackend::Filesystem),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(LedgerError::Config {
                reason: format!("unknown store backend '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory (filesystem) or database file (sqlite).
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendConfig {
    /// Total attempts per append, including the first.
    pub max_attempts: u32,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Upper bound on entries examined by one `verify` or range read.
    pub max_limit: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_VERIFY_MAX_LIMIT,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub append: AppendConfig,
    pub verify: VerifyConfig,
}

impl LedgerConfig {
    /// Parse and validate a TOML document.
    ///
    /// Returns `LedgerError::Config` for malformed TOML or invalid values.
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse ledger TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the TOML file at `path`.
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject values the ledger cannot run with.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.append.max_attempts == 0 {
            return Err(LedgerError::Config {
                reason: "append.max_attempts must be at least 1".to_string(),
            });
        }
        if self.verify.max_limit == 0 {
            return Err(LedgerError::Config {
                reason: "verify.max_limit must be at least 1".to_string(),
            });
        }
        if self.store.backend != StoreBackend::Memory && self.store.path.is_none() {
            return Err(LedgerError::Config {
                reason: format!(
                    "store.path is required for the '{}' backend",
                    self.store.backend.as_str()
                ),
            });
        }
        Ok(())
    }
}
