//! # auditchain-store
//!
//! `ChainStore` backends for the auditchain ledger.
//!
//! | Backend                | Durability                          | Use                    |
//! |------------------------|-------------------------------------|------------------------|
//! | `MemoryChainStore`     | none                                | tests, dry runs        |
//! | `FilesystemWormStore`  | fsync + no-clobber files            | single host, WORM disk |
//! | `SqliteChainStore`     | WAL, `synchronous = FULL`           | default deployment     |
//!
//! All three expose append, point reads, range reads and trace reads only;
//! none can update or delete a stored entry.

pub mod fs;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

use auditchain_contracts::error::{LedgerError, LedgerResult};
use auditchain_core::{
    config::{StoreBackend, StoreConfig},
    traits::ChainStore,
};

pub use fs::FilesystemWormStore;
pub use memory::MemoryChainStore;
pub use sqlite::SqliteChainStore;

/// Open the store described by `config`.
///
/// Returns `LedgerError::Config` when a persistent backend has no path.
pub fn open_store(config: &StoreConfig) -> LedgerResult<Arc<dyn ChainStore>> {
    let store: Arc<dyn ChainStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryChainStore::new()),
        StoreBackend::Filesystem => Arc::new(FilesystemWormStore::open(required_path(config)?)?),
        StoreBackend::Sqlite => Arc::new(SqliteChainStore::open(required_path(config)?)?),
    };
    info!(backend = store.backend_name(), "chain store ready");
    Ok(store)
}

fn required_path(config: &StoreConfig) -> LedgerResult<&std::path::Path> {
    config.path.as_deref().ok_or_else(|| LedgerError::Config {
        reason: format!(
            "store.path is required for the '{}' backend",
            config.backend.as_str()
        ),
    })
}
