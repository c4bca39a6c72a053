//! # auditchain-core
//!
//! The append path of the auditchain ledger.
//!
//! This crate provides:
//! - The trait seams (`ChainStore`, `ChainVerifier`, `AppendObserver`)
//! - Canonical encoding and SHA-256 linking of entries
//! - The `ChainHeadManager` that serializes appends against the chain tip
//! - The `Ledger` facade that wires everything together
//! - TOML configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auditchain_core::{Ledger, LedgerConfig, TracingObserver};
//! ```

pub mod canonical;
pub mod chain;
pub mod config;
pub mod head;
pub mod ledger;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use chain::{compute_hash, hash_matches, link_hash};
pub use config::{LedgerConfig, StoreBackend, StoreConfig};
pub use head::{AppendOutcome, ChainHeadManager};
pub use ledger::{Ledger, TracingObserver};
pub use traits::{AppendObserver, ChainStore, ChainVerifier};
