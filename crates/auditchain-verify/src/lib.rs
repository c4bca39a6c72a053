//! # auditchain-verify
//!
//! Chain verification for the auditchain ledger.
//!
//! This crate provides [`engine::HashChainVerifier`], which implements the
//! [`auditchain_core::traits::ChainVerifier`] trait.  It walks a bounded
//! range of the chain and checks continuity, linkage and content hashes,
//! stopping at the first break.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use auditchain_verify::HashChainVerifier;
//!
//! let ledger = Ledger::open(store, Box::new(HashChainVerifier::new()), &config)?;
//! let result = ledger.verify(&VerifyStart::from("e1"), 1_000)?;
//! ```

pub mod engine;

pub use engine::HashChainVerifier;
