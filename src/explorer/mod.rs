//! Explorer integration module for the chain-data provider.
//!
//! This module provides the client and types for reading chain data from a
//! single trusted explorer endpoint: block ids by height, block headers,
//! address transaction history and unspent-output lookups, plus signed
//! transaction submission.

/// REST client for the explorer API
mod client;
/// Type definitions for explorer data structures
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::ExplorerClient;
pub use types::*;
