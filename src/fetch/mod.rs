//! Retrieval of historical samples with caching, single-flight and retries.

pub mod disk_store;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod memory_cache;
pub mod retry;
