//! Local store for offline data access.
//!
//! This module provides a persistent key-value store that:
//! - Keeps restaurants and reviews in named collections keyed by numeric id
//! - Creates each collection (and its secondary index) the first time it is opened
//! - Upserts with last-write-wins semantics
//! - Holds the pending-writes area used while the device is offline

mod error;
mod storage;
mod traits;

pub use error::StoreError;
pub use storage::{CollectionHandle, LocalStore, SCHEMA_VERSION};
pub use traits::{CacheResult, CacheSource, Cacheable, CollectionName};
