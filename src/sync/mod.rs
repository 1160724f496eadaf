//! Sync coordination between the local store and the REST API.
//!
//! The [`SyncCoordinator`] answers reads from the cache first and keeps it
//! fresh through a background [`Reconciler`]. Writes go to the local store
//! first and are sent to the server, or queued while offline and replayed
//! when connectivity returns.

mod coordinator;
mod error;
mod filter;
mod pending;
mod reconciler;

pub use coordinator::{ReplaySummary, SyncCoordinator, SyncOptions};
pub use error::SyncError;
pub use filter::{distinct, RestaurantFilter, ALL};
pub use pending::PendingWrite;
pub use reconciler::{
  reconcile, ReconcileOutcome, ReconcileScope, ReconcileStatus, Reconciler, ReconcilerHandle,
  RecordBatch,
};
