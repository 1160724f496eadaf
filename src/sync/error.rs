use thiserror::Error;

use crate::api::RemoteError;
use crate::cache::StoreError;

/// Errors surfaced to the rendering layer.
///
/// Remote and storage failures are forwarded unchanged; nothing here retries.
#[derive(Error, Debug)]
pub enum SyncError {
  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("Local store unavailable: {0}")]
  StorageUnavailable(String),

  #[error(transparent)]
  Storage(StoreError),

  #[error("Restaurant {0} does not exist")]
  NotFound(i64),

  #[error("Invalid review: {0}")]
  InvalidReview(String),
}

impl From<StoreError> for SyncError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::Unavailable(reason) => SyncError::StorageUnavailable(reason),
      other => SyncError::Storage(other),
    }
  }
}
