use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Local store unavailable: {0}")]
  Unavailable(String),

  #[error("Storage error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Failed to serialize record: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Storage task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  #[error("Lock poisoned: {0}")]
  Poisoned(String),

  #[error("Collection {0} has no secondary index")]
  NoIndex(&'static str),
}
