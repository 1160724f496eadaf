//! Background reconciliation of freshly fetched records against the cache.
//!
//! The reconciler is a dedicated task fed through a bounded queue. It never
//! touches the foreground read path: the coordinator returns cached data first
//! and hands the server's copy over here afterwards.

use std::collections::HashSet;
use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Restaurant, Review};
use crate::cache::{Cacheable, CollectionName, LocalStore, StoreError};

/// Records fetched from the server for one logical query.
#[derive(Debug, Clone)]
pub enum RecordBatch {
  Restaurants(Vec<Restaurant>),
  Reviews(Vec<Review>),
}

impl From<Vec<Restaurant>> for RecordBatch {
  fn from(records: Vec<Restaurant>) -> Self {
    RecordBatch::Restaurants(records)
  }
}

impl From<Vec<Review>> for RecordBatch {
  fn from(records: Vec<Review>) -> Self {
    RecordBatch::Reviews(records)
  }
}

/// How much of the collection a batch speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileScope {
  /// The batch is the server's whole collection
  Collection,
  /// The batch is every record with this secondary index value
  Index(i64),
  /// The batch is just the records it contains
  Records,
}

/// Completion report for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileStatus {
  pub collection: CollectionName,
  pub checked: usize,
  pub updated: usize,
  pub pruned: usize,
}

impl fmt::Display for ReconcileStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} checked ({} of {} updated, {} pruned)",
      self.collection, self.updated, self.checked, self.pruned
    )
  }
}

pub type ReconcileOutcome = Result<ReconcileStatus, StoreError>;

struct ReconcileJob {
  batch: RecordBatch,
  scope: ReconcileScope,
  done: oneshot::Sender<ReconcileOutcome>,
}

/// Sending side of the reconciliation queue.
#[derive(Clone)]
pub struct ReconcilerHandle {
  tx: mpsc::Sender<ReconcileJob>,
}

impl ReconcilerHandle {
  /// Queue a batch, waiting for room if the queue is full.
  ///
  /// Returns the channel the completion status arrives on, or `None` when
  /// the reconciler has stopped.
  pub async fn submit(
    &self,
    batch: RecordBatch,
    scope: ReconcileScope,
  ) -> Option<oneshot::Receiver<ReconcileOutcome>> {
    let (done, rx) = oneshot::channel();
    let job = ReconcileJob { batch, scope, done };
    self.tx.send(job).await.ok()?;
    Some(rx)
  }
}

/// The running reconciler task.
pub struct Reconciler {
  handle: ReconcilerHandle,
  task: JoinHandle<()>,
}

impl Reconciler {
  /// Start the reconciler task.
  ///
  /// With `prune_missing`, cached records absent from a batch are deleted
  /// within the batch's scope; otherwise they are left alone.
  pub fn spawn(store: LocalStore, queue_capacity: usize, prune_missing: bool) -> Self {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let task = tokio::spawn(run(store, rx, prune_missing));
    Self {
      handle: ReconcilerHandle { tx },
      task,
    }
  }

  pub fn handle(&self) -> ReconcilerHandle {
    self.handle.clone()
  }

  /// Stop accepting jobs and wait for queued ones to finish.
  ///
  /// Jobs still arrive from any cloned handles until those are dropped.
  pub async fn shutdown(self) {
    drop(self.handle);
    if let Err(e) = self.task.await {
      warn!(error = %e, "Reconciler task panicked");
    }
  }
}

async fn run(store: LocalStore, mut rx: mpsc::Receiver<ReconcileJob>, prune_missing: bool) {
  debug!("Reconciler started");
  while let Some(job) = rx.recv().await {
    let outcome = match job.batch {
      RecordBatch::Restaurants(records) => {
        reconcile(&store, records, job.scope, prune_missing).await
      }
      RecordBatch::Reviews(records) => reconcile(&store, records, job.scope, prune_missing).await,
    };

    match &outcome {
      Ok(status) if status.updated > 0 || status.pruned > 0 => info!(%status, "Reconciled"),
      Ok(status) => debug!(%status, "Reconciled"),
      Err(e) => warn!(error = %e, "Reconciliation failed"),
    }

    // The invoker may have stopped listening
    let _ = job.done.send(outcome);
  }
  debug!("Reconciler stopped");
}

/// Write every fetched record whose serialized form differs from the cache.
pub async fn reconcile<T: Cacheable>(
  store: &LocalStore,
  records: Vec<T>,
  scope: ReconcileScope,
  prune_missing: bool,
) -> ReconcileOutcome {
  let handle = store.open_collection::<T>().await?;

  let mut updated = 0;
  for record in &records {
    let fetched = serde_json::to_vec(record)?;
    let cached = store.get_raw(&handle, record.cache_key()).await?;
    if cached.as_deref() != Some(fetched.as_slice()) {
      store.put(&handle, record).await?;
      updated += 1;
    }
  }

  let mut pruned = 0;
  if prune_missing {
    let cached_keys = match scope {
      ReconcileScope::Collection => Some(store.keys(&handle, None).await?),
      ReconcileScope::Index(value) => Some(store.keys(&handle, Some(value)).await?),
      ReconcileScope::Records => None,
    };

    if let Some(cached_keys) = cached_keys {
      let fetched: HashSet<i64> = records.iter().map(|r| r.cache_key()).collect();
      // Negative ids are local stand-ins still waiting for the server
      for id in cached_keys
        .into_iter()
        .filter(|id| *id >= 0 && !fetched.contains(id))
      {
        if store.delete(&handle, id).await? {
          pruned += 1;
        }
      }
    }
  }

  Ok(ReconcileStatus {
    collection: T::COLLECTION,
    checked: records.len(),
    updated,
    pruned,
  })
}
