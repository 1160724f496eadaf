//! Cache-aside policy engine sitting between the renderer, the local store
//! and the REST API.
//!
//! Reads: serve the cached set when there is one and refresh it in the
//! background through the reconciler; otherwise fetch, store and return.
//! Writes: update the local store first, then send the same change to the
//! server (or queue it while offline).

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SubsecRound, Utc};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{NewReview, RemoteApi, RemoteError, Restaurant, Review};
use crate::cache::{CacheResult, Cacheable, CollectionHandle, LocalStore};
use crate::config::Config;

use super::error::SyncError;
use super::filter::{distinct, RestaurantFilter};
use super::pending::PendingWrite;
use super::reconciler::{RecordBatch, ReconcileScope, Reconciler, ReconcilerHandle};

/// Tunables for a [`SyncCoordinator`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub queue_capacity: usize,
  pub prune_missing: bool,
  pub start_online: bool,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      queue_capacity: 32,
      prune_missing: false,
      start_online: true,
    }
  }
}

impl SyncOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      queue_capacity: config.reconciler.queue_capacity,
      prune_missing: config.cache.prune_missing,
      start_online: true,
    }
  }
}

/// Outcome of replaying the offline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
  pub sent: usize,
  pub failed: usize,
}

pub struct SyncCoordinator<R: RemoteApi> {
  remote: Arc<R>,
  store: LocalStore,
  reconciler: Reconciler,
  online: watch::Sender<bool>,
  /// Background refreshes and remote writes still in flight
  tasks: Mutex<Vec<JoinHandle<()>>>,
  /// Held while the offline queue is replayed; new writes wait behind it
  replay_lock: AsyncMutex<()>,
  last_provisional_id: AtomicI64,
}

impl<R: RemoteApi> SyncCoordinator<R> {
  /// Create the coordinator and start its reconciler task.
  ///
  /// Must be called from within a tokio runtime.
  pub fn new(remote: Arc<R>, store: LocalStore, options: SyncOptions) -> Self {
    let reconciler = Reconciler::spawn(store.clone(), options.queue_capacity, options.prune_missing);
    let (online, _) = watch::channel(options.start_online);

    Self {
      remote,
      store,
      reconciler,
      online,
      tasks: Mutex::new(Vec::new()),
      replay_lock: AsyncMutex::new(()),
      last_provisional_id: AtomicI64::new(0),
    }
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  // ===== Reads =====

  /// Every restaurant.
  pub async fn restaurants(&self) -> Result<Vec<Restaurant>, SyncError> {
    Ok(self.load_restaurants().await?.data)
  }

  /// Restaurants matching `filter`, applied to whichever set is served.
  pub async fn filtered_restaurants(
    &self,
    filter: &RestaurantFilter,
  ) -> Result<Vec<Restaurant>, SyncError> {
    Ok(filter.apply(self.restaurants().await?))
  }

  pub async fn restaurants_by_cuisine(&self, cuisine: &str) -> Result<Vec<Restaurant>, SyncError> {
    self.filtered_restaurants(&RestaurantFilter::cuisine(cuisine)).await
  }

  pub async fn restaurants_by_neighborhood(
    &self,
    neighborhood: &str,
  ) -> Result<Vec<Restaurant>, SyncError> {
    self
      .filtered_restaurants(&RestaurantFilter::neighborhood(neighborhood))
      .await
  }

  /// Both constraints at once; `"all"` disables either one.
  pub async fn restaurants_by_cuisine_and_neighborhood(
    &self,
    cuisine: &str,
    neighborhood: &str,
  ) -> Result<Vec<Restaurant>, SyncError> {
    self
      .filtered_restaurants(&RestaurantFilter::from_selection(cuisine, neighborhood))
      .await
  }

  /// Distinct neighborhoods, in order of first appearance.
  pub async fn neighborhoods(&self) -> Result<Vec<String>, SyncError> {
    let restaurants = self.restaurants().await?;
    Ok(distinct(&restaurants, |r| r.neighborhood.as_str()))
  }

  /// Distinct cuisines, in order of first appearance.
  pub async fn cuisines(&self) -> Result<Vec<String>, SyncError> {
    let restaurants = self.restaurants().await?;
    Ok(distinct(&restaurants, |r| r.cuisine_type.as_str()))
  }

  /// One restaurant, from the cache when present.
  pub async fn restaurant(&self, id: i64) -> Result<Restaurant, SyncError> {
    let handle = self.store.open_collection::<Restaurant>().await?;

    if let Some(cached) = self.store.get_by_key(&handle, id).await? {
      debug!(id, state = "serving_cache", "Restaurant served from cache");
      self.refresh_in_background(
        "restaurantById",
        ReconcileScope::Records,
        |remote| async move { remote.get_restaurant(id).await.map(|r| vec![r]) },
      );
      return Ok(cached);
    }

    debug!(id, state = "fetching", "Restaurant not cached, fetching from server");
    match self.remote.get_restaurant(id).await {
      Ok(restaurant) => {
        self.write_back(&handle, &[restaurant.without_reviews()]).await;
        Ok(restaurant)
      }
      Err(e) if e.is_not_found() => Err(SyncError::NotFound(id)),
      Err(e) => Err(e.into()),
    }
  }

  /// Reviews of one restaurant, and only that restaurant.
  pub async fn reviews_for_restaurant(&self, restaurant_id: i64) -> Result<Vec<Review>, SyncError> {
    let handle = self.store.open_collection::<Review>().await?;
    let cached = self.store.get_all_by_index(&handle, restaurant_id).await?;

    let result = self
      .serve_set(
        "reviewsByRestaurant",
        &handle,
        cached,
        ReconcileScope::Index(restaurant_id),
        move |remote| async move { remote.list_reviews_for(restaurant_id).await },
      )
      .await?;

    Ok(
      result
        .data
        .into_iter()
        .filter(|r| r.restaurant_id == restaurant_id)
        .collect(),
    )
  }

  /// A restaurant with its `reviews` populated.
  pub async fn restaurant_with_reviews(&self, id: i64) -> Result<Restaurant, SyncError> {
    let mut restaurant = self.restaurant(id).await?;
    restaurant.reviews = self.reviews_for_restaurant(id).await?;
    Ok(restaurant)
  }

  async fn load_restaurants(&self) -> Result<CacheResult<Vec<Restaurant>>, SyncError> {
    let handle = self.store.open_collection::<Restaurant>().await?;
    let cached = self.store.get_all(&handle).await?;

    self
      .serve_set(
        "restaurants",
        &handle,
        cached,
        ReconcileScope::Collection,
        |remote| async move { remote.list_restaurants().await },
      )
      .await
  }

  /// Serve `cached` if non-empty and refresh it behind the caller's back;
  /// otherwise fetch, store and return the server's set.
  async fn serve_set<T, F, Fut>(
    &self,
    query: &'static str,
    handle: &CollectionHandle<T>,
    cached: Vec<T>,
    scope: ReconcileScope,
    fetch: F,
  ) -> Result<CacheResult<Vec<T>>, SyncError>
  where
    T: Cacheable,
    Vec<T>: Into<RecordBatch>,
    F: FnOnce(Arc<R>) -> Fut,
    Fut: Future<Output = Result<Vec<T>, RemoteError>> + Send + 'static,
  {
    if !cached.is_empty() {
      debug!(query, count = cached.len(), state = "serving_cache", "Served from cache");
      self.refresh_in_background(query, scope, fetch);
      return Ok(CacheResult::from_cache(cached));
    }

    debug!(query, state = "fetching", "Nothing cached, fetching from server");
    let fresh = fetch(Arc::clone(&self.remote)).await?;
    self.write_back(handle, &fresh).await;
    debug!(query, count = fresh.len(), state = "served_fresh", "Served from server");
    Ok(CacheResult::from_network(fresh))
  }

  /// Store freshly fetched records. The caller already has the data, so a
  /// failed write is logged rather than returned.
  async fn write_back<T: Cacheable>(&self, handle: &CollectionHandle<T>, records: &[T]) {
    match self.store.put_all(handle, records).await {
      Ok(()) => info!(collection = %handle.name(), count = records.len(), "Stored fetched records"),
      Err(e) => warn!(collection = %handle.name(), error = %e, "Failed to cache fetched records"),
    }
  }

  /// Fetch the server's copy and hand it to the reconciler without blocking
  /// the caller. Skipped while offline.
  fn refresh_in_background<T, F, Fut>(&self, query: &'static str, scope: ReconcileScope, fetch: F)
  where
    T: Cacheable,
    Vec<T>: Into<RecordBatch>,
    F: FnOnce(Arc<R>) -> Fut,
    Fut: Future<Output = Result<Vec<T>, RemoteError>> + Send + 'static,
  {
    if !self.is_online() {
      debug!(query, "Offline, skipping background refresh");
      return;
    }

    let fetch = fetch(Arc::clone(&self.remote));
    let reconciler: ReconcilerHandle = self.reconciler.handle();
    self.spawn_background(async move {
      let records = match fetch.await {
        Ok(records) => records,
        Err(e) => {
          warn!(query, error = %e, "Background refresh failed");
          return;
        }
      };

      let Some(done) = reconciler.submit(records.into(), scope).await else {
        warn!(query, "Reconciler stopped, dropping refreshed records");
        return;
      };

      match done.await {
        Ok(Ok(status)) => debug!(query, %status, "Background refresh reconciled"),
        Ok(Err(e)) => warn!(query, error = %e, "Background refresh could not be reconciled"),
        Err(_) => warn!(query, "Reconciler dropped the refresh job"),
      }
    });
  }

  // ===== Writes =====

  /// Mark a restaurant as favorite (or not), locally first.
  ///
  /// A failed server call is logged and does not undo the local change.
  pub async fn toggle_favorite(&self, restaurant_id: i64, favorite: bool) -> Result<(), SyncError> {
    let handle = self.store.open_collection::<Restaurant>().await?;

    match self.store.get_by_key(&handle, restaurant_id).await? {
      Some(mut restaurant) => {
        restaurant.is_favorite = favorite;
        self.store.put(&handle, &restaurant).await?;
        debug!(restaurant_id, favorite, "Favorite updated locally");
      }
      None => debug!(restaurant_id, "Restaurant not cached, only the server copy changes"),
    }

    self
      .dispatch(PendingWrite::Favorite {
        restaurant_id,
        is_favorite: favorite,
      })
      .await
  }

  /// Add a review. The returned record carries a provisional negative id
  /// until the server's copy replaces it.
  pub async fn add_review(&self, review: NewReview) -> Result<Review, SyncError> {
    review.validate().map_err(SyncError::InvalidReview)?;

    let provisional_id = self.next_provisional_id();
    // Stored timestamps carry millisecond precision
    let provisional = review.to_provisional(provisional_id, Utc::now().trunc_subsecs(3));

    let handle = self.store.open_collection::<Review>().await?;
    self.store.put(&handle, &provisional).await?;
    debug!(
      provisional_id,
      restaurant_id = review.restaurant_id,
      "Review stored locally"
    );

    self
      .dispatch(PendingWrite::Review {
        provisional_id,
        review,
      })
      .await?;

    Ok(provisional)
  }

  /// Send a write now, or queue it while offline.
  async fn dispatch(&self, write: PendingWrite) -> Result<(), SyncError> {
    // A replay in progress sends older values; this write must follow them
    let _replay = self.replay_lock.lock().await;
    if !self.is_online() {
      let key = write.key();
      self.store.enqueue_pending(&key, &write).await?;
      info!(key = %key, "Offline, write queued");
      return Ok(());
    }

    let remote = Arc::clone(&self.remote);
    let store = self.store.clone();
    self.spawn_background(async move {
      let description = write.describe();
      if let Err(e) = send_write(remote.as_ref(), &store, write).await {
        warn!(write = %description, error = %e, "Server write failed, local copy kept");
      }
    });
    Ok(())
  }

  /// Replay every queued write once and empty the queue.
  pub async fn replay_pending(&self) -> Result<ReplaySummary, SyncError> {
    let _replay = self.replay_lock.lock().await;
    self.replay_queue().await
  }

  async fn replay_queue(&self) -> Result<ReplaySummary, SyncError> {
    let queued: Vec<(String, PendingWrite)> = self.store.drain_pending().await?;
    let mut summary = ReplaySummary::default();

    for (key, write) in queued {
      match send_write(self.remote.as_ref(), &self.store, write).await {
        Ok(()) => {
          debug!(key = %key, "Queued write sent");
          summary.sent += 1;
        }
        Err(e) => {
          warn!(key = %key, error = %e, "Queued write failed");
          summary.failed += 1;
        }
      }
    }

    if summary.sent + summary.failed > 0 {
      info!(sent = summary.sent, failed = summary.failed, "Replayed offline writes");
    }
    Ok(summary)
  }

  /// Writes waiting for connectivity.
  pub async fn pending_writes(&self) -> Result<Vec<PendingWrite>, SyncError> {
    let queued: Vec<(String, PendingWrite)> = self.store.pending().await?;
    Ok(queued.into_iter().map(|(_, write)| write).collect())
  }

  // ===== Connectivity =====

  pub fn is_online(&self) -> bool {
    *self.online.borrow()
  }

  pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
    self.online.subscribe()
  }

  /// Record a connectivity change. Coming back online replays the queue.
  pub async fn set_online(&self, online: bool) -> Result<ReplaySummary, SyncError> {
    let _replay = self.replay_lock.lock().await;
    let was_online = self.online.send_replace(online);
    match (was_online, online) {
      (false, true) => {
        info!("Online again");
        self.replay_queue().await
      }
      (true, false) => {
        info!("Offline now");
        Ok(ReplaySummary::default())
      }
      _ => Ok(ReplaySummary::default()),
    }
  }

  // ===== Background work =====

  fn spawn_background<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let handle = tokio::spawn(task);
    let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
    tasks.retain(|t| !t.is_finished());
    tasks.push(handle);
  }

  /// Wait until every background refresh and server write has finished.
  pub async fn wait_for_background(&self) {
    loop {
      let in_flight = {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *tasks)
      };
      if in_flight.is_empty() {
        return;
      }
      for result in futures::future::join_all(in_flight).await {
        if let Err(e) = result {
          warn!(error = %e, "Background task panicked");
        }
      }
    }
  }

  /// Finish background work and stop the reconciler.
  pub async fn shutdown(self) {
    self.wait_for_background().await;
    self.reconciler.shutdown().await;
  }

  /// Negative, strictly decreasing ids that cannot collide with server ids.
  fn next_provisional_id(&self) -> i64 {
    let now = -Utc::now().timestamp_millis();
    let previous = self
      .last_provisional_id
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.min(last - 1))
      })
      .unwrap_or(now);
    now.min(previous - 1)
  }
}

/// Send one write to the server and fold the answer into the local store.
async fn send_write<R: RemoteApi>(
  remote: &R,
  store: &LocalStore,
  write: PendingWrite,
) -> Result<(), SyncError> {
  match write {
    PendingWrite::Favorite {
      restaurant_id,
      is_favorite,
    } => {
      remote.set_favorite(restaurant_id, is_favorite).await?;
      debug!(restaurant_id, is_favorite, "Server: favorite updated");
    }
    PendingWrite::Review {
      provisional_id,
      review,
    } => {
      let created = remote.create_review(review).await?;
      let handle = store.open_collection::<Review>().await?;
      store.put(&handle, &created).await?;
      store.delete(&handle, provisional_id).await?;
      debug!(provisional_id, id = created.id, "Server: review created");
    }
  }
  Ok(())
}
