//! What the renderer shows, loaded through the [`SyncCoordinator`].

use crate::api::{RemoteApi, Restaurant};
use crate::sync::{PendingWrite, RestaurantFilter, SyncCoordinator, SyncError};

/// Page state handed to the render functions.
#[derive(Debug, Clone, Default)]
pub struct AppState {
  /// Restaurants matching `filter`
  pub restaurants: Vec<Restaurant>,
  /// Restaurant shown on the detail page, reviews included
  pub restaurant: Option<Restaurant>,
  pub filter: RestaurantFilter,
  pub neighborhoods: Vec<String>,
  pub cuisines: Vec<String>,
  pub pending: Vec<PendingWrite>,
  pub online: bool,
}

impl AppState {
  pub fn new(online: bool) -> Self {
    Self {
      online,
      ..Default::default()
    }
  }

  /// Load the index page: filtered restaurants plus the filter options.
  pub async fn load_index<R: RemoteApi>(
    &mut self,
    sync: &SyncCoordinator<R>,
    filter: RestaurantFilter,
  ) -> Result<(), SyncError> {
    self.restaurants = sync.filtered_restaurants(&filter).await?;
    self.filter = filter;
    self.neighborhoods = sync.neighborhoods().await?;
    self.cuisines = sync.cuisines().await?;
    Ok(())
  }

  /// Load the detail page for one restaurant.
  pub async fn load_restaurant<R: RemoteApi>(
    &mut self,
    sync: &SyncCoordinator<R>,
    id: i64,
  ) -> Result<&Restaurant, SyncError> {
    Ok(&*self.restaurant.insert(sync.restaurant_with_reviews(id).await?))
  }

  pub async fn load_pending<R: RemoteApi>(
    &mut self,
    sync: &SyncCoordinator<R>,
  ) -> Result<(), SyncError> {
    self.pending = sync.pending_writes().await?;
    self.online = sync.is_online();
    Ok(())
  }
}
