//! Core traits and types for the local store.

use serde::{de::DeserializeOwned, Serialize};

use crate::api::{Restaurant, Review};

/// The fixed set of collections the local store knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionName {
  Restaurants,
  Reviews,
}

impl CollectionName {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Restaurants => "restaurants",
      Self::Reviews => "reviews",
    }
  }

  /// Column of the secondary index, if the collection has one.
  pub fn index_column(&self) -> Option<&'static str> {
    match self {
      Self::Restaurants => None,
      Self::Reviews => Some("restaurant_id"),
    }
  }

  /// DDL run the first time the collection is opened.
  pub(crate) fn schema(&self) -> &'static str {
    match self {
      Self::Restaurants => RESTAURANTS_SCHEMA,
      Self::Reviews => REVIEWS_SCHEMA,
    }
  }
}

impl std::fmt::Display for CollectionName {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

const RESTAURANTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS restaurants (
    id INTEGER PRIMARY KEY,
    data BLOB NOT NULL
);
"#;

const REVIEWS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY,
    restaurant_id INTEGER,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_by_restaurant
    ON reviews(restaurant_id);
"#;

/// Trait for records that live in a local store collection.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Collection the record belongs to
  const COLLECTION: CollectionName;

  /// Primary key
  fn cache_key(&self) -> i64;

  /// Value for the collection's secondary index
  fn index_key(&self) -> Option<i64> {
    None
  }
}

impl Cacheable for Restaurant {
  const COLLECTION: CollectionName = CollectionName::Restaurants;

  fn cache_key(&self) -> i64 {
    self.id
  }
}

impl Cacheable for Review {
  const COLLECTION: CollectionName = CollectionName::Reviews;

  fn cache_key(&self) -> i64 {
    self.id
  }

  fn index_key(&self) -> Option<i64> {
    Some(self.restaurant_id)
  }
}

/// Result of a read, with where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the local store; a background refresh may be running
  Cache,
  /// Fetched from the server and written to the local store
  Network,
}
