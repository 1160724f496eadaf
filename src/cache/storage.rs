//! SQLite-backed local store.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::error::StoreError;
use super::traits::{Cacheable, CollectionName};

/// On-disk schema version, kept in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Tables that exist independently of any collection.
const BASE_SCHEMA: &str = r#"
-- Writes made while offline, at most one per logical key
CREATE TABLE IF NOT EXISTS pending_writes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

type StoreResult<T> = Result<T, StoreError>;

/// Typed handle to an opened collection.
///
/// Only [`LocalStore::open_collection`] hands these out, so holding one means
/// the collection's table and index exist.
pub struct CollectionHandle<T> {
  name: CollectionName,
  _marker: PhantomData<fn() -> T>,
}

impl<T> CollectionHandle<T> {
  pub fn name(&self) -> CollectionName {
    self.name
  }
}

impl<T> Clone for CollectionHandle<T> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T> Copy for CollectionHandle<T> {}

impl<T> std::fmt::Debug for CollectionHandle<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("CollectionHandle").field(&self.name).finish()
  }
}

struct Inner {
  conn: Connection,
  opened: HashSet<CollectionName>,
}

/// Persistent store of cached records.
///
/// Clones share one connection. Every operation runs on the blocking pool and
/// must be awaited; the connection lock serializes writes, so the last `put`
/// for a key wins.
#[derive(Clone)]
pub struct LocalStore {
  inner: Arc<Mutex<Inner>>,
}

impl LocalStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> StoreResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Unavailable(format!(
          "Failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Unavailable(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Store that lives only as long as the process.
  pub fn open_in_memory() -> StoreResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StoreError::Unavailable(format!("Failed to open in-memory database: {}", e)))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> StoreResult<Self> {
    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| StoreError::Unavailable(format!("Failed to read schema version: {}", e)))?;

    if version > SCHEMA_VERSION {
      return Err(StoreError::Unavailable(format!(
        "cache database has schema version {}, this build understands {}",
        version, SCHEMA_VERSION
      )));
    }

    conn
      .execute_batch(BASE_SCHEMA)
      .map_err(|e| StoreError::Unavailable(format!("Failed to run cache migrations: {}", e)))?;
    conn
      .pragma_update(None, "user_version", SCHEMA_VERSION)
      .map_err(|e| StoreError::Unavailable(format!("Failed to set schema version: {}", e)))?;

    Ok(Self {
      inner: Arc::new(Mutex::new(Inner {
        conn,
        opened: HashSet::new(),
      })),
    })
  }

  /// Run `f` against the connection on the blocking pool.
  async fn with_conn<R, F>(&self, f: F) -> StoreResult<R>
  where
    F: FnOnce(&mut Inner) -> StoreResult<R> + Send + 'static,
    R: Send + 'static,
  {
    let inner = Arc::clone(&self.inner);
    tokio::task::spawn_blocking(move || {
      let mut guard = inner
        .lock()
        .map_err(|e| StoreError::Poisoned(e.to_string()))?;
      f(&mut guard)
    })
    .await?
  }

  /// Open the collection for `T`, creating it and its index on first use.
  pub async fn open_collection<T: Cacheable>(&self) -> StoreResult<CollectionHandle<T>> {
    let name = T::COLLECTION;
    self
      .with_conn(move |inner| {
        if !inner.opened.contains(&name) {
          inner.conn.execute_batch(name.schema())?;
          inner.opened.insert(name);
          debug!(collection = %name, "Collection ready");
        }
        Ok(())
      })
      .await?;

    Ok(CollectionHandle {
      name,
      _marker: PhantomData,
    })
  }

  /// Every record in the collection.
  pub async fn get_all<T: Cacheable>(&self, handle: &CollectionHandle<T>) -> StoreResult<Vec<T>> {
    let sql = format!("SELECT data FROM {} ORDER BY id", handle.name);
    let rows = self
      .with_conn(move |inner| {
        let mut stmt = inner.conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await?;

    Ok(decode_rows(handle.name, rows))
  }

  /// Records whose secondary index equals `value`.
  pub async fn get_all_by_index<T: Cacheable>(
    &self,
    handle: &CollectionHandle<T>,
    value: i64,
  ) -> StoreResult<Vec<T>> {
    let column = handle
      .name
      .index_column()
      .ok_or(StoreError::NoIndex(handle.name.as_str()))?;
    let sql = format!(
      "SELECT data FROM {} WHERE {} = ?1 ORDER BY id",
      handle.name, column
    );
    let rows = self
      .with_conn(move |inner| {
        let mut stmt = inner.conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![value], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await?;

    Ok(decode_rows(handle.name, rows))
  }

  pub async fn get_by_key<T: Cacheable>(
    &self,
    handle: &CollectionHandle<T>,
    id: i64,
  ) -> StoreResult<Option<T>> {
    match self.get_raw(handle, id).await? {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  /// Serialized bytes of a record, exactly as stored.
  pub async fn get_raw<T: Cacheable>(
    &self,
    handle: &CollectionHandle<T>,
    id: i64,
  ) -> StoreResult<Option<Vec<u8>>> {
    let sql = format!("SELECT data FROM {} WHERE id = ?1", handle.name);
    self
      .with_conn(move |inner| {
        let data = inner
          .conn
          .query_row(&sql, params![id], |row| row.get::<_, Vec<u8>>(0))
          .optional()?;
        Ok(data)
      })
      .await
  }

  /// Primary keys in the collection, optionally limited to one index value.
  pub async fn keys<T: Cacheable>(
    &self,
    handle: &CollectionHandle<T>,
    index_value: Option<i64>,
  ) -> StoreResult<Vec<i64>> {
    let sql = match (index_value, handle.name.index_column()) {
      (None, _) => format!("SELECT id FROM {} ORDER BY id", handle.name),
      (Some(_), Some(column)) => {
        format!("SELECT id FROM {} WHERE {} = ?1 ORDER BY id", handle.name, column)
      }
      (Some(_), None) => return Err(StoreError::NoIndex(handle.name.as_str())),
    };
    self
      .with_conn(move |inner| {
        let mut stmt = inner.conn.prepare(&sql)?;
        let ids = match index_value {
          Some(value) => stmt
            .query_map(params![value], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?,
          None => stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?,
        };
        Ok(ids)
      })
      .await
  }

  /// Upsert a record by primary key.
  pub async fn put<T: Cacheable>(&self, handle: &CollectionHandle<T>, record: &T) -> StoreResult<()> {
    self.put_all(handle, std::slice::from_ref(record)).await
  }

  /// Upsert several records in one transaction.
  pub async fn put_all<T: Cacheable>(
    &self,
    handle: &CollectionHandle<T>,
    records: &[T],
  ) -> StoreResult<()> {
    let rows = records
      .iter()
      .map(|r| -> StoreResult<_> { Ok((r.cache_key(), r.index_key(), serde_json::to_vec(r)?)) })
      .collect::<StoreResult<Vec<_>>>()?;
    let name = handle.name;

    self
      .with_conn(move |inner| {
        let tx = inner.conn.transaction()?;
        {
          let sql = match name.index_column() {
            Some(column) => format!(
              "INSERT OR REPLACE INTO {} (id, {}, data) VALUES (?1, ?2, ?3)",
              name, column
            ),
            None => format!("INSERT OR REPLACE INTO {} (id, data) VALUES (?1, ?2)", name),
          };
          let mut stmt = tx.prepare(&sql)?;
          for (id, index, data) in &rows {
            if name.index_column().is_some() {
              stmt.execute(params![id, index, data])?;
            } else {
              stmt.execute(params![id, data])?;
            }
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  /// Remove a record. Returns whether it existed.
  pub async fn delete<T: Cacheable>(&self, handle: &CollectionHandle<T>, id: i64) -> StoreResult<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", handle.name);
    self
      .with_conn(move |inner| Ok(inner.conn.execute(&sql, params![id])? > 0))
      .await
  }

  // ===== Pending writes =====

  /// Queue a payload under `key`, replacing any payload already queued there.
  pub async fn enqueue_pending<P: Serialize>(&self, key: &str, payload: &P) -> StoreResult<()> {
    let key = key.to_string();
    let payload = serde_json::to_string(payload)?;
    self
      .with_conn(move |inner| {
        inner.conn.execute(
          "INSERT INTO pending_writes (key, payload) VALUES (?1, ?2)
           ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, queued_at = datetime('now')",
          params![key, payload],
        )?;
        Ok(())
      })
      .await
  }

  /// Queued writes in the order their keys were first queued.
  pub async fn pending<P: DeserializeOwned>(&self) -> StoreResult<Vec<(String, P)>> {
    let rows = self
      .with_conn(|inner| {
        let mut stmt = inner
          .conn
          .prepare("SELECT key, payload FROM pending_writes ORDER BY seq")?;
        let rows = stmt
          .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await?;

    decode_pending(rows)
  }

  /// Atomically take every queued write, leaving the queue empty.
  pub async fn drain_pending<P: DeserializeOwned>(&self) -> StoreResult<Vec<(String, P)>> {
    let rows = self
      .with_conn(|inner| {
        let tx = inner.conn.transaction()?;
        let rows = {
          let mut stmt = tx.prepare("SELECT key, payload FROM pending_writes ORDER BY seq")?;
          let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
          rows
        };
        tx.execute("DELETE FROM pending_writes", [])?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;

    decode_pending(rows)
  }
}

/// Deserialize stored rows, skipping any that no longer parse.
fn decode_rows<T: Cacheable>(collection: CollectionName, rows: Vec<Vec<u8>>) -> Vec<T> {
  rows
    .into_iter()
    .filter_map(|data| match serde_json::from_slice(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(collection = %collection, error = %e, "Skipping unreadable cached record");
        None
      }
    })
    .collect()
}

fn decode_pending<P: DeserializeOwned>(rows: Vec<(String, String)>) -> StoreResult<Vec<(String, P)>> {
  rows
    .into_iter()
    .map(|(key, payload)| -> StoreResult<_> { Ok((key, serde_json::from_str(&payload)?)) })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{LatLng, Restaurant, Review};

  fn restaurant(id: i64, name: &str) -> Restaurant {
    Restaurant {
      id,
      name: name.to_string(),
      neighborhood: "Brooklyn".to_string(),
      photograph: Some(id.to_string()),
      address: "1 Main St".to_string(),
      latlng: LatLng {
        lat: 40.7,
        lng: -73.9,
      },
      cuisine_type: "Pizza".to_string(),
      operating_hours: Default::default(),
      is_favorite: false,
      created_at: None,
      updated_at: None,
      reviews: Vec::new(),
    }
  }

  fn review(id: i64, restaurant_id: i64) -> Review {
    Review {
      id,
      restaurant_id,
      name: format!("reviewer {}", id),
      rating: 4,
      comments: "Solid".to_string(),
      created_at: None,
      updated_at: None,
    }
  }

  #[tokio::test]
  async fn test_open_collection_is_idempotent() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let first = store.open_collection::<Restaurant>().await.expect("opens");
    store.put(&first, &restaurant(1, "A")).await.expect("put");

    let second = store.open_collection::<Restaurant>().await.expect("reopens");
    let all = store.get_all(&second).await.expect("get_all");
    assert_eq!(all.len(), 1);
    assert_eq!(second.name(), CollectionName::Restaurants);
  }

  #[tokio::test]
  async fn test_put_is_upsert_and_idempotent() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let handle = store.open_collection::<Restaurant>().await.expect("opens");
    let record = restaurant(1, "A");

    store.put(&handle, &record).await.expect("put");
    store.put(&handle, &record).await.expect("put again");
    assert_eq!(store.get_all(&handle).await.expect("get_all"), vec![record.clone()]);

    let mut renamed = record.clone();
    renamed.name = "B".to_string();
    store.put(&handle, &renamed).await.expect("overwrite");
    assert_eq!(
      store.get_by_key(&handle, 1).await.expect("get_by_key"),
      Some(renamed)
    );
  }

  #[tokio::test]
  async fn test_get_by_key_absent() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let handle = store.open_collection::<Restaurant>().await.expect("opens");
    assert_eq!(store.get_by_key(&handle, 42).await.expect("lookup"), None);
    assert_eq!(store.get_raw(&handle, 42).await.expect("lookup"), None);
  }

  #[tokio::test]
  async fn test_reviews_index_by_restaurant() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let handle = store.open_collection::<Review>().await.expect("opens");
    store
      .put_all(&handle, &[review(1, 7), review(2, 8), review(3, 7)])
      .await
      .expect("put_all");

    let for_seven = store.get_all_by_index(&handle, 7).await.expect("index query");
    assert_eq!(for_seven.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(store.keys(&handle, Some(8)).await.expect("keys"), vec![2]);
    assert_eq!(store.keys(&handle, None).await.expect("keys"), vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_restaurants_have_no_index() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let handle = store.open_collection::<Restaurant>().await.expect("opens");
    let err = store.get_all_by_index(&handle, 1).await.unwrap_err();
    assert!(matches!(err, StoreError::NoIndex("restaurants")));
  }

  #[tokio::test]
  async fn test_raw_bytes_match_serialization() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let handle = store.open_collection::<Restaurant>().await.expect("opens");
    let record = restaurant(3, "C");
    store.put(&handle, &record).await.expect("put");

    let raw = store.get_raw(&handle, 3).await.expect("raw").expect("present");
    assert_eq!(raw, serde_json::to_vec(&record).expect("serializes"));
  }

  #[tokio::test]
  async fn test_delete() {
    let store = LocalStore::open_in_memory().expect("store opens");
    let handle = store.open_collection::<Review>().await.expect("opens");
    store.put(&handle, &review(-5, 1)).await.expect("put");
    assert!(store.delete(&handle, -5).await.expect("delete"));
    assert!(!store.delete(&handle, -5).await.expect("delete again"));
  }

  #[tokio::test]
  async fn test_pending_keeps_one_write_per_key() {
    let store = LocalStore::open_in_memory().expect("store opens");
    store.enqueue_pending("favorite:5", &true).await.expect("queue");
    store.enqueue_pending("favorite:6", &true).await.expect("queue");
    store.enqueue_pending("favorite:5", &false).await.expect("requeue");

    let queued: Vec<(String, bool)> = store.pending().await.expect("list");
    assert_eq!(
      queued,
      vec![("favorite:5".to_string(), false), ("favorite:6".to_string(), true)]
    );

    let drained: Vec<(String, bool)> = store.drain_pending().await.expect("drain");
    assert_eq!(drained.len(), 2);
    assert!(store.pending::<bool>().await.expect("list").is_empty());
  }

  #[tokio::test]
  async fn test_file_store_persists_across_opens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = LocalStore::open(&path).expect("store opens");
      let handle = store.open_collection::<Restaurant>().await.expect("opens");
      store.put(&handle, &restaurant(1, "A")).await.expect("put");
    }

    let store = LocalStore::open(&path).expect("store reopens");
    let handle = store.open_collection::<Restaurant>().await.expect("opens");
    assert_eq!(store.get_all(&handle).await.expect("get_all").len(), 1);
  }

  #[tokio::test]
  async fn test_newer_schema_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.db");
    {
      let conn = Connection::open(&path).expect("raw open");
      conn
        .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
        .expect("bump version");
    }

    let err = LocalStore::open(&path).err().expect("open fails");
    assert!(matches!(err, StoreError::Unavailable(_)));
  }
}
