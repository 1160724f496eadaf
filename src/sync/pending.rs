//! Writes made while offline, waiting for connectivity.

use serde::{Deserialize, Serialize};

use crate::api::NewReview;

/// A queued write. Its [`key`](PendingWrite::key) decides what a later
/// offline write replaces: toggling the same restaurant twice keeps only the
/// second value, while every submitted review keeps its own slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingWrite {
  Favorite {
    restaurant_id: i64,
    is_favorite: bool,
  },
  Review {
    /// Id of the local stand-in record shown until the server answers
    provisional_id: i64,
    review: NewReview,
  },
}

impl PendingWrite {
  pub fn key(&self) -> String {
    match self {
      Self::Favorite { restaurant_id, .. } => format!("favorite:{}", restaurant_id),
      Self::Review { provisional_id, .. } => format!("review:{}", provisional_id),
    }
  }

  pub fn describe(&self) -> String {
    match self {
      Self::Favorite {
        restaurant_id,
        is_favorite,
      } => format!("set restaurant {} favorite = {}", restaurant_id, is_favorite),
      Self::Review { review, .. } => format!(
        "review of restaurant {} by {} ({}/5)",
        review.restaurant_id, review.name, review.rating
      ),
    }
  }
}
