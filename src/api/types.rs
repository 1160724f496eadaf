//! Record types exchanged with the restaurant REST API.
//!
//! The reference server is loose about JSON types: `is_favorite` arrives as
//! `"true"`/`"false"`, ratings and ids posted from forms come back as numeric
//! strings, and timestamps are either epoch millis or RFC 3339 strings. The
//! deserializers here accept those shapes and always serialize the canonical
//! form, so the serialized bytes of a record are stable across fetches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest review comment the site accepts.
pub const MAX_COMMENT_LEN: usize = 250;

/// Image shown when a restaurant has no photograph.
pub const PLACEHOLDER_IMAGE: &str = "/img/icons/icon-placeholder.png";

// ============================================================================
// Restaurant
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
  pub lat: f64,
  pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: i64,
  pub name: String,
  #[serde(default)]
  pub neighborhood: String,
  #[serde(
    default,
    deserialize_with = "flexible::opt_string",
    skip_serializing_if = "Option::is_none"
  )]
  pub photograph: Option<String>,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub latlng: LatLng,
  #[serde(default)]
  pub cuisine_type: String,
  #[serde(default)]
  pub operating_hours: BTreeMap<String, String>,
  #[serde(default, deserialize_with = "flexible::boolean")]
  pub is_favorite: bool,
  #[serde(
    rename = "createdAt",
    default,
    with = "flexible::timestamp",
    skip_serializing_if = "Option::is_none"
  )]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(
    rename = "updatedAt",
    default,
    with = "flexible::timestamp",
    skip_serializing_if = "Option::is_none"
  )]
  pub updated_at: Option<DateTime<Utc>>,
  /// Populated on demand for detail views; never persisted.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub reviews: Vec<Review>,
}

impl Restaurant {
  /// Relative URL of the restaurant detail page.
  pub fn url(&self) -> String {
    format!("./restaurant.html?id={}", self.id)
  }

  /// Image URL, or the placeholder when the restaurant has no photograph.
  pub fn image_url(&self) -> String {
    match self.photograph.as_deref() {
      Some(photo) if !photo.is_empty() => format!("/img/{}.jpg", photo),
      _ => PLACEHOLDER_IMAGE.to_string(),
    }
  }

  /// Copy of this restaurant without the denormalized reviews, as stored.
  pub fn without_reviews(&self) -> Self {
    Self {
      reviews: Vec::new(),
      ..self.clone()
    }
  }
}

// ============================================================================
// Review
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  #[serde(deserialize_with = "flexible::integer")]
  pub id: i64,
  #[serde(deserialize_with = "flexible::integer")]
  pub restaurant_id: i64,
  pub name: String,
  #[serde(deserialize_with = "flexible::rating")]
  pub rating: u8,
  #[serde(default)]
  pub comments: String,
  #[serde(
    rename = "createdAt",
    default,
    with = "flexible::timestamp",
    skip_serializing_if = "Option::is_none"
  )]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(
    rename = "updatedAt",
    default,
    with = "flexible::timestamp",
    skip_serializing_if = "Option::is_none"
  )]
  pub updated_at: Option<DateTime<Utc>>,
}

/// Body of `POST /reviews`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
  pub name: String,
  pub rating: u8,
  pub comments: String,
  pub restaurant_id: i64,
}

impl NewReview {
  /// Check the field constraints the review form enforces.
  pub fn validate(&self) -> Result<(), String> {
    if self.name.trim().is_empty() {
      return Err("reviewer name is empty".to_string());
    }
    if !(1..=5).contains(&self.rating) {
      return Err(format!("rating {} is outside 1-5", self.rating));
    }
    let len = self.comments.chars().count();
    if len > MAX_COMMENT_LEN {
      return Err(format!(
        "comments are {} characters, limit is {}",
        len, MAX_COMMENT_LEN
      ));
    }
    Ok(())
  }

  /// Local stand-in shown until the server assigns the real id.
  pub fn to_provisional(&self, id: i64, created_at: DateTime<Utc>) -> Review {
    Review {
      id,
      restaurant_id: self.restaurant_id,
      name: self.name.clone(),
      rating: self.rating,
      comments: self.comments.clone(),
      created_at: Some(created_at),
      updated_at: None,
    }
  }
}

// ============================================================================
// Lenient field deserializers
// ============================================================================

mod flexible {
  use chrono::{DateTime, TimeZone, Utc};
  use serde::de::{self, Unexpected};
  use serde::{Deserialize, Deserializer, Serializer};

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
  }

  pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Scalar::deserialize(d)? {
      Scalar::Bool(b) => Ok(b),
      Scalar::Str(s) => match s.trim() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        other => Err(de::Error::invalid_value(Unexpected::Str(other), &"a boolean")),
      },
      Scalar::Int(i) => Ok(i != 0),
      Scalar::Float(f) => Err(de::Error::invalid_type(Unexpected::Float(f), &"a boolean")),
    }
  }

  pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Scalar::deserialize(d)? {
      Scalar::Int(i) => Ok(i),
      Scalar::Str(s) => s
        .trim()
        .parse()
        .map_err(|_| de::Error::invalid_value(Unexpected::Str(&s), &"an integer")),
      Scalar::Float(f) => Err(de::Error::invalid_type(Unexpected::Float(f), &"an integer")),
      Scalar::Bool(b) => Err(de::Error::invalid_type(Unexpected::Bool(b), &"an integer")),
    }
  }

  pub fn rating<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let value = integer(d)?;
    u8::try_from(value)
      .map_err(|_| de::Error::invalid_value(Unexpected::Signed(value), &"a rating between 1 and 5"))
  }

  pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Scalar>::deserialize(d)? {
      None => None,
      Some(Scalar::Str(s)) => Some(s),
      Some(Scalar::Int(i)) => Some(i.to_string()),
      Some(Scalar::Float(f)) => Some(f.to_string()),
      Some(Scalar::Bool(b)) => Some(b.to_string()),
    })
  }

  /// Timestamps travel as epoch millis; RFC 3339 strings are accepted on input.
  pub mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
      value: &Option<DateTime<Utc>>,
      s: S,
    ) -> Result<S::Ok, S::Error> {
      match value {
        Some(ts) => s.serialize_i64(ts.timestamp_millis()),
        None => s.serialize_none(),
      }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
      d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
      match Option::<Scalar>::deserialize(d)? {
        None => Ok(None),
        Some(Scalar::Int(ms)) => Utc
          .timestamp_millis_opt(ms)
          .single()
          .map(Some)
          .ok_or_else(|| de::Error::invalid_value(Unexpected::Signed(ms), &"epoch milliseconds")),
        Some(Scalar::Float(ms)) => Utc
          .timestamp_millis_opt(ms as i64)
          .single()
          .map(Some)
          .ok_or_else(|| de::Error::invalid_value(Unexpected::Float(ms), &"epoch milliseconds")),
        Some(Scalar::Str(s)) => DateTime::parse_from_rfc3339(&s)
          .map(|dt| Some(dt.with_timezone(&Utc)))
          .map_err(|_| de::Error::invalid_value(Unexpected::Str(&s), &"an RFC 3339 timestamp")),
        Some(Scalar::Bool(b)) => Err(de::Error::invalid_type(Unexpected::Bool(b), &"a timestamp")),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const RESTAURANT_JSON: &str = r#"{
    "name": "Mission Chinese Food",
    "neighborhood": "Manhattan",
    "photograph": "1",
    "address": "171 E Broadway, New York, NY 10002",
    "latlng": {"lat": 40.713829, "lng": -73.989667},
    "cuisine_type": "Asian",
    "operating_hours": {"Monday": "5:30 pm - 11:00 pm", "Tuesday": "5:30 pm - 12:00 am"},
    "createdAt": 1504095567183,
    "updatedAt": "2018-06-05T10:12:03.000Z",
    "id": 1,
    "is_favorite": "true"
  }"#;

  #[test]
  fn test_restaurant_accepts_string_favorite_and_mixed_timestamps() {
    let r: Restaurant = serde_json::from_str(RESTAURANT_JSON).expect("restaurant parses");
    assert_eq!(r.id, 1);
    assert!(r.is_favorite);
    assert_eq!(r.photograph.as_deref(), Some("1"));
    assert_eq!(r.created_at.map(|t| t.timestamp_millis()), Some(1504095567183));
    assert!(r.updated_at.is_some());
    assert!(r.reviews.is_empty());
  }

  #[test]
  fn test_restaurant_serialization_is_canonical() {
    let r: Restaurant = serde_json::from_str(RESTAURANT_JSON).expect("restaurant parses");
    let bytes = serde_json::to_vec(&r).expect("serializes");
    let back: Restaurant = serde_json::from_slice(&bytes).expect("reparses");
    assert_eq!(back, r);
    assert_eq!(serde_json::to_vec(&back).expect("serializes"), bytes);
  }

  #[test]
  fn test_restaurant_without_photograph_uses_placeholder() {
    let r: Restaurant =
      serde_json::from_str(r#"{"id": 10, "name": "Casa Enrique", "photograph": 10}"#).expect("parses");
    assert_eq!(r.image_url(), "/img/10.jpg");

    let r: Restaurant = serde_json::from_str(r#"{"id": 10, "name": "Casa Enrique"}"#).expect("parses");
    assert_eq!(r.image_url(), PLACEHOLDER_IMAGE);
    assert_eq!(r.url(), "./restaurant.html?id=10");
    assert!(!r.is_favorite);
  }

  #[test]
  fn test_review_accepts_numeric_strings() {
    let json = r#"{"id": 31, "restaurant_id": "3", "name": "Ana", "rating": "4", "comments": "ok", "createdAt": 1528156418000}"#;
    let review: Review = serde_json::from_str(json).expect("review parses");
    assert_eq!(review.restaurant_id, 3);
    assert_eq!(review.rating, 4);
  }

  #[test]
  fn test_review_rejects_garbage_rating() {
    let json = r#"{"id": 1, "restaurant_id": 3, "name": "Ana", "rating": "great"}"#;
    assert!(serde_json::from_str::<Review>(json).is_err());
  }

  #[test]
  fn test_new_review_validation() {
    let mut review = NewReview {
      name: "Ana".to_string(),
      rating: 5,
      comments: "Great dumplings".to_string(),
      restaurant_id: 1,
    };
    assert!(review.validate().is_ok());

    review.rating = 0;
    assert!(review.validate().is_err());

    review.rating = 3;
    review.comments = "x".repeat(MAX_COMMENT_LEN + 1);
    assert!(review.validate().is_err());

    review.comments = "x".repeat(MAX_COMMENT_LEN);
    assert!(review.validate().is_ok());

    review.name = "   ".to_string();
    assert!(review.validate().is_err());
  }
}
