//! HTTP client for the restaurant REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;

use super::types::{NewReview, Restaurant, Review};
use super::RemoteError;

/// One call the site makes against the API.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  ListRestaurants,
  GetRestaurant(i64),
  /// All reviews, or only those for one restaurant
  ListReviews { restaurant_id: Option<i64> },
  CreateReview(NewReview),
  SetFavorite { restaurant_id: i64, favorite: bool },
}

impl Operation {
  pub fn name(&self) -> &'static str {
    match self {
      Self::ListRestaurants => "restaurants",
      Self::GetRestaurant(_) => "restaurantById",
      Self::ListReviews { restaurant_id: None } => "reviews",
      Self::ListReviews { .. } => "reviewsByRestaurant",
      Self::CreateReview(_) => "addReview",
      Self::SetFavorite { .. } => "favorize",
    }
  }

  pub fn method(&self) -> Method {
    match self {
      Self::ListRestaurants | Self::GetRestaurant(_) | Self::ListReviews { .. } => Method::GET,
      Self::CreateReview(_) => Method::POST,
      Self::SetFavorite { .. } => Method::PUT,
    }
  }

  /// Path and query relative to the API root.
  pub fn path(&self) -> String {
    match self {
      Self::ListRestaurants => "restaurants".to_string(),
      Self::GetRestaurant(id) => format!("restaurants/{}", id),
      Self::ListReviews { restaurant_id: None } => "reviews".to_string(),
      Self::ListReviews {
        restaurant_id: Some(id),
      } => format!("reviews/?restaurant_id={}", id),
      Self::CreateReview(_) => "reviews".to_string(),
      Self::SetFavorite {
        restaurant_id,
        favorite,
      } => format!("restaurants/{}/?is_favorite={}", restaurant_id, favorite),
    }
  }
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  Json(Value),
  /// 2xx with a non-JSON body (the favorite toggle answers this way)
  Acknowledged,
}

impl Payload {
  pub fn into_json<T: DeserializeOwned>(self) -> Result<T, RemoteError> {
    match self {
      Payload::Json(value) => {
        serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()))
      }
      Payload::Acknowledged => Err(RemoteError::Decode(
        "expected a JSON body, got an acknowledgement".to_string(),
      )),
    }
  }
}

/// The remote side of synchronization.
///
/// Only `request` is required; the typed helpers decode its payload.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
  async fn request(&self, operation: Operation) -> Result<Payload, RemoteError>;

  async fn list_restaurants(&self) -> Result<Vec<Restaurant>, RemoteError> {
    self.request(Operation::ListRestaurants).await?.into_json()
  }

  async fn get_restaurant(&self, id: i64) -> Result<Restaurant, RemoteError> {
    self.request(Operation::GetRestaurant(id)).await?.into_json()
  }

  async fn list_reviews(&self) -> Result<Vec<Review>, RemoteError> {
    self
      .request(Operation::ListReviews {
        restaurant_id: None,
      })
      .await?
      .into_json()
  }

  async fn list_reviews_for(&self, restaurant_id: i64) -> Result<Vec<Review>, RemoteError> {
    self
      .request(Operation::ListReviews {
        restaurant_id: Some(restaurant_id),
      })
      .await?
      .into_json()
  }

  async fn create_review(&self, review: NewReview) -> Result<Review, RemoteError> {
    self.request(Operation::CreateReview(review)).await?.into_json()
  }

  async fn set_favorite(&self, restaurant_id: i64, favorite: bool) -> Result<Payload, RemoteError> {
    self
      .request(Operation::SetFavorite {
        restaurant_id,
        favorite,
      })
      .await
  }
}

/// reqwest-backed API client.
/// Clone is cheap - reqwest::Client shares its connection pool.
#[derive(Clone)]
pub struct RestaurantClient {
  client: Client,
  base_url: Url,
}

impl RestaurantClient {
  pub fn new(config: &ApiConfig) -> Result<Self, RemoteError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;

    let mut base_url = Url::parse(&config.base_url)?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self { client, base_url })
  }

  pub fn endpoint(&self, operation: &Operation) -> Result<Url, RemoteError> {
    Ok(self.base_url.join(&operation.path())?)
  }
}

#[async_trait]
impl RemoteApi for RestaurantClient {
  async fn request(&self, operation: Operation) -> Result<Payload, RemoteError> {
    let url = self.endpoint(&operation)?;

    let mut builder = self.client.request(operation.method(), url.clone());
    if let Operation::CreateReview(review) = &operation {
      builder = builder.json(review);
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_connect() {
        RemoteError::Offline(format!("{}: {}", url, e))
      } else {
        RemoteError::Transport(e)
      }
    })?;
    debug!(operation = operation.name(), url = %url, status = %response.status(), "Server: API called");

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RemoteError::from_status(status, &body));
    }

    let is_json = response
      .headers()
      .get(header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|ct| ct.contains("application/json"));

    if !is_json {
      return Ok(Payload::Acknowledged);
    }

    let text = response.text().await?;
    serde_json::from_str(&text)
      .map(Payload::Json)
      .map_err(|e| RemoteError::Decode(format!("{} returned malformed JSON: {}", operation.name(), e)))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use wiremock::{
    matchers::{body_json, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
  };

  use super::*;

  fn client(base_url: &str) -> RestaurantClient {
    RestaurantClient::new(&ApiConfig {
      base_url: base_url.to_string(),
      timeout_secs: 5,
    })
    .expect("client builds")
  }

  #[test]
  fn test_endpoints_match_rest_routes() {
    let c = client("http://localhost:1337");
    let url = |op: Operation| c.endpoint(&op).expect("valid url").to_string();

    assert_eq!(url(Operation::ListRestaurants), "http://localhost:1337/restaurants");
    assert_eq!(url(Operation::GetRestaurant(3)), "http://localhost:1337/restaurants/3");
    assert_eq!(
      url(Operation::ListReviews { restaurant_id: None }),
      "http://localhost:1337/reviews"
    );
    assert_eq!(
      url(Operation::ListReviews {
        restaurant_id: Some(7)
      }),
      "http://localhost:1337/reviews/?restaurant_id=7"
    );
    assert_eq!(
      url(Operation::SetFavorite {
        restaurant_id: 5,
        favorite: true
      }),
      "http://localhost:1337/restaurants/5/?is_favorite=true"
    );
  }

  #[test]
  fn test_base_url_with_path_prefix() {
    let c = client("http://example.test/api");
    let url = c.endpoint(&Operation::ListRestaurants).expect("valid url");
    assert_eq!(url.as_str(), "http://example.test/api/restaurants");
  }

  #[test]
  fn test_operation_methods() {
    let review = NewReview {
      name: "Ana".to_string(),
      rating: 4,
      comments: String::new(),
      restaurant_id: 1,
    };
    assert_eq!(Operation::ListRestaurants.method(), Method::GET);
    assert_eq!(Operation::CreateReview(review).method(), Method::POST);
    assert_eq!(
      Operation::SetFavorite {
        restaurant_id: 1,
        favorite: false
      }
      .method(),
      Method::PUT
    );
  }

  #[test]
  fn test_acknowledgement_is_not_a_record() {
    let err = Payload::Acknowledged.into_json::<Restaurant>().unwrap_err();
    assert!(matches!(err, RemoteError::Decode(_)));
  }

  // ===== Responses from a live server =====

  #[tokio::test]
  async fn test_json_response_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/restaurants"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": 1, "name": "Mission Chinese Food", "is_favorite": "true"}
      ])))
      .mount(&server)
      .await;

    let c = client(&server.uri());
    let payload = c.request(Operation::ListRestaurants).await.expect("request succeeds");
    assert!(matches!(payload, Payload::Json(_)));

    let restaurants = c.list_restaurants().await.expect("restaurants decode");
    assert_eq!(restaurants.len(), 1);
    assert!(restaurants[0].is_favorite);
  }

  #[tokio::test]
  async fn test_non_json_success_is_acknowledged() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
      .and(path("/restaurants/5/"))
      .and(query_param("is_favorite", "true"))
      .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
      .mount(&server)
      .await;

    let payload = client(&server.uri())
      .set_favorite(5, true)
      .await
      .expect("request succeeds");
    assert_eq!(payload, Payload::Acknowledged);
  }

  #[tokio::test]
  async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/restaurants/99"))
      .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/reviews"))
      .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
      .mount(&server)
      .await;

    let c = client(&server.uri());
    let err = c.get_restaurant(99).await.unwrap_err();
    assert!(err.is_not_found());

    let err = c.list_reviews().await.unwrap_err();
    match err {
      RemoteError::Status { status, body } => {
        assert_eq!(status, 500);
        assert_eq!(body, "boom");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_create_review_posts_json_body() {
    let server = MockServer::start().await;
    let review = NewReview {
      name: "Ana".to_string(),
      rating: 4,
      comments: "Great crust".to_string(),
      restaurant_id: 7,
    };
    Mock::given(method("POST"))
      .and(path("/reviews"))
      .and(body_json(json!({
        "name": "Ana",
        "rating": 4,
        "comments": "Great crust",
        "restaurant_id": 7,
      })))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({
        "id": 31,
        "restaurant_id": "7",
        "name": "Ana",
        "rating": "4",
        "comments": "Great crust",
        "createdAt": 1528156418000_i64,
      })))
      .expect(1)
      .mount(&server)
      .await;

    let created = client(&server.uri())
      .create_review(review)
      .await
      .expect("review created");
    assert_eq!(created.id, 31);
    assert_eq!(created.restaurant_id, 7);
    assert_eq!(created.rating, 4);
  }

  #[tokio::test]
  async fn test_malformed_json_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/restaurants"))
      .respond_with(ResponseTemplate::new(200).set_body_raw("[{\"id\": 1,", "application/json"))
      .mount(&server)
      .await;

    let err = client(&server.uri()).request(Operation::ListRestaurants).await.unwrap_err();
    assert!(matches!(err, RemoteError::Decode(_)));
  }

  #[tokio::test]
  async fn test_unreachable_endpoint_is_offline() {
    // Nothing listens on port 1
    let err = client("http://127.0.0.1:1")
      .request(Operation::ListRestaurants)
      .await
      .unwrap_err();
    assert!(matches!(err, RemoteError::Offline(_)), "unexpected error: {err:?}");
  }
}
