//! Remote data client for the restaurant REST API.
//!
//! Every call the site makes is an [`Operation`] mapped to one HTTP
//! method/URL/body. Responses are normalized to JSON, or to
//! [`Payload::Acknowledged`] when the server answers without a JSON body.
//! Nothing here retries.

pub mod client;
pub mod error;
pub mod types;

pub use client::{Operation, Payload, RemoteApi, RestaurantClient};
pub use error::RemoteError;
pub use types::{LatLng, NewReview, Restaurant, Review};
