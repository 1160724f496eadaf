//! Restaurant filtering applied to whichever set the coordinator returns.

use crate::api::Restaurant;

/// Select value meaning "no constraint".
pub const ALL: &str = "all";

/// Cuisine / neighborhood constraint. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestaurantFilter {
  pub cuisine: Option<String>,
  pub neighborhood: Option<String>,
}

impl RestaurantFilter {
  /// Build a filter from select values, treating `"all"` as no constraint.
  pub fn from_selection(cuisine: &str, neighborhood: &str) -> Self {
    let pick = |value: &str| (value != ALL && !value.is_empty()).then(|| value.to_string());
    Self {
      cuisine: pick(cuisine),
      neighborhood: pick(neighborhood),
    }
  }

  pub fn cuisine(cuisine: &str) -> Self {
    Self::from_selection(cuisine, ALL)
  }

  pub fn neighborhood(neighborhood: &str) -> Self {
    Self::from_selection(ALL, neighborhood)
  }

  pub fn is_empty(&self) -> bool {
    self.cuisine.is_none() && self.neighborhood.is_none()
  }

  pub fn matches(&self, restaurant: &Restaurant) -> bool {
    self
      .cuisine
      .as_deref()
      .map_or(true, |c| restaurant.cuisine_type == c)
      && self
        .neighborhood
        .as_deref()
        .map_or(true, |n| restaurant.neighborhood == n)
  }

  pub fn apply(&self, restaurants: Vec<Restaurant>) -> Vec<Restaurant> {
    if self.is_empty() {
      return restaurants;
    }
    restaurants.into_iter().filter(|r| self.matches(r)).collect()
  }
}

/// Distinct values of `field`, in order of first appearance.
pub fn distinct<'a>(
  restaurants: &'a [Restaurant],
  field: impl Fn(&'a Restaurant) -> &'a str,
) -> Vec<String> {
  let mut seen = Vec::<&str>::new();
  for value in restaurants.iter().map(field) {
    if !seen.contains(&value) {
      seen.push(value);
    }
  }
  seen.into_iter().map(String::from).collect()
}
