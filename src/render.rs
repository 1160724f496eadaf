//! Plain-text rendering of [`AppState`] for the terminal.

use std::io::{self, Write};

use crate::api::{Restaurant, Review};
use crate::state::AppState;
use crate::sync::{PendingWrite, ReplaySummary};

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Rating as five stars, e.g. `★★★☆☆`
pub fn stars(rating: u8) -> String {
  let filled = usize::from(rating.min(5));
  format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn favorite_marker(restaurant: &Restaurant) -> &'static str {
  if restaurant.is_favorite {
    "♥"
  } else {
    " "
  }
}

pub fn render_restaurants(out: &mut impl Write, state: &AppState) -> io::Result<()> {
  if !state.filter.is_empty() {
    writeln!(
      out,
      "Cuisine: {}  Neighborhood: {}",
      state.filter.cuisine.as_deref().unwrap_or("all"),
      state.filter.neighborhood.as_deref().unwrap_or("all"),
    )?;
  }

  if state.restaurants.is_empty() {
    return writeln!(out, "No restaurants found");
  }

  for r in &state.restaurants {
    writeln!(
      out,
      "{} {:>4}  {:<32} {:<16} {:<14} {}",
      favorite_marker(r),
      r.id,
      truncate(&r.name, 32),
      truncate(&r.neighborhood, 16),
      truncate(&r.cuisine_type, 14),
      r.url(),
    )?;
  }
  Ok(())
}

pub fn render_restaurant(out: &mut impl Write, restaurant: &Restaurant) -> io::Result<()> {
  writeln!(out, "{} {}", restaurant.name, favorite_marker(restaurant).trim())?;
  writeln!(out, "  {} · {}", restaurant.cuisine_type, restaurant.neighborhood)?;
  if !restaurant.address.is_empty() {
    writeln!(out, "  {}", restaurant.address)?;
  }
  writeln!(out, "  Photo: {}", restaurant.image_url())?;

  if !restaurant.operating_hours.is_empty() {
    writeln!(out, "Hours")?;
    for (day, hours) in &restaurant.operating_hours {
      writeln!(out, "  {:<10} {}", day, hours)?;
    }
  }

  writeln!(out, "Reviews")?;
  render_reviews(out, &restaurant.reviews)
}

pub fn render_reviews(out: &mut impl Write, reviews: &[Review]) -> io::Result<()> {
  if reviews.is_empty() {
    return writeln!(out, "  No reviews yet!");
  }

  for review in reviews {
    let date = review
      .created_at
      .map(|ts| ts.format("%B %-d, %Y").to_string())
      .unwrap_or_default();
    // Negative ids have not reached the server yet
    let marker = if review.id < 0 { " (pending)" } else { "" };
    writeln!(out, "  {} {}  {}{}", stars(review.rating), review.name, date, marker)?;
    if !review.comments.is_empty() {
      writeln!(out, "    {}", review.comments)?;
    }
  }
  Ok(())
}

/// One value per line, used for the neighborhood and cuisine pickers.
pub fn render_options(out: &mut impl Write, options: &[String]) -> io::Result<()> {
  writeln!(out, "{}", crate::sync::ALL)?;
  for option in options {
    writeln!(out, "{}", option)?;
  }
  Ok(())
}

pub fn render_pending(out: &mut impl Write, state: &AppState) -> io::Result<()> {
  writeln!(out, "Status: {}", if state.online { "online" } else { "offline" })?;
  if state.pending.is_empty() {
    return writeln!(out, "No queued writes");
  }
  for write in &state.pending {
    let kind = match write {
      PendingWrite::Favorite { .. } => "favorite",
      PendingWrite::Review { .. } => "review",
    };
    writeln!(out, "  {:<8} {}", kind, write.describe())?;
  }
  Ok(())
}

pub fn render_replay(out: &mut impl Write, summary: &ReplaySummary) -> io::Result<()> {
  writeln!(out, "Sent {} queued write(s), {} failed", summary.sent, summary.failed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::NewReview;
  use crate::sync::RestaurantFilter;

  fn restaurant(id: i64, name: &str, is_favorite: bool) -> Restaurant {
    serde_json::from_value(serde_json::json!({
      "id": id,
      "name": name,
      "neighborhood": "Brooklyn",
      "cuisine_type": "Pizza",
      "is_favorite": is_favorite,
    }))
    .expect("restaurant parses")
  }

  fn rendered(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
    let mut out = Vec::new();
    f(&mut out).expect("render succeeds");
    String::from_utf8(out).expect("utf-8 output")
  }

  #[test]
  fn test_truncate_counts_characters() {
    assert_eq!(truncate("hello", 5), "hello");
    assert_eq!(truncate("hello world", 8), "hello...");
    assert_eq!(truncate("Ñandú asado", 8), "Ñandú...");
  }

  #[test]
  fn test_stars() {
    assert_eq!(stars(3), "★★★☆☆");
    assert_eq!(stars(9), "★★★★★");
  }

  #[test]
  fn test_restaurant_list_marks_favorites() {
    let state = AppState {
      restaurants: vec![restaurant(1, "Mission Chinese Food", true), restaurant(2, "Emily", false)],
      ..AppState::new(true)
    };
    let text = rendered(|out| render_restaurants(out, &state));
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with('♥'));
    assert!(lines[0].contains("./restaurant.html?id=1"));
    assert!(lines[1].starts_with(' '));
  }

  #[test]
  fn test_empty_filtered_list() {
    let state = AppState {
      filter: RestaurantFilter::cuisine("Thai"),
      ..AppState::new(true)
    };
    let text = rendered(|out| render_restaurants(out, &state));
    assert_eq!(text, "Cuisine: Thai  Neighborhood: all\nNo restaurants found\n");
  }

  #[test]
  fn test_detail_shows_placeholder_and_pending_review() {
    let mut detail = restaurant(7, "Emily", false);
    detail.reviews = vec![NewReview {
      name: "Ana".to_string(),
      rating: 4,
      comments: "Great crust".to_string(),
      restaurant_id: 7,
    }
    .to_provisional(-1, chrono::Utc::now())];

    let text = rendered(|out| render_restaurant(out, &detail));
    assert!(text.contains("Photo: /img/icons/icon-placeholder.png"));
    assert!(text.contains("★★★★☆ Ana"));
    assert!(text.contains("(pending)"));
    assert!(text.contains("    Great crust"));
  }

  #[test]
  fn test_pending_lists_queued_writes() {
    let state = AppState {
      pending: vec![PendingWrite::Favorite {
        restaurant_id: 3,
        is_favorite: true,
      }],
      ..AppState::new(false)
    };
    let text = rendered(|out| render_pending(out, &state));
    assert!(text.starts_with("Status: offline\n"));
    assert!(text.contains("favorite"));
  }

  #[test]
  fn test_options_start_with_all() {
    let text = rendered(|out| render_options(out, &["Queens".to_string()]));
    assert_eq!(text, "all\nQueens\n");
  }
}
