use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use restocache::api::{NewReview, RestaurantClient};
use restocache::cache::LocalStore;
use restocache::config::Config;
use restocache::logging::init_logging;
use restocache::render;
use restocache::state::AppState;
use restocache::sync::{RestaurantFilter, SyncCoordinator, SyncOptions, ALL};

#[derive(Parser, Debug)]
#[command(name = "restocache")]
#[command(about = "Offline-first restaurant reviews with a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/restocache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Work from the local cache only; writes are queued until the next online run
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List restaurants, optionally filtered
  Restaurants {
    #[arg(long, default_value = ALL)]
    cuisine: String,
    #[arg(long, default_value = ALL)]
    neighborhood: String,
  },
  /// Show one restaurant with its reviews
  Restaurant { id: i64 },
  /// List the reviews of one restaurant
  Reviews { restaurant_id: i64 },
  /// List every neighborhood
  Neighborhoods,
  /// List every cuisine
  Cuisines,
  /// Mark a restaurant as favorite (or not)
  Favorite {
    id: i64,
    #[arg(action = clap::ArgAction::Set)]
    favorite: bool,
  },
  /// Add a review
  Review {
    restaurant_id: i64,
    #[arg(long)]
    name: String,
    #[arg(long)]
    rating: u8,
    #[arg(long, default_value = "")]
    comments: String,
  },
  /// Show writes waiting for connectivity
  Pending,
  /// Send queued writes to the server
  Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&Config::data_dir()?)?;

  let remote = Arc::new(RestaurantClient::new(&config.api)?);
  let store = LocalStore::open(&config.cache_path()?)?;

  // Start offline so that going online replays writes queued by earlier runs
  let options = SyncOptions {
    start_online: false,
    ..SyncOptions::from_config(&config)
  };
  let sync = SyncCoordinator::new(remote, store, options);

  let replayed = if args.offline {
    Default::default()
  } else {
    sync.set_online(true).await?
  };
  info!(offline = args.offline, command = ?args.command, "Running command");

  let mut state = AppState::new(sync.is_online());
  let mut out = stdout().lock();

  match args.command {
    Command::Restaurants {
      cuisine,
      neighborhood,
    } => {
      let filter = RestaurantFilter::from_selection(&cuisine, &neighborhood);
      state.load_index(&sync, filter).await?;
      render::render_restaurants(&mut out, &state)?;
    }
    Command::Restaurant { id } => {
      let restaurant = state.load_restaurant(&sync, id).await?;
      render::render_restaurant(&mut out, restaurant)?;
    }
    Command::Reviews { restaurant_id } => {
      let reviews = sync.reviews_for_restaurant(restaurant_id).await?;
      render::render_reviews(&mut out, &reviews)?;
    }
    Command::Neighborhoods => {
      state.neighborhoods = sync.neighborhoods().await?;
      render::render_options(&mut out, &state.neighborhoods)?;
    }
    Command::Cuisines => {
      state.cuisines = sync.cuisines().await?;
      render::render_options(&mut out, &state.cuisines)?;
    }
    Command::Favorite { id, favorite } => {
      sync.toggle_favorite(id, favorite).await?;
      writeln!(out, "Restaurant {} favorite: {}", id, favorite)?;
    }
    Command::Review {
      restaurant_id,
      name,
      rating,
      comments,
    } => {
      let review = sync
        .add_review(NewReview {
          name,
          rating,
          comments,
          restaurant_id,
        })
        .await?;
      render::render_reviews(&mut out, std::slice::from_ref(&review))?;
    }
    Command::Pending => {
      state.load_pending(&sync).await?;
      render::render_pending(&mut out, &state)?;
    }
    Command::Sync => {
      if args.offline {
        return Err(eyre!("Cannot sync while --offline is set"));
      }
      render::render_replay(&mut out, &replayed)?;
    }
  }

  out.flush()?;
  drop(out);

  // Let background refreshes and server writes land before exiting
  sync.shutdown().await;
  Ok(())
}
