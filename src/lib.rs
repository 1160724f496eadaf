pub mod api;
pub mod cache;
pub mod config;
pub mod logging;
pub mod render;
pub mod state;
pub mod sync;
