//! Feed ingestion engine: detects RSS / Atom dialects, fetches many feeds
//! concurrently with conditional GETs, and merges fresh copies into stored ones.
//!
//! ```ignore
//! use feedpull::{Config, FeedEngine};
//!
//! let engine = FeedEngine::new(Config::default())?;
//! let feed = engine.fetch_and_parse("https://example.com/feed.xml", &engine.default_options()).await?;
//! ```

pub mod config;
pub mod engine;
pub mod feed;
pub mod util;

pub use config::Config;
pub use engine::FeedEngine;
