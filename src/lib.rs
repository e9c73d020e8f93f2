//! A Discord bot that answers webfiction links with informational embeds.
//!
//! Transport lives in [`gateway`] (WebSocket) and [`http`] (REST). Story
//! lookups live in [`stories`] and [`search`], and [`bot::start`] runs the
//! event loop that ties them together.

pub mod bot;
pub mod channels;
pub mod commands;
pub mod config;
pub mod embeds;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod paths;
pub mod search;
pub mod sites;
pub mod storage;
pub mod stories;
pub mod text;
pub mod tree;
pub mod types;
pub mod views;

pub use config::Config;
pub use error::{Error, Result};

/// Run the bot until the gateway connection is given up on.
pub async fn run(config: Config) -> Result<()> {
    bot::start(config).await
}
