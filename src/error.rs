//! Error types for every layer of the bot.
//!
//! Each layer gets its own enum so call sites can match on what actually went
//! wrong; [`Error`] is the union the event loop and handlers work with.

use thiserror::Error;

/// Errors from the Discord REST client.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api { status: u16, body: String, route: String },
    /// Transport / network error.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Serialisation error.
    #[error("Serialisation error: {0}")]
    Serde(String),
}

/// Errors from the story metadata services (Atlas, FicHub, AO3).
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} responded with status {status}")]
    Status { service: &'static str, status: u16 },
    #[error("{service} returned an error: {message}")]
    Api { service: &'static str, message: String },
    #[error("could not parse {service} response: {message}")]
    Parse { service: &'static str, message: String },
    #[error("story not found")]
    NotFound,
}

/// Errors from the autoresponse settings store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    #[error("no home directory available to derive data paths")]
    NoHomeDirectory,
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Story(#[from] StoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("missing {0}")]
    MissingData(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
