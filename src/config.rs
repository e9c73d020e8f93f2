//! Runtime configuration.
//!
//! Settings come from a TOML file (`config.toml` by default, or whatever
//! `WEBFIC_CONFIG` points at). Credentials can also be supplied through the
//! environment or a `.env` file, which take priority over the file.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const APP_ORGANIZATION: &str = "Sachaa-Thanasius";
const APP_NAME: &str = "discord-webfic-searcher";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub atlas: AtlasConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Optional shard info: `[shard_id, num_shards]`.
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

#[derive(Clone, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
}

#[derive(Clone, Default, Deserialize)]
pub struct AtlasConfig {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig").field("token", &"<redacted>").finish()
    }
}

impl std::fmt::Debug for AtlasConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasConfig")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load configuration from the default location, applying env overrides.
    pub fn load_default() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let path = std::env::var("WEBFIC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            info!(path = %path.display(), "no config file found, relying on environment");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without consulting the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("DISCORD_TOKEN") {
            debug!("using DISCORD_TOKEN from environment");
            self.discord.token = token;
        }
        if let Ok(login) = std::env::var("ATLAS_LOGIN") {
            self.atlas.login = login;
        }
        if let Ok(password) = std::env::var("ATLAS_PASSWORD") {
            self.atlas.password = password;
        }
    }

    /// The bot cannot start without a token; Atlas credentials are optional
    /// (FFN lookups fall back to FicHub when Atlas rejects us).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::Missing("discord.token"));
        }
        Ok(())
    }

    /// Directory holding the settings database.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().to_path_buf()),
        }
    }

    /// Directory holding the command tree hash.
    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.cache_dir().to_path_buf()),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("", APP_ORGANIZATION, APP_NAME).ok_or(ConfigError::NoHomeDirectory)
}
