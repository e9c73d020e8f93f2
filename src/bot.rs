//! Core bot infrastructure: shared context, gateway bridge, and the async
//! event loop.
//!
//! Everything handlers need lives in one [`Bot`] behind an `Arc`. Mutable
//! session state sits in [`BotState`] behind an `async_lock::RwLock`.

use std::path::PathBuf;
use std::sync::Arc;

use async_lock::RwLock;
use tracing::{error, info, trace, warn};

use crate::channels::ChannelCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig};
use crate::handlers;
use crate::http::DiscordHttpClient;
use crate::paths::resolve_path_with_links;
use crate::storage::SettingsStore;
use crate::stories::{self, StoryClients};
use crate::types::GatewayIntents;
use crate::views::ViewRegistry;

/// Shown as "Playing ..." in the member list.
pub const ACTIVITY: &str = "https://github.com/Sachaa-Thanasius/discord-webfic-searcher";
const DATABASE_FILE: &str = "webfic_searcher_data.db";

/// Session state learned from the gateway.
#[derive(Debug, Default)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<String>,
    /// The application ID (set on READY).
    pub application_id: Option<String>,
    pub invite_link: Option<String>,
    /// Whether the command tree has been checked this process.
    pub commands_synced: bool,
    pub channels: ChannelCache,
}

/// Everything a handler needs.
pub struct Bot {
    pub http: DiscordHttpClient,
    pub stories: StoryClients,
    pub store: SettingsStore,
    pub views: ViewRegistry,
    pub state: RwLock<BotState>,
    pub cache_dir: PathBuf,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("http", &self.http)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

pub type Context = Arc<Bot>;

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub fn gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
}

impl Bot {
    /// Open the settings database and build every client from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let cache_dir = config.cache_dir()?;
        let db_path = resolve_path_with_links(&data_dir.join(DATABASE_FILE), false)?;
        let store = SettingsStore::open(&db_path)?;

        let client = stories::build_http_client()?;
        Ok(Self {
            http: DiscordHttpClient::with_client(client.clone(), config.discord.token.clone()),
            stories: StoryClients::new(client, config.atlas.login.clone(), config.atlas.password.clone()),
            store,
            views: ViewRegistry::default(),
            state: RwLock::new(BotState::default()),
            cache_dir,
        })
    }
}

/// Connect to the gateway and run the event loop until the connection is
/// given up on.
pub async fn start(config: Config) -> Result<()> {
    let ctx: Context = Arc::new(Bot::from_config(&config)?);

    let gw = gateway::connect(GatewayConfig {
        token: config.discord.token.clone(),
        intents: gateway_intents(),
        shard: config.shard,
        activity: Some(ACTIVITY.to_string()),
    })
    .await
    .map_err(|e| {
        error!(error = %e, "failed to start gateway");
        e
    })?;

    info!("gateway connected, entering event loop");

    while let Ok(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => handlers::on_ready(&ctx, ready).await,

            GatewayEvent::GuildCreate(guild) => handlers::on_guild_create(&ctx, &guild).await,
            GatewayEvent::GuildDelete(guild) => handlers::on_guild_delete(&ctx, &guild).await,

            GatewayEvent::ChannelCreate(channel) | GatewayEvent::ChannelUpdate(channel) => {
                handlers::on_channel_upsert(&ctx, &channel).await
            }
            GatewayEvent::ChannelDelete(channel) => handlers::on_channel_delete(&ctx, &channel).await,

            // Lookups can take seconds, so they must not stall the loop.
            GatewayEvent::MessageCreate(msg) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { handlers::on_message(&ctx, msg).await });
            }

            GatewayEvent::InteractionCreate(interaction) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handlers::on_interaction(&ctx, &interaction).await {
                        error!(error = %e, "failed to handle interaction");
                    }
                });
            }

            GatewayEvent::Resumed => info!("gateway session resumed"),

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => trace!(event = %name, "unhandled gateway event"),

            _ => {}
        }
    }

    warn!("event stream ended, bot shutting down");
    gw.driver_handle.abort();
    Err(Error::Gateway("gateway connection closed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Bot: Send, Sync);

    #[test]
    fn bot_state_default_has_no_identity() {
        let state = BotState::default();
        assert!(state.bot_user_id.is_none());
        assert!(state.application_id.is_none());
        assert!(state.invite_link.is_none());
        assert!(!state.commands_synced);
    }

    #[test]
    fn gateway_intents_cover_message_content() {
        let intents = gateway_intents();
        assert!(intents.contains(GatewayIntents::GUILDS));
        assert!(intents.contains(GatewayIntents::GUILD_MESSAGES));
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert_eq!(intents.bits(), 1 | 512 | 32768);
    }

    #[test]
    fn from_config_creates_database_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_toml(&format!(
            "[discord]\ntoken = \"t\"\n[storage]\ndata_dir = {:?}\ncache_dir = {:?}\n",
            dir.path().join("data"),
            dir.path().join("cache"),
        ))
        .unwrap();
        let bot = Bot::from_config(&config).unwrap();
        assert!(dir.path().join("data").join(DATABASE_FILE).exists());
        assert_eq!(bot.cache_dir, dir.path().join("cache"));
    }
}
