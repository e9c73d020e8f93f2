//! Event handlers for the Discord bot.
//!
//! Each public function in this module handles one category of gateway event.
//! Handlers receive the shared [`Context`] and never panic on remote
//! failures: errors are logged and, where a user is waiting, answered.

use tracing::{debug, error, info, warn};

use crate::bot::Context;
use crate::commands::{self, invite_link, slash_commands};
use crate::embeds::{is_not_found, story_embed};
use crate::error::Result;
use crate::search;
use crate::sites;
use crate::storage::AutoresponseLocation;
use crate::tree;
use crate::types::*;

// ---------------------------------------------------------------------------
// READY handler
// ---------------------------------------------------------------------------

/// Stores identity information in [`BotState`](crate::bot::BotState) and
/// syncs the global command tree once per process.
pub async fn on_ready(ctx: &Context, ready: ReadyEvent) {
    info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "bot is ready!");

    let app_id = ready.application.id;
    let already_synced = {
        let mut state = ctx.state.write().await;
        state.bot_user_id = Some(ready.user.id);
        state.invite_link = Some(invite_link(&app_id));
        state.application_id = Some(app_id.clone());
        state.commands_synced
    };

    if already_synced {
        return;
    }

    match tree::sync_if_commands_updated(&ctx.http, &app_id, &slash_commands(), &ctx.cache_dir).await {
        Ok(synced) => {
            debug!(synced, "command tree checked");
            ctx.state.write().await.commands_synced = true;
        }
        Err(e) => warn!(error = %e, "failed to sync application commands"),
    }
}

// ---------------------------------------------------------------------------
// Guild and channel cache
// ---------------------------------------------------------------------------

pub async fn on_guild_create(ctx: &Context, guild: &Guild) {
    debug!(guild = %guild.name, channels = guild.channels.len(), "caching guild channels");
    ctx.state.write().await.channels.insert_guild(guild);
}

/// An outage (`unavailable`) keeps the cached channels; leaving drops them.
pub async fn on_guild_delete(ctx: &Context, guild: &UnavailableGuild) {
    if guild.unavailable {
        debug!(guild_id = %guild.id, "guild became unavailable");
        return;
    }
    ctx.state.write().await.channels.remove_guild(&guild.id);
}

pub async fn on_channel_upsert(ctx: &Context, channel: &Channel) {
    ctx.state.write().await.channels.upsert_channel(channel);
}

pub async fn on_channel_delete(ctx: &Context, channel: &Channel) {
    ctx.state.write().await.channels.remove_channel(channel);
}

// ---------------------------------------------------------------------------
// MESSAGE_CREATE handler (autoresponse)
// ---------------------------------------------------------------------------

/// The settings row a message would need, or `None` if the message can never
/// trigger an autoresponse.
fn autoresponse_location(msg: &Message, bot_user_id: Option<&str>) -> Option<AutoresponseLocation> {
    if msg.author.bot || bot_user_id == Some(msg.author.id.as_str()) {
        return None;
    }
    let guild_id = snowflake_u64(msg.guild_id.as_deref()?)?;
    let channel_id = snowflake_u64(&msg.channel_id)?;
    Some(AutoresponseLocation::new(guild_id, channel_id))
}

/// Post an informational embed for every story link in an enabled channel.
pub async fn on_message(ctx: &Context, msg: Message) {
    let location = {
        let state = ctx.state.read().await;
        autoresponse_location(&msg, state.bot_user_id.as_deref())
    };
    let Some(location) = location else { return };

    if !sites::contains_story_link(&msg.content) {
        return;
    }

    match ctx.store.contains(location).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            error!(error = %e, "failed to read autoresponse settings");
            return;
        }
    }

    info!(
        guild_id = location.guild_id,
        channel_id = location.channel_id,
        author = %msg.author.tag(),
        "autoresponding to story links"
    );

    if let Err(e) = ctx.http.trigger_typing(&msg.channel_id).await {
        debug!(error = %e, "failed to trigger typing");
    }

    for data in search::data_from_links(&ctx.stories, &msg.content).await {
        let Some(data) = data else { continue };
        let embed = story_embed(Some(&data));
        if is_not_found(&embed) {
            continue;
        }
        let reply = CreateMessage::new().embed(embed);
        if let Err(e) = ctx.http.create_message(&msg.channel_id, &reply).await {
            error!(error = %e, title = data.title(), "failed to send story embed");
        }
    }
}

// ---------------------------------------------------------------------------
// INTERACTION_CREATE handler
// ---------------------------------------------------------------------------

/// Route an interaction to the slash command handlers or a live view.
pub async fn on_interaction(ctx: &Context, interaction: &Interaction) -> Result<()> {
    match interaction.kind {
        InteractionType::Ping => {
            let pong = InteractionResponse {
                kind: InteractionCallbackType::Pong,
                data: None,
            };
            ctx.http
                .create_interaction_response(&interaction.id, &interaction.token, &pong)
                .await?;
        }
        InteractionType::ApplicationCommand => commands::handle_slash_command(ctx, interaction).await?,
        InteractionType::MessageComponent => {
            let Some(response) = ctx.views.respond(interaction).await else {
                return Ok(());
            };
            ctx.http
                .create_interaction_response(&interaction.id, &interaction.token, &response)
                .await?;
        }
        other => debug!(kind = ?other, "ignoring interaction"),
    }
    Ok(())
}
