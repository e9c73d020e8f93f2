//! Application command definitions and their handlers.

use tracing::{debug, info};

use crate::bot::Context;
use crate::channels::resolve_channels;
use crate::embeds::story_embed;
use crate::error::{Error, Result};
use crate::search;
use crate::storage::AutoresponseLocation;
use crate::stories::StoryData;
use crate::types::*;
use crate::views::SeriesView;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

fn option(
    kind: CommandOptionType,
    name: &str,
    description: &str,
    required: Option<bool>,
) -> ApplicationCommandOption {
    ApplicationCommandOption {
        name: name.to_string(),
        description: description.to_string(),
        kind,
        required,
        choices: Vec::new(),
        options: Vec::new(),
    }
}

fn subcommand(name: &str, description: &str, options: Vec<ApplicationCommandOption>) -> ApplicationCommandOption {
    ApplicationCommandOption {
        options,
        ..option(CommandOptionType::SubCommand, name, description, None)
    }
}

fn chat_input(name: &str, description: &str, options: Vec<ApplicationCommandOption>) -> ApplicationCommand {
    ApplicationCommand {
        id: None,
        name: name.to_string(),
        description: description.to_string(),
        options,
        kind: 1,
        default_member_permissions: None,
        dm_permission: None,
    }
}

/// Every global command the bot registers.
pub fn slash_commands() -> Vec<ApplicationCommand> {
    let channels = |description: &str| {
        vec![option(CommandOptionType::String, "channels", description, Some(true))]
    };

    let wf_autoresponse = ApplicationCommand {
        default_member_permissions: Some(Permissions::ADMINISTRATOR.bits().to_string()),
        dm_permission: Some(false),
        ..chat_input(
            "wf_autoresponse",
            "Autoresponse-related commands for automatically responding to fanfiction links in certain channels.",
            vec![
                subcommand(
                    "get",
                    "Display the channels in the server set to autorespond to webfiction links.",
                    Vec::new(),
                ),
                subcommand(
                    "add",
                    "Set the bot to listen for AO3/FFN/other site links posted in the given channels.",
                    channels("A list of channels to add, separated by spaces."),
                ),
                subcommand(
                    "remove",
                    "Set the bot to not listen for AO3/FFN/other site links posted in the given channels.",
                    channels("A list of channels to remove, separated by spaces."),
                ),
                subcommand(
                    "clear",
                    "Set the bot to not listen for AO3/FFN/other site links posted any guild channels.",
                    Vec::new(),
                ),
            ],
        )
    };

    let platform = ApplicationCommandOption {
        choices: ["ao3", "ffn", "other"]
            .into_iter()
            .map(|name| ApplicationCommandOptionChoice {
                name: name.to_string(),
                value: serde_json::Value::from(name),
            })
            .collect(),
        ..option(
            CommandOptionType::String,
            "platform",
            "The platform to search. Only urls are accepted for `other`.",
            Some(true),
        )
    };
    let wf_search = chat_input(
        "wf_search",
        "Search available platforms for a fic with a certain title or url.",
        vec![
            platform,
            option(
                CommandOptionType::String,
                "name_or_url",
                "The search string for the story title, or the story url.",
                Some(true),
            ),
        ],
    );

    let invite = chat_input("invite", "Get a link to invite this bot to a server.", Vec::new());

    vec![wf_autoresponse, wf_search, invite]
}

/// OAuth2 link that adds the bot with the permissions it needs.
pub fn invite_link(application_id: &str) -> String {
    let permissions = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::EMBED_LINKS;
    format!(
        "https://discord.com/oauth2/authorize?client_id={application_id}&scope=bot+applications.commands&permissions={}",
        permissions.bits()
    )
}

// ---------------------------------------------------------------------------
// Option extraction
// ---------------------------------------------------------------------------

fn command_info(interaction: &Interaction) -> Option<(&str, &[CommandOption])> {
    let data = interaction.data.as_ref()?;
    Some((data.name.as_deref()?, &data.options))
}

/// The invoked subcommand of a command group.
fn subcommand_info(options: &[CommandOption]) -> Option<(&str, &[CommandOption])> {
    options
        .iter()
        .find(|o| o.kind == CommandOptionType::SubCommand)
        .map(|o| (o.name.as_str(), o.options.as_slice()))
}

fn get_option_str<'a>(options: &'a [CommandOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_ref())
        .and_then(|v| v.as_str())
}

fn channel_list_embed(title: &str, locations: &[AutoresponseLocation]) -> Embed {
    let lines = locations
        .iter()
        .map(|loc| format!("<#{}>", loc.channel_id))
        .collect::<Vec<_>>()
        .join("\n");
    let embed = Embed::new().title(title);
    if lines.is_empty() {
        embed
    } else {
        embed.description(lines)
    }
}

fn ephemeral_text(text: &str) -> InteractionResponse {
    InteractionResponse {
        kind: InteractionCallbackType::ChannelMessageWithSource,
        data: Some(InteractionCallbackData {
            content: Some(text.to_string()),
            flags: Some(EPHEMERAL),
            ..Default::default()
        }),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run the slash command carried by `interaction`.
pub async fn handle_slash_command(ctx: &Context, interaction: &Interaction) -> Result<()> {
    let (name, options) = command_info(interaction).ok_or(Error::MissingData("interaction data"))?;
    debug!(command = name, "handling slash command");

    match name {
        "wf_autoresponse" => {
            let Some(guild_id) = interaction.guild_id.as_deref().and_then(snowflake_u64) else {
                let reply = ephemeral_text("This command can only be used in a server.");
                ctx.http
                    .create_interaction_response(&interaction.id, &interaction.token, &reply)
                    .await?;
                return Ok(());
            };
            let (sub, sub_options) = subcommand_info(options).ok_or(Error::MissingData("subcommand"))?;
            autoresponse(ctx, interaction, guild_id, sub, sub_options).await
        }
        "wf_search" => {
            let platform = get_option_str(options, "platform").unwrap_or("other");
            let query = get_option_str(options, "name_or_url").ok_or(Error::MissingData("name_or_url"))?;
            wf_search(ctx, interaction, platform, query).await
        }
        "invite" => invite(ctx, interaction).await,
        other => {
            info!(command = other, "unknown slash command");
            Ok(())
        }
    }
}

async fn autoresponse(
    ctx: &Context,
    interaction: &Interaction,
    guild_id: u64,
    sub: &str,
    options: &[CommandOption],
) -> Result<()> {
    let ephemeral = sub != "get";
    ctx.http
        .create_interaction_response(&interaction.id, &interaction.token, &InteractionResponse::deferred(ephemeral))
        .await?;

    let embed = match sub {
        "get" => {
            let active = ctx.store.by_guild(guild_id).await?;
            channel_list_embed("Autoresponse Channels for Fanfic Links", &active)
        }
        "add" | "remove" => {
            let locations = requested_locations(ctx, guild_id, options).await;
            let active = if locations.is_empty() {
                ctx.store.by_guild(guild_id).await?
            } else if sub == "add" {
                ctx.store.add(locations).await?
            } else {
                ctx.store.remove(locations).await?
            };
            let title = if sub == "add" {
                "Adjusted Autoresponse Channels for Fanfic Links"
            } else {
                "Adjusted Autoresponse Channels for Webfiction Links"
            };
            channel_list_embed(title, &active)
        }
        "clear" => {
            ctx.store.clear(guild_id).await?;
            Embed::new().title("Cleared Autoresponse Channels for Webfiction Links")
        }
        other => {
            info!(subcommand = other, "unknown wf_autoresponse subcommand");
            return Err(Error::MissingData("wf_autoresponse subcommand"));
        }
    };

    let followup = CreateMessage::new().embed(embed).ephemeral(ephemeral);
    ctx.http
        .create_followup_message(&interaction.application_id, &interaction.token, &followup)
        .await?;
    info!(guild_id, subcommand = sub, "updated autoresponse settings");
    Ok(())
}

/// Locations for the channels named in the `channels` option.
async fn requested_locations(ctx: &Context, guild_id: u64, options: &[CommandOption]) -> Vec<AutoresponseLocation> {
    let input = get_option_str(options, "channels").unwrap_or_default();
    let state = ctx.state.read().await;
    resolve_channels(state.channels.channels(&guild_id.to_string()), input)
        .into_iter()
        .filter_map(|c| snowflake_u64(&c.id))
        .map(|channel_id| AutoresponseLocation::new(guild_id, channel_id))
        .collect()
}

async fn wf_search(ctx: &Context, interaction: &Interaction, platform: &str, query: &str) -> Result<()> {
    ctx.http
        .create_interaction_response(&interaction.id, &interaction.token, &InteractionResponse::deferred(false))
        .await?;

    let data = match platform {
        "ao3" => search::search_ao3(&ctx.stories, query).await,
        "ffn" => search::search_ffn(&ctx.stories, query).await,
        _ => search::search_other(&ctx.stories, query).await,
    };
    let embed = story_embed(data.as_ref());

    let (Some(StoryData::Ao3Series(series)), Some(owner)) = (data, interaction.author()) else {
        let followup = CreateMessage::new().embed(embed);
        ctx.http
            .create_followup_message(&interaction.application_id, &interaction.token, &followup)
            .await?;
        return Ok(());
    };

    let nonce = ctx.views.next_nonce();
    let mut view = SeriesView::new(
        nonce,
        owner.id.clone(),
        series,
        interaction.application_id.clone(),
        interaction.token.clone(),
    );
    let followup = CreateMessage::new().embed(embed).components(view.components());
    let message = ctx
        .http
        .create_followup_message(&interaction.application_id, &interaction.token, &followup)
        .await?;
    view.set_message_id(message.id);
    ctx.views.insert(view, ctx.http.clone()).await;
    let live_views = ctx.views.len().await;
    debug!(nonce, live_views, "registered series view");
    Ok(())
}

async fn invite(ctx: &Context, interaction: &Interaction) -> Result<()> {
    let link = ctx
        .state
        .read()
        .await
        .invite_link
        .clone()
        .unwrap_or_else(|| invite_link(&interaction.application_id));

    let response = InteractionResponse {
        kind: InteractionCallbackType::ChannelMessageWithSource,
        data: Some(InteractionCallbackData {
            embeds: Some(vec![
                Embed::new().description("Click the link below to invite me to one of your servers.")
            ]),
            components: Some(vec![action_row(vec![link_button("Invite", link)])]),
            flags: Some(EPHEMERAL),
            ..Default::default()
        }),
    };
    ctx.http
        .create_interaction_response(&interaction.id, &interaction.token, &response)
        .await?;
    Ok(())
}
