//! Resolution of the free-form channel list argument taken by the
//! autoresponse commands, plus the per-guild channel cache it reads from.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Channel, Guild, Snowflake};

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:([0-9]{15,20})|<#([0-9]{15,20})>)$").expect("valid channel id pattern"))
}

fn resolve_one<'a>(channels: &'a [Channel], token: &str) -> Option<&'a Channel> {
    match id_regex().captures(token) {
        Some(caps) => {
            let id = caps.get(1).or_else(|| caps.get(2))?.as_str();
            channels.iter().find(|c| c.id == id)
        }
        None => channels.iter().find(|c| c.name.as_deref() == Some(token)),
    }
}

/// Resolve a space-separated list of channel ids, `<#id>` mentions, or
/// exact channel names. Tokens matching nothing are skipped.
pub fn resolve_channels<'a>(channels: &'a [Channel], input: &str) -> Vec<&'a Channel> {
    input.split(' ').filter_map(|token| resolve_one(channels, token)).collect()
}

/// Guild channels as last seen on the gateway.
#[derive(Debug, Clone, Default)]
pub struct ChannelCache {
    guilds: HashMap<Snowflake, Vec<Channel>>,
}

impl ChannelCache {
    pub fn channels(&self, guild_id: &str) -> &[Channel] {
        self.guilds.get(guild_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Replace a guild's channels with those of GUILD_CREATE, active threads included.
    pub fn insert_guild(&mut self, guild: &Guild) {
        let channels = guild.channels.iter().chain(&guild.threads).cloned().collect();
        self.guilds.insert(guild.id.clone(), channels);
    }

    pub fn remove_guild(&mut self, guild_id: &str) {
        self.guilds.remove(guild_id);
    }

    /// Insert or replace a channel (CHANNEL_CREATE / CHANNEL_UPDATE).
    pub fn upsert_channel(&mut self, channel: &Channel) {
        let Some(guild_id) = &channel.guild_id else {
            return;
        };
        let channels = self.guilds.entry(guild_id.clone()).or_default();
        match channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel.clone(),
            None => channels.push(channel.clone()),
        }
    }

    pub fn remove_channel(&mut self, channel: &Channel) {
        if let Some(channels) = channel.guild_id.as_ref().and_then(|g| self.guilds.get_mut(g)) {
            channels.retain(|c| c.id != channel.id);
        }
    }
}
