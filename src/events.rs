//! Typed gateway events.
//!
//! Instead of matching on raw `(op, t, serde_json::Value)` tuples everywhere,
//! the gateway module deserialises dispatch payloads into this enum so the rest
//! of the bot can pattern-match on strongly-typed data.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've successfully identified, bot is ready.
    Ready(ReadyEvent),

    /// Full guild object lazily sent after READY (and on joining a guild).
    GuildCreate(Guild),

    /// The bot left a guild or the guild became unavailable.
    GuildDelete(UnavailableGuild),

    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),

    /// A message was created in a channel we can see.
    MessageCreate(Message),

    /// An interaction was created (slash command, button, select).
    InteractionCreate(Interaction),

    /// A RESUME completed; missed events have been replayed.
    Resumed,

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). The inner bool indicates whether
    /// the session is resumable (`true`) or we must re-identify (`false`).
    InvalidSession(bool),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

// ---------------------------------------------------------------------------
// Parsing from a raw GatewayPayload
// ---------------------------------------------------------------------------

impl GatewayEvent {
    /// Try to convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails: unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t.as_deref(), payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload.d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<&str>, data: Option<serde_json::Value>) -> Self {
        let Some(name) = event_name else {
            return GatewayEvent::Unknown {
                event_name: None,
                op: 0,
                data,
            };
        };

        if name == "RESUMED" {
            return GatewayEvent::Resumed;
        }

        let Some(d) = data else {
            return GatewayEvent::Unknown {
                event_name: Some(name.to_string()),
                op: 0,
                data: None,
            };
        };

        match name {
            "READY" => typed(name, d, GatewayEvent::Ready),
            "GUILD_CREATE" => typed(name, d, GatewayEvent::GuildCreate),
            "GUILD_DELETE" => typed(name, d, GatewayEvent::GuildDelete),
            "CHANNEL_CREATE" => typed(name, d, GatewayEvent::ChannelCreate),
            "CHANNEL_UPDATE" => typed(name, d, GatewayEvent::ChannelUpdate),
            "CHANNEL_DELETE" => typed(name, d, GatewayEvent::ChannelDelete),
            "MESSAGE_CREATE" => typed(name, d, GatewayEvent::MessageCreate),
            "INTERACTION_CREATE" => typed(name, d, GatewayEvent::InteractionCreate),
            _ => GatewayEvent::Unknown {
                event_name: Some(name.to_string()),
                op: 0,
                data: Some(d),
            },
        }
    }
}

/// Deserialise `d` into `T` and wrap it, or fall back to `Unknown` with a
/// warning if the payload doesn't match our model.
fn typed<T: DeserializeOwned>(name: &str, d: serde_json::Value, wrap: fn(T) -> GatewayEvent) -> GatewayEvent {
    match T::deserialize(&d) {
        Ok(value) => wrap(value),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            GatewayEvent::Unknown {
                event_name: Some(name.to_string()),
                op: 0,
                data: Some(d),
            }
        }
    }
}
