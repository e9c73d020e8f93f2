//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY (or RESUME)
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect + RESUME on disconnect
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The rest of the codebase consumes a channel of [`GatewayEvent`] values
//! without ever touching `tokio_tungstenite` directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::events::GatewayEvent;
use crate::types::{Activity, GatewayIntents, GatewayPayload, UpdatePresence};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter for outbound gateway messages.
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// How long the caller should wait before sending, or `None` if it can
    /// send immediately. Does not record the send.
    fn delay_at(&self, now: Instant) -> Option<Duration> {
        let mut in_window = self
            .timestamps
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .peekable();
        in_window.peek()?;

        let (count, oldest) = in_window.fold((0u32, None::<Instant>), |(n, oldest), &t| {
            (n + 1, Some(oldest.map_or(t, |o| o.min(t))))
        });
        if count < self.budget {
            return None;
        }
        let expires_at = oldest? + self.window;
        (expires_at > now).then(|| expires_at - now)
    }

    /// Record a send at `now` and prune old entries.
    fn record_at(&mut self, now: Instant) {
        self.timestamps.retain(|&t| now.duration_since(t) < self.window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: GatewayIntents,
    /// Optional shard info: `[shard_id, num_shards]`.
    pub shard: Option<[u32; 2]>,
    /// Activity shown in the member list ("Playing ...").
    pub activity: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("shard", &self.shard)
            .field("activity", &self.activity)
            .finish()
    }
}

impl GatewayConfig {
    fn identify_payload(&self) -> serde_json::Value {
        let mut identify = json!({
            "op": 2,
            "d": {
                "token": self.token,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "webfic-searcher",
                    "device": "webfic-searcher"
                },
                "intents": self.intents.bits(),
            }
        });

        if let Some(shard) = self.shard {
            identify["d"]["shard"] = json!([shard[0], shard[1]]);
        }

        if let Some(name) = &self.activity {
            let presence = UpdatePresence {
                since: None,
                activities: vec![Activity {
                    name: name.clone(),
                    kind: 0,
                }],
                status: "online",
                afk: false,
            };
            identify["d"]["presence"] = json!(presence);
        }

        identify
    }
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    /// A RESUME payload, if we have enough state to resume.
    fn resume_payload(&self, token: &str) -> Option<serde_json::Value> {
        let session_id = self.session_id.as_ref()?;
        let seq = self.sequence?;
        Some(json!({
            "op": 6,
            "d": { "token": token, "session_id": session_id, "seq": seq }
        }))
    }

    fn connect_url(&self) -> String {
        gateway_url(self.resume_gateway_url.as_deref().unwrap_or(DEFAULT_GATEWAY_URL))
    }
}

/// Append version/encoding query params unless the URL already carries them.
fn gateway_url(base: &str) -> String {
    if base.contains("v=10") {
        base.to_string()
    } else if base.contains('?') {
        format!("{base}&v=10&encoding=json")
    } else {
        format!("{base}/?v=10&encoding=json")
    }
}

// ---------------------------------------------------------------------------
// WebSocket halves (transport boundary)
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Handle to a running gateway connection.
///
/// Dropping the event receiver shuts the driver down after its next event.
pub struct GatewayHandle {
    /// Receive typed events.
    pub events: async_channel::Receiver<GatewayEvent>,
    /// Handle to the background driver task so callers can await / abort it.
    pub driver_handle: tokio::task::JoinHandle<()>,
}

/// Connect to the Discord gateway, returning a [`GatewayHandle`].
///
/// This spawns a background driver that reads events, heartbeats,
/// reconnects + resumes on disconnects and rate-limits outbound sends.
pub async fn connect(config: GatewayConfig) -> Result<GatewayHandle, Error> {
    if config.token.is_empty() {
        return Err(Error::Gateway("empty bot token".to_string()));
    }

    let (event_tx, event_rx) = async_channel::bounded::<GatewayEvent>(256);
    let driver_handle = tokio::spawn(gateway_driver(config, event_tx));

    Ok(GatewayHandle {
        events: event_rx,
        driver_handle,
    })
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

async fn gateway_driver(
    config: GatewayConfig,
    event_tx: async_channel::Sender<GatewayEvent>,
) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut reconnect_attempts: u32 = 0;

    loop {
        if reconnect_attempts > 0 {
            if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
                error!("exceeded max reconnect attempts, giving up");
                event_tx.close();
                return;
            }
            let backoff = backoff_delay(reconnect_attempts);
            warn!(
                delay_ms = backoff.as_millis() as u64,
                attempt = reconnect_attempts,
                "backing off before reconnect"
            );
            tokio::time::sleep(backoff).await;
        }

        let url = session.lock().await.connect_url();
        info!(url = %url, "connecting to Discord gateway");

        let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(error = %e, "failed to connect to gateway");
                reconnect_attempts += 1;
                continue;
            }
        };

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));
        let rate_limiter = Arc::new(Mutex::new(SendRateLimiter::new(SEND_BUDGET_MAX, SEND_BUDGET_WINDOW)));

        // 1. HELLO
        let heartbeat_interval = match read_hello_from_stream(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                error!(error = %e, "failed to read HELLO from gateway");
                reconnect_attempts += 1;
                continue;
            }
        };
        debug!(interval_ms = heartbeat_interval, "received HELLO");

        // 2. IDENTIFY or RESUME
        let resume = session.lock().await.resume_payload(&config.token);
        let (handshake, kind) = match resume {
            Some(resume) => (resume, "RESUME"),
            None => (config.identify_payload(), "IDENTIFY"),
        };
        if let Err(e) = rate_limited_send(&ws_write, &rate_limiter, &handshake).await {
            error!(error = %e, kind, "failed to send handshake");
            reconnect_attempts += 1;
            continue;
        }
        info!(kind, "sent gateway handshake");
        reconnect_attempts = 0;

        // 3. Heartbeat task
        let heartbeat_handle = tokio::spawn(heartbeat_loop(
            heartbeat_interval,
            Arc::clone(&ws_write),
            Arc::clone(&rate_limiter),
            Arc::clone(&session),
        ));

        // 4. Read loop
        let disconnect_reason = read_loop(&mut ws_read, &ws_write, &rate_limiter, &event_tx, &session).await;

        // 5. Cleanup
        heartbeat_handle.abort();
        let _ = ws_write.lock().await.send(WsMessage::Close(None)).await;

        match disconnect_reason {
            DisconnectReason::ShouldResume => {
                info!("will attempt RESUME");
            }
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway error, shutting down");
                event_tx.close();
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }

        reconnect_attempts += 1;
    }
}

async fn heartbeat_loop(
    interval_ms: u64,
    ws_write: Arc<Mutex<WsSink>>,
    rate_limiter: Arc<Mutex<SendRateLimiter>>,
    session: Arc<Mutex<SessionState>>,
) {
    // First heartbeat goes out after `heartbeat_interval * jitter`, jitter ∈ [0, 1).
    let jitter = rand::random::<f64>();
    tokio::time::sleep(Duration::from_millis((interval_ms as f64 * jitter) as u64)).await;

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        interval.tick().await;
        let seq = session.lock().await.sequence;
        let heartbeat = json!({"op": 1, "d": seq});
        if let Err(e) = rate_limited_send(&ws_write, &rate_limiter, &heartbeat).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(seq = ?seq, "sent heartbeat");
    }
}

// ---------------------------------------------------------------------------
// Disconnect reason
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal,
    EventChannelClosed,
}

/// Map a gateway close code to what we should do next.
fn classify_close(code: u16) -> DisconnectReason {
    match code {
        // Authentication failed, invalid shard, sharding required, invalid
        // API version, invalid intents, disallowed intents.
        4004 | 4010 | 4011 | 4012 | 4013 | 4014 => DisconnectReason::Fatal,
        // Invalid seq or session timed out.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    event_tx: &async_channel::Sender<GatewayEvent>,
    session: &Arc<Mutex<SessionState>>,
) -> DisconnectReason {
    loop {
        let msg = match ws_read.next().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::ShouldResume;
            }
            None => {
                info!("WebSocket stream ended");
                return DisconnectReason::ShouldResume;
            }
        };

        match msg {
            WsMessage::Text(text) => {
                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to parse gateway payload");
                        continue;
                    }
                };

                if let Some(s) = payload.s {
                    session.lock().await.sequence = Some(s);
                }

                let event = GatewayEvent::from_payload(payload);

                match &event {
                    GatewayEvent::Ready(ready) => {
                        let mut sess = session.lock().await;
                        sess.session_id = Some(ready.session_id.clone());
                        sess.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                        info!(session_id = %ready.session_id, user = %ready.user.username, "gateway READY");
                    }

                    GatewayEvent::HeartbeatRequest => {
                        let seq = session.lock().await.sequence;
                        let heartbeat = json!({"op": 1, "d": seq});
                        if let Err(e) = rate_limited_send(ws_write, rate_limiter, &heartbeat).await {
                            warn!(error = %e, "failed to send requested heartbeat");
                        }
                        continue;
                    }

                    GatewayEvent::HeartbeatAck => {
                        debug!("heartbeat acknowledged");
                        continue;
                    }

                    GatewayEvent::Reconnect => {
                        info!("gateway requested reconnect (op 7)");
                        return DisconnectReason::ShouldResume;
                    }

                    GatewayEvent::InvalidSession(resumable) => {
                        warn!(resumable, "session invalidated (op 9)");
                        let wait = 1000 + rand::random::<u64>() % 4000;
                        tokio::time::sleep(Duration::from_millis(wait)).await;
                        return if *resumable {
                            DisconnectReason::ShouldResume
                        } else {
                            DisconnectReason::ShouldReidentify
                        };
                    }

                    _ => {}
                }

                if event_tx.send(event).await.is_err() {
                    info!("event channel closed by consumer");
                    return DisconnectReason::EventChannelClosed;
                }
            }

            WsMessage::Close(frame) => {
                let Some(frame) = frame else {
                    warn!("WebSocket closed by server without a frame");
                    return DisconnectReason::ShouldResume;
                };
                let code: u16 = frame.code.into();
                let reason = classify_close(code);
                if reason == DisconnectReason::Fatal {
                    error!(close_code = code, reason = %frame.reason, "gateway closed with fatal code");
                } else {
                    warn!(close_code = code, "WebSocket closed by server");
                }
                return reason;
            }

            // Ping/Pong/Binary: tungstenite answers pings itself.
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read the HELLO payload and return its heartbeat interval in milliseconds.
async fn read_hello_from_stream(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {e}"))?;

    let text = match msg {
        WsMessage::Text(t) => t,
        other => return Err(format!("expected text message for HELLO, got {other:?}")),
    };

    parse_hello(&text)
}

fn parse_hello(text: &str) -> Result<u64, String> {
    let payload: GatewayPayload = serde_json::from_str(text).map_err(|e| format!("failed to parse HELLO: {e}"))?;

    if payload.op != 10 {
        return Err(format!("expected op 10 (HELLO), got op {}", payload.op));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "HELLO missing heartbeat_interval".to_string())
}

/// Send a JSON payload on the WebSocket, respecting the send rate limiter.
async fn rate_limited_send(
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &serde_json::Value,
) -> Result<(), String> {
    loop {
        let delay = rate_limiter.lock().await.delay_at(Instant::now());
        match delay {
            Some(d) => {
                debug!(delay_ms = d.as_millis() as u64, "gateway send rate-limited, waiting");
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }
    rate_limiter.lock().await.record_at(Instant::now());

    let text = serde_json::to_string(payload).map_err(|e| e.to_string())?;
    ws_write
        .lock()
        .await
        .send(WsMessage::Text(text))
        .await
        .map_err(|e| format!("WS send error: {e}"))
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig {
            token: "tok".to_string(),
            intents: GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT,
            shard: None,
            activity: Some("https://example.com".to_string()),
        }
    }

    #[test]
    fn identify_carries_intents_and_presence() {
        let identify = config().identify_payload();
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["intents"], 33281);
        assert_eq!(identify["d"]["presence"]["activities"][0]["name"], "https://example.com");
        assert_eq!(identify["d"]["presence"]["activities"][0]["type"], 0);
        assert!(identify["d"].get("shard").is_none());
    }

    #[test]
    fn identify_includes_shard_when_configured() {
        let mut cfg = config();
        cfg.shard = Some([1, 4]);
        assert_eq!(cfg.identify_payload()["d"]["shard"], json!([1, 4]));
    }

    #[test]
    fn resume_needs_session_and_sequence() {
        let mut state = SessionState::default();
        assert!(state.resume_payload("tok").is_none());
        state.session_id = Some("abc".to_string());
        assert!(state.resume_payload("tok").is_none());
        state.sequence = Some(42);
        let resume = state.resume_payload("tok").unwrap();
        assert_eq!(resume["op"], 6);
        assert_eq!(resume["d"]["seq"], 42);
        assert_eq!(resume["d"]["session_id"], "abc");
    }

    #[test]
    fn gateway_url_appends_query_once() {
        assert_eq!(gateway_url(DEFAULT_GATEWAY_URL), DEFAULT_GATEWAY_URL);
        assert_eq!(
            gateway_url("wss://gateway-us-east1-b.discord.gg"),
            "wss://gateway-us-east1-b.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(gateway_url("wss://g.example?x=1"), "wss://g.example?x=1&v=10&encoding=json");
    }

    #[test]
    fn close_codes_are_classified() {
        assert_eq!(classify_close(4004), DisconnectReason::Fatal);
        assert_eq!(classify_close(4014), DisconnectReason::Fatal);
        assert_eq!(classify_close(4009), DisconnectReason::ShouldReidentify);
        assert_eq!(classify_close(1001), DisconnectReason::ShouldResume);
        assert_eq!(classify_close(4000), DisconnectReason::ShouldResume);
    }

    #[test]
    fn hello_parsing() {
        assert_eq!(parse_hello(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#), Ok(41250));
        assert!(parse_hello(r#"{"op":11,"d":null}"#).is_err());
        assert!(parse_hello(r#"{"op":10,"d":{}}"#).is_err());
    }

    #[test]
    fn rate_limiter_allows_until_budget_spent() {
        let mut limiter = SendRateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.delay_at(now), None);
        limiter.record_at(now);
        assert_eq!(limiter.delay_at(now), None);
        limiter.record_at(now);
        let delay = limiter.delay_at(now + Duration::from_secs(10)).unwrap();
        assert_eq!(delay, Duration::from_secs(50));
        assert_eq!(limiter.delay_at(now + Duration::from_secs(61)), None);
    }

    #[test]
    fn backoff_is_capped() {
        for attempt in 0..20 {
            assert!(backoff_delay(attempt) <= Duration::from_secs(60));
        }
        assert!(backoff_delay(1) >= Duration::from_millis(1500));
    }
}
