//! Rate-limit aware client for the Discord REST API.
//!
//! All outbound Discord calls go through [`DiscordHttpClient`] so that auth
//! headers, bucket bookkeeping and error mapping live in one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use reqwest::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HttpError;
use crate::types::*;

const BASE_URL: &str = "https://discord.com/api/v10";
const CLIENT_USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/Sachaa-Thanasius/discord-webfic-searcher, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
const MAX_RETRIES: u32 = 5;

// ---------------------------------------------------------------------------
// Rate-limit tracker (per-bucket)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

#[derive(Debug, Clone, Default)]
struct RateLimiter {
    /// Route key → bucket id.
    route_buckets: HashMap<String, String>,
    /// Bucket id → state.
    buckets: HashMap<String, BucketState>,
    /// No request may be sent before this instant.
    global_until: Option<Instant>,
}

impl RateLimiter {
    /// How long to wait before sending on `route_key`, if at all.
    fn delay_at(&self, route_key: &str, now: Instant) -> Option<Duration> {
        if let Some(until) = self.global_until.filter(|&until| until > now) {
            return Some(until - now);
        }

        let bucket_id = self.route_buckets.get(route_key)?;
        let state = self.buckets.get(bucket_id)?;
        (state.remaining == 0 && state.resets_at > now).then(|| state.resets_at - now)
    }

    fn update_at(&mut self, route_key: &str, info: &RateLimitInfo, now: Instant) {
        let reset_after = info.reset_after.map(Duration::from_secs_f64);

        if info.is_global {
            self.global_until = Some(now + reset_after.unwrap_or(Duration::from_secs(1)));
        }

        if let Some(bucket) = &info.bucket {
            self.route_buckets.insert(route_key.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: now + reset_after.unwrap_or(Duration::from_secs(1)),
                },
            );
        }
    }
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: header("x-ratelimit-reset-after")
            .or_else(|| header("retry-after"))
            .and_then(|s| s.parse().ok()),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global").is_some_and(|s| s == "true")
            || header("x-ratelimit-scope").is_some_and(|s| s == "global"),
    }
}

fn to_body<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value, HttpError> {
    serde_json::to_value(value).map_err(|e| HttpError::Serde(e.to_string()))
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin, rate-limit aware client for the Discord REST API.
///
/// Cheap to clone (internals are behind `Arc`).
#[derive(Clone)]
pub struct DiscordHttpClient {
    inner: reqwest::Client,
    token: Arc<str>,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    /// Build on an existing connection pool.
    pub fn with_client(inner: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            inner,
            token: Arc::from(token.into()),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        }
    }

    /// Send a request to `{BASE_URL}/{path}`.
    ///
    /// `route_key` groups requests into rate-limit buckets, e.g.
    /// `POST /channels/{channel_id}/messages`. Returns the raw body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{BASE_URL}/{}", path.trim_start_matches('/'));

        for attempt in 0..=MAX_RETRIES {
            let delay = self.limiter.lock().await.delay_at(route_key, Instant::now());
            if let Some(delay) = delay {
                let delay = delay.min(Duration::from_secs(60));
                debug!(route = route_key, delay_ms = delay.as_millis() as u64, "rate-limit pre-emptive backoff");
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .inner
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .header(USER_AGENT, CLIENT_USER_AGENT);
            if let Some(json) = body {
                req = req.json(json);
            }

            let resp = req.send().await?;
            let status = resp.status();
            let rl_info = parse_rate_limit_headers(resp.headers());
            self.limiter.lock().await.update_at(route_key, &rl_info, Instant::now());

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = rl_info.reset_after.unwrap_or(1.0).min(60.0);
                warn!(
                    route = route_key,
                    attempt,
                    retry_after_s = retry_after,
                    global = rl_info.is_global,
                    "rate-limited by Discord, backing off"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                continue;
            }

            let bytes = resp.bytes().await?;
            if status.is_success() {
                return Ok(bytes.to_vec());
            }
            return Err(HttpError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                route: route_key.to_string(),
            });
        }

        Err(HttpError::Api {
            status: 429,
            body: "rate-limited after max retries".to_string(),
            route: route_key.to_string(),
        })
    }

    /// Like [`Self::request`] but deserialises the response body as JSON.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route_key, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            let raw = String::from_utf8_lossy(&bytes);
            let preview: String = raw.chars().take(200).collect();
            HttpError::Serde(format!("{e}: {preview}"))
        })
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    pub async fn create_message(&self, channel_id: &str, msg: &CreateMessage) -> Result<Message, HttpError> {
        let path = format!("channels/{channel_id}/messages");
        let route_key = format!("POST /channels/{channel_id}/messages");
        self.request_json(Method::POST, &path, &route_key, Some(&to_body(msg)?))
            .await
    }

    /// Show the "Bot is typing..." indicator for ~10 seconds.
    pub async fn trigger_typing(&self, channel_id: &str) -> Result<(), HttpError> {
        let path = format!("channels/{channel_id}/typing");
        let route_key = format!("POST /channels/{channel_id}/typing");
        self.request(Method::POST, &path, &route_key, None).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Initial response to an interaction. Discord answers 204 No Content.
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        let path = format!("interactions/{interaction_id}/{interaction_token}/callback");
        self.request(Method::POST, &path, "POST /interactions/callback", Some(&to_body(response)?))
            .await?;
        Ok(())
    }

    /// Send a follow-up message after a (deferred) interaction response.
    pub async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let path = format!("webhooks/{application_id}/{interaction_token}?wait=true");
        let route_key = format!("POST /webhooks/{application_id}/interaction");
        self.request_json(Method::POST, &path, &route_key, Some(&to_body(msg)?))
            .await
    }

    pub async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let path = format!("webhooks/{application_id}/{interaction_token}/messages/@original");
        let route_key = format!("PATCH /webhooks/{application_id}/interaction/messages/@original");
        self.request_json(Method::PATCH, &path, &route_key, Some(&to_body(msg)?))
            .await
    }

    pub async fn edit_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        message_id: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let path = format!("webhooks/{application_id}/{interaction_token}/messages/{message_id}");
        let route_key = format!("PATCH /webhooks/{application_id}/interaction/messages");
        self.request_json(Method::PATCH, &path, &route_key, Some(&to_body(msg)?))
            .await
    }

    // ------------------------------------------------------------------
    // Application commands
    // ------------------------------------------------------------------

    /// Replace every global command of the application.
    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!("applications/{application_id}/commands");
        let route_key = format!("PUT /applications/{application_id}/commands");
        self.request_json(Method::PUT, &path, &route_key, Some(&to_body(commands)?))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use static_assertions::assert_impl_all;

    assert_impl_all!(DiscordHttpClient: Send, Sync, Clone);

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn parses_bucket_headers() {
        let info = parse_rate_limit_headers(&headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "2.5"),
            ("x-ratelimit-bucket", "abcd"),
        ]));
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset_after, Some(2.5));
        assert_eq!(info.bucket.as_deref(), Some("abcd"));
        assert!(!info.is_global);
    }

    #[test]
    fn global_scope_is_detected() {
        let info = parse_rate_limit_headers(&headers(&[("x-ratelimit-global", "true"), ("retry-after", "3")]));
        assert!(info.is_global);
        assert_eq!(info.reset_after, Some(3.0));
    }

    #[test]
    fn exhausted_bucket_delays_its_routes() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_after: Some(2.0),
            bucket: Some("b1".to_string()),
            is_global: false,
        };
        limiter.update_at("POST /channels/1/messages", &info, now);

        assert_eq!(
            limiter.delay_at("POST /channels/1/messages", now),
            Some(Duration::from_secs(2))
        );
        assert_eq!(limiter.delay_at("POST /channels/2/messages", now), None);
        assert_eq!(
            limiter.delay_at("POST /channels/1/messages", now + Duration::from_secs(3)),
            None
        );
    }

    #[test]
    fn global_limit_delays_every_route() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();
        let info = RateLimitInfo {
            reset_after: Some(1.0),
            is_global: true,
            ..Default::default()
        };
        limiter.update_at("GET /anything", &info, now);
        assert_eq!(limiter.delay_at("PUT /other", now), Some(Duration::from_secs(1)));
    }

    #[test]
    fn debug_redacts_token() {
        let client = DiscordHttpClient::with_client(reqwest::Client::new(), "secret-token");
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
    }
}
