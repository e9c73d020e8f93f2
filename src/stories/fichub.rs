//! Client for the FicHub API, which covers FFN, AO3, and the forum sites.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{check_status, parse_iso_date, Author};
use crate::error::StoryError;

const API_URL: &str = "https://fichub.net/api/v0/epub";
const SERVICE: &str = "FicHub";

/// Stat names FicHub may report, across every site it supports.
const STAT_NAMES: [&str; 7] = ["reviews", "favorites", "follows", "comments", "kudos", "bookmarks", "hits"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FicHubStory {
    pub title: String,
    pub author: Author,
    pub url: String,
    pub description: String,
    pub created: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    /// `complete` or `ongoing`.
    pub status: String,
    pub chapters: u32,
    pub words: u64,
    pub rating: String,
    pub fandoms: Vec<String>,
    pub characters: Vec<String>,
    pub categories: Vec<String>,
    pub stats: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    err: i64,
    msg: Option<String>,
    meta: Option<RawMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    title: String,
    #[serde(default)]
    author: String,
    author_url: Option<String>,
    #[serde(default)]
    chapters: u32,
    created: Option<String>,
    updated: Option<String>,
    #[serde(default)]
    description: String,
    source: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    words: u64,
    #[serde(default)]
    raw_extended_meta: Option<Value>,
}

/// A string or list of strings, as extended metadata is inconsistent about it.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(", ")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn first_present<'a>(meta: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| meta.get(*key).filter(|v| !v.is_null()))
}

fn stat_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => super::parse_count(s),
        _ => None,
    }
}

/// Descriptions arrive as HTML fragments.
fn html_to_text(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    doc.root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl From<RawMeta> for FicHubStory {
    fn from(raw: RawMeta) -> Self {
        let extended = raw.raw_extended_meta.unwrap_or(Value::Null);

        let mut stats = BTreeMap::new();
        for name in STAT_NAMES {
            let value = extended
                .get(name)
                .or_else(|| extended.get("stats").and_then(|s| s.get(name)))
                .and_then(stat_value);
            if let Some(value) = value {
                stats.insert(name.to_string(), value);
            }
        }

        let rating = first_present(&extended, &["rating", "rated"])
            .map(|v| match v {
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "),
                other => other.as_str().unwrap_or_default().to_string(),
            })
            .unwrap_or_else(|| "N/A".to_string());

        FicHubStory {
            title: raw.title,
            author: Author {
                name: raw.author,
                url: raw.author_url,
            },
            url: raw.source,
            description: html_to_text(&raw.description),
            created: raw.created.as_deref().and_then(parse_iso_date),
            updated: raw.updated.as_deref().and_then(parse_iso_date),
            status: raw.status,
            chapters: raw.chapters,
            words: raw.words,
            rating,
            fandoms: string_list(first_present(&extended, &["fandoms", "fandom", "raw_fandom"])),
            characters: string_list(first_present(&extended, &["characters"])),
            categories: string_list(first_present(&extended, &["category", "categories"])),
            stats,
        }
    }
}

fn parse_envelope(text: &str) -> Result<FicHubStory, StoryError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| StoryError::Parse {
        service: SERVICE,
        message: e.to_string(),
    })?;
    if envelope.err != 0 {
        return Err(StoryError::Api {
            service: SERVICE,
            message: envelope.msg.unwrap_or_else(|| format!("error code {}", envelope.err)),
        });
    }
    envelope.meta.map(FicHubStory::from).ok_or(StoryError::NotFound)
}

#[derive(Debug, Clone)]
pub struct FicHubClient {
    http: reqwest::Client,
}

impl FicHubClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Metadata for the story at `url`.
    pub async fn get_story_metadata(&self, url: &str) -> Result<FicHubStory, StoryError> {
        debug!(url, "querying FicHub");
        let resp = self.http.get(API_URL).query(&[("q", url)]).send().await?;
        let text = check_status(SERVICE, resp)?.text().await?;
        parse_envelope(&text)
    }
}
