//! Client for iris's Atlas API, which mirrors FanFiction.Net metadata.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, parse_iso_date, Author};
use crate::error::StoryError;

const BASE_URL: &str = "https://atlas.fanfic.dev/v0/";
const SERVICE: &str = "Atlas";

/// An FFN story as reported by Atlas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtlasStory {
    pub id: u64,
    pub title: String,
    pub author: Author,
    pub description: String,
    pub published: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    pub is_complete: bool,
    pub rating: String,
    pub genres: Vec<String>,
    pub characters: Vec<String>,
    pub fandoms: Vec<String>,
    pub chapters: u32,
    pub words: u64,
    pub reviews: u64,
    pub favorites: u64,
    pub follows: u64,
}

impl AtlasStory {
    pub fn url(&self) -> String {
        format!("https://www.fanfiction.net/s/{}", self.id)
    }
}

#[derive(Debug, Deserialize)]
struct RawStory {
    id: u64,
    title: String,
    author_id: u64,
    author_name: String,
    #[serde(default)]
    description: String,
    published: Option<String>,
    updated: Option<String>,
    #[serde(default)]
    is_complete: bool,
    #[serde(default)]
    rating: String,
    #[serde(default)]
    raw_genres: Option<String>,
    #[serde(default)]
    raw_characters: Option<String>,
    #[serde(default)]
    raw_fandoms: Option<String>,
    #[serde(default)]
    chapter_count: u32,
    #[serde(default)]
    word_count: u64,
    #[serde(default)]
    review_count: u64,
    #[serde(default)]
    favorite_count: u64,
    #[serde(default)]
    follow_count: u64,
}

impl From<RawStory> for AtlasStory {
    fn from(raw: RawStory) -> Self {
        AtlasStory {
            id: raw.id,
            title: raw.title,
            author: Author {
                name: raw.author_name,
                url: Some(format!("https://www.fanfiction.net/u/{}", raw.author_id)),
            },
            description: raw.description,
            published: raw.published.as_deref().and_then(parse_iso_date),
            updated: raw.updated.as_deref().and_then(parse_iso_date),
            is_complete: raw.is_complete,
            rating: raw.rating,
            genres: split_genres(raw.raw_genres.as_deref().unwrap_or_default()),
            characters: split_characters(raw.raw_characters.as_deref().unwrap_or_default()),
            fandoms: split_fandoms(raw.raw_fandoms.as_deref().unwrap_or_default()),
            chapters: raw.chapter_count,
            words: raw.word_count,
            reviews: raw.review_count,
            favorites: raw.favorite_count,
            follows: raw.follow_count,
        }
    }
}

/// `Adventure/Hurt/Comfort` is one genre on FFN, so the split is not naive.
fn split_genres(raw: &str) -> Vec<String> {
    let mut genres = Vec::new();
    let mut parts = raw.split('/').map(str::trim).filter(|s| !s.is_empty()).peekable();
    while let Some(part) = parts.next() {
        if part == "Hurt" && parts.peek() == Some(&"Comfort") {
            parts.next();
            genres.push("Hurt/Comfort".to_string());
        } else {
            genres.push(part.to_string());
        }
    }
    genres
}

/// `[Harry P., Hermione G.] Ron W.` → each name, pairing brackets dropped.
fn split_characters(raw: &str) -> Vec<String> {
    raw.replace(['[', ']'], ",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `Harry Potter & Naruto Crossover` → `["Harry Potter", "Naruto"]`.
fn split_fandoms(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_end_matches(" Crossover")
        .split(" & ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn ffn_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^\s*(\d+)\s*$)|(?:fanfiction\.net/s/(\d+))").expect("valid FFN id pattern"))
}

/// Pull an FFN story id out of a URL or a bare number.
pub fn extract_fic_id(text: &str) -> Option<u64> {
    let caps = ffn_id_regex().captures(text)?;
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

/// Atlas API client. Requests use HTTP basic auth.
#[derive(Clone)]
pub struct AtlasClient {
    http: reqwest::Client,
    login: String,
    password: String,
}

impl std::fmt::Debug for AtlasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasClient")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AtlasClient {
    pub fn new(http: reqwest::Client, login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http,
            login: login.into(),
            password: password.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, StoryError> {
        let url = format!("{BASE_URL}{path}");
        debug!(url = %url, "querying Atlas");
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.login, Some(&self.password))
            .query(query)
            .send()
            .await?;
        let resp = check_status(SERVICE, resp)?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| StoryError::Parse {
            service: SERVICE,
            message: e.to_string(),
        })
    }

    /// Metadata for a single FFN story.
    pub async fn get_story_metadata(&self, id: u64) -> Result<AtlasStory, StoryError> {
        let raw: RawStory = self.get(&format!("ffn/meta/{id}"), &[]).await?;
        Ok(raw.into())
    }

    /// Stories whose title matches a SQL `ILIKE` pattern.
    pub async fn get_bulk_metadata(&self, title_ilike: &str, limit: u32) -> Result<Vec<AtlasStory>, StoryError> {
        let query = [("title_ilike", title_ilike.to_string()), ("limit", limit.to_string())];
        let raw: Vec<RawStory> = self.get("ffn/bulk/meta", &query).await?;
        Ok(raw.into_iter().map(AtlasStory::from).collect())
    }
}
