//! Story metadata: the data model and the clients that fetch it.
//!
//! Three sources are supported: the Atlas API for FanFiction.Net, FicHub for
//! most other sites, and scraped Archive of Our Own pages.

pub mod ao3;
pub mod atlas;
pub mod fichub;

use std::time::Duration;

use chrono::NaiveDate;

use crate::error::StoryError;

pub use ao3::{Ao3Client, Ao3Series, Ao3Work};
pub use atlas::{AtlasClient, AtlasStory};
pub use fichub::{FicHubClient, FicHubStory};

const USER_AGENT: &str = concat!(
    "discord-webfic-searcher/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/Sachaa-Thanasius/discord-webfic-searcher)"
);

/// Metadata for a story from whichever source answered.
#[derive(Debug, Clone, PartialEq)]
pub enum StoryData {
    Atlas(AtlasStory),
    FicHub(FicHubStory),
    Ao3Work(Ao3Work),
    Ao3Series(Ao3Series),
}

impl StoryData {
    pub fn title(&self) -> &str {
        match self {
            StoryData::Atlas(story) => &story.title,
            StoryData::FicHub(story) => &story.title,
            StoryData::Ao3Work(work) => &work.title,
            StoryData::Ao3Series(series) => &series.name,
        }
    }
}

/// A story author with an optional profile link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub url: Option<String>,
}

/// Every metadata client, sharing one connection pool.
#[derive(Debug, Clone)]
pub struct StoryClients {
    pub atlas: AtlasClient,
    pub fichub: FicHubClient,
    pub ao3: Ao3Client,
}

impl StoryClients {
    pub fn new(http: reqwest::Client, atlas_login: impl Into<String>, atlas_password: impl Into<String>) -> Self {
        Self {
            atlas: AtlasClient::new(http.clone(), atlas_login, atlas_password),
            fichub: FicHubClient::new(http.clone()),
            ao3: Ao3Client::new(http),
        }
    }
}

/// The shared `reqwest` client used for every outbound call.
pub fn build_http_client() -> Result<reqwest::Client, StoryError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Parse the date portion of an ISO-8601 timestamp (`2023-06-07T12:00:00Z`
/// or just `2023-06-07`).
pub(crate) fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let date = text.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Parse a possibly comma-grouped count such as `12,345`.
pub(crate) fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| !matches!(c, ',' | ' ')).collect();
    digits.trim().parse().ok()
}

/// Map a non-success response to a [`StoryError`].
pub(crate) fn check_status(service: &'static str, resp: reqwest::Response) -> Result<reqwest::Response, StoryError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(StoryError::NotFound);
    }
    if !status.is_success() {
        return Err(StoryError::Status {
            service,
            status: status.as_u16(),
        });
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_dates_ignore_time_component() {
        assert_eq!(parse_iso_date("2023-06-07T12:34:56Z"), NaiveDate::from_ymd_opt(2023, 6, 7));
        assert_eq!(parse_iso_date("2011-01-30"), NaiveDate::from_ymd_opt(2011, 1, 30));
        assert_eq!(parse_iso_date("soon"), None);
    }

    #[test]
    fn counts_accept_separators() {
        assert_eq!(parse_count("12,345"), Some(12345));
        assert_eq!(parse_count(" 7 "), Some(7));
        assert_eq!(parse_count(""), None);
    }
}
