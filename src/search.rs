//! Lookup strategy: which metadata source to ask for a given query, and
//! what to fall back to when it fails.
//!
//! Planning is pure ([`plan_ao3`], [`plan_ffn`], [`plan_link`]); running a
//! plan goes through [`StorySource`]. Source errors are logged and swallowed,
//! since callers only care whether some data came back.

use tracing::{debug, warn};

use crate::error::StoryError;
use crate::sites::{self, Ao3Kind, LinkMatch};
use crate::stories::{atlas, Ao3Series, Ao3Work, AtlasStory, FicHubStory, StoryClients, StoryData};

/// The metadata services a lookup can draw on.
#[allow(async_fn_in_trait)]
pub trait StorySource {
    async fn ao3_work(&self, id: u64) -> Result<Ao3Work, StoryError>;
    async fn ao3_series(&self, id: u64) -> Result<Ao3Series, StoryError>;
    async fn ao3_search(&self, query: &str) -> Result<Vec<Ao3Work>, StoryError>;
    async fn atlas_story(&self, id: u64) -> Result<AtlasStory, StoryError>;
    async fn atlas_search(&self, title_ilike: &str, limit: u32) -> Result<Vec<AtlasStory>, StoryError>;
    async fn fichub_story(&self, url: &str) -> Result<FicHubStory, StoryError>;
}

impl StorySource for StoryClients {
    async fn ao3_work(&self, id: u64) -> Result<Ao3Work, StoryError> {
        self.ao3.get_work(id).await
    }

    async fn ao3_series(&self, id: u64) -> Result<Ao3Series, StoryError> {
        self.ao3.get_series(id).await
    }

    async fn ao3_search(&self, query: &str) -> Result<Vec<Ao3Work>, StoryError> {
        self.ao3.search_works(query).await
    }

    async fn atlas_story(&self, id: u64) -> Result<AtlasStory, StoryError> {
        self.atlas.get_story_metadata(id).await
    }

    async fn atlas_search(&self, title_ilike: &str, limit: u32) -> Result<Vec<AtlasStory>, StoryError> {
        self.atlas.get_bulk_metadata(title_ilike, limit).await
    }

    async fn fichub_story(&self, url: &str) -> Result<FicHubStory, StoryError> {
        self.fichub.get_story_metadata(url).await
    }
}

/// Where to look a story up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Ao3Series(u64),
    /// FicHub by URL first, then the AO3 work page.
    Ao3Work { url: String, id: u64 },
    /// Full-text AO3 search, first result.
    Ao3Search(String),
    /// Atlas by id, then FicHub with `fallback` if there is one.
    FfnStory { id: u64, fallback: Option<String> },
    /// Atlas title search with an ILIKE pattern, first result.
    FfnTitle(String),
    FicHub(String),
}

/// Plan for an AO3 title or URL. A link without a numeric id plans nothing.
pub fn plan_ao3(name_or_url: &str) -> Option<Lookup> {
    let Some(link) = sites::find_ao3_link(name_or_url) else {
        return Some(Lookup::Ao3Search(name_or_url.to_string()));
    };
    let id = link.ao3_id?;
    Some(match link.ao3_kind {
        Some(Ao3Kind::Series) => Lookup::Ao3Series(id),
        _ => Lookup::Ao3Work { url: link.matched, id },
    })
}

/// Plan for an FFN story id, URL, or partial title.
pub fn plan_ffn(name_or_url: &str) -> Lookup {
    match atlas::extract_fic_id(name_or_url) {
        Some(id) => Lookup::FfnStory {
            id,
            fallback: Some(name_or_url.to_string()),
        },
        None => Lookup::FfnTitle(format!("%{name_or_url}%")),
    }
}

/// Plan for a link found in a message. FFN links go to Atlas alone.
pub fn plan_link(link: &LinkMatch) -> Option<Lookup> {
    match link.site.acronym {
        "FFN" => Some(Lookup::FfnStory {
            id: link.ffn_id?,
            fallback: None,
        }),
        "AO3" => plan_ao3(&link.matched),
        _ => Some(Lookup::FicHub(link.matched.clone())),
    }
}

/// Run `lookup`, falling back between sources as planned.
pub async fn run<S: StorySource>(source: &S, lookup: &Lookup) -> Option<StoryData> {
    match lookup {
        Lookup::Ao3Series(id) => match source.ao3_series(*id).await {
            Ok(series) => Some(StoryData::Ao3Series(series)),
            Err(e) => {
                warn!(error = %e, series_id = id, "AO3 series retrieval failed");
                None
            }
        },
        Lookup::Ao3Work { url, id } => {
            match source.fichub_story(url).await {
                Ok(story) => return Some(StoryData::FicHub(story)),
                Err(e) => warn!(error = %e, url = %url, "FicHub retrieval failed, trying the AO3 scraper"),
            }
            match source.ao3_work(*id).await {
                Ok(work) => Some(StoryData::Ao3Work(work)),
                Err(e) => {
                    warn!(error = %e, work_id = id, "FicHub and AO3 retrieval both failed");
                    None
                }
            }
        }
        Lookup::Ao3Search(query) => match source.ao3_search(query).await {
            Ok(results) => results.into_iter().next().map(StoryData::Ao3Work),
            Err(e) => {
                warn!(error = %e, query = %query, "AO3 search failed");
                None
            }
        },
        Lookup::FfnStory { id, fallback } => {
            let err = match source.atlas_story(*id).await {
                Ok(story) => return Some(StoryData::Atlas(story)),
                Err(e) => e,
            };
            let Some(url) = fallback else {
                warn!(error = %err, fic_id = id, "Atlas retrieval failed");
                return None;
            };
            warn!(error = %err, fic_id = id, "Atlas retrieval failed, trying FicHub");
            match source.fichub_story(url).await {
                Ok(story) => Some(StoryData::FicHub(story)),
                Err(e) => {
                    warn!(error = %e, fic_id = id, "Atlas and FicHub retrieval both failed");
                    None
                }
            }
        }
        Lookup::FfnTitle(pattern) => match source.atlas_search(pattern, 1).await {
            Ok(results) => results.into_iter().next().map(StoryData::Atlas),
            Err(e) => {
                warn!(error = %e, pattern = %pattern, "Atlas title search failed");
                None
            }
        },
        Lookup::FicHub(url) => match source.fichub_story(url).await {
            Ok(story) => Some(StoryData::FicHub(story)),
            Err(e) => {
                warn!(error = %e, url = %url, "FicHub retrieval failed");
                None
            }
        },
    }
}

/// Search AO3 for a work or series by partial title or full URL.
pub async fn search_ao3<S: StorySource>(source: &S, name_or_url: &str) -> Option<StoryData> {
    run(source, &plan_ao3(name_or_url)?).await
}

/// Search FFN by story id / URL, or by partial title.
pub async fn search_ffn<S: StorySource>(source: &S, name_or_url: &str) -> Option<StoryData> {
    run(source, &plan_ffn(name_or_url)).await
}

/// Any other site: only full URLs are supported, through FicHub.
pub async fn search_other<S: StorySource>(source: &S, url: &str) -> Option<StoryData> {
    run(source, &Lookup::FicHub(url.to_string())).await
}

/// Story data for every link in `text`, in order. Links whose lookup failed
/// yield `None`.
pub async fn data_from_links<S: StorySource>(source: &S, text: &str) -> Vec<Option<StoryData>> {
    let links = sites::find_links(text);
    debug!(count = links.len(), "looking up story links");

    let mut results = Vec::with_capacity(links.len());
    for link in &links {
        let data = match plan_link(link) {
            Some(lookup) => run(source, &lookup).await,
            None => None,
        };
        results.push(data);
    }
    results
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Answers every call from canned data, failing the named services.
    #[derive(Default)]
    struct FakeSource {
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn failing(services: &[&'static str]) -> Self {
            Self {
                failing: services.to_vec(),
                ..Default::default()
            }
        }

        fn record(&self, service: &'static str, arg: impl std::fmt::Display) -> Result<(), StoryError> {
            self.calls.lock().unwrap().push(format!("{service} {arg}"));
            if self.failing.contains(&service) {
                Err(StoryError::NotFound)
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StorySource for FakeSource {
        async fn ao3_work(&self, id: u64) -> Result<Ao3Work, StoryError> {
            self.record("ao3_work", id)?;
            Ok(Ao3Work {
                id,
                title: format!("Work {id}"),
                ..Default::default()
            })
        }

        async fn ao3_series(&self, id: u64) -> Result<Ao3Series, StoryError> {
            self.record("ao3_series", id)?;
            Ok(Ao3Series {
                id,
                name: format!("Series {id}"),
                ..Default::default()
            })
        }

        async fn ao3_search(&self, query: &str) -> Result<Vec<Ao3Work>, StoryError> {
            self.record("ao3_search", query)?;
            Ok(vec![
                Ao3Work {
                    id: 1,
                    title: "First hit".to_string(),
                    ..Default::default()
                },
                Ao3Work {
                    id: 2,
                    title: "Second hit".to_string(),
                    ..Default::default()
                },
            ])
        }

        async fn atlas_story(&self, id: u64) -> Result<AtlasStory, StoryError> {
            self.record("atlas_story", id)?;
            Ok(AtlasStory {
                id,
                title: format!("FFN {id}"),
                ..Default::default()
            })
        }

        async fn atlas_search(&self, title_ilike: &str, limit: u32) -> Result<Vec<AtlasStory>, StoryError> {
            self.record("atlas_search", format!("{title_ilike} {limit}"))?;
            Ok(vec![AtlasStory {
                id: 7,
                title: "Found by title".to_string(),
                ..Default::default()
            }])
        }

        async fn fichub_story(&self, url: &str) -> Result<FicHubStory, StoryError> {
            self.record("fichub_story", url)?;
            Ok(FicHubStory {
                title: "From FicHub".to_string(),
                url: url.to_string(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn plans_ao3_queries() {
        assert_eq!(
            plan_ao3("https://archiveofourown.org/series/42"),
            Some(Lookup::Ao3Series(42))
        );
        assert_eq!(
            plan_ao3("see archiveofourown.org/works/7/chapters/9"),
            Some(Lookup::Ao3Work {
                url: "archiveofourown.org/works/7".to_string(),
                id: 7
            })
        );
        assert_eq!(plan_ao3("a partial title"), Some(Lookup::Ao3Search("a partial title".to_string())));
    }

    #[test]
    fn plans_ffn_queries() {
        assert_eq!(
            plan_ffn("https://www.fanfiction.net/s/123/1/"),
            Lookup::FfnStory {
                id: 123,
                fallback: Some("https://www.fanfiction.net/s/123/1/".to_string())
            }
        );
        assert_eq!(
            plan_ffn("456"),
            Lookup::FfnStory {
                id: 456,
                fallback: Some("456".to_string())
            }
        );
        assert_eq!(plan_ffn("Title Words"), Lookup::FfnTitle("%Title Words%".to_string()));
    }

    #[tokio::test]
    async fn ao3_series_goes_to_the_series_page() {
        let source = FakeSource::default();
        let data = search_ao3(&source, "archiveofourown.org/series/42").await;
        assert!(matches!(data, Some(StoryData::Ao3Series(ref s)) if s.id == 42));
        assert_eq!(source.calls(), ["ao3_series 42"]);
    }

    #[tokio::test]
    async fn ao3_work_prefers_fichub() {
        let source = FakeSource::default();
        let data = search_ao3(&source, "archiveofourown.org/works/7").await;
        assert!(matches!(data, Some(StoryData::FicHub(_))));
        assert_eq!(source.calls(), ["fichub_story archiveofourown.org/works/7"]);
    }

    #[tokio::test]
    async fn ao3_work_falls_back_to_the_scraper() {
        let source = FakeSource::failing(&["fichub_story"]);
        let data = search_ao3(&source, "archiveofourown.org/works/7").await;
        assert!(matches!(data, Some(StoryData::Ao3Work(ref w)) if w.id == 7));
        assert_eq!(source.calls(), ["fichub_story archiveofourown.org/works/7", "ao3_work 7"]);

        let source = FakeSource::failing(&["fichub_story", "ao3_work"]);
        assert!(search_ao3(&source, "archiveofourown.org/works/7").await.is_none());
    }

    #[tokio::test]
    async fn ao3_text_takes_the_first_search_result() {
        let source = FakeSource::default();
        let data = search_ao3(&source, "some title").await;
        assert_eq!(data.as_ref().map(StoryData::title), Some("First hit"));
        assert_eq!(source.calls(), ["ao3_search some title"]);
    }

    #[tokio::test]
    async fn ffn_id_falls_back_to_fichub() {
        let source = FakeSource::default();
        let data = search_ffn(&source, "fanfiction.net/s/123").await;
        assert!(matches!(data, Some(StoryData::Atlas(ref s)) if s.id == 123));
        assert_eq!(source.calls(), ["atlas_story 123"]);

        let source = FakeSource::failing(&["atlas_story"]);
        let data = search_ffn(&source, "fanfiction.net/s/123").await;
        assert!(matches!(data, Some(StoryData::FicHub(_))));
        assert_eq!(source.calls(), ["atlas_story 123", "fichub_story fanfiction.net/s/123"]);
    }

    #[tokio::test]
    async fn ffn_title_uses_a_single_bulk_result() {
        let source = FakeSource::default();
        let data = search_ffn(&source, "Title Words").await;
        assert_eq!(data.as_ref().map(StoryData::title), Some("Found by title"));
        assert_eq!(source.calls(), ["atlas_search %Title Words% 1"]);
    }

    #[tokio::test]
    async fn links_dispatch_by_site_in_order() {
        let source = FakeSource::failing(&["ao3_series"]);
        let text = "forums.spacebattles.com/threads/quest.1/ then \
                    https://www.fanfiction.net/s/55/1/ and archiveofourown.org/series/9";
        let results = data_from_links(&source, text).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Some(StoryData::FicHub(_))));
        assert!(matches!(results[1], Some(StoryData::Atlas(ref s)) if s.id == 55));
        assert!(results[2].is_none());
        assert_eq!(
            source.calls(),
            [
                "fichub_story forums.spacebattles.com/threads/quest.1/",
                "atlas_story 55",
                "ao3_series 9",
            ]
        );
    }

    #[tokio::test]
    async fn ffn_links_do_not_fall_back() {
        let source = FakeSource::failing(&["atlas_story"]);
        let results = data_from_links(&source, "https://www.fanfiction.net/s/55/1/").await;
        assert_eq!(results, [None]);
        assert_eq!(source.calls(), ["atlas_story 55"]);
    }
}
