//! Archive of Our Own scraper.
//!
//! AO3 has no public API, so works, series and search results are read out
//! of the HTML pages with `scraper`. Parsing is split from fetching so the
//! page shapes can be tested offline.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{check_status, parse_count, parse_iso_date};
use crate::error::StoryError;

const BASE_URL: &str = "https://archiveofourown.org";
const SERVICE: &str = "AO3";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ao3Work {
    pub id: u64,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub rating: String,
    pub fandoms: Vec<String>,
    pub categories: Vec<String>,
    pub characters: Vec<String>,
    pub words: u64,
    pub chapters: u32,
    /// `None` when the author has not fixed a chapter count (`5/?`).
    pub expected_chapters: Option<u32>,
    pub comments: u64,
    pub kudos: u64,
    pub bookmarks: u64,
    pub hits: u64,
    pub published: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    pub is_complete: bool,
}

impl Ao3Work {
    pub fn url(&self) -> String {
        format!("{BASE_URL}/works/{}", self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ao3Series {
    pub id: u64,
    pub name: String,
    pub creators: Vec<String>,
    pub description: String,
    pub begun: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    pub words: u64,
    pub works_count: u32,
    pub is_complete: bool,
    pub works: Vec<Ao3Work>,
}

impl Ao3Series {
    pub fn url(&self) -> String {
        format!("{BASE_URL}/series/{}", self.id)
    }
}

/// Profile link for an AO3 user name.
pub fn user_url(name: &str) -> String {
    format!("{BASE_URL}/users/{name}")
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selectors are valid")
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(scope: ElementRef<'_>, css: &str) -> Option<String> {
    scope.select(&selector(css)).next().map(text_of)
}

fn all_text(scope: ElementRef<'_>, css: &str) -> Vec<String> {
    scope.select(&selector(css)).map(text_of).filter(|s| !s.is_empty()).collect()
}

fn count_in(scope: ElementRef<'_>, css: &str) -> u64 {
    first_text(scope, css).and_then(|s| parse_count(&s)).unwrap_or(0)
}

fn parse_error(message: impl Into<String>) -> StoryError {
    StoryError::Parse {
        service: SERVICE,
        message: message.into(),
    }
}

/// `3/10` or `3/?` → `(3, Some(10))` / `(3, None)`.
fn parse_chapters(text: &str) -> (u32, Option<u32>) {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parts = compact.splitn(2, '/');
    let written = parts.next().and_then(|s| s.replace(',', "").parse().ok()).unwrap_or(0);
    let expected = parts.next().and_then(|s| s.replace(',', "").parse().ok());
    (written, expected)
}

/// The `(term, definition)` pairs directly inside a `<dl>`.
fn definition_pairs(dl: ElementRef<'_>) -> Vec<(String, ElementRef<'_>)> {
    let mut pairs = Vec::new();
    let mut term: Option<String> = None;
    for child in dl.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "dt" => term = Some(text_of(child).trim_end_matches(':').to_string()),
            "dd" => {
                if let Some(term) = term.take() {
                    pairs.push((term, child));
                }
            }
            _ => {}
        }
    }
    pairs
}

/// The work-wide stats block shared by work pages and blurbs.
struct WorkStats {
    words: u64,
    chapters: u32,
    expected_chapters: Option<u32>,
    comments: u64,
    kudos: u64,
    bookmarks: u64,
    hits: u64,
}

fn parse_stats(scope: ElementRef<'_>) -> WorkStats {
    let (chapters, expected_chapters) = first_text(scope, "dl.stats dd.chapters")
        .map(|s| parse_chapters(&s))
        .unwrap_or((0, None));
    WorkStats {
        words: count_in(scope, "dl.stats dd.words"),
        chapters,
        expected_chapters,
        comments: count_in(scope, "dl.stats dd.comments"),
        kudos: count_in(scope, "dl.stats dd.kudos"),
        bookmarks: count_in(scope, "dl.stats dd.bookmarks"),
        hits: count_in(scope, "dl.stats dd.hits"),
    }
}

// ---------------------------------------------------------------------------
// Page parsers
// ---------------------------------------------------------------------------

/// Parse a full work page (`/works/{id}`).
pub fn parse_work_page(id: u64, html: &str) -> Result<Ao3Work, StoryError> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let title = first_text(root, "h2.title.heading").ok_or_else(|| parse_error("work page has no title"))?;
    let mut authors = all_text(root, "h3.byline a[rel=\"author\"]");
    if authors.is_empty() {
        authors.push("Anonymous".to_string());
    }
    let summary = first_text(root, "div.summary blockquote.userstuff").unwrap_or_default();

    let stats = parse_stats(root);
    let published = first_text(root, "dl.stats dd.published").and_then(|s| parse_iso_date(&s));
    let updated = first_text(root, "dl.stats dd.status")
        .and_then(|s| parse_iso_date(&s))
        .or(published);

    Ok(Ao3Work {
        id,
        title,
        authors,
        summary,
        rating: all_text(root, "dd.rating a.tag").join(", "),
        fandoms: all_text(root, "dd.fandom a.tag"),
        categories: all_text(root, "dd.category a.tag"),
        characters: all_text(root, "dd.character a.tag"),
        words: stats.words,
        chapters: stats.chapters,
        expected_chapters: stats.expected_chapters,
        comments: stats.comments,
        kudos: stats.kudos,
        bookmarks: stats.bookmarks,
        hits: stats.hits,
        published,
        updated,
        is_complete: stats.expected_chapters == Some(stats.chapters),
    })
}

/// Parse one `li.work.blurb` from a series page or search results.
fn parse_blurb(blurb: ElementRef<'_>) -> Option<Ao3Work> {
    let id = blurb.value().id()?.strip_prefix("work_")?.parse().ok()?;

    let title = blurb
        .select(&selector("h4.heading a"))
        .find(|a| a.value().attr("rel") != Some("author"))
        .map(text_of)?;
    let mut authors = all_text(blurb, "h4.heading a[rel=\"author\"]");
    if authors.is_empty() {
        authors.push("Anonymous".to_string());
    }

    let title_attr = |css: &str| {
        blurb
            .select(&selector(css))
            .next()
            .and_then(|e| e.value().attr("title"))
            .unwrap_or_default()
            .to_string()
    };
    let categories = title_attr("ul.required-tags span.category")
        .split(", ")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let stats = parse_stats(blurb);
    let updated = first_text(blurb, "p.datetime").and_then(|s| NaiveDate::parse_from_str(&s, "%d %b %Y").ok());

    Some(Ao3Work {
        id,
        title,
        authors,
        summary: first_text(blurb, "blockquote.userstuff.summary").unwrap_or_default(),
        rating: title_attr("ul.required-tags span.rating"),
        fandoms: all_text(blurb, "h5.fandoms a.tag"),
        categories,
        characters: all_text(blurb, "ul.tags li.characters a.tag"),
        words: stats.words,
        chapters: stats.chapters,
        expected_chapters: stats.expected_chapters,
        comments: stats.comments,
        kudos: stats.kudos,
        bookmarks: stats.bookmarks,
        hits: stats.hits,
        published: None,
        updated,
        is_complete: stats.expected_chapters == Some(stats.chapters),
    })
}

fn parse_blurbs(root: ElementRef<'_>) -> Vec<Ao3Work> {
    root.select(&selector("li.work.blurb")).filter_map(parse_blurb).collect()
}

/// Parse a series page (`/series/{id}`), including its listed works.
pub fn parse_series_page(id: u64, html: &str) -> Result<Ao3Series, StoryError> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let name = first_text(root, "h2.heading").ok_or_else(|| parse_error("series page has no heading"))?;
    let meta = root
        .select(&selector("dl.series.meta"))
        .next()
        .ok_or_else(|| parse_error("series page has no metadata block"))?;

    let mut series = Ao3Series {
        id,
        name,
        creators: Vec::new(),
        description: String::new(),
        begun: None,
        updated: None,
        words: 0,
        works_count: 0,
        is_complete: false,
        works: parse_blurbs(root),
    };

    for (term, dd) in definition_pairs(meta) {
        match term.as_str() {
            "Creator" | "Creators" => series.creators = all_text(dd, "a[rel=\"author\"]"),
            "Series Begun" => series.begun = parse_iso_date(&text_of(dd)),
            "Series Updated" => series.updated = parse_iso_date(&text_of(dd)),
            "Description" => series.description = first_text(dd, "blockquote.userstuff").unwrap_or_else(|| text_of(dd)),
            "Stats" => {
                let Some(stats) = dd.select(&selector("dl.stats")).next() else {
                    continue;
                };
                for (stat, value) in definition_pairs(stats) {
                    let value = text_of(value);
                    match stat.as_str() {
                        "Words" => series.words = parse_count(&value).unwrap_or(0),
                        "Works" => series.works_count = parse_count(&value).and_then(|n| n.try_into().ok()).unwrap_or(0),
                        "Complete" => series.is_complete = value.eq_ignore_ascii_case("yes"),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if series.creators.is_empty() {
        series.creators.push("Anonymous".to_string());
    }
    if series.works_count == 0 {
        series.works_count = series.works.len().try_into().unwrap_or(u32::MAX);
    }
    Ok(series)
}

/// Parse the work blurbs on a search results page.
pub fn parse_search_page(html: &str) -> Vec<Ao3Work> {
    let doc = Html::parse_document(html);
    parse_blurbs(doc.root_element())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Ao3Client {
    http: reqwest::Client,
}

impl Ao3Client {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch(&self, url: &str, query: &[(&str, &str)]) -> Result<String, StoryError> {
        debug!(url, "fetching AO3 page");
        let resp = self.http.get(url).query(query).send().await?;
        Ok(check_status(SERVICE, resp)?.text().await?)
    }

    pub async fn get_work(&self, id: u64) -> Result<Ao3Work, StoryError> {
        let html = self
            .fetch(&format!("{BASE_URL}/works/{id}"), &[("view_adult", "true")])
            .await?;
        parse_work_page(id, &html)
    }

    pub async fn get_series(&self, id: u64) -> Result<Ao3Series, StoryError> {
        let html = self.fetch(&format!("{BASE_URL}/series/{id}"), &[]).await?;
        parse_series_page(id, &html)
    }

    /// Full-text work search across every field.
    pub async fn search_works(&self, any_field: &str) -> Result<Vec<Ao3Work>, StoryError> {
        let html = self
            .fetch(&format!("{BASE_URL}/works/search"), &[("work_search[query]", any_field)])
            .await?;
        Ok(parse_search_page(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORK_PAGE: &str = r#"
        <html><body>
        <dl class="work meta group">
          <dt class="rating tags">Rating:</dt>
          <dd class="rating tags"><ul><li><a class="tag">General Audiences</a></li></ul></dd>
          <dt class="category tags">Category:</dt>
          <dd class="category tags"><ul><li><a class="tag">Gen</a></li></ul></dd>
          <dt class="fandom tags">Fandom:</dt>
          <dd class="fandom tags"><ul><li><a class="tag">Worm - Wildbow</a></li><li><a class="tag">Harry Potter</a></li></ul></dd>
          <dt class="character tags">Characters:</dt>
          <dd class="character tags"><ul><li><a class="tag">Taylor Hebert</a></li></ul></dd>
          <dt class="stats">Stats:</dt>
          <dd class="stats"><dl class="stats">
            <dt class="published">Published:</dt><dd class="published">2021-03-04</dd>
            <dt class="status">Completed:</dt><dd class="status">2022-05-06</dd>
            <dt class="words">Words:</dt><dd class="words">123,456</dd>
            <dt class="chapters">Chapters:</dt><dd class="chapters">12/12</dd>
            <dt class="comments">Comments:</dt><dd class="comments">1,001</dd>
            <dt class="kudos">Kudos:</dt><dd class="kudos">5,000</dd>
            <dt class="bookmarks">Bookmarks:</dt><dd class="bookmarks"><a>800</a></dd>
            <dt class="hits">Hits:</dt><dd class="hits">99,999</dd>
          </dl></dd>
        </dl>
        <div class="preface group">
          <h2 class="title heading">  A Quiet Storm </h2>
          <h3 class="byline heading"><a rel="author" href="/users/writer/pseuds/writer">writer</a></h3>
          <div class="summary module"><h3 class="heading">Summary:</h3>
            <blockquote class="userstuff"><p>First line.</p><p>Second line.</p></blockquote>
          </div>
        </div>
        </body></html>
    "#;

    const SERIES_PAGE: &str = r#"
        <html><body>
        <h2 class="heading">The Long Road</h2>
        <dl class="series meta group">
          <dt>Creator:</dt><dd><a rel="author" href="/users/a">alpha</a>, <a rel="author" href="/users/b">beta</a></dd>
          <dt>Series Begun:</dt><dd>2019-01-02</dd>
          <dt>Series Updated:</dt><dd>2020-03-04</dd>
          <dt>Description:</dt><dd><blockquote class="userstuff"><p>Two stories.</p></blockquote></dd>
          <dt>Stats:</dt><dd><dl class="stats">
            <dt>Words:</dt><dd>20,000</dd>
            <dt>Works:</dt><dd>2</dd>
            <dt>Complete:</dt><dd>Yes</dd>
          </dl></dd>
        </dl>
        <ul class="series work index group">
          <li id="work_11" class="work blurb group" role="article">
            <div class="header module">
              <h4 class="heading"><a href="/works/11">Part One</a> by <a rel="author" href="/users/a">alpha</a></h4>
              <h5 class="fandoms heading"><a class="tag">Original Work</a></h5>
              <ul class="required-tags">
                <li><span class="rating-teen rating" title="Teen And Up Audiences"><span class="text">T</span></span></li>
                <li><span class="category-multi category" title="F/M, Gen"><span class="text">F/M, Gen</span></span></li>
              </ul>
              <p class="datetime">04 Mar 2020</p>
            </div>
            <ul class="tags commas"><li class="characters"><a class="tag">Original Character</a></li></ul>
            <blockquote class="userstuff summary"><p>It begins.</p></blockquote>
            <dl class="stats">
              <dt class="words">Words:</dt><dd class="words">10,000</dd>
              <dt class="chapters">Chapters:</dt><dd class="chapters"><a>3</a>/?</dd>
              <dt class="kudos">Kudos:</dt><dd class="kudos">42</dd>
            </dl>
          </li>
          <li id="work_12" class="work blurb group" role="article">
            <div class="header module"><h4 class="heading"><a href="/works/12">Part Two</a></h4></div>
            <dl class="stats"><dt class="chapters">Chapters:</dt><dd class="chapters">1/1</dd></dl>
          </li>
        </ul>
        </body></html>
    "#;

    #[test]
    fn work_page_fields() {
        let work = parse_work_page(7, WORK_PAGE).unwrap();
        assert_eq!(work.title, "A Quiet Storm");
        assert_eq!(work.authors, vec!["writer"]);
        assert_eq!(work.summary, "First line. Second line.");
        assert_eq!(work.rating, "General Audiences");
        assert_eq!(work.fandoms, vec!["Worm - Wildbow", "Harry Potter"]);
        assert_eq!(work.categories, vec!["Gen"]);
        assert_eq!(work.characters, vec!["Taylor Hebert"]);
        assert_eq!(work.words, 123_456);
        assert_eq!((work.chapters, work.expected_chapters), (12, Some(12)));
        assert!(work.is_complete);
        assert_eq!(work.comments, 1001);
        assert_eq!(work.bookmarks, 800);
        assert_eq!(work.hits, 99_999);
        assert_eq!(work.published, NaiveDate::from_ymd_opt(2021, 3, 4));
        assert_eq!(work.updated, NaiveDate::from_ymd_opt(2022, 5, 6));
        assert_eq!(work.url(), "https://archiveofourown.org/works/7");
    }

    #[test]
    fn work_page_without_title_is_a_parse_error() {
        let err = parse_work_page(1, "<html><body><p>Retry later</p></body></html>").unwrap_err();
        assert!(matches!(err, StoryError::Parse { .. }));
    }

    #[test]
    fn series_page_fields_and_blurbs() {
        let series = parse_series_page(99, SERIES_PAGE).unwrap();
        assert_eq!(series.name, "The Long Road");
        assert_eq!(series.creators, vec!["alpha", "beta"]);
        assert_eq!(series.description, "Two stories.");
        assert_eq!(series.updated, NaiveDate::from_ymd_opt(2020, 3, 4));
        assert_eq!(series.words, 20_000);
        assert_eq!(series.works_count, 2);
        assert!(series.is_complete);
        assert_eq!(series.works.len(), 2);

        let first = &series.works[0];
        assert_eq!(first.id, 11);
        assert_eq!(first.title, "Part One");
        assert_eq!(first.authors, vec!["alpha"]);
        assert_eq!(first.rating, "Teen And Up Audiences");
        assert_eq!(first.categories, vec!["F/M", "Gen"]);
        assert_eq!(first.characters, vec!["Original Character"]);
        assert_eq!((first.chapters, first.expected_chapters), (3, None));
        assert!(!first.is_complete);
        assert_eq!(first.kudos, 42);
        assert_eq!(first.updated, NaiveDate::from_ymd_opt(2020, 3, 4));

        let second = &series.works[1];
        assert_eq!(second.authors, vec!["Anonymous"]);
        assert!(second.is_complete);
    }

    #[test]
    fn search_page_reads_blurbs() {
        let works = parse_search_page(SERIES_PAGE);
        assert_eq!(works.iter().map(|w| w.id).collect::<Vec<_>>(), vec![11, 12]);
        assert!(parse_search_page("<ol class=\"work index group\"></ol>").is_empty());
    }

    #[test]
    fn chapter_counts() {
        assert_eq!(parse_chapters("5/10"), (5, Some(10)));
        assert_eq!(parse_chapters(" 1 / ? "), (1, None));
        assert_eq!(parse_chapters("1,024/1,024"), (1024, Some(1024)));
    }
}
