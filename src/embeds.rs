//! Embed factories for each kind of story metadata.

use chrono::NaiveDate;

use crate::sites::{self, AO3_LOGO_URL};
use crate::stories::{ao3, Ao3Series, Ao3Work, AtlasStory, FicHubStory, StoryData};
use crate::text::{capitalize, long_date, shorten, thousands};
use crate::types::{Embed, EMBED_TOTAL_LIMIT};

/// Discord's own cap on a single embed description.
const DESCRIPTION_LIMIT: usize = 4096;
const AUTHOR_LIMIT: usize = 256;
/// Description room kept back from a series' works list for its summary.
const SUMMARY_RESERVE: usize = 1024;
const ELIDED_WORKS: &str = "\n\u{2026}";
const DETAIL_WIDTH: usize = 100;

const AO3_FOOTER: &str = "A substitute for displaying AO3 information.";
const ATLAS_FOOTER: &str = "Made using iris's Atlas API. Some results may be out of date or unavailable.";
const FICHUB_FOOTER: &str = "Made using the FicHub API. Some results may be out of date or unavailable.";
const NO_STATS: &str = "No stats available at this time.";

const LAST_UPDATED: &str = "\u{1F4DC} Last Updated";
const LENGTH: &str = "\u{1F4D6} Length";
const RATING: &str = "\u{1F516} Rating";
const STATS: &str = "\u{1F4CA} Stats";
const WORKS: &str = "\u{1F4DA} **Works:**";

const FFN_ICON: &str = "https://www.fanfiction.net/static/icons3/ff-icon-128.png";

/// The embed shown when nothing could be found.
pub fn not_found_embed() -> Embed {
    Embed::new()
        .title("No Results")
        .description("No results found. You may need to edit your search.")
        .timestamp_now()
}

/// Whether `embed` is the one built by [`not_found_embed`].
pub fn is_not_found(embed: &Embed) -> bool {
    embed.title.as_deref() == Some("No Results")
}

/// Pick the right factory for `data`, falling back to [`not_found_embed`].
pub fn story_embed(data: Option<&StoryData>) -> Embed {
    match data {
        Some(StoryData::Atlas(story)) => atlas_embed(story),
        Some(StoryData::FicHub(story)) => fichub_embed(story),
        Some(StoryData::Ao3Work(work)) => ao3_work_embed(work),
        Some(StoryData::Ao3Series(series)) => ao3_series_embed(series),
        None => not_found_embed(),
    }
}

fn last_updated(date: Option<NaiveDate>, complete: bool) -> String {
    match date {
        Some(date) if complete => format!("{} (Complete)", long_date(date)),
        Some(date) => long_date(date),
        None => "Unknown".to_string(),
    }
}

fn details(groups: [String; 3]) -> String {
    groups
        .iter()
        .map(|group| shorten(group, DETAIL_WIDTH, "..."))
        .collect::<Vec<_>>()
        .join(" \u{2022} ")
}

fn stat_line(stats: &[(&str, u64)]) -> String {
    stats
        .iter()
        .map(|(name, value)| format!("**{name}:** {}", thousands(*value)))
        .collect::<Vec<_>>()
        .join(" \u{2022} ")
}

/// Room left for a description once everything else is in the embed.
fn description_room(embed: &Embed) -> usize {
    EMBED_TOTAL_LIMIT.saturating_sub(embed.total_len()).min(DESCRIPTION_LIMIT)
}

fn author_names(names: &[String]) -> String {
    shorten(&names.join(", "), AUTHOR_LIMIT, "...")
}

fn with_truncated_description(mut embed: Embed, description: &str) -> Embed {
    embed.description = None;
    let room = description_room(&embed);
    let description = shorten(description, room, "...");
    embed.description = (!description.is_empty()).then_some(description);
    embed
}

pub fn ao3_work_embed(work: &Ao3Work) -> Embed {
    let author_url = work.authors.first().map(|name| ao3::user_url(name));
    let stats = stat_line(&[
        ("Comments", work.comments),
        ("Kudos", work.kudos),
        ("Bookmarks", work.bookmarks),
        ("Hits", work.hits),
    ]);

    let embed = Embed::new()
        .title(&work.title)
        .url(work.url())
        .timestamp_now()
        .author(author_names(&work.authors), author_url, Some(AO3_LOGO_URL.to_string()))
        .field(LAST_UPDATED, last_updated(work.updated, work.is_complete), true)
        .field(
            LENGTH,
            format!("{} words in {} chapter(s)", thousands(work.words), work.chapters),
            true,
        )
        .field(
            format!("{RATING}: {}", work.rating),
            details([work.fandoms.join(", "), work.categories.join(", "), work.characters.join(", ")]),
            false,
        )
        .field(STATS, stats, false)
        .footer(AO3_FOOTER);

    with_truncated_description(embed, &work.summary)
}

/// The "Works" heading and one link per work, cut at whole lines to fit in
/// `room` characters. Cut lists end with an ellipsis line.
fn works_list(works: &[Ao3Work], room: usize) -> String {
    let elided_len = ELIDED_WORKS.chars().count();
    let mut out = WORKS.to_string();
    let mut used = out.chars().count();
    if used + elided_len > room {
        return String::new();
    }

    for (i, work) in works.iter().enumerate() {
        let line = format!("\n[{}]({})", work.title, work.url());
        let len = line.chars().count();
        let reserve = if i + 1 < works.len() { elided_len } else { 0 };
        if used + len + reserve > room {
            out.push_str(ELIDED_WORKS);
            return out;
        }
        out.push_str(&line);
        used += len;
    }
    out
}

pub fn ao3_series_embed(series: &Ao3Series) -> Embed {
    let author_url = series.creators.first().map(|name| ao3::user_url(name));

    let mut embed = Embed::new()
        .title(&series.name)
        .url(series.url())
        .timestamp_now()
        .author(author_names(&series.creators), author_url, Some(AO3_LOGO_URL.to_string()))
        .field(LAST_UPDATED, last_updated(series.updated, series.is_complete), true)
        .field(
            LENGTH,
            format!("{} words in {} work(s)", thousands(series.words), series.works_count),
            true,
        )
        .footer(AO3_FOOTER);

    // The works list goes first, short of a reserve for the summary and the blank line after it.
    let room = description_room(&embed);
    let reserve = match series.description.trim().chars().count() {
        0 => 0,
        len => (len + 2).min(SUMMARY_RESERVE),
    };
    let works = works_list(&series.works, room.saturating_sub(reserve));
    let works_len = works.chars().count();
    let summary_room = match works_len {
        0 => room,
        len => room.saturating_sub(len + 2),
    };
    let summary = shorten(&series.description, summary_room, "...");

    let description = match (summary.is_empty(), works.is_empty()) {
        (true, true) => None,
        (true, false) => Some(works),
        (false, true) => Some(summary),
        (false, false) => Some(format!("{summary}\n\n{works}")),
    };
    embed.description = description;
    embed
}

pub fn atlas_embed(story: &AtlasStory) -> Embed {
    let stats = stat_line(&[
        ("Reviews", story.reviews),
        ("Faves", story.favorites),
        ("Follows", story.follows),
    ]);

    let embed = Embed::new()
        .title(&story.title)
        .url(story.url())
        .timestamp_now()
        .author(
            shorten(&story.author.name, AUTHOR_LIMIT, "..."),
            story.author.url.clone(),
            Some(FFN_ICON.to_string()),
        )
        .field(
            LAST_UPDATED,
            last_updated(story.updated.or(story.published), story.is_complete),
            true,
        )
        .field(
            LENGTH,
            format!("{} words in {} chapter(s)", thousands(story.words), story.chapters),
            true,
        )
        .field(
            format!("{RATING}: Fiction {}", story.rating),
            details([story.fandoms.join(", "), story.genres.join("/"), story.characters.join(", ")]),
            false,
        )
        .field(STATS, stats, false)
        .footer(ATLAS_FOOTER);

    with_truncated_description(embed, &story.description)
}

fn fichub_stats(story: &FicHubStory) -> String {
    let names: &[&str] = if story.url.contains("fanfiction.net") {
        &["reviews", "favorites", "follows"]
    } else if story.url.contains("archiveofourown.org") {
        &["comments", "kudos", "bookmarks", "hits"]
    } else {
        &[]
    };

    let stats = names
        .iter()
        .filter_map(|name| story.stats.get(*name).map(|value| (capitalize(name), *value)))
        .map(|(name, value)| format!("**{name}:** {}", thousands(value)))
        .collect::<Vec<_>>();

    if stats.is_empty() {
        NO_STATS.to_string()
    } else {
        stats.join(" \u{2022} ")
    }
}

pub fn fichub_embed(story: &FicHubStory) -> Embed {
    let icon_url = sites::site_for_url(&story.url).map(|site| site.icon_url.to_string());
    let updated = match story.updated {
        Some(date) if story.status.trim().is_empty() => long_date(date),
        Some(date) => format!("{} ({})", long_date(date), capitalize(story.status.trim())),
        None => "Unknown".to_string(),
    };

    let embed = Embed::new()
        .title(&story.title)
        .url(&story.url)
        .timestamp_now()
        .author(shorten(&story.author.name, AUTHOR_LIMIT, "..."), story.author.url.clone(), icon_url)
        .field(LAST_UPDATED, updated, true)
        .field(
            LENGTH,
            format!("{} words in {} chapter(s)", thousands(story.words), story.chapters),
            true,
        )
        .field(
            format!("{RATING}: {}", story.rating),
            details([story.fandoms.join(", "), story.categories.join(", "), story.characters.join(", ")]),
            false,
        )
        .field(STATS, fichub_stats(story), false)
        .footer(FICHUB_FOOTER);

    with_truncated_description(embed, &story.description)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::stories::Author;

    fn work(id: u64, summary: &str) -> Ao3Work {
        Ao3Work {
            id,
            title: format!("Work {id}"),
            authors: vec!["alpha".to_string(), "beta".to_string()],
            summary: summary.to_string(),
            rating: "General Audiences".to_string(),
            fandoms: vec!["Original Work".to_string()],
            categories: vec!["Gen".to_string()],
            characters: vec!["Someone".to_string()],
            words: 12345,
            chapters: 3,
            expected_chapters: Some(3),
            comments: 1,
            kudos: 2000,
            bookmarks: 3,
            hits: 40000,
            published: None,
            updated: NaiveDate::from_ymd_opt(2023, 6, 7),
            is_complete: true,
        }
    }

    fn fichub(url: &str) -> FicHubStory {
        FicHubStory {
            title: "Thread".to_string(),
            author: Author {
                name: "poster".to_string(),
                url: None,
            },
            url: url.to_string(),
            description: "desc".to_string(),
            created: None,
            updated: NaiveDate::from_ymd_opt(2020, 1, 2),
            status: "ongoing".to_string(),
            chapters: 10,
            words: 1000,
            rating: "N/A".to_string(),
            fandoms: Vec::new(),
            characters: Vec::new(),
            categories: Vec::new(),
            stats: BTreeMap::from([("reviews".to_string(), 5), ("follows".to_string(), 1500)]),
        }
    }

    #[test]
    fn not_found_is_recognisable() {
        let embed = story_embed(None);
        assert!(is_not_found(&embed));
        assert_eq!(
            embed.description.as_deref(),
            Some("No results found. You may need to edit your search.")
        );
        assert!(embed.timestamp.is_some());
    }

    #[test]
    fn ao3_work_fields() {
        let embed = ao3_work_embed(&work(5, "A summary."));
        assert_eq!(embed.title.as_deref(), Some("Work 5"));
        assert_eq!(embed.url.as_deref(), Some("https://archiveofourown.org/works/5"));
        let author = embed.author.as_ref().unwrap();
        assert_eq!(author.name, "alpha, beta");
        assert_eq!(author.url.as_deref(), Some("https://archiveofourown.org/users/alpha"));
        assert_eq!(embed.fields[0].value, "June 07, 2023 (Complete)");
        assert_eq!(embed.fields[1].value, "12,345 words in 3 chapter(s)");
        assert_eq!(embed.fields[2].name, "\u{1F516} Rating: General Audiences");
        assert_eq!(embed.fields[2].value, "Original Work \u{2022} Gen \u{2022} Someone");
        assert_eq!(
            embed.fields[3].value,
            "**Comments:** 1 \u{2022} **Kudos:** 2,000 \u{2022} **Bookmarks:** 3 \u{2022} **Hits:** 40,000"
        );
        assert_eq!(embed.description.as_deref(), Some("A summary."));
        assert_eq!(embed.footer.as_ref().unwrap().text, AO3_FOOTER);
    }

    #[test]
    fn long_summaries_stay_under_the_embed_limit() {
        let summary = "word ".repeat(3000);
        let embed = ao3_work_embed(&work(1, &summary));
        assert!(embed.total_len() <= EMBED_TOTAL_LIMIT);
        let description = embed.description.unwrap();
        assert!(description.ends_with("..."));
        assert!(description.chars().count() <= DESCRIPTION_LIMIT);
    }

    #[test]
    fn series_lists_works_after_description() {
        let series = Ao3Series {
            id: 9,
            name: "Saga".to_string(),
            creators: vec!["alpha".to_string()],
            description: "Two parts.".to_string(),
            begun: None,
            updated: None,
            words: 2000,
            works_count: 2,
            is_complete: false,
            works: vec![work(1, ""), work(2, "")],
        };
        let embed = ao3_series_embed(&series);
        assert_eq!(
            embed.description.as_deref(),
            Some(
                "Two parts.\n\n\u{1F4DA} **Works:**\n[Work 1](https://archiveofourown.org/works/1)\n\
                 [Work 2](https://archiveofourown.org/works/2)"
            )
        );
        assert_eq!(embed.fields[0].value, "Unknown");
        assert_eq!(embed.fields[1].value, "2,000 words in 2 work(s)");
    }

    fn series_of(works: Vec<Ao3Work>, description: &str) -> Ao3Series {
        Ao3Series {
            id: 4,
            name: "Long Saga".to_string(),
            creators: vec!["alpha".to_string()],
            description: description.to_string(),
            begun: None,
            updated: NaiveDate::from_ymd_opt(2023, 6, 7),
            words: 1_000_000,
            works_count: works.len() as u32,
            is_complete: false,
            works,
        }
    }

    #[test]
    fn series_summary_yields_to_the_works_list() {
        let works = (1..=25).map(|id| work(id, "")).collect();
        let embed = ao3_series_embed(&series_of(works, &"word ".repeat(1000)));

        assert!(embed.total_len() <= EMBED_TOTAL_LIMIT);
        let description = embed.description.unwrap();
        assert!(description.chars().count() <= DESCRIPTION_LIMIT);
        assert!(description.starts_with("word word"));
        assert!(description.contains("...\n\n\u{1F4DA} **Works:**\n"));
        assert!(description.ends_with("[Work 25](https://archiveofourown.org/works/25)"));
    }

    #[test]
    fn long_works_lists_are_cut_at_whole_lines() {
        let works = (1..=80)
            .map(|id| Ao3Work {
                title: format!("A reasonably long work title number {id} in the saga"),
                ..work(id, "")
            })
            .collect();
        let embed = ao3_series_embed(&series_of(works, "short"));

        assert!(embed.total_len() <= EMBED_TOTAL_LIMIT);
        let description = embed.description.unwrap();
        assert!(description.chars().count() <= DESCRIPTION_LIMIT);
        assert!(description.starts_with("short\n\n\u{1F4DA} **Works:**\n[A reasonably long work title number 1 in"));
        assert!(description.ends_with("\n\u{2026}"));

        let links: Vec<&str> = description.lines().skip(3).collect();
        let (last, whole) = links.split_last().unwrap();
        assert_eq!(*last, "\u{2026}");
        assert!(whole.len() > 10 && whole.len() < 80);
        assert!(whole
            .iter()
            .all(|line| line.starts_with("[A reasonably long") && line.ends_with(')')));
    }

    #[test]
    fn many_authors_fit_the_author_name_limit() {
        let authors = (0..100).map(|i| format!("coauthor{i}")).collect();
        let embed = ao3_work_embed(&Ao3Work {
            authors,
            ..work(2, "")
        });
        let name = &embed.author.as_ref().unwrap().name;
        assert!(name.chars().count() <= AUTHOR_LIMIT);
        assert!(name.starts_with("coauthor0, coauthor1,"));
        assert!(name.ends_with("..."));
    }

    #[test]
    fn fichub_without_status_has_plain_update_date() {
        let story = FicHubStory {
            status: String::new(),
            ..fichub("https://forums.spacebattles.com/threads/x.1/")
        };
        assert_eq!(fichub_embed(&story).fields[0].value, "January 02, 2020");
    }

    #[test]
    fn fichub_stats_depend_on_site() {
        let ffn = fichub_embed(&fichub("https://www.fanfiction.net/s/1/1/"));
        assert_eq!(ffn.fields[3].value, "**Reviews:** 5 \u{2022} **Follows:** 1,500");
        assert_eq!(ffn.fields[0].value, "January 02, 2020 (Ongoing)");
        assert_eq!(ffn.author.as_ref().unwrap().icon_url.as_deref(), Some(FFN_ICON));

        let forum = fichub_embed(&fichub("https://forums.spacebattles.com/threads/x.1/"));
        assert_eq!(forum.fields[3].value, NO_STATS);
    }

    #[test]
    fn atlas_falls_back_to_published_date() {
        let story = AtlasStory {
            id: 3,
            title: "Story".to_string(),
            author: Author {
                name: "writer".to_string(),
                url: Some("https://www.fanfiction.net/u/8".to_string()),
            },
            description: "About things.".to_string(),
            published: NaiveDate::from_ymd_opt(2010, 2, 28),
            updated: None,
            is_complete: false,
            rating: "T".to_string(),
            genres: vec!["Drama".to_string(), "Humor".to_string()],
            characters: Vec::new(),
            fandoms: vec!["Harry Potter".to_string()],
            chapters: 1,
            words: 999,
            reviews: 0,
            favorites: 0,
            follows: 0,
        };
        let embed = story_embed(Some(&StoryData::Atlas(story)));
        assert_eq!(embed.fields[0].value, "February 28, 2010");
        assert_eq!(embed.fields[2].name, "\u{1F516} Rating: Fiction T");
        assert_eq!(embed.fields[2].value, "Harry Potter \u{2022} Drama/Humor \u{2022} ");
        assert_eq!(embed.footer.as_ref().unwrap().text, ATLAS_FOOTER);
    }
}
