//! Registry of the webfiction sites the bot recognises links for.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// A supported story-hosting site.
#[derive(Debug)]
pub struct StoryWebsite {
    pub name: &'static str,
    pub acronym: &'static str,
    /// Pattern for a story link on this site, without a scheme.
    pub pattern: &'static str,
    pub icon_url: &'static str,
}

pub const AO3_LOGO_URL: &str = "https://archiveofourown.org/images/ao3_logos/logo_42.png";

/// All supported sites, in matching priority order.
pub static STORY_WEBSITES: [StoryWebsite; 7] = [
    StoryWebsite {
        name: "FanFiction.Net",
        acronym: "FFN",
        pattern: r"(?:www\.|m\.|)fanfiction\.net/s/(?P<ffn_id>\d+)",
        icon_url: "https://www.fanfiction.net/static/icons3/ff-icon-128.png",
    },
    StoryWebsite {
        name: "FictionPress",
        acronym: "FP",
        pattern: r"(?:www\.|m\.|)fictionpress\.com/s/\d+",
        icon_url: "https://www.fanfiction.net/static/icons3/ff-icon-128.png",
    },
    StoryWebsite {
        name: "Archive of Our Own",
        acronym: "AO3",
        pattern: r"(?:www\.|)archiveofourown\.org/(?P<ao3_kind>works|series)/(?P<ao3_id>\d+)",
        icon_url: AO3_LOGO_URL,
    },
    StoryWebsite {
        name: "SpaceBattles",
        acronym: "SB",
        pattern: r"forums\.spacebattles\.com/threads/\S*",
        icon_url: "https://forums.spacebattles.com/data/svg/2/1/1682578744/2022_favicon_192x192.png",
    },
    StoryWebsite {
        name: "Sufficient Velocity",
        acronym: "SV",
        pattern: r"forums\.sufficientvelocity\.com/threads/\S*",
        icon_url: "https://forums.sufficientvelocity.com/favicon-96x96.png?v=69wyvmQdJN",
    },
    StoryWebsite {
        name: "Questionable Questing",
        acronym: "QQ",
        pattern: r"forums\.questionablequesting\.com/threads/\S*",
        icon_url: "https://forums.questionablequesting.com/favicon.ico",
    },
    StoryWebsite {
        name: "Sink Into Your Eyes",
        acronym: "SIYE",
        pattern: r"(?:www\.|)siye\.co\.uk/(?:siye/|)viewstory\.php\?sid=\d+",
        icon_url: "https://www.siye.co.uk/siye/favicon.ico",
    },
];

/// Whether an AO3 link points at a single work or a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ao3Kind {
    Work,
    Series,
}

/// One story link found in a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch {
    pub site: &'static StoryWebsite,
    /// The full matched link text.
    pub matched: String,
    pub ffn_id: Option<u64>,
    pub ao3_kind: Option<Ao3Kind>,
    pub ao3_id: Option<u64>,
}

impl PartialEq for StoryWebsite {
    fn eq(&self, other: &Self) -> bool {
        self.acronym == other.acronym
    }
}

impl Eq for StoryWebsite {}

fn combined_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = STORY_WEBSITES
            .iter()
            .map(|site| format!("(?P<{}>{})", site.acronym, site.pattern))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?:https?://)?(?:{alternatives})")).expect("story site patterns are valid")
    })
}

fn site_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        STORY_WEBSITES
            .iter()
            .map(|site| Regex::new(site.pattern).expect("story site patterns are valid"))
            .collect()
    })
}

/// Quick check for whether the text contains any supported story link.
pub fn contains_story_link(text: &str) -> bool {
    combined_regex().is_match(text)
}

/// Every story link in `text`, in order of appearance.
pub fn find_links(text: &str) -> Vec<LinkMatch> {
    combined_regex()
        .captures_iter(text)
        .filter_map(|caps| link_from_captures(&caps))
        .collect()
}

fn link_from_captures(caps: &Captures<'_>) -> Option<LinkMatch> {
    let site = STORY_WEBSITES.iter().find(|site| caps.name(site.acronym).is_some())?;
    let parse_id = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u64>().ok());
    let ao3_kind = caps.name("ao3_kind").map(|m| match m.as_str() {
        "series" => Ao3Kind::Series,
        _ => Ao3Kind::Work,
    });
    Some(LinkMatch {
        site,
        matched: caps.get(0)?.as_str().to_string(),
        ffn_id: parse_id("ffn_id"),
        ao3_kind,
        ao3_id: parse_id("ao3_id"),
    })
}

/// Parse a single AO3 link out of arbitrary text.
pub fn find_ao3_link(text: &str) -> Option<LinkMatch> {
    find_links(text).into_iter().find(|link| link.site.acronym == "AO3")
}

/// The first site whose story pattern appears in `url`.
pub fn site_for_url(url: &str) -> Option<&'static StoryWebsite> {
    STORY_WEBSITES
        .iter()
        .zip(site_regexes())
        .find(|(_, re)| re.is_match(url))
        .map(|(site, _)| site)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_links_in_order() {
        let text = "check https://www.fanfiction.net/s/12345/1/ and archiveofourown.org/works/678 too";
        let links = find_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].site.acronym, "FFN");
        assert_eq!(links[0].ffn_id, Some(12345));
        assert_eq!(links[1].site.acronym, "AO3");
        assert_eq!(links[1].ao3_kind, Some(Ao3Kind::Work));
        assert_eq!(links[1].ao3_id, Some(678));
    }

    #[test]
    fn recognises_ao3_series() {
        let link = find_ao3_link("https://archiveofourown.org/series/42").unwrap();
        assert_eq!(link.ao3_kind, Some(Ao3Kind::Series));
        assert_eq!(link.ao3_id, Some(42));
        assert_eq!(link.matched, "https://archiveofourown.org/series/42");
    }

    #[test]
    fn forum_links_take_the_whole_thread_path() {
        let links = find_links("forums.spacebattles.com/threads/some-quest.1234/ is great");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].site.acronym, "SB");
        assert_eq!(links[0].matched, "forums.spacebattles.com/threads/some-quest.1234/");
        assert_eq!(links[0].ffn_id, None);
    }

    #[test]
    fn matches_every_registered_site() {
        let samples = [
            ("m.fanfiction.net/s/1", "FFN"),
            ("www.fictionpress.com/s/2", "FP"),
            ("archiveofourown.org/works/3", "AO3"),
            ("forums.spacebattles.com/threads/x", "SB"),
            ("forums.sufficientvelocity.com/threads/y", "SV"),
            ("forums.questionablequesting.com/threads/z", "QQ"),
            ("www.siye.co.uk/siye/viewstory.php?sid=4", "SIYE"),
        ];
        for (text, acronym) in samples {
            let links = find_links(text);
            assert_eq!(links.len(), 1, "no match for {text}");
            assert_eq!(links[0].site.acronym, acronym);
        }
    }

    #[test]
    fn plain_text_has_no_links() {
        assert!(!contains_story_link("just chatting about fanfiction"));
        assert!(find_links("archiveofourown.org/users/someone").is_empty());
    }

    #[test]
    fn site_for_url_picks_icon_source() {
        let site = site_for_url("https://www.fanfiction.net/s/99/1/title").unwrap();
        assert_eq!(site.name, "FanFiction.Net");
        assert!(site_for_url("https://example.com").is_none());
        assert_eq!(site_for_url("forums.questionablequesting.com/threads/q").unwrap().acronym, "QQ");
    }
}
