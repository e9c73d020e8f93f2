//! Paginated AO3 series view.
//!
//! A series result is sent with a select menu and `<` / `>` buttons so the
//! invoking user can flip between the series overview and each work. Live
//! views are kept in a [`ViewRegistry`] and matched to component
//! interactions through their `custom_id`s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use tracing::{debug, warn};

use crate::embeds::{ao3_series_embed, ao3_work_embed};
use crate::http::DiscordHttpClient;
use crate::stories::Ao3Series;
use crate::text::shorten;
use crate::types::*;

pub const VIEW_TIMEOUT: Duration = Duration::from_secs(180);
const CUSTOM_ID_PREFIX: &str = "wfseries";
const MAX_SELECT_OPTIONS: usize = 25;
const NOT_OWNER: &str = "You cannot interact with this view.";
const EXPIRED: &str = "This view is no longer active.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewAction {
    Select,
    Previous,
    Next,
}

impl ViewAction {
    fn as_str(self) -> &'static str {
        match self {
            ViewAction::Select => "select",
            ViewAction::Previous => "prev",
            ViewAction::Next => "next",
        }
    }
}

fn custom_id(nonce: u64, action: ViewAction) -> String {
    format!("{CUSTOM_ID_PREFIX}:{nonce}:{}", action.as_str())
}

/// Split a `wfseries:{nonce}:{action}` id. Anything else is not ours.
pub fn parse_custom_id(id: &str) -> Option<(u64, ViewAction)> {
    let mut parts = id.split(':');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let nonce = parts.next()?.parse().ok()?;
    let action = match parts.next()? {
        "select" => ViewAction::Select,
        "prev" => ViewAction::Previous,
        "next" => ViewAction::Next,
        _ => return None,
    };
    parts.next().is_none().then_some((nonce, action))
}

/// State of one paginated series message.
#[derive(Debug, Clone)]
pub struct SeriesView {
    nonce: u64,
    owner_id: Snowflake,
    series: Ao3Series,
    page_index: usize,
    application_id: Snowflake,
    /// Token of the most recent interaction that touched this message.
    token: String,
    /// Set while the message is still addressed as a follow-up of `token`.
    followup_message_id: Option<Snowflake>,
    last_interaction: Instant,
}

impl SeriesView {
    pub fn new(
        nonce: u64,
        owner_id: impl Into<Snowflake>,
        series: Ao3Series,
        application_id: impl Into<Snowflake>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            nonce,
            owner_id: owner_id.into(),
            series,
            page_index: 0,
            application_id: application_id.into(),
            token: token.into(),
            followup_message_id: None,
            last_interaction: Instant::now(),
        }
    }

    pub fn set_message_id(&mut self, message_id: impl Into<Snowflake>) {
        self.followup_message_id = Some(message_id.into());
    }

    /// Page 0 is the series overview; page `i` is work `i`.
    pub fn total_pages(&self) -> usize {
        self.series.works.len() + 1
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn format_page(&self) -> Embed {
        match self.page_index.checked_sub(1).and_then(|i| self.series.works.get(i)) {
            Some(work) => ao3_work_embed(work),
            None => ao3_series_embed(&self.series),
        }
    }

    fn select_options(&self) -> Vec<SelectOption> {
        let description = |text: &str| Some(shorten(text, 100, "...")).filter(|s| !s.is_empty());
        let label = |text: String| text.chars().take(100).collect::<String>();

        let series = SelectOption {
            label: label(self.series.name.clone()),
            value: "0".to_string(),
            description: description(&self.series.description),
            emoji: Some(ComponentEmoji::unicode("\u{1F4DA}")),
            default: false,
        };
        let works = self.series.works.iter().enumerate().map(|(i, work)| SelectOption {
            label: label(format!("{}. {}", i + 1, work.title)),
            value: (i + 1).to_string(),
            description: description(&work.summary),
            emoji: Some(ComponentEmoji::unicode("\u{1F4D6}")),
            default: false,
        });

        std::iter::once(series).chain(works).take(MAX_SELECT_OPTIONS).collect()
    }

    pub fn components(&self) -> Vec<Component> {
        let mut previous = button(BUTTON_PRIMARY, "<", custom_id(self.nonce, ViewAction::Previous));
        previous.disabled = Some(self.page_index == 0);
        let mut next = button(BUTTON_PRIMARY, ">", custom_id(self.nonce, ViewAction::Next));
        next.disabled = Some(self.page_index + 1 >= self.total_pages());

        vec![
            action_row(vec![string_select(
                custom_id(self.nonce, ViewAction::Select),
                "Choose the work here...",
                self.select_options(),
            )]),
            action_row(vec![previous, next]),
        ]
    }

    pub fn disabled_components(&self) -> Vec<Component> {
        let mut rows = self.components();
        rows.iter_mut().for_each(Component::disable_all);
        rows
    }

    /// Move to a new page. Out-of-range requests are clamped.
    pub fn apply(&mut self, action: ViewAction, values: &[String]) {
        let last = self.total_pages() - 1;
        self.page_index = match action {
            ViewAction::Select => values
                .first()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(self.page_index),
            ViewAction::Previous => self.page_index.saturating_sub(1),
            ViewAction::Next => self.page_index + 1,
        }
        .min(last);
    }

    fn expires_at(&self, timeout: Duration) -> Instant {
        self.last_interaction + timeout
    }

    /// Disable every component on the message once the view has expired.
    async fn close(&self, http: &DiscordHttpClient) {
        let edit = CreateMessage::new().components(self.disabled_components());
        let result = match &self.followup_message_id {
            Some(message_id) => {
                http.edit_followup_message(&self.application_id, &self.token, message_id, &edit)
                    .await
            }
            None => {
                http.edit_original_interaction_response(&self.application_id, &self.token, &edit)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(error = %e, series_id = self.series.id, "failed to disable expired series view");
        }
    }
}

fn ephemeral_message(content: &str) -> InteractionResponse {
    InteractionResponse {
        kind: InteractionCallbackType::ChannelMessageWithSource,
        data: Some(InteractionCallbackData {
            content: Some(content.to_string()),
            flags: Some(EPHEMERAL),
            ..Default::default()
        }),
    }
}

/// Every live [`SeriesView`], keyed by nonce. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ViewRegistry {
    views: Arc<Mutex<HashMap<u64, SeriesView>>>,
    next_nonce: Arc<AtomicU64>,
    timeout: Duration,
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new(VIEW_TIMEOUT)
    }
}

impl ViewRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            views: Arc::new(Mutex::new(HashMap::new())),
            next_nonce: Arc::new(AtomicU64::new(rand::random::<u32>() as u64)),
            timeout,
        }
    }

    pub fn next_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.views.lock().await.len()
    }

    /// Start tracking `view` and close it after the inactivity timeout.
    pub async fn insert(&self, view: SeriesView, http: DiscordHttpClient) {
        let nonce = view.nonce;
        self.views.lock().await.insert(nonce, view);

        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                let deadline = match registry.views.lock().await.get(&nonce) {
                    Some(view) => view.expires_at(registry.timeout),
                    None => return,
                };
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;

                if let Some(view) = registry.take_expired(nonce, Instant::now()).await {
                    debug!(nonce, "series view timed out");
                    view.close(&http).await;
                    return;
                }
            }
        });
    }

    async fn take_expired(&self, nonce: u64, now: Instant) -> Option<SeriesView> {
        let mut views = self.views.lock().await;
        let expired = views.get(&nonce)?.expires_at(self.timeout) <= now;
        if expired {
            views.remove(&nonce)
        } else {
            None
        }
    }

    /// Build the response to a component interaction on one of our views.
    ///
    /// Returns `None` when the `custom_id` does not belong to a series view.
    pub async fn respond(&self, interaction: &Interaction) -> Option<InteractionResponse> {
        let data = interaction.data.as_ref()?;
        let (nonce, action) = parse_custom_id(data.custom_id.as_deref()?)?;

        let mut views = self.views.lock().await;
        let Some(view) = views.get_mut(&nonce) else {
            return Some(ephemeral_message(EXPIRED));
        };

        let user_id = interaction.author().map(|u| u.id.as_str()).unwrap_or_default();
        if !view.is_owner(user_id) {
            return Some(ephemeral_message(NOT_OWNER));
        }

        view.apply(action, &data.values);
        view.last_interaction = Instant::now();
        view.token = interaction.token.clone();
        view.followup_message_id = None;

        Some(InteractionResponse {
            kind: InteractionCallbackType::UpdateMessage,
            data: Some(InteractionCallbackData {
                embeds: Some(vec![view.format_page()]),
                components: Some(view.components()),
                ..Default::default()
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stories::Ao3Work;

    fn work(id: u64) -> Ao3Work {
        Ao3Work {
            id,
            title: format!("Part {id}"),
            authors: vec!["alpha".to_string()],
            summary: String::new(),
            rating: "Not Rated".to_string(),
            fandoms: Vec::new(),
            categories: Vec::new(),
            characters: Vec::new(),
            words: 10,
            chapters: 1,
            expected_chapters: Some(1),
            comments: 0,
            kudos: 0,
            bookmarks: 0,
            hits: 0,
            published: None,
            updated: None,
            is_complete: true,
        }
    }

    fn series(works: usize) -> Ao3Series {
        Ao3Series {
            id: 1,
            name: "Saga".to_string(),
            creators: vec!["alpha".to_string()],
            description: "All of it.".to_string(),
            begun: None,
            updated: None,
            words: 100,
            works_count: works as u32,
            is_complete: true,
            works: (1..=works as u64).map(work).collect(),
        }
    }

    fn interaction(user_id: &str, custom_id: String, values: Vec<String>) -> Interaction {
        serde_json::from_value(serde_json::json!({
            "id": "900",
            "application_id": "55",
            "type": 3,
            "token": "fresh-token",
            "user": { "id": user_id, "username": "someone" },
            "data": { "custom_id": custom_id, "component_type": 2, "values": values }
        }))
        .unwrap()
    }

    fn button_states(view: &SeriesView) -> (Option<bool>, Option<bool>) {
        let buttons = &view.components()[1].components;
        (buttons[0].disabled, buttons[1].disabled)
    }

    #[test]
    fn custom_ids_round_trip() {
        assert_eq!(parse_custom_id(&custom_id(7, ViewAction::Next)), Some((7, ViewAction::Next)));
        assert_eq!(parse_custom_id("wfseries:7:select"), Some((7, ViewAction::Select)));
        assert_eq!(parse_custom_id("wfseries:x:next"), None);
        assert_eq!(parse_custom_id("other:7:next"), None);
        assert_eq!(parse_custom_id("wfseries:7:next:extra"), None);
    }

    #[test]
    fn pages_cover_series_and_every_work() {
        let mut view = SeriesView::new(1, "10", series(2), "55", "tok");
        assert_eq!(view.total_pages(), 3);
        assert_eq!(button_states(&view), (Some(true), Some(false)));

        view.apply(ViewAction::Next, &[]);
        assert_eq!(view.format_page().title.as_deref(), Some("Part 1"));
        view.apply(ViewAction::Next, &[]);
        assert_eq!(view.page_index(), 2);
        assert_eq!(button_states(&view), (Some(false), Some(true)));

        view.apply(ViewAction::Next, &[]);
        assert_eq!(view.page_index(), 2);

        view.apply(ViewAction::Select, &["0".to_string()]);
        assert_eq!(view.format_page().title.as_deref(), Some("Saga"));
        view.apply(ViewAction::Previous, &[]);
        assert_eq!(view.page_index(), 0);
    }

    #[test]
    fn select_lists_series_then_numbered_works() {
        let view = SeriesView::new(1, "10", series(30), "55", "tok");
        let select = &view.components()[0].components[0];
        assert_eq!(select.options.len(), MAX_SELECT_OPTIONS);
        assert_eq!(select.options[0].label, "Saga");
        assert_eq!(select.options[0].description.as_deref(), Some("All of it."));
        assert_eq!(select.options[2].label, "2. Part 2");
        assert_eq!(select.options[2].value, "2");
        assert_eq!(select.options[2].description, None);
    }

    #[test]
    fn disabling_covers_every_component() {
        let view = SeriesView::new(1, "10", series(1), "55", "tok");
        for row in view.disabled_components() {
            assert!(row.components.iter().all(|c| c.disabled == Some(true)));
        }
    }

    #[tokio::test]
    async fn only_the_owner_may_turn_pages() {
        let registry = ViewRegistry::default();
        let nonce = registry.next_nonce();
        let view = SeriesView::new(nonce, "10", series(2), "55", "tok");
        registry.views.lock().await.insert(nonce, view);

        let stranger = interaction("11", custom_id(nonce, ViewAction::Next), Vec::new());
        let response = registry.respond(&stranger).await.unwrap();
        assert_eq!(response.kind, InteractionCallbackType::ChannelMessageWithSource);
        let data = response.data.unwrap();
        assert_eq!(data.content.as_deref(), Some(NOT_OWNER));
        assert_eq!(data.flags, Some(EPHEMERAL));

        let owner = interaction("10", custom_id(nonce, ViewAction::Select), vec!["2".to_string()]);
        let response = registry.respond(&owner).await.unwrap();
        assert_eq!(response.kind, InteractionCallbackType::UpdateMessage);
        let embeds = response.data.unwrap().embeds.unwrap();
        assert_eq!(embeds[0].title.as_deref(), Some("Part 2"));

        let views = registry.views.lock().await;
        assert_eq!(views[&nonce].token, "fresh-token");
    }

    #[tokio::test]
    async fn unknown_views_and_foreign_ids() {
        let registry = ViewRegistry::default();
        let stale = interaction("10", custom_id(123, ViewAction::Next), Vec::new());
        let response = registry.respond(&stale).await.unwrap();
        assert_eq!(response.data.unwrap().content.as_deref(), Some(EXPIRED));

        let foreign = interaction("10", "something-else".to_string(), Vec::new());
        assert!(registry.respond(&foreign).await.is_none());
    }

    #[tokio::test]
    async fn expiry_only_after_timeout() {
        let registry = ViewRegistry::new(Duration::from_secs(5));
        let view = SeriesView::new(1, "10", series(1), "55", "tok");
        let created = view.last_interaction;
        registry.views.lock().await.insert(1, view);

        assert!(registry.take_expired(1, created).await.is_none());
        assert!(registry.take_expired(1, created + Duration::from_secs(5)).await.is_some());
        assert_eq!(registry.len().await, 0);
    }
}
