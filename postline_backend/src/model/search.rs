use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// The search term every store would match; never run on its own.
pub const MATCH_ALL_TERMS: &str = "*";

/// One independently resolved query group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub terms: String,
    #[serde(default)]
    pub excluded_terms: String,
    #[serde(default)]
    pub is_hashtag: bool,
    #[serde(default)]
    pub in_channels: Vec<String>,
    #[serde(default)]
    pub excluded_channels: Vec<String>,
    #[serde(default)]
    pub from_users: Vec<String>,
    #[serde(default)]
    pub excluded_users: Vec<String>,
    #[serde(default)]
    pub after_date: Option<String>,
    #[serde(default)]
    pub before_date: Option<String>,
    #[serde(default)]
    pub on_date: Option<String>,
    #[serde(default)]
    pub or_terms: bool,
    #[serde(default)]
    pub include_deleted_channels: bool,
    #[serde(default)]
    pub search_without_user_id: bool,
    /// Seconds east of UTC used to interpret the date filters.
    #[serde(default)]
    pub time_zone_offset: i64,
}

impl SearchParams {
    pub fn is_match_all(&self) -> bool {
        self.terms.trim() == MATCH_ALL_TERMS
    }

    /// Start of the day following `after_date`.
    pub fn after_millis(&self) -> Option<i64> {
        self.after_date
            .as_deref()
            .and_then(|d| day_start_millis(d, self.time_zone_offset))
            .map(|start| start + Duration::days(1).num_milliseconds())
    }

    /// Start of `before_date`.
    pub fn before_millis(&self) -> Option<i64> {
        self.before_date
            .as_deref()
            .and_then(|d| day_start_millis(d, self.time_zone_offset))
    }

    /// Inclusive start and exclusive end of `on_date`.
    pub fn on_millis(&self) -> Option<(i64, i64)> {
        self.on_date
            .as_deref()
            .and_then(|d| day_start_millis(d, self.time_zone_offset))
            .map(|start| (start, start + Duration::days(1).num_milliseconds()))
    }

    pub fn term_words(&self) -> Vec<String> {
        split_words(&self.terms)
    }

    pub fn excluded_words(&self) -> Vec<String> {
        split_words(&self.excluded_terms)
    }

    fn has_filters(&self) -> bool {
        !self.in_channels.is_empty()
            || !self.excluded_channels.is_empty()
            || !self.from_users.is_empty()
            || !self.excluded_users.is_empty()
            || self.after_date.is_some()
            || self.before_date.is_some()
            || self.on_date.is_some()
    }
}

fn day_start_millis(date: &str, time_zone_offset: i64) -> Option<i64> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let start = day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    Some(start - time_zone_offset * 1000)
}

/// Whitespace split that keeps double-quoted phrases together (quotes kept).
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in text.chars() {
        match ch {
            '"' => {
                current.push(ch);
                if in_quotes {
                    words.push(std::mem::take(&mut current));
                }
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Turns a raw query such as `from:alice in:town-square deploy #release`
/// into its plain-term and hashtag groups.
pub fn parse_search_params(text: &str, time_zone_offset: i64) -> Vec<SearchParams> {
    let mut base = SearchParams {
        time_zone_offset,
        ..Default::default()
    };
    let mut plain = Vec::new();
    let mut excluded_plain = Vec::new();
    let mut hashtags = Vec::new();
    let mut excluded_hashtags = Vec::new();

    for word in split_words(text) {
        let (negated, body) = match word.strip_prefix('-') {
            Some(rest) if !rest.is_empty() => (true, rest.to_string()),
            _ => (false, word.clone()),
        };

        if let Some((flag, value)) = body.split_once(':') {
            let value = value.trim_matches('"').to_string();
            if !value.is_empty() {
                let handled = match (flag.to_ascii_lowercase().as_str(), negated) {
                    ("in" | "channel", false) => {
                        base.in_channels.push(value);
                        true
                    }
                    ("in" | "channel", true) => {
                        base.excluded_channels.push(value);
                        true
                    }
                    ("from", false) => {
                        base.from_users.push(value.trim_start_matches('@').to_string());
                        true
                    }
                    ("from", true) => {
                        base.excluded_users.push(value.trim_start_matches('@').to_string());
                        true
                    }
                    ("after", false) => {
                        base.after_date = Some(value);
                        true
                    }
                    ("before", false) => {
                        base.before_date = Some(value);
                        true
                    }
                    ("on", false) => {
                        base.on_date = Some(value);
                        true
                    }
                    _ => false,
                };
                if handled {
                    continue;
                }
            }
        }

        match (body.starts_with('#') && body.len() > 1, negated) {
            (true, false) => hashtags.push(body),
            (true, true) => excluded_hashtags.push(body),
            (false, false) => plain.push(body),
            (false, true) => excluded_plain.push(body),
        }
    }

    let mut groups = Vec::new();
    if !plain.is_empty() || !excluded_plain.is_empty() {
        groups.push(SearchParams {
            terms: plain.join(" "),
            excluded_terms: excluded_plain.join(" "),
            is_hashtag: false,
            ..base.clone()
        });
    }
    if !hashtags.is_empty() || !excluded_hashtags.is_empty() {
        groups.push(SearchParams {
            terms: hashtags.join(" "),
            excluded_terms: excluded_hashtags.join(" "),
            is_hashtag: true,
            ..base.clone()
        });
    }
    if groups.is_empty() && base.has_filters() {
        groups.push(base);
    }
    groups
}
