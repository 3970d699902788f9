//! Core domain model for replyscout: candidates, rule sets, templates and pacing.

pub mod config;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{BotConfig, ConfigError, Credentials, CredentialsError, ReplyTemplateConfig, Settings, SleepTimers};

pub const CRATE_NAME: &str = "replyscout-core";

/// A discovered post that passed extraction. Identity is `id`, derived from `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub url: String,
    pub text: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Untrusted fields as read from one visible post on a results view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub url: Option<String>,
    pub text: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("item has no status link")]
    MissingUrl,
    #[error("no status id in url {0}")]
    MissingId(String),
    #[error("item {url} is missing field `{field}`")]
    MissingField { url: String, field: &'static str },
    #[error("item {url} has unparseable timestamp {value:?}")]
    BadTimestamp { url: String, value: String },
}

impl RawItem {
    /// The id this item would carry, if its url yields one. Used for visibility dedup
    /// before the remaining fields are validated.
    pub fn status_id(&self) -> Option<String> {
        self.url.as_deref().and_then(status_id_from_url)
    }

    pub fn to_candidate(&self) -> Result<Candidate, ExtractError> {
        let url = self
            .url
            .as_deref()
            .map(normalize_status_url)
            .ok_or(ExtractError::MissingUrl)?;
        let id = status_id_from_url(&url).ok_or_else(|| ExtractError::MissingId(url.clone()))?;

        let text = self.text.clone().ok_or_else(|| ExtractError::MissingField {
            url: url.clone(),
            field: "text",
        })?;
        let author = self.author.clone().ok_or_else(|| ExtractError::MissingField {
            url: url.clone(),
            field: "author",
        })?;
        let raw_ts = self.timestamp.as_deref().ok_or_else(|| ExtractError::MissingField {
            url: url.clone(),
            field: "timestamp",
        })?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| ExtractError::BadTimestamp {
                url: url.clone(),
                value: raw_ts.to_string(),
            })?;

        Ok(Candidate {
            id,
            url,
            text,
            author,
            timestamp,
        })
    }
}

/// Extracts the post id from a `.../status/<id>` url.
pub fn status_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/status/")?;
    let id: String = rest
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '#'))
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Drops the `/analytics` suffix some status links carry.
pub fn normalize_status_url(url: &str) -> String {
    let trimmed = url.trim();
    match trimmed.split_once("/analytics") {
        Some((head, _)) => head.to_string(),
        None => trimmed.to_string(),
    }
}

/// Links to a post's media viewer are not the post itself.
pub fn is_media_link(href: &str) -> bool {
    href.contains("/photo/") || href.contains("/video/")
}

/// Lowercased keyword collections driving the two-layer filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleSet {
    pub intent: Vec<String>,
    pub service: Vec<String>,
    pub promo_exclude: Vec<String>,
    pub username_exclude: Vec<String>,
}

impl FilterRuleSet {
    pub fn new(
        intent: &[String],
        service: &[String],
        promo_exclude: &[String],
        username_exclude: &[String],
    ) -> Self {
        Self {
            intent: normalize_keywords(intent),
            service: normalize_keywords(service),
            promo_exclude: normalize_keywords(promo_exclude),
            username_exclude: normalize_keywords(username_exclude),
        }
    }
}

pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let k = keyword.trim().to_lowercase();
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    out
}

/// Reply fragments in spin syntax. Validated to have at least one detail and cta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTemplate {
    pub base: String,
    pub details: Vec<String>,
    pub cta_options: Vec<String>,
}

/// Longest pause a config may ask for: one day.
pub const MAX_PAUSE_SECS: f64 = 86_400.0;

/// Uniform sampling bounds for a pacing sleep, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacingBounds {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl PacingBounds {
    pub const ZERO: Self = Self {
        min_secs: 0.0,
        max_secs: 0.0,
    };

    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn is_valid(&self) -> bool {
        self.min_secs.is_finite()
            && self.max_secs.is_finite()
            && self.min_secs >= 0.0
            && self.min_secs <= self.max_secs
            && self.max_secs <= MAX_PAUSE_SECS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    pub between_queries: PacingBounds,
    pub after_reply: PacingBounds,
    pub after_full_cycle: PacingBounds,
    pub scroll_settle: PacingBounds,
    pub max_tweet_age_days: i64,
    pub max_scroll_rounds: usize,
    /// `None` runs until interrupted.
    pub max_cycles: Option<usize>,
}

impl CycleConfig {
    /// Zero pacing, useful when driving the cycle against in-memory surfaces.
    pub fn unpaced(max_tweet_age_days: i64) -> Self {
        Self {
            between_queries: PacingBounds::ZERO,
            after_reply: PacingBounds::ZERO,
            after_full_cycle: PacingBounds::ZERO,
            scroll_settle: PacingBounds::ZERO,
            max_tweet_age_days,
            max_scroll_rounds: config::DEFAULT_MAX_SCROLL_ROUNDS,
            max_cycles: None,
        }
    }
}
