//! Typed bot configuration file and environment credentials.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CycleConfig, FilterRuleSet, PacingBounds, ReplyTemplate, MAX_PAUSE_SECS};

pub const DEFAULT_MAX_SCROLL_ROUNDS: usize = 10;

pub const IDENTITY_ENV: &str = "REPLYSCOUT_IDENTITY";
pub const SECRET_ENV: &str = "REPLYSCOUT_SECRET";
pub const RECOVERY_CONTACT_ENV: &str = "REPLYSCOUT_RECOVERY_CONTACT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} not found")]
    NotFound { path: String },
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config {path} is not valid YAML: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The on-disk configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub settings: Settings,
    pub search_terms: Vec<String>,
    pub intent_keywords: Vec<String>,
    pub service_keywords: Vec<String>,
    #[serde(default)]
    pub promo_keywords_to_avoid: Vec<String>,
    #[serde(default)]
    pub username_keywords_to_avoid: Vec<String>,
    pub reply_template: ReplyTemplateConfig,
    pub sleep_timers: SleepTimers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub run_headless: bool,
    pub max_tweet_age_days: i64,
    #[serde(default = "default_max_scroll_rounds")]
    pub max_scroll_rounds: usize,
}

fn default_max_scroll_rounds() -> usize {
    DEFAULT_MAX_SCROLL_ROUNDS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTemplateConfig {
    pub base: String,
    pub details: Vec<String>,
    pub cta_options: Vec<String>,
}

/// Pacing bounds in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepTimers {
    pub between_queries_min: f64,
    pub between_queries_max: f64,
    pub after_reply_min: f64,
    pub after_reply_max: f64,
    pub after_full_cycle_min: f64,
    pub after_full_cycle_max: f64,
    #[serde(default = "default_scroll_settle_min")]
    pub scroll_settle_min: f64,
    #[serde(default = "default_scroll_settle_max")]
    pub scroll_settle_max: f64,
}

fn default_scroll_settle_min() -> f64 {
    2.0
}

fn default_scroll_settle_max() -> f64 {
    3.5
}

impl BotConfig {
    /// Reads and validates a config file. `.yaml`/`.yml` files are parsed as YAML,
    /// everything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: display.clone(),
                }
            } else {
                ConfigError::Io {
                    path: display.clone(),
                    source,
                }
            }
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: BotConfig = if is_yaml {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                path: display.clone(),
                source,
            })?
        } else {
            serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: display.clone(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.search_terms.iter().all(|t| t.trim().is_empty()) {
            problems.push("search_terms must contain at least one term".to_string());
        }
        if self.intent_keywords.iter().all(|k| k.trim().is_empty()) {
            problems.push("intent_keywords must not be empty".to_string());
        }
        if self.service_keywords.iter().all(|k| k.trim().is_empty()) {
            problems.push("service_keywords must not be empty".to_string());
        }
        if self.reply_template.details.is_empty() {
            problems.push("reply_template.details must not be empty".to_string());
        }
        if self.reply_template.cta_options.is_empty() {
            problems.push("reply_template.cta_options must not be empty".to_string());
        }
        if self.settings.max_tweet_age_days < 0 {
            problems.push("settings.max_tweet_age_days must be >= 0".to_string());
        }
        if self.settings.max_scroll_rounds == 0 {
            problems.push("settings.max_scroll_rounds must be >= 1".to_string());
        }

        let t = &self.sleep_timers;
        for (name, bounds) in [
            ("between_queries", PacingBounds::new(t.between_queries_min, t.between_queries_max)),
            ("after_reply", PacingBounds::new(t.after_reply_min, t.after_reply_max)),
            ("after_full_cycle", PacingBounds::new(t.after_full_cycle_min, t.after_full_cycle_max)),
            ("scroll_settle", PacingBounds::new(t.scroll_settle_min, t.scroll_settle_max)),
        ] {
            if !bounds.is_valid() {
                problems.push(format!(
                    "sleep_timers.{name}: need 0 <= min <= max <= {MAX_PAUSE_SECS}, got {}..{}",
                    bounds.min_secs, bounds.max_secs
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }

    pub fn rule_set(&self) -> FilterRuleSet {
        FilterRuleSet::new(
            &self.intent_keywords,
            &self.service_keywords,
            &self.promo_keywords_to_avoid,
            &self.username_keywords_to_avoid,
        )
    }

    pub fn reply_template(&self) -> ReplyTemplate {
        ReplyTemplate {
            base: self.reply_template.base.clone(),
            details: self.reply_template.details.clone(),
            cta_options: self.reply_template.cta_options.clone(),
        }
    }

    pub fn cycle_config(&self) -> CycleConfig {
        let t = &self.sleep_timers;
        CycleConfig {
            between_queries: PacingBounds::new(t.between_queries_min, t.between_queries_max),
            after_reply: PacingBounds::new(t.after_reply_min, t.after_reply_max),
            after_full_cycle: PacingBounds::new(t.after_full_cycle_min, t.after_full_cycle_max),
            scroll_settle: PacingBounds::new(t.scroll_settle_min, t.scroll_settle_max),
            max_tweet_age_days: self.settings.max_tweet_age_days,
            max_scroll_rounds: self.settings.max_scroll_rounds,
            max_cycles: None,
        }
    }

    /// Search terms as exact-phrase queries.
    pub fn queries(&self) -> Vec<String> {
        self.search_terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("environment variables REPLYSCOUT_IDENTITY and REPLYSCOUT_SECRET must be set")]
    Missing,
}

/// Account credentials. Only ever read from the process environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
    pub recovery_contact: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("recovery_contact", &self.recovery_contact)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, CredentialsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CredentialsError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        match (non_empty(IDENTITY_ENV), non_empty(SECRET_ENV)) {
            (Some(identity), Some(secret)) => Ok(Self {
                identity,
                secret,
                recovery_contact: non_empty(RECOVERY_CONTACT_ENV),
            }),
            _ => Err(CredentialsError::Missing),
        }
    }
}
