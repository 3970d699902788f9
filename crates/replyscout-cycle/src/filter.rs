//! Two-layer keyword filter: exclusions first, then intent AND service.

use chrono::{DateTime, Utc};
use replyscout_core::{Candidate, FilterRuleSet};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    TooOld { age_days: i64, max_age_days: i64 },
    ExcludedAuthor(String),
    Promotional(String),
    MissingIntent,
    MissingService,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::TooOld { .. } => "too_old",
            RejectReason::ExcludedAuthor(_) => "excluded_author",
            RejectReason::Promotional(_) => "promotional",
            RejectReason::MissingIntent => "missing_intent",
            RejectReason::MissingService => "missing_service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Classification {
    Accepted,
    Rejected(RejectReason),
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Classification::Accepted)
    }
}

pub fn classify(candidate: &Candidate, rules: &FilterRuleSet, max_age_days: i64) -> Classification {
    classify_at(candidate, rules, max_age_days, Utc::now())
}

/// Calendar days between the post date and `now`, both in UTC.
pub fn age_in_days(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - timestamp.date_naive()).num_days()
}

pub fn classify_at(
    candidate: &Candidate,
    rules: &FilterRuleSet,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> Classification {
    let age_days = age_in_days(candidate.timestamp, now);
    if age_days > max_age_days {
        return Classification::Rejected(RejectReason::TooOld {
            age_days,
            max_age_days,
        });
    }

    let author = candidate.author.to_lowercase();
    if let Some(keyword) = first_match(&author, &rules.username_exclude) {
        return Classification::Rejected(RejectReason::ExcludedAuthor(keyword));
    }

    let text = candidate.text.to_lowercase();
    if let Some(keyword) = first_match(&text, &rules.promo_exclude) {
        return Classification::Rejected(RejectReason::Promotional(keyword));
    }

    if first_match(&text, &rules.intent).is_none() {
        return Classification::Rejected(RejectReason::MissingIntent);
    }
    if first_match(&text, &rules.service).is_none() {
        return Classification::Rejected(RejectReason::MissingService);
    }
    Classification::Accepted
}

fn first_match(haystack: &str, keywords: &[String]) -> Option<String> {
    keywords
        .iter()
        .map(|k| k.to_lowercase())
        .find(|k| !k.is_empty() && haystack.contains(k.as_str()))
}
