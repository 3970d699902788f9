//! Query → deduplicated, filtered candidates via incremental scrolling.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use replyscout_adapters::{AdapterError, ContentSurface};
use replyscout_core::{Candidate, FilterRuleSet, PacingBounds};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::filter::{classify_at, Classification};
use crate::pacing::Pacer;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no results view loaded for {query}")]
    SearchUnavailable { query: String },
    #[error("search for {query} failed: {source}")]
    Search {
        query: String,
        #[source]
        source: AdapterError,
    },
    #[error("reading first batch for {query} failed: {source}")]
    Batch {
        query: String,
        #[source]
        source: AdapterError,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    pub max_age_days: i64,
    pub max_scroll_rounds: usize,
    pub scroll_settle: PacingBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The first batch had no items at all.
    Empty,
    /// A round produced no previously unseen items.
    Saturated,
    RoundLimit,
    Interrupted,
    /// A later batch or scroll failed; candidates gathered so far are kept.
    SurfaceError,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub query: String,
    /// Accepted candidates, unique by id, in first-seen order.
    pub candidates: Vec<Candidate>,
    pub rounds: usize,
    pub seen: usize,
    pub extract_failures: usize,
    pub rejected_by_reason: BTreeMap<&'static str, usize>,
    pub stop_reason: StopReason,
}

impl DiscoveryReport {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            candidates: Vec::new(),
            rounds: 0,
            seen: 0,
            extract_failures: 0,
            rejected_by_reason: BTreeMap::new(),
            stop_reason: StopReason::RoundLimit,
        }
    }
}

pub async fn discover(
    surface: &mut dyn ContentSurface,
    pacer: &mut Pacer,
    query: &str,
    rules: &FilterRuleSet,
    options: DiscoveryOptions,
) -> Result<DiscoveryReport, DiscoveryError> {
    discover_at(surface, pacer, query, rules, options, Utc::now()).await
}

/// `discover` with a fixed reference time for the age filter.
pub async fn discover_at(
    surface: &mut dyn ContentSurface,
    pacer: &mut Pacer,
    query: &str,
    rules: &FilterRuleSet,
    options: DiscoveryOptions,
    now: DateTime<Utc>,
) -> Result<DiscoveryReport, DiscoveryError> {
    info!(query, "searching");
    let loaded = surface
        .search(query)
        .await
        .map_err(|source| DiscoveryError::Search {
            query: query.to_string(),
            source,
        })?;
    if !loaded {
        return Err(DiscoveryError::SearchUnavailable {
            query: query.to_string(),
        });
    }

    let mut report = DiscoveryReport::new(query);
    let mut seen_ids: HashSet<String> = HashSet::new();

    for round in 0..options.max_scroll_rounds.max(1) {
        if !pacer.settle(options.scroll_settle).await {
            report.stop_reason = StopReason::Interrupted;
            break;
        }

        let batch = match surface.current_batch().await {
            Ok(batch) => batch,
            Err(source) if round == 0 => {
                return Err(DiscoveryError::Batch {
                    query: query.to_string(),
                    source,
                });
            }
            Err(err) => {
                warn!(query, round, error = %err, "batch read failed, keeping what was found");
                report.stop_reason = StopReason::SurfaceError;
                break;
            }
        };
        report.rounds += 1;

        if batch.is_empty() {
            report.stop_reason = if round == 0 {
                StopReason::Empty
            } else {
                StopReason::Saturated
            };
            break;
        }

        let mut unseen = 0usize;
        for item in batch {
            let Some(id) = item.status_id() else {
                report.extract_failures += 1;
                debug!(query, "skipping item without a status link");
                continue;
            };
            if !seen_ids.insert(id) {
                continue;
            }
            unseen += 1;

            let candidate = match item.to_candidate() {
                Ok(candidate) => candidate,
                Err(err) => {
                    report.extract_failures += 1;
                    debug!(query, error = %err, "skipping unextractable item");
                    continue;
                }
            };

            match classify_at(&candidate, rules, options.max_age_days, now) {
                Classification::Accepted => {
                    info!(query, url = %candidate.url, "candidate passed filter");
                    report.candidates.push(candidate);
                }
                Classification::Rejected(reason) => {
                    debug!(query, url = %candidate.url, reason = ?reason, "candidate rejected");
                    *report.rejected_by_reason.entry(reason.label()).or_default() += 1;
                }
            }
        }
        report.seen += unseen;

        if unseen == 0 {
            report.stop_reason = StopReason::Saturated;
            debug!(query, round, "no new items on this round");
            break;
        }

        if round + 1 < options.max_scroll_rounds {
            if let Err(err) = surface.scroll_next().await {
                warn!(query, round, error = %err, "scroll failed, keeping what was found");
                report.stop_reason = StopReason::SurfaceError;
                break;
            }
        }
    }

    info!(
        query,
        rounds = report.rounds,
        seen = report.seen,
        accepted = report.candidates.len(),
        stop = ?report.stop_reason,
        "discovery finished"
    );
    Ok(report)
}
