//! The repeating cycle over all queries, with per-query and per-candidate isolation.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use replyscout_adapters::{FailureContext, PostResult, Session};
use replyscout_core::{Candidate, CycleConfig, FilterRuleSet, ReplyTemplate};
use replyscout_storage::{DedupStore, StoreError};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::compose::compose;
use crate::discovery::{discover, DiscoveryOptions};
use crate::pacing::{Pacer, Shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Idle,
    RunningQuery,
    ProcessingCandidate,
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandidateOutcome {
    AlreadyRecorded,
    AlreadyEngaged,
    ProbeFailed,
    Posted,
    PostFailed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub cycle: usize,
    pub queries_run: usize,
    pub queries_failed: usize,
    pub candidates_discovered: usize,
    pub skipped_recorded: usize,
    pub skipped_engaged: usize,
    pub probe_failures: usize,
    pub posted: usize,
    pub post_failures: usize,
}

impl CycleSummary {
    fn tally(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::AlreadyRecorded => self.skipped_recorded += 1,
            CandidateOutcome::AlreadyEngaged => self.skipped_engaged += 1,
            CandidateOutcome::ProbeFailed => self.probe_failures += 1,
            CandidateOutcome::Posted => self.posted += 1,
            CandidateOutcome::PostFailed => self.post_failures += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub interrupted: bool,
    pub cycles: Vec<CycleSummary>,
}

impl RunSummary {
    pub fn total_posted(&self) -> usize {
        self.cycles.iter().map(|c| c.posted).sum()
    }
}

pub struct CycleScheduler<'a> {
    config: CycleConfig,
    rules: FilterRuleSet,
    template: ReplyTemplate,
    queries: Vec<String>,
    store: &'a mut DedupStore,
    pacer: Pacer,
    state: CycleState,
}

impl<'a> CycleScheduler<'a> {
    pub fn new(
        config: CycleConfig,
        rules: FilterRuleSet,
        template: ReplyTemplate,
        queries: Vec<String>,
        store: &'a mut DedupStore,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            rules,
            template,
            queries,
            store,
            pacer: Pacer::new(shutdown),
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    fn enter(&mut self, state: CycleState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "cycle state");
            self.state = state;
        }
    }

    /// Runs cycles until interrupted or `max_cycles` is reached.
    pub async fn run(&mut self, session: &mut Session) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut cycles = Vec::new();

        info!(%run_id, queries = self.queries.len(), known_ids = self.store.len(), "cycle scheduler started");
        loop {
            if self.pacer.interrupted() {
                break;
            }
            let cycle_no = cycles.len() + 1;
            let summary = self
                .run_cycle(session, cycle_no)
                .instrument(info_span!("cycle", %run_id, cycle = cycle_no))
                .await;
            cycles.push(summary);

            if self.pacer.interrupted() {
                break;
            }
            if self.config.max_cycles.is_some_and(|max| cycles.len() >= max) {
                break;
            }

            self.enter(CycleState::Sleeping);
            if !self
                .pacer
                .pause(self.config.after_full_cycle, "after_full_cycle")
                .await
            {
                break;
            }
        }
        self.enter(CycleState::Idle);

        let interrupted = self.pacer.interrupted();
        if interrupted {
            info!(%run_id, "interrupted, stopping cycle scheduler");
        }
        RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            interrupted,
            cycles,
        }
    }

    /// One pass over every query in a freshly shuffled order.
    pub async fn run_cycle(&mut self, session: &mut Session, cycle_no: usize) -> CycleSummary {
        let mut summary = CycleSummary {
            cycle: cycle_no,
            ..Default::default()
        };
        info!(cycle = cycle_no, "starting full cycle");
        self.queries.shuffle(&mut rand::rng());
        let queries = self.queries.clone();

        for query in &queries {
            if self.pacer.interrupted() {
                break;
            }
            self.enter(CycleState::RunningQuery);
            summary.queries_run += 1;

            let result = self
                .run_query(session, query, &mut summary)
                .instrument(info_span!("query", query = %query))
                .await;
            if let Err(err) = result {
                summary.queries_failed += 1;
                error!(query = %query, error = %format!("{err:#}"), "query failed, moving to next query");
                session
                    .diagnostics
                    .capture_failure_artifact(
                        "query_error",
                        &FailureContext {
                            query: Some(query.clone()),
                            url: None,
                            detail: format!("{err:#}"),
                        },
                    )
                    .await;

                // Only a failed query backs off before the next search.
                if !self.pacer.interrupted() {
                    self.enter(CycleState::Sleeping);
                    self.pacer
                        .pause(self.config.between_queries, "between_queries")
                        .await;
                }
            }
        }

        info!(
            cycle = cycle_no,
            queries_run = summary.queries_run,
            queries_failed = summary.queries_failed,
            discovered = summary.candidates_discovered,
            posted = summary.posted,
            post_failures = summary.post_failures,
            "full cycle finished"
        );
        summary
    }

    /// Everything that can go wrong for one query ends here as an `Err`.
    async fn run_query(
        &mut self,
        session: &mut Session,
        query: &str,
        summary: &mut CycleSummary,
    ) -> anyhow::Result<()> {
        let options = DiscoveryOptions {
            max_age_days: self.config.max_tweet_age_days,
            max_scroll_rounds: self.config.max_scroll_rounds,
            scroll_settle: self.config.scroll_settle,
        };
        let report = discover(
            session.content.as_mut(),
            &mut self.pacer,
            query,
            &self.rules,
            options,
        )
        .await?;
        summary.candidates_discovered += report.candidates.len();

        if report.candidates.is_empty() {
            info!(query, "no new valid candidates for this query");
            return Ok(());
        }

        for candidate in &report.candidates {
            if self.pacer.interrupted() {
                break;
            }
            self.enter(CycleState::ProcessingCandidate);
            let outcome = self.process_candidate(session, query, candidate).await?;
            summary.tally(outcome);

            if outcome == CandidateOutcome::Posted {
                self.enter(CycleState::Sleeping);
                self.pacer.pause(self.config.after_reply, "after_reply").await;
            }
        }
        Ok(())
    }

    /// Dedup check, live probe, compose, record, post. Only a dedup write
    /// failure escapes; everything else is an outcome.
    pub async fn process_candidate(
        &mut self,
        session: &mut Session,
        query: &str,
        candidate: &Candidate,
    ) -> Result<CandidateOutcome, StoreError> {
        let id = candidate.id.as_str();
        let url = candidate.url.as_str();

        if self.store.contains(id) {
            debug!(id, url, "already recorded, skipping");
            return Ok(CandidateOutcome::AlreadyRecorded);
        }

        match session
            .engagement
            .already_engaged(url, &session.identity)
            .await
        {
            Ok(true) => {
                warn!(id, url, "previous reply found on thread, recording and skipping");
                self.store.record(id).await?;
                return Ok(CandidateOutcome::AlreadyEngaged);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(id, url, error = %err, "engagement probe failed, abandoning candidate");
                return Ok(CandidateOutcome::ProbeFailed);
            }
        }

        info!(id, url, "processing new target");
        let reply = compose(&self.template);

        self.store.record(id).await?;
        info!(id, "id recorded before posting");

        match session.engagement.post_reply(url, &reply).await {
            PostResult::Posted => {
                info!(id, url, "reply posted");
                Ok(CandidateOutcome::Posted)
            }
            PostResult::Failed(cause) => {
                warn!(id, url, cause = %cause, "reply failed, moving to next target");
                session
                    .diagnostics
                    .capture_failure_artifact(
                        "reply_error",
                        &FailureContext {
                            query: Some(query.to_string()),
                            url: Some(url.to_string()),
                            detail: cause,
                        },
                    )
                    .await;
                Ok(CandidateOutcome::PostFailed)
            }
        }
    }
}
