//! Targeting + deduplication pipeline: discovery, filtering, reply composition
//! and the paced cycle that drives them.

pub mod compose;
pub mod discovery;
pub mod filter;
pub mod pacing;
pub mod scheduler;
pub mod spin;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use replyscout_adapters::{
    fixture::DEFAULT_BASE_URL, Diagnostics, FailureContext, FixtureSessionProvider,
    FixtureSettings, SessionProvider,
};
use replyscout_core::{BotConfig, Credentials};
use replyscout_storage::DedupStore;
use tokio::fs;
use tracing::{error, info, warn};

pub use compose::compose;
pub use discovery::{discover, DiscoveryError, DiscoveryOptions, DiscoveryReport, StopReason};
pub use filter::{classify, Classification, RejectReason};
pub use pacing::{shutdown_channel, Pacer, Shutdown, ShutdownTrigger};
pub use scheduler::{CandidateOutcome, CycleScheduler, CycleState, CycleSummary, RunSummary};
pub use spin::spin;

pub const CRATE_NAME: &str = "replyscout-cycle";

/// Deployment paths, read from the environment with local defaults.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub config_path: PathBuf,
    pub state_file: PathBuf,
    pub fixtures_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub outbox: PathBuf,
    pub reports_dir: PathBuf,
    /// Plain-text copy of the console log, appended across runs.
    pub log_file: PathBuf,
    pub base_url: String,
    pub max_cycles: Option<usize>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));
        Self {
            config_path: path("REPLYSCOUT_CONFIG", "config.json"),
            state_file: path("REPLYSCOUT_STATE_FILE", "replied_tweets.txt"),
            fixtures_dir: path("REPLYSCOUT_FIXTURES_DIR", "fixtures"),
            artifacts_dir: path("REPLYSCOUT_ARTIFACTS_DIR", "artifacts"),
            outbox: path("REPLYSCOUT_OUTBOX", "outbox.jsonl"),
            reports_dir: path("REPLYSCOUT_REPORTS_DIR", "reports"),
            log_file: path("REPLYSCOUT_LOG_FILE", "replyscout.log"),
            base_url: lookup("REPLYSCOUT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_cycles: lookup("REPLYSCOUT_MAX_CYCLES").and_then(|v| v.parse().ok()),
        }
    }

    pub fn fixture_settings(&self, config: &BotConfig) -> FixtureSettings {
        FixtureSettings {
            fixtures_dir: self.fixtures_dir.clone(),
            outbox: self.outbox.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            base_url: self.base_url.clone(),
            run_headless: config.settings.run_headless,
        }
    }
}

/// Full run against the fixture-backed session provider.
pub async fn run_from_env(runtime: &RuntimeConfig, shutdown: Shutdown) -> Result<RunSummary> {
    let config = BotConfig::load(&runtime.config_path)
        .with_context(|| format!("loading config {}", runtime.config_path.display()))?;
    let credentials = Credentials::from_env().context("loading credentials")?;
    let provider = FixtureSessionProvider::new(runtime.fixture_settings(&config));
    let diagnostics = provider.diagnostics();
    run_with_provider(runtime, &config, &credentials, &provider, diagnostics, shutdown).await
}

/// Opens the store and session, drives the scheduler, then tears both down.
/// Errors returned from here are fatal.
pub async fn run_with_provider(
    runtime: &RuntimeConfig,
    config: &BotConfig,
    credentials: &Credentials,
    provider: &dyn SessionProvider,
    diagnostics: Arc<dyn Diagnostics>,
    shutdown: Shutdown,
) -> Result<RunSummary> {
    let mut store = DedupStore::open(&runtime.state_file)
        .await
        .with_context(|| format!("opening dedup store {}", runtime.state_file.display()))?;

    let mut session = match provider.open_authenticated_session(credentials).await {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "could not open an authenticated session");
            diagnostics
                .capture_failure_artifact(
                    "login_error",
                    &FailureContext {
                        query: None,
                        url: None,
                        detail: err.to_string(),
                    },
                )
                .await;
            return Err(err).context("opening authenticated session");
        }
    };

    let mut cycle_config = config.cycle_config();
    cycle_config.max_cycles = runtime.max_cycles;

    let summary = {
        let mut scheduler = CycleScheduler::new(
            cycle_config,
            config.rule_set(),
            config.reply_template(),
            config.queries(),
            &mut store,
            shutdown,
        );
        scheduler.run(&mut session).await
    };

    info!("closing session");
    if let Err(err) = session.close().await {
        warn!(error = %err, "session teardown failed");
    }
    let store_path = store.path().display().to_string();
    store
        .close()
        .await
        .with_context(|| format!("closing dedup store {store_path}"))?;

    let report_path = write_run_report(&runtime.reports_dir, &summary).await?;
    info!(
        run_id = %summary.run_id,
        cycles = summary.cycles.len(),
        posted = summary.total_posted(),
        report = %report_path.display(),
        "run finished"
    );
    Ok(summary)
}

/// Writes `<reports>/<run_id>/run_summary.json` and a short markdown brief.
pub async fn write_run_report(reports_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    let json_path = run_dir.join("run_summary.json");
    fs::write(&json_path, json)
        .await
        .with_context(|| format!("writing {}", json_path.display()))?;

    let rows = summary
        .cycles
        .iter()
        .map(|c| {
            format!(
                "| {} | {} | {} | {} | {} | {} | {} |",
                c.cycle,
                c.queries_run,
                c.queries_failed,
                c.candidates_discovered,
                c.skipped_recorded + c.skipped_engaged,
                c.posted,
                c.post_failures
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let brief = format!(
        "# replyscout run brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Interrupted: {}\n\n\
         | cycle | queries | failed | discovered | skipped | posted | post failures |\n\
         |---|---|---|---|---|---|---|\n{}\n",
        summary.run_id, summary.started_at, summary.finished_at, summary.interrupted, rows
    );
    fs::write(run_dir.join("run_brief.md"), brief)
        .await
        .context("writing run_brief.md")?;

    Ok(json_path)
}
