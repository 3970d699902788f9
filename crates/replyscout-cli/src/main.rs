use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replyscout_adapters::{ContentSurface, FixtureContentSurface};
use replyscout_core::BotConfig;
use replyscout_cycle::{
    compose, discover, run_from_env, shutdown_channel, DiscoveryOptions, Pacer, RuntimeConfig,
    Shutdown,
};
use replyscout_storage::DedupStore;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "replyscout")]
#[command(about = "Search, filter, dedupe and compose replies on a paced cycle")]
struct Cli {
    /// Config file (JSON, or YAML by extension). Overrides REPLYSCOUT_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Engaged-id log. Overrides REPLYSCOUT_STATE_FILE.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
    /// Captured pages root. Overrides REPLYSCOUT_FIXTURES_DIR.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,
    /// Dry-run reply outbox. Overrides REPLYSCOUT_OUTBOX.
    #[arg(long, global = true)]
    outbox: Option<PathBuf>,
    /// Log file, appended to alongside the console. Overrides REPLYSCOUT_LOG_FILE.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run cycles until interrupted.
    Run,
    /// Run a single full cycle.
    Once,
    /// Show which candidates a query would yield, without engaging.
    Discover { query: String },
    /// Print sample replies from the configured template.
    Compose {
        #[arg(short, long, default_value_t = 5)]
        count: usize,
    },
    /// Validate the config file and print a summary.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut runtime = RuntimeConfig::from_env();
    if let Some(path) = cli.config {
        runtime.config_path = path;
    }
    if let Some(path) = cli.state_file {
        runtime.state_file = path;
    }
    if let Some(path) = cli.fixtures {
        runtime.fixtures_dir = path;
    }
    if let Some(path) = cli.outbox {
        runtime.outbox = path;
    }
    if let Some(path) = cli.log_file {
        runtime.log_file = path;
    }

    let log_file = open_log_file(&runtime.log_file)?;
    log_subscriber(log_file)?.init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(runtime).await?,
        Commands::Once => {
            runtime.max_cycles = Some(1);
            run(runtime).await?;
        }
        Commands::Discover { query } => {
            let config = load_config(&runtime)?;
            let known = DedupStore::load(&runtime.state_file)
                .await
                .with_context(|| format!("reading {}", runtime.state_file.display()))?;
            let mut surface =
                FixtureContentSurface::new(runtime.fixtures_dir.clone(), runtime.base_url.clone());
            let mut pacer = Pacer::new(Shutdown::never());
            let cycle = config.cycle_config();
            let report = discover(
                &mut surface as &mut dyn ContentSurface,
                &mut pacer,
                &query,
                &config.rule_set(),
                DiscoveryOptions {
                    max_age_days: cycle.max_tweet_age_days,
                    max_scroll_rounds: cycle.max_scroll_rounds,
                    scroll_settle: replyscout_core::PacingBounds::ZERO,
                },
            )
            .await?;
            for candidate in &report.candidates {
                let marker = if known.contains(&candidate.id) { "replied" } else { "new" };
                println!("{marker}\t{}\t{}", candidate.url, candidate.text);
            }
            println!(
                "rounds={} seen={} accepted={} extract_failures={} rejected={:?}",
                report.rounds,
                report.seen,
                report.candidates.len(),
                report.extract_failures,
                report.rejected_by_reason
            );
        }
        Commands::Compose { count } => {
            let config = load_config(&runtime)?;
            let template = config.reply_template();
            for _ in 0..count {
                println!("{}", compose(&template));
            }
        }
        Commands::CheckConfig => {
            let config = load_config(&runtime)?;
            println!(
                "config ok: queries={} intent={} service={} promo_excludes={} username_excludes={} max_age_days={}",
                config.queries().len(),
                config.intent_keywords.len(),
                config.service_keywords.len(),
                config.promo_keywords_to_avoid.len(),
                config.username_keywords_to_avoid.len(),
                config.settings.max_tweet_age_days
            );
        }
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}

/// Console output plus an uncoloured copy of every event in `log_file`.
fn log_subscriber(log_file: File) -> Result<impl tracing::Subscriber + Send + Sync> {
    Ok(tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("replyscout=info".parse()?))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(log_file))))
}

fn load_config(runtime: &RuntimeConfig) -> Result<BotConfig> {
    BotConfig::load(&runtime.config_path)
        .with_context(|| format!("loading config {}", runtime.config_path.display()))
}

async fn run(runtime: RuntimeConfig) -> Result<()> {
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current step");
            trigger.trigger();
        }
    });

    match run_from_env(&runtime, shutdown).await {
        Ok(summary) => {
            println!(
                "run complete: run_id={} cycles={} posted={} interrupted={}",
                summary.run_id,
                summary.cycles.len(),
                summary.total_posted(),
                summary.interrupted
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "fatal error, stopping");
            Err(err)
        }
    }
}
