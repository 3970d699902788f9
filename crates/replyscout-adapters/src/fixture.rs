//! Fixture-backed surfaces: captured pages in, local outbox + artifacts out.
//!
//! Layout under the fixtures root:
//!
//! ```text
//! search/<query-slug>/page_01.html   one file per scroll round
//! threads/<status-id>.html           thread page used by the engaged probe
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replyscout_core::{status_id_from_url, Credentials, RawItem};
use replyscout_storage::ArtifactStore;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::markup::{extract_raw_items, thread_has_reply_from};
use crate::{
    AdapterError, ContentSurface, Diagnostics, EngagementSurface, FailureContext, PostResult,
    Session, SessionProvider,
};

pub const DEFAULT_BASE_URL: &str = "https://x.com";

/// Directory name for a query: lowercase alphanumerics joined by `-`.
pub fn query_slug(query: &str) -> String {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Replays `search/<slug>/page_NN.html` files, one per scroll round. Once the
/// pages run out the last one stays visible, as a results view does when
/// nothing more loads.
#[derive(Debug)]
pub struct FixtureContentSurface {
    root: PathBuf,
    base_url: String,
    pages: Vec<PathBuf>,
    round: usize,
}

impl FixtureContentSurface {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
            pages: Vec::new(),
            round: 0,
        }
    }

    async fn list_pages(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut pages = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(pages),
            Err(err) => {
                return Err(err).with_context(|| format!("listing {}", dir.display()));
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("html") {
                pages.push(path);
            }
        }
        pages.sort();
        Ok(pages)
    }
}

#[async_trait]
impl ContentSurface for FixtureContentSurface {
    async fn search(&mut self, query: &str) -> Result<bool, AdapterError> {
        let dir = self.root.join("search").join(query_slug(query));
        self.pages = Self::list_pages(&dir).await?;
        self.round = 0;
        debug!(query, dir = %dir.display(), pages = self.pages.len(), "fixture search");
        Ok(!self.pages.is_empty())
    }

    async fn current_batch(&mut self) -> Result<Vec<RawItem>, AdapterError> {
        let Some(last) = self.pages.len().checked_sub(1) else {
            return Ok(Vec::new());
        };
        let page = &self.pages[self.round.min(last)];
        let html = fs::read_to_string(page)
            .await
            .with_context(|| format!("reading results page {}", page.display()))?;
        extract_raw_items(&html, &self.base_url)
    }

    async fn scroll_next(&mut self) -> Result<(), AdapterError> {
        self.round += 1;
        Ok(())
    }
}

/// One line of the dry-run outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub url: String,
    pub text: String,
    pub queued_at: DateTime<Utc>,
}

/// Never contacts a platform: the probe reads `threads/<id>.html`, replies are
/// appended to a JSON-lines outbox for review.
#[derive(Debug)]
pub struct DryRunEngagementSurface {
    threads_dir: PathBuf,
    outbox: PathBuf,
}

impl DryRunEngagementSurface {
    pub fn new(fixtures_root: impl AsRef<Path>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            threads_dir: fixtures_root.as_ref().join("threads"),
            outbox: outbox.into(),
        }
    }

    async fn append_outbox(&self, entry: &OutboxEntry) -> anyhow::Result<()> {
        if let Some(parent) = self.outbox.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut line = serde_json::to_vec(entry).context("serializing outbox entry")?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outbox)
            .await
            .with_context(|| format!("opening outbox {}", self.outbox.display()))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("appending to outbox {}", self.outbox.display()))?;
        file.flush().await.context("flushing outbox")?;
        Ok(())
    }

    pub async fn read_outbox(path: impl AsRef<Path>) -> anyhow::Result<Vec<OutboxEntry>> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).with_context(|| format!("parsing {}", path.display())))
            .collect()
    }
}

#[async_trait]
impl EngagementSurface for DryRunEngagementSurface {
    async fn already_engaged(&mut self, url: &str, my_identity: &str) -> Result<bool, AdapterError> {
        let id = status_id_from_url(url)
            .ok_or_else(|| AdapterError::Message(format!("no status id in {url}")))?;
        let path = self.threads_dir.join(format!("{id}.html"));
        let html = match fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        thread_has_reply_from(&html, my_identity)
    }

    async fn post_reply(&mut self, url: &str, text: &str) -> PostResult {
        let entry = OutboxEntry {
            url: url.to_string(),
            text: text.to_string(),
            queued_at: Utc::now(),
        };
        match self.append_outbox(&entry).await {
            Ok(()) => {
                info!(url, outbox = %self.outbox.display(), "reply written to outbox");
                PostResult::Posted
            }
            Err(err) => PostResult::Failed(format!("{err:#}")),
        }
    }
}

/// Writes failure context as JSON into the artifact store.
#[derive(Debug, Clone)]
pub struct FsDiagnostics {
    store: ArtifactStore,
}

impl FsDiagnostics {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[derive(Serialize)]
struct FailureArtifact<'a> {
    label: &'a str,
    captured_at: DateTime<Utc>,
    context: &'a FailureContext,
}

#[async_trait]
impl Diagnostics for FsDiagnostics {
    async fn capture_failure_artifact(&self, label: &str, context: &FailureContext) {
        let captured_at = Utc::now();
        let bytes = match serde_json::to_vec_pretty(&FailureArtifact {
            label,
            captured_at,
            context,
        }) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(label, error = %err, "could not serialize failure artifact");
                return;
            }
        };
        match self
            .store
            .store_failure_artifact(captured_at, label, "json", &bytes)
            .await
        {
            Ok(stored) => debug!(label, path = %stored.absolute_path.display(), "failure artifact saved"),
            Err(err) => error!(label, error = %format!("{err:#}"), "could not save failure artifact"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixtureSettings {
    pub fixtures_dir: PathBuf,
    pub outbox: PathBuf,
    pub artifacts_dir: PathBuf,
    pub base_url: String,
    pub run_headless: bool,
}

/// Opens a fixture session after validating credentials and the fixtures root.
#[derive(Debug, Clone)]
pub struct FixtureSessionProvider {
    settings: FixtureSettings,
}

impl FixtureSessionProvider {
    pub fn new(settings: FixtureSettings) -> Self {
        Self { settings }
    }

    pub fn diagnostics(&self) -> Arc<dyn Diagnostics> {
        Arc::new(FsDiagnostics::new(ArtifactStore::new(
            self.settings.artifacts_dir.clone(),
        )))
    }
}

#[async_trait]
impl SessionProvider for FixtureSessionProvider {
    async fn open_authenticated_session(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, AdapterError> {
        let settings = &self.settings;
        let is_dir = fs::metadata(&settings.fixtures_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(AdapterError::Session(format!(
                "fixtures directory {} does not exist",
                settings.fixtures_dir.display()
            )));
        }
        if credentials.identity.trim().is_empty() {
            return Err(AdapterError::Authentication {
                identity: credentials.identity.clone(),
                reason: "empty identity".to_string(),
            });
        }
        if credentials.recovery_contact.is_none() {
            warn!("no recovery contact configured; verification prompts would fail on a live session");
        }

        info!(
            identity = %credentials.identity,
            fixtures = %settings.fixtures_dir.display(),
            headless = settings.run_headless,
            "fixture session opened"
        );
        Ok(Session {
            identity: credentials.identity.clone(),
            opened_at: Utc::now(),
            content: Box::new(FixtureContentSurface::new(
                settings.fixtures_dir.clone(),
                settings.base_url.clone(),
            )),
            engagement: Box::new(DryRunEngagementSurface::new(
                &settings.fixtures_dir,
                settings.outbox.clone(),
            )),
            diagnostics: self.diagnostics(),
        })
    }
}
