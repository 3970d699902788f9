//! Collaborator contracts consumed by the cycle + fixture-first implementations.
//!
//! The cycle only talks to a platform through these traits. Shipped
//! implementations replay captured pages and write replies to a local outbox.

pub mod fixture;
pub mod markup;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replyscout_core::{Credentials, RawItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fixture::{
    DryRunEngagementSurface, FixtureContentSurface, FixtureSessionProvider, FixtureSettings,
    FsDiagnostics, OutboxEntry,
};

pub const CRATE_NAME: &str = "replyscout-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("session could not be established: {0}")]
    Session(String),
    #[error("authentication failed for {identity}: {reason}")]
    Authentication { identity: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Outcome of a reply attempt. Failure is a value, not an error, so the
/// cycle can log it and move on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostResult {
    Posted,
    Failed(String),
}

/// The search/results view.
#[async_trait]
pub trait ContentSurface: Send {
    /// Opens the results view for `query`. `Ok(false)` means nothing loaded.
    async fn search(&mut self, query: &str) -> Result<bool, AdapterError>;

    /// Raw items currently visible on the results view.
    async fn current_batch(&mut self) -> Result<Vec<RawItem>, AdapterError>;

    /// Requests the next batch, e.g. by scrolling.
    async fn scroll_next(&mut self) -> Result<(), AdapterError>;

    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Live-thread probe and reply posting.
#[async_trait]
pub trait EngagementSurface: Send {
    async fn already_engaged(&mut self, url: &str, my_identity: &str) -> Result<bool, AdapterError>;

    async fn post_reply(&mut self, url: &str, text: &str) -> PostResult;

    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Context attached to a failure artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureContext {
    pub query: Option<String>,
    pub url: Option<String>,
    pub detail: String,
}

/// Fire-and-forget failure capture. Implementations swallow their own errors.
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn capture_failure_artifact(&self, label: &str, context: &FailureContext);
}

/// An authenticated session: the surfaces the cycle drives, bound to one identity.
pub struct Session {
    pub identity: String,
    pub opened_at: DateTime<Utc>,
    pub content: Box<dyn ContentSurface>,
    pub engagement: Box<dyn EngagementSurface>,
    pub diagnostics: Arc<dyn Diagnostics>,
}

impl Session {
    /// Tears down both surfaces, reporting the first failure after attempting both.
    pub async fn close(mut self) -> Result<(), AdapterError> {
        let content = self.content.close().await;
        let engagement = self.engagement.close().await;
        content.and(engagement)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open_authenticated_session(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, AdapterError>;
}
