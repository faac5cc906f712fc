//! Session registry and progress events for long-running jobs.
//!
//! Each reconstruction run is tracked as a session with an explicit
//! lifecycle: `processing -> {completed | failed | aborted}`. Terminal
//! states are immutable. Every session owns a cancellation token; aborting
//! cancels the token and the running strategy observes it at its next
//! chunk boundary. Partial output accumulates per chunk index and is
//! retrievable in any state.
//!
//! The registry is an explicit object injected into request handlers, not
//! ambient global state; distinct jobs share nothing mutable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::text::word_count;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub partial_output: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct Session {
    status: JobStatus,
    /// Completed chunk outputs keyed by index; partial output is their
    /// in-order concatenation.
    chunks: BTreeMap<usize, String>,
    total_chunks: usize,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    fn partial_output(&self) -> String {
        self.chunks
            .values()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn snapshot(&self, id: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: id.to_string(),
            status: self.status,
            chunks_processed: self.chunks.len(),
            total_chunks: self.total_chunks,
            partial_output: self.partial_output(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Tracks all active and recently finished sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session in `processing` state and return its
    /// cancellation token.
    pub async fn start(&self, id: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        let now = Utc::now();
        self.sessions.write().await.insert(
            id.to_string(),
            Session {
                status: JobStatus::Processing,
                chunks: BTreeMap::new(),
                total_chunks: 0,
                cancel: cancel.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        cancel
    }

    /// Record the expected chunk count once known.
    pub async fn set_total_chunks(&self, id: &str, total: usize) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.total_chunks = total;
            session.updated_at = Utc::now();
        }
    }

    /// Record a completed chunk. Last write wins per index; recording on a
    /// terminal session is ignored.
    pub async fn record_chunk(&self, id: &str, index: usize, text: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            if session.status.is_terminal() {
                return;
            }
            session.chunks.insert(index, text.to_string());
            session.updated_at = Utc::now();
        }
    }

    /// Transition to `completed`. No-op on a terminal session.
    pub async fn complete(&self, id: &str) {
        self.finish(id, JobStatus::Completed).await;
    }

    /// Transition to `failed`. No-op on a terminal session.
    pub async fn fail(&self, id: &str) {
        self.finish(id, JobStatus::Failed).await;
    }

    /// Abort a session: cancel its token, mark it `aborted`, and return the
    /// snapshot with partial output. Idempotent; aborting an already
    /// terminal session returns its snapshot without changing it. Returns
    /// `None` for unknown sessions.
    pub async fn abort(&self, id: &str) -> Option<SessionSnapshot> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id)?;
        if !session.status.is_terminal() {
            session.cancel.cancel();
            session.status = JobStatus::Aborted;
            session.updated_at = Utc::now();
            tracing::info!(session_id = %id, "Session aborted");
        }
        Some(session.snapshot(id))
    }

    /// Accumulated output so far, in chunk-index order. Valid in any state;
    /// empty string when nothing has completed or the session is unknown.
    pub async fn partial_output(&self, id: &str) -> String {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.partial_output())
            .unwrap_or_default()
    }

    pub async fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().await.get(id).map(|s| s.snapshot(id))
    }

    /// The session's cancellation token, if it exists.
    pub async fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        self.sessions.read().await.get(id).map(|s| s.cancel.clone())
    }

    /// Drop a session from tracking.
    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    async fn finish(&self, id: &str, status: JobStatus) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            if session.status.is_terminal() {
                return;
            }
            session.status = status;
            session.updated_at = Utc::now();
        }
    }
}

/// Incremental progress for a running job.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub cumulative_word_count: usize,
    /// Fraction complete in `[0, 1]`.
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_text: Option<String>,
}

/// Events emitted by a running strategy, consumed by the streaming
/// transport. A job's event sequence is finite and ends with exactly one of
/// `complete`, `aborted`, or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(ProgressUpdate),
    Complete(serde_json::Value),
    Aborted {
        session_id: String,
        partial_output: String,
        word_count: usize,
    },
    Error {
        session_id: String,
        message: String,
    },
}

impl ProgressEvent {
    pub fn aborted(session_id: &str, partial_output: String) -> Self {
        let words = word_count(&partial_output);
        ProgressEvent::Aborted {
            session_id: session_id.to_string(),
            partial_output,
            word_count: words,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_to_completed() {
        let registry = SessionRegistry::new();
        registry.start("s1").await;
        registry.set_total_chunks("s1", 2).await;
        registry.record_chunk("s1", 0, "first").await;
        registry.record_chunk("s1", 1, "second").await;
        registry.complete("s1").await;

        let snap = registry.get("s1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.chunks_processed, 2);
        assert_eq!(snap.partial_output, "first\n\nsecond");
    }

    #[tokio::test]
    async fn test_partial_output_ordered_by_index() {
        let registry = SessionRegistry::new();
        registry.start("s1").await;
        registry.record_chunk("s1", 2, "c").await;
        registry.record_chunk("s1", 0, "a").await;
        registry.record_chunk("s1", 1, "b").await;
        assert_eq!(registry.partial_output("s1").await, "a\n\nb\n\nc");
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let registry = SessionRegistry::new();
        let cancel = registry.start("s1").await;
        registry.record_chunk("s1", 0, "partial").await;

        let first = registry.abort("s1").await.unwrap();
        assert_eq!(first.status, JobStatus::Aborted);
        assert!(cancel.is_cancelled());
        assert_eq!(first.partial_output, "partial");

        // Second abort is a no-op, not an error.
        let second = registry.abort("s1").await.unwrap();
        assert_eq!(second.status, JobStatus::Aborted);
        assert_eq!(second.partial_output, "partial");
    }

    #[tokio::test]
    async fn test_abort_after_complete_does_not_regress() {
        let registry = SessionRegistry::new();
        registry.start("s1").await;
        registry.complete("s1").await;
        let snap = registry.abort("s1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_terminal_sessions_ignore_chunks() {
        let registry = SessionRegistry::new();
        registry.start("s1").await;
        registry.record_chunk("s1", 0, "kept").await;
        registry.abort("s1").await;
        registry.record_chunk("s1", 1, "dropped").await;
        assert_eq!(registry.partial_output("s1").await, "kept");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(registry.abort("missing").await.is_none());
        assert_eq!(registry.partial_output("missing").await, "");
    }

    #[tokio::test]
    async fn test_independent_sessions() {
        let registry = SessionRegistry::new();
        registry.start("a").await;
        registry.start("b").await;
        registry.record_chunk("a", 0, "from a").await;
        registry.abort("b").await;

        assert_eq!(registry.get("a").await.unwrap().status, JobStatus::Processing);
        assert_eq!(registry.get("b").await.unwrap().status, JobStatus::Aborted);
        assert_eq!(registry.partial_output("a").await, "from a");
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = ProgressEvent::aborted("s1", "partial text".into());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "aborted");
        assert_eq!(json["data"]["word_count"], 2);
    }
}
