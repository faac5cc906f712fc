//! Redraft Core - document reconstruction engine
//!
//! This crate contains the orchestration logic for long-document
//! reconstruction:
//! - Strategy selection over input size, instructions, and shape
//! - The reconstruction strategies (direct, diagnostic, outline-first,
//!   cross-chunk, expansion, position-list)
//! - Word-budgeted chunking with lossless reassembly
//! - Provider gateway for remote LLM completion (OpenAI, Anthropic)
//! - Session registry with progress events, abort, and partial output
//! - Job persistence for crash/abort resume

pub mod chunk;
pub mod config;
pub mod error;
pub mod prompts;
pub mod provider;
pub mod session;
pub mod store;
pub mod strategy;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::prompts::PromptSet;
use crate::provider::TextProvider;
use crate::session::{JobStatus, ProgressEvent, SessionRegistry, SessionSnapshot};
use crate::store::JobStore;
use crate::strategy::cross_chunk::GlobalState;
use crate::strategy::RunCtx;
use crate::text::word_count;

pub use strategy::{Fidelity, Outcome, ReconstructionRequest, StrategyKind};

/// Returned by the abort operation: the terminal state plus whatever
/// output had accumulated. Partial output is preserved, never discarded.
#[derive(Debug, Clone, Serialize)]
pub struct AbortReceipt {
    pub session_id: String,
    pub status: JobStatus,
    pub partial_output: String,
    pub word_count: usize,
}

/// The reconstruction engine: provider, persistence, and session registry
/// behind a single facade the transport layer talks to.
pub struct Engine {
    settings: Settings,
    provider: Arc<dyn TextProvider>,
    store: Arc<dyn JobStore>,
    sessions: SessionRegistry,
    prompts: Arc<PromptSet>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        provider: Arc<dyn TextProvider>,
        store: Arc<dyn JobStore>,
        prompts: PromptSet,
    ) -> Self {
        Self {
            settings,
            provider,
            store,
            sessions: SessionRegistry::new(),
            prompts: Arc::new(prompts),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run a reconstruction to completion and return the outcome.
    pub async fn reconstruct(&self, request: ReconstructionRequest) -> EngineResult<Outcome> {
        let selection = self.select_for(&request)?;
        let session_id = Uuid::new_v4().to_string();
        let cancel = self.sessions.start(&session_id).await;
        let ctx = self.make_ctx(session_id, cancel, None);

        let result = strategy::run(&ctx, &request, &selection).await;
        finalize(&ctx, result).await
    }

    /// Start a reconstruction in the background and stream its progress.
    ///
    /// Selection happens before the job is spawned so invalid input is
    /// rejected synchronously. The returned receiver yields a finite event
    /// sequence ending in `complete`, `aborted`, or `error`.
    pub async fn reconstruct_streaming(
        &self,
        request: ReconstructionRequest,
    ) -> EngineResult<(String, mpsc::Receiver<ProgressEvent>)> {
        let selection = self.select_for(&request)?;
        let session_id = Uuid::new_v4().to_string();
        let cancel = self.sessions.start(&session_id).await;

        let (tx, rx) = mpsc::channel(256);
        let ctx = self.make_ctx(session_id.clone(), cancel, Some(tx));

        tokio::spawn(async move {
            let result = strategy::run(&ctx, &request, &selection).await;
            if let Err(err) = finalize(&ctx, result).await {
                tracing::error!(
                    session_id = %ctx.session_id,
                    error = %err,
                    "Reconstruction job failed"
                );
            }
        });

        Ok((session_id, rx))
    }

    /// Abort a session. Idempotent: aborting a finished or already aborted
    /// session returns its receipt unchanged. `None` for unknown sessions.
    pub async fn abort(&self, session_id: &str) -> Option<AbortReceipt> {
        let snapshot = self.sessions.abort(session_id).await?;
        Some(AbortReceipt {
            session_id: snapshot.id,
            status: snapshot.status,
            word_count: word_count(&snapshot.partial_output),
            partial_output: snapshot.partial_output,
        })
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).await
    }

    /// Resume an interrupted cross-chunk job from its persisted snapshot,
    /// skipping chunks that already completed.
    pub async fn resume_cross_chunk(&self, job_id: &str) -> EngineResult<Outcome> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(job_id.to_string()))?;
        if job.status == JobStatus::Completed {
            return Err(EngineError::InvalidInput(format!(
                "job {} already completed",
                job_id
            )));
        }

        let state: GlobalState = match self.store.read_global_state(job_id).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => GlobalState::default(),
        };
        let request = ReconstructionRequest {
            text: job.input_text,
            custom_instructions: job.custom_instructions,
            fidelity: Fidelity::default(),
            target_domain: None,
        };

        let cancel = self.sessions.start(job_id).await;
        let ctx = self.make_ctx(job_id.to_string(), cancel, None);

        let result = strategy::cross_chunk::run(&ctx, &request, Some(state)).await;
        finalize(&ctx, result).await
    }

    fn select_for(&self, request: &ReconstructionRequest) -> EngineResult<strategy::Selection> {
        let input_words = word_count(&request.text);
        strategy::select(
            input_words,
            request.instructions(),
            &request.text,
            &self.settings.thresholds,
        )
    }

    fn make_ctx(
        &self,
        session_id: String,
        cancel: tokio_util::sync::CancellationToken,
        events: Option<mpsc::Sender<ProgressEvent>>,
    ) -> RunCtx {
        RunCtx {
            provider: self.provider.clone(),
            store: self.store.clone(),
            sessions: self.sessions.clone(),
            prompts: self.prompts.clone(),
            thresholds: self.settings.thresholds.clone(),
            options: self.settings.completion.to_options(),
            session_id,
            events,
            cancel,
        }
    }
}

/// Close out a finished job: update the session, emit the terminal event,
/// and pass the result through. Strategy errors become a terminal `error`
/// event rather than a crash of the serving process.
async fn finalize(ctx: &RunCtx, result: EngineResult<Outcome>) -> EngineResult<Outcome> {
    match result {
        Ok(outcome) if outcome.aborted => Ok(outcome),
        Ok(outcome) => {
            ctx.sessions.complete(&ctx.session_id).await;
            ctx.emit(ProgressEvent::Complete(
                serde_json::to_value(&outcome).unwrap_or_default(),
            ))
            .await;
            Ok(outcome)
        }
        Err(err) => {
            ctx.sessions.fail(&ctx.session_id).await;
            ctx.emit(ProgressEvent::Error {
                session_id: ctx.session_id.clone(),
                message: err.to_string(),
            })
            .await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyThresholds;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedProvider;

    fn engine_with(provider: Arc<ScriptedProvider>, thresholds: StrategyThresholds) -> Engine {
        let settings = Settings {
            thresholds,
            ..Default::default()
        };
        Engine::new(
            settings,
            provider,
            Arc::new(MemoryStore::new()),
            PromptSet::default(),
        )
    }

    fn words(n: usize) -> String {
        // Sentences of ten words so the chunker has boundaries to work with.
        (0..n)
            .map(|i| {
                if (i + 1) % 10 == 0 {
                    format!("w{}.", i)
                } else {
                    format!("w{}", i)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_short_text_no_instructions_is_conservative_diagnostic() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "DIAGNOSIS: vague-claim\n\nA sharper version of the argument.",
        ]));
        let engine = engine_with(provider.clone(), StrategyThresholds::default());

        let input = words(300);
        let outcome = engine
            .reconstruct(ReconstructionRequest {
                text: input.clone(),
                custom_instructions: None,
                fidelity: Fidelity::default(),
                target_domain: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.mode, StrategyKind::DiagnosticReconstruction);
        assert!(!outcome.output.is_empty());
        assert_ne!(outcome.output, input);
        assert_eq!(outcome.diagnosis.as_deref(), Some("vague-claim"));
        assert_eq!(outcome.input_word_count, 300);

        // Conservative prompt was used by default.
        let calls = provider.calls.lock().await;
        assert!(calls[0].1.contains("single most salient defect"));

        let session = engine.session(&outcome.session_id).await.unwrap();
        assert_eq!(session.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_streaming_cross_chunk_reports_every_chunk() {
        // Thresholds scaled down: 150 words is "long", 30-word chunks.
        let thresholds = StrategyThresholds {
            medium_low_words: 10,
            medium_high_words: 100,
            max_words_per_chunk: 30,
            ..Default::default()
        };
        let reply = serde_json::json!({"section": "rewritten chunk", "state": {}}).to_string();
        let provider = Arc::new(ScriptedProvider::repeating(&reply));
        let engine = engine_with(provider, thresholds);

        let (session_id, mut rx) = engine
            .reconstruct_streaming(ReconstructionRequest {
                text: words(150),
                custom_instructions: None,
                fidelity: Fidelity::default(),
                target_domain: None,
            })
            .await
            .unwrap();

        let mut progress_count = 0;
        let mut complete = None;
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Progress(update) => {
                    assert_eq!(update.chunk_index, progress_count);
                    progress_count += 1;
                }
                ProgressEvent::Complete(value) => complete = Some(value),
                other => panic!("unexpected event: {:?}", other),
            }
        }

        // 150 words over a 30-word budget: five chunks.
        assert_eq!(progress_count, 5);
        let complete = complete.expect("no complete event");
        assert_eq!(complete["chunks_processed"], 5);
        assert_eq!(complete["mode"], "cross_chunk");

        let session = engine.session(&session_id).await.unwrap();
        assert_eq!(session.status, JobStatus::Completed);
        assert_eq!(session.chunks_processed, 5);
    }

    #[tokio::test]
    async fn test_streaming_error_emits_terminal_error_event() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![Err(
            crate::error::ProviderError::Unavailable("provider is down".into()),
        )]));
        let engine = engine_with(provider, StrategyThresholds::default());

        let (session_id, mut rx) = engine
            .reconstruct_streaming(ReconstructionRequest {
                text: "short text".into(),
                custom_instructions: None,
                fidelity: Fidelity::default(),
                target_domain: None,
            })
            .await
            .unwrap();

        let mut saw_error = false;
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::Error { message, .. } = event {
                assert!(message.contains("provider is down"));
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert_eq!(
            engine.session(&session_id).await.unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_empty_input_rejected_synchronously() {
        let provider = Arc::new(ScriptedProvider::new(vec!["unused"]));
        let engine = engine_with(provider, StrategyThresholds::default());

        let result = engine
            .reconstruct_streaming(ReconstructionRequest {
                text: "".into(),
                custom_instructions: None,
                fidelity: Fidelity::default(),
                target_domain: None,
            })
            .await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_abort_unknown_session() {
        let provider = Arc::new(ScriptedProvider::new(vec!["unused"]));
        let engine = engine_with(provider, StrategyThresholds::default());
        assert!(engine.abort("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_resume_after_abort_completes_remaining_chunks() {
        let thresholds = StrategyThresholds {
            medium_low_words: 10,
            medium_high_words: 100,
            max_words_per_chunk: 30,
            ..Default::default()
        };
        let reply = serde_json::json!({"section": "rewritten chunk", "state": {}}).to_string();
        let provider = Arc::new(ScriptedProvider::repeating(&reply));
        let engine = engine_with(provider.clone(), thresholds);

        // Seed the store the way an aborted run leaves it: two of five
        // chunks persisted.
        let text = words(150);
        let mut job = crate::store::JobRecord::new("job-1", &text, None);
        job.status = JobStatus::Aborted;
        job.total_chunks = 5;
        job.chunks_processed = 2;
        engine.store.upsert_job(&job).await.unwrap();
        engine.store.append_chunk("job-1", 0, "done0").await.unwrap();
        engine.store.append_chunk("job-1", 1, "done1").await.unwrap();
        let state = GlobalState {
            completed_chunks: vec![0, 1],
            ..Default::default()
        };
        engine
            .store
            .write_global_state("job-1", &serde_json::to_value(&state).unwrap())
            .await
            .unwrap();

        let outcome = engine.resume_cross_chunk("job-1").await.unwrap();

        assert_eq!(outcome.chunks_processed, Some(5));
        assert!(outcome.output.starts_with("done0\n\ndone1"));
        // Only the three remaining chunks hit the provider.
        assert_eq!(provider.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_resume_completed_job_is_invalid() {
        let provider = Arc::new(ScriptedProvider::new(vec!["unused"]));
        let engine = engine_with(provider, StrategyThresholds::default());

        let mut job = crate::store::JobRecord::new("job-1", "text", None);
        job.status = JobStatus::Completed;
        engine.store.upsert_job(&job).await.unwrap();

        assert!(matches!(
            engine.resume_cross_chunk("job-1").await,
            Err(EngineError::InvalidInput(_))
        ));
    }
}
