//! Cross-chunk coherence reconstruction.
//!
//! Chunks the document, then rewrites chunks strictly in order while
//! threading a mutable [`GlobalState`] through every call: terminology
//! choices and claims established in early chunks constrain the later
//! ones, which is what keeps independently rewritten chunks from drifting
//! apart. The state and each chunk's output are persisted as soon as the
//! chunk completes, so an abort or crash leaves a resumable snapshot.
//!
//! The abort flag is checked before each chunk's provider call; already
//! accumulated output is the retrievable partial result. A resumed run
//! skips completed chunks and continues from `max(completed) + 1` with the
//! persisted state instead of recomputing it.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::chunk::chunk_text;
use crate::error::{EngineResult, ProviderError};
use crate::prompts::{domain_clause, render};
use crate::provider::TextProvider;
use crate::session::{JobStatus, ProgressEvent, ProgressUpdate};
use crate::store::{JobRecord, JobStore};
use crate::text::word_count;

use super::{
    call_with_retry, extract_json, Outcome, ReconstructionRequest, RunCtx, StrategyKind,
    RETRIES_PER_UNIT,
};

/// Rolling cross-chunk memory, owned exclusively by the job's processing
/// loop and persisted after every chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default)]
    pub thesis: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Decisions established in earlier chunks (terminology, claims).
    #[serde(default)]
    pub decisions: Vec<String>,
    /// Indices of chunks whose output has been persisted.
    #[serde(default)]
    pub completed_chunks: Vec<usize>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl GlobalState {
    /// The part of the state the provider sees; bookkeeping fields stay
    /// out of the prompt.
    fn prompt_view(&self) -> serde_json::Value {
        serde_json::json!({
            "thesis": self.thesis,
            "key_points": self.key_points,
            "key_terms": self.key_terms,
            "constraints": self.constraints,
            "decisions": self.decisions,
        })
    }

    fn merge(&mut self, update: StateUpdate) {
        if let Some(thesis) = update.thesis {
            self.thesis = Some(thesis);
        }
        extend_unique(&mut self.key_points, update.key_points);
        extend_unique(&mut self.key_terms, update.key_terms);
        extend_unique(&mut self.constraints, update.constraints);
        extend_unique(&mut self.decisions, update.decisions);
    }
}

fn extend_unique(dst: &mut Vec<String>, src: Vec<String>) {
    for item in src {
        if !dst.contains(&item) {
            dst.push(item);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StateUpdate {
    #[serde(default)]
    thesis: Option<String>,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    key_terms: Vec<String>,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    decisions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkReply {
    section: String,
    #[serde(default)]
    state: Option<StateUpdate>,
}

pub(crate) async fn run(
    ctx: &RunCtx,
    request: &ReconstructionRequest,
    resume: Option<GlobalState>,
) -> EngineResult<Outcome> {
    let started = Instant::now();
    let input_words = word_count(&request.text);
    let resuming = resume.is_some();

    let chunks = chunk_text(&request.text, ctx.thresholds.max_words_per_chunk);
    let total = chunks.len();
    ctx.sessions.set_total_chunks(&ctx.session_id, total).await;

    let mut state = resume.unwrap_or_default();
    state.session_id = Some(ctx.session_id.clone());

    // On resume, reload what earlier runs already produced and continue
    // after the highest completed index.
    let mut start_index = 0usize;
    let mut cumulative = 0usize;
    if resuming {
        let stored = ctx.store.list_chunks(&ctx.session_id).await?;
        for chunk in &stored {
            cumulative += word_count(&chunk.text);
            ctx.sessions
                .record_chunk(&ctx.session_id, chunk.chunk_index, &chunk.text)
                .await;
        }
        start_index = state.completed_chunks.iter().max().map(|m| m + 1).unwrap_or(0);
        tracing::info!(
            session_id = %ctx.session_id,
            start_index,
            total_chunks = total,
            "Resuming cross-chunk job"
        );
    }

    let mut job = match ctx.store.get_job(&ctx.session_id).await? {
        Some(job) if resuming => job,
        _ => JobRecord::new(
            &ctx.session_id,
            &request.text,
            request.custom_instructions.as_deref(),
        ),
    };
    job.status = JobStatus::Processing;
    job.total_chunks = total;
    job.chunks_processed = start_index;
    job.updated_at = Utc::now().to_rfc3339();
    ctx.store.upsert_job(&job).await?;

    let system = render(
        &ctx.prompts.cross_chunk_system,
        &[("domain", &domain_clause(request.domain()))],
    );
    let total_str = total.to_string();

    for index in start_index..total {
        // Abort check at the chunk boundary, before the provider call.
        if ctx.is_cancelled() {
            job.status = JobStatus::Aborted;
            job.updated_at = Utc::now().to_rfc3339();
            ctx.store.upsert_job(&job).await?;

            let mut outcome = ctx
                .aborted_outcome(StrategyKind::CrossChunk, input_words, started)
                .await;
            outcome.chunks_processed = Some(index);
            outcome.total_chunks = Some(total);
            return Ok(outcome);
        }

        let state_json = serde_json::to_string_pretty(&state.prompt_view())
            .unwrap_or_else(|_| "{}".to_string());
        let user = render(
            &ctx.prompts.cross_chunk_user,
            &[
                ("state", &state_json),
                ("instructions", request.instructions()),
                ("chunk_index", &(index + 1).to_string()),
                ("total_chunks", &total_str),
                ("chunk", &chunks[index].text),
            ],
        );

        let reply = match call_with_retry(&format!("chunk {}", index), RETRIES_PER_UNIT, || async {
            let response = ctx.provider.complete(&system, &user, &ctx.options).await?;
            parse_reply(&response)
        })
        .await
        {
            Ok(reply) => reply,
            Err(err) => {
                job.status = JobStatus::Failed;
                job.updated_at = Utc::now().to_rfc3339();
                ctx.store.upsert_job(&job).await?;
                return Err(err.into());
            }
        };

        if let Some(update) = reply.state {
            state.merge(update);
        }
        state.completed_chunks.push(index);
        cumulative += word_count(&reply.section);

        // Persist chunk output and state before reporting progress, so a
        // crash between the two leaves a resumable snapshot.
        ctx.store
            .append_chunk(&ctx.session_id, index, &reply.section)
            .await?;
        ctx.store
            .write_global_state(&ctx.session_id, &serde_json::to_value(&state).unwrap_or_default())
            .await?;
        job.chunks_processed = index + 1;
        job.updated_at = Utc::now().to_rfc3339();
        ctx.store.upsert_job(&job).await?;

        ctx.sessions
            .record_chunk(&ctx.session_id, index, &reply.section)
            .await;
        ctx.emit(ProgressEvent::Progress(ProgressUpdate {
            session_id: ctx.session_id.clone(),
            chunk_index: index,
            total_chunks: total,
            cumulative_word_count: cumulative,
            progress: (index + 1) as f32 / total.max(1) as f32,
            section_title: None,
            partial_text: None,
        }))
        .await;
    }

    job.status = JobStatus::Completed;
    job.updated_at = Utc::now().to_rfc3339();
    ctx.store.upsert_job(&job).await?;

    // Stitch: the session already holds every chunk in index order.
    let output = ctx.sessions.partial_output(&ctx.session_id).await;
    let mut outcome = Outcome::new(
        &ctx.session_id,
        StrategyKind::CrossChunk,
        output,
        input_words,
        started,
    );
    outcome.chunks_processed = Some(total);
    outcome.total_chunks = Some(total);
    Ok(outcome)
}

fn parse_reply(response: &str) -> Result<ChunkReply, ProviderError> {
    let json = extract_json(response).ok_or_else(|| {
        ProviderError::MalformedResponse("no JSON object in chunk response".into())
    })?;
    let reply: ChunkReply = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedResponse(format!("chunk reply did not parse: {}", e)))?;
    if reply.section.trim().is_empty() {
        return Err(ProviderError::MalformedResponse(
            "chunk reply carried an empty section".into(),
        ));
    }
    Ok(reply)
}
