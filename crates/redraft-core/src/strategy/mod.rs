//! Reconstruction strategies and the strategy selector.
//!
//! The selector is a pure function over (word count, instructions, input
//! shape); its decision order is load-bearing. Expansion intent wins over
//! every length heuristic because only the expansion strategy streams
//! sections live, which very large target outputs need.

pub mod cross_chunk;
pub mod diagnostic;
pub mod direct;
pub mod expansion;
pub mod outline;
pub mod position_list;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::StrategyThresholds;
use crate::error::{EngineError, EngineResult, ProviderError};
use crate::prompts::PromptSet;
use crate::provider::{CompletionOptions, TextProvider};
use crate::session::{ProgressEvent, SessionRegistry};
use crate::store::JobStore;
use crate::text::{
    looks_like_position_list, parse_expansion_directive, word_count, ExpansionDirective,
};

pub use diagnostic::Defect;
pub use position_list::PositionReport;

/// The reconstruction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    DirectInstruction,
    DiagnosticReconstruction,
    OutlineFirst,
    CrossChunk,
    UniversalExpansion,
    PositionList,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::DirectInstruction => "direct_instruction",
            StrategyKind::DiagnosticReconstruction => "diagnostic_reconstruction",
            StrategyKind::OutlineFirst => "outline_first",
            StrategyKind::CrossChunk => "cross_chunk",
            StrategyKind::UniversalExpansion => "universal_expansion",
            StrategyKind::PositionList => "position_list",
        };
        write!(f, "{}", name)
    }
}

/// How much of the original text a repair may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    #[default]
    Conservative,
    Aggressive,
}

/// A validated reconstruction request.
#[derive(Debug, Clone)]
pub struct ReconstructionRequest {
    pub text: String,
    pub custom_instructions: Option<String>,
    pub fidelity: Fidelity,
    pub target_domain: Option<String>,
}

impl ReconstructionRequest {
    pub fn instructions(&self) -> &str {
        self.custom_instructions.as_deref().unwrap_or("").trim()
    }

    pub fn domain(&self) -> Option<&str> {
        self.target_domain.as_deref()
    }
}

/// Outcome of a strategy's selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub kind: StrategyKind,
    /// Present when expansion intent was detected in the instructions.
    pub directive: Option<ExpansionDirective>,
}

/// Map a request onto a strategy.
///
/// First match wins; the order must not be rearranged:
/// 1. expansion intent in the instructions
/// 2. position-list shaped input
/// 3. medium-length input
/// 4. long input
/// 5. any other instructions
/// 6. short input with no instructions
pub fn select(
    input_word_count: usize,
    instructions: &str,
    text: &str,
    thresholds: &StrategyThresholds,
) -> EngineResult<Selection> {
    let instructions = instructions.trim();
    if text.trim().is_empty() && instructions.is_empty() {
        return Err(EngineError::InvalidInput(
            "neither text nor instructions were provided".into(),
        ));
    }

    if !instructions.is_empty() {
        if let Some(directive) = parse_expansion_directive(instructions) {
            return Ok(Selection {
                kind: StrategyKind::UniversalExpansion,
                directive: Some(directive),
            });
        }
    }

    let kind = if looks_like_position_list(text) {
        StrategyKind::PositionList
    } else if (thresholds.medium_low_words..=thresholds.medium_high_words)
        .contains(&input_word_count)
    {
        StrategyKind::OutlineFirst
    } else if input_word_count > thresholds.medium_high_words {
        StrategyKind::CrossChunk
    } else if !instructions.is_empty() {
        StrategyKind::DirectInstruction
    } else {
        StrategyKind::DiagnosticReconstruction
    };

    Ok(Selection {
        kind,
        directive: None,
    })
}

/// Final result of a reconstruction run.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub session_id: String,
    pub mode: StrategyKind,
    pub output: String,
    pub input_word_count: usize,
    pub output_word_count: usize,
    pub processing_time_ms: u64,
    /// True when the job was aborted mid-run; `output` then holds the
    /// partial output accumulated so far.
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections_generated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_word_count: Option<usize>,
    /// Expansion only: set when the target word count was not reached
    /// within the attempt budget. Reported as success, not failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positions: Option<PositionReport>,
}

impl Outcome {
    pub(crate) fn new(
        session_id: &str,
        mode: StrategyKind,
        output: String,
        input_word_count: usize,
        started: std::time::Instant,
    ) -> Self {
        let output_word_count = word_count(&output);
        Self {
            session_id: session_id.to_string(),
            mode,
            output,
            input_word_count,
            output_word_count,
            processing_time_ms: started.elapsed().as_millis() as u64,
            aborted: false,
            diagnosis: None,
            sections_generated: None,
            chunks_processed: None,
            total_chunks: None,
            target_word_count: None,
            shortfall: None,
            positions: None,
        }
    }
}

/// Everything a strategy needs to run one job.
pub(crate) struct RunCtx {
    pub provider: Arc<dyn TextProvider>,
    pub store: Arc<dyn JobStore>,
    pub sessions: SessionRegistry,
    pub prompts: Arc<PromptSet>,
    pub thresholds: StrategyThresholds,
    pub options: CompletionOptions,
    pub session_id: String,
    pub events: Option<mpsc::Sender<ProgressEvent>>,
    pub cancel: CancellationToken,
}

impl RunCtx {
    pub async fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Build the aborted outcome from whatever the session accumulated,
    /// making sure the session itself is marked terminal (idempotent when
    /// the abort endpoint already did).
    pub async fn aborted_outcome(
        &self,
        mode: StrategyKind,
        input_word_count: usize,
        started: std::time::Instant,
    ) -> Outcome {
        let partial = match self.sessions.abort(&self.session_id).await {
            Some(snapshot) => snapshot.partial_output,
            None => self.sessions.partial_output(&self.session_id).await,
        };
        self.emit(ProgressEvent::aborted(&self.session_id, partial.clone()))
            .await;
        let mut outcome = Outcome::new(&self.session_id, mode, partial, input_word_count, started);
        outcome.aborted = true;
        outcome
    }
}

/// Retries per unit of work (section, chunk) for the multi-call strategies.
pub(crate) const RETRIES_PER_UNIT: usize = 2;

/// Run one unit of provider work with a bounded retry budget and jittered
/// backoff. The closure should include response parsing so a malformed
/// response also consumes a retry.
pub(crate) async fn call_with_retry<T, F, Fut>(
    label: &str,
    retries: usize,
    call: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(text) => return Ok(text),
            Err(err) if attempt < retries => {
                attempt += 1;
                let base_ms: u64 = if err.is_rate_limit() { 2_000 } else { 500 };
                let jitter = rand::rng().random_range(0..250u64);
                let delay = Duration::from_millis(base_ms * attempt as u64 + jitter);
                tracing::warn!(
                    unit = label,
                    attempt,
                    error = %err,
                    "Provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Pull the outermost JSON object out of a completion that may wrap it in
/// prose or code fences.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Dispatch a selected strategy.
pub(crate) async fn run(
    ctx: &RunCtx,
    request: &ReconstructionRequest,
    selection: &Selection,
) -> EngineResult<Outcome> {
    match selection.kind {
        StrategyKind::DirectInstruction => direct::run(ctx, request).await,
        StrategyKind::DiagnosticReconstruction => diagnostic::run(ctx, request).await,
        StrategyKind::OutlineFirst => outline::run(ctx, request).await,
        StrategyKind::CrossChunk => cross_chunk::run(ctx, request, None).await,
        StrategyKind::UniversalExpansion => {
            expansion::run(ctx, request, selection.directive).await
        }
        StrategyKind::PositionList => position_list::run(ctx, request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> StrategyThresholds {
        StrategyThresholds::default()
    }

    #[test]
    fn test_short_text_no_instructions() {
        let s = select(500, "", "some text", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::DiagnosticReconstruction);
    }

    #[test]
    fn test_expansion_wins_over_everything() {
        let s = select(500, "expand to 5000 words", "some text", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::UniversalExpansion);
        assert_eq!(s.directive.unwrap().target_words, Some(5000));

        // Even over a position-shaped input and a long document.
        let positions = "a | b\nc | d\ne | f";
        let s = select(30_000, "expand to 9000 words", positions, &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::UniversalExpansion);
    }

    #[test]
    fn test_position_list_before_length_bands() {
        let positions = "P1 | claim one | strong\nP2 | claim two | weak\nP3 | claim three | weak";
        let s = select(2_000, "", positions, &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::PositionList);
    }

    #[test]
    fn test_medium_band_is_outline_first() {
        let s = select(15_000, "", "prose", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::OutlineFirst);
        let s = select(1_200, "", "prose", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::OutlineFirst);
        let s = select(25_000, "", "prose", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::OutlineFirst);
    }

    #[test]
    fn test_long_input_is_cross_chunk() {
        let s = select(30_000, "", "prose", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::CrossChunk);
    }

    #[test]
    fn test_other_instructions_are_direct() {
        let s = select(500, "make the tone more formal", "prose", &thresholds()).unwrap();
        assert_eq!(s.kind, StrategyKind::DirectInstruction);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(
            select(0, "", "", &thresholds()),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 1}\n```"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json("no json here"), None);
    }
}
