//! Position-list reconstruction: item-by-item transformation of a
//! pipe-delimited list of discrete positions.
//!
//! The first well-formed line fixes the canonical field count; lines with
//! a different count are skipped and counted, never merged into their
//! neighbors. Positions are processed sequentially so the output keeps the
//! original relative order. The provider may answer `SKIP` to drop a
//! position the instructions exclude.

use std::time::Instant;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::prompts::{domain_clause, render};
use crate::provider::TextProvider;
use crate::session::{ProgressEvent, ProgressUpdate};
use crate::text::word_count;

use super::{Outcome, ReconstructionRequest, RunCtx, StrategyKind};

/// Counters reported alongside the transformed list.
#[derive(Debug, Clone, Serialize)]
pub struct PositionReport {
    pub total_positions: usize,
    pub positions_processed: usize,
    pub positions_selected: usize,
    pub malformed_skipped: usize,
}

struct ParsedList<'a> {
    positions: Vec<&'a str>,
    malformed_skipped: usize,
}

pub(crate) async fn run(ctx: &RunCtx, request: &ReconstructionRequest) -> EngineResult<Outcome> {
    let started = Instant::now();
    let input_words = word_count(&request.text);

    let parsed = parse_positions(&request.text)?;
    let total = parsed.positions.len();
    ctx.sessions.set_total_chunks(&ctx.session_id, total).await;

    if parsed.malformed_skipped > 0 {
        tracing::warn!(
            session_id = %ctx.session_id,
            skipped = parsed.malformed_skipped,
            "Skipped malformed position lines"
        );
    }

    let instructions = if request.instructions().is_empty() {
        "Rewrite each position more clearly."
    } else {
        request.instructions()
    };
    let system = render(
        &ctx.prompts.position_system,
        &[("domain", &domain_clause(request.domain()))],
    );
    let total_str = total.to_string();

    let mut output_lines: Vec<String> = Vec::new();
    let mut processed = 0usize;
    let mut selected = 0usize;

    for (index, line) in parsed.positions.iter().enumerate() {
        if ctx.is_cancelled() {
            let mut outcome = ctx
                .aborted_outcome(StrategyKind::PositionList, input_words, started)
                .await;
            outcome.positions = Some(PositionReport {
                total_positions: total,
                positions_processed: processed,
                positions_selected: selected,
                malformed_skipped: parsed.malformed_skipped,
            });
            return Ok(outcome);
        }

        let user = render(
            &ctx.prompts.position_user,
            &[
                ("instructions", instructions),
                ("index", &(index + 1).to_string()),
                ("total", &total_str),
                ("line", line),
            ],
        );

        // One call per position, fail-fast like the other single-pass
        // strategies.
        let response = ctx.provider.complete(&system, &user, &ctx.options).await?;
        processed += 1;

        let transformed = response.trim();
        if transformed.eq_ignore_ascii_case("SKIP") {
            continue;
        }
        selected += 1;
        ctx.sessions
            .record_chunk(&ctx.session_id, index, transformed)
            .await;
        output_lines.push(transformed.to_string());

        ctx.emit(ProgressEvent::Progress(ProgressUpdate {
            session_id: ctx.session_id.clone(),
            chunk_index: index,
            total_chunks: total,
            cumulative_word_count: output_lines.iter().map(|l| word_count(l)).sum(),
            progress: (index + 1) as f32 / total.max(1) as f32,
            section_title: None,
            partial_text: None,
        }))
        .await;
    }

    let mut outcome = Outcome::new(
        &ctx.session_id,
        StrategyKind::PositionList,
        output_lines.join("\n"),
        input_words,
        started,
    );
    outcome.positions = Some(PositionReport {
        total_positions: total,
        positions_processed: processed,
        positions_selected: selected,
        malformed_skipped: parsed.malformed_skipped,
    });
    Ok(outcome)
}

/// Collect well-formed position lines, counting the malformed ones.
fn parse_positions(text: &str) -> Result<ParsedList<'_>, EngineError> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let canonical = lines
        .iter()
        .map(|l| field_count(l))
        .find(|&count| count >= 2)
        .ok_or_else(|| EngineError::InvalidInput("no pipe-delimited positions found".into()))?;

    let mut positions = Vec::new();
    let mut malformed_skipped = 0usize;
    for line in lines {
        if field_count(line) == canonical {
            positions.push(line);
        } else {
            malformed_skipped += 1;
        }
    }

    if positions.is_empty() {
        return Err(EngineError::InvalidInput(
            "position list had no well-formed lines".into(),
        ));
    }
    Ok(ParsedList {
        positions,
        malformed_skipped,
    })
}

fn field_count(line: &str) -> usize {
    line.split('|').filter(|f| !f.trim().is_empty()).count()
}
