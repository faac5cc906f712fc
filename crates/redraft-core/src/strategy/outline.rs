//! Outline-first reconstruction.
//!
//! Two phases: extract a structural outline from the whole document, then
//! regenerate one section per key point while holding the outline fixed as
//! a shared constraint. Sections are issued sequentially in outline order,
//! so stitching is a plain in-order concatenation. Outline extraction
//! failure is fatal to the job; each section gets a bounded retry budget
//! before the whole job fails.

use std::time::Instant;

use serde::Deserialize;

use crate::error::{EngineResult, ProviderError};
use crate::prompts::{domain_clause, render};
use crate::provider::TextProvider;
use crate::session::{ProgressEvent, ProgressUpdate};
use crate::text::word_count;

use super::{
    call_with_retry, extract_json, Outcome, ReconstructionRequest, RunCtx, StrategyKind,
    RETRIES_PER_UNIT,
};

/// Structural skeleton extracted once per job; read-only input to every
/// section regeneration call.
#[derive(Debug, Clone, Deserialize)]
pub struct Outline {
    pub thesis: String,
    pub key_points: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

pub(crate) async fn run(ctx: &RunCtx, request: &ReconstructionRequest) -> EngineResult<Outcome> {
    let started = Instant::now();
    let input_words = word_count(&request.text);
    let domain = domain_clause(request.domain());

    // Phase 1: no outline, no sections to regenerate.
    let extract_system = render(&ctx.prompts.outline_extract_system, &[("domain", &domain)]);
    let extract_user = render(&ctx.prompts.outline_extract_user, &[("text", &request.text)]);
    let outline = call_with_retry("outline", RETRIES_PER_UNIT, || async {
        let response = ctx
            .provider
            .complete(&extract_system, &extract_user, &ctx.options)
            .await?;
        parse_outline(&response)
    })
    .await?;

    let total = outline.key_points.len();
    ctx.sessions.set_total_chunks(&ctx.session_id, total).await;
    tracing::info!(
        session_id = %ctx.session_id,
        key_points = total,
        "Outline extracted"
    );

    let regions = split_regions(&request.text, total);
    let section_system = render(&ctx.prompts.outline_section_system, &[("domain", &domain)]);
    let key_points_joined = outline.key_points.join("; ");
    let key_terms_joined = outline.key_terms.join(", ");
    let constraints_joined = outline.constraints.join("; ");

    // Phase 2: sections in outline order.
    let mut sections: Vec<String> = Vec::with_capacity(total);
    let mut cumulative = 0usize;
    for (index, point) in outline.key_points.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(ctx
                .aborted_outcome(StrategyKind::OutlineFirst, input_words, started)
                .await);
        }

        let section_user = render(
            &ctx.prompts.outline_section_user,
            &[
                ("thesis", outline.thesis.as_str()),
                ("key_points", &key_points_joined),
                ("key_terms", &key_terms_joined),
                ("constraints", &constraints_joined),
                ("section_title", point),
                (
                    "section_source",
                    regions.get(index).map(String::as_str).unwrap_or(""),
                ),
            ],
        );
        let section = call_with_retry(&format!("section {}", index), RETRIES_PER_UNIT, || {
            ctx.provider
                .complete(&section_system, &section_user, &ctx.options)
        })
        .await?;

        cumulative += word_count(&section);
        ctx.sessions
            .record_chunk(&ctx.session_id, index, &section)
            .await;
        ctx.emit(ProgressEvent::Progress(ProgressUpdate {
            session_id: ctx.session_id.clone(),
            chunk_index: index,
            total_chunks: total,
            cumulative_word_count: cumulative,
            progress: (index + 1) as f32 / total as f32,
            section_title: Some(point.clone()),
            partial_text: None,
        }))
        .await;
        sections.push(section);
    }

    // Stitch: one blank line between sections, no further provider call.
    let output = sections.join("\n\n");
    let mut outcome = Outcome::new(
        &ctx.session_id,
        StrategyKind::OutlineFirst,
        output,
        input_words,
        started,
    );
    outcome.sections_generated = Some(total);
    Ok(outcome)
}

fn parse_outline(response: &str) -> Result<Outline, ProviderError> {
    let json = extract_json(response).ok_or_else(|| {
        ProviderError::MalformedResponse("no JSON object in outline response".into())
    })?;
    let outline: Outline = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedResponse(format!("outline did not parse: {}", e)))?;
    if outline.key_points.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "outline has no key points".into(),
        ));
    }
    Ok(outline)
}

/// Split the source into `n` contiguous regions of roughly equal word
/// count, so each section call sees the part of the document its key point
/// came from. Paragraph boundaries are preferred; documents with fewer
/// paragraphs than sections fall back to plain word slices.
fn split_regions(text: &str, n: usize) -> Vec<String> {
    if n <= 1 {
        return vec![text.to_string()];
    }

    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.len() < n {
        let words: Vec<&str> = text.split_whitespace().collect();
        let per = words.len().div_ceil(n).max(1);
        let mut regions: Vec<String> = words.chunks(per).map(|c| c.join(" ")).collect();
        regions.resize(n, String::new());
        return regions;
    }

    let total: usize = paragraphs.iter().map(|p| word_count(p)).sum();
    let mut regions: Vec<String> = Vec::with_capacity(n);
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffer_words = 0usize;
    let mut remaining = total;

    for (index, paragraph) in paragraphs.iter().enumerate() {
        let words = word_count(paragraph);
        buffer.push(paragraph);
        buffer_words += words;
        remaining -= words;

        let groups_left = n - regions.len();
        let paragraphs_left = paragraphs.len() - index - 1;
        let share = (buffer_words + remaining) / groups_left.max(1);
        if groups_left > 1 && buffer_words >= share.max(1) && paragraphs_left >= groups_left - 1 {
            regions.push(buffer.join("\n\n"));
            buffer.clear();
            buffer_words = 0;
        }
    }
    if !buffer.is_empty() {
        regions.push(buffer.join("\n\n"));
    }
    regions.resize(n, String::new());
    regions
}
