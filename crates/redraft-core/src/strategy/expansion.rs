//! Universal expansion: generate sections until a target word count is
//! reached.
//!
//! The target comes from the instructions (explicit count or percentage
//! multiplier) or falls back to a configured default for small inputs.
//! Section generation is bounded at twice the estimated section count; if
//! the provider cannot be coerced past the target within that budget the
//! run terminates and reports the shortfall as a successful completion,
//! never an error and never an unbounded loop.

use std::time::Instant;

use crate::error::EngineResult;
use crate::prompts::{domain_clause, render};
use crate::provider::TextProvider;
use crate::session::{ProgressEvent, ProgressUpdate};
use crate::text::{word_count, ExpansionDirective};

use super::{
    call_with_retry, Outcome, ReconstructionRequest, RunCtx, StrategyKind, RETRIES_PER_UNIT,
};

pub(crate) async fn run(
    ctx: &RunCtx,
    request: &ReconstructionRequest,
    directive: Option<ExpansionDirective>,
) -> EngineResult<Outcome> {
    let started = Instant::now();
    let input_words = word_count(&request.text);

    let target = resolve_target(directive, input_words, &ctx.thresholds);
    let estimate = target
        .div_ceil(ctx.thresholds.expansion_section_words)
        .max(1);
    let max_attempts = estimate * 2;
    ctx.sessions.set_total_chunks(&ctx.session_id, estimate).await;

    tracing::info!(
        session_id = %ctx.session_id,
        target_words = target,
        estimated_sections = estimate,
        "Starting expansion"
    );

    let system = render(
        &ctx.prompts.expansion_system,
        &[("domain", &domain_clause(request.domain()))],
    );
    let section_words = ctx.thresholds.expansion_section_words.to_string();
    let target_str = target.to_string();

    let mut titles: Vec<String> = Vec::new();
    let mut sections: Vec<String> = Vec::new();
    let mut cumulative = 0usize;
    let mut attempts = 0usize;

    while cumulative < target && attempts < max_attempts {
        if ctx.is_cancelled() {
            let mut outcome = ctx
                .aborted_outcome(StrategyKind::UniversalExpansion, input_words, started)
                .await;
            outcome.sections_generated = Some(sections.len());
            outcome.target_word_count = Some(target);
            return Ok(outcome);
        }
        attempts += 1;

        let sections_so_far = if titles.is_empty() {
            "none yet".to_string()
        } else {
            titles.join("; ")
        };
        let user = render(
            &ctx.prompts.expansion_user,
            &[
                ("text", &request.text),
                ("instructions", request.instructions()),
                ("target_words", &target_str),
                ("sections_so_far", &sections_so_far),
                ("remaining_words", &target.saturating_sub(cumulative).to_string()),
                ("section_words", &section_words),
            ],
        );

        let index = sections.len();
        let response = call_with_retry(&format!("section {}", index), RETRIES_PER_UNIT, || {
            ctx.provider.complete(&system, &user, &ctx.options)
        })
        .await?;

        let (title, content) = parse_section(&response, index);
        let words = word_count(&content);
        if words == 0 {
            tracing::warn!(
                session_id = %ctx.session_id,
                attempt = attempts,
                "Provider returned an empty section"
            );
            continue;
        }

        cumulative += words;
        ctx.sessions
            .record_chunk(&ctx.session_id, index, &content)
            .await;
        ctx.emit(ProgressEvent::Progress(ProgressUpdate {
            session_id: ctx.session_id.clone(),
            chunk_index: index,
            total_chunks: estimate,
            cumulative_word_count: cumulative,
            progress: (cumulative as f32 / target as f32).min(1.0),
            section_title: Some(title.clone()),
            partial_text: Some(content.clone()),
        }))
        .await;

        titles.push(title);
        sections.push(content);
    }

    let shortfall = cumulative < target;
    if shortfall {
        tracing::warn!(
            session_id = %ctx.session_id,
            cumulative_words = cumulative,
            target_words = target,
            attempts,
            "Expansion stopped short of target"
        );
    }

    let output = titles
        .iter()
        .zip(&sections)
        .map(|(title, content)| format!("## {}\n\n{}", title, content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut outcome = Outcome::new(
        &ctx.session_id,
        StrategyKind::UniversalExpansion,
        output,
        input_words,
        started,
    );
    outcome.sections_generated = Some(sections.len());
    outcome.target_word_count = Some(target);
    outcome.shortfall = Some(shortfall);
    Ok(outcome)
}

/// Resolve the concrete target word count.
///
/// Percentages up to 100 are read as growth ("increase by 50%" means half
/// again); larger ones as the target ratio ("increase by 150%" means 1.5x).
fn resolve_target(
    directive: Option<ExpansionDirective>,
    input_words: usize,
    thresholds: &crate::config::StrategyThresholds,
) -> usize {
    if let Some(directive) = directive {
        if let Some(target) = directive.target_words {
            return target;
        }
        if let Some(percent) = directive.multiplier {
            let factor = if percent <= 1.0 { 1.0 + percent } else { percent };
            return ((input_words as f64) * factor).round() as usize;
        }
    }
    if input_words < thresholds.expansion_small_input_words {
        thresholds.expansion_default_target_words
    } else {
        input_words * 2
    }
}

/// Split a section completion into its heading and body.
fn parse_section(response: &str, index: usize) -> (String, String) {
    let trimmed = response.trim();
    if let Some(rest) = trimmed.strip_prefix("##") {
        if let Some((title_line, body)) = rest.split_once('\n') {
            let title = title_line.trim_start_matches('#').trim();
            if !title.is_empty() {
                return (title.to_string(), body.trim().to_string());
            }
        }
    }
    (format!("Section {}", index + 1), trimmed.to_string())
}
