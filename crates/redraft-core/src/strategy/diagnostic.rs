//! Diagnostic reconstruction: classify the argumentative defect, then
//! repair only what was diagnosed.
//!
//! Diagnosis and repair come back in the same completion to save a round
//! trip; the response contract is a `DIAGNOSIS: <label>` line followed by
//! the repaired text. Conservative fidelity repairs the single most salient
//! defect; aggressive repairs every defect found.

use std::time::Instant;

use serde::Serialize;

use crate::error::{EngineResult, ProviderError};
use crate::prompts::{domain_clause, render};
use crate::provider::TextProvider;
use crate::text::word_count;

use super::{Fidelity, Outcome, ReconstructionRequest, RunCtx, StrategyKind};

/// The defect classes the provider may diagnose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Defect {
    VagueClaim,
    WeakArgument,
    FalseClaim,
    ObscureButSound,
    NeedsEmpiricalSupport,
    Elliptical,
}

impl Defect {
    pub const ALL: [Defect; 6] = [
        Defect::VagueClaim,
        Defect::WeakArgument,
        Defect::FalseClaim,
        Defect::ObscureButSound,
        Defect::NeedsEmpiricalSupport,
        Defect::Elliptical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Defect::VagueClaim => "vague-claim",
            Defect::WeakArgument => "weak-argument",
            Defect::FalseClaim => "false-claim",
            Defect::ObscureButSound => "obscure-but-sound",
            Defect::NeedsEmpiricalSupport => "needs-empirical-support",
            Defect::Elliptical => "elliptical",
        }
    }

    fn parse(label: &str) -> Option<Defect> {
        let label = label.trim().to_lowercase();
        Defect::ALL.into_iter().find(|d| label.contains(d.as_str()))
    }
}

pub(crate) async fn run(ctx: &RunCtx, request: &ReconstructionRequest) -> EngineResult<Outcome> {
    let started = Instant::now();
    let input_words = word_count(&request.text);

    let system = render(
        &ctx.prompts.diagnostic_system,
        &[("domain", &domain_clause(request.domain()))],
    );
    let template = match request.fidelity {
        Fidelity::Conservative => &ctx.prompts.diagnostic_conservative,
        Fidelity::Aggressive => &ctx.prompts.diagnostic_aggressive,
    };
    let user = render(template, &[("text", &request.text)]);

    // Single call; any provider error fails the job immediately.
    let response = ctx.provider.complete(&system, &user, &ctx.options).await?;
    let (defect, repaired) = parse_response(&response)?;

    if repaired.trim() == request.text.trim() {
        return Err(ProviderError::MalformedResponse(
            "repair returned the input unchanged".into(),
        )
        .into());
    }

    ctx.sessions
        .record_chunk(&ctx.session_id, 0, &repaired)
        .await;

    tracing::info!(
        session_id = %ctx.session_id,
        diagnosis = defect.as_str(),
        fidelity = ?request.fidelity,
        "Diagnostic reconstruction complete"
    );

    let mut outcome = Outcome::new(
        &ctx.session_id,
        StrategyKind::DiagnosticReconstruction,
        repaired,
        input_words,
        started,
    );
    outcome.diagnosis = Some(defect.as_str().to_string());
    Ok(outcome)
}

/// Split a completion into the diagnosis label and the repaired text.
fn parse_response(response: &str) -> Result<(Defect, String), ProviderError> {
    let marker = response
        .find("DIAGNOSIS:")
        .map(|i| i + "DIAGNOSIS:".len())
        .or_else(|| response.find("Diagnosis:").map(|i| i + "Diagnosis:".len()))
        .ok_or_else(|| {
            ProviderError::MalformedResponse("no recognizable diagnosis label in response".into())
        })?;

    let after = &response[marker..];
    let (label_line, body) = after.split_once('\n').unwrap_or((after, ""));

    let defect = Defect::parse(label_line).ok_or_else(|| {
        ProviderError::MalformedResponse(format!("unknown diagnosis label: {}", label_line.trim()))
    })?;

    let repaired = body.trim().to_string();
    if repaired.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "diagnosis without repaired text".into(),
        ));
    }
    Ok((defect, repaired))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{test_ctx, ScriptedProvider};

    fn request(text: &str, fidelity: Fidelity) -> ReconstructionRequest {
        ReconstructionRequest {
            text: text.to_string(),
            custom_instructions: None,
            fidelity,
            target_domain: None,
        }
    }

    const INPUT: &str = "Paris is clearly the best city, as everyone knows.";

    #[tokio::test]
    async fn test_conservative_repair() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "DIAGNOSIS: vague-claim\n\nParis ranks highest on the 2023 livability index among European capitals.",
        ]));
        let ctx = test_ctx(provider.clone()).await;

        let outcome = run(&ctx, &request(INPUT, Fidelity::Conservative)).await.unwrap();

        assert_eq!(outcome.diagnosis.as_deref(), Some("vague-claim"));
        assert!(!outcome.output.is_empty());
        assert_ne!(outcome.output, INPUT);
        // Named entity from the source survives the repair.
        assert!(outcome.output.contains("Paris"));
        assert_eq!(provider.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_fidelity_selects_template() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "DIAGNOSIS: weak-argument\n\nrepaired",
        ]));
        let ctx = test_ctx(provider.clone()).await;

        run(&ctx, &request(INPUT, Fidelity::Aggressive)).await.unwrap();

        let calls = provider.calls.lock().await;
        assert!(calls[0].1.contains("every argumentative defect"));
    }

    #[tokio::test]
    async fn test_missing_diagnosis_is_malformed() {
        let provider = Arc::new(ScriptedProvider::new(vec!["just some text back"]));
        let ctx = test_ctx(provider).await;

        let err = run(&ctx, &request(INPUT, Fidelity::Conservative)).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn test_unchanged_output_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![format!(
            "DIAGNOSIS: elliptical\n\n{}",
            INPUT
        )]));
        let ctx = test_ctx(provider).await;

        assert!(run(&ctx, &request(INPUT, Fidelity::Conservative)).await.is_err());
    }

    #[test]
    fn test_parse_label_variants() {
        let (d, body) = parse_response("Diagnosis: needs-empirical-support\nfixed text").unwrap();
        assert_eq!(d, Defect::NeedsEmpiricalSupport);
        assert_eq!(body, "fixed text");
    }

    #[test]
    fn test_all_labels_parse() {
        for defect in Defect::ALL {
            assert_eq!(Defect::parse(defect.as_str()), Some(defect));
        }
    }
}
