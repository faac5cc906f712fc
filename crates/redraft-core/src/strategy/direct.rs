//! Direct-instruction strategy: one pass, obeying the writer's
//! instructions verbatim.
//!
//! When the job has an event channel attached, provider tokens are
//! forwarded as `progress` events with `partial_text` deltas so streaming
//! clients see the rewrite as it is generated.

use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::EngineResult;
use crate::prompts::{domain_clause, render};
use crate::provider::TextProvider;
use crate::session::{ProgressEvent, ProgressUpdate};
use crate::text::word_count;

use super::{Outcome, ReconstructionRequest, RunCtx, StrategyKind};

pub(crate) async fn run(ctx: &RunCtx, request: &ReconstructionRequest) -> EngineResult<Outcome> {
    let started = Instant::now();
    let input_words = word_count(&request.text);

    let system = render(
        &ctx.prompts.direct_system,
        &[("domain", &domain_clause(request.domain()))],
    );
    let user = render(
        &ctx.prompts.direct_user,
        &[
            ("instructions", request.instructions()),
            ("text", &request.text),
        ],
    );

    // Single call; any provider error fails the job immediately.
    let output = if let Some(events) = &ctx.events {
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let events = events.clone();
        let session_id = ctx.session_id.clone();
        let forwarder = tokio::spawn(async move {
            let mut cumulative = 0usize;
            while let Some(token) = token_rx.recv().await {
                cumulative += word_count(&token);
                let _ = events
                    .send(ProgressEvent::Progress(ProgressUpdate {
                        session_id: session_id.clone(),
                        chunk_index: 0,
                        total_chunks: 1,
                        cumulative_word_count: cumulative,
                        progress: 0.0,
                        section_title: None,
                        partial_text: Some(token),
                    }))
                    .await;
            }
        });

        let result = ctx
            .provider
            .complete_streaming(&system, &user, &ctx.options, token_tx, ctx.cancel.clone())
            .await;
        let _ = forwarder.await;
        result?
    } else {
        ctx.provider.complete(&system, &user, &ctx.options).await?
    };

    ctx.sessions
        .record_chunk(&ctx.session_id, 0, &output)
        .await;

    tracing::debug!(
        session_id = %ctx.session_id,
        output_words = word_count(&output),
        "Direct instruction pass complete"
    );

    Ok(Outcome::new(
        &ctx.session_id,
        StrategyKind::DirectInstruction,
        output,
        input_words,
        started,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{drain_events, test_ctx, test_ctx_with_events, ScriptedProvider};

    fn request(text: &str, instructions: &str) -> ReconstructionRequest {
        ReconstructionRequest {
            text: text.to_string(),
            custom_instructions: Some(instructions.to_string()),
            fidelity: Default::default(),
            target_domain: None,
        }
    }

    #[tokio::test]
    async fn test_single_call_with_instructions_in_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec!["A more formal rendition."]));
        let ctx = test_ctx(provider.clone()).await;

        let outcome = run(&ctx, &request("hey there", "make it formal")).await.unwrap();

        assert_eq!(outcome.mode, StrategyKind::DirectInstruction);
        assert_eq!(outcome.output, "A more formal rendition.");
        assert_eq!(provider.call_count().await, 1);

        let calls = provider.calls.lock().await;
        assert!(calls[0].1.contains("make it formal"));
        assert!(calls[0].1.contains("hey there"));
    }

    #[tokio::test]
    async fn test_streaming_forwards_text_deltas() {
        let provider = Arc::new(ScriptedProvider::new(vec!["streamed rewrite"]));
        let (ctx, mut rx) = test_ctx_with_events(provider).await;

        let outcome = run(&ctx, &request("text", "rewrite")).await.unwrap();
        assert_eq!(outcome.output, "streamed rewrite");

        let events = drain_events(&mut rx);
        let deltas: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress(p) => p.partial_text.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["streamed rewrite"]);
    }

    #[tokio::test]
    async fn test_provider_error_fails_fast() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![Err(
            crate::error::ProviderError::Unavailable("down".into()),
        )]));
        let ctx = test_ctx(provider.clone()).await;

        let result = run(&ctx, &request("text", "rewrite")).await;
        assert!(result.is_err());
        assert_eq!(provider.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_domain_reaches_system_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec!["out"]));
        let ctx = test_ctx(provider.clone()).await;

        let mut req = request("text", "rewrite");
        req.target_domain = Some("legal".to_string());
        run(&ctx, &req).await.unwrap();

        let calls = provider.calls.lock().await;
        assert!(calls[0].0.contains("legal"));
    }
}
