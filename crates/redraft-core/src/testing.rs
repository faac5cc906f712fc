//! Scripted provider and context builders shared by strategy tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::StrategyThresholds;
use crate::error::ProviderError;
use crate::prompts::PromptSet;
use crate::provider::{CompletionOptions, TextProvider};
use crate::session::{ProgressEvent, SessionRegistry};
use crate::store::MemoryStore;
use crate::strategy::RunCtx;

/// A provider that replays a fixed script of responses.
///
/// Each call consumes one scripted result; once the script is exhausted the
/// provider falls back to the `repeat` response if one was set, otherwise it
/// reports `Unavailable`.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    repeat: Option<String>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self::with_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn repeating(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_results(results: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn next(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .await
            .push((system.to_string(), prompt.to_string()));

        if let Some(result) = self.script.lock().await.pop_front() {
            return result;
        }
        match &self.repeat {
            Some(response) => Ok(response.clone()),
            None => Err(ProviderError::Unavailable("script exhausted".into())),
        }
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        self.next(system, prompt).await
    }

    async fn complete_streaming(
        &self,
        system: &str,
        prompt: &str,
        _options: &CompletionOptions,
        on_token: mpsc::Sender<String>,
        _cancel: CancellationToken,
    ) -> Result<String, ProviderError> {
        let text = self.next(system, prompt).await?;
        let _ = on_token.send(text.clone()).await;
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }
}

pub(crate) const TEST_SESSION: &str = "test-session";

/// A ready-to-run context over a fresh registry and in-memory store.
pub(crate) async fn test_ctx(provider: Arc<dyn TextProvider>) -> RunCtx {
    let sessions = SessionRegistry::new();
    let cancel = sessions.start(TEST_SESSION).await;
    RunCtx {
        provider,
        store: Arc::new(MemoryStore::new()),
        sessions,
        prompts: Arc::new(PromptSet::default()),
        thresholds: StrategyThresholds::default(),
        options: CompletionOptions::default(),
        session_id: TEST_SESSION.to_string(),
        events: None,
        cancel,
    }
}

/// Like [`test_ctx`] but with an event channel attached.
pub(crate) async fn test_ctx_with_events(
    provider: Arc<dyn TextProvider>,
) -> (RunCtx, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(256);
    let mut ctx = test_ctx(provider).await;
    ctx.events = Some(tx);
    (ctx, rx)
}

/// Drain every event currently buffered on the receiver.
pub(crate) fn drain_events(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
