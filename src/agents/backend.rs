//! Backend adapter
//!
//! Uniform `complete` / `stream` contract over an [`LlmProvider`]. Every call
//! carries the agent's system prompt and feeds token usage into the metrics
//! and the telemetry window. Upstream error detail stops here: it is logged,
//! and callers only see the classified [`AgentError`].

use futures::Stream;
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::llm::{CompletionRequest, LlmProvider, LlmStream, ModelInfo, TokenUsage};
use crate::agents::telemetry::TelemetryWindow;

/// ~4 characters per token, used when the backend reports no usage
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars / 4).max(1) as u64
}

#[derive(Clone)]
struct Accounting {
    metrics: Arc<MetricsCollector>,
    telemetry: Arc<TelemetryWindow>,
}

impl Accounting {
    fn record(&self, usage: Option<&TokenUsage>, prompt_chars: usize, completion_chars: usize) {
        let usage = match usage {
            Some(usage) if usage.total_tokens() > 0 => usage.clone(),
            _ => TokenUsage {
                prompt_tokens: estimate_tokens(prompt_chars),
                completion_tokens: estimate_tokens(completion_chars),
                ..Default::default()
            },
        };
        self.metrics.prompt_tokens_total.inc_by(usage.prompt_tokens);
        self.metrics.eval_tokens_total.inc_by(usage.completion_tokens);
        self.telemetry.record_usage(&usage);
    }
}

pub struct BackendAdapter {
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
    accounting: Accounting,
    model_info: RwLock<ModelInfo>,
}

impl BackendAdapter {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        system_prompt: String,
        metrics: Arc<MetricsCollector>,
        telemetry: Arc<TelemetryWindow>,
    ) -> Self {
        Self {
            provider,
            system_prompt,
            accounting: Accounting { metrics, telemetry },
            model_info: RwLock::new(ModelInfo::default()),
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn telemetry(&self) -> &TelemetryWindow {
        &self.accounting.telemetry
    }

    pub fn model_info(&self) -> ModelInfo {
        self.model_info.read().clone()
    }

    /// Query the backend for context length and capabilities. Failures keep
    /// the defaults.
    pub async fn refresh_model_info(&self) -> ModelInfo {
        match self.provider.model_info().await {
            Ok(info) => {
                tracing::info!(
                    model = self.provider.model(),
                    context_length = info.context_length,
                    "model info loaded"
                );
                *self.model_info.write() = info.clone();
                info
            }
            Err(e) => {
                tracing::warn!(model = self.provider.model(), "model info unavailable: {}", e);
                self.model_info()
            }
        }
    }

    fn request(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest::prompt(Some(&self.system_prompt), prompt)
    }

    /// Blocking call, bounded by the backend request timeout
    pub async fn complete(&self, prompt: &str) -> AgentResult<String> {
        self.accounting.metrics.backend_calls_total.inc();
        let request = self.request(prompt);
        let prompt_chars = request.prompt_chars();

        match self.provider.complete(request).await {
            Ok(response) => {
                let content = response.message.content;
                self.accounting
                    .record(response.usage.as_ref(), prompt_chars, content.len());
                Ok(content)
            }
            Err(e) => {
                tracing::error!(
                    provider = self.provider.name(),
                    model = self.provider.model(),
                    "backend call failed: {}",
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Incremental call. The returned stream ends after the last token;
    /// dropping it cancels the backend request.
    pub fn stream(&self, prompt: &str) -> TokenStream {
        self.accounting.metrics.backend_calls_total.inc();
        let request = self.request(prompt);
        let prompt_chars = request.prompt_chars();
        TokenStream {
            inner: self.provider.complete_stream(request),
            accounting: self.accounting.clone(),
            prompt_chars,
            completion_chars: 0,
            done: false,
        }
    }
}

/// Finite, non-restartable sequence of generated tokens
pub struct TokenStream {
    inner: LlmStream,
    accounting: Accounting,
    prompt_chars: usize,
    completion_chars: usize,
    done: bool,
}

impl Stream for TokenStream {
    type Item = AgentResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_final() {
                        self.done = true;
                        self.completion_chars += chunk.content.len();
                        let this = &*self;
                        this.accounting.record(
                            chunk.usage.as_ref(),
                            this.prompt_chars,
                            this.completion_chars,
                        );
                        if chunk.has_content() {
                            return Poll::Ready(Some(Ok(chunk.content)));
                        }
                        return Poll::Ready(None);
                    }
                    if chunk.has_content() {
                        self.completion_chars += chunk.content.len();
                        return Poll::Ready(Some(Ok(chunk.content)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    tracing::error!("backend stream failed: {}", e);
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    tracing::error!("backend stream closed without completion");
                    return Poll::Ready(Some(Err(AgentError::BackendUnavailable(
                        "stream closed without completion".to_string(),
                    ))));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::error::{LlmError, LlmResult};
    use crate::agents::llm::{ChatMessage, CompletionResponse, FinishReason, StreamChunk};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct FixedProvider {
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "fixed:1b"
        }

        async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
            if self.fail {
                return Err(LlmError::Api {
                    status: 500,
                    message: "gpu on fire".into(),
                });
            }
            assert_eq!(request.messages.len(), 2);
            Ok(CompletionResponse {
                message: ChatMessage::assistant("pong"),
                finish_reason: FinishReason::Stop,
                usage: None,
            })
        }

        fn complete_stream(&self, _request: CompletionRequest) -> LlmStream {
            let (sender, stream) = LlmStream::channel(8);
            let fail = self.fail;
            tokio::spawn(async move {
                let _ = sender.send_text("po").await;
                if fail {
                    let _ = sender.send_error(LlmError::Timeout).await;
                    return;
                }
                let _ = sender.send_text("ng").await;
                let usage = TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 2,
                    prompt_eval_duration_ns: None,
                    eval_duration_ns: Some(1_000_000_000),
                };
                let _ = sender.send_finish(FinishReason::Stop, Some(usage)).await;
            });
            stream
        }
    }

    /// Puts the whole reply into the end-of-stream chunk and reports no usage
    struct TailProvider;

    #[async_trait]
    impl LlmProvider for TailProvider {
        fn name(&self) -> &str {
            "tail"
        }

        fn model(&self) -> &str {
            "tail:1b"
        }

        async fn complete(&self, _request: CompletionRequest) -> LlmResult<CompletionResponse> {
            Err(LlmError::Timeout)
        }

        fn complete_stream(&self, _request: CompletionRequest) -> LlmStream {
            let (sender, stream) = LlmStream::channel(8);
            tokio::spawn(async move {
                let mut last = StreamChunk::finish(FinishReason::Stop, None);
                last.content = "x".repeat(40);
                let _ = sender.send(last).await;
            });
            stream
        }
    }

    fn adapter(fail: bool) -> (BackendAdapter, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let adapter = BackendAdapter::new(
            Arc::new(FixedProvider { fail }),
            "system".into(),
            metrics.clone(),
            Arc::new(TelemetryWindow::new()),
        );
        (adapter, metrics)
    }

    #[tokio::test]
    async fn test_complete_estimates_missing_usage() {
        let (adapter, metrics) = adapter(false);
        assert_eq!(adapter.complete("ping").await.unwrap(), "pong");
        assert_eq!(metrics.backend_calls_total.get(), 1);
        assert_eq!(metrics.eval_tokens_total.get(), 1);
        assert_eq!(metrics.prompt_tokens_total.get(), 2);
    }

    #[tokio::test]
    async fn test_complete_error_is_classified() {
        let (adapter, _) = adapter(true);
        let err = adapter.complete("ping").await.unwrap_err();
        assert!(matches!(err, AgentError::BackendError(_)));
        assert!(!err.public_message().contains("gpu"));
    }

    #[tokio::test]
    async fn test_stream_yields_tokens_and_records_usage() {
        let (adapter, metrics) = adapter(false);
        let tokens: Vec<String> = adapter
            .stream("ping")
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["po", "ng"]);
        assert_eq!(metrics.eval_tokens_total.get(), 2);
        assert_eq!(adapter.telemetry().stats().samples, 1);
    }

    #[tokio::test]
    async fn test_stream_error_ends_stream() {
        let (adapter, _) = adapter(true);
        let items: Vec<AgentResult<String>> = adapter.stream("ping").collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(AgentError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_stream_estimate_counts_final_chunk_content() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let adapter = BackendAdapter::new(
            Arc::new(TailProvider),
            "system".into(),
            metrics.clone(),
            Arc::new(TelemetryWindow::new()),
        );

        let tokens: Vec<String> = adapter
            .stream("ping")
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["x".repeat(40)]);
        assert_eq!(metrics.eval_tokens_total.get(), 10);
    }
}
