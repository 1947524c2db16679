//! Streaming types for LLM responses

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::{ChatMessage, CompletionResponse, FinishReason, TokenUsage};
use crate::agents::error::LlmError;

/// A chunk of streamed LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Delta content (text being generated)
    #[serde(default)]
    pub content: String,
    /// Finish reason; set only on the end-of-stream chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Token usage (usually only in final chunk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// Create a text content chunk
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Create the end-of-stream chunk
    pub fn finish(reason: FinishReason, usage: Option<TokenUsage>) -> Self {
        Self {
            content: String::new(),
            finish_reason: Some(reason),
            usage,
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Streaming response from an LLM provider.
///
/// The stream is finite and cannot be restarted: once the end-of-stream
/// chunk (or an error) has been yielded, a new provider call is required.
/// Dropping it closes the channel, which the producing task observes through
/// [`LlmStreamSender::closed`] and uses to abandon the upstream request.
pub struct LlmStream {
    receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>,
}

impl LlmStream {
    /// Create a channel pair for building an LLM stream
    pub fn channel(buffer: usize) -> (LlmStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (LlmStreamSender { sender: tx }, Self { receiver: rx })
    }

    /// Collect all chunks into a complete response
    pub async fn collect(mut self) -> Result<CompletionResponse, LlmError> {
        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(result) = self.receiver.recv().await {
            let chunk = result?;
            content.push_str(&chunk.content);

            if let Some(reason) = chunk.finish_reason {
                finish_reason = Some(reason);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        let finish_reason = finish_reason
            .ok_or_else(|| LlmError::Streaming("stream ended without completion".to_string()))?;

        Ok(CompletionResponse {
            message: ChatMessage::assistant(content),
            finish_reason,
            usage,
        })
    }
}

impl Stream for LlmStream {
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Sender half for building an LLM stream
#[derive(Clone)]
pub struct LlmStreamSender {
    sender: mpsc::Sender<Result<StreamChunk, LlmError>>,
}

type SendResult = Result<(), mpsc::error::SendError<Result<StreamChunk, LlmError>>>;

impl LlmStreamSender {
    pub async fn send(&self, chunk: StreamChunk) -> SendResult {
        self.sender.send(Ok(chunk)).await
    }

    pub async fn send_error(&self, error: LlmError) -> SendResult {
        self.sender.send(Err(error)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> SendResult {
        self.send(StreamChunk::text(text)).await
    }

    pub async fn send_finish(&self, reason: FinishReason, usage: Option<TokenUsage>) -> SendResult {
        self.send(StreamChunk::finish(reason, usage)).await
    }

    /// Resolves once the receiving [`LlmStream`] has been dropped
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_collect_concatenates_chunks() {
        let (sender, stream) = LlmStream::channel(8);
        tokio::spawn(async move {
            let _ = sender.send_text("Hello").await;
            let _ = sender.send_text(", world").await;
            let _ = sender.send_finish(FinishReason::Stop, None).await;
        });

        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content, "Hello, world");
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_collect_without_finish_is_an_error() {
        let (sender, stream) = LlmStream::channel(8);
        tokio::spawn(async move {
            let _ = sender.send_text("partial").await;
        });

        assert!(matches!(stream.collect().await, Err(LlmError::Streaming(_))));
    }

    #[tokio::test]
    async fn test_dropping_stream_signals_sender() {
        let (sender, mut stream) = LlmStream::channel(1);
        let producer = tokio::spawn(async move {
            let _ = sender.send_text("first").await;
            sender.closed().await;
        });

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "first");
        drop(stream);

        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should observe the dropped stream")
            .unwrap();
    }
}
