//! Ollama LLM Provider with streaming support

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, LlmStream,
    LlmStreamSender, ModelInfo, TokenUsage, DEFAULT_CONTEXT_LENGTH,
};
use crate::agents::error::{LlmError, LlmResult};
use crate::config::BackendSettings;

/// Ollama LLM Provider.
///
/// `base_url` is the API root (for example `http://localhost:11434/api`);
/// `/chat` and `/show` are resolved against it.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    stream_buffer: usize,
}

impl OllamaProvider {
    pub fn new(settings: &BackendSettings, model: &str) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            stream_buffer: settings.stream_buffer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": request.messages,
            "stream": stream,
        });

        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    async fn stream_completion(
        client: reqwest::Client,
        url: String,
        body: Value,
        sender: LlmStreamSender,
    ) -> LlmResult<()> {
        let response = client.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            // NDJSON: one JSON object per line, decoded only once the line is complete
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }

                let mut parsed: OllamaChatResponse = match serde_json::from_slice(&line) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unparsable stream line");
                        continue;
                    }
                };

                let content = parsed.message.take().map(|m| m.content).unwrap_or_default();
                if !content.is_empty() && sender.send_text(content).await.is_err() {
                    return Ok(());
                }

                if parsed.done {
                    let usage = parsed.usage();
                    let _ = sender.send_finish(parsed.finish_reason(), Some(usage)).await;
                    return Ok(());
                }
            }
        }

        Err(LlmError::Streaming(
            "backend closed the stream before completion".to_string(),
        ))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = self.request_body(&request, false);

        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        let content = ollama_response
            .message
            .as_ref()
            .map(|m| m.content.clone())
            .ok_or_else(|| LlmError::Parse("response carries no message".to_string()))?;

        Ok(CompletionResponse {
            message: ChatMessage::assistant(content),
            finish_reason: ollama_response.finish_reason(),
            usage: Some(ollama_response.usage()),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(self.stream_buffer);

        let client = self.client.clone();
        let url = format!("{}/chat", self.base_url);
        let body = self.request_body(&request, true);

        tokio::spawn(async move {
            // Dropping the consumer side abandons the upstream request
            tokio::select! {
                result = Self::stream_completion(client, url, body, sender.clone()) => {
                    if let Err(e) = result {
                        let _ = sender.send_error(e).await;
                    }
                }
                _ = sender.closed() => {
                    tracing::debug!("stream consumer gone, backend request cancelled");
                }
            }
        });

        stream
    }

    async fn model_info(&self) -> LlmResult<ModelInfo> {
        let response = self
            .client
            .post(format!("{}/show", self.base_url))
            .json(&json!({ "name": self.model }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let show: OllamaShowResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse model info: {}", e)))?;

        let context_length = show
            .model_info
            .iter()
            .find(|(key, _)| key.contains("context_length"))
            .and_then(|(_, value)| value.as_u64())
            .filter(|len| *len > 0)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH);

        Ok(ModelInfo {
            context_length,
            capabilities: show.capabilities,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
    prompt_eval_duration: Option<u64>,
    eval_duration: Option<u64>,
}

impl OllamaChatResponse {
    fn finish_reason(&self) -> FinishReason {
        match self.done_reason.as_deref() {
            Some("length") => FinishReason::Length,
            _ if !self.done => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
            prompt_eval_duration_ns: self.prompt_eval_duration,
            eval_duration_ns: self.eval_duration,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaShowResponse {
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    model_info: serde_json::Map<String, Value>,
}
