#![allow(dead_code)]

use agent_mesh::adapters::metrics_handler::MetricsCollector;
use agent_mesh::agents::llm::{
    ChatRole, CompletionRequest, CompletionResponse, ChatMessage, FinishReason, LlmProvider,
    LlmStream, TokenUsage,
};
use agent_mesh::agents::{LlmError, LlmResult};
use agent_mesh::config::Settings;
use agent_mesh::AgentRuntime;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Base URL of a port nothing listens on
pub const DEAD_URL: &str = "http://127.0.0.1:1";

/// Backend double answering from a fixed script. The first rule whose key
/// occurs in the prompt wins, otherwise the fallback reply is used.
pub struct ScriptedProvider {
    rules: Vec<(String, String)>,
    fallback: String,
    fail: bool,
    fail_on: Option<String>,
    endless: bool,
    token_delay: Duration,
    prompts: Mutex<Vec<String>>,
    cancelled: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(fallback: &str) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.to_string(),
            fail: false,
            fail_on: None,
            endless: false,
            token_delay: Duration::from_millis(1),
            prompts: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn on(mut self, key: &str, reply: &str) -> Self {
        self.rules.push((key.to_string(), reply.to_string()));
        self
    }

    /// Every call fails as if the backend were down
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Calls whose prompt contains `key` fail, the others are answered
    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_on = Some(key.to_string());
        self
    }

    /// Streams never finish on their own
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Set once a stream producer noticed its consumer went away
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn take_prompt(&self, request: &CompletionRequest) -> String {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().push(prompt.clone());
        prompt
    }

    fn should_fail(&self, prompt: &str) -> bool {
        self.fail || self.fail_on.as_deref().is_some_and(|key| prompt.contains(key))
    }

    fn reply_for(&self, prompt: &str) -> String {
        self.rules
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn usage() -> TokenUsage {
    TokenUsage {
        prompt_tokens: 12,
        completion_tokens: 8,
        prompt_eval_duration_ns: Some(10_000_000),
        eval_duration_ns: Some(100_000_000),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let prompt = self.take_prompt(&request);
        if self.should_fail(&prompt) {
            return Err(LlmError::Network("connection refused".to_string()));
        }
        Ok(CompletionResponse {
            message: ChatMessage::assistant(self.reply_for(&prompt)),
            finish_reason: FinishReason::Stop,
            usage: Some(usage()),
        })
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let prompt = self.take_prompt(&request);
        let (sender, stream) = LlmStream::channel(4);

        if self.should_fail(&prompt) {
            tokio::spawn(async move {
                let _ = sender
                    .send_error(LlmError::Network("connection refused".to_string()))
                    .await;
            });
            return stream;
        }

        let tokens: Vec<String> = self
            .reply_for(&prompt)
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let endless = self.endless;
        let delay = self.token_delay;
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            let mut next = 0;
            loop {
                let token = match tokens.get(next) {
                    Some(token) => token.clone(),
                    None if endless => "tick ".to_string(),
                    None => break,
                };
                next += 1;

                tokio::select! {
                    _ = sender.closed() => {
                        cancelled.store(true, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                if sender.send_text(token).await.is_err() {
                    cancelled.store(true, Ordering::SeqCst);
                    return;
                }
            }
            let _ = sender.send_finish(FinishReason::Stop, Some(usage())).await;
        });

        stream
    }
}

/// Settings whose roster points every agent at [`DEAD_URL`] except the
/// ones given explicitly
pub fn settings_with_urls(urls: &[(&str, String)]) -> Settings {
    let mut settings = Settings::default();
    for agent in &mut settings.agents {
        let url = urls
            .iter()
            .find(|(name, _)| *name == agent.name)
            .map(|(_, url)| url.clone())
            .unwrap_or_else(|| DEAD_URL.to_string());
        agent.url = Some(url);
    }
    settings
}

/// Runtime with every sibling unreachable, for in-process `oneshot` tests
pub fn runtime(agent: &str, provider: Arc<ScriptedProvider>) -> AgentRuntime {
    runtime_with(settings_with_urls(&[]), agent, provider)
}

pub fn runtime_with(settings: Settings, agent: &str, provider: Arc<ScriptedProvider>) -> AgentRuntime {
    AgentRuntime::new(settings, agent, provider).unwrap()
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub metrics: Arc<MetricsCollector>,
}

impl TestServer {
    /// Reserve a local port; the URL is known before the runtime is built
    pub async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("http://{}", addr))
    }

    pub async fn serve(listener: TcpListener, runtime: AgentRuntime) -> Self {
        let addr = listener.local_addr().unwrap();
        let metrics = runtime.metrics.clone();
        let app = runtime.app();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            base_url: format!("http://{}", addr),
            metrics,
        }
    }

    /// Single agent with every sibling unreachable
    pub async fn start(agent: &str, provider: Arc<ScriptedProvider>) -> Self {
        let (listener, _) = Self::bind().await;
        Self::serve(listener, runtime(agent, provider)).await
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Several agents served side by side, each knowing the others' real URLs
pub async fn start_fleet(members: Vec<(&str, Arc<ScriptedProvider>)>) -> Vec<TestServer> {
    let mut bound = Vec::new();
    for (name, provider) in members {
        let (listener, url) = TestServer::bind().await;
        bound.push((name, provider, listener, url));
    }

    let urls: Vec<(&str, String)> = bound.iter().map(|(name, _, _, url)| (*name, url.clone())).collect();

    let mut servers = Vec::new();
    for (name, provider, listener, _) in bound {
        let runtime = runtime_with(settings_with_urls(&urls), name, provider);
        servers.push(TestServer::serve(listener, runtime).await);
    }
    servers
}
