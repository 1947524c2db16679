//! Delegation router
//!
//! Per inbound message:
//! 1. validate size and depth, rejecting with a structured error
//! 2. ask the local backend
//! 3. forward every `[DELEGATE:..]` directive of the answer to its target,
//!    concurrently, carrying the incremented depth and the visited chain
//! 4. merge successful results through a synthesis call, or fall back to the
//!    local answer and report the failures
//!
//! Depth is carried on the wire and never reset, so the ceiling bounds the
//! whole chain of agents rather than a single hop.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::backend::{BackendAdapter, TokenStream};
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::prompt::synthesis_prompt;
use crate::agents::registry::AgentRegistry;
use crate::agents::sibling::SiblingClient;
use crate::config::{DelegationSettings, LimitSettings};
use crate::domain::{
    parse_directives, DelegateRequest, DelegationContext, DelegationDirective, DelegationFailure,
    DelegationResult, InboundMessage, RouterOutcome,
};

/// Final reply of a routed message
#[derive(Debug, Clone, Serialize)]
pub struct RoutedReply {
    pub response: String,
    pub outcome: RouterOutcome,
    pub depth: u32,
    pub delegations_executed: bool,
    pub synthesized: bool,
    pub delegations: Vec<DelegationResult>,
}

/// Reply of a direct delegation
#[derive(Debug, Clone, Serialize)]
pub struct DelegateReply {
    pub target: String,
    pub response: String,
    pub depth: u32,
}

pub struct DelegationRouter {
    registry: Arc<AgentRegistry>,
    backend: Arc<BackendAdapter>,
    siblings: SiblingClient,
    metrics: Arc<MetricsCollector>,
    limits: LimitSettings,
    delegation: DelegationSettings,
}

impl DelegationRouter {
    pub fn new(
        registry: Arc<AgentRegistry>,
        backend: Arc<BackendAdapter>,
        siblings: SiblingClient,
        metrics: Arc<MetricsCollector>,
        limits: LimitSettings,
        delegation: DelegationSettings,
    ) -> Self {
        Self {
            registry,
            backend,
            siblings,
            metrics,
            limits,
            delegation,
        }
    }

    fn local_name(&self) -> &str {
        &self.registry.local().name
    }

    fn max_depth(&self) -> u32 {
        self.limits.max_delegation_depth
    }

    fn reject(&self, err: AgentError) -> AgentError {
        self.metrics.record_rejection(err.kind());
        err
    }

    /// Check message size and depth, and open the delegation context
    pub fn validate(&self, inbound: &InboundMessage) -> AgentResult<DelegationContext> {
        if inbound.message.trim().is_empty() {
            return Err(self.reject(AgentError::Validation("message is empty".to_string())));
        }
        if inbound.message.len() > self.limits.max_message_bytes {
            return Err(self.reject(AgentError::MessageTooLarge {
                len: inbound.message.len(),
                max: self.limits.max_message_bytes,
            }));
        }

        let ctx = DelegationContext::inbound(
            self.local_name(),
            &inbound.from,
            inbound.depth,
            &inbound.chain,
        );

        if ctx.depth >= self.max_depth() {
            tracing::warn!(
                agent = self.local_name(),
                from = %inbound.from,
                depth = ctx.depth,
                origin = %ctx.origin,
                "delegation refused: depth limit reached"
            );
            return Err(self.reject(AgentError::DelegationLoopExceeded {
                depth: ctx.depth,
                max_depth: self.max_depth(),
                origin: ctx.origin,
                chain: ctx.chain,
            }));
        }

        self.metrics.messages_total.inc();
        tracing::info!(
            agent = self.local_name(),
            from = %inbound.from,
            depth = ctx.depth,
            "message accepted"
        );
        Ok(ctx)
    }

    /// Full blocking path of `POST /message`
    pub async fn handle_message(&self, inbound: &InboundMessage) -> AgentResult<RoutedReply> {
        let ctx = self.validate(inbound)?;
        let answer = self.backend.complete(&inbound.message).await?;
        Ok(self.finish(ctx, answer).await)
    }

    /// Validate and start streaming the local answer
    pub fn open_stream(
        &self,
        inbound: &InboundMessage,
    ) -> AgentResult<(DelegationContext, TokenStream)> {
        let ctx = self.validate(inbound)?;
        self.metrics.streams_total.inc();
        Ok((ctx, self.backend.stream(&inbound.message)))
    }

    /// Run the delegation step on a completed local answer
    pub async fn finish(&self, mut ctx: DelegationContext, local_answer: String) -> RoutedReply {
        let directives = parse_directives(&local_answer, self.limits.max_directives_per_reply);
        if directives.is_empty() {
            return RoutedReply {
                response: local_answer,
                outcome: RouterOutcome::Answered,
                depth: ctx.depth,
                delegations_executed: false,
                synthesized: false,
                delegations: Vec::new(),
            };
        }

        let results = join_all(directives.iter().map(|d| self.forward(&ctx, d))).await;
        for result in results {
            self.metrics.record_delegation(result.is_completed());
            ctx.record(result);
        }

        let mut synthesized = false;
        let mut synthesis_failed = false;
        let mut response = local_answer;

        if ctx.completed().next().is_some() {
            let prompt = synthesis_prompt(
                &response,
                ctx.completed(),
                self.delegation.synthesis_answer_chars,
                self.delegation.synthesis_result_chars,
            );
            match self.backend.complete(&prompt).await {
                Ok(merged) => {
                    response = merged;
                    synthesized = true;
                }
                Err(e) => {
                    tracing::warn!(
                        agent = self.local_name(),
                        "synthesis failed, keeping local answer: {}",
                        e
                    );
                    synthesis_failed = true;
                }
            }
        }

        let outcome = if ctx.has_failures() || synthesis_failed {
            RouterOutcome::AnsweredWithDelegationFailure
        } else {
            RouterOutcome::Answered
        };

        RoutedReply {
            response,
            outcome,
            depth: ctx.depth,
            delegations_executed: true,
            synthesized,
            delegations: ctx.results,
        }
    }

    /// One delegation hop. Never fails the request: problems become a
    /// failed [`DelegationResult`].
    async fn forward(
        &self,
        ctx: &DelegationContext,
        directive: &DelegationDirective,
    ) -> DelegationResult {
        let target = directive.target.as_str();

        let base_url = match self.registry.resolve_endpoint(target) {
            Ok(url) => url,
            Err(_) => {
                tracing::warn!(agent = self.local_name(), to = target, "directive names an unknown agent");
                return DelegationResult::failed(target, DelegationFailure::UnknownAgent);
            }
        };

        if target == self.local_name() || ctx.has_visited(target) {
            tracing::warn!(agent = self.local_name(), to = target, chain = ?ctx.chain, "delegation cycle refused");
            return DelegationResult::failed(target, DelegationFailure::Cycle);
        }

        if ctx.next_depth() >= self.max_depth() {
            tracing::warn!(
                agent = self.local_name(),
                to = target,
                depth = ctx.depth,
                origin = %ctx.origin,
                "delegation refused: depth limit reached"
            );
            return DelegationResult::failed(target, ctx.loop_exceeded(target, self.max_depth()));
        }

        let outbound = InboundMessage {
            message: directive.message.clone(),
            from: self.local_name().to_string(),
            depth: ctx.next_depth(),
            chain: ctx.chain.clone(),
        };

        tracing::info!(agent = self.local_name(), to = target, depth = outbound.depth, "delegating");
        match self.siblings.send_message(&base_url, &outbound).await {
            Ok(response) => DelegationResult::completed(target, response),
            Err(failure) => {
                tracing::warn!(agent = self.local_name(), to = target, "delegation failed: {}", failure);
                DelegationResult::failed(target, failure)
            }
        }
    }

    /// `POST /delegate`: forward straight to `target`
    pub async fn delegate(&self, request: &DelegateRequest) -> AgentResult<DelegateReply> {
        let ctx = self.validate(&InboundMessage {
            message: request.message.clone(),
            from: request.from.clone(),
            depth: request.depth,
            chain: Vec::new(),
        })?;

        let base_url = self
            .registry
            .resolve_endpoint(&request.target)
            .map_err(|e| self.reject(e))?;

        if request.target == self.local_name() {
            return Err(self.reject(AgentError::Validation(
                "an agent cannot delegate to itself".to_string(),
            )));
        }

        if ctx.next_depth() >= self.max_depth() {
            return Err(self.reject(AgentError::DelegationLoopExceeded {
                depth: ctx.next_depth(),
                max_depth: self.max_depth(),
                origin: ctx.origin,
                chain: ctx.chain,
            }));
        }

        let outbound = InboundMessage {
            message: request.message.clone(),
            from: self.local_name().to_string(),
            depth: ctx.next_depth(),
            chain: ctx.chain.clone(),
        };

        let result = self.siblings.send_message(&base_url, &outbound).await;
        self.metrics.record_delegation(result.is_ok());
        match result {
            Ok(response) => Ok(DelegateReply {
                target: request.target.clone(),
                response,
                depth: outbound.depth,
            }),
            Err(failure) => Err(AgentError::DelegationFailed {
                target: request.target.clone(),
                reason: failure.to_string(),
            }),
        }
    }
}
