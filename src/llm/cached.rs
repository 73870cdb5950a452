//! Caching wrapper for agent runs
//!
//! This module provides a decorator that wraps any [`AgentRunner`] and adds
//! response caching on top of the LLM namespace. On a hit the stored response
//! is replayed through [`StreamReplayer`] so the consumer still receives a
//! progressive stream; on a miss the live stream is forwarded unchanged and
//! recorded, and the record is stored once the run completes.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use super::{AgentEvent, AgentRequest, AgentRunner, StreamItem};
use crate::cache::{
    CacheRegistry, CacheValue, KeyCodec, LlmKeyParams, LlmRecord, Namespace, StreamReplayer,
    ToolCallRecord,
};

/// A caching wrapper for any agent runner
pub struct CachingAgentRunner {
    /// The underlying runner
    inner: Arc<dyn AgentRunner>,
    /// Shared cache registry
    cache: Arc<CacheRegistry>,
    replayer: StreamReplayer,
}

impl CachingAgentRunner {
    pub fn new(inner: Arc<dyn AgentRunner>, cache: Arc<CacheRegistry>) -> Self {
        Self::with_replayer(inner, cache, StreamReplayer::default())
    }

    pub fn with_replayer(
        inner: Arc<dyn AgentRunner>,
        cache: Arc<CacheRegistry>,
        replayer: StreamReplayer,
    ) -> Self {
        Self {
            inner,
            cache,
            replayer,
        }
    }

    /// Check if response caching is enabled
    pub fn is_caching_enabled(&self) -> bool {
        self.cache.namespace(Namespace::Llm).is_enabled()
    }

    pub fn cache_key(request: &AgentRequest) -> String {
        KeyCodec::llm_key(&LlmKeyParams {
            system_prompt: &request.system_prompt,
            history: &request.history,
            message: &request.message,
            model: &request.model,
            temperature: request.temperature,
        })
    }

    /// Run the agent, serving from cache when possible
    pub fn run(&self, request: AgentRequest) -> BoxStream<'static, StreamItem> {
        let inner = Arc::clone(&self.inner);

        // If caching is disabled, just pass through
        if !self.is_caching_enabled() {
            return inner.run(request).map(StreamItem::live).boxed();
        }

        let cache = Arc::clone(&self.cache);
        let replayer = self.replayer.clone();
        let key = Self::cache_key(&request);

        async_stream::stream! {
            let cached = cache
                .get(Namespace::Llm, &key)
                .await
                .and_then(CacheValue::into_llm);

            if let Some(record) = cached {
                tracing::info!(
                    chars = record.text.len(),
                    tool_calls = record.tool_calls.len(),
                    "LLM cache hit: replaying stored response"
                );
                let mut replay = Box::pin(replayer.replay(record));
                while let Some(item) = replay.next().await {
                    yield item;
                }
                return;
            }

            tracing::debug!("LLM cache miss: running agent");
            let model = request.model.clone();
            let mut live = inner.run(request);
            let mut recorder = Recorder::default();

            while let Some(event) = live.next().await {
                recorder.observe(&event);
                if matches!(event, AgentEvent::Done) {
                    if let Some(record) = recorder.finish(&model) {
                        cache.put(Namespace::Llm, &key, CacheValue::Llm(record)).await;
                        tracing::debug!("Cached agent response for future use");
                    }
                }
                yield StreamItem::live(event);
            }
        }
        .boxed()
    }
}

/// Accumulates a live run into an [`LlmRecord`]
#[derive(Default)]
struct Recorder {
    text: String,
    tool_calls: Vec<ToolCallRecord>,
    /// Started tools awaiting their end event, in start order
    pending: Vec<(String, String)>,
    failed: bool,
}

impl Recorder {
    fn observe(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Token { content } => self.text.push_str(content),
            AgentEvent::ToolStart { tool, input } => {
                self.pending.push((tool.clone(), input.clone()));
            }
            AgentEvent::ToolEnd { tool, output } => {
                let input = self
                    .pending
                    .iter()
                    .position(|(name, _)| name == tool)
                    .map(|index| self.pending.remove(index).1)
                    .unwrap_or_default();
                self.tool_calls.push(ToolCallRecord {
                    tool: tool.clone(),
                    input,
                    output: output.clone(),
                });
            }
            AgentEvent::Error { .. } => self.failed = true,
            AgentEvent::Done => {}
        }
    }

    /// Failed runs are never cached
    fn finish(&mut self, model: &str) -> Option<LlmRecord> {
        if self.failed {
            return None;
        }
        Some(LlmRecord {
            text: std::mem::take(&mut self.text),
            tool_calls: std::mem::take(&mut self.tool_calls),
            model: model.to_string(),
        })
    }
}
