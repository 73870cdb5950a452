//! Result caching for any tool
//!
//! [`CachedTool`] wraps a tool and stores its successful outputs in the
//! `tool` namespace, keyed by the tool name and its canonicalized arguments.
//! Repeated calls with equal arguments skip execution and return the stored
//! output behind [`CACHE_HIT_MARKER`](super::CACHE_HIT_MARKER).

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{mark_cached, Tool, ToolContext};
use crate::cache::{CacheRegistry, CacheValue, KeyCodec, Namespace, ToolRecord};

pub struct CachedTool<T> {
    inner: T,
    cache: Arc<CacheRegistry>,
}

impl<T: Tool> CachedTool<T> {
    pub fn new(inner: T, cache: Arc<CacheRegistry>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Tool> Tool for CachedTool<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.inner.parameters_schema()
    }

    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext<'_>) -> Result<String> {
        let key = KeyCodec::tool_key(self.inner.name(), &params);

        let cached = self
            .cache
            .get(Namespace::Tool, &key)
            .await
            .and_then(CacheValue::into_tool);
        if let Some(record) = cached {
            tracing::debug!(tool = %record.tool, "tool cache hit");
            return Ok(mark_cached(&record.output));
        }

        // Failed runs, including failed fetches, are never stored
        let output = self.inner.execute(params, ctx).await?;

        self.cache
            .put(
                Namespace::Tool,
                &key,
                CacheValue::Tool(ToolRecord {
                    tool: self.inner.name().to_string(),
                    output: output.clone(),
                }),
            )
            .await;

        Ok(output)
    }
}
