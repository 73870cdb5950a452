use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub mod cached;
pub mod webfetch;

pub use cached::CachedTool;
pub use webfetch::WebFetchTool;

/// Prefix placed on tool output that was served from cache.
///
/// The host reads it when emitting `tool_end` so the UI can mark the step as
/// cached without the event type growing a field.
pub const CACHE_HIT_MARKER: &str = "[CACHE_HIT]";

/// Check whether a tool output was served from cache
pub fn is_cached_output(output: &str) -> bool {
    output.starts_with(CACHE_HIT_MARKER)
}

/// Remove the cache marker, returning the output as the tool produced it
pub fn strip_cache_marker(output: &str) -> &str {
    output
        .strip_prefix(CACHE_HIT_MARKER)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .unwrap_or(output)
}

pub(crate) fn mark_cached(output: &str) -> String {
    format!("{} {}", CACHE_HIT_MARKER, output)
}

/// Context passed to tool execution
#[derive(Clone)]
pub struct ToolContext<'a> {
    pub working_dir: &'a Path,
}

impl<'a> ToolContext<'a> {
    pub fn new(working_dir: &'a Path) -> Self {
        Self { working_dir }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value, ctx: &ToolContext<'_>) -> Result<String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn get_tools_schema(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.parameters_schema()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_marker_helpers() {
        let marked = mark_cached("page body");
        assert!(is_cached_output(&marked));
        assert_eq!(strip_cache_marker(&marked), "page body");

        assert!(!is_cached_output("page body"));
        assert_eq!(strip_cache_marker("page body"), "page body");
    }

    #[test]
    fn test_registry_exposes_wrapped_tools() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = std::sync::Arc::new(crate::cache::CacheRegistry::new(
            &crate::config::CacheConfig {
                cache_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
        ));

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CachedTool::new(WebFetchTool::new(), cache)));

        assert!(registry.get_tool("webfetch").is_some());
        assert!(registry.get_tool("bash").is_none());
        let schema = registry.get_tools_schema();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0]["name"], "webfetch");
        assert_eq!(schema[0]["input_schema"]["required"][0], "url");
    }
}
