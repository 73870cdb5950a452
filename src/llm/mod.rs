use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::cache::HistoryTurn;

pub mod cached;

/// Incremental event produced by an agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Text chunk from the model
    Token { content: String },
    /// Tool execution started
    ToolStart { tool: String, input: String },
    /// Tool execution completed
    ToolEnd { tool: String, output: String },
    /// The run failed; no more events follow
    Error { message: String },
    /// The run completed normally
    Done,
}

/// An event as delivered to consumers, flagged when it is replayed from cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    #[serde(flatten)]
    pub event: AgentEvent,
    #[serde(default)]
    pub cached: bool,
}

impl StreamItem {
    pub fn live(event: AgentEvent) -> Self {
        Self {
            event,
            cached: false,
        }
    }

    pub fn cached(event: AgentEvent) -> Self {
        Self {
            event,
            cached: true,
        }
    }
}

/// Everything that determines the response of one agent run
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub system_prompt: String,
    pub history: Vec<HistoryTurn>,
    pub message: String,
    pub model: String,
    pub temperature: f32,
}

/// The live agent loop (model calls plus tool execution)
pub trait AgentRunner: Send + Sync {
    fn run(&self, request: AgentRequest) -> BoxStream<'static, AgentEvent>;
}
