//! Replay of cached LLM responses as an incremental event stream
//!
//! A cache hit must look like a live generation to the UI: the stored tool
//! trace is emitted first, then the text arrives in small chunks with a short
//! pause between them. Every item carries `cached: true`.

use std::time::Duration;

use futures::stream::Stream;

use super::entry::LlmRecord;
use crate::llm::{AgentEvent, StreamItem};

/// Characters per replayed token event
pub const DEFAULT_CHUNK_CHARS: usize = 5;

/// Pause between replayed token events
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct StreamReplayer {
    chunk_chars: usize,
    delay: Duration,
}

impl Default for StreamReplayer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_DELAY)
    }
}

impl StreamReplayer {
    pub fn new(chunk_chars: usize, delay: Duration) -> Self {
        Self {
            chunk_chars: chunk_chars.max(1),
            delay,
        }
    }

    /// Upper bound on how long replaying `text_chars` characters takes,
    /// excluding consumer back-pressure
    pub fn expected_duration(&self, text_chars: usize) -> Duration {
        let chunks = text_chars.div_ceil(self.chunk_chars) as u32;
        self.delay * chunks.saturating_sub(1)
    }

    /// Stream `record` as tool events, token chunks and a final `Done`.
    ///
    /// The stream owns no background task: dropping it cancels any pending
    /// delay immediately.
    pub fn replay(&self, record: LlmRecord) -> impl Stream<Item = StreamItem> + Send + 'static {
        let chunk_chars = self.chunk_chars;
        let delay = self.delay;

        async_stream::stream! {
            for call in record.tool_calls {
                yield StreamItem::cached(AgentEvent::ToolStart {
                    tool: call.tool.clone(),
                    input: call.input,
                });
                yield StreamItem::cached(AgentEvent::ToolEnd {
                    tool: call.tool,
                    output: call.output,
                });
            }

            let chars: Vec<char> = record.text.chars().collect();
            for (index, chunk) in chars.chunks(chunk_chars).enumerate() {
                if index > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield StreamItem::cached(AgentEvent::Token {
                    content: chunk.iter().collect(),
                });
            }

            yield StreamItem::cached(AgentEvent::Done);
        }
    }
}
