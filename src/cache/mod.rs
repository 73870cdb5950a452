//! Two-tier response caching for the digital worker
//!
//! Every namespace (fetched URLs, LLM responses, system prompts,
//! translations and tool results) gets a bounded in-memory LRU tier backed by
//! a sharded JSON store on disk. Lookups go memory first, then disk, and disk
//! hits are promoted back into memory. Expiry is lazy on read and swept
//! periodically by the [`CleanupScheduler`].

pub mod disk;
pub mod entry;
pub mod key;
pub mod memory;
pub mod registry;
pub mod replay;
pub mod scheduler;

pub use disk::{CleanupReport, DiskTier};
pub use entry::{
    CacheEntry, CacheValue, LlmRecord, Namespace, PromptRecord, ToolCallRecord, ToolRecord,
    TranslationRecord, UrlRecord,
};
pub use key::{normalize_url, HistoryTurn, KeyCodec, LlmKeyParams, WorkspaceFingerprint};
pub use memory::MemoryTier;
pub use registry::{
    CacheRegistry, ClearCounts, ClearReport, ClearTarget, CleanupSummary, NamespaceCache,
    NamespaceStats, StatsReport, StatsTotals,
};
pub use replay::StreamReplayer;
pub use scheduler::{CleanupScheduler, SchedulerHandle};
