//! Cache entries, namespaces and the typed values stored in them

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An isolated logical cache with its own key space, TTL and enable flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Url,
    Llm,
    Prompt,
    Translate,
    Tool,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Url,
        Namespace::Llm,
        Namespace::Prompt,
        Namespace::Translate,
        Namespace::Tool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Url => "url",
            Namespace::Llm => "llm",
            Namespace::Prompt => "prompt",
            Namespace::Translate => "translate",
            Namespace::Tool => "tool",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "url" => Ok(Namespace::Url),
            "llm" => Ok(Namespace::Llm),
            "prompt" => Ok(Namespace::Prompt),
            "translate" | "translation" => Ok(Namespace::Translate),
            "tool" => Ok(Namespace::Tool),
            other => Err(format!("unknown cache namespace: {}", other)),
        }
    }
}

/// A fetched page or search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// One tool invocation made while producing an LLM response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: String,
    pub output: String,
}

/// A complete LLM response including its tool-call trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRecord {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
    pub target_lang: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub tool: String,
    pub output: String,
}

/// Payload stored in the cache, one variant per namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CacheValue {
    Url(UrlRecord),
    Llm(LlmRecord),
    Prompt(PromptRecord),
    Translate(TranslationRecord),
    Tool(ToolRecord),
}

impl CacheValue {
    /// The namespace this value is allowed to live in
    pub fn namespace(&self) -> Namespace {
        match self {
            CacheValue::Url(_) => Namespace::Url,
            CacheValue::Llm(_) => Namespace::Llm,
            CacheValue::Prompt(_) => Namespace::Prompt,
            CacheValue::Translate(_) => Namespace::Translate,
            CacheValue::Tool(_) => Namespace::Tool,
        }
    }

    pub fn belongs_to(&self, namespace: Namespace) -> bool {
        self.namespace() == namespace
    }

    pub fn into_url(self) -> Option<UrlRecord> {
        match self {
            CacheValue::Url(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_llm(self) -> Option<LlmRecord> {
        match self {
            CacheValue::Llm(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_prompt(self) -> Option<PromptRecord> {
        match self {
            CacheValue::Prompt(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_translation(self) -> Option<TranslationRecord> {
        match self {
            CacheValue::Translate(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_tool(self) -> Option<ToolRecord> {
        match self {
            CacheValue::Tool(record) => Some(record),
            _ => None,
        }
    }
}

/// The unit stored in both tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: CacheValue,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Expiry in seconds; 0 never expires by time
    #[serde(default)]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: CacheValue, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed_at: now,
            ttl_seconds,
            access_count: 0,
        }
    }

    /// Single validity predicate shared by every read path and the cleanup pass.
    ///
    /// A TTL whose deadline falls outside the representable time range is
    /// treated like 0.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.ttl_seconds == 0 {
            return false;
        }
        let deadline = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        match deadline {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record a successful read
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count = self.access_count.saturating_add(1);
    }
}
