//! Deterministic cache key derivation
//!
//! Every key is the SHA-256 hex digest of the canonical JSON form of the
//! inputs that affect the cached value. Object keys are sorted before
//! hashing so structurally equal arguments always map to the same key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::entry::Namespace;

/// Number of trailing history turns that participate in an LLM key
pub const HISTORY_WINDOW: usize = 3;

/// Per-turn content is truncated to this many characters before hashing
pub const HISTORY_CONTENT_CHARS: usize = 500;

/// A prior conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

impl HistoryTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Inputs that determine a conversational LLM response
#[derive(Debug, Clone)]
pub struct LlmKeyParams<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [HistoryTurn],
    pub message: &'a str,
    pub model: &'a str,
    pub temperature: f32,
}

/// Stateless key derivation functions
pub struct KeyCodec;

impl KeyCodec {
    /// Hash a JSON input tuple within a namespace.
    ///
    /// Takes an already built [`Value`] so key derivation cannot fail and
    /// distinct inputs never collapse onto a shared fallback.
    pub fn digest(namespace: Namespace, input: Value) -> String {
        let mut envelope = Map::new();
        envelope.insert("ns".to_string(), Value::from(namespace.as_str()));
        envelope.insert("input".to_string(), input);
        let canonical = canonicalize(Value::Object(envelope));
        sha256_hex(canonical.to_string().as_bytes())
    }

    pub fn llm_key(params: &LlmKeyParams<'_>) -> String {
        let start = params.history.len().saturating_sub(HISTORY_WINDOW);
        let recent: Vec<HistoryTurn> = params.history[start..]
            .iter()
            .map(|turn| HistoryTurn {
                role: turn.role.clone(),
                content: turn.content.chars().take(HISTORY_CONTENT_CHARS).collect(),
            })
            .collect();

        Self::digest(
            Namespace::Llm,
            serde_json::json!({
                "system_prompt": sha256_hex(params.system_prompt.as_bytes()),
                "recent_history": recent,
                "current_message": params.message,
                "model": params.model,
                "temperature": params.temperature,
            }),
        )
    }

    pub fn url_key(raw_url: &str) -> String {
        Self::digest(Namespace::Url, serde_json::json!({ "url": normalize_url(raw_url) }))
    }

    pub fn search_key(query: &str) -> String {
        Self::digest(Namespace::Url, serde_json::json!({ "search": query.trim() }))
    }

    pub fn tool_key(tool: &str, args: &Value) -> String {
        Self::digest(
            Namespace::Tool,
            serde_json::json!({ "tool": tool, "args": args }),
        )
    }

    pub fn translate_key(text: &str, source_lang: Option<&str>, target_lang: &str) -> String {
        Self::digest(
            Namespace::Translate,
            serde_json::json!({
                "text": text,
                "source": source_lang,
                "target": target_lang,
            }),
        )
    }

    pub fn prompt_key(fingerprint: &WorkspaceFingerprint) -> String {
        let files: Map<String, Value> = fingerprint
            .files
            .iter()
            .map(|(path, nanos)| (path.clone(), Value::from(*nanos)))
            .collect();
        Self::digest(Namespace::Prompt, Value::Object(files))
    }
}

/// Modification times of the files that feed the system prompt.
///
/// The prompt key is derived from this, so editing any tracked file
/// produces a new key and the stale prompt is never served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFingerprint {
    /// Path -> mtime in nanoseconds since the epoch
    files: BTreeMap<String, u64>,
}

impl WorkspaceFingerprint {
    /// Record mtimes of every existing path; missing paths are skipped
    pub fn collect<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut files = BTreeMap::new();
        for path in paths {
            let path = path.as_ref();
            match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => {
                    let nanos = modified
                        .duration_since(UNIX_EPOCH)
                        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                        .unwrap_or_default();
                    files.insert(path.display().to_string(), nanos);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to stat prompt source");
                }
            }
        }
        Self { files }
    }

    /// Files in `dir` plus every `*/SKILL.md` one level below `skills_dir`
    pub fn for_workspace(dir: &Path, names: &[&str], skills_dir: Option<&Path>) -> Self {
        let mut paths: Vec<PathBuf> = names.iter().map(|name| dir.join(name)).collect();
        if let Some(skills) = skills_dir {
            paths.push(skills.to_path_buf());
            if let Ok(read_dir) = std::fs::read_dir(skills) {
                for entry in read_dir.flatten() {
                    let skill_md = entry.path().join("SKILL.md");
                    if skill_md.is_file() {
                        paths.push(skill_md);
                    }
                }
            }
        }
        Self::collect(paths)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Normalize a URL so trivially different spellings share a key
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            // The url crate already lowercases scheme and host and drops
            // default ports.
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
