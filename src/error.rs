//! Error types for the cache subsystem and its configuration

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::Namespace;

/// Failures raised inside a cache tier.
///
/// These never reach callers that only want a value faster: the registry
/// logs them and reports a miss (see [`Lookup`]). Admin operations such as
/// clear and cleanup do return them.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("value of kind '{found}' does not belong to namespace '{namespace}'")]
    NamespaceMismatch { namespace: Namespace, found: String },

    #[error("background cache task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invalid configuration values, reported at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(name: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a tier lookup.
///
/// Callers only see `Option` via [`Lookup::into_option`]; the failure case
/// is logged there so operators can tell a cold cache from a broken one.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    Failed(CacheError),
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn into_option(self, namespace: Namespace) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
            Lookup::Failed(err) => {
                tracing::warn!(%namespace, error = %err, "cache tier failure, treating as miss");
                None
            }
        }
    }
}

impl<T> From<Result<Option<T>, CacheError>> for Lookup<T> {
    fn from(result: Result<Option<T>, CacheError>) -> Self {
        match result {
            Ok(Some(value)) => Lookup::Hit(value),
            Ok(None) => Lookup::Miss,
            Err(err) => Lookup::Failed(err),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
