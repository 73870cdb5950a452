//! Server state management
//!
//! This module defines the shared state for the HTTP server: the effective
//! configuration and the cache registry that every handler works against.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheRegistry;
use crate::config::Config;

/// Shared application state for the server
pub struct AppState {
    /// Configuration the running cache was built from
    pub config: Config,

    /// Cache registry shared with the rest of the process
    pub cache: Arc<CacheRegistry>,

    /// Config file written by settings updates
    pub config_path: Option<PathBuf>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, cache: Arc<CacheRegistry>) -> Self {
        Self {
            config,
            cache,
            config_path: None,
        }
    }

    /// Persist settings updates to `path`
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }
}
