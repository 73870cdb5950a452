//! API route handlers
//!
//! This module contains all HTTP route handlers for the server.

pub mod cache;
pub mod config;
pub mod health;
