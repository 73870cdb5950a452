// Library exports for worker-cache
// This allows the modules to be imported in tests and external code

pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod server;
pub mod tools;
