//! llmux - Unified request router for multiple AI chat providers
//!
//! This library provides the core functionality for the llmux router,
//! including configuration, the provider fallback cascade, quota and
//! health tracking, caching, and the HTTP surface.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod provider;
pub mod quota;
pub mod ratelimit;
pub mod router;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
