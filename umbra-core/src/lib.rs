//! Umbra Core - Domain model and local analysis for dark web investigations
//!
//! This crate provides the foundational primitives:
//! - Investigation aggregate, search results, scraped content, stage errors
//! - Pipeline configuration
//! - Read-through cache with TTL expiry
//! - Entity extraction and threat scoring
//! - Search engine registry
//! - Cancellation token shared by every stage

pub mod model;
pub mod config;
pub mod cache;
pub mod cancel;
pub mod entities;
pub mod scoring;
pub mod search_engines;

pub use model::*;
pub use config::*;
pub use cache::*;
pub use cancel::*;
pub use entities::*;
pub use scoring::{kind_weight, score, MAX_SCORE, MIN_SCORE};
pub use search_engines::*;

/// Default TTL for cached search results, in seconds
pub const DEFAULT_SEARCH_TTL_SECS: u64 = 3600;

/// Default TTL for cached scraped content, in seconds
pub const DEFAULT_CONTENT_TTL_SECS: u64 = 6 * 3600;
