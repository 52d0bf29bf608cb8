//! Umbra Stages
//!
//! Pipeline stages for dark web investigations:
//! - **Engines**: search engine adapters fetched over Tor
//! - **Dispatcher**: concurrent search fan-out, merge and rank
//! - **Scrape**: content retrieval with retry, backoff and per-host breakers
//! - **Summarizer**: LLM-written investigation report
//!
//! Engines and completion backends are looked up by name in the
//! [`registry::CapabilityRegistry`].

pub mod backend;
pub mod engines;
pub mod registry;
pub mod dispatcher;
pub mod scrape;
pub mod summarizer;

pub use backend::*;
pub use engines::*;
pub use registry::*;
pub use dispatcher::*;
pub use scrape::*;
pub use summarizer::*;
