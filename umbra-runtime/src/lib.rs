//! Umbra Runtime - Investigation orchestration
//!
//! Wires the transport, cache and stages together and drives each
//! investigation through its lifecycle.

pub mod investigation;

pub use investigation::*;
