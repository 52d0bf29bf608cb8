//! Umbra Tor Layer
//!
//! Provides Tor-based networking for dark web investigations:
//! - SOCKS5h transport with per-circuit isolation (DNS resolution via Tor)
//! - Circuit pool with rotation, health and degraded mode
//! - Search result page parsing
//! - HTML to text conversion

pub mod transport;
pub mod manager;
pub mod crawler;
pub mod html;

pub use transport::*;
pub use manager::*;
pub use crawler::*;
pub use html::*;
