//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing exchange
//!     → connector.rs (resolve, dial under the dial timeout)
//!     → dns.rs (Resolve collaborator, DnsCache)
//!     → connection.rs (per-operation read/write deadlines)
//!     → Hand off to the HTTP engine's pool
//! ```
//!
//! # Design Decisions
//! - Plain TCP only; the engine owns pooling and protocol framing
//! - Each connection carries an ID for tracing
//! - Resolution is pluggable so callers can pin hosts or share a cache

pub mod connection;
pub mod connector;
pub mod dns;

pub use connection::{ConnectionId, DeadlineConnection};
pub use connector::{ConnectError, DeadlineConnector};
pub use dns::{DnsCache, Resolve};
