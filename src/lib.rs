//! Stall-aware HTTP client library.
//!
//! Every request runs as one exchange with an inactivity timer that is reset
//! on each read or write and an optional overall deadline. A stalled peer
//! fails the exchange with a timeout naming the phase it stalled in.
//! Multipart uploads stream from a background producer through a bounded
//! pipe, and a failing part surfaces as the caller's error.

// Core subsystems
pub mod body;
pub mod error;
pub mod exchange;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use body::{BodyProvider, FilePart, MultipartBody};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use exchange::Phase;
pub use http::{Client, ClientOptions, Request, Response};
