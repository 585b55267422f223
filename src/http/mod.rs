//! HTTP client surface.
//!
//! # Data Flow
//! ```text
//! Request (builder, per-request options)
//!     → request.rs (URL, host override, header and cookie decoration)
//!     → client.rs (exchange, engine call, cancellation race)
//!     → redirect.rs (next hop or hand back)
//!     → response.rs (status, headers, timed body)
//! ```

pub mod client;
pub mod redirect;
pub mod request;
pub mod response;

pub use client::{Client, ClientOptions};
pub use redirect::MAX_REDIRECTS;
pub use request::{Auth, HostOverride, Query, Request, DEFAULT_USER_AGENT};
pub use response::{Cookie, RequestHead, Response, ResponseReader};
