//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Exchange path (connector, timer, bodies, orchestrator) produces:
//!     → tracing events and spans (exchange_id, connection_id, phase)
//!     → metrics.rs (counters, histograms through the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs subscriber (CLI, applications)
//!     → whatever metrics recorder the application installs
//! ```
//!
//! # Design Decisions
//! - Exchange ID flows through every event of one request
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;
