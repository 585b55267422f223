//! Client metrics.
//!
//! # Metrics
//! - `stallguard_exchanges_total` (counter): finished exchanges by outcome
//! - `stallguard_exchange_duration_seconds` (histogram): time to response headers
//! - `stallguard_timeouts_total` (counter): timeouts by phase
//! - `stallguard_multipart_aborts_total` (counter): producers that failed
//! - `stallguard_dns_cache_total` (counter): DNS cache lookups by result
//! - `stallguard_redirects_total` (counter): redirect hops followed
//!
//! # Design Decisions
//! - Only the `metrics` facade is used; installing an exporter is up to the
//!   application
//! - Labels are small closed sets (outcome, phase, result)

use std::time::Duration;

use crate::error::Error;

/// Record a finished exchange.
pub fn record_exchange(result: Result<u16, &Error>, elapsed: Duration) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) if e.is_timeout() => "timeout",
        Err(e) if e.is_connect() => "connect_error",
        Err(_) => "error",
    };
    metrics::counter!("stallguard_exchanges_total", "outcome" => outcome).increment(1);
    metrics::histogram!("stallguard_exchange_duration_seconds").record(elapsed.as_secs_f64());

    if let Err(err) = result {
        if err.is_timeout() {
            let phase = match err {
                Error::TimeoutSending(_) => "sending",
                Error::TimeoutReceiving(_) => "receiving",
                _ => "deadline",
            };
            metrics::counter!("stallguard_timeouts_total", "phase" => phase).increment(1);
        }
    }
}

/// Record a multipart producer that closed its pipe with an error.
pub fn record_multipart_abort() {
    metrics::counter!("stallguard_multipart_aborts_total").increment(1);
}

/// Record a DNS cache lookup.
pub fn record_dns_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("stallguard_dns_cache_total", "result" => result).increment(1);
}

/// Record one followed redirect hop.
pub fn record_redirect(status: u16) {
    metrics::counter!("stallguard_redirects_total", "status" => status.to_string()).increment(1);
}
