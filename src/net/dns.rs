//! Host resolution used by the connector.
//!
//! # Responsibilities
//! - Define the `Resolve` seam the connector dials through
//! - Cache system lookups for a bounded lifetime (`DnsCache`)
//!
//! # Design Decisions
//! - Entries expire lazily: on lookup of the same host, and in a sweep of
//!   the whole map whenever a fresh lookup is stored
//! - Only the first address of a lookup is kept
//! - Failures are never cached

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::observability::metrics;

/// Resolves a host name to an address. Called once per dial attempt.
pub trait Resolve: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<IpAddr>>;
}

/// Look a host up with the system resolver.
pub(crate) async fn system_lookup(host: &str) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await?
        .map(|addr| addr.ip())
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )
        })
}

/// A resolver caching successful system lookups.
#[derive(Clone)]
pub struct DnsCache {
    entries: Arc<DashMap<String, (IpAddr, Instant)>>,
    expire: Duration,
}

impl DnsCache {
    /// Create a cache whose entries live for `expire`.
    pub fn new(expire: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            expire,
        }
    }

    /// Number of cached hosts, including expired entries not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn cached(&self, host: &str) -> Option<IpAddr> {
        let entry = self.entries.get(host)?;
        let (ip, stored) = *entry.value();
        drop(entry);

        if stored.elapsed() < self.expire {
            return Some(ip);
        }
        self.entries.remove(host);
        None
    }

    async fn lookup(&self, host: &str) -> io::Result<IpAddr> {
        if let Some(ip) = self.cached(host) {
            metrics::record_dns_lookup(true);
            return Ok(ip);
        }
        metrics::record_dns_lookup(false);

        let ip = system_lookup(host).await?;
        let expire = self.expire;
        self.entries.retain(|_, (_, stored)| stored.elapsed() < expire);
        self.entries.insert(host.to_string(), (ip, Instant::now()));
        tracing::trace!(host, %ip, "DNS cache filled");
        Ok(ip)
    }
}

impl Resolve for DnsCache {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<IpAddr>> {
        Box::pin(self.lookup(host))
    }
}

impl fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsCache")
            .field("entries", &self.entries.len())
            .field("expire", &self.expire)
            .finish()
    }
}
