//! Request orchestrator.
//!
//! # Data Flow
//! ```text
//! Client::send(&mut Request)
//!     → HostOverride guard (restored on every exit path)
//!     → build_url, scheme check
//!     → BodyProvider::produce
//!     → decorate headers and cookies
//!     → Exchange::new (inactivity timer, optional deadline)
//!     → per hop: TimedBody::sending → engine.request raced against the signal
//!     → headers: stop timer, phase = Receiving, follow redirects
//!     → Response with TimedBody::receiving
//! ```
//!
//! # Design Decisions
//! - One engine per client; connections are pooled across requests
//! - Every failure before the engine call aborts without touching the network
//! - The engine future is dropped on cancellation, which aborts the connection

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::LOCATION;
use http::Uri;
use hyper_util::client::legacy;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tracing::Instrument;

use super::redirect::{self, Hop, MAX_REDIRECTS};
use super::request::{build_url, decorate, Defaults, HostOverride, Request};
use super::response::{RequestHead, Response};
use crate::body::{empty_body, full_body, BodyProvider, PipeMonitor, Produced, RequestBody};
use crate::error::{has_io_timeout, Error, Result};
use crate::exchange::{Cause, Exchange, Phase, TimedBody};
use crate::net::{DeadlineConnector, DnsCache, Resolve};
use crate::observability::metrics;

/// Dial limit used when neither a dial timeout nor a short deadline is set.
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-wide settings, merged into every request.
#[derive(Clone)]
pub struct ClientOptions {
    /// Replaces the default `stallguard/<version>` user agent.
    pub user_agent: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    /// Inactivity timeout while sending or receiving. Zero disables it.
    pub timeout: Duration,
    /// Overall deadline of an exchange, redirects included.
    pub request_timeout: Option<Duration>,
    /// TCP connect limit. Derived from `request_timeout` when unset.
    pub dial_timeout: Option<Duration>,
    pub disable_keep_alives: bool,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    /// Cache resolved hosts for this long. Ignored when a resolver is set.
    pub dns_cache_expire: Option<Duration>,
    resolver: Option<Arc<dyn Resolve>>,
}

impl ClientOptions {
    /// Resolve hosts through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The dial limit actually applied.
    pub fn effective_dial_timeout(&self) -> Duration {
        match (self.dial_timeout, self.request_timeout) {
            (Some(dial), _) if !dial.is_zero() => dial,
            (_, Some(deadline)) if !deadline.is_zero() && deadline < DEFAULT_DIAL_TIMEOUT => deadline,
            _ => DEFAULT_DIAL_TIMEOUT,
        }
    }

    fn defaults(&self) -> Defaults<'_> {
        Defaults {
            user_agent: self.user_agent.as_deref(),
            headers: &self.headers,
            cookies: &self.cookies,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            timeout: Duration::from_secs(30),
            request_timeout: None,
            dial_timeout: None,
            disable_keep_alives: false,
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(5),
            dns_cache_expire: None,
            resolver: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("request_timeout", &self.request_timeout)
            .field("dial_timeout", &self.dial_timeout)
            .field("disable_keep_alives", &self.disable_keep_alives)
            .field("max_idle_per_host", &self.max_idle_per_host)
            .field("idle_timeout", &self.idle_timeout)
            .field("dns_cache_expire", &self.dns_cache_expire)
            .field("custom_resolver", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}

type Engine = legacy::Client<DeadlineConnector, TimedBody<RequestBody>>;

struct Inner {
    options: ClientOptions,
    engine: Engine,
}

/// HTTP client with stall detection. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        let resolver = options.resolver.clone().or_else(|| {
            options
                .dns_cache_expire
                .filter(|d| !d.is_zero())
                .map(|expire| Arc::new(DnsCache::new(expire)) as Arc<dyn Resolve>)
        });

        let mut connector = DeadlineConnector::new()
            .with_dial_timeout(options.effective_dial_timeout())
            .with_io_timeout(options.timeout);
        if let Some(resolver) = resolver {
            connector = connector.with_resolver(resolver);
        }

        let max_idle = if options.disable_keep_alives {
            0
        } else {
            options.max_idle_per_host
        };
        let engine = legacy::Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(options.idle_timeout)
            .pool_max_idle_per_host(max_idle)
            .build(connector);

        tracing::debug!(options = ?options, "Client created");
        Self {
            inner: Arc::new(Inner { options, engine }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Send `request`, consuming its body.
    ///
    /// The request is borrowed mutably so a `host_ip` override can be
    /// undone afterwards; its URL and `Host` are unchanged when this returns.
    pub async fn send(&self, request: &mut Request) -> Result<Response> {
        let started = Instant::now();
        let result = self.execute(request).await;
        metrics::record_exchange(
            result.as_ref().map(|r| r.status().as_u16()),
            started.elapsed(),
        );
        if let Err(e) = &result {
            tracing::debug!(error = %e, url = %request.url, "Request failed");
        }
        result
    }

    /// Send an owned request.
    pub async fn request(&self, mut request: Request) -> Result<Response> {
        self.send(&mut request).await
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(Request::get(url)).await
    }

    pub async fn head(&self, url: &str) -> Result<Response> {
        self.request(Request::head(url)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.request(Request::delete(url)).await
    }

    pub async fn post(&self, url: &str, body: impl BodyProvider + 'static) -> Result<Response> {
        self.request(Request::post(url).body(body)).await
    }

    pub async fn put(&self, url: &str, body: impl BodyProvider + 'static) -> Result<Response> {
        self.request(Request::put(url).body(body)).await
    }

    pub async fn patch(&self, url: &str, body: impl BodyProvider + 'static) -> Result<Response> {
        self.request(Request::patch(url).body(body)).await
    }

    async fn execute(&self, request: &mut Request) -> Result<Response> {
        let mut request = HostOverride::apply(request);

        let url = build_url(&request.url, request.query.as_ref())?;
        if url.scheme() != "http" {
            return Err(Error::UnsupportedScheme(url.scheme().to_string()));
        }

        let produced = match request.body.take() {
            Some(provider) => provider.produce()?,
            None => Produced::empty(),
        };
        let headers = decorate(self.inner.options.defaults(), &request, produced.content_type.as_deref())?;

        let options = &self.inner.options;
        let exchange = Exchange::new(
            request.timeout.unwrap_or(options.timeout),
            request.request_timeout.or(options.request_timeout),
        );
        let hop = Hop {
            method: request.method.clone(),
            url,
            headers,
            replay: produced.replay,
        };

        let span = tracing::debug_span!(
            "exchange",
            exchange_id = %exchange.id(),
            method = %hop.method,
            url = %hop.url,
        );
        self.run(
            exchange,
            hop,
            produced.body,
            produced.monitor,
            !request.disable_redirect,
        )
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        exchange: Exchange,
        mut hop: Hop,
        mut body: RequestBody,
        monitor: Option<PipeMonitor>,
        follow: bool,
    ) -> Result<Response> {
        let mut redirects = 0;

        loop {
            let uri: Uri = hop.url.as_str().parse().map_err(|e| Error::InvalidUrl {
                url: hop.url.to_string(),
                source: Box::new(e),
            })?;
            let mut req = http::Request::new(TimedBody::sending(body, exchange.clone()));
            *req.method_mut() = hop.method.clone();
            *req.uri_mut() = uri;
            *req.headers_mut() = hop.headers.clone();

            exchange.enter(Phase::Sending);
            exchange.reset();
            tracing::debug!("Sending request");

            let sent = tokio::select! {
                res = self.inner.engine.request(req) => res,
                cause = exchange.signal().cancelled() => return Err(exchange.error_for(cause)),
            };
            let response = match sent {
                Ok(response) => response,
                Err(e) => return Err(classify(&exchange, monitor.as_ref(), e)),
            };

            exchange.stop();
            exchange.enter(Phase::Receiving);
            let (parts, incoming) = response.into_parts();
            tracing::debug!(status = %parts.status, version = ?parts.version, "Response headers received");

            if follow {
                if let Some(next) = redirect::next_hop(&hop, parts.status, parts.headers.get(LOCATION))? {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(Error::TooManyRedirects(MAX_REDIRECTS));
                    }
                    metrics::record_redirect(parts.status.as_u16());
                    tracing::debug!(
                        status = %parts.status,
                        location = %next.url,
                        method = %next.method,
                        hop = redirects,
                        "Following redirect"
                    );
                    drop(incoming);
                    body = match &next.replay {
                        Some(data) if !data.is_empty() => full_body(data.clone()),
                        _ => empty_body(),
                    };
                    hop = next;
                    continue;
                }
            }

            let head = RequestHead {
                method: hop.method,
                url: hop.url.clone(),
                headers: hop.headers,
            };
            let body = TimedBody::receiving(incoming, exchange);
            return Ok(Response::new(parts, body, hop.url, head));
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Map an engine failure to the error the caller sees.
///
/// A fired signal wins, then a multipart producer failure, then dial errors,
/// then timeouts found anywhere in the source chain.
fn classify(exchange: &Exchange, monitor: Option<&PipeMonitor>, err: legacy::Error) -> Error {
    if let Some(cancelled) = exchange.cancel_error() {
        return cancelled;
    }
    if let Some(produced) = monitor.and_then(PipeMonitor::error) {
        return Error::Multipart(produced);
    }
    if err.is_connect() {
        return Error::Connect(err);
    }
    if let Some(timeout) = body_timeout(exchange, &err) {
        return timeout;
    }
    if has_io_timeout(&err) {
        return exchange.phase_timeout_error();
    }
    Error::from_engine(err)
}

/// A timeout raised by one of our body wrappers, wherever it sits in the chain.
fn body_timeout(exchange: &Exchange, err: &(dyn StdError + 'static)) -> Option<Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(phase) = e.downcast_ref::<Error>().and_then(Error::timeout_phase) {
            return Some(exchange.error_for(Cause::Inactivity(phase)));
        }
        current = e.source();
    }
    None
}
