//! Request description and pre-send decoration.
//!
//! # Responsibilities
//! - Describe one request: method, URL, query, body, headers, cookies, auth
//! - Resolve the effective URL (raw query replaces, pairs merge)
//! - Apply the `host_ip` override through a guard that always restores
//! - Build the final header map in a fixed order
//!
//! # Design Decisions
//! - Decoration is pure and runs before anything touches the network
//! - The request object is borrowed mutably by `Client::send` so the
//!   override guard can restore it on every exit path
//! - Header values are validated here; a bad one fails the request early

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, HOST, USER_AGENT,
};
use http::Method;
use url::Url;

use crate::body::BodyProvider;
use crate::error::{Error, Result};

/// Default `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!("stallguard/", env!("CARGO_PKG_VERSION"));

/// HTTP basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Query string source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Replaces the URL's query verbatim.
    Raw(String),
    /// Merged into the URL's query; these keys win.
    Pairs(Vec<(String, String)>),
}

/// One request and its per-request options.
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Option<Query>,
    pub body: Option<Box<dyn BodyProvider>>,
    /// Overrides the content type implied by the body.
    pub content_type: Option<String>,
    /// Overrides every other `User-Agent`.
    pub user_agent: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    /// Appended to the `Cookie` header as is.
    pub raw_cookie: Option<String>,
    /// Explicit `Host` header.
    pub host: Option<String>,
    /// Dial this IP instead of resolving the URL host.
    pub host_ip: Option<String>,
    pub auth: Option<Auth>,
    /// Send `X-Requested-With: XMLHttpRequest`.
    pub is_ajax: bool,
    pub disable_redirect: bool,
    /// Inactivity timeout for this request; overrides the client's.
    pub timeout: Option<Duration>,
    /// Overall deadline for this request; overrides the client's.
    pub request_timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: None,
            body: None,
            content_type: None,
            user_agent: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            raw_cookie: None,
            host: None,
            host_ip: None,
            auth: None,
            is_ajax: false,
            disable_redirect: false,
            timeout: None,
            request_timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn body(mut self, body: impl BodyProvider + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    pub fn raw_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(Query::Raw(query.into()));
        self
    }

    pub fn query_pairs<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query = Some(Query::Pairs(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn raw_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.raw_cookie = Some(cookie.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = Some(ip.into());
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(Auth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn ajax(mut self) -> Self {
        self.is_ajax = true;
        self
    }

    pub fn disable_redirect(mut self) -> Self {
        self.disable_redirect = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .field("headers", &self.headers)
            .field("host", &self.host)
            .field("host_ip", &self.host_ip)
            .field("disable_redirect", &self.disable_redirect)
            .finish_non_exhaustive()
    }
}

/// Rewrites a request's URL host to `host_ip` for the duration of a send.
///
/// The original URL and `Host` are put back when the guard drops, whatever
/// the outcome of the send.
pub struct HostOverride<'a> {
    request: &'a mut Request,
    original: Option<(String, Option<String>)>,
}

impl<'a> HostOverride<'a> {
    pub fn apply(request: &'a mut Request) -> Self {
        let Some(ip) = request.host_ip.clone().filter(|ip| !ip.is_empty()) else {
            return Self {
                request,
                original: None,
            };
        };
        let Ok(mut url) = Url::parse(&request.url) else {
            // left alone; URL validation reports the error
            return Self {
                request,
                original: None,
            };
        };

        let authority = authority(&url);
        let bracketed = if ip.contains(':') && !ip.starts_with('[') {
            format!("[{ip}]")
        } else {
            ip
        };
        if url.set_host(Some(bracketed.as_str())).is_err() {
            return Self {
                request,
                original: None,
            };
        }

        let original = (request.url.clone(), request.host.clone());
        tracing::trace!(host = %authority, ip = %bracketed, "Applying host override");
        request.url = url.to_string();
        request.host.get_or_insert(authority);

        Self {
            request,
            original: Some(original),
        }
    }

    pub fn is_active(&self) -> bool {
        self.original.is_some()
    }
}

impl Deref for HostOverride<'_> {
    type Target = Request;

    fn deref(&self) -> &Request {
        self.request
    }
}

impl DerefMut for HostOverride<'_> {
    fn deref_mut(&mut self) -> &mut Request {
        self.request
    }
}

impl Drop for HostOverride<'_> {
    fn drop(&mut self) {
        if let Some((url, host)) = self.original.take() {
            self.request.url = url;
            self.request.host = host;
        }
    }
}

/// `host[:port]` as sent in a `Host` header.
pub fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Parse `raw` and apply the query option.
pub fn build_url(raw: &str, query: Option<&Query>) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| Error::InvalidUrl {
        url: raw.to_string(),
        source: Box::new(e),
    })?;

    match query {
        Some(Query::Raw(q)) => url.set_query(Some(q).filter(|q| !q.is_empty()).map(String::as_str)),
        Some(Query::Pairs(pairs)) if !pairs.is_empty() => {
            let explicit: BTreeMap<&str, &str> =
                pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !explicit.contains_key(k.as_ref()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();

            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .extend_pairs(explicit);
        }
        _ => {}
    }

    Ok(url)
}

/// Client-wide values merged into every request.
#[derive(Debug, Clone, Copy)]
pub struct Defaults<'a> {
    pub user_agent: Option<&'a str>,
    pub headers: &'a [(String, String)],
    pub cookies: &'a [(String, String)],
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::InvalidHeader(format!("invalid header name {name:?}")))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::InvalidHeader(format!("invalid value for header {name:?}")))
}

/// Build the final header map.
///
/// Later steps win: default user agent, client headers, request headers,
/// `Host`, basic auth, ajax marker, body content type, content type
/// override, user agent override. Cookies become one `Cookie` header.
pub fn decorate(
    defaults: Defaults<'_>,
    request: &Request,
    body_content_type: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let user_agent = defaults.user_agent.unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(USER_AGENT, header_value("user-agent", user_agent)?);

    for (name, value) in defaults.headers.iter().chain(request.headers.iter()) {
        headers.insert(header_name(name)?, header_value(name, value)?);
    }

    if let Some(host) = request.host.as_deref().filter(|h| !h.is_empty()) {
        headers.insert(HOST, header_value("host", host)?);
    }

    if let Some(auth) = &request.auth {
        let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
        headers.insert(AUTHORIZATION, header_value("authorization", &format!("Basic {token}"))?);
    }

    if request.is_ajax {
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
    }

    let content_type = request.content_type.as_deref().or(body_content_type);
    if let Some(ct) = content_type.filter(|ct| !ct.is_empty()) {
        headers.insert(CONTENT_TYPE, header_value("content-type", ct)?);
    }

    if let Some(ua) = request.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
        headers.insert(USER_AGENT, header_value("user-agent", ua)?);
    }

    if let Some(cookie) = cookie_header(defaults.cookies, &request.cookies, request.raw_cookie.as_deref()) {
        headers.insert(COOKIE, header_value("cookie", &cookie)?);
    }

    Ok(headers)
}

/// Merge client cookies with request cookies (request wins, order kept),
/// then append the raw cookie string.
pub fn cookie_header(
    defaults: &[(String, String)],
    pairs: &[(String, String)],
    raw: Option<&str>,
) -> Option<String> {
    let mut merged: Vec<(&str, &str)> = Vec::new();
    for (name, value) in defaults.iter().chain(pairs.iter()) {
        match merged.iter_mut().find(|(n, _)| *n == name.as_str()) {
            Some(existing) => existing.1 = value.as_str(),
            None => merged.push((name.as_str(), value.as_str())),
        }
    }

    let mut parts: Vec<String> = merged
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    if let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) {
        parts.push(raw.to_string());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_defaults() -> Defaults<'static> {
        Defaults {
            user_agent: None,
            headers: &[],
            cookies: &[],
        }
    }

    #[test]
    fn raw_query_replaces() {
        let url = build_url("http://a.test/p?x=1", Some(&Query::Raw("y=2".into()))).unwrap();
        assert_eq!(url.as_str(), "http://a.test/p?y=2");
    }

    #[test]
    fn pair_query_merges_and_wins() {
        let query = Query::Pairs(vec![("x".into(), "9".into()), ("z".into(), "a b".into())]);
        let url = build_url("http://a.test/p?x=1&keep=yes", Some(&query)).unwrap();
        assert_eq!(url.query(), Some("keep=yes&x=9&z=a+b"));
    }

    #[test]
    fn invalid_url_is_reported() {
        let err = build_url("not a url", None).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { ref url, .. } if url == "not a url"));
    }

    #[test]
    fn host_override_restores_on_drop() {
        let mut req = Request::get("http://api.test:8080/v1").host_ip("127.0.0.1");
        {
            let guard = HostOverride::apply(&mut req);
            assert!(guard.is_active());
            assert_eq!(guard.url, "http://127.0.0.1:8080/v1");
            assert_eq!(guard.host.as_deref(), Some("api.test:8080"));
        }
        assert_eq!(req.url, "http://api.test:8080/v1");
        assert!(req.host.is_none());
    }

    #[test]
    fn explicit_host_survives_override() {
        let mut req = Request::get("http://api.test/").host_ip("10.0.0.1").host("front.test");
        let guard = HostOverride::apply(&mut req);
        assert_eq!(guard.host.as_deref(), Some("front.test"));
        drop(guard);
        assert_eq!(req.host.as_deref(), Some("front.test"));
    }

    #[test]
    fn decoration_order() {
        let client_headers = vec![
            ("X-Env".to_string(), "prod".to_string()),
            ("User-Agent".to_string(), "from-client-headers".to_string()),
        ];
        let defaults = Defaults {
            user_agent: Some("client-ua"),
            headers: &client_headers,
            cookies: &[],
        };
        let req = Request::post("http://a.test/")
            .header("X-Env", "staging")
            .basic_auth("ann", "s3cret")
            .ajax()
            .content_type("text/plain");

        let headers = decorate(defaults, &req, Some("application/json")).unwrap();
        assert_eq!(headers["x-env"], "staging");
        assert_eq!(headers[USER_AGENT], "from-client-headers");
        assert_eq!(headers[AUTHORIZATION], "Basic YW5uOnMzY3JldA==");
        assert_eq!(headers["x-requested-with"], "XMLHttpRequest");
        assert_eq!(headers[CONTENT_TYPE], "text/plain");

        let req = Request::get("http://a.test/").user_agent("mine");
        let headers = decorate(defaults, &req, None).unwrap();
        assert_eq!(headers[USER_AGENT], "mine");
        assert!(headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn default_user_agent_carries_version() {
        let headers = decorate(no_defaults(), &Request::get("http://a.test/"), None).unwrap();
        let ua = headers[USER_AGENT].to_str().unwrap();
        assert!(ua.starts_with("stallguard/"));
    }

    #[test]
    fn bad_header_fails_early() {
        let req = Request::get("http://a.test/").header("X-Bad", "line\nbreak");
        assert!(matches!(decorate(no_defaults(), &req, None), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn cookies_merge_request_wins() {
        let defaults = vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())];
        let pairs = vec![("b".to_string(), "3".to_string())];
        assert_eq!(
            cookie_header(&defaults, &pairs, Some("raw=x")).as_deref(),
            Some("a=1; b=3; raw=x")
        );
        assert_eq!(cookie_header(&[], &[], Some("  ")), None);
    }
}
