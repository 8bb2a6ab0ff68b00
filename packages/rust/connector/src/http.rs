//! Outbound HTTP for template connectors: target checks, retries, and
//! redirect control.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::Policy;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use enrichkit_shared::{EnrichError, HttpConfig, Result};

use crate::document::{HttpMethod, RetrySpec};
use crate::ssrf::{BlockedTarget, CheckedResolver, SsrfGuard, check_scheme, check_url_static};

const USER_AGENT: &str = concat!("enrichkit/", env!("CARGO_PKG_VERSION"));

/// Longest wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A fully rendered request, ready to send.
#[derive(Clone)]
pub struct RenderedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

// Header and query values routinely carry credentials.
impl fmt::Debug for RenderedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        let query_names: Vec<&str> = self.query.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("RenderedRequest")
            .field("method", &self.method)
            .field("url", &redacted_url(&self.url))
            .field("headers", &header_names)
            .field("query", &query_names)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Scheme, host and path only; the query string may hold keys.
fn redacted_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        }
        Err(_) => "<invalid url>".into(),
    }
}

/// Raw response as received from the upstream source.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Retry schedule: `backoff_factor * 2^attempt` seconds between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: 0.0,
        }
    }

    /// Delay before retry number `attempt` (zero-based), capped at
    /// [`MAX_BACKOFF`].
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powi(attempt.min(16) as i32);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl From<&RetrySpec> for RetryPolicy {
    fn from(spec: &RetrySpec) -> Self {
        Self {
            max_retries: spec.max_retries,
            backoff_factor: spec.backoff_factor,
        }
    }
}

// ---------------------------------------------------------------------------
// Redirect control
// ---------------------------------------------------------------------------

/// Decide whether to follow a redirect to `next` after `hops` prior hops.
fn check_redirect_hop(
    next: &Url,
    hops: usize,
    max_redirects: usize,
    allow_private: bool,
) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
    if hops >= max_redirects {
        return Err(format!("too many redirects (limit {max_redirects})").into());
    }
    check_scheme(next).map_err(BlockedTarget::from)?;
    if allow_private {
        return Ok(());
    }
    check_url_static(next).map_err(BlockedTarget::from)?;
    Ok(())
}

/// Refusal raised by the redirect policy or the resolver, if any.
fn find_blocked_target(err: &reqwest::Error) -> Option<&BlockedTarget> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<BlockedTarget>() {
            return Some(blocked);
        }
        source = inner.source();
    }
    None
}

// ---------------------------------------------------------------------------
// Caller
// ---------------------------------------------------------------------------

/// HTTP client wrapper shared by every template connector.
#[derive(Debug, Clone)]
pub struct HttpCaller {
    client: Client,
    guard: SsrfGuard,
}

impl HttpCaller {
    /// Build a caller from runtime HTTP settings.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let max_redirects = config.max_redirects;
        let allow_private = config.allow_private_targets;

        let mut builder = Client::builder().user_agent(USER_AGENT);
        if !allow_private {
            builder = builder.dns_resolver(Arc::new(CheckedResolver));
        }
        let client = builder
            .redirect(Policy::custom(move |attempt| {
                match check_redirect_hop(
                    attempt.url(),
                    attempt.previous().len(),
                    max_redirects,
                    allow_private,
                ) {
                    Ok(()) => attempt.follow(),
                    Err(e) => attempt.error(e),
                }
            }))
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                EnrichError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            guard: SsrfGuard::new(allow_private),
        })
    }

    pub fn guard(&self) -> &SsrfGuard {
        &self.guard
    }

    /// Send `request`, retrying retryable failures per `retry`.
    ///
    /// The target check runs before every attempt, so a refused target never
    /// opens a socket.
    #[instrument(skip_all, fields(method = %request.method))]
    pub async fn call(&self, request: &RenderedRequest, retry: &RetryPolicy) -> Result<HttpResponse> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, request: &RenderedRequest) -> Result<HttpResponse> {
        let url = self.guard.check(&request.url).await?;
        let target = redacted_url(url.as_str());
        debug!(url = %target, "sending request");

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url.clone()),
            HttpMethod::Post => self.client.post(url.clone()),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if let Some(blocked) = find_blocked_target(&e) {
                return EnrichError::ssrf(blocked.target.clone(), blocked.reason.clone());
            }
            if e.is_redirect() {
                return EnrichError::upstream_fatal(format!("{target}: {e}"));
            }
            if e.is_builder() {
                return EnrichError::validation(format!("{target}: malformed request: {e}"));
            }
            EnrichError::upstream_transient(format!("{target}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::upstream_status(
                status.as_u16(),
                format!("{target}: HTTP {status}"),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| {
            EnrichError::upstream_transient(format!("{target}: body read failed: {e}"))
        })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
