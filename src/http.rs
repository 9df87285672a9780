//! HTTP transport to Plex Media Server.
//!
//! [`Transport`] is the seam between fetching and parsing: it turns a
//! [`ServerTarget`] into the raw bytes of a response. The parser never
//! looks behind it, so tests substitute canned responses.
//!
//! [`Client`] is the production transport. It wraps `reqwest::Client` and
//! adds:
//! * Rate limiting, to not flood a server with requests when browsing deep
//!   hierarchies
//! * The `X-Plex-*` client identification headers
//! * Mapping of HTTP status codes onto error kinds
//!
//! # Example
//!
//! ```rust
//! use plexer::{config::Config, http::{Client, Transport}, target::build_request_target};
//!
//! let client = Client::new(&Config::new())?;
//! let target = build_request_target("192.168.1.5", "", "/library/sections", "")?;
//! let response = client.fetch(&target).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method, Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
    target::ServerTarget,
};

/// Raw response of a server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub body: Vec<u8>,

    /// Value of the `Content-Type` header, if sent.
    pub content_type: Option<String>,
}

impl Response {
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.map(str::to_owned),
        }
    }
}

/// Fetches responses from a server.
pub trait Transport {
    /// Fetches the resource `target` points at.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` if the server refuses the token
    /// * `NotFound` if the path does not exist
    /// * `Unavailable` if the server cannot be reached or fails
    /// * `DeadlineExceeded` if the request times out
    fn fetch(&self, target: &ServerTarget) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Request client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window for rate limiting.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(1);

    /// Maximum requests per interval. Requests beyond it are delayed.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for a connection to be established.
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client identifying itself with `config`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * A configuration value is not valid in a header
    /// * HTTP client creation fails
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let headers = Self::identification(config)?;

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Headers that identify this client to the server.
    fn identification(config: &Config) -> Result<HeaderMap> {
        let client_id = config.client_id.to_string();
        let fields = [
            ("x-plex-client-identifier", client_id.as_str()),
            ("x-plex-product", config.app_name.as_str()),
            ("x-plex-version", config.app_version.as_str()),
            ("x-plex-platform", config.platform.as_str()),
            ("x-plex-platform-version", config.platform_version.as_str()),
            ("x-plex-device-name", config.device_name.as_str()),
        ];

        let mut headers = HeaderMap::with_capacity(fields.len() + 1);
        headers.insert(ACCEPT, HeaderValue::from_static("application/xml"));
        for (name, value) in fields {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_str(value)?);
        }

        Ok(headers)
    }

    /// Builds a GET request.
    pub fn get(&self, url: Url) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Request execution fails
    /// * Network error occurs
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}

impl Transport for Client {
    async fn fetch(&self, target: &ServerTarget) -> Result<Response> {
        let request = self.get(target.url());
        debug!("GET {} {}", target.origin(), target.base_path());

        let response = self.execute(request).await?;
        error_for_status(response.status().as_u16(), target)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = response.bytes().await?;
        trace!(
            "received {} bytes ({})",
            body.len(),
            content_type.as_deref().unwrap_or("no content type")
        );

        Ok(Response {
            body: body.to_vec(),
            content_type,
        })
    }
}

/// Converts an HTTP status code that is not a success into an error.
///
/// Shared by [`Client`] and other [`Transport`] implementations so that
/// every transport reports statuses with the same error kinds. The error
/// names the request path only, never the token.
///
/// # Errors
///
/// Returns the error mapped from `status`, unless it is a success.
pub fn error_for_status(status: u16, target: &ServerTarget) -> Result<()> {
    let details = format!("{} returned status {status}", target.base_path());
    match status {
        200..=299 => Ok(()),
        401 => Err(Error::unauthenticated(details)),
        403 => Err(Error::permission_denied(details)),
        404 => Err(Error::not_found(details)),
        500..=599 => Err(Error::unavailable(details)),
        _ => Err(Error::unknown(details)),
    }
}
