//! Request targets and resource URL resolution.
//!
//! A [`ServerTarget`] is the explicit, immutable server context of a request:
//! address, port, navigation path and optional token. It is built once by
//! [`build_request_target`] and passed to everything that needs to know
//! which server it is talking to, including [`resolve_resource_url`] which
//! turns relative resource paths found in responses into absolute URLs.
//!
//! # Example
//!
//! ```rust
//! use plexer::target::{build_request_target, resolve_resource_url};
//!
//! let target = build_request_target("192.168.1.5", "32400", "/library/sections", "abc")?;
//! assert_eq!(
//!     target.url().as_str(),
//!     "http://192.168.1.5:32400/library/sections?X-Plex-Token=abc",
//! );
//!
//! let thumb = resolve_resource_url(&target, "/library/thumb/123")?;
//! assert_eq!(thumb, "http://192.168.1.5:32400/library/thumb/123?X-Plex-Token=abc");
//! ```

use std::{fmt, net::IpAddr, sync::LazyLock};

use regex_lite::Regex;
use url::{Host, Url};

use crate::{
    error::{Error, Result},
    token::AuthToken,
};

/// Port Plex Media Server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 32400;

/// Query parameter that carries the authentication token.
pub const TOKEN_PARAMETER: &str = "X-Plex-Token";

/// Matches a leading URL scheme such as `http://`.
static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("invalid scheme pattern"));

/// Address, port, navigation path and token of a single request.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServerTarget {
    host: Host<String>,
    port: u16,
    base_path: String,
    auth_token: Option<AuthToken>,
}

impl ServerTarget {
    /// Server address as given, without brackets for IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        match &self.host {
            Host::Ipv6(ip) => ip.to_string(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Percent-normalized navigation path, including any query.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<&AuthToken> {
        self.auth_token.as_ref()
    }

    /// Server root, e.g. `http://192.168.1.5:32400/`.
    #[must_use]
    pub fn origin(&self) -> Url {
        let mut url = Url::parse("http://localhost/").expect("static URL is valid");
        // Setting a host that was parsed into a `Host` before cannot fail.
        let _ = url.set_host(Some(&self.host.to_string()));
        let _ = url.set_port(Some(self.port));
        url
    }

    /// Full request URL with the token as query parameter.
    #[must_use]
    pub fn url(&self) -> Url {
        let mut url = self.origin();
        let (path, query) = split_query(&self.base_path);
        url.set_path(path);
        url.set_query(query);
        self.authorize(&mut url);
        url
    }

    /// Derives a target on the same server for another navigation path.
    ///
    /// Used to descend into a container through its browse path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if the path carries a scheme or host.
    pub fn with_path(&self, navigation_path: &str) -> Result<Self> {
        Ok(Self {
            base_path: normalize_path(navigation_path)?,
            ..self.clone()
        })
    }

    /// Navigation path of a container key found in this target's response.
    ///
    /// Absolute keys are taken as they are. Relative keys, as returned for
    /// library sections, are appended to the current path.
    #[must_use]
    pub fn child_path(&self, key: &str) -> String {
        if key.starts_with('/') {
            return key.to_owned();
        }

        let (path, _) = split_query(&self.base_path);
        format!("{}/{key}", path.trim_end_matches('/'))
    }

    fn authorize(&self, url: &mut Url) {
        if let Some(token) = &self.auth_token {
            let present = url.query_pairs().any(|(key, _)| key == TOKEN_PARAMETER);
            if !present {
                url.query_pairs_mut().append_pair(TOKEN_PARAMETER, token);
            }
        }
    }
}

/// Redacts the token.
impl fmt::Debug for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_path", &self.base_path)
            .field("auth_token", &self.auth_token)
            .finish()
    }
}

/// Builds the target of a request to a media server.
///
/// * `address` - hostname or literal IP address, must not be empty
/// * `port` - decimal port; empty text selects [`DEFAULT_PORT`]
/// * `navigation_path` - server path, percent-normalized on the way in
/// * `auth_token` - optional token; empty text means unauthenticated
///
/// # Errors
///
/// * `InvalidAddress` if the address is empty or not a valid host, or the
///   navigation path starts with a scheme or host
/// * `InvalidPort` if the port is not an integer in 1-65535
/// * `InvalidArgument` if the token contains whitespace
pub fn build_request_target(
    address: &str,
    port: &str,
    navigation_path: &str,
    auth_token: &str,
) -> Result<ServerTarget> {
    let host = parse_host(address)?;
    let port = parse_port(port)?;
    let base_path = normalize_path(navigation_path)?;

    let auth_token = if auth_token.trim().is_empty() {
        None
    } else {
        Some(auth_token.parse()?)
    };

    Ok(ServerTarget {
        host,
        port,
        base_path,
        auth_token,
    })
}

/// Turns a resource path found in a response into a fetchable URL.
///
/// Absolute URLs are returned unchanged. Relative paths are joined onto the
/// server root and get the token appended, unless they already carry one.
/// The token is only ever appended to URLs on the server's own origin, so
/// scheme-relative paths such as `//other.host/x` resolve without it.
///
/// # Errors
///
/// Returns `InvalidAddress` if the path cannot be joined onto the server
/// root.
pub fn resolve_resource_url(base: &ServerTarget, relative_path: &str) -> Result<String> {
    if is_absolute(relative_path) {
        return Ok(relative_path.to_owned());
    }

    let origin = base.origin();
    let mut url = origin.join(relative_path)?;
    if url.origin() == origin.origin() {
        base.authorize(&mut url);
    } else {
        debug!("not sending token to {}", url.origin().ascii_serialization());
    }
    Ok(url.into())
}

/// Whether `url` is an absolute URL with a scheme and host.
#[must_use]
pub fn is_absolute(url: &str) -> bool {
    Url::parse(url).is_ok_and(|url| url.has_host())
}

fn parse_host(address: &str) -> Result<Host<String>> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::invalid_address("address is empty"));
    }

    let unbracketed = address
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(address);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(match ip {
            IpAddr::V4(ip) => Host::Ipv4(ip),
            IpAddr::V6(ip) => Host::Ipv6(ip),
        });
    }

    if address
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@' | ':' | '[' | ']'))
    {
        return Err(Error::invalid_address(format!(
            "{address} is not a hostname or IP address"
        )));
    }

    Host::parse(address).map_err(|e| Error::invalid_address(format!("{address}: {e}")))
}

fn parse_port(port: &str) -> Result<u16> {
    let port = port.trim();
    if port.is_empty() {
        return Ok(DEFAULT_PORT);
    }

    match port.parse::<u16>() {
        Ok(0) => Err(Error::invalid_port("port 0 is not usable")),
        Ok(port) => Ok(port),
        Err(e) => Err(Error::invalid_port(format!("{port}: {e}"))),
    }
}

/// Percent-normalizes a navigation path.
///
/// Existing escapes are kept, unsafe characters are escaped and a leading
/// `/` is ensured. Paths that name a scheme or host are refused rather than
/// stripped.
fn normalize_path(navigation_path: &str) -> Result<String> {
    let navigation_path = navigation_path.trim();
    if SCHEME.is_match(navigation_path) || navigation_path.starts_with("//") {
        return Err(Error::invalid_address(format!(
            "navigation path {navigation_path} must not contain a scheme or host"
        )));
    }

    // `Url` does the escaping; the host is a placeholder.
    let mut url = Url::parse("http://localhost/").expect("static URL is valid");
    let (path, query) = split_query(navigation_path);
    if path.starts_with('/') {
        url.set_path(path);
    } else {
        url.set_path(&format!("/{path}"));
    }
    url.set_query(query.filter(|query| !query.is_empty()));

    let mut normalized = url.path().to_owned();
    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    Ok(normalized)
}

fn split_query(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    }
}
