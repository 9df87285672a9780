//! Entry points that turn server responses into typed listings.
//!
//! Every entry point runs the same pipeline:
//!
//! 1. decode the body into a tree
//! 2. extract records from the tree
//! 3. deduplicate and validate the records
//!
//! Decoding is the only step that fails. Records that cannot be represented
//! are counted in the returned [`Listing`] instead.
//!
//! # Example
//!
//! ```rust
//! use plexer::{config::Config, http::Client, parser::Parser};
//!
//! let parser = Parser::new(Client::new(&Config::new())?);
//! let listing = parser
//!     .parse_navigation("192.168.1.5", "32400", "/library/sections", "")
//!     .await?;
//!
//! for entry in &listing {
//!     println!("{}: {:?}", entry.kind(), entry.title());
//! }
//! ```

use crate::{
    error::Result,
    http::Transport,
    normalize::{finalize_devices, finalize_entries, Listing},
    protocol::{
        self,
        device::{extract_device_records, DeviceRecord},
        navigation::{extract_media_entries, MediaEntry},
    },
    target::{build_request_target, ServerTarget},
};

/// Fetches and parses listings through a transport.
pub struct Parser<T> {
    transport: T,
}

impl<T: Transport> Parser<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches and parses the listing of a navigation path.
    ///
    /// # Errors
    ///
    /// * `InvalidAddress`, `InvalidPort` or `InvalidArgument` if the request
    ///   target cannot be built
    /// * Any transport error
    /// * `EmptyResponse` or `MalformedResponse` if the body cannot be decoded
    pub async fn parse_navigation(
        &self,
        address: &str,
        port: &str,
        navigation_path: &str,
        auth_token: &str,
    ) -> Result<Listing<MediaEntry>> {
        let target = build_request_target(address, port, navigation_path, auth_token)?;
        self.browse(&target).await
    }

    /// Fetches and parses the listing of an already built target.
    ///
    /// # Errors
    ///
    /// Same as [`Parser::parse_navigation`], except for building the target.
    pub async fn browse(&self, target: &ServerTarget) -> Result<Listing<MediaEntry>> {
        let response = self.transport.fetch(target).await?;
        parse_navigation_response(target, &response.body, response.content_type.as_deref())
    }

    /// Fetches and parses a device-info response.
    ///
    /// # Errors
    ///
    /// Any transport error, or `EmptyResponse` or `MalformedResponse` if the
    /// body cannot be decoded.
    pub async fn devices(&self, target: &ServerTarget) -> Result<Listing<DeviceRecord>> {
        let response = self.transport.fetch(target).await?;
        parse_devices(&response.body, response.content_type.as_deref())
    }
}

/// Parses a fetched navigation response.
///
/// `content_type` selects the encoding when it names one; otherwise the
/// encoding is sniffed from the body.
///
/// # Errors
///
/// * `EmptyResponse` if the body is empty or only whitespace
/// * `MalformedResponse` if the body cannot be decoded
pub fn parse_navigation_response(
    target: &ServerTarget,
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<Listing<MediaEntry>> {
    let root = protocol::decode(bytes, content_type)?;
    let listing = finalize_entries(extract_media_entries(&root, target));

    log_listing(target.base_path(), "entries", &listing);
    Ok(listing)
}

/// Parses a device-info response, sniffing its encoding.
///
/// # Errors
///
/// * `EmptyResponse` if the body is empty or only whitespace
/// * `MalformedResponse` if the body cannot be decoded
pub fn parse_device_info(bytes: &[u8]) -> Result<Listing<DeviceRecord>> {
    parse_devices(bytes, None)
}

fn parse_devices(bytes: &[u8], content_type: Option<&str>) -> Result<Listing<DeviceRecord>> {
    let root = protocol::decode(bytes, content_type)?;
    let listing = finalize_devices(extract_device_records(&root));

    log_listing("device info", "devices", &listing);
    Ok(listing)
}

fn log_listing<T>(source: &str, what: &str, listing: &Listing<T>) {
    debug!("{source}: {} {what}", listing.len());
    if listing.is_lossy() {
        debug!(
            "{source}: {} dropped, {} duplicates, {} downgraded",
            listing.dropped, listing.duplicates, listing.downgraded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_valid_and_malformed_are_distinct() {
        let target = build_request_target("host", "", "/", "").unwrap();

        let empty = parse_navigation_response(&target, b"", None).unwrap_err();
        assert_eq!(empty.kind, ErrorKind::EmptyResponse);

        let malformed = parse_navigation_response(&target, b"<MediaContainer>", None).unwrap_err();
        assert_eq!(malformed.kind, ErrorKind::MalformedResponse);

        let listing = parse_navigation_response(&target, b"<MediaContainer/>", None).unwrap();
        assert!(listing.is_empty());
    }

    #[test]
    fn device_info_is_normalized() {
        let listing = parse_device_info(
            br#"<MediaContainer>
                  <Device host="10.0.0.2"/>
                  <Device host="10.0.0.2" port="32400"/>
                  <Device host="10.0.0.3" port="0"/>
                </MediaContainer>"#,
        )
        .unwrap();

        assert_eq!(listing.len(), 1);
        assert_eq!(listing.duplicates, 1);
        assert_eq!(listing.dropped, 1);
    }
}
