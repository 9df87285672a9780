//! Device records of device-info responses.
//!
//! Servers and players describe themselves with one element per device,
//! either in markup:
//!
//! ```xml
//! <MediaContainer size="1">
//!   <Server name="Den" host="10.0.0.2" port="32500" product="Plex HTPC"
//!           version="1.60" platform="Linux" platformVersion="6.1"
//!           machineIdentifier="abc" protocolCapabilities="timeline,playback"/>
//! </MediaContainer>
//! ```
//!
//! or as a binary property list with the same keys. Elements without a host
//! are skipped and counted as dropped. A missing port selects
//! [`DEFAULT_PORT`]; a port that is present but not usable becomes `0`,
//! which validation later removes.

use std::{collections::BTreeSet, convert::Infallible, fmt, ops::Deref, str::FromStr};

use serde::Serialize;
use serde_with::skip_serializing_none;

use super::Node;
use crate::{
    normalize::{Listing, Record, Verdict},
    target::DEFAULT_PORT,
};

/// String that defaults to "unknown" when missing.
///
/// ```rust
/// use plexer::protocol::device::StringOrUnknown;
///
/// assert_eq!(&*StringOrUnknown::default(), "unknown");
/// ```
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
#[serde(transparent)]
pub struct StringOrUnknown(pub String);

impl StringOrUnknown {
    pub const UNKNOWN: &'static str = "unknown";

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl Deref for StringOrUnknown {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for StringOrUnknown {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Default for StringOrUnknown {
    fn default() -> Self {
        Self(String::from(Self::UNKNOWN))
    }
}

impl fmt::Display for StringOrUnknown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A server or player reachable on the network.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Friendly name, or the host when the device has none.
    pub name: String,
    pub product: Option<String>,
    pub product_version: Option<String>,
    pub platform: Option<String>,
    pub platform_version: StringOrUnknown,
    pub client_identifier: Option<String>,

    pub host: String,
    /// `0` when the device advertised a port that is not usable.
    pub port: u16,

    /// Capabilities such as `timeline` or `playback`.
    pub protocol_capabilities: BTreeSet<String>,

    /// LAN addresses, in advertised order without duplicates.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_addresses: Vec<String>,
}

impl DeviceRecord {
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.protocol_capabilities.contains(capability)
    }
}

impl Record for DeviceRecord {
    type Key = (String, u16);

    fn key(&self) -> Self::Key {
        (self.host.clone(), self.port)
    }

    fn verify(self) -> Verdict<Self> {
        if self.host.trim().is_empty() || self.port == 0 {
            Verdict::Drop
        } else {
            Verdict::Keep(self)
        }
    }
}

/// Extracts the devices of a device-info response.
///
/// Every direct child of the root describes one device, whatever its
/// element name.
pub(crate) fn extract_device_records(root: &Node) -> Listing<DeviceRecord> {
    let mut listing = Listing::default();

    for node in &root.children {
        match extract(node) {
            Some(device) => listing.items.push(device),
            None => listing.dropped += 1,
        }
    }

    listing
}

fn extract(node: &Node) -> Option<DeviceRecord> {
    let Some(host) = node.attr("host") else {
        debug!(
            "skipping <{}> {}: no host",
            node.kind,
            node.attr("name").unwrap_or_default()
        );
        return None;
    };

    let port = match node.attr("port") {
        None => DEFAULT_PORT,
        Some(port) => port.parse().unwrap_or_else(|_| {
            debug!("device {host} advertises unusable port {port}");
            0
        }),
    };

    let protocol_capabilities = node
        .attr_any(&["protocolCapabilities", "provides"])
        .map(|list| {
            list.split([',', ' '])
                .map(str::trim)
                .filter(|capability| !capability.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let mut local_addresses: Vec<String> = Vec::new();
    let advertised = node
        .attr("localAddresses")
        .into_iter()
        .flat_map(|list| list.split([',', ' ']))
        .chain(
            node.children_of_kind("Connection")
                .filter(|connection| connection.attr("local") == Some("1"))
                .filter_map(|connection| connection.attr("address")),
        );
    for address in advertised.map(str::trim).filter(|address| !address.is_empty()) {
        if !local_addresses.iter().any(|known| known == address) {
            local_addresses.push(address.to_owned());
        }
    }

    let text = |name| node.attr(name).map(str::to_owned);

    Some(DeviceRecord {
        name: node.attr("name").unwrap_or(host).to_owned(),
        product: text("product"),
        product_version: node
            .attr_any(&["productVersion", "version"])
            .map(str::to_owned),
        platform: text("platform"),
        platform_version: node
            .attr("platformVersion")
            .map_or_else(StringOrUnknown::default, |version| {
                StringOrUnknown(version.to_owned())
            }),
        client_identifier: node
            .attr_any(&["clientIdentifier", "machineIdentifier"])
            .map(str::to_owned),
        host: host.to_owned(),
        port,
        protocol_capabilities,
        local_addresses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        normalize::finalize,
        protocol::{
            bplist::{
                self,
                writer::{encode, Object},
            },
            markup,
        },
    };

    fn devices(xml: &str) -> Listing<DeviceRecord> {
        extract_device_records(&markup::decode(xml.as_bytes()).unwrap())
    }

    #[test]
    fn extracts_device_and_skips_missing_host() {
        let listing = devices(
            r#"<MediaContainer size="2">
                 <Server name="Den" host="10.0.0.2" port="32500" product="Plex HTPC"
                         version="1.60" platform="Linux" machineIdentifier="abc"
                         protocolCapabilities="timeline,playback, navigation"/>
                 <Server name="Ghost" port="32500"/>
               </MediaContainer>"#,
        );

        assert_eq!(listing.len(), 1);
        assert_eq!(listing.dropped, 1);

        let device = &listing.items[0];
        assert_eq!(device.name, "Den");
        assert_eq!(device.host, "10.0.0.2");
        assert_eq!(device.port, 32500);
        assert_eq!(device.product.as_deref(), Some("Plex HTPC"));
        assert_eq!(device.product_version.as_deref(), Some("1.60"));
        assert_eq!(device.client_identifier.as_deref(), Some("abc"));
        assert!(device.platform_version.is_unknown());
        assert!(device.has_capability("timeline"));
        assert!(device.has_capability("navigation"));
        assert_eq!(device.protocol_capabilities.len(), 3);
    }

    #[test]
    fn port_defaults_and_unusable_ports_are_dropped() {
        let listing = devices(
            r#"<MediaContainer>
                 <Device host="a"/>
                 <Device host="b" port="99999"/>
                 <Device host="c" port="http"/>
               </MediaContainer>"#,
        );

        assert_eq!(listing.items[0].port, DEFAULT_PORT);
        assert_eq!(listing.items[1].port, 0);
        assert_eq!(listing.items[2].port, 0);

        let finalized = finalize(listing);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized.dropped, 2);
    }

    #[test]
    fn local_addresses_are_merged_in_order() {
        let listing = devices(
            r#"<MediaContainer>
                 <Device name="Box" host="box.local" localAddresses="10.0.0.5, 10.0.0.6">
                   <Connection address="10.0.0.6" local="1"/>
                   <Connection address="84.1.2.3" local="0"/>
                   <Connection address="10.0.0.7" local="1"/>
                 </Device>
               </MediaContainer>"#,
        );

        assert_eq!(
            listing.items[0].local_addresses,
            ["10.0.0.5", "10.0.0.6", "10.0.0.7"]
        );
    }

    #[test]
    fn duplicate_host_and_port_keep_first() {
        let listing = finalize(devices(
            r#"<MediaContainer>
                 <Device name="first" host="10.0.0.2"/>
                 <Device name="other port" host="10.0.0.2" port="32500"/>
                 <Device name="second" host="10.0.0.2" port="32400"/>
               </MediaContainer>"#,
        ));

        let names: Vec<_> = listing.iter().map(|device| device.name.as_str()).collect();
        assert_eq!(names, ["first", "other port"]);
        assert_eq!(listing.duplicates, 1);
    }

    #[test]
    fn extracts_binary_property_list() {
        let string = |text: &str| Object::String(text.to_owned());
        let objects = vec![
            Object::Dict(vec![(1, 2)]),                  // 0
            string("Device"),                            // 1
            Object::Array(vec![3, 10]),                  // 2
            Object::Dict(vec![(4, 5), (6, 7), (8, 9)]),  // 3
            string("name"),                              // 4
            string("Den"),                               // 5
            string("host"),                              // 6
            string("10.0.0.2"),                          // 7
            string("provides"),                          // 8
            string("server player"),                     // 9
            Object::Dict(vec![(4, 11)]),                 // 10
            string("No host"),                           // 11
        ];

        let root = bplist::decode(&encode(&objects, 0)).unwrap();
        let listing = extract_device_records(&root);

        assert_eq!(listing.len(), 1);
        assert_eq!(listing.dropped, 1);
        assert_eq!(listing.items[0].port, DEFAULT_PORT);
        assert!(listing.items[0].has_capability("server"));
        assert!(listing.items[0].has_capability("player"));
    }
}
