//! Response decoding and extraction for Plex Media Server.
//!
//! Responses arrive as opaque bytes in one of two encodings:
//!
//! * XML markup, used for navigation and most device-info responses
//! * Binary property lists, used for device descriptors by some servers
//!
//! Both decode into the same generic [`Node`] tree, which the extractors
//! then interpret:
//!
//! * [`navigation`] - browse responses into media entries
//! * [`device`] - device-info responses into device records
//!
//! The tree never leaves the crate; callers only see the typed records.
//!
//! # Dispatch
//!
//! The encoding is taken from the response's content type when it names
//! one. Otherwise it is sniffed from the first bytes: markup starts with
//! `<` (after an optional byte order mark and whitespace), binary property
//! lists with the magic header `bplist00`.

pub mod bplist;
pub mod device;
pub mod markup;
pub mod navigation;

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Deepest nesting either decoder accepts. Plex responses nest a handful of
/// levels; anything deeper is rejected as malformed.
pub const MAX_DEPTH: usize = 256;

/// Element of a decoded response.
///
/// For markup, `kind` is the element name and `attributes` its attributes.
/// For binary property lists, `kind` is the dictionary key the value was
/// found under.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Node {
    pub kind: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<Node>,
    pub body: Option<Vec<u8>>,
}

impl Node {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Attribute value with surrounding whitespace removed, if not blank.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// First of several attributes that is present and not blank.
    pub fn attr_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.attr(name))
    }

    /// Attribute parsed as an unsigned integer.
    ///
    /// Values that do not parse are treated as absent.
    pub fn attr_u64(&self, name: &str) -> Option<u64> {
        self.attr(name).and_then(|value| value.parse().ok())
    }

    /// Direct children of the given kind, in source order.
    pub fn children_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |child| child.kind == kind)
    }

    /// First descendant of the given kind, depth-first in source order.
    pub fn find(&self, kind: &str) -> Option<&Node> {
        self.children.iter().find_map(|child| {
            if child.kind == kind {
                Some(child)
            } else {
                child.find(kind)
            }
        })
    }

    /// Attributes as an ordered map.
    pub fn sorted_attributes(&self) -> std::collections::BTreeMap<String, String> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Encodings a response body can be decoded from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Encoding {
    /// XML markup
    Markup,
    /// Binary property list
    Binary,
}

impl Encoding {
    /// Encoding named by a `Content-Type` header value, if any.
    ///
    /// Generic types such as `application/octet-stream` name no encoding.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime.ends_with("/xml") || mime.ends_with("+xml") {
            Some(Self::Markup)
        } else if mime.contains("bplist") || mime.ends_with("/x-plist") {
            Some(Self::Binary)
        } else {
            None
        }
    }

    /// Encoding recognized from the first bytes of a body.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(bplist::MAGIC) {
            return Some(Self::Binary);
        }

        let start = bytes.strip_prefix(markup::BOM).unwrap_or(bytes);
        match start.iter().find(|byte| !byte.is_ascii_whitespace()) {
            Some(b'<') => Some(Self::Markup),
            _ => None,
        }
    }
}

/// Decodes a response body into a tree of nodes.
///
/// # Errors
///
/// * `EmptyResponse` if the body is empty or only whitespace
/// * `MalformedResponse` if the body cannot be decoded under its declared or
///   sniffed encoding, with the byte offset where decoding stopped
pub(crate) fn decode(bytes: &[u8], content_type: Option<&str>) -> Result<Node> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::empty_response("response body is empty"));
    }

    let encoding = content_type
        .and_then(Encoding::from_content_type)
        .or_else(|| Encoding::sniff(bytes))
        .ok_or_else(|| Error::malformed(bytes, 0, "neither markup nor binary property list"))?;

    let root = match encoding {
        Encoding::Markup => markup::decode(bytes)?,
        Encoding::Binary => bplist::decode(bytes)?,
    };

    trace!(
        "decoded {encoding:?} response: <{}> with {} children",
        root.kind,
        root.children.len()
    );
    Ok(root)
}
