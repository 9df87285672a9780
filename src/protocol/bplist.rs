//! Binary property list decoding.
//!
//! Some servers send device descriptors as binary property lists
//! (`bplist00`) instead of XML. The object graph is flattened into the same
//! [`Node`] tree the markup decoder builds:
//!
//! * the top-level dictionary becomes the root node, named `MediaContainer`
//! * scalar values become attributes
//! * dictionaries become child nodes named after their key
//! * arrays of dictionaries become one child node per element, all named
//!   after their key
//! * arrays of scalars become a single comma-separated attribute
//!
//! # Format
//!
//! ```text
//! "bplist00" | objects ... | offset table | trailer (32 bytes)
//! ```
//!
//! The trailer names the width of offsets and object references, the
//! number of objects, the top object and where the offset table starts.

use std::{collections::HashSet, fmt::Write};

use super::{Node, MAX_DEPTH};
use crate::error::{Error, Result};

/// Magic header of a binary property list.
pub const MAGIC: &[u8] = b"bplist00";

/// Kind of the root node, matching the markup root element.
pub const ROOT_KIND: &str = "MediaContainer";

const TRAILER_LEN: usize = 32;

/// Seconds between the Unix epoch and the property list epoch (2001-01-01).
const EPOCH_OFFSET: f64 = 978_307_200.0;

/// Decoded property list object.
#[derive(Clone, Debug, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Int(i128),
    Real(f64),
    Date(f64),
    Data(Vec<u8>),
    String(String),
    Uid(u64),
    Array(Vec<Value>),
    Dict(Vec<(String, Value)>),
}

/// Decodes a binary property list whose top object is a dictionary.
///
/// # Errors
///
/// Returns `MalformedResponse` for a bad header or trailer, references
/// outside the object table, reference cycles, graphs nested deeper than
/// [`MAX_DEPTH`] or visiting more objects than the input has bytes,
/// unsupported object markers and a top object that is not a dictionary.
pub(crate) fn decode(input: &[u8]) -> Result<Node> {
    let document = Document::parse(input)?;
    match document.object(document.top, &mut Walk::new(input.len()))? {
        Value::Dict(entries) => Ok(into_node(ROOT_KIND, entries)),
        _ => Err(Error::malformed(
            input,
            document.offset_of(document.top)?,
            "top object is not a dictionary",
        )),
    }
}

/// State of a walk over the object graph.
struct Walk {
    /// References currently being decoded; meeting one of them again means
    /// the graph has a cycle.
    path: HashSet<usize>,

    /// Objects that may still be decoded.
    ///
    /// Every reference takes at least one byte, so a graph without shared
    /// containers never visits more objects than the input has bytes.
    /// Containers shared by many parents are decoded once per parent and
    /// can blow up exponentially; they run out of budget instead.
    budget: usize,
}

impl Walk {
    fn new(budget: usize) -> Self {
        Self {
            path: HashSet::new(),
            budget,
        }
    }
}

struct Document<'a> {
    input: &'a [u8],
    offsets: Vec<usize>,
    ref_size: usize,
    top: usize,
}

impl<'a> Document<'a> {
    fn parse(input: &'a [u8]) -> Result<Self> {
        if !input.starts_with(MAGIC) {
            return Err(Error::malformed(input, 0, "missing bplist00 header"));
        }
        if input.len() < MAGIC.len() + TRAILER_LEN {
            return Err(Error::malformed(input, MAGIC.len(), "missing trailer"));
        }

        let trailer_start = input.len() - TRAILER_LEN;
        let trailer = &input[trailer_start..];
        let offset_size = usize::from(trailer[6]);
        let ref_size = usize::from(trailer[7]);
        let num_objects = be_uint(&trailer[8..16]);
        let top = be_uint(&trailer[16..24]);
        let table_start = be_uint(&trailer[24..32]);

        if !matches!(offset_size, 1 | 2 | 4 | 8) || !matches!(ref_size, 1 | 2 | 4 | 8) {
            return Err(Error::malformed(
                input,
                trailer_start + 6,
                format!("unsupported offset size {offset_size} or reference size {ref_size}"),
            ));
        }

        let num_objects = usize::try_from(num_objects).unwrap_or(usize::MAX);
        let table_start = usize::try_from(table_start).unwrap_or(usize::MAX);
        let table_len = num_objects.saturating_mul(offset_size);
        if num_objects == 0
            || table_start < MAGIC.len()
            || table_start.saturating_add(table_len) > trailer_start
        {
            return Err(Error::malformed(
                input,
                trailer_start + 8,
                "offset table lies outside the document",
            ));
        }

        let offsets = input[table_start..table_start + table_len]
            .chunks_exact(offset_size)
            .map(|chunk| usize::try_from(be_uint(chunk)).unwrap_or(usize::MAX))
            .collect();

        let top = usize::try_from(top).unwrap_or(usize::MAX);
        if top >= num_objects {
            return Err(Error::malformed(
                input,
                trailer_start + 16,
                format!("top object {top} out of range"),
            ));
        }

        Ok(Self {
            input,
            offsets,
            ref_size,
            top,
        })
    }

    fn offset_of(&self, reference: usize) -> Result<usize> {
        match self.offsets.get(reference) {
            Some(&offset) if offset >= MAGIC.len() && offset < self.input.len() - TRAILER_LEN => {
                Ok(offset)
            }
            _ => Err(Error::malformed(
                self.input,
                self.input.len() - TRAILER_LEN,
                format!("object reference {reference} out of range"),
            )),
        }
    }

    fn bytes(&self, start: usize, len: usize) -> Result<&'a [u8]> {
        start
            .checked_add(len)
            .and_then(|end| self.input.get(start..end))
            .ok_or_else(|| Error::malformed(self.input, start, "object runs past end of input"))
    }

    /// Decodes the object with the given reference.
    fn object(&self, reference: usize, walk: &mut Walk) -> Result<Value> {
        let offset = self.offset_of(reference)?;
        if walk.budget == 0 {
            return Err(Error::malformed(self.input, offset, "too many object references"));
        }
        walk.budget -= 1;

        if walk.path.len() >= MAX_DEPTH {
            return Err(Error::malformed(self.input, offset, "objects nested too deeply"));
        }
        if !walk.path.insert(reference) {
            return Err(Error::malformed(self.input, offset, "reference cycle"));
        }

        let marker = self.bytes(offset, 1)?[0];
        let info = marker & 0x0F;
        let value = match marker >> 4 {
            0x0 => match marker {
                0x00 | 0x0F => Value::Null,
                0x08 => Value::Bool(false),
                0x09 => Value::Bool(true),
                _ => return Err(self.unsupported(offset, marker)),
            },
            0x1 => {
                let len = 1usize << info;
                Value::Int(be_int(self.bytes(offset + 1, len)?).ok_or_else(|| {
                    Error::malformed(self.input, offset, "integer wider than 16 bytes")
                })?)
            }
            0x2 => {
                let len = 1usize << info;
                Value::Real(be_real(self.bytes(offset + 1, len)?).ok_or_else(|| {
                    Error::malformed(self.input, offset, format!("real of {len} bytes"))
                })?)
            }
            0x3 if marker == 0x33 => Value::Date(
                be_real(self.bytes(offset + 1, 8)?)
                    .ok_or_else(|| Error::malformed(self.input, offset, "bad date"))?,
            ),
            0x4 => {
                let (start, len) = self.length(offset, info)?;
                Value::Data(self.bytes(start, len)?.to_vec())
            }
            0x5 => {
                let (start, len) = self.length(offset, info)?;
                let text = self.bytes(start, len)?;
                Value::String(String::from_utf8_lossy(text).into_owned())
            }
            0x6 => {
                let (start, len) = self.length(offset, info)?;
                let units: Vec<u16> = self
                    .bytes(start, len.saturating_mul(2))?
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Value::String(String::from_utf16_lossy(&units))
            }
            0x8 => Value::Uid(be_uint(self.bytes(offset + 1, usize::from(info) + 1)?)),
            0xA => {
                let (start, len) = self.length(offset, info)?;
                let items = self
                    .references(start, len)?
                    .into_iter()
                    .map(|item| self.object(item, walk))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array(items)
            }
            0xD => {
                let (start, len) = self.length(offset, info)?;
                let keys = self.references(start, len)?;
                let values =
                    self.references(start.saturating_add(len.saturating_mul(self.ref_size)), len)?;
                let mut entries = Vec::with_capacity(len);
                for (key, value) in keys.into_iter().zip(values) {
                    let key = match self.object(key, walk)? {
                        Value::String(key) => key,
                        _ => {
                            return Err(Error::malformed(
                                self.input,
                                offset,
                                "dictionary key is not a string",
                            ))
                        }
                    };
                    entries.push((key, self.object(value, walk)?));
                }
                Value::Dict(entries)
            }
            _ => return Err(self.unsupported(offset, marker)),
        };

        walk.path.remove(&reference);
        Ok(value)
    }

    /// Start and length of a variable-length object's payload.
    ///
    /// A length nibble of `0xF` means the length follows as an integer
    /// object.
    fn length(&self, offset: usize, info: u8) -> Result<(usize, usize)> {
        if info != 0x0F {
            return Ok((offset + 1, usize::from(info)));
        }

        let marker = self.bytes(offset + 1, 1)?[0];
        if marker >> 4 != 0x1 {
            return Err(Error::malformed(self.input, offset + 1, "length is not an integer"));
        }
        let width = 1usize << (marker & 0x0F);
        let len = be_uint(self.bytes(offset + 2, width)?);
        let len = usize::try_from(len)
            .map_err(|_| Error::malformed(self.input, offset + 2, "length too large"))?;
        Ok((offset + 2 + width, len))
    }

    fn references(&self, start: usize, count: usize) -> Result<Vec<usize>> {
        let bytes = self.bytes(start, count.saturating_mul(self.ref_size))?;
        Ok(bytes
            .chunks_exact(self.ref_size)
            .map(|chunk| usize::try_from(be_uint(chunk)).unwrap_or(usize::MAX))
            .collect())
    }

    fn unsupported(&self, offset: usize, marker: u8) -> Error {
        Error::malformed(
            self.input,
            offset,
            format!("unsupported object marker {marker:#04x}"),
        )
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &byte| acc.wrapping_shl(8) | u64::from(byte))
}

/// Integers of 1, 2 and 4 bytes are unsigned; 8 and 16 bytes are signed.
fn be_int(bytes: &[u8]) -> Option<i128> {
    match bytes.len() {
        1 | 2 | 4 => Some(i128::from(be_uint(bytes))),
        8 => Some(i128::from(i64::from_be_bytes(bytes.try_into().ok()?))),
        16 => Some(i128::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

fn be_real(bytes: &[u8]) -> Option<f64> {
    match bytes.len() {
        4 => Some(f64::from(f32::from_be_bytes(bytes.try_into().ok()?))),
        8 => Some(f64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

fn into_node(kind: &str, entries: Vec<(String, Value)>) -> Node {
    let mut node = Node::new(kind);
    for (key, value) in entries {
        match value {
            Value::Dict(inner) => node.children.push(into_node(&key, inner)),
            Value::Array(items) => {
                let mut scalars = Vec::new();
                for item in items {
                    match item {
                        Value::Dict(inner) => node.children.push(into_node(&key, inner)),
                        other => scalars.extend(scalar_text(&other)),
                    }
                }
                if !scalars.is_empty() {
                    node.attributes.insert(key, scalars.join(","));
                }
            }
            other => {
                if let Some(text) = scalar_text(&other) {
                    node.attributes.insert(key, text);
                }
            }
        }
    }
    node
}

/// Attribute text of a scalar. Nulls and nested arrays have none.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Bool(flag) => Some(String::from(if *flag { "1" } else { "0" })),
        Value::Int(int) => Some(int.to_string()),
        Value::Real(real) => Some(real.to_string()),
        Value::Date(seconds) => Some(format!("{}", (seconds + EPOCH_OFFSET).round())),
        Value::Data(data) => Some(data.iter().fold(String::new(), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })),
        Value::String(text) => Some(text.clone()),
        Value::Uid(uid) => Some(uid.to_string()),
        Value::Null | Value::Array(_) | Value::Dict(_) => None,
    }
}


#[cfg(test)]
mod tests {
    use super::{
        writer::{encode, Object},
        *,
    };
    use crate::error::ErrorKind;

    fn string(text: &str) -> Object {
        Object::String(text.to_owned())
    }

    /// `{ "size": 1, "Device": [ { "name": "Den", "host": "10.0.0.2",
    ///   "provides": ["server", "player"] } ] }`
    fn device_list() -> Vec<u8> {
        let objects = vec![
            Object::Dict(vec![(1, 2), (3, 4)]),  // 0
            string("size"),                      // 1
            Object::Int(1),                      // 2
            string("Device"),                    // 3
            Object::Array(vec![5]),              // 4
            Object::Dict(vec![(6, 7), (8, 9), (10, 11)]), // 5
            string("name"),                      // 6
            string("Den"),                       // 7
            string("host"),                      // 8
            string("10.0.0.2"),                  // 9
            string("provides"),                  // 10
            Object::Array(vec![12, 13]),         // 11
            string("server"),                    // 12
            string("player"),                    // 13
        ];
        encode(&objects, 0)
    }

    #[test]
    fn flattens_dictionaries_into_nodes() {
        let root = decode(&device_list()).unwrap();
        assert_eq!(root.kind, ROOT_KIND);
        assert_eq!(root.attr("size"), Some("1"));
        assert_eq!(root.children.len(), 1);

        let device = &root.children[0];
        assert_eq!(device.kind, "Device");
        assert_eq!(device.attr("host"), Some("10.0.0.2"));
        assert_eq!(device.attr("provides"), Some("server,player"));
    }

    #[test]
    fn long_strings_use_extended_length() {
        let long = "x".repeat(40);
        let objects = vec![
            Object::Dict(vec![(1, 2), (3, 4)]),
            string("name"),
            string(&long),
            string("enabled"),
            Object::Bool(true),
        ];
        let root = decode(&encode(&objects, 0)).unwrap();
        assert_eq!(root.attr("name"), Some(long.as_str()));
        assert_eq!(root.attr("enabled"), Some("1"));
    }

    #[test]
    fn cycles_are_malformed() {
        let objects = vec![Object::Dict(vec![(1, 0)]), string("self")];
        let err = decode(&encode(&objects, 0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn non_dictionary_top_object_is_malformed() {
        let objects = vec![string("just a string")];
        let err = decode(&encode(&objects, 0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert_eq!(err.offset(), Some(MAGIC.len()));
    }

    #[test]
    fn truncated_document_is_malformed_within_input() {
        let bytes = device_list();
        let truncated = &bytes[..bytes.len() - 10];
        let err = decode(truncated).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.offset().unwrap() < truncated.len());
    }

    #[test]
    fn references_out_of_range_are_malformed() {
        let objects = vec![Object::Dict(vec![(1, 9)]), string("key")];
        let err = decode(&encode(&objects, 0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn shared_containers_exhaust_budget() {
        // Each array holds its successor twice: 2^24 visits without a cap.
        let depth = 24;
        let mut objects: Vec<_> = (1..depth)
            .map(|next| Object::Array(vec![next, next]))
            .collect();
        objects.push(string("leaf"));
        let top = objects.len();
        objects.push(Object::Dict(vec![(top + 1, 0)]));
        objects.push(string("chain"));

        let bytes = encode(&objects, top);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.offset().unwrap() < bytes.len());
    }

    #[test]
    fn shared_scalars_are_decoded() {
        // Two devices sharing their key strings, as writers usually emit.
        let objects = vec![
            Object::Dict(vec![(1, 2)]),
            string("Device"),
            Object::Array(vec![3, 4]),
            Object::Dict(vec![(5, 6)]),
            Object::Dict(vec![(5, 7)]),
            string("host"),
            string("10.0.0.2"),
            string("10.0.0.3"),
        ];

        let root = decode(&encode(&objects, 0)).unwrap();
        let hosts: Vec<_> = root
            .children
            .iter()
            .filter_map(|device| device.attr("host"))
            .collect();
        assert_eq!(hosts, ["10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn deep_nesting_is_malformed() {
        // Dictionaries nested one inside the next, each under key "a".
        let depth = MAX_DEPTH + 10;
        let mut objects = vec![string("a")];
        for level in 0..depth {
            let child = if level + 1 < depth { level + 2 } else { 0 };
            objects.push(Object::Dict(vec![(0, child)]));
        }

        let err = decode(&encode(&objects, 1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }
}
