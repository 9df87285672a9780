//! XML markup decoding.
//!
//! Builds a [`Node`] tree from the first complete top-level element.
//! Anything after that element is ignored, so servers that append garbage
//! to an otherwise complete document still decode. Duplicate attributes
//! resolve to the last occurrence.
//!
//! Text is kept as written, inner whitespace included. A body made of
//! whitespace only, such as the indentation between child elements, is
//! dropped. Elements may nest at most [`MAX_DEPTH`] levels deep.

use std::collections::HashMap;

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use super::{Node, MAX_DEPTH};
use crate::error::{Error, Result};

/// UTF-8 byte order mark.
pub const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Converts a reader position into a byte offset.
fn offset<P: TryInto<usize>>(position: P) -> usize {
    position.try_into().unwrap_or(usize::MAX)
}

/// Decodes the first top-level element of `input`.
///
/// # Errors
///
/// Returns `MalformedResponse` when the markup is not well-formed, nests
/// deeper than [`MAX_DEPTH`] or ends before the top-level element is
/// closed.
pub(crate) fn decode(input: &[u8]) -> Result<Node> {
    let (skipped, markup) = match input.strip_prefix(BOM) {
        Some(rest) => (BOM.len(), rest),
        None => (0, input),
    };

    let mut reader = Reader::from_reader(markup);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut open: Vec<Node> = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            Error::malformed(input, skipped + offset(reader.error_position()), e.to_string())
        })?;
        let position = skipped + offset(reader.buffer_position());

        match event {
            Event::Start(start) => {
                if open.len() >= MAX_DEPTH {
                    return Err(Error::malformed(
                        input,
                        position,
                        format!("elements nested deeper than {MAX_DEPTH} levels"),
                    ));
                }
                open.push(element(&reader, &start, input, position)?);
            }

            Event::Empty(start) => {
                let node = element(&reader, &start, input, position)?;
                if let Some(root) = close(&mut open, node) {
                    return Ok(root);
                }
            }

            Event::End(_) => {
                let node = open
                    .pop()
                    .ok_or_else(|| Error::malformed(input, position, "unmatched end tag"))?;
                if let Some(root) = close(&mut open, node) {
                    return Ok(root);
                }
            }

            Event::Text(text) => append_body(&mut open, &text, input, position)?,
            Event::CData(data) => append_body(&mut open, &data, input, position)?,

            // Keep entity references raw, like the rest of the body.
            Event::GeneralRef(reference) => {
                if let Some(node) = open.last_mut() {
                    let body = node.body.get_or_insert_with(Vec::new);
                    body.push(b'&');
                    body.extend_from_slice(&reference);
                    body.push(b';');
                }
            }

            Event::Eof => {
                let reason = match open.last() {
                    Some(node) => format!("unexpected end of input inside <{}>", node.kind),
                    None => String::from("no element found"),
                };
                return Err(Error::malformed(input, position, reason));
            }

            // Declarations, comments, doctypes and processing instructions.
            _ => {}
        }

        buf.clear();
    }
}

/// Attaches a completed node to its parent, or returns it as the root.
fn close(open: &mut [Node], mut node: Node) -> Option<Node> {
    if node
        .body
        .as_ref()
        .is_some_and(|body| body.iter().all(u8::is_ascii_whitespace))
    {
        node.body = None;
    }

    match open.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            None
        }
        None => Some(node),
    }
}

fn append_body(open: &mut [Node], bytes: &[u8], input: &[u8], position: usize) -> Result<()> {
    match open.last_mut() {
        Some(node) => {
            node.body
                .get_or_insert_with(Vec::new)
                .extend_from_slice(bytes);
            Ok(())
        }
        None if bytes.iter().all(u8::is_ascii_whitespace) => Ok(()),
        None => Err(Error::malformed(input, position, "text outside of root element")),
    }
}

fn element(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    input: &[u8],
    position: usize,
) -> Result<Node> {
    let kind = String::from_utf8_lossy(start.name().as_ref()).into_owned();

    // Checks are off so that duplicate keys do not fail the document.
    let mut attributes = HashMap::new();
    for attribute in start.attributes().with_checks(false) {
        let attribute =
            attribute.map_err(|e| Error::malformed(input, position, format!("<{kind}>: {e}")))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| Error::malformed(input, position, format!("<{kind} {key}>: {e}")))?;
        attributes.insert(key, value.into_owned());
    }

    Ok(Node {
        kind,
        attributes,
        ..Node::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn builds_nested_tree() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<MediaContainer size="2">
  <!-- library -->
  <Directory key="1" title="Movies &amp; More"/>
  <Video ratingKey="10" title="Film"><Media><Part key="/p/1"/></Media></Video>
</MediaContainer>"#;

        let root = decode(xml).unwrap();
        assert_eq!(root.kind, "MediaContainer");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].attr("title"), Some("Movies & More"));
        assert_eq!(root.children[1].find("Part").unwrap().attr("key"), Some("/p/1"));
    }

    #[test]
    fn ignores_trailing_garbage() {
        let root = decode(b"<MediaContainer><Track title=\"a\"/></MediaContainer>\0\0garbage<x")
            .unwrap();
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn last_duplicate_attribute_wins() {
        let root = decode(br#"<Video title="first" title="second"/>"#).unwrap();
        assert_eq!(root.attr("title"), Some("second"));
    }

    #[test]
    fn keeps_text_body() {
        let root = decode(b"<Summary>Hello <![CDATA[world]]></Summary>").unwrap();
        assert_eq!(root.body.as_deref(), Some(&b"Hello world"[..]));
    }

    #[test]
    fn keeps_whitespace_around_entities() {
        let root = decode(b"<Summary> Tom &amp; Jerry </Summary>").unwrap();
        assert_eq!(root.body.as_deref(), Some(&b" Tom &amp; Jerry "[..]));
    }

    #[test]
    fn indentation_is_not_a_body() {
        let xml = b"<MediaContainer>\n  <Video title=\"a\">\n  </Video>\n</MediaContainer>";
        let root = decode(xml).unwrap();
        assert_eq!(root.body, None);
        assert_eq!(root.children[0].body, None);
    }

    #[test]
    fn deep_nesting_is_malformed() {
        let depth = 1000;
        let mut xml = String::from("<MediaContainer>");
        xml.push_str(&"<a>".repeat(depth));
        xml.push_str(&"</a>".repeat(depth));
        xml.push_str("</MediaContainer>");

        let err = decode(xml.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.offset().unwrap() < xml.len());
    }

    #[test]
    fn nesting_up_to_the_limit_decodes() {
        let depth = MAX_DEPTH - 1;
        let mut xml = String::from("<MediaContainer>");
        xml.push_str(&"<a>".repeat(depth));
        xml.push_str("<Part key=\"/p/1\"/>");
        xml.push_str(&"</a>".repeat(depth));
        xml.push_str("</MediaContainer>");

        let root = decode(xml.as_bytes()).unwrap();
        assert_eq!(root.find("Part").unwrap().attr("key"), Some("/p/1"));
    }

    #[test]
    fn truncated_markup_is_malformed_within_input() {
        let xml = b"<MediaContainer size=\"1\"><Video title=\"x\">";
        let err = decode(xml).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.offset().unwrap() < xml.len());
    }

    #[test]
    fn mismatched_tags_are_malformed() {
        let xml = b"<MediaContainer><Video></Track></MediaContainer>";
        let err = decode(xml).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.offset().unwrap() < xml.len());
    }

    #[test]
    fn bom_is_skipped() {
        let root = decode(b"\xEF\xBB\xBF<MediaContainer/>").unwrap();
        assert_eq!(root.kind, "MediaContainer");
    }
}
