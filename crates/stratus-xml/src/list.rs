//! Parsing of `ListBucketResult` responses.
//!
//! Extracts exactly what the bucket reader needs from a listing page:
//! `IsTruncated`, the `Contents/Key` entries, the `CommonPrefixes/Prefix`
//! entries, and the optional `NextMarker` continuation token.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::XmlError;

/// One parsed page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ListBucketResult {
    /// Whether more keys are available beyond this page.
    pub is_truncated: bool,
    /// Object keys, in the order returned by the store.
    pub keys: Vec<String>,
    /// Grouped directory-like prefixes when a delimiter was used.
    pub common_prefixes: Vec<String>,
    /// Continuation token, when the service emits one.
    pub next_marker: Option<String>,
}

/// Parse a listing page.
///
/// # Errors
///
/// Returns [`XmlError`] if the document is malformed or `IsTruncated` is
/// absent. Keys seen before a later failure are not exposed.
pub fn parse_list_result(xml: &[u8]) -> Result<ListBucketResult, XmlError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    // Skip the declaration and position inside the root element.
    loop {
        match reader.read_event()? {
            Event::Start(_) => break,
            Event::Eof => return Err(XmlError::MissingElement("ListBucketResult")),
            _ => {}
        }
    }

    let mut result = ListBucketResult::default();
    let mut saw_truncated = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"IsTruncated" => {
                    result.is_truncated = parse_bool(&read_text_content(&mut reader)?)?;
                    saw_truncated = true;
                }
                b"NextMarker" => {
                    result.next_marker = Some(read_text_content(&mut reader)?);
                }
                b"Contents" => {
                    if let Some(key) = read_child_text(&mut reader, b"Key")? {
                        result.keys.push(key);
                    }
                }
                b"CommonPrefixes" => {
                    if let Some(prefix) = read_child_text(&mut reader, b"Prefix")? {
                        result.common_prefixes.push(prefix);
                    }
                }
                _ => skip_element(&mut reader)?,
            },
            Event::End(_) => break,
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF inside ListBucketResult".to_owned(),
                ));
            }
            _ => {}
        }
    }

    if !saw_truncated {
        return Err(XmlError::MissingElement("IsTruncated"));
    }

    Ok(result)
}

/// Read the text content of the current element and consume its end tag.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, XmlError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let unescaped = e
                    .unescape()
                    .map_err(|err| XmlError::ParseError(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => return Ok(text),
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF while reading text content".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Scan the children of the current element for `child`, returning its text.
/// Other children are skipped; the enclosing end tag is consumed.
fn read_child_text(
    reader: &mut Reader<&[u8]>,
    child: &[u8],
) -> Result<Option<String>, XmlError> {
    let mut found = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.local_name().as_ref() == child {
                    found = Some(read_text_content(reader)?);
                } else {
                    skip_element(reader)?;
                }
            }
            Event::End(_) => return Ok(found),
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF while scanning element".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Skip over an element and all its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), XmlError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(XmlError::ParseError(
                    "unexpected EOF while skipping element".to_owned(),
                ));
            }
            _ => {}
        }
    }
}

/// Parse a listing boolean ("true"/"false").
fn parse_bool(s: &str) -> Result<bool, XmlError> {
    match s {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(XmlError::ParseError(format!("invalid boolean: {s}"))),
    }
}
