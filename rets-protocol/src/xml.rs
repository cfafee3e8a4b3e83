//! Small helpers over quick-xml shared by the response decoders.

use crate::error::ProtocolError;
use crate::reply::{Reply, ReplyCode};
use quick_xml::events::{BytesCData, BytesEnd, BytesStart};
use std::io::BufRead;

pub(crate) const RETS_ELEMENT: &str = "RETS";

/// Creates a reader that keeps whitespace (tab is the default compact
/// delimiter) and reports empty elements as start/end pairs.
pub(crate) fn reader<R: BufRead>(input: R) -> quick_xml::Reader<R> {
    let mut reader = quick_xml::Reader::from_reader(input);
    let config = reader.config_mut();
    config.trim_text(false);
    config.expand_empty_elements = true;
    reader
}

pub(crate) fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

pub(crate) fn end_name(e: &BytesEnd<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Looks up an attribute by exact name and returns its unescaped value.
pub(crate) fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, ProtocolError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

pub(crate) fn cdata_text(c: &BytesCData<'_>) -> Result<String, ProtocolError> {
    std::str::from_utf8(&c[..])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Reads `ReplyCode` and `ReplyText` from a `RETS` or `RETS-STATUS` element.
pub(crate) fn reply(e: &BytesStart<'_>, element: &'static str) -> Result<Reply, ProtocolError> {
    let raw = attribute(e, "ReplyCode")?.ok_or(ProtocolError::MissingAttribute {
        element,
        attribute: "ReplyCode",
    })?;
    let code: i32 = raw
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidAttribute {
            element,
            attribute: "ReplyCode",
            value: raw.clone(),
        })?;
    let text = attribute(e, "ReplyText")?;
    Ok(Reply::new(ReplyCode::from_code(code), text))
}
