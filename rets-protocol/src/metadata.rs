//! Metadata hand-off.
//!
//! The typed metadata tree is out of scope; a [`MetadataBuilder`] receives
//! the raw document and turns it into whatever representation the caller
//! wants. [`RawMetadataBuilder`] checks the reply code and keeps the bytes.

use crate::error::ProtocolError;
use crate::reply::Reply;
use crate::response::parse_status;
use bytes::Bytes;
use std::fmt;
use std::io::Write;

/// Metadata encoding requested from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataFormat {
    Compact,
    #[default]
    Standard,
}

impl MetadataFormat {
    pub fn as_param(&self) -> &'static str {
        match self {
            MetadataFormat::Compact => "COMPACT",
            MetadataFormat::Standard => "STANDARD-XML",
        }
    }
}

impl fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Builds a metadata representation from a GetMetadata response body.
pub trait MetadataBuilder {
    type Output;

    fn build(
        &mut self,
        document: &[u8],
        format: MetadataFormat,
        strict: bool,
    ) -> Result<Self::Output, ProtocolError>;
}

/// An undecoded metadata document.
#[derive(Debug, Clone)]
pub struct RawMetadata {
    pub reply: Reply,
    pub format: MetadataFormat,
    pub document: Bytes,
}

impl RawMetadata {
    pub fn len(&self) -> usize {
        self.document.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    /// The document as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.document).ok()
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        out.write_all(&self.document)?;
        out.flush()
    }
}

/// Keeps the document as-is after checking its reply code.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMetadataBuilder;

impl MetadataBuilder for RawMetadataBuilder {
    type Output = RawMetadata;

    fn build(
        &mut self,
        document: &[u8],
        format: MetadataFormat,
        _strict: bool,
    ) -> Result<RawMetadata, ProtocolError> {
        let reply = parse_status(document)?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }
        Ok(RawMetadata {
            reply,
            format,
            document: Bytes::copy_from_slice(document),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::ReplyCode;

    const SYSTEM: &str = r#"<RETS ReplyCode="0" ReplyText="Success">
<METADATA-SYSTEM Version="1.00.000" Date="2024-01-01T00:00:00">
<SYSTEM SystemID="DEMO" SystemDescription="Demo MLS"/>
</METADATA-SYSTEM>
</RETS>"#;

    #[test]
    fn test_raw_builder_keeps_document() {
        let raw = RawMetadataBuilder
            .build(SYSTEM.as_bytes(), MetadataFormat::Standard, false)
            .unwrap();
        assert!(raw.reply.is_success());
        assert_eq!(raw.len(), SYSTEM.len());
        assert!(raw.as_str().unwrap().contains("SystemID=\"DEMO\""));

        let mut out = Vec::new();
        raw.write_to(&mut out).unwrap();
        assert_eq!(out, SYSTEM.as_bytes());
    }

    #[test]
    fn test_raw_builder_rejects_failure() {
        let body = r#"<RETS ReplyCode="20503" ReplyText="No Metadata Found"/>"#;
        let err = RawMetadataBuilder
            .build(body.as_bytes(), MetadataFormat::Compact, false)
            .unwrap_err();
        assert_eq!(err.reply_code(), Some(ReplyCode::NoMetadataFound));
    }

    #[test]
    fn test_format_params() {
        assert_eq!(MetadataFormat::default().as_param(), "STANDARD-XML");
        assert_eq!(MetadataFormat::Compact.to_string(), "COMPACT");
    }
}
