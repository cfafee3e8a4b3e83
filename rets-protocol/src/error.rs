//! Protocol error types.

use crate::capability::TransactionKind;
use crate::reply::ReplyCode;
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding RETS responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty response body")]
    EmptyBody,

    #[error("unexpected root element '{0}', expected 'RETS'")]
    UnexpectedRoot(String),

    #[error("{element} element has no {attribute} attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("invalid {attribute} attribute on {element}: '{value}'")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("invalid compact format - DELIMITER not specified")]
    MissingDelimiter,

    #[error("invalid compact format: {0}")]
    InvalidCompact(String),

    #[error("row {row}: invalid number of result columns: got {got}, expected {expected}")]
    TooManyFields {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("{code}{}", remote_suffix(.message))]
    Reply {
        code: ReplyCode,
        message: Option<String>,
    },

    #[error("broker code required, valid codes: {}", BrokerCode::join(.0))]
    BrokerCodeRequired(Vec<BrokerCode>),

    #[error("invalid broker/branch code: '{0}'")]
    InvalidBrokerCode(String),

    #[error("invalid key/value line: '{0}'")]
    InvalidKeyValue(String),

    #[error("invalid RETS-RESPONSE section: {0}")]
    InvalidResponseBody(String),

    #[error("unsupported RETS version: '{0}'")]
    UnsupportedVersion(String),

    #[error("invalid {kind} URL '{url}': {source}")]
    InvalidUrl {
        kind: TransactionKind,
        url: String,
        source: url::ParseError,
    },

    #[error("multipart response has no boundary: '{0}'")]
    MissingBoundary(String),

    #[error("malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("invalid part header: '{0}'")]
    InvalidPartHeader(String),

    #[error("response was exhausted - cannot request objects a second time")]
    ResponseConsumed,

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns the reply code if this is a reply-code failure.
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            ProtocolError::Reply { code, .. } => Some(*code),
            ProtocolError::BrokerCodeRequired(_) => Some(ReplyCode::BrokerCodeRequired),
            _ => None,
        }
    }

    pub(crate) fn reply(code: ReplyCode, message: Option<String>) -> Self {
        ProtocolError::Reply { code, message }
    }
}

fn remote_suffix(message: &Option<String>) -> String {
    match message.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => format!(": {}", m),
        _ => String::new(),
    }
}

/// A broker code and optional branch offered by a broker-code-required login reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrokerCode {
    pub code: String,
    pub branch: Option<String>,
}

impl BrokerCode {
    pub fn new(code: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            code: code.into(),
            branch,
        }
    }

    /// Parses a `code[,branch]` value. Empty segments are skipped.
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        match parts.as_slice() {
            [code] => Ok(Self::new(*code, None)),
            [code, branch] => Ok(Self::new(*code, Some((*branch).to_string()))),
            _ => Err(ProtocolError::InvalidBrokerCode(value.to_string())),
        }
    }

    fn join(codes: &[BrokerCode]) -> String {
        codes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for BrokerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{},{}", self.code, branch),
            None => write!(f, "{}", self.code),
        }
    }
}
