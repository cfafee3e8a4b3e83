//! Client error types.

use rets_protocol::{BrokerCode, ProtocolError, ReplyCode, TransactionKind};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("server replied {code}{}{}", remote_suffix(.message), request_suffix(.request))]
    Reply {
        code: ReplyCode,
        message: Option<String>,
        request: Option<String>,
    },

    #[error("broker code required ({} offered)", .codes.len())]
    BrokerCodeRequired { codes: Vec<BrokerCode> },

    #[error("server does not support the {0} transaction")]
    Unsupported(TransactionKind),

    #[error("RETS version error: {0}")]
    Version(String),

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::HttpStatus { status, .. } => *status >= 500,
            ClientError::Protocol(ProtocolError::Io(_)) => true,
            _ => false,
        }
    }

    /// The RETS reply code, for reply-code failures.
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            ClientError::Reply { code, .. } => Some(*code),
            ClientError::BrokerCodeRequired { .. } => Some(ReplyCode::BrokerCodeRequired),
            ClientError::Protocol(e) => e.reply_code(),
            _ => None,
        }
    }

    /// Attaches a description of the request to a reply-code failure.
    pub fn with_request(self, description: impl Into<String>) -> Self {
        match self {
            ClientError::Reply { code, message, .. } => ClientError::Reply {
                code,
                message,
                request: Some(description.into()),
            },
            other => other,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Reply { code, message } => ClientError::Reply {
                code,
                message,
                request: None,
            },
            ProtocolError::BrokerCodeRequired(codes) => ClientError::BrokerCodeRequired { codes },
            ProtocolError::UnsupportedVersion(version) => ClientError::Version(version),
            other => ClientError::Protocol(other),
        }
    }
}

fn remote_suffix(message: &Option<String>) -> String {
    match message.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => format!(": {}", m),
        _ => String::new(),
    }
}

fn request_suffix(request: &Option<String>) -> String {
    match request {
        Some(r) => format!(" (request: {})", r),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_protocol_reply() {
        let err: ClientError = ProtocolError::Reply {
            code: ReplyCode::InvalidQuerySyntax,
            message: Some("bad".into()),
        }
        .into();
        assert!(matches!(
            err,
            ClientError::Reply {
                code: ReplyCode::InvalidQuerySyntax,
                ..
            }
        ));
        assert_eq!(err.reply_code(), Some(ReplyCode::InvalidQuerySyntax));

        let err = err.with_request("SearchType=Property Class=RES Query=(X=1)");
        let msg = err.to_string();
        assert!(msg.contains("20206"));
        assert!(msg.contains(": bad"));
        assert!(msg.contains("Query=(X=1)"));
    }

    #[test]
    fn test_from_protocol_special_cases() {
        let err: ClientError = ProtocolError::BrokerCodeRequired(vec![BrokerCode::new("A", None)]).into();
        assert!(matches!(err, ClientError::BrokerCodeRequired { ref codes } if codes.len() == 1));

        let err: ClientError = ProtocolError::UnsupportedVersion("RETS/9".into()).into();
        assert!(matches!(err, ClientError::Version(_)));

        let err: ClientError = ProtocolError::MissingDelimiter.into();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::MissingDelimiter)));
    }

    #[test]
    fn test_is_retryable() {
        let io = ClientError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "x"));
        assert!(io.is_retryable());

        let status = ClientError::HttpStatus {
            status: 503,
            reason: "Service Unavailable".into(),
        };
        assert!(status.is_retryable());

        let status = ClientError::HttpStatus {
            status: 401,
            reason: "Unauthorized".into(),
        };
        assert!(!status.is_retryable());

        let reply = ClientError::Reply {
            code: ReplyCode::MiscSearchError,
            message: None,
            request: None,
        };
        assert!(!reply.is_retryable());
        assert!(!ClientError::Unsupported(TransactionKind::Logout).is_retryable());
        assert!(!ClientError::Version("x".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ClientError::Unsupported(TransactionKind::GetObject).to_string(),
            "server does not support the GetObject transaction"
        );
        assert_eq!(
            ClientError::HttpStatus {
                status: 404,
                reason: "Not Found".into()
            }
            .to_string(),
            "HTTP status 404: Not Found"
        );
    }
}
