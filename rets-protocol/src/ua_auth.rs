//! `RETS-UA-Authorization` header computation.
//!
//! ```text
//! secret = md5hex(user_agent ":" password)
//! header = "Digest " md5hex(secret ":" request_id ":" session_id ":" version)
//! ```
//!
//! The value depends on the request id and session id, so it is recomputed
//! for every request.

use crate::version::RetsVersion;
use md5::{Digest, Md5};

/// User-agent credentials.
#[derive(Clone)]
pub struct UaAuth {
    user_agent: String,
    secret: String,
}

impl UaAuth {
    pub fn new(user_agent: &str, password: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            secret: md5_hex(format!("{}:{}", user_agent, password).as_bytes()),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Computes the header value. Absent ids are sent as empty strings.
    pub fn header_value(
        &self,
        request_id: Option<&str>,
        session_id: Option<&str>,
        version: RetsVersion,
    ) -> String {
        let input = format!(
            "{}:{}:{}:{}",
            self.secret,
            request_id.unwrap_or(""),
            session_id.unwrap_or(""),
            version.as_str()
        );
        format!("Digest {}", md5_hex(input.as_bytes()))
    }
}

impl std::fmt::Debug for UaAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UaAuth")
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Lowercase hex MD5 of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b"agent:secret"), "2d8676bee5610dce49ec5990b4b6ad01");
    }

    #[test]
    fn test_header_without_ids() {
        let auth = UaAuth::new("agent", "secret");
        assert_eq!(
            auth.header_value(None, None, RetsVersion::V1_5),
            "Digest 3cdb761785a7bba8f7d3f3cd848a2430"
        );
        assert_eq!(
            auth.header_value(Some(""), Some(""), RetsVersion::V1_5),
            auth.header_value(None, None, RetsVersion::V1_5)
        );
    }

    #[test]
    fn test_header_with_ids() {
        let auth = UaAuth::new("RETSClient/1.0", "pw");
        assert_eq!(
            auth.header_value(Some("req-1"), Some("SESS42"), RetsVersion::V1_7_2),
            "Digest 7f735895617e74c3851463813b08065b"
        );
    }

    #[test]
    fn test_header_depends_on_inputs() {
        let auth = UaAuth::new("agent", "secret");
        let a = auth.header_value(Some("1"), Some("S"), RetsVersion::V1_5);
        let b = auth.header_value(Some("2"), Some("S"), RetsVersion::V1_5);
        let c = auth.header_value(Some("1"), Some("S"), RetsVersion::V1_7);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_debug_hides_secret() {
        let auth = UaAuth::new("agent", "secret");
        let debug = format!("{:?}", auth);
        assert!(debug.contains("agent"));
        assert!(!debug.contains("2d8676be"));
    }
}
