//! Key/value response bodies.
//!
//! Login and logout replies carry `key=value` lines:
//!
//! ```text
//! <RETS ReplyCode="0" ReplyText="Success">
//! <RETS-RESPONSE>
//! MemberName=Jane Doe
//! Search=/rets/search
//! </RETS-RESPONSE>
//! </RETS>
//! ```
//!
//! RETS/1.0 servers put the lines directly inside `RETS`.

use crate::capability::{CapabilityUrls, TransactionKind};
use crate::error::{BrokerCode, ProtocolError};
use crate::reply::{Reply, ReplyCode};
use crate::version::RetsVersion;
use crate::xml;
use quick_xml::events::Event;
use url::Url;

const RESPONSE_ELEMENT: &str = "RETS-RESPONSE";

/// A decoded key/value body.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyValueBody {
    pub reply: Reply,
    pub pairs: Vec<(String, String)>,
}

/// Decodes a key/value body. Reply codes for which `accept` is false are
/// returned as errors before the body is read.
pub(crate) fn parse_key_value(
    body: &[u8],
    version: RetsVersion,
    strict: bool,
    accept: impl Fn(ReplyCode) -> bool,
) -> Result<KeyValueBody, ProtocolError> {
    let mut reader = xml::reader(body);
    let mut buf = Vec::new();
    let mut reply: Option<Reply> = None;
    let mut depth = 0usize;
    let mut children = 0usize;
    let mut sections = 0usize;
    let mut in_section = false;
    let mut root_text = String::new();
    let mut section_text = String::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                let name = xml::element_name(&e);
                match (depth, reply.is_some()) {
                    (1, false) => {
                        if name != xml::RETS_ELEMENT {
                            return Err(ProtocolError::UnexpectedRoot(name));
                        }
                        let r = xml::reply(&e, "RETS")?;
                        if !accept(r.code) {
                            return Err(r.into_error());
                        }
                        reply = Some(r);
                    }
                    (2, _) if name == RESPONSE_ELEMENT => {
                        children += 1;
                        sections += 1;
                        in_section = sections == 1;
                    }
                    (2, _) => {
                        children += 1;
                        tracing::warn!("Unexpected <{}> in key/value response", name);
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    in_section = false;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if in_section {
                    section_text.push_str(&text);
                } else if depth == 1 {
                    root_text.push_str(&text);
                }
            }
            Event::CData(c) => {
                let text = xml::cdata_text(&c)?;
                if in_section {
                    section_text.push_str(&text);
                } else if depth == 1 {
                    root_text.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let reply = reply.ok_or(ProtocolError::EmptyBody)?;

    let content = if version == RetsVersion::V1_0 {
        root_text
    } else if children == 1 && sections == 1 {
        section_text
    } else if strict {
        return Err(ProtocolError::InvalidResponseBody(format!(
            "expected one {} child, found {} children",
            RESPONSE_ELEMENT, children
        )));
    } else {
        tracing::warn!(
            "Key/value response has {} child elements, reading what is there",
            children
        );
        if sections > 0 {
            section_text
        } else {
            root_text
        }
    };

    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => pairs.push((key.trim().to_string(), value.trim().to_string())),
            None if strict => return Err(ProtocolError::InvalidKeyValue(line.to_string())),
            None => tracing::warn!("Skipping key/value line without '=': '{}'", line),
        }
    }

    Ok(KeyValueBody { reply, pairs })
}

fn key_matches(key: &str, expected: &str, strict: bool) -> bool {
    if strict {
        key == expected
    } else {
        key.eq_ignore_ascii_case(expected)
    }
}

/// Decoded login reply.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    reply: Reply,
    session_id: Option<String>,
    member_name: Option<String>,
    user_information: Option<String>,
    broker: Option<String>,
    metadata_version: Option<String>,
    min_metadata_version: Option<String>,
    metadata_timestamp: Option<String>,
    min_metadata_timestamp: Option<String>,
    office_list: Option<String>,
    balance: Option<String>,
    session_timeout: Option<u32>,
    expr: Option<String>,
    capabilities: CapabilityUrls,
}

impl LoginResponse {
    /// Decodes a login body. Relative capability URLs resolve against
    /// `login_url`.
    ///
    /// A `BrokerCodeRequired` reply is returned as
    /// [`ProtocolError::BrokerCodeRequired`] carrying the offered codes.
    pub fn parse(
        body: &[u8],
        login_url: &Url,
        version: RetsVersion,
        strict: bool,
    ) -> Result<Self, ProtocolError> {
        let kv = parse_key_value(body, version, strict, |code| {
            code.is_success() || code == ReplyCode::BrokerCodeRequired
        })?;
        let broker_required = kv.reply.code == ReplyCode::BrokerCodeRequired;

        let mut response = LoginResponse {
            reply: kv.reply,
            session_id: None,
            member_name: None,
            user_information: None,
            broker: None,
            metadata_version: None,
            min_metadata_version: None,
            metadata_timestamp: None,
            min_metadata_timestamp: None,
            office_list: None,
            balance: None,
            session_timeout: None,
            expr: None,
            capabilities: CapabilityUrls::from_url(login_url.clone()),
        };
        let mut broker_codes: Vec<BrokerCode> = Vec::new();

        for (key, value) in kv.pairs {
            let is = |expected: &str| key_matches(&key, expected, strict);

            if is("Broker") {
                if broker_required {
                    let code = BrokerCode::parse(&value)?;
                    if !broker_codes.contains(&code) {
                        broker_codes.push(code);
                    }
                } else {
                    response.broker = Some(value);
                }
            } else if is("MemberName") {
                response.member_name = Some(value);
            } else if is("User") {
                response.user_information = Some(value);
            } else if is("MetadataVersion") {
                response.metadata_version = Some(value);
            } else if is("MinMetadataVersion") {
                response.min_metadata_version = Some(value);
            } else if is("MetadataTimestamp") {
                response.metadata_timestamp = Some(value);
            } else if is("MinMetadataTimestamp") {
                response.min_metadata_timestamp = Some(value);
            } else if is("OfficeList") {
                response.office_list = Some(value);
            } else if is("Balance") {
                response.balance = Some(value);
            } else if is("TimeoutSeconds") {
                response.session_timeout = Some(parse_seconds(&key, &value, strict)?);
            } else if is("Expr") {
                response.expr = Some(value);
            } else if let Some(kind) = TransactionKind::from_key(&key, strict) {
                if kind == TransactionKind::ServerInformation {
                    tracing::warn!("{} is deprecated, still recording it", key);
                }
                response.capabilities.set(kind, &value)?;
            } else if key.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("X-")) {
                tracing::warn!("Unrecognized extension key {}={}", key, value);
            } else {
                tracing::warn!("Unknown login key {}={}", key, value);
            }
        }

        if broker_required {
            return Err(ProtocolError::BrokerCodeRequired(broker_codes));
        }

        let missing = response.capabilities.missing_required();
        if !missing.is_empty() {
            tracing::warn!("Login response is missing capability URLs: {:?}", missing);
        }

        Ok(response)
    }

    /// Attaches the session id taken from the response cookies.
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn member_name(&self) -> Option<&str> {
        self.member_name.as_deref()
    }

    pub fn user_information(&self) -> Option<&str> {
        self.user_information.as_deref()
    }

    pub fn broker(&self) -> Option<&str> {
        self.broker.as_deref()
    }

    pub fn metadata_version(&self) -> Option<&str> {
        self.metadata_version.as_deref()
    }

    pub fn min_metadata_version(&self) -> Option<&str> {
        self.min_metadata_version.as_deref()
    }

    pub fn metadata_timestamp(&self) -> Option<&str> {
        self.metadata_timestamp.as_deref()
    }

    pub fn min_metadata_timestamp(&self) -> Option<&str> {
        self.min_metadata_timestamp.as_deref()
    }

    pub fn office_list(&self) -> Option<&str> {
        self.office_list.as_deref()
    }

    pub fn balance(&self) -> Option<&str> {
        self.balance.as_deref()
    }

    /// Session idle timeout in seconds.
    pub fn session_timeout(&self) -> Option<u32> {
        self.session_timeout
    }

    pub fn expr(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    pub fn capabilities(&self) -> &CapabilityUrls {
        &self.capabilities
    }
}

fn parse_seconds(key: &str, value: &str, strict: bool) -> Result<u32, ProtocolError> {
    match value.trim().parse::<u32>() {
        Ok(seconds) => Ok(seconds),
        Err(_) if !strict => {
            tracing::warn!("Unparsable {} '{}', using 0", key, value);
            Ok(0)
        }
        Err(_) => Err(ProtocolError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Decoded logout reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutResponse {
    pub reply: Reply,
    pub connect_time: Option<String>,
    pub billing: Option<String>,
    pub sign_off_message: Option<String>,
}

impl LogoutResponse {
    pub fn parse(body: &[u8], version: RetsVersion, strict: bool) -> Result<Self, ProtocolError> {
        let kv = parse_key_value(body, version, strict, |code| code.is_success())?;
        let mut response = LogoutResponse {
            reply: kv.reply,
            ..Default::default()
        };
        for (key, value) in kv.pairs {
            if key_matches(&key, "ConnectTime", strict) {
                response.connect_time = Some(value);
            } else if key_matches(&key, "Billing", strict) {
                response.billing = Some(value);
            } else if key_matches(&key, "SignOffMessage", strict) {
                response.sign_off_message = Some(value);
            } else {
                tracing::warn!("Unknown logout key {}={}", key, value);
            }
        }
        Ok(response)
    }
}

/// Result of a logout transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    Completed(LogoutResponse),
    /// The server acknowledged the logout with a malformed body.
    Malformed(String),
}

impl LogoutOutcome {
    /// Decodes a logout body, downgrading a malformed `RETS-RESPONSE`
    /// section under a successful `RETS` root to [`LogoutOutcome::Malformed`].
    pub fn parse(body: &[u8], version: RetsVersion, strict: bool) -> Result<Self, ProtocolError> {
        match LogoutResponse::parse(body, version, strict) {
            Ok(response) => Ok(LogoutOutcome::Completed(response)),
            Err(err @ (ProtocolError::InvalidResponseBody(_) | ProtocolError::InvalidKeyValue(_))) => {
                tracing::warn!("Tolerating malformed logout response: {}", err);
                Ok(LogoutOutcome::Malformed(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    pub fn response(&self) -> Option<&LogoutResponse> {
        match self {
            LogoutOutcome::Completed(response) => Some(response),
            LogoutOutcome::Malformed(_) => None,
        }
    }
}

/// Decodes a body that carries only a reply code, such as a change
/// password reply or an XML error wrapper.
pub fn parse_status(body: &[u8]) -> Result<Reply, ProtocolError> {
    let mut reader = xml::reader(body);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = xml::element_name(&e);
                if name != xml::RETS_ELEMENT {
                    return Err(ProtocolError::UnexpectedRoot(name));
                }
                return xml::reply(&e, "RETS");
            }
            Event::Eof => return Err(ProtocolError::EmptyBody),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_BODY: &str = r#"<RETS ReplyCode="0" ReplyText="Operation Successful">
<RETS-RESPONSE>
MemberName=Jane Doe
User=jdoe,1,AGENT,jdoe
Broker=ACME
MetadataVersion=1.00.000
MinMetadataVersion=1.00.000
MetadataTimestamp=2024-01-01T00:00:00
OfficeList=ACME;01
TimeoutSeconds=1800
Search=/rets/search
GetMetadata=/rets/metadata
GetObject=http://media.example.com/getobject
Logout=logout
Action-URL=/rets/action
X-Custom=1
</RETS-RESPONSE>
</RETS>"#;

    fn login_url() -> Url {
        Url::parse("http://rets.example.com/rets/login").unwrap()
    }

    #[test]
    fn test_login_parse() {
        let login =
            LoginResponse::parse(LOGIN_BODY.as_bytes(), &login_url(), RetsVersion::V1_7_2, false)
                .unwrap();
        assert!(login.reply().is_success());
        assert_eq!(login.member_name(), Some("Jane Doe"));
        assert_eq!(login.user_information(), Some("jdoe,1,AGENT,jdoe"));
        assert_eq!(login.broker(), Some("ACME"));
        assert_eq!(login.metadata_version(), Some("1.00.000"));
        assert_eq!(login.metadata_timestamp(), Some("2024-01-01T00:00:00"));
        assert_eq!(login.office_list(), Some("ACME;01"));
        assert_eq!(login.session_timeout(), Some(1800));

        let caps = login.capabilities();
        assert_eq!(
            caps.resolve(TransactionKind::Search).unwrap().as_str(),
            "http://rets.example.com/rets/search"
        );
        assert_eq!(
            caps.resolve(TransactionKind::Logout).unwrap().as_str(),
            "http://rets.example.com/logout"
        );
        assert_eq!(
            caps.resolve(TransactionKind::GetObject).unwrap().as_str(),
            "http://media.example.com/getobject"
        );
        assert!(caps.is_supported(TransactionKind::Action));
        assert_eq!(caps.login_url(), &login_url());
    }

    #[test]
    fn test_login_lenient_keys() {
        let body = r#"<RETS ReplyCode="0"><RETS-RESPONSE>
search=/s
MEMBERNAME=Bob
garbage line
</RETS-RESPONSE></RETS>"#;
        let login =
            LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, false).unwrap();
        assert_eq!(login.member_name(), Some("Bob"));
        assert!(login.capabilities().is_supported(TransactionKind::Search));

        let err = LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, true)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidKeyValue(_)));
    }

    #[test]
    fn test_login_rets_1_0_body() {
        let body = "<RETS ReplyCode=\"0\" ReplyText=\"ok\">\nMemberName=Old Server\nSearch=/search\n</RETS>";
        let login =
            LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_0, true).unwrap();
        assert_eq!(login.member_name(), Some("Old Server"));
        assert!(login.capabilities().is_supported(TransactionKind::Search));
    }

    #[test]
    fn test_login_missing_section() {
        let body = "<RETS ReplyCode=\"0\">\nMemberName=X\n</RETS>";
        let login =
            LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_7, false).unwrap();
        assert_eq!(login.member_name(), Some("X"));

        let err = LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_7, true)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidResponseBody(_)));
    }

    #[test]
    fn test_login_failure_reply() {
        let body = r#"<RETS ReplyCode="20036" ReplyText="Bad password"/>"#;
        let err = LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, false)
            .unwrap_err();
        assert_eq!(err.reply_code(), Some(ReplyCode::MiscLoginError));
        assert!(err.to_string().contains("Bad password"));
    }

    #[test]
    fn test_broker_code_required() {
        let body = r#"<RETS ReplyCode="20012" ReplyText="Broker code required">
<RETS-RESPONSE>
Broker=ACME,01
Broker=ACME,02
Broker=ACME,01
Broker=SOLO
</RETS-RESPONSE>
</RETS>"#;
        let err = LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, false)
            .unwrap_err();
        match err {
            ProtocolError::BrokerCodeRequired(codes) => {
                assert_eq!(
                    codes,
                    vec![
                        BrokerCode::new("ACME", Some("01".into())),
                        BrokerCode::new("ACME", Some("02".into())),
                        BrokerCode::new("SOLO", None),
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_broker_code_invalid_arity() {
        let body = r#"<RETS ReplyCode="20012"><RETS-RESPONSE>
Broker=A,B,C
</RETS-RESPONSE></RETS>"#;
        let err = LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, false)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBrokerCode(_)));
    }

    #[test]
    fn test_timeout_seconds_lenient() {
        let body = r#"<RETS ReplyCode="0"><RETS-RESPONSE>
TimeoutSeconds=soon
</RETS-RESPONSE></RETS>"#;
        let login =
            LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, false).unwrap();
        assert_eq!(login.session_timeout(), Some(0));

        let err = LoginResponse::parse(body.as_bytes(), &login_url(), RetsVersion::V1_5, true)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { .. }));
    }

    #[test]
    fn test_unexpected_root() {
        let err = LoginResponse::parse(b"<html/>", &login_url(), RetsVersion::V1_5, false)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedRoot(_)));

        let err = LoginResponse::parse(b"", &login_url(), RetsVersion::V1_5, false).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyBody));
    }

    #[test]
    fn test_logout_parse() {
        let body = r#"<RETS ReplyCode="0" ReplyText="Logging out"><RETS-RESPONSE>
ConnectTime=42 minutes
Billing=none
SignOffMessage=Goodbye
</RETS-RESPONSE></RETS>"#;
        let outcome = LogoutOutcome::parse(body.as_bytes(), RetsVersion::V1_5, true).unwrap();
        let response = outcome.response().unwrap();
        assert_eq!(response.connect_time.as_deref(), Some("42 minutes"));
        assert_eq!(response.billing.as_deref(), Some("none"));
        assert_eq!(response.sign_off_message.as_deref(), Some("Goodbye"));
    }

    #[test]
    fn test_logout_malformed_is_tolerated() {
        let body = r#"<RETS ReplyCode="0" ReplyText="Bye"/>"#;
        let outcome = LogoutOutcome::parse(body.as_bytes(), RetsVersion::V1_5, true).unwrap();
        assert!(matches!(outcome, LogoutOutcome::Malformed(_)));

        let body = r#"<RETS ReplyCode="0"><RETS-RESPONSE/><RETS-RESPONSE/></RETS>"#;
        let outcome = LogoutOutcome::parse(body.as_bytes(), RetsVersion::V1_5, true).unwrap();
        assert!(matches!(outcome, LogoutOutcome::Malformed(_)));
    }

    #[test]
    fn test_logout_failure_is_an_error() {
        let body = r#"<RETS ReplyCode="20701" ReplyText="Not logged in"/>"#;
        let err = LogoutOutcome::parse(body.as_bytes(), RetsVersion::V1_5, false).unwrap_err();
        assert_eq!(err.reply_code(), Some(ReplyCode::NotLoggedIn));
    }

    #[test]
    fn test_parse_status() {
        let reply = parse_status(br#"<?xml version="1.0"?><RETS ReplyCode="20403" ReplyText="No Object Found"/>"#)
            .unwrap();
        assert_eq!(reply.code, ReplyCode::NoObjectFound);
        assert_eq!(reply.text.as_deref(), Some("No Object Found"));

        assert!(matches!(
            parse_status(b"<ERROR/>"),
            Err(ProtocolError::UnexpectedRoot(_))
        ));
    }
}
