//! RETS reply codes.
//!
//! Every RETS response carries a numeric `ReplyCode` attribute on its root
//! element. Zero is success; everything else is either benign for the
//! transaction that produced it, a special login flow, or fatal.

use std::fmt;

macro_rules! reply_codes {
    ($($variant:ident = $code:literal => $text:literal,)*) => {
        /// A RETS reply code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ReplyCode {
            Success,
            $($variant,)*
            /// A code not in the known table.
            Other(i32),
        }

        impl ReplyCode {
            /// Maps a numeric reply code to its named variant.
            pub fn from_code(code: i32) -> Self {
                match code {
                    0 => ReplyCode::Success,
                    $($code => ReplyCode::$variant,)*
                    other => ReplyCode::Other(other),
                }
            }

            /// Returns the numeric value.
            pub fn code(&self) -> i32 {
                match self {
                    ReplyCode::Success => 0,
                    $(ReplyCode::$variant => $code,)*
                    ReplyCode::Other(code) => *code,
                }
            }

            /// Returns the standard description, if the code is known.
            pub fn description(&self) -> Option<&'static str> {
                match self {
                    ReplyCode::Success => Some("Success"),
                    $(ReplyCode::$variant => Some($text),)*
                    ReplyCode::Other(_) => None,
                }
            }
        }
    };
}

reply_codes! {
    ZeroBalance = 20003 => "Zero balance",
    BrokerCodeRequired = 20012 => "Broker code required",
    BrokerCodeInvalid = 20013 => "Broker code invalid",
    AdditionalLoginNotPermitted = 20022 => "Additional login not permitted",
    MiscLoginError = 20036 => "Miscellaneous server login error",
    ClientAuthenticationFailed = 20037 => "Client authentication failed",
    UserAgentAuthenticationRequired = 20041 => "User-agent authentication required",
    ServerTemporarilyDisabled = 20050 => "Server temporarily disabled",
    InsecurePasswordDisallowed = 20140 => "Insecure password disallowed",
    DuplicateLoginProhibited = 20141 => "Duplicate login prohibited",
    EncryptedUsernameInvalid = 20142 => "Encrypted user name invalid",
    UnknownQueryField = 20200 => "Unknown query field",
    NoRecordsFound = 20201 => "No records found",
    InvalidSelect = 20202 => "Invalid select",
    MiscSearchError = 20203 => "Miscellaneous search error",
    InvalidQuerySyntax = 20206 => "Invalid query syntax",
    UnauthorizedQuery = 20207 => "Unauthorized query",
    MaximumRecordsExceeded = 20208 => "Maximum records exceeded",
    SearchTimedOut = 20209 => "Timeout",
    TooManyOutstandingQueries = 20210 => "Too many outstanding queries",
    QueryTooComplex = 20211 => "Query too complex",
    InvalidKeyRequest = 20212 => "Invalid key request",
    InvalidKey = 20213 => "Invalid key",
    InvalidResource = 20400 => "Invalid resource",
    InvalidObjectType = 20401 => "Invalid type",
    InvalidIdentifier = 20402 => "Invalid identifier",
    NoObjectFound = 20403 => "No object found",
    UnsupportedMimeType = 20406 => "Unsupported MIME type",
    UnauthorizedRetrieval = 20407 => "Unauthorized retrieval",
    ResourceUnavailable = 20408 => "Resource unavailable",
    ObjectUnavailable = 20409 => "Object unavailable",
    RequestTooLarge = 20410 => "Request too large",
    ObjectTimedOut = 20411 => "Timeout",
    TooManyOutstandingRequests = 20412 => "Too many outstanding requests",
    MiscObjectError = 20413 => "Miscellaneous error",
    MetadataInvalidResource = 20500 => "Invalid resource",
    MetadataInvalidType = 20501 => "Invalid type",
    MetadataInvalidIdentifier = 20502 => "Invalid identifier",
    NoMetadataFound = 20503 => "No metadata found",
    UnsupportedMetadataFormat = 20506 => "Unsupported metadata MIME type",
    UnauthorizedMetadataRetrieval = 20507 => "Unauthorized retrieval",
    MetadataResourceUnavailable = 20508 => "Resource unavailable",
    MetadataUnavailable = 20509 => "Metadata unavailable",
    MiscMetadataError = 20513 => "Miscellaneous error",
    RequestedDtdUnavailable = 20514 => "Requested DTD version unavailable",
    NotLoggedIn = 20701 => "Not logged in",
    MiscLogoutError = 20702 => "Miscellaneous error",
}

/// How a reply code affects the transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    Success,
    /// Not an error in context: an empty search or object set, or a truncated result.
    Benign,
    /// The login must be retried with a broker code.
    BrokerCodeRequired,
    Fatal,
}

impl ReplyCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ReplyCode::Success)
    }

    /// Classifies the code independently of the transaction.
    pub fn classify(&self) -> ReplyClass {
        match self {
            ReplyCode::Success => ReplyClass::Success,
            ReplyCode::NoRecordsFound
            | ReplyCode::MaximumRecordsExceeded
            | ReplyCode::NoObjectFound => ReplyClass::Benign,
            ReplyCode::BrokerCodeRequired => ReplyClass::BrokerCodeRequired,
            _ => ReplyClass::Fatal,
        }
    }

    /// Codes a search decoder swallows instead of failing.
    pub fn is_benign_for_search(&self) -> bool {
        matches!(
            self,
            ReplyCode::NoRecordsFound | ReplyCode::MaximumRecordsExceeded
        )
    }

    /// Codes a GetObject response may carry and still be an (empty) success.
    pub fn is_benign_for_object(&self) -> bool {
        matches!(self, ReplyCode::Success | ReplyCode::NoObjectFound)
    }
}

impl From<i32> for ReplyCode {
    fn from(code: i32) -> Self {
        ReplyCode::from_code(code)
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "{} {}", self.code(), text),
            None => write!(f, "reply code {}", self.code()),
        }
    }
}

/// The reply code and optional remote text carried by a response root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub text: Option<String>,
}

impl Reply {
    pub fn new(code: impl Into<ReplyCode>, text: Option<String>) -> Self {
        Self {
            code: code.into(),
            text,
        }
    }

    pub fn success() -> Self {
        Self::new(ReplyCode::Success, None)
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Converts this reply into a protocol error carrying the remote text.
    pub fn into_error(self) -> crate::ProtocolError {
        crate::ProtocolError::reply(self.code, self.text)
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::success()
    }
}
