//! RETS protocol versions.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Header carrying the protocol version on requests and responses.
pub const VERSION_HEADER: &str = "RETS-Version";

/// A RETS protocol version, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RetsVersion {
    V1_0,
    #[default]
    V1_5,
    V1_7,
    V1_7_2,
    V1_8,
}

impl RetsVersion {
    pub const DEFAULT: RetsVersion = RetsVersion::V1_5;
    pub const HEADER: &'static str = VERSION_HEADER;

    pub const ALL: [RetsVersion; 5] = [
        RetsVersion::V1_0,
        RetsVersion::V1_5,
        RetsVersion::V1_7,
        RetsVersion::V1_7_2,
        RetsVersion::V1_8,
    ];

    /// The header form, e.g. `RETS/1.7.2`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetsVersion::V1_0 => "RETS/1.0",
            RetsVersion::V1_5 => "RETS/1.5",
            RetsVersion::V1_7 => "RETS/1.7",
            RetsVersion::V1_7_2 => "RETS/1.7.2",
            RetsVersion::V1_8 => "RETS/1.8",
        }
    }

    /// Parses a header value. The `RETS/` prefix is case-insensitive and
    /// may be omitted.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let number = match value.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("RETS/") => &value[5..],
            _ => value,
        };
        match number {
            "1.0" => Some(RetsVersion::V1_0),
            "1.5" => Some(RetsVersion::V1_5),
            "1.7" => Some(RetsVersion::V1_7),
            "1.7.2" => Some(RetsVersion::V1_7_2),
            "1.8" | "1.8.0" => Some(RetsVersion::V1_8),
            _ => None,
        }
    }

    /// Picks the version to use after a response.
    ///
    /// A recognized header value always wins. Otherwise the current version
    /// is kept, unless `strict` is set, in which case a missing or unknown
    /// value is an error.
    pub fn negotiate(
        current: RetsVersion,
        header: Option<&str>,
        strict: bool,
    ) -> Result<RetsVersion, ProtocolError> {
        match header.and_then(RetsVersion::parse) {
            Some(version) => Ok(version),
            None if strict => Err(ProtocolError::UnsupportedVersion(
                header.unwrap_or("<missing>").to_string(),
            )),
            None => {
                if let Some(value) = header {
                    tracing::warn!("Ignoring unknown RETS version '{}'", value);
                }
                Ok(current)
            }
        }
    }
}

impl fmt::Display for RetsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetsVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetsVersion::parse(s).ok_or_else(|| ProtocolError::UnsupportedVersion(s.to_string()))
    }
}
