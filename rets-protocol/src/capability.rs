//! Capability URLs.
//!
//! A successful login advertises one URL per transaction the server
//! supports. Relative URLs are resolved against the login URL.

use crate::error::ProtocolError;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// The RETS transactions a server may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransactionKind {
    Login,
    LoginComplete,
    Search,
    GetObject,
    GetMetadata,
    Update,
    ChangePassword,
    Logout,
    Action,
    ServerInformation,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 10] = [
        TransactionKind::Login,
        TransactionKind::LoginComplete,
        TransactionKind::Search,
        TransactionKind::GetObject,
        TransactionKind::GetMetadata,
        TransactionKind::Update,
        TransactionKind::ChangePassword,
        TransactionKind::Logout,
        TransactionKind::Action,
        TransactionKind::ServerInformation,
    ];

    /// The key used in a login response body.
    pub fn key(&self) -> &'static str {
        match self {
            TransactionKind::Login => "Login",
            TransactionKind::LoginComplete => "LoginComplete",
            TransactionKind::Search => "Search",
            TransactionKind::GetObject => "GetObject",
            TransactionKind::GetMetadata => "GetMetadata",
            TransactionKind::Update => "Update",
            TransactionKind::ChangePassword => "ChangePassword",
            TransactionKind::Logout => "Logout",
            TransactionKind::Action => "Action",
            TransactionKind::ServerInformation => "ServerInformation",
        }
    }

    /// Matches a login response key, with or without a `-URL` suffix.
    ///
    /// Strict matching is exact; lenient matching ignores case and dashes.
    pub fn from_key(key: &str, strict: bool) -> Option<Self> {
        let key = key.trim();
        if strict {
            let base = key.strip_suffix("-URL").unwrap_or(key);
            if base == "Server-Information" {
                return Some(TransactionKind::ServerInformation);
            }
            return TransactionKind::ALL.into_iter().find(|k| k.key() == base);
        }

        let normalized: String = key
            .chars()
            .filter(|c| *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        let base = normalized.strip_suffix("url").unwrap_or(&normalized);
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.key().eq_ignore_ascii_case(base))
    }

    /// Whether the server is expected to advertise this URL at login.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            TransactionKind::Login | TransactionKind::Search | TransactionKind::GetMetadata
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The resolved URL for each supported transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityUrls {
    base: Url,
    urls: BTreeMap<TransactionKind, Url>,
}

impl CapabilityUrls {
    /// Creates a set containing only the login URL.
    pub fn new(login_url: &str) -> Result<Self, ProtocolError> {
        let base = Url::parse(login_url.trim()).map_err(|source| ProtocolError::InvalidUrl {
            kind: TransactionKind::Login,
            url: login_url.to_string(),
            source,
        })?;
        Ok(Self::from_url(base))
    }

    pub fn from_url(base: Url) -> Self {
        let mut urls = BTreeMap::new();
        urls.insert(TransactionKind::Login, base.clone());
        Self { base, urls }
    }

    /// The origin of the login URL; relative entries resolve against it.
    pub fn origin(&self) -> Url {
        let mut origin = self.base.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        origin
    }

    pub fn login_url(&self) -> &Url {
        self.urls.get(&TransactionKind::Login).unwrap_or(&self.base)
    }

    pub fn resolve(&self, kind: TransactionKind) -> Option<&Url> {
        self.urls.get(&kind)
    }

    pub fn is_supported(&self, kind: TransactionKind) -> bool {
        self.urls.contains_key(&kind)
    }

    /// Sets a URL, resolving it against the login origin when relative.
    pub fn set(&mut self, kind: TransactionKind, raw: &str) -> Result<(), ProtocolError> {
        let raw = raw.trim();
        let url = self
            .origin()
            .join(raw)
            .map_err(|source| ProtocolError::InvalidUrl {
                kind,
                url: raw.to_string(),
                source,
            })?;
        self.urls.insert(kind, url);
        Ok(())
    }

    pub fn remove(&mut self, kind: TransactionKind) -> Option<Url> {
        self.urls.remove(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TransactionKind, &Url)> {
        self.urls.iter().map(|(k, v)| (*k, v))
    }

    /// Maps a login response key to the transaction it names.
    pub fn kind_for_key(key: &str, strict: bool) -> Option<TransactionKind> {
        TransactionKind::from_key(key, strict)
    }

    /// Required transactions the server did not advertise.
    pub fn missing_required(&self) -> Vec<TransactionKind> {
        TransactionKind::ALL
            .into_iter()
            .filter(|k| k.is_required() && !self.is_supported(*k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_key_lenient() {
        assert_eq!(
            TransactionKind::from_key("search", false),
            Some(TransactionKind::Search)
        );
        assert_eq!(
            TransactionKind::from_key("GetObject-URL", false),
            Some(TransactionKind::GetObject)
        );
        assert_eq!(
            TransactionKind::from_key("Server-Information-URL", false),
            Some(TransactionKind::ServerInformation)
        );
        assert_eq!(
            TransactionKind::from_key(" LOGOUT ", false),
            Some(TransactionKind::Logout)
        );
        assert_eq!(TransactionKind::from_key("Broker", false), None);
    }

    #[test]
    fn test_from_key_strict() {
        assert_eq!(
            TransactionKind::from_key("Search", true),
            Some(TransactionKind::Search)
        );
        assert_eq!(
            TransactionKind::from_key("Search-URL", true),
            Some(TransactionKind::Search)
        );
        assert_eq!(TransactionKind::from_key("search", true), None);
        assert_eq!(
            TransactionKind::from_key("Server-Information", true),
            Some(TransactionKind::ServerInformation)
        );
    }

    #[test]
    fn test_relative_urls_resolve_against_origin() {
        let mut caps = CapabilityUrls::new("http://rets.example.com:6103/rets/login").unwrap();
        caps.set(TransactionKind::Search, "/rets/search").unwrap();
        caps.set(TransactionKind::Logout, "logout").unwrap();
        caps.set(TransactionKind::GetObject, "https://media.example.com/obj")
            .unwrap();

        assert_eq!(
            caps.resolve(TransactionKind::Search).unwrap().as_str(),
            "http://rets.example.com:6103/rets/search"
        );
        assert_eq!(
            caps.resolve(TransactionKind::Logout).unwrap().as_str(),
            "http://rets.example.com:6103/logout"
        );
        assert_eq!(
            caps.resolve(TransactionKind::GetObject).unwrap().as_str(),
            "https://media.example.com/obj"
        );
    }

    #[test]
    fn test_origin_drops_path_and_query() {
        let mut caps = CapabilityUrls::new("https://rets.example.com/a/b/login?x=1#top").unwrap();
        assert_eq!(caps.origin().as_str(), "https://rets.example.com/");
        caps.set(TransactionKind::Action, "action.asp?y=2").unwrap();
        assert_eq!(
            caps.resolve(TransactionKind::Action).unwrap().as_str(),
            "https://rets.example.com/action.asp?y=2"
        );
        assert_eq!(
            caps.login_url().as_str(),
            "https://rets.example.com/a/b/login?x=1#top"
        );
    }

    #[test]
    fn test_login_always_present() {
        let caps = CapabilityUrls::new("http://h/login").unwrap();
        assert!(caps.is_supported(TransactionKind::Login));
        assert!(!caps.is_supported(TransactionKind::Search));
        assert_eq!(
            caps.missing_required(),
            vec![TransactionKind::Search, TransactionKind::GetMetadata]
        );
    }

    #[test]
    fn test_invalid_login_url() {
        assert!(matches!(
            CapabilityUrls::new("not a url"),
            Err(ProtocolError::InvalidUrl { .. })
        ));
    }
}
