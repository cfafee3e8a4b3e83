//! Client configuration and the `reqwest` HTTP connection.

use crate::digest::{select_challenge, Challenge, DigestState};
use crate::error::ClientError;
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use cookie::Cookie;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE, WWW_AUTHENTICATE,
};
use http::StatusCode;
use parking_lot::{Mutex, RwLock};
use rets_protocol::multipart::{DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use rets_protocol::RetsVersion;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Position;

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("rets-rs/", env!("CARGO_PKG_VERSION"));

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read timeout. Large searches and metadata pulls are slow.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Login transaction URL.
    pub login_url: String,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Enables `RETS-UA-Authorization` when set.
    pub user_agent_password: Option<String>,
    /// Version proposed until the server advertises one.
    pub version: RetsVersion,
    /// Reject protocol deviations instead of tolerating them.
    pub strict: bool,
    /// Preferred HTTP method.
    pub method: HttpMethod,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Negotiate gzip/deflate response compression.
    pub gzip: bool,
    /// Read buffer size for multipart object bodies.
    pub object_buffer_size: usize,
    /// Request COMPACT instead of STANDARD-XML metadata by default.
    pub compact_metadata: bool,
    /// Send a fresh `RETS-Request-ID` with every request.
    pub request_ids: bool,
}

impl ClientConfig {
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            user_agent_password: None,
            version: RetsVersion::DEFAULT,
            strict: false,
            method: HttpMethod::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            gzip: true,
            object_buffer_size: DEFAULT_BUFFER_SIZE,
            compact_metadata: false,
            request_ids: false,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_user_agent_password(mut self, password: impl Into<String>) -> Self {
        self.user_agent_password = Some(password.into());
        self
    }

    pub fn with_version(mut self, version: RetsVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn with_object_buffer_size(mut self, size: usize) -> Self {
        self.object_buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    pub fn with_compact_metadata(mut self, compact: bool) -> Self {
        self.compact_metadata = compact;
        self
    }

    pub fn with_request_ids(mut self, request_ids: bool) -> Self {
        self.request_ids = request_ids;
        self
    }
}

/// Cookies received from the server, keyed by name.
#[derive(Debug, Default)]
pub(crate) struct CookieStore {
    cookies: BTreeMap<String, Cookie<'static>>,
}

impl CookieStore {
    /// Records every `Set-Cookie` header. Expired cookies are removed.
    pub(crate) fn store(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                tracing::warn!("Ignoring non-ASCII Set-Cookie header");
                continue;
            };
            match Cookie::parse(raw.to_string()) {
                Ok(cookie) => {
                    let expired = cookie
                        .max_age()
                        .is_some_and(|age| age.is_zero() || age.is_negative());
                    if expired {
                        self.cookies.remove(cookie.name());
                    } else {
                        self.cookies.insert(cookie.name().to_string(), cookie);
                    }
                }
                Err(e) => tracing::warn!("Ignoring malformed cookie '{}': {}", raw, e),
            }
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<String> {
        self.cookies.get(name).map(|c| c.value().to_string())
    }

    pub(crate) fn clear(&mut self) {
        self.cookies.clear();
    }

    /// The `Cookie` request header value.
    pub(crate) fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .values()
                .map(|c| format!("{}={}", c.name(), c.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Authentication scheme established by a previous challenge.
#[derive(Debug)]
enum AuthScheme {
    Basic,
    Digest(DigestState),
}

/// HTTP connection backed by a blocking `reqwest` client.
pub struct HttpConnection {
    client: reqwest::blocking::Client,
    default_headers: RwLock<HeaderMap>,
    cookies: Mutex<CookieStore>,
    credentials: RwLock<Option<Credentials>>,
    auth: Mutex<Option<AuthScheme>>,
}

impl HttpConnection {
    /// Builds the client. Timeouts and compression are fixed here.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .gzip(config.gzip)
            .deflate(config.gzip)
            .build()?;

        Ok(Self {
            client,
            default_headers: RwLock::new(HeaderMap::new()),
            cookies: Mutex::new(CookieStore::default()),
            credentials: RwLock::new(None),
            auth: Mutex::new(None),
        })
    }

    fn merged_headers(&self, request: &HttpRequest) -> HeaderMap {
        let mut headers = self.default_headers.read().clone();
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if request.method == HttpMethod::Post && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }
        if let Some(cookies) = self.cookies.lock().header_value() {
            match HeaderValue::from_str(&cookies) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(_) => tracing::warn!("Dropping cookies that are not valid header text"),
            }
        }
        headers
    }

    /// The `Authorization` to send, based on the scheme already in use.
    fn authorization(&self, method: HttpMethod, uri: &str) -> Option<Authorization> {
        let credentials = self.credentials.read().clone()?;
        let mut auth = self.auth.lock();
        match auth.as_mut()? {
            AuthScheme::Basic => Some(Authorization::Basic(credentials)),
            AuthScheme::Digest(state) => Some(Authorization::Header(state.authorization(
                method.as_str(),
                uri,
                &credentials.username,
                &credentials.password,
                &cnonce(),
            ))),
        }
    }

    fn send(
        &self,
        request: &HttpRequest,
        url: &url::Url,
        authorization: Option<Authorization>,
    ) -> Result<reqwest::blocking::Response, ClientError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self
            .client
            .request(method, url.clone())
            .headers(self.merged_headers(request));
        if request.method == HttpMethod::Post {
            builder = builder.body(request.parameters.clone().unwrap_or_default());
        }
        builder = match authorization {
            Some(Authorization::Basic(c)) => builder.basic_auth(c.username, Some(c.password)),
            Some(Authorization::Header(value)) => {
                builder.header(http::header::AUTHORIZATION, value)
            }
            None => builder,
        };

        tracing::debug!("{} {}", request.method, url);
        let response = builder.send()?;
        self.cookies.lock().store(response.headers());
        Ok(response)
    }

    /// Sets up the scheme for a 401 challenge. Returns false when the
    /// challenge cannot be answered.
    fn accept_challenge(&self, headers: &HeaderMap) -> bool {
        if self.credentials.read().is_none() {
            return false;
        }
        let values = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok());
        let scheme = match select_challenge(values) {
            Some(Challenge::Digest(challenge)) => AuthScheme::Digest(DigestState::new(challenge)),
            Some(Challenge::Basic { .. }) => AuthScheme::Basic,
            None => return false,
        };
        *self.auth.lock() = Some(scheme);
        true
    }
}

enum Authorization {
    Basic(Credentials),
    Header(String),
}

fn cnonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

impl HttpClient for HttpConnection {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let url = request.url_with_query();
        let uri = url[Position::BeforePath..Position::AfterQuery].to_string();

        let preemptive = self.authorization(request.method, &uri);
        let had_auth = preemptive.is_some();
        let mut response = self.send(&request, &url, preemptive)?;

        // One retry after a fresh challenge, or a stale nonce.
        if response.status() == StatusCode::UNAUTHORIZED
            && (!had_auth || is_stale(response.headers()))
            && self.accept_challenge(response.headers())
        {
            let authorization = self.authorization(request.method, &uri);
            response = self.send(&request, &url, authorization)?;
        }

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("OK").to_string(),
            headers: response.headers().clone(),
            body: Box::new(response),
        })
    }

    fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        self.default_headers.write().insert(name, value);
    }

    fn remove_default_header(&self, name: &HeaderName) {
        self.default_headers.write().remove(name);
    }

    fn default_header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.default_headers.read().get(name).cloned()
    }

    fn set_credentials(&self, username: &str, password: &str) {
        *self.credentials.write() = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        *self.auth.lock() = None;
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name)
    }

    fn clear_cookies(&self) {
        self.cookies.lock().clear();
    }
}

fn is_stale(headers: &HeaderMap) -> bool {
    let values = headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok());
    matches!(select_challenge(values), Some(Challenge::Digest(c)) if c.stale)
}
