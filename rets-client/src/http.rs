//! HTTP collaborator contract.
//!
//! The transport never talks to the network directly; it hands requests to
//! an [`HttpClient`]. [`crate::connection::HttpConnection`] is the `reqwest`
//! implementation.

use crate::error::ClientError;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use rets_protocol::multipart::Body;
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// HTTP method used for RETS transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(ClientError::Config(format!("unsupported HTTP method: {}", other))),
        }
    }
}

/// A request ready to be sent.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Merged over the client's default headers.
    pub headers: HeaderMap,
    /// Form-encoded parameters: a query string for GET, the body for POST.
    pub parameters: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Option<String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The URL with GET parameters appended to the query string.
    pub fn url_with_query(&self) -> Url {
        let mut url = self.url.clone();
        if self.method == HttpMethod::Get {
            if let Some(params) = self.parameters.as_deref().filter(|p| !p.is_empty()) {
                let query = match url.query() {
                    Some(existing) if !existing.is_empty() => format!("{}&{}", existing, params),
                    _ => params.to_string(),
                };
                url.set_query(Some(&query));
            }
        }
        url
    }
}

/// A response with a streaming body.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    }

    /// Reads the whole body.
    pub fn read_body(mut self) -> Result<Vec<u8>, ClientError> {
        let mut data = Vec::new();
        self.body.read_to_end(&mut data)?;
        Ok(data)
    }

    pub fn into_parts(self) -> (HeaderMap, Body) {
        (self.headers, self.body)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The HTTP collaborator.
///
/// Implementations keep default headers and cookies behind interior
/// locks so a shared client can be configured through `&self`. A status
/// other than 200 is returned as [`ClientError::HttpStatus`].
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError>;

    fn set_default_header(&self, name: HeaderName, value: HeaderValue);

    fn remove_default_header(&self, name: &HeaderName);

    fn default_header(&self, name: &HeaderName) -> Option<HeaderValue>;

    /// Credentials used to answer HTTP authentication challenges.
    fn set_credentials(&self, username: &str, password: &str);

    fn cookie(&self, name: &str) -> Option<String>;

    fn clear_cookies(&self);
}

impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        (**self).execute(request)
    }

    fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        (**self).set_default_header(name, value)
    }

    fn remove_default_header(&self, name: &HeaderName) {
        (**self).remove_default_header(name)
    }

    fn default_header(&self, name: &HeaderName) -> Option<HeaderValue> {
        (**self).default_header(name)
    }

    fn set_credentials(&self, username: &str, password: &str) {
        (**self).set_credentials(username, password)
    }

    fn cookie(&self, name: &str) -> Option<String> {
        (**self).cookie(name)
    }

    fn clear_cookies(&self) {
        (**self).clear_cookies()
    }
}
