//! Request dispatch.
//!
//! The transport owns the capability URLs and the negotiated version. Each
//! transaction resolves its URL, stamps the RETS headers and runs through
//! the [`HttpClient`] inside a monitor event.

use crate::connection::{ClientConfig, HttpConnection};
use crate::error::ClientError;
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::monitor::{MonitorGuard, NetworkMonitor, TracingMonitor};
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use rets_protocol::version::VERSION_HEADER;
use rets_protocol::{
    parse_status, CapabilityUrls, ChangePasswordParams, CompactParser, GetMetadataParams,
    GetObjectParams, LoginParams, LoginResponse, LogoutOutcome, MetadataBuilder, ObjectResponse,
    Reply, Request, RetsVersion, SearchParams, SearchResultCollector, SearchResultProcessor,
    TransactionKind, UaAuth, REQUEST_ID_HEADER, SESSION_ID_COOKIE, UA_AUTH_HEADER,
};
use std::io::{BufReader, Read};
use std::sync::Arc;

/// Transaction dispatcher over an [`HttpClient`].
pub struct Transport<H: HttpClient = HttpConnection> {
    http: H,
    capabilities: CapabilityUrls,
    version: RetsVersion,
    strict: bool,
    method: HttpMethod,
    user_agent: String,
    ua_password: Option<String>,
    ua_auth: Option<UaAuth>,
    request_ids: bool,
    object_buffer_size: usize,
    monitor: Arc<dyn NetworkMonitor>,
}

impl Transport<HttpConnection> {
    /// Creates a transport over a new `reqwest` connection.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = HttpConnection::new(config)?;
        Self::new(config, http)
    }
}

impl<H: HttpClient> Transport<H> {
    pub fn new(config: &ClientConfig, http: H) -> Result<Self, ClientError> {
        let capabilities = CapabilityUrls::new(&config.login_url)?;
        let mut transport = Self {
            http,
            capabilities,
            version: config.version,
            strict: config.strict,
            method: config.method,
            user_agent: String::new(),
            ua_password: config.user_agent_password.clone(),
            ua_auth: None,
            request_ids: config.request_ids,
            object_buffer_size: config.object_buffer_size,
            monitor: Arc::new(TracingMonitor::new()),
        };
        transport.set_user_agent(&config.user_agent)?;
        Ok(transport)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn capabilities(&self) -> &CapabilityUrls {
        &self.capabilities
    }

    /// The currently negotiated version.
    pub fn version(&self) -> RetsVersion {
        self.version
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn set_method(&mut self, method: HttpMethod) {
        self.method = method;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Changes the `User-Agent`. The UA-Auth digest follows it.
    pub fn set_user_agent(&mut self, user_agent: &str) -> Result<(), ClientError> {
        let value = HeaderValue::from_str(user_agent)
            .map_err(|_| ClientError::Config(format!("invalid user agent: {}", user_agent)))?;
        self.http.set_default_header(USER_AGENT, value);
        self.user_agent = user_agent.to_string();
        self.ua_auth = self
            .ua_password
            .as_deref()
            .map(|password| UaAuth::new(user_agent, password));
        Ok(())
    }

    pub fn set_user_agent_password(&mut self, password: Option<String>) {
        self.ua_auth = password
            .as_deref()
            .map(|password| UaAuth::new(&self.user_agent, password));
        self.ua_password = password;
    }

    pub fn set_monitor(&mut self, monitor: Arc<dyn NetworkMonitor>) {
        self.monitor = monitor;
    }

    /// The session id cookie, if the server has set one.
    pub fn session_id(&self) -> Option<String> {
        self.http.cookie(SESSION_ID_COOKIE)
    }

    /// Forgets the session: cookies are dropped and only the login URL
    /// remains resolvable.
    pub fn reset(&mut self) {
        self.http.clear_cookies();
        self.capabilities = CapabilityUrls::from_url(self.capabilities.login_url().clone());
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Sends a request to its capability URL and returns the raw response.
    ///
    /// The response version header is applied leniently.
    pub fn dispatch(&mut self, request: &Request) -> Result<HttpResponse, ClientError> {
        let kind = request.kind();
        let url = self
            .capabilities
            .resolve(kind)
            .cloned()
            .ok_or(ClientError::Unsupported(kind))?;

        let monitor = Arc::clone(&self.monitor);
        let _event = MonitorGuard::start(monitor.as_ref(), request.label());

        let headers = self.request_headers()?;
        let parameters = request.encode_parameters();
        tracing::debug!("{} {} ({})", self.method, url, kind);

        let outgoing = HttpRequest {
            method: self.method,
            url,
            headers,
            parameters,
        };
        let response = match self.http.execute(outgoing.clone()) {
            Err(ClientError::HttpStatus { status, .. })
                if self.method == HttpMethod::Get && (status == 405 || status == 501) =>
            {
                tracing::info!("Server refused GET with status {}, switching to POST", status);
                self.method = HttpMethod::Post;
                self.http.execute(HttpRequest {
                    method: HttpMethod::Post,
                    ..outgoing
                })?
            }
            other => other?,
        };

        self.negotiate(&response, false)?;
        Ok(response)
    }

    fn request_headers(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("rets-version"),
            HeaderValue::from_static(self.version.as_str()),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let request_id = self
            .request_ids
            .then(|| uuid::Uuid::new_v4().to_string());
        if let Some(id) = &request_id {
            headers.insert(REQUEST_ID_HEADER, header_value(id)?);
        }

        if let Some(auth) = &self.ua_auth {
            let session_id = self.session_id();
            let value =
                auth.header_value(request_id.as_deref(), session_id.as_deref(), self.version);
            headers.insert(UA_AUTH_HEADER, header_value(&value)?);
        }
        Ok(headers)
    }

    fn negotiate(&mut self, response: &HttpResponse, strict: bool) -> Result<(), ClientError> {
        let negotiated =
            RetsVersion::negotiate(self.version, response.header(VERSION_HEADER), strict)?;
        if negotiated != self.version {
            tracing::debug!("Server speaks {}, was {}", negotiated, self.version);
            self.version = negotiated;
        }
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Logs in and replaces the capability URLs with the advertised ones.
    pub fn login(&mut self, params: LoginParams) -> Result<LoginResponse, ClientError> {
        let response = self.dispatch(&Request::Login(params))?;
        self.negotiate(&response, self.strict)?;

        let body = response.read_body()?;
        let login_url = self.capabilities.login_url().clone();
        let login = LoginResponse::parse(&body, &login_url, self.version, self.strict)?
            .with_session_id(self.session_id());

        self.capabilities = login.capabilities().clone();
        tracing::info!(
            "Logged in to {} using {}{}",
            login_url,
            self.version,
            login
                .member_name()
                .map(|m| format!(" as {}", m))
                .unwrap_or_default()
        );
        Ok(login)
    }

    /// Logs out. Returns `None` when the server advertises no logout URL.
    pub fn logout(&mut self) -> Result<Option<LogoutOutcome>, ClientError> {
        if !self.capabilities.is_supported(TransactionKind::Logout) {
            tracing::debug!("Server has no logout transaction");
            return Ok(None);
        }
        let response = self.dispatch(&Request::Logout)?;
        let body = response.read_body()?;
        Ok(Some(LogoutOutcome::parse(&body, self.version, self.strict)?))
    }

    /// Streams a compact search into `collector`.
    pub fn search<C>(&mut self, params: &SearchParams, collector: &mut C) -> Result<(), ClientError>
    where
        C: SearchResultCollector + ?Sized,
    {
        let response = self.dispatch(&Request::Search(params.clone()))?;
        let mut parser = CompactParser::new().strict(self.strict);
        parser
            .parse(BufReader::new(response.body), collector)
            .map_err(|e| ClientError::from(e).with_request(params.to_string()))
    }

    /// Runs a search body through a custom processor.
    pub fn search_with<P>(
        &mut self,
        params: &SearchParams,
        processor: &mut P,
    ) -> Result<P::Output, ClientError>
    where
        P: SearchResultProcessor + ?Sized,
    {
        let response = self.dispatch(&Request::Search(params.clone()))?;
        let mut body = response.body;
        processor
            .process(&mut body)
            .map_err(|e| ClientError::from(e).with_request(params.to_string()))
    }

    /// Requests objects. Bodies are read lazily from the returned response.
    pub fn get_object(&mut self, params: &GetObjectParams) -> Result<ObjectResponse, ClientError> {
        let response = self.dispatch(&Request::GetObject(params.clone()))?;
        let (headers, body) = response.into_parts();
        let objects = ObjectResponse::new(headers, body).map_err(|e| {
            ClientError::from(e).with_request(format!(
                "Resource={} Type={} ID={}",
                params.resource,
                params.object_type,
                params.id_param()
            ))
        })?;
        Ok(objects.with_buffer_size(self.object_buffer_size))
    }

    /// Fetches metadata and hands the document to `builder`.
    pub fn get_metadata<B>(
        &mut self,
        params: &GetMetadataParams,
        builder: &mut B,
    ) -> Result<B::Output, ClientError>
    where
        B: MetadataBuilder + ?Sized,
    {
        let response = self.dispatch(&Request::GetMetadata(params.clone()))?;
        let document = response.read_body()?;
        builder
            .build(&document, params.format, self.strict)
            .map_err(|e| ClientError::from(e).with_request(params.to_string()))
    }

    pub fn change_password(&mut self, params: &ChangePasswordParams) -> Result<Reply, ClientError> {
        let response = self.dispatch(&Request::ChangePassword(params.clone()))?;
        let body = response.read_body()?;
        let reply = parse_status(&body)?;
        if !reply.is_success() {
            return Err(ClientError::from(reply.into_error()).with_request("ChangePassword"));
        }
        Ok(reply)
    }

    /// Fetches the action (message of the day) page, if advertised.
    pub fn action(&mut self) -> Result<Option<String>, ClientError> {
        if !self.capabilities.is_supported(TransactionKind::Action) {
            return Ok(None);
        }
        let mut response = self.dispatch(&Request::Action)?;
        let mut text = Vec::new();
        response.body.read_to_end(&mut text)?;
        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value)
        .map_err(|_| ClientError::Config(format!("invalid header value: {}", value)))
}
