//! High-level session API.

use crate::connection::{ClientConfig, HttpConnection};
use crate::error::ClientError;
use crate::http::{HttpClient, HttpMethod, HttpResponse};
use crate::monitor::NetworkMonitor;
use crate::transport::Transport;
use rets_protocol::{
    CapabilityUrls, ChangePasswordParams, GetMetadataParams, GetObjectParams, LoginParams,
    LoginResponse, LogoutOutcome, MetadataBuilder, MetadataFormat, ObjectResponse, RawMetadata,
    RawMetadataBuilder, Reply, ReplyClass, Request, RetsVersion, SearchParams, SearchResult,
    SearchResultCollector, SearchResultProcessor,
};
use std::sync::Arc;

/// Where an object lives, as reported by a location-only GetObject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub content_id: Option<String>,
    pub object_id: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub preferred: bool,
    /// Per-object reply sent instead of a location.
    pub reply: Option<Reply>,
}

/// A logical conversation with one RETS server.
///
/// Requests are strictly sequential: each call returns only after its
/// response has been read, except [`Session::get_object`], whose objects
/// must be read or dropped before the next request.
pub struct Session<H: HttpClient = HttpConnection> {
    transport: Transport<H>,
    session_id: Option<String>,
    compact_metadata: bool,
}

impl Session<HttpConnection> {
    /// Creates a session over a new `reqwest` connection.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = HttpConnection::new(&config)?;
        Self::with_client(config, http)
    }
}

impl<H: HttpClient> Session<H> {
    /// Creates a session over a caller-supplied HTTP client.
    pub fn with_client(config: ClientConfig, http: H) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Transport::new(&config, http)?,
            session_id: None,
            compact_metadata: config.compact_metadata,
        })
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    /// Logs in.
    ///
    /// A server that needs a broker code fails with
    /// [`ClientError::BrokerCodeRequired`]; retry with
    /// [`Session::login_with_broker`].
    pub fn login(&mut self, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
        self.do_login(username, password, LoginParams::new())
    }

    pub fn login_with_broker(
        &mut self,
        username: &str,
        password: &str,
        broker_code: &str,
        broker_branch: Option<&str>,
    ) -> Result<LoginResponse, ClientError> {
        let params = LoginParams::new().with_broker(broker_code, broker_branch.map(String::from));
        self.do_login(username, password, params)
    }

    fn do_login(
        &mut self,
        username: &str,
        password: &str,
        params: LoginParams,
    ) -> Result<LoginResponse, ClientError> {
        self.transport.http().set_credentials(username, password);

        let response = match self.transport.login(params) {
            Ok(response) => response,
            Err(err @ ClientError::BrokerCodeRequired { .. }) => return Err(err),
            Err(err) => {
                if is_fatal(&err) {
                    self.session_id = None;
                    self.transport.reset();
                }
                return Err(err);
            }
        };
        self.session_id = response.session_id().map(String::from);

        match self.transport.action() {
            Ok(Some(text)) => tracing::debug!("Action page: {} bytes", text.len()),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to fetch action page: {}", e),
        }
        Ok(response)
    }

    /// Logs out. The local session is cleared whatever the outcome.
    ///
    /// Returns `None` when the server has no logout transaction.
    pub fn logout(&mut self) -> Result<Option<LogoutOutcome>, ClientError> {
        let result = self.transport.logout();
        self.session_id = None;
        self.transport.reset();
        result
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Runs a search and buffers every row.
    pub fn search(&mut self, params: &SearchParams) -> Result<SearchResult, ClientError> {
        let mut result = SearchResult::new();
        self.transport.search(params, &mut result)?;
        Ok(result)
    }

    /// Streams rows into `collector`.
    pub fn search_with_collector<C>(
        &mut self,
        params: &SearchParams,
        collector: &mut C,
    ) -> Result<(), ClientError>
    where
        C: SearchResultCollector + ?Sized,
    {
        self.transport.search(params, collector)
    }

    pub fn search_with_processor<P>(
        &mut self,
        params: &SearchParams,
        processor: &mut P,
    ) -> Result<P::Output, ClientError>
    where
        P: SearchResultProcessor + ?Sized,
    {
        self.transport.search_with(params, processor)
    }

    /// Asks for the record count only.
    pub fn count(&mut self, params: &SearchParams) -> Result<u64, ClientError> {
        let params = params.clone().count_only();
        Ok(self.search(&params)?.count())
    }

    // =========================================================================
    // Objects and metadata
    // =========================================================================

    pub fn get_object(&mut self, params: &GetObjectParams) -> Result<ObjectResponse, ClientError> {
        self.transport.get_object(params)
    }

    /// Requests object URLs instead of object bytes.
    pub fn get_object_urls(
        &mut self,
        params: &GetObjectParams,
    ) -> Result<Vec<ObjectLocation>, ClientError> {
        let params = params.clone().with_location(true);
        let mut response = self.transport.get_object(&params)?;
        let mut objects = response.objects()?;
        let mut locations = Vec::new();
        while let Some(object) = objects.next_object()? {
            locations.push(ObjectLocation {
                content_id: object.content_id().map(String::from),
                object_id: object.object_id().map(String::from),
                description: object.description().map(String::from),
                url: object.location().map(String::from),
                preferred: object.is_preferred(),
                reply: object.reply().cloned(),
            });
        }
        Ok(locations)
    }

    /// Fetches metadata as an undecoded document.
    pub fn get_metadata(&mut self, params: &GetMetadataParams) -> Result<RawMetadata, ClientError> {
        self.transport.get_metadata(params, &mut RawMetadataBuilder)
    }

    /// The full system metadata, in the configured format.
    pub fn system_metadata(&mut self) -> Result<RawMetadata, ClientError> {
        let format = if self.compact_metadata {
            MetadataFormat::Compact
        } else {
            MetadataFormat::Standard
        };
        self.get_metadata(&GetMetadataParams::system().with_format(format))
    }

    pub fn get_metadata_with<B>(
        &mut self,
        params: &GetMetadataParams,
        builder: &mut B,
    ) -> Result<B::Output, ClientError>
    where
        B: MetadataBuilder + ?Sized,
    {
        self.transport.get_metadata(params, builder)
    }

    // =========================================================================
    // Other transactions
    // =========================================================================

    /// Sends an already encrypted and encoded password change.
    pub fn change_password(&mut self, params: &ChangePasswordParams) -> Result<Reply, ClientError> {
        self.transport.change_password(params)
    }

    /// Sends any request and returns the raw response.
    pub fn request(&mut self, request: &Request) -> Result<HttpResponse, ClientError> {
        self.transport.dispatch(request)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// The session id recorded at login.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn version(&self) -> RetsVersion {
        self.transport.version()
    }

    pub fn capabilities(&self) -> &CapabilityUrls {
        self.transport.capabilities()
    }

    pub fn login_url(&self) -> &url::Url {
        self.transport.capabilities().login_url()
    }

    pub fn set_method(&mut self, method: HttpMethod) {
        self.transport.set_method(method);
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.transport.set_strict(strict);
    }

    pub fn is_strict(&self) -> bool {
        self.transport.is_strict()
    }

    pub fn set_user_agent(&mut self, user_agent: &str) -> Result<(), ClientError> {
        self.transport.set_user_agent(user_agent)
    }

    pub fn set_user_agent_password(&mut self, password: Option<String>) {
        self.transport.set_user_agent_password(password);
    }

    pub fn set_monitor(&mut self, monitor: Arc<dyn NetworkMonitor>) {
        self.transport.set_monitor(monitor);
    }

    pub fn transport(&self) -> &Transport<H> {
        &self.transport
    }
}

/// Login failures after which the server-side session is unusable.
fn is_fatal(err: &ClientError) -> bool {
    match err.reply_code() {
        Some(code) => code.classify() == ReplyClass::Fatal,
        None => !err.is_retryable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::EventToken;
    use crate::testing::{login_body, Canned, MockHttp, LOGOUT_BODY, SEARCH_BODY};
    use parking_lot::Mutex;
    use rets_protocol::{ReplyCode, TransactionKind, SESSION_ID_COOKIE};

    const LOGIN_URL: &str = "http://rets.example.com/rets/login";

    fn session() -> (Arc<MockHttp>, Session<Arc<MockHttp>>) {
        session_with(ClientConfig::new(LOGIN_URL))
    }

    fn session_with(config: ClientConfig) -> (Arc<MockHttp>, Session<Arc<MockHttp>>) {
        let mock = Arc::new(MockHttp::new());
        let session = Session::with_client(config, Arc::clone(&mock)).unwrap();
        (mock, session)
    }

    fn push_login(mock: &MockHttp, body: String) {
        mock.push(
            Canned::ok(body)
                .header("rets-version", "RETS/1.7.2")
                .cookie(SESSION_ID_COOKIE, "SESS42"),
        );
    }

    fn login_without_logout() -> String {
        login_body()
            .lines()
            .filter(|l| !l.starts_with("Logout=") && !l.starts_with("Action="))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[derive(Default)]
    struct Recording {
        labels: Mutex<Vec<String>>,
    }

    impl NetworkMonitor for Recording {
        fn event_start(&self, label: &str) -> EventToken {
            self.labels.lock().push(format!("start {}", label));
            EventToken::new(0, label)
        }

        fn event_finish(&self, token: EventToken) {
            self.labels.lock().push(format!("finish {}", token.label()));
        }
    }

    #[test]
    fn test_login_search_logout() {
        let (mock, mut session) = session();
        push_login(&mock, login_without_logout());
        mock.push(Canned::ok(SEARCH_BODY));

        let login = session.login("jagent", "secret").unwrap();
        assert_eq!(login.member_name(), Some("Jane Agent"));
        assert_eq!(login.session_timeout(), Some(1800));
        assert_eq!(session.session_id(), Some("SESS42"));
        assert_eq!(
            mock.credentials(),
            Some(("jagent".to_string(), "secret".to_string()))
        );

        let result = session
            .search(&SearchParams::new("Property", "RES", "(ListPrice=0+)"))
            .unwrap();
        assert_eq!(result.count(), 2);
        assert_eq!(result.columns(), ["ListingID", "ListPrice"]);
        assert_eq!(result.row(0).unwrap(), ["L1", "100000"]);
        assert_eq!(result.value(1, "ListPrice"), Some("250000"));
        assert!(result.is_complete());

        assert!(session.logout().unwrap().is_none());
        assert_eq!(session.session_id(), None);
        assert!(!session.is_logged_in());
        assert_eq!(mock.requests().len(), 2);
    }

    #[test]
    fn test_login_fetches_action() {
        let (mock, mut session) = session();
        push_login(&mock, login_body());
        mock.push(Canned::ok("Message of the day"));
        session.login("u", "p").unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].url.as_str(),
            "http://rets.example.com/rets/action"
        );
    }

    #[test]
    fn test_action_failure_is_not_fatal() {
        let (mock, mut session) = session();
        push_login(&mock, login_body());
        mock.push(Canned::status(404));
        session.login("u", "p").unwrap();
        assert!(session.is_logged_in());
    }

    #[test]
    fn test_failed_login_clears_session() {
        let (mock, mut session) = session();
        mock.push(
            Canned::ok("<RETS ReplyCode=\"20036\" ReplyText=\"Bad login\"/>")
                .cookie(SESSION_ID_COOKIE, "STALE"),
        );
        let err = session.login("u", "wrong").unwrap_err();
        assert_eq!(err.reply_code(), Some(ReplyCode::MiscLoginError));
        assert_eq!(session.session_id(), None);
        assert_eq!(session.transport().session_id(), None);
    }

    #[test]
    fn test_login_with_broker() {
        let (mock, mut session) = session();
        mock.push(Canned::ok(
            "<RETS ReplyCode=\"20012\" ReplyText=\"Choose\">\n\
             <RETS-RESPONSE>\nBroker=A,1\nBroker=B,2\n</RETS-RESPONSE>\n</RETS>",
        ));
        let codes = match session.login("u", "p") {
            Err(ClientError::BrokerCodeRequired { codes }) => codes,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(codes.len(), 2);

        push_login(&mock, login_without_logout());
        let chosen = &codes[1];
        session
            .login_with_broker("u", "p", &chosen.code, chosen.branch.as_deref())
            .unwrap();
        assert_eq!(
            mock.last_request().url.query(),
            Some("BrokerCode=B%2C2")
        );
        assert!(session.is_logged_in());
    }

    #[test]
    fn test_logout_clears_session_on_error() {
        let (mock, mut session) = session();
        push_login(&mock, login_body());
        mock.push(Canned::ok(""));
        session.login("u", "p").unwrap();

        mock.push(Canned::status(500));
        assert!(session.logout().is_err());
        assert_eq!(session.session_id(), None);
        assert_eq!(session.transport().session_id(), None);
    }

    #[test]
    fn test_logout_response() {
        let (mock, mut session) = session();
        push_login(&mock, login_body());
        mock.push(Canned::ok(""));
        session.login("u", "p").unwrap();

        mock.push(Canned::ok(LOGOUT_BODY));
        let outcome = session.logout().unwrap().unwrap();
        assert_eq!(
            outcome.response().unwrap().billing.as_deref(),
            Some("none")
        );
        assert!(!session.capabilities().is_supported(TransactionKind::Search));
    }

    #[test]
    fn test_count() {
        let (mock, mut session) = session();
        push_login(&mock, login_without_logout());
        session.login("u", "p").unwrap();

        mock.push(Canned::ok(
            "<RETS ReplyCode=\"0\" ReplyText=\"Success\"><COUNT Records=\"1234\"/></RETS>",
        ));
        let count = session
            .count(&SearchParams::new("Property", "RES", "(X=1)"))
            .unwrap();
        assert_eq!(count, 1234);
        assert!(mock
            .last_request()
            .url
            .query()
            .unwrap()
            .contains("Count=2"));
    }

    #[test]
    fn test_no_records_found_is_empty() {
        let (mock, mut session) = session();
        push_login(&mock, login_without_logout());
        session.login("u", "p").unwrap();

        mock.push(Canned::ok(
            "<RETS ReplyCode=\"20201\" ReplyText=\"No Records Found\"/>",
        ));
        let result = session
            .search(&SearchParams::new("Property", "RES", "(X=1)"))
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.count(), 0);
    }

    #[test]
    fn test_get_object_urls() {
        let (mock, mut session) = session();
        push_login(&mock, login_without_logout());
        session.login("u", "p").unwrap();

        let body = "--xyz\r\n\
Content-ID: L1\r\n\
Object-ID: 1\r\n\
Location: http://img.example.com/L1-1.jpg\r\n\
Preferred: 1\r\n\
\r\n\
\r\n--xyz\r\n\
Content-ID: L1\r\n\
Object-ID: 2\r\n\
Location: http://img.example.com/L1-2.jpg\r\n\
\r\n\
\r\n--xyz--\r\n";
        mock.push(
            Canned::ok(body).header("content-type", "multipart/parallel; boundary=\"xyz\""),
        );
        let params = GetObjectParams::new("Property", "Photo").add_entity("L1");
        let locations = session.get_object_urls(&params).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(
            locations[0].url.as_deref(),
            Some("http://img.example.com/L1-1.jpg")
        );
        assert!(locations[0].preferred);
        assert_eq!(locations[1].object_id.as_deref(), Some("2"));
        assert!(!locations[1].preferred);
        assert!(mock
            .last_request()
            .url
            .query()
            .unwrap()
            .contains("Location=1"));
    }

    #[test]
    fn test_system_metadata_format() {
        let config = ClientConfig::new(LOGIN_URL).with_compact_metadata(true);
        let (mock, mut session) = session_with(config);
        push_login(&mock, login_without_logout());
        session.login("u", "p").unwrap();

        mock.push(Canned::ok(
            "<RETS ReplyCode=\"0\" ReplyText=\"Success\"><METADATA-SYSTEM Version=\"1.00.000\"/></RETS>",
        ));
        let metadata = session.system_metadata().unwrap();
        assert_eq!(metadata.format, MetadataFormat::Compact);
        assert!(metadata.as_str().unwrap().contains("METADATA-SYSTEM"));

        let query = mock.last_request().url.query().unwrap().to_string();
        assert!(query.contains("Type=METADATA-SYSTEM"));
        assert!(query.contains("Format=COMPACT"));
    }

    #[test]
    fn test_monitor_sees_every_transaction() {
        let (mock, mut session) = session();
        let monitor = Arc::new(Recording::default());
        session.set_monitor(monitor.clone());

        push_login(&mock, login_without_logout());
        session.login("u", "p").unwrap();
        mock.push(Canned::status(500));
        assert!(session
            .search(&SearchParams::new("Property", "RES", "(X=1)"))
            .is_err());

        assert_eq!(
            *monitor.labels.lock(),
            vec![
                "start Logging in",
                "finish Logging in",
                "start Executing search",
                "finish Executing search",
            ]
        );
    }

    #[test]
    fn test_raw_request() {
        let (mock, mut session) = session();
        push_login(&mock, login_without_logout());
        session.login("u", "p").unwrap();

        mock.push(Canned::ok("raw"));
        let response = session
            .request(&Request::Search(SearchParams::new("Property", "RES", "(X=1)")))
            .unwrap();
        assert_eq!(response.read_body().unwrap(), b"raw");
    }
}
