//! In-memory `HttpClient` used by unit tests.

use crate::error::ClientError;
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use url::Url;

/// A response to replay.
pub(crate) struct Canned {
    status: u16,
    headers: HeaderMap,
    cookies: Vec<(String, Option<String>)>,
    body: Vec<u8>,
}

impl Canned {
    pub(crate) fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: body.into(),
        }
    }

    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Vec::new())
        }
    }

    pub(crate) fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.append(
            HeaderName::from_static(name),
            HeaderValue::from_str(value).unwrap(),
        );
        self
    }

    pub(crate) fn xml(mut self) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        self
    }

    pub(crate) fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), Some(value.to_string())));
        self
    }
}

/// A request as it reached the mock, default headers merged in.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub parameters: Option<String>,
}

impl Recorded {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Default)]
struct State {
    responses: VecDeque<Canned>,
    requests: Vec<Recorded>,
    defaults: HeaderMap,
    cookies: BTreeMap<String, String>,
    credentials: Option<(String, String)>,
}

#[derive(Default)]
pub(crate) struct MockHttp {
    state: Mutex<State>,
}

impl MockHttp {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, response: Canned) {
        self.state.lock().responses.push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    pub(crate) fn last_request(&self) -> Recorded {
        self.state.lock().requests.last().cloned().unwrap()
    }

    pub(crate) fn credentials(&self) -> Option<(String, String)> {
        self.state.lock().credentials.clone()
    }
}

impl HttpClient for MockHttp {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let mut state = self.state.lock();

        let mut headers = state.defaults.clone();
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if !state.cookies.is_empty() {
            let cookies = state
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert("cookie", HeaderValue::from_str(&cookies).unwrap());
        }
        state.requests.push(Recorded {
            method: request.method,
            url: request.url_with_query(),
            headers,
            parameters: request.parameters.clone(),
        });

        let canned = state
            .responses
            .pop_front()
            .unwrap_or_else(|| panic!("no canned response for {}", request.url));
        for (name, value) in canned.cookies {
            match value {
                Some(value) => state.cookies.insert(name, value),
                None => state.cookies.remove(&name),
            };
        }
        if canned.status != 200 {
            return Err(ClientError::HttpStatus {
                status: canned.status,
                reason: "canned".to_string(),
            });
        }
        Ok(HttpResponse {
            status: canned.status,
            reason: "OK".to_string(),
            headers: canned.headers,
            body: Box::new(Cursor::new(canned.body)),
        })
    }

    fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        self.state.lock().defaults.insert(name, value);
    }

    fn remove_default_header(&self, name: &HeaderName) {
        self.state.lock().defaults.remove(name);
    }

    fn default_header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.state.lock().defaults.get(name).cloned()
    }

    fn set_credentials(&self, username: &str, password: &str) {
        self.state.lock().credentials = Some((username.to_string(), password.to_string()));
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.state.lock().cookies.get(name).cloned()
    }

    fn clear_cookies(&self) {
        self.state.lock().cookies.clear();
    }
}

/// A login reply advertising the usual capability URLs.
pub(crate) fn login_body() -> String {
    [
        "<RETS ReplyCode=\"0\" ReplyText=\"Operation Successful\">",
        "<RETS-RESPONSE>",
        "MemberName=Jane Agent",
        "User=jagent,1,AGENT,12345",
        "Broker=BRK,01",
        "MetadataVersion=1.00.000",
        "TimeoutSeconds=1800",
        "Search=/rets/search",
        "GetObject=/rets/getobject",
        "GetMetadata=/rets/getmetadata",
        "Logout=/rets/logout",
        "Action=/rets/action",
        "</RETS-RESPONSE>",
        "</RETS>",
    ]
    .join("\n")
}

/// A compact search reply with two rows.
pub(crate) const SEARCH_BODY: &str = "<RETS ReplyCode=\"0\" ReplyText=\"Success\">\n\
<COUNT Records=\"2\" />\n\
<DELIMITER value=\"09\" />\n\
<COLUMNS>\tListingID\tListPrice\t</COLUMNS>\n\
<DATA>\tL1\t100000\t</DATA>\n\
<DATA>\tL2\t250000\t</DATA>\n\
</RETS>\n";

pub(crate) const LOGOUT_BODY: &str = "<RETS ReplyCode=\"0\" ReplyText=\"Logged out\">\n\
<RETS-RESPONSE>\nConnectTime=42\nBilling=none\nSignOffMessage=Goodbye\n</RETS-RESPONSE>\n</RETS>";
