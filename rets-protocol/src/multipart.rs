//! GetObject response de-framing.
//!
//! A GetObject reply is one of:
//! - a single object whose bytes are the whole body,
//! - a `multipart/*` body with one part per object,
//! - a `text/xml` RETS reply carrying only a reply code.
//!
//! Multipart bodies are split lazily: [`ObjectStream::next_object`] reads the
//! next part's headers and hands out a reader over its bytes. Whatever the
//! caller leaves unread is skipped before the following part is returned.

use crate::error::ProtocolError;
use crate::reply::Reply;
use crate::response::parse_status;
use bytes::{Buf, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::io::{self, Read};

/// Default read buffer size for multipart bodies.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size.
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

const MAX_HEADER_LINE: usize = 16 * 1024;
const MAX_REPLY_BODY: u64 = 64 * 1024;

/// A response body.
pub type Body = Box<dyn Read + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Framing {
    /// Reply-only XML: no objects.
    Empty,
    Single,
    Multipart { boundary: String },
}

/// A GetObject response whose objects have not been read yet.
pub struct ObjectResponse {
    headers: HeaderMap,
    body: Option<Body>,
    framing: Framing,
    reply: Option<Reply>,
    buffer_size: usize,
    consumed: bool,
}

impl ObjectResponse {
    /// Inspects the response headers and, for reply-only XML bodies, the
    /// reply code.
    ///
    /// A reply of success or no-object-found yields an empty response; any
    /// other code is an error.
    pub fn new(headers: HeaderMap, mut body: Body) -> Result<Self, ProtocolError> {
        let content_type = header_str(&headers, CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_string();
        let lower = content_type.to_ascii_lowercase();
        let multipart = lower.contains("multipart");
        let xml = lower.contains("text/xml");

        if xml && (multipart || !headers.contains_key("content-id")) {
            let mut document = Vec::new();
            (&mut body).take(MAX_REPLY_BODY).read_to_end(&mut document)?;
            let reply = parse_status(&document)?;
            if !reply.code.is_benign_for_object() {
                return Err(reply.into_error());
            }
            tracing::debug!("GetObject reply without objects: {}", reply.code);
            return Ok(Self {
                headers,
                body: None,
                framing: Framing::Empty,
                reply: Some(reply),
                buffer_size: DEFAULT_BUFFER_SIZE,
                consumed: false,
            });
        }

        let framing = if multipart {
            let boundary = boundary_param(&content_type)
                .ok_or_else(|| ProtocolError::MissingBoundary(content_type.clone()))?;
            Framing::Multipart { boundary }
        } else {
            Framing::Single
        };

        Ok(Self {
            headers,
            body: Some(body),
            framing,
            reply: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            consumed: false,
        })
    }

    /// Sets the multipart read buffer size (clamped).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        header_str(&self.headers, CONTENT_TYPE.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.framing, Framing::Multipart { .. })
    }

    pub fn boundary(&self) -> Option<&str> {
        match &self.framing {
            Framing::Multipart { boundary } => Some(boundary),
            _ => None,
        }
    }

    /// The reply code of a reply-only XML response.
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    pub fn is_successful(&self) -> bool {
        self.reply.as_ref().map_or(true, Reply::is_success)
    }

    /// Returns the objects. May be called once.
    pub fn objects(&mut self) -> Result<ObjectStream, ProtocolError> {
        if self.consumed {
            return Err(ProtocolError::ResponseConsumed);
        }
        self.consumed = true;

        let inner = match (&self.framing, self.body.take()) {
            (Framing::Empty, _) | (_, None) => StreamInner::Empty,
            (Framing::Single, Some(body)) => StreamInner::Single {
                headers: self.headers.clone(),
                body,
                yielded: false,
            },
            (Framing::Multipart { boundary }, Some(body)) => {
                StreamInner::Multipart(PartReader::new(body, boundary, self.buffer_size))
            }
        };
        Ok(ObjectStream { inner })
    }

    /// Like [`objects`](Self::objects) with an explicit read buffer size.
    pub fn objects_with_buffer(&mut self, size: usize) -> Result<ObjectStream, ProtocolError> {
        self.buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.objects()
    }
}

impl std::fmt::Debug for ObjectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectResponse")
            .field("headers", &self.headers)
            .field("framing", &self.framing)
            .field("reply", &self.reply)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

/// Extracts the `boundary` parameter of a content type, without quotes.
pub fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Objects of a GetObject response, read one at a time.
pub struct ObjectStream {
    inner: StreamInner,
}

enum StreamInner {
    Empty,
    Single {
        headers: HeaderMap,
        body: Body,
        yielded: bool,
    },
    Multipart(PartReader),
}

impl ObjectStream {
    /// Returns the next object, skipping any unread bytes of the previous one.
    pub fn next_object(&mut self) -> Result<Option<SingleObject<'_>>, ProtocolError> {
        match &mut self.inner {
            StreamInner::Empty => Ok(None),
            StreamInner::Single {
                headers,
                body,
                yielded,
            } => {
                if *yielded {
                    return Ok(None);
                }
                *yielded = true;
                Ok(Some(SingleObject {
                    headers: headers.clone(),
                    reply: None,
                    body: Some(ObjectBody {
                        source: BodySource::Whole(body),
                    }),
                }))
            }
            StreamInner::Multipart(parts) => {
                let Some(headers) = parts.next_part()? else {
                    return Ok(None);
                };
                if header_str(&headers, "RETS-Error") == Some("1") {
                    let mut document = Vec::new();
                    (&mut *parts).take(MAX_REPLY_BODY).read_to_end(&mut document)?;
                    let reply = parse_status(&document)?;
                    return Ok(Some(SingleObject {
                        headers,
                        reply: Some(reply),
                        body: None,
                    }));
                }
                Ok(Some(SingleObject {
                    headers,
                    reply: None,
                    body: Some(ObjectBody {
                        source: BodySource::Part(parts),
                    }),
                }))
            }
        }
    }

    /// Reads every remaining object fully into memory.
    pub fn collect_all(mut self) -> Result<Vec<OwnedObject>, ProtocolError> {
        let mut objects = Vec::new();
        while let Some(mut object) = self.next_object()? {
            let body = if object.has_body() {
                Some(object.read_to_vec()?)
            } else {
                None
            };
            objects.push(OwnedObject {
                headers: object.headers,
                reply: object.reply,
                body,
            });
        }
        Ok(objects)
    }
}

/// One object of a GetObject response.
pub struct SingleObject<'a> {
    headers: HeaderMap,
    reply: Option<Reply>,
    body: Option<ObjectBody<'a>>,
}

impl<'a> SingleObject<'a> {
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn content_id(&self) -> Option<&str> {
        self.header("Content-ID")
    }

    pub fn object_id(&self) -> Option<&str> {
        self.header("Object-ID")
    }

    pub fn description(&self) -> Option<&str> {
        self.header("Content-Description")
    }

    pub fn sub_description(&self) -> Option<&str> {
        self.header("Content-Sub-Description")
    }

    /// The object URL when objects were requested by location.
    pub fn location(&self) -> Option<&str> {
        self.header("Location")
    }

    pub fn is_preferred(&self) -> bool {
        self.header("Preferred") == Some("1")
    }

    /// The per-object reply sent in place of a body.
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn body(&mut self) -> Option<&mut ObjectBody<'a>> {
        self.body.as_mut()
    }

    /// Reads the rest of the body. Empty when there is none.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut data = Vec::new();
        if let Some(body) = self.body.as_mut() {
            body.read_to_end(&mut data)?;
        }
        Ok(data)
    }
}

impl std::fmt::Debug for SingleObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleObject")
            .field("headers", &self.headers)
            .field("reply", &self.reply)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// A fully read object.
#[derive(Debug, Clone)]
pub struct OwnedObject {
    pub headers: HeaderMap,
    pub reply: Option<Reply>,
    pub body: Option<Vec<u8>>,
}

/// Reader over one object's bytes.
pub struct ObjectBody<'a> {
    source: BodySource<'a>,
}

enum BodySource<'a> {
    Whole(&'a mut Body),
    Part(&'a mut PartReader),
}

impl Read for ObjectBody<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            BodySource::Whole(body) => body.read(out),
            BodySource::Part(parts) => parts.read(out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartState {
    Preamble,
    /// A delimiter was just consumed.
    Boundary,
    Body,
    Done,
}

/// Incremental multipart splitter over a byte stream.
struct PartReader {
    inner: Body,
    buf: BytesMut,
    scratch: Vec<u8>,
    /// `CRLF--boundary`
    delimiter: Vec<u8>,
    state: PartState,
}

impl PartReader {
    fn new(inner: Body, boundary: &str, buffer_size: usize) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());

        let mut buf = BytesMut::with_capacity(buffer_size + delimiter.len());
        // The first delimiter is not preceded by a line break.
        buf.extend_from_slice(b"\r\n");

        Self {
            inner,
            buf,
            scratch: vec![0; buffer_size],
            delimiter,
            state: PartState::Preamble,
        }
    }

    fn fill(&mut self) -> io::Result<usize> {
        loop {
            match self.inner.read(&mut self.scratch) {
                Ok(n) => {
                    self.buf.extend_from_slice(&self.scratch[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn find_delimiter(&self) -> Option<usize> {
        self.buf
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice())
    }

    /// Advances to the next part and returns its headers.
    fn next_part(&mut self) -> Result<Option<HeaderMap>, ProtocolError> {
        if self.state == PartState::Preamble {
            self.skip_preamble()?;
        }
        if self.state == PartState::Body {
            io::copy(self, &mut io::sink())?;
        }
        if self.state == PartState::Done || !self.after_boundary()? {
            return Ok(None);
        }
        let headers = self.read_headers()?;
        self.state = PartState::Body;
        Ok(Some(headers))
    }

    fn skip_preamble(&mut self) -> Result<(), ProtocolError> {
        let keep = self.delimiter.len() - 1;
        loop {
            if let Some(pos) = self.find_delimiter() {
                self.buf.advance(pos + self.delimiter.len());
                self.state = PartState::Boundary;
                return Ok(());
            }
            if self.buf.len() > keep {
                let discard = self.buf.len() - keep;
                self.buf.advance(discard);
            }
            if self.fill()? == 0 {
                return Err(ProtocolError::MalformedMultipart(
                    "no opening boundary".to_string(),
                ));
            }
        }
    }

    /// Handles the rest of a delimiter line. Returns false on the close
    /// delimiter or end of input.
    fn after_boundary(&mut self) -> Result<bool, ProtocolError> {
        while self.buf.len() < 2 {
            if self.fill()? == 0 {
                tracing::warn!("Multipart body ended without a close delimiter");
                self.state = PartState::Done;
                return Ok(false);
            }
        }
        if &self.buf[..2] == b"--" {
            self.state = PartState::Done;
            return Ok(false);
        }
        match self.next_line()? {
            Some(_padding) => Ok(true),
            None => {
                tracing::warn!("Multipart body ended inside a delimiter line");
                self.state = PartState::Done;
                Ok(false)
            }
        }
    }

    fn read_headers(&mut self) -> Result<HeaderMap, ProtocolError> {
        let mut headers = HeaderMap::new();
        loop {
            let line = self.next_line()?.ok_or_else(|| {
                ProtocolError::MalformedMultipart("end of input in part headers".to_string())
            })?;
            if line.is_empty() {
                return Ok(headers);
            }
            let invalid = || ProtocolError::InvalidPartHeader(String::from_utf8_lossy(&line).into());
            let colon = line.iter().position(|b| *b == b':').ok_or_else(invalid)?;
            let name = HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|_| invalid())?;
            let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| invalid())?;
            headers.append(name, value);
        }
    }

    /// Takes one line without its line ending. `None` at end of input.
    fn next_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line = self.buf.split_to(pos + 1).to_vec();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            if self.buf.len() > MAX_HEADER_LINE {
                return Err(ProtocolError::MalformedMultipart(
                    "part header line too long".to_string(),
                ));
            }
            if self.fill()? == 0 {
                return Ok(None);
            }
        }
    }

    fn take_into(&mut self, out: &mut [u8], available: usize) -> usize {
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }
}

impl Read for PartReader {
    /// Reads the current part's bytes; returns 0 at its end.
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.state != PartState::Body || out.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(pos) = self.find_delimiter() {
                if pos == 0 {
                    self.buf.advance(self.delimiter.len());
                    self.state = PartState::Boundary;
                    return Ok(0);
                }
                return Ok(self.take_into(out, pos));
            }
            // Hold back a possible partial delimiter.
            let safe = self.buf.len().saturating_sub(self.delimiter.len() - 1);
            if safe > 0 {
                return Ok(self.take_into(out, safe));
            }
            if self.fill()? == 0 {
                if self.buf.is_empty() {
                    tracing::warn!("Multipart body ended without a close delimiter");
                    self.state = PartState::Done;
                    return Ok(0);
                }
                let remaining = self.buf.len();
                return Ok(self.take_into(out, remaining));
            }
        }
    }
}
