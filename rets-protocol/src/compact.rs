//! Streaming COMPACT search decoding.
//!
//! A compact search body looks like:
//!
//! ```text
//! <RETS ReplyCode="0" ReplyText="Success">
//!   <COUNT Records="2"/>
//!   <DELIMITER value="09"/>
//!   <COLUMNS>\tListingID\tListPrice\t</COLUMNS>
//!   <DATA>\t1001\t250000\t</DATA>
//!   <DATA>\t1002\t310000\t</DATA>
//!   <MAXROWS/>
//! </RETS>
//! ```
//!
//! [`CompactParser`] walks the document event by event and hands columns and
//! rows to a [`SearchResultCollector`]; nothing but the current element's
//! text is buffered.

use crate::error::ProtocolError;
use crate::reply::Reply;
use crate::xml;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

/// Splits a delimited compact payload into fields.
///
/// The payload must start with the delimiter. A delimiter directly following
/// another delimiter yields an empty field, so `"|A||C"` gives
/// `["A", "", "C"]`. A single trailing delimiter closes the last field and
/// adds nothing.
pub fn split_fields(payload: &str, delimiter: char) -> Result<Vec<String>, ProtocolError> {
    if !payload.starts_with(delimiter) {
        return Err(ProtocolError::InvalidCompact(format!(
            "payload does not start with the delimiter: '{}'",
            payload.escape_debug()
        )));
    }
    let mut fields = Vec::new();
    let mut tokens = tokenize(payload, delimiter);
    // The leading delimiter.
    tokens.next();

    let mut last: Option<&str> = None;
    for token in tokens {
        match token {
            Token::Delimiter => {
                if last.is_none() {
                    fields.push(String::new());
                }
                last = None;
            }
            Token::Text(text) => {
                fields.push(text.to_string());
                last = Some(text);
            }
        }
    }
    Ok(fields)
}

enum Token<'a> {
    Delimiter,
    Text(&'a str),
}

/// Yields delimiters and the runs of text between them.
fn tokenize(payload: &str, delimiter: char) -> impl Iterator<Item = Token<'_>> {
    let mut rest = payload;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        if rest.starts_with(delimiter) {
            rest = &rest[delimiter.len_utf8()..];
            return Some(Token::Delimiter);
        }
        let end = rest.find(delimiter).unwrap_or(rest.len());
        let (text, tail) = rest.split_at(end);
        rest = tail;
        Some(Token::Text(text))
    })
}

/// Receives decoded search results.
pub trait SearchResultCollector {
    fn set_count(&mut self, count: u64);
    fn set_columns(&mut self, columns: Vec<String>);
    fn add_row(&mut self, row: Vec<String>);
    /// The server truncated the result set.
    fn set_max_rows(&mut self);
    /// The document was read to the end.
    fn set_complete(&mut self);
}

/// Decides whether a decoded row reaches the collector.
pub trait CompactRowPolicy {
    fn accept(&mut self, index: usize, columns: &[String], row: &[String]) -> bool;
}

impl<F> CompactRowPolicy for F
where
    F: FnMut(usize, &[String], &[String]) -> bool,
{
    fn accept(&mut self, index: usize, columns: &[String], row: &[String]) -> bool {
        self(index, columns, row)
    }
}

/// Accepts every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl CompactRowPolicy for AcceptAll {
    fn accept(&mut self, _index: usize, _columns: &[String], _row: &[String]) -> bool {
        true
    }
}

/// Handles non-benign reply codes found in a search body.
pub trait ReplyCodeHandler {
    /// Called for a failing `RETS` root.
    fn invalid_rets_reply(&mut self, reply: &Reply) -> Result<(), ProtocolError>;
    /// Called for a failing `RETS-STATUS` element.
    fn invalid_status_reply(&mut self, reply: &Reply) -> Result<(), ProtocolError>;
}

/// Fails the parse with the reply code.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailOnReply;

impl ReplyCodeHandler for FailOnReply {
    fn invalid_rets_reply(&mut self, reply: &Reply) -> Result<(), ProtocolError> {
        Err(reply.clone().into_error())
    }

    fn invalid_status_reply(&mut self, reply: &Reply) -> Result<(), ProtocolError> {
        Err(reply.clone().into_error())
    }
}

/// Turns a raw search body into some result value.
pub trait SearchResultProcessor {
    type Output;

    fn process(&mut self, body: &mut dyn Read) -> Result<Self::Output, ProtocolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Columns,
    Data,
}

/// Streaming compact search parser.
#[derive(Debug, Clone)]
pub struct CompactParser<P = AcceptAll, H = FailOnReply> {
    policy: P,
    handler: H,
    strict: bool,
}

impl CompactParser {
    pub fn new() -> Self {
        Self {
            policy: AcceptAll,
            handler: FailOnReply,
            strict: false,
        }
    }
}

impl Default for CompactParser {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CompactRowPolicy, H: ReplyCodeHandler> CompactParser<P, H> {
    pub fn with_policy<Q: CompactRowPolicy>(self, policy: Q) -> CompactParser<Q, H> {
        CompactParser {
            policy,
            handler: self.handler,
            strict: self.strict,
        }
    }

    pub fn with_reply_handler<G: ReplyCodeHandler>(self, handler: G) -> CompactParser<P, G> {
        CompactParser {
            policy: self.policy,
            handler,
            strict: self.strict,
        }
    }

    /// In strict mode an unparsable `COUNT` is an error instead of 0.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Parses a compact search body into `collector`.
    pub fn parse<R, C>(&mut self, input: R, collector: &mut C) -> Result<(), ProtocolError>
    where
        R: BufRead,
        C: SearchResultCollector + ?Sized,
    {
        let mut reader = xml::reader(input);
        let mut buf = Vec::new();
        let mut seen_root = false;
        let mut delimiter: Option<char> = None;
        let mut columns: Option<Vec<String>> = None;
        let mut section: Option<(Section, String)> = None;
        let mut data_index = 0usize;

        loop {
            buf.clear();
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = xml::element_name(&e);
                    tracing::trace!("compact start <{}>", name);
                    if !seen_root {
                        if name != xml::RETS_ELEMENT {
                            return Err(ProtocolError::UnexpectedRoot(name));
                        }
                        seen_root = true;
                    }
                    match name.as_str() {
                        "RETS" => {
                            let reply = xml::reply(&e, "RETS")?;
                            self.check_reply(&reply, false)?;
                        }
                        "RETS-STATUS" => {
                            let reply = xml::reply(&e, "RETS-STATUS")?;
                            self.check_reply(&reply, true)?;
                        }
                        "COUNT" => {
                            let count = self.parse_count(&e)?;
                            collector.set_count(count);
                        }
                        "DELIMITER" => {
                            delimiter = Some(parse_delimiter(&e)?);
                        }
                        "COLUMNS" => section = Some((Section::Columns, String::new())),
                        "DATA" => section = Some((Section::Data, String::new())),
                        "MAXROWS" => collector.set_max_rows(),
                        other => tracing::warn!("Unknown compact element <{}>", other),
                    }
                }
                Event::Text(t) => {
                    if let Some((_, text)) = section.as_mut() {
                        text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some((_, text)) = section.as_mut() {
                        text.push_str(&xml::cdata_text(&c)?);
                    }
                }
                Event::End(e) => {
                    let name = xml::end_name(&e);
                    let Some((kind, text)) = section.take() else {
                        continue;
                    };
                    let expected = match kind {
                        Section::Columns => "COLUMNS",
                        Section::Data => "DATA",
                    };
                    if name != expected {
                        section = Some((kind, text));
                        continue;
                    }
                    let delimiter = delimiter.ok_or(ProtocolError::MissingDelimiter)?;
                    let fields = split_fields(&text, delimiter)?;
                    match kind {
                        Section::Columns => {
                            collector.set_columns(fields.clone());
                            columns = Some(fields);
                        }
                        Section::Data => {
                            let cols = columns.as_deref().ok_or_else(|| {
                                ProtocolError::InvalidCompact("DATA before COLUMNS".to_string())
                            })?;
                            if !self.policy.accept(data_index, cols, &fields) {
                                continue;
                            }
                            if fields.len() > cols.len() {
                                return Err(ProtocolError::TooManyFields {
                                    row: data_index,
                                    got: fields.len(),
                                    expected: cols.len(),
                                });
                            }
                            collector.add_row(fields);
                            data_index += 1;
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(ProtocolError::EmptyBody);
        }
        collector.set_complete();
        Ok(())
    }

    fn check_reply(&mut self, reply: &Reply, status: bool) -> Result<(), ProtocolError> {
        if reply.is_success() || reply.code.is_benign_for_search() {
            if !reply.is_success() {
                tracing::debug!("Search reply {}", reply.code);
            }
            return Ok(());
        }
        if status {
            self.handler.invalid_status_reply(reply)
        } else {
            self.handler.invalid_rets_reply(reply)
        }
    }

    fn parse_count(&self, e: &quick_xml::events::BytesStart<'_>) -> Result<u64, ProtocolError> {
        let raw = xml::attribute(e, "Records")?.ok_or(ProtocolError::MissingAttribute {
            element: "COUNT",
            attribute: "Records",
        })?;
        match raw.trim().parse::<u64>() {
            Ok(count) => Ok(count),
            Err(_) if !self.strict => {
                tracing::warn!("Unparsable COUNT Records '{}', using 0", raw);
                Ok(0)
            }
            Err(_) => Err(ProtocolError::InvalidAttribute {
                element: "COUNT",
                attribute: "Records",
                value: raw,
            }),
        }
    }
}

fn parse_delimiter(e: &quick_xml::events::BytesStart<'_>) -> Result<char, ProtocolError> {
    let raw = xml::attribute(e, "value")?.ok_or(ProtocolError::MissingAttribute {
        element: "DELIMITER",
        attribute: "value",
    })?;
    u32::from_str_radix(raw.trim(), 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or(ProtocolError::InvalidAttribute {
            element: "DELIMITER",
            attribute: "value",
            value: raw,
        })
}

impl<P: CompactRowPolicy, H: ReplyCodeHandler> SearchResultProcessor for CompactParser<P, H> {
    type Output = SearchResult;

    fn process(&mut self, body: &mut dyn Read) -> Result<SearchResult, ProtocolError> {
        let mut result = SearchResult::new();
        self.parse(BufReader::new(body), &mut result)?;
        Ok(result)
    }
}

/// A fully buffered search result.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
    count: Option<u64>,
    max_rows: bool,
    complete: bool,
}

impl SearchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reported record count, or the number of rows received when the
    /// server sent none.
    pub fn count(&self) -> u64 {
        self.count.unwrap_or(self.rows.len() as u64)
    }

    pub fn reported_count(&self) -> Option<u64> {
        self.count
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Field of `row` in the named column. `None` for short rows.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    pub fn is_max_rows(&self) -> bool {
        self.max_rows
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Iterates rows as column-name/value pairs.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &str)>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .zip(row.iter())
                .map(|(c, v)| (c.as_str(), v.as_str()))
                .collect()
        })
    }
}

impl SearchResultCollector for SearchResult {
    fn set_count(&mut self, count: u64) {
        self.count = Some(count);
    }

    fn set_columns(&mut self, columns: Vec<String>) {
        self.index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        self.columns = columns;
    }

    fn add_row(&mut self, row: Vec<String>) {
        if row.len() < self.columns.len() {
            tracing::warn!(
                "Row {} has {} fields, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
    }

    fn set_max_rows(&mut self) {
        self.max_rows = true;
    }

    fn set_complete(&mut self) {
        self.complete = true;
    }
}
