//! # rets-protocol
//!
//! Wire protocol implementation for RETS (Real Estate Transaction Standard).
//!
//! This crate provides:
//! - Reply codes and their classification
//! - RETS version identifiers and negotiation
//! - Capability URL sets advertised at login
//! - Request messages and their form parameters
//! - Key/value (login, logout) response bodies
//! - Streaming COMPACT search decoding
//! - Lazy multipart GetObject de-framing
//! - The `RETS-UA-Authorization` digest

pub mod capability;
pub mod compact;
pub mod error;
pub mod message;
pub mod metadata;
pub mod multipart;
pub mod reply;
pub mod response;
pub mod ua_auth;
pub mod version;

mod xml;

pub use capability::{CapabilityUrls, TransactionKind};
pub use compact::{
    split_fields, CompactParser, CompactRowPolicy, ReplyCodeHandler, SearchResult,
    SearchResultCollector, SearchResultProcessor,
};
pub use error::{BrokerCode, ProtocolError};
pub use message::{
    ChangePasswordParams, CountMode, GetMetadataParams, GetObjectParams, LoginParams, Request,
    SearchFormat, SearchParams,
};
pub use metadata::{MetadataBuilder, MetadataFormat, RawMetadata, RawMetadataBuilder};
pub use multipart::{ObjectBody, ObjectResponse, ObjectStream, OwnedObject, SingleObject};
pub use reply::{Reply, ReplyClass, ReplyCode};
pub use response::{parse_status, LoginResponse, LogoutOutcome, LogoutResponse};
pub use ua_auth::UaAuth;
pub use version::RetsVersion;

/// Name of the cookie carrying the RETS session identifier.
pub const SESSION_ID_COOKIE: &str = "RETS-Session-ID";

/// Request header carrying a client-chosen request identifier.
pub const REQUEST_ID_HEADER: &str = "RETS-Request-ID";

/// Request header carrying the user-agent authorization digest.
pub const UA_AUTH_HEADER: &str = "RETS-UA-Authorization";
