//! # rets-client
//!
//! Client library for RETS servers.
//!
//! This crate provides:
//! - A synchronous [`Session`] covering login, search, GetObject,
//!   GetMetadata, ChangePassword and logout
//! - The [`Transport`] that stamps RETS headers and negotiates versions
//! - A `reqwest` HTTP connection with cookie handling and HTTP Digest
//!   authentication
//! - Network activity monitoring hooks

pub mod connection;
pub mod digest;
pub mod error;
pub mod http;
pub mod monitor;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{ClientConfig, HttpConnection};
pub use error::ClientError;
pub use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use monitor::{EventToken, NetworkMonitor, NullMonitor, TracingMonitor};
pub use session::{ObjectLocation, Session};
pub use transport::Transport;
