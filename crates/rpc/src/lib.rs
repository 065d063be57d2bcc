//! Client library for the device RPC protocol.
//!
//! Provides the request/response codec and vendor error taxonomy, the
//! challenge-response [`client::RpcClient`] with keep-alive renewal, the
//! media file listing streams, and the per-device
//! [`manager::ConnectionCache`].

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod manager;
pub mod media_file_find;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ClientConfig, RpcClient, SessionSnapshot, SessionState};
pub use error::{ErrorKind, LoginError, LoginFailure, RpcError, TransportError};
pub use manager::{CacheError, ConnectionCache, DeviceRegistry};
pub use media_file_find::{FileInfo, FindCondition, FindOrder, MediaFileStream};
pub use transport::{Connector, HttpConnector, HttpTransport, Transport};
