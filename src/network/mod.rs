//! Network Module Implementation
//!
//! This module provides the shared plumbing under the TCP transports:
//! line framing, per-connection read state, the shared write handle, and
//! the registry that tracks live connections by id.
//!
//! # Components
//!
//! - `LineFrame`: parses newline-delimited text lines out of a byte buffer
//! - `Connection`: read side of a stream socket, owns the parse buffer
//! - `RemoteConnection`: write side, shared via `Arc`, closable once
//! - `ConnectionRegistry`: id-keyed map of live connections
//!
//! Splitting each stream keeps writers (any caller holding the handle) and
//! the single read loop from contending on one lock.

pub use connection::Connection;
pub use frame::LineFrame;
pub use registry::ConnectionRegistry;
pub use remote::RemoteConnection;
pub(crate) use remote::next_connection_id;

mod connection;
mod frame;
mod registry;
mod remote;
