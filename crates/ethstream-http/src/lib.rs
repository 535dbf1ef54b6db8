//! ethstream-http: HTTP JSON-RPC transport.
//!
//! Request/response only. Used for snapshot requests against `http://` and
//! `https://` endpoints; live streaming needs the WebSocket transport.

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient};
