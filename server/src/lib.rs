//! ethstream-server: HTTP surface over the ethstream block pipeline.
//!
//! The binary (`ethstream`) loads [`ServerConfig`], initialises tracing,
//! and serves [`build_router`] until Ctrl-C. Everything here is exposed as a
//! library so the routes can be exercised in-process.

pub mod config;
pub mod connector;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ConfigError, ServerConfig};
pub use connector::EndpointConnector;
pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
pub use telemetry::{init_tracing, LogConfig};
