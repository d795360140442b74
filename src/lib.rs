#![doc = include_str!("../README.md")]

//! ## Architecture
//! The crate is built from a few small pieces:
//!
//! - [`Request`]/[`Response`]: the message model and its wire text form
//! - [`FrameReader`]: turns a byte stream into one head and body pair
//! - [`Router`]: method plus URI-pattern dispatch with token authentication
//! - `Executor`: bounded worker pool running one job per connection
//! - [`Server`] and [`Client`]: the connection dispatcher on either side
//!
//! Every connection carries exactly one exchange and is closed afterwards.
//!
//! ## Configuration
//! Server and client settings can be configured via:
//! - Environment variables (prefixed with `NICEHTTP_`)
//! - Configuration file (`config.toml`)
//! - Struct literals starting from `Default`

pub use crate::client::{request, Client};
pub use crate::config::{ClientConfig, ServerConfig};
pub use crate::error::{Error, ExecutorError, FrameError, Result};
pub use crate::frame::{Frame, FrameEnd, FrameKind, FrameReader};
pub use crate::http::{
    parse_content_length, parse_headers, Headers, LineEnding, ParseIssue, Parsed, Request,
    Response, SpecialHeaders, PROTO_HTTP1,
};
pub use crate::router::{Handler, Route, Router};
pub use crate::server::{Listener, Server, ShutdownHandle};

mod client;
mod config;
mod error;
mod executor;
mod frame;
mod http;
mod router;
mod server;
