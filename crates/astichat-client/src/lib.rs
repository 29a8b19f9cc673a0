//! astichat-client — terminal client for an Astichat registry.
//!
//! # Module layout
//! - `http`    — server clock and bearer tokens over HTTP
//! - `session` — a live UDP session: connect, chat, disconnect

pub mod http;
pub mod session;

pub use http::HttpClient;
pub use session::{render, Session};
