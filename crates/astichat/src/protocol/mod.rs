//! Peer lifecycle over the datagram transport.
//!
//! - `server` — registry side: authenticates connect/disconnect, announces
//!   arrivals and departures, hands out the roster
//! - `client` — chatterer side: announces itself, tracks the roster and
//!   exchanges typed lines directly with other peers

pub mod client;
pub mod server;

pub use client::{ClientEvent, ClientIdentity, ClientProtocol};
pub use server::ServerProtocol;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::body::Body;
use crate::error::Result;

pub(crate) fn parse_body(payload: Value) -> Result<Body> {
    Ok(serde_json::from_value(payload)?)
}

pub(crate) fn parse_plaintext<T: DeserializeOwned>(plaintext: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(plaintext)?)
}
