//! astichat — server-mediated peer discovery and sealed messaging
//!
//! A registry server tracks which chatterers are reachable and introduces them
//! to each other; every payload travels inside a hybrid-encrypted envelope
//! bound to a freshness timestamp.
//!
//! # Module layout
//! - `key`        — RSA key pairs and their (optionally passphrase-sealed) textual form
//! - `envelope`   — RSA-OAEP + AES-256-CFB one-shot hybrid encryption
//! - `body`       — timestamped request/error bodies exchanged on every hop
//! - `clock`      — server-authoritative clock advanced by a local ticker
//! - `token`      — short-lived bearer tokens and their server-side issuer
//! - `chatterer`  — account record
//! - `credentials` — client credentials bundle written at provisioning time
//! - `peer`       — reachable chatterer + the concurrent `PeerPool`
//! - `storage`    — account storage contract + in-memory implementation
//! - `transport`  — datagram contract, event names and listener routing
//! - `protocol`   — server and client lifecycle state machines
//! - `error`      — unified error type
//!
//! # Security notes
//! The connect/disconnect handshake proves key possession only: there is no
//! signature, no MAC on envelopes and no nonce. Replays stay valid inside the
//! 5 second freshness window and a registered username is never re-bound to a
//! new address.

pub mod body;
pub mod chatterer;
pub mod clock;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod key;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod token;
pub mod transport;

pub use body::Body;
pub use chatterer::Chatterer;
pub use clock::{Clock, ServerTime, SystemClock, TimeSource};
pub use credentials::Credentials;
pub use envelope::EncryptedEnvelope;
pub use error::{Error, Result};
pub use key::{KeyPair, PrivateKey, PublicKey};
pub use peer::{Peer, PeerPool};
pub use protocol::{ClientEvent, ClientProtocol, ServerProtocol};
pub use storage::{MemoryStorage, Storage};
pub use token::{Token, TokenService};
pub use transport::{Datagram, Listener, Router, Transport};

/// Default RSA modulus size for freshly provisioned keys.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Marker sealed by a client asking to join the registry.
pub const MESSAGE_CONNECT: &[u8] = b"connect";
/// Marker sealed by a client leaving the registry.
pub const MESSAGE_DISCONNECT: &[u8] = b"disconnect";
/// Marker sealed by a client requesting a bearer token.
pub const MESSAGE_TOKEN: &[u8] = b"token";

/// Check that a decrypted payload equals the expected marker.
///
/// Successful decryption to the exact marker is the only proof that the
/// sender holds the key pairing issued for the claimed username.
pub fn validate_message(message: &[u8], expected: &[u8]) -> Result<()> {
    if message != expected {
        return Err(Error::MarkerMismatch {
            expected: String::from_utf8_lossy(expected).into_owned(),
            got: String::from_utf8_lossy(message).into_owned(),
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_must_match_exactly() {
        assert!(validate_message(b"connect", MESSAGE_CONNECT).is_ok());
        let err = validate_message(b"connect ", MESSAGE_CONNECT).unwrap_err();
        assert!(matches!(err, Error::MarkerMismatch { .. }));
        assert!(validate_message(b"disconnect", MESSAGE_CONNECT).is_err());
    }
}
