use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("No PEM block found: {0}")]
    InvalidPem(String),

    #[error("Invalid passphrase: {0}")]
    InvalidPassphrase(String),

    #[error("Key parsing failed: {0}")]
    KeyParse(String),

    #[error("Unexpected key type: {0}")]
    KeyType(String),

    #[error("Encryption failed: {0}")]
    Crypto(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Request creation date {created_at} is invalid compared to now {now}")]
    Stale { created_at: String, now: String },

    /// The remote side answered with an application-level error body.
    #[error("{0}")]
    Remote(String),

    #[error("Body carries neither a request nor an error")]
    EmptyBody,

    #[error("Token mismatch")]
    TokenMismatch,

    #[error("Token expired: {0}")]
    TokenExpired(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Username {0} is already used")]
    UsernameTaken(String),

    #[error("Expected message {expected} but got {got}")]
    MarkerMismatch { expected: String, got: String },

    #[error("Clock has not been synchronised with the server yet")]
    NotSynced,

    #[error("No listener for event {0}")]
    UnknownEvent(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
