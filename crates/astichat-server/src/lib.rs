//! astichat-server — the registry deployment around the `astichat` core.
//!
//! # Module layout
//! - `config`       — JSON configuration file, defaults and advertised addresses
//! - `file_storage` — JSON-file account storage
//! - `http`         — `GET /now`, `POST /token`, `POST /token/validate`
//! - `provision`    — account creation and credentials bundles
//! - `server`       — binds and runs the UDP lifecycle and the HTTP surface

pub mod config;
pub mod file_storage;
pub mod http;
pub mod provision;
pub mod server;

pub use config::ServerConfig;
pub use file_storage::JsonFileStorage;
pub use server::Server;
