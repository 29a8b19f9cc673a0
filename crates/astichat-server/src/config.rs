use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "astichat";
pub const APP_NAME: &str = "astichat-server";

pub const DEFAULT_UDP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 4000);
pub const DEFAULT_HTTP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 4001);
pub const STORAGE_FILE: &str = "chatterers.json";

/// Server settings. Loaded from an optional JSON file; CLI flags override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub udp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    /// UDP address written into credentials bundles, when the bind address
    /// is not what clients should dial.
    pub public_udp_addr: Option<SocketAddr>,
    /// Base URL written into credentials bundles.
    pub public_http_url: Option<String>,
    pub storage_path: Option<PathBuf>,
    pub key_bits: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_addr: DEFAULT_UDP_ADDR,
            http_addr: DEFAULT_HTTP_ADDR,
            public_udp_addr: None,
            public_http_url: None,
            storage_path: None,
            key_bits: astichat::DEFAULT_KEY_BITS,
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(STORAGE_FILE)),
        }
    }

    pub fn advertised_udp_addr(&self) -> SocketAddr {
        self.public_udp_addr.unwrap_or_else(|| dialable(self.udp_addr))
    }

    pub fn advertised_http_url(&self) -> String {
        match &self.public_http_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", dialable(self.http_addr)),
        }
    }
}

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// A wildcard bind address is not something a client can dial.
fn dialable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}
