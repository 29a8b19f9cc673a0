//! Datagram transport and event routing.
//!
//! Every datagram is one JSON object `{"eventName", "payload"}`. Writes are
//! fire-and-forget: there is no acknowledgement, retry or ordering guarantee.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const EVENT_PEER_CONNECT: &str = "peer.connect";
pub const EVENT_PEER_CONNECTED: &str = "peer.connected";
pub const EVENT_PEER_JOINED: &str = "peer.joined";
pub const EVENT_PEER_DISCONNECT: &str = "peer.disconnect";
pub const EVENT_PEER_DISCONNECTED: &str = "peer.disconnected";
pub const EVENT_PEER_TYPED: &str = "peer.typed";

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datagram {
    pub event_name: String,
    pub payload: Value,
}

impl Datagram {
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
        }
    }
}

/// Outbound half: send one event to one address.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn write(&self, event_name: &str, payload: Value, addr: SocketAddr) -> Result<()>;
}

/// Handler for one event name. `addr` is the datagram's source address.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn handle(&self, payload: Value, addr: SocketAddr) -> Result<()>;
}

/// Adapts an async closure into a [`Listener`].
pub struct ListenerFn<F>(pub F);

#[async_trait]
impl<F, Fut> Listener for ListenerFn<F>
where
    F: Fn(Value, SocketAddr) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, payload: Value, addr: SocketAddr) -> Result<()> {
        (self.0)(payload, addr).await
    }
}

/// Per-event-name listener registry.
#[derive(Default, Clone)]
pub struct Router {
    listeners: HashMap<String, Arc<dyn Listener>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_name`, replacing any previous one.
    pub fn set_listener(&mut self, event_name: &str, listener: impl Listener + 'static) {
        self.listeners.insert(event_name.to_string(), Arc::new(listener));
    }

    pub async fn dispatch(&self, datagram: Datagram, addr: SocketAddr) -> Result<()> {
        let listener = self
            .listeners
            .get(&datagram.event_name)
            .ok_or_else(|| Error::UnknownEvent(datagram.event_name.clone()))?;
        listener.handle(datagram.payload, addr).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("events", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// UDP socket speaking the datagram format.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `quit` flips to `true`, dispatching each datagram on its
    /// own task. Handler failures are logged and never stop the loop.
    pub async fn serve(&self, router: Arc<Router>, mut quit: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        info!(addr = %self.local_addr()?, "listening for datagrams");

        loop {
            if *quit.borrow() {
                break;
            }
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = match received {
                        Ok(received) => received,
                        Err(err) => {
                            // ICMP unreachable from an earlier send surfaces here on some platforms
                            warn!(error = %err, "datagram receive failed");
                            continue;
                        }
                    };
                    let datagram: Datagram = match serde_json::from_slice(&buf[..len]) {
                        Ok(datagram) => datagram,
                        Err(err) => {
                            warn!(error = %err, %addr, len, "dropping malformed datagram");
                            continue;
                        }
                    };
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        let event = datagram.event_name.clone();
                        if let Err(err) = router.dispatch(datagram, addr).await {
                            warn!(error = %err, %event, %addr, "datagram handling failed");
                        }
                    });
                }
                changed = quit.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("datagram loop stopped");
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn write(&self, event_name: &str, payload: Value, addr: SocketAddr) -> Result<()> {
        let bytes = serde_json::to_vec(&Datagram::new(event_name, payload))?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::Transport(format!(
                "{event_name} datagram is {} bytes, limit is {MAX_DATAGRAM_SIZE}",
                bytes.len()
            )));
        }
        self.socket.send_to(&bytes, addr).await?;
        debug!(event = event_name, %addr, len = bytes.len(), "datagram sent");
        Ok(())
    }
}
