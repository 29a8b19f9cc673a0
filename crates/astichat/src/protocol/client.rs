use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{parse_body, parse_plaintext};
use crate::body::Body;
use crate::clock::TimeSource;
use crate::error::{Error, Result};
use crate::key::{PrivateKey, PublicKey};
use crate::peer::{Peer, PeerPool};
use crate::transport::{
    ListenerFn, Router, Transport, EVENT_PEER_CONNECT, EVENT_PEER_CONNECTED,
    EVENT_PEER_DISCONNECT, EVENT_PEER_DISCONNECTED, EVENT_PEER_JOINED, EVENT_PEER_TYPED,
};
use crate::{MESSAGE_CONNECT, MESSAGE_DISCONNECT};

const EVENT_BUFFER: usize = 256;

/// What the surrounding application gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted us; carries the other peers online.
    Connected(Vec<Peer>),
    Joined(Peer),
    Left(Peer),
    Typed { from: String, message: String },
    /// An error body from the server or a peer.
    RemoteError(String),
}

/// Credentials a provisioned client runs with.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub username: String,
    pub private_key: PrivateKey,
    pub server_public_key: PublicKey,
}

/// Chatterer side of the lifecycle.
pub struct ClientProtocol {
    identity: ClientIdentity,
    server_addr: SocketAddr,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn TimeSource>,
    pool: PeerPool,
    events: mpsc::Sender<ClientEvent>,
}

impl ClientProtocol {
    pub fn new(
        identity: ClientIdentity,
        server_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn TimeSource>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let protocol = Self {
            identity,
            server_addr,
            transport,
            clock,
            pool: PeerPool::new(),
            events,
        };
        (protocol, events_rx)
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Peers currently known locally.
    pub fn pool(&self) -> &PeerPool {
        &self.pool
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        self.listen(router, EVENT_PEER_CONNECTED, |protocol, payload, addr| async move {
            protocol.handle_connected(payload, addr).await
        });
        self.listen(router, EVENT_PEER_JOINED, |protocol, payload, addr| async move {
            protocol.handle_joined(payload, addr).await
        });
        self.listen(router, EVENT_PEER_DISCONNECTED, |protocol, payload, addr| async move {
            protocol.handle_disconnected(payload, addr).await
        });
        self.listen(router, EVENT_PEER_TYPED, |protocol, payload, addr| async move {
            protocol.handle_typed(payload, addr).await
        });
    }

    fn listen<F, Fut>(self: &Arc<Self>, router: &mut Router, event_name: &str, handler: F)
    where
        F: Fn(Arc<Self>, Value, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let protocol = Arc::clone(self);
        router.set_listener(
            event_name,
            ListenerFn(move |payload: Value, addr: SocketAddr| handler(Arc::clone(&protocol), payload, addr)),
        );
    }

    /// Ask the server to register us.
    pub async fn connect(&self) -> Result<()> {
        self.send_to_server(EVENT_PEER_CONNECT, MESSAGE_CONNECT).await
    }

    /// Tell the server we are leaving.
    pub async fn disconnect(&self) -> Result<()> {
        self.send_to_server(EVENT_PEER_DISCONNECT, MESSAGE_DISCONNECT).await
    }

    /// Seal `line` for every known peer and send it to them directly.
    ///
    /// Returns how many peers it was sent to; a failing peer is skipped.
    pub async fn type_line(&self, line: &str) -> Result<usize> {
        let now = self.clock.now()?;
        let mut sent = 0;
        for peer in self.pool.list() {
            let result = async {
                let body = Body::new(line.as_bytes(), now, &self.identity.username, &peer.public_key)?;
                self.transport
                    .write(EVENT_PEER_TYPED, serde_json::to_value(&body)?, peer.addr)
                    .await
            }
            .await;
            match result {
                Ok(()) => sent += 1,
                Err(err) => warn!(error = %err, to = %peer, "line not delivered"),
            }
        }
        Ok(sent)
    }

    pub async fn handle_connected(&self, payload: Value, _addr: SocketAddr) -> Result<()> {
        let Some(plaintext) = self.open(payload).await? else {
            return Ok(());
        };
        let roster: Vec<Peer> = parse_plaintext(&plaintext)?;
        for peer in &roster {
            self.pool.set(peer.clone());
        }
        self.emit(ClientEvent::Connected(roster)).await;
        Ok(())
    }

    pub async fn handle_joined(&self, payload: Value, _addr: SocketAddr) -> Result<()> {
        let Some(plaintext) = self.open(payload).await? else {
            return Ok(());
        };
        let peer: Peer = parse_plaintext(&plaintext)?;
        self.pool.set(peer.clone());
        self.emit(ClientEvent::Joined(peer)).await;
        Ok(())
    }

    pub async fn handle_disconnected(&self, payload: Value, _addr: SocketAddr) -> Result<()> {
        let Some(plaintext) = self.open(payload).await? else {
            return Ok(());
        };
        let peer: Peer = parse_plaintext(&plaintext)?;
        self.pool.delete(&peer.username);
        self.emit(ClientEvent::Left(peer)).await;
        Ok(())
    }

    /// A line typed by another peer; only peers we know are heard.
    pub async fn handle_typed(&self, payload: Value, addr: SocketAddr) -> Result<()> {
        let body = parse_body(payload)?;
        let username = match body.request() {
            Ok(request) => request.username.clone(),
            Err(Error::Remote(message)) => {
                self.emit(ClientEvent::RemoteError(message)).await;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if self.pool.get(&username).is_none() {
            debug!(%username, %addr, "dropping line from unknown peer");
            return Ok(());
        }

        let plaintext = body.process(self.clock.now()?, &self.identity.private_key)?;
        self.emit(ClientEvent::Typed {
            from: username,
            message: String::from_utf8_lossy(&plaintext).into_owned(),
        })
        .await;
        Ok(())
    }

    async fn send_to_server(&self, event_name: &str, marker: &[u8]) -> Result<()> {
        let body = Body::new(
            marker,
            self.clock.now()?,
            &self.identity.username,
            &self.identity.server_public_key,
        )?;
        debug!(server = %self.server_addr, "sending {event_name}");
        self.transport
            .write(event_name, serde_json::to_value(&body)?, self.server_addr)
            .await
    }

    /// Process a body addressed to us. Remote errors become events.
    async fn open(&self, payload: Value) -> Result<Option<Vec<u8>>> {
        let body = parse_body(payload)?;
        match body.process(self.clock.now()?, &self.identity.private_key) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(Error::Remote(message)) => {
                self.emit(ClientEvent::RemoteError(message)).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            debug!("client event receiver dropped");
        }
    }
}
