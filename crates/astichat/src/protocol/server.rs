use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::parse_body;
use crate::body::Body;
use crate::chatterer::Chatterer;
use crate::clock::TimeSource;
use crate::error::Result;
use crate::peer::{Peer, PeerPool};
use crate::storage::Storage;
use crate::transport::{
    ListenerFn, Router, Transport, EVENT_PEER_CONNECT, EVENT_PEER_CONNECTED,
    EVENT_PEER_DISCONNECT, EVENT_PEER_DISCONNECTED, EVENT_PEER_JOINED,
};
use crate::{validate_message, MESSAGE_CONNECT, MESSAGE_DISCONNECT};

/// Registry side of the lifecycle.
///
/// A connect or disconnect is accepted when its body, stamped within the
/// freshness window, opens with the claimed account's server private key to
/// the expected marker. Nothing binds the request to its source address.
pub struct ServerProtocol {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    time: Arc<dyn TimeSource>,
    pool: PeerPool,
}

impl ServerProtocol {
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            storage,
            transport,
            time,
            pool: PeerPool::new(),
        }
    }

    pub fn pool(&self) -> &PeerPool {
        &self.pool
    }

    /// Wire `peer.connect` and `peer.disconnect` into `router`.
    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let protocol = Arc::clone(self);
        router.set_listener(
            EVENT_PEER_CONNECT,
            ListenerFn(move |payload: Value, addr: SocketAddr| {
                let protocol = Arc::clone(&protocol);
                async move { protocol.handle_connect(payload, addr).await }
            }),
        );
        let protocol = Arc::clone(self);
        router.set_listener(
            EVENT_PEER_DISCONNECT,
            ListenerFn(move |payload: Value, addr: SocketAddr| {
                let protocol = Arc::clone(&protocol);
                async move { protocol.handle_disconnect(payload, addr).await }
            }),
        );
    }

    pub async fn handle_connect(&self, payload: Value, addr: SocketAddr) -> Result<()> {
        let (chatterer, now) = self.authenticate(payload, MESSAGE_CONNECT).await?;

        // An existing entry keeps its original address.
        let peer = match self.pool.get(&chatterer.username) {
            Some(peer) => {
                debug!(%peer, %addr, "peer already registered");
                peer
            }
            None => {
                let peer = Peer::new(addr, chatterer.username, chatterer.client_public_key);
                self.pool.set(peer.clone());
                info!(%peer, "welcome");
                peer
            }
        };

        let others: Vec<Peer> = self
            .pool
            .list()
            .into_iter()
            .filter(|other| other.username != peer.username)
            .collect();
        self.announce(EVENT_PEER_JOINED, &peer, &others, now).await;

        let roster = serde_json::to_vec(&others)?;
        let body = Body::new(&roster, now, "", &peer.public_key)?;
        debug!(%peer, peers = others.len(), "sending {EVENT_PEER_CONNECTED}");
        self.transport
            .write(EVENT_PEER_CONNECTED, serde_json::to_value(&body)?, peer.addr)
            .await
    }

    pub async fn handle_disconnect(&self, payload: Value, addr: SocketAddr) -> Result<()> {
        let (chatterer, now) = self.authenticate(payload, MESSAGE_DISCONNECT).await?;

        let Some(peer) = self.pool.delete(&chatterer.username) else {
            debug!(username = %chatterer.username, %addr, "disconnect from unregistered peer");
            return Ok(());
        };
        info!(%peer, "has left us");

        let remaining = self.pool.list();
        self.announce(EVENT_PEER_DISCONNECTED, &peer, &remaining, now).await;
        Ok(())
    }

    /// Open the body with the claimed account's server key and check the marker.
    async fn authenticate(&self, payload: Value, marker: &[u8]) -> Result<(Chatterer, DateTime<Utc>)> {
        let body = parse_body(payload)?;
        let username = body.request()?.username.clone();
        let chatterer = self.storage.chatterer_fetch_by_username(&username).await?;
        let now = self.time.now()?;
        let message = body.process(now, &chatterer.server_private_key)?;
        validate_message(&message, marker)?;
        Ok((chatterer, now))
    }

    /// Send `subject`'s record to every recipient, sealed for each of them.
    /// A failed recipient is logged and skipped.
    async fn announce(&self, event_name: &str, subject: &Peer, recipients: &[Peer], now: DateTime<Utc>) {
        let record = match serde_json::to_vec(subject) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, peer = %subject, "could not serialise peer record");
                return;
            }
        };
        for recipient in recipients {
            debug!(to = %recipient, about = %subject, "sending {event_name}");
            if let Err(err) = self.send_sealed(event_name, &record, recipient, now).await {
                warn!(error = %err, to = %recipient, "{event_name} not delivered");
            }
        }
    }

    async fn send_sealed(&self, event_name: &str, plaintext: &[u8], recipient: &Peer, now: DateTime<Utc>) -> Result<()> {
        let body = Body::new(plaintext, now, "", &recipient.public_key)?;
        self.transport
            .write(event_name, serde_json::to_value(&body)?, recipient.addr)
            .await
    }
}
