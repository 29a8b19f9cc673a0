use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use astichat::protocol::ClientIdentity;
use astichat::transport::UdpTransport;
use astichat::{ClientEvent, ClientProtocol, Clock, Router, ServerTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A connected chat session: synced clock, bound socket, running listener.
pub struct Session {
    protocol: Arc<ClientProtocol>,
    clock: Arc<Clock>,
    udp: UdpTransport,
    quit: watch::Sender<bool>,
    datagrams: JoinHandle<astichat::Result<()>>,
}

impl Session {
    /// Sync the clock with `server_time`, bind `bind_addr` and announce
    /// ourselves to the server at `server_addr`.
    pub async fn start(
        identity: ClientIdentity,
        server_addr: SocketAddr,
        bind_addr: SocketAddr,
        server_time: &dyn ServerTime,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        let clock = Arc::new(Clock::new());
        let now = clock
            .sync_from(server_time)
            .await
            .context("fetching server time")?;
        debug!(%now, "clock synced with server");

        let udp = UdpTransport::bind(bind_addr)
            .await
            .with_context(|| format!("binding udp {bind_addr}"))?;
        let (protocol, events) =
            ClientProtocol::new(identity, server_addr, Arc::new(udp.clone()), clock.clone());
        let protocol = Arc::new(protocol);
        let mut router = Router::new();
        protocol.register(&mut router);

        let (quit, quit_rx) = watch::channel(false);
        let serving = udp.clone();
        let datagrams = tokio::spawn(async move { serving.serve(Arc::new(router), quit_rx).await });

        let session = Self {
            protocol,
            clock,
            udp,
            quit,
            datagrams,
        };
        session.protocol.connect().await.context("sending connect")?;
        info!(username = %session.protocol.username(), server = %server_addr, "connect sent");
        Ok((session, events))
    }

    pub fn protocol(&self) -> &Arc<ClientProtocol> {
        &self.protocol
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Send a typed line to every known peer.
    pub async fn say(&self, line: &str) -> Result<usize> {
        Ok(self.protocol.type_line(line).await?)
    }

    /// Announce our departure and stop listening.
    pub async fn close(self) -> Result<()> {
        let disconnected = self.protocol.disconnect().await;
        self.quit.send(true).ok();
        self.datagrams.await.context("udp task")??;
        self.clock.stop();
        disconnected.context("sending disconnect")?;
        Ok(())
    }
}

/// One line of terminal output per event.
pub fn render(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Connected(peers) if peers.is_empty() => "* connected, nobody else is here yet".to_string(),
        ClientEvent::Connected(peers) => {
            let names: Vec<&str> = peers.iter().map(|p| p.username.as_str()).collect();
            format!("* connected, online: {}", names.join(", "))
        }
        ClientEvent::Joined(peer) => format!("* {} joined", peer.username),
        ClientEvent::Left(peer) => format!("* {} left", peer.username),
        ClientEvent::Typed { from, message } => format!("{from}: {message}"),
        ClientEvent::RemoteError(message) => format!("! {message}"),
    }
}
