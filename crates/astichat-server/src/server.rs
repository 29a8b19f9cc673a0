use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use astichat::storage::Storage;
use astichat::transport::UdpTransport;
use astichat::{Router, ServerProtocol, SystemClock, TimeSource};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::ServerConfig;
use crate::http::{build_router, HttpState};

/// A bound registry server: UDP lifecycle plus the HTTP surface.
pub struct Server {
    udp: UdpTransport,
    http: TcpListener,
    protocol: Arc<ServerProtocol>,
    router: Router,
    app: axum::Router,
}

impl Server {
    pub async fn bind(config: &ServerConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let time: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let udp = UdpTransport::bind(config.udp_addr)
            .await
            .with_context(|| format!("binding udp {}", config.udp_addr))?;
        let http = TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("binding http {}", config.http_addr))?;

        let protocol = Arc::new(ServerProtocol::new(
            Arc::clone(&storage),
            Arc::new(udp.clone()),
            Arc::clone(&time),
        ));
        let mut router = Router::new();
        protocol.register(&mut router);
        let app = build_router(HttpState::new(storage, time));

        Ok(Self {
            udp,
            http,
            protocol,
            router,
            app,
        })
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    pub fn protocol(&self) -> Arc<ServerProtocol> {
        Arc::clone(&self.protocol)
    }

    /// Serve until `quit` flips to `true`.
    pub async fn run(self, quit: watch::Receiver<bool>) -> Result<()> {
        info!(udp = %self.udp_addr()?, http = %self.http_addr()?, "astichat server started");

        let udp = self.udp.clone();
        let router = Arc::new(self.router);
        let udp_quit = quit.clone();
        let datagrams = tokio::spawn(async move { udp.serve(router, udp_quit).await });

        axum::serve(self.http, self.app)
            .with_graceful_shutdown(wait_for_quit(quit))
            .await
            .context("http server")?;

        datagrams.await.context("udp task")??;
        info!(peers = self.protocol.pool().len(), "astichat server stopped");
        Ok(())
    }
}

pub async fn wait_for_quit(mut quit: watch::Receiver<bool>) {
    while !*quit.borrow() {
        if quit.changed().await.is_err() {
            return;
        }
    }
}
