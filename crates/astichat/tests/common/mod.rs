#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use astichat::clock::TimeSource;
use astichat::protocol::client::ClientIdentity;
use astichat::protocol::{ClientEvent, ClientProtocol, ServerProtocol};
use astichat::storage::Storage;
use astichat::transport::{Datagram, Router, Transport};
use astichat::{Error, KeyPair, MemoryStorage, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

const TEST_KEY_BITS: usize = 2048;

fn generate() -> KeyPair {
    KeyPair::generate(TEST_KEY_BITS, None).expect("test key generation")
}

pub fn server_keys() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(generate)
}

pub fn alice_keys() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(generate)
}

pub fn bob_keys() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(generate)
}

pub fn eve_keys() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(generate)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Clock the test moves by hand.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(t: DateTime<Utc>) -> Self {
        Self(Mutex::new(t))
    }

    pub fn get(&self) -> DateTime<Utc> {
        *self.0.lock()
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock();
        *now = *now + Duration::seconds(secs);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Result<DateTime<Utc>> {
        Ok(*self.0.lock())
    }
}

/// In-process datagram network: a write is dispatched straight into the
/// destination's router. Handler failures are collected instead of returned,
/// as a real socket would never report them to the sender.
#[derive(Default)]
pub struct Network {
    nodes: Mutex<HashMap<SocketAddr, Arc<Router>>>,
    sent: Mutex<Vec<(SocketAddr, SocketAddr, String)>>,
    failures: Mutex<Vec<(String, Error)>>,
    unreachable: Mutex<HashSet<SocketAddr>>,
}

impl Network {
    pub fn attach(&self, addr: SocketAddr, router: Router) {
        self.nodes.lock().insert(addr, Arc::new(router));
    }

    pub fn transport(self: &Arc<Self>, addr: SocketAddr) -> Arc<NodeTransport> {
        Arc::new(NodeTransport {
            addr,
            network: Arc::clone(self),
        })
    }

    /// Make every later write to `addr` fail at the sender.
    pub fn cut(&self, addr: SocketAddr) {
        self.unreachable.lock().insert(addr);
    }

    /// `(from, to)` of every delivered datagram carrying `event_name`.
    pub fn sent(&self, event_name: &str) -> Vec<(SocketAddr, SocketAddr)> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, _, event)| event == event_name)
            .map(|(from, to, _)| (*from, *to))
            .collect()
    }

    pub fn take_failures(&self) -> Vec<(String, Error)> {
        std::mem::take(&mut *self.failures.lock())
    }
}

pub struct NodeTransport {
    addr: SocketAddr,
    network: Arc<Network>,
}

#[async_trait]
impl Transport for NodeTransport {
    async fn write(&self, event_name: &str, payload: Value, addr: SocketAddr) -> Result<()> {
        if self.network.unreachable.lock().contains(&addr) {
            return Err(Error::Transport(format!("{addr} is unreachable")));
        }
        self.network
            .sent
            .lock()
            .push((self.addr, addr, event_name.to_string()));
        let router = self.network.nodes.lock().get(&addr).cloned();
        if let Some(router) = router {
            if let Err(err) = router.dispatch(Datagram::new(event_name, payload), self.addr).await {
                self.network.failures.lock().push((event_name.to_string(), err));
            }
        }
        Ok(())
    }
}

pub struct Client {
    pub protocol: Arc<ClientProtocol>,
    pub events: mpsc::Receiver<ClientEvent>,
    pub addr: SocketAddr,
}

impl Client {
    pub fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }
}

/// A server plus the plumbing to attach clients to it.
pub struct World {
    pub network: Arc<Network>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<MemoryStorage>,
    pub server: Arc<ServerProtocol>,
    pub server_addr: SocketAddr,
}

impl World {
    pub fn new() -> Self {
        let network = Arc::new(Network::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let storage = Arc::new(MemoryStorage::new());
        let server_addr = addr(4000);

        let server = Arc::new(ServerProtocol::new(
            storage.clone(),
            network.transport(server_addr),
            clock.clone(),
        ));
        let mut router = Router::new();
        server.register(&mut router);
        network.attach(server_addr, router);

        Self {
            network,
            clock,
            storage,
            server,
            server_addr,
        }
    }

    /// Provision `username` with `keys` as its client key pair.
    pub async fn provision(&self, username: &str, keys: &KeyPair) {
        self.storage
            .chatterer_create(username, keys.public.clone(), server_keys().private.clone())
            .await
            .unwrap();
    }

    /// Start a client for an already provisioned account.
    pub fn client(&self, username: &str, keys: &KeyPair, port: u16) -> Client {
        let addr = addr(port);
        let identity = ClientIdentity {
            username: username.to_string(),
            private_key: keys.private.clone(),
            server_public_key: server_keys().public.clone(),
        };
        let (protocol, events) = ClientProtocol::new(
            identity,
            self.server_addr,
            self.network.transport(addr),
            self.clock.clone(),
        );
        let protocol = Arc::new(protocol);
        let mut router = Router::new();
        protocol.register(&mut router);
        self.network.attach(addr, router);
        Client {
            protocol,
            events,
            addr,
        }
    }
}
