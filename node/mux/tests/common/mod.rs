// Copyright (C) 2024 The BitChat Developers
// This file is part of the bitchat library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bitchat_node_mux::{
    Channel, Connection, ConnectionEvents, ConnectionManager, DhtClient, MuxError, RelayHandle, RelayService,
    Services,
};
use bitchat_node_signals::{ChannelName, NetworkId, PeerId};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::{HashMap, HashSet},
    env,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::net::{TcpListener, TcpStream};

/// Enables logging in tests.
pub fn initialize_logger(level: u8) {
    match level {
        0 => env::set_var("RUST_LOG", "info"),
        1 => env::set_var("RUST_LOG", "debug"),
        2 | 3 => env::set_var("RUST_LOG", "trace"),
        _ => env::set_var("RUST_LOG", "info"),
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("tokio_util=off".parse().unwrap())
        .add_directive("mio=off".parse().unwrap());

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(level == 3).try_init();
}

/// Returns a peer id derived from the given seed.
pub fn sample_peer_id(seed: u64) -> PeerId {
    PeerId::new(StdRng::seed_from_u64(seed).gen())
}

/// Returns a network id derived from the given seed.
pub fn sample_network_id(seed: u64) -> NetworkId {
    NetworkId::new(StdRng::seed_from_u64(seed).gen())
}

/// A connection manager whose world is whatever the test configures.
#[derive(Default)]
pub struct TestManager {
    /// The peers the manager claims live connections to.
    pub reachable: Mutex<HashSet<SocketAddr>>,
    /// The connections handed out for proxy bridging.
    pub connections: Mutex<HashMap<SocketAddr, Connection>>,
    /// The channels accepted as inbound virtual connections.
    pub virtual_streams: Mutex<Vec<(Channel, SocketAddr)>>,
}

#[async_trait]
impl ConnectionManager for TestManager {
    fn is_connected(&self, peer: SocketAddr) -> bool {
        self.reachable.lock().contains(&peer)
    }

    async fn connection_to(&self, peer: SocketAddr) -> Result<Connection> {
        self.connections.lock().get(&peer).cloned().ok_or_else(|| anyhow!("no route to {peer}"))
    }

    async fn accept_virtual(&self, stream: Channel, peer: SocketAddr) -> Result<()> {
        self.virtual_streams.lock().push((stream, peer));
        Ok(())
    }
}

/// A DHT client that records every packet it is handed.
#[derive(Default)]
pub struct TestDht {
    pub packets: Mutex<Vec<(Bytes, IpAddr)>>,
}

impl DhtClient for TestDht {
    fn handle_packet(&self, payload: Bytes, from: IpAddr) {
        self.packets.lock().push((payload, from));
    }
}

/// A relay service that records starts and stops.
#[derive(Default)]
pub struct TestRelayService {
    /// The relay peers known per channel name.
    pub peers: Mutex<HashMap<ChannelName, Vec<SocketAddr>>>,
    /// The networks relays were started for, in order.
    pub started: Mutex<Vec<NetworkId>>,
    /// The networks whose relays were stopped, in order.
    pub stopped: Arc<Mutex<Vec<NetworkId>>>,
}

impl RelayService for TestRelayService {
    fn lookup_peers(&self, channel: &ChannelName, _exclude: SocketAddr) -> Vec<SocketAddr> {
        self.peers.lock().get(channel).cloned().unwrap_or_default()
    }

    fn start(&self, network: NetworkId, _trackers: Vec<String>) -> Result<Box<dyn RelayHandle>> {
        self.started.lock().push(network);
        Ok(Box::new(TestRelayHandle { network, stopped: self.stopped.clone() }))
    }
}

pub struct TestRelayHandle {
    network: NetworkId,
    stopped: Arc<Mutex<Vec<NetworkId>>>,
}

impl RelayHandle for TestRelayHandle {
    fn stop(&self) {
        self.stopped.lock().push(self.network);
    }
}

/// Records every callback a connection raises.
#[derive(Default)]
pub struct TestEvents {
    pub opened: Mutex<Vec<Channel>>,
    pub invitations: Mutex<Vec<(NetworkId, SocketAddr, String)>>,
    pub relay_peers: Mutex<Vec<Vec<SocketAddr>>>,
    pub disposed: Mutex<Vec<SocketAddr>>,
}

impl ConnectionEvents for TestEvents {
    fn on_channel_open(&self, channel: Channel) {
        self.opened.lock().push(channel);
    }

    fn on_invitation(&self, network: NetworkId, from: SocketAddr, message: String) {
        self.invitations.lock().push((network, from, message));
    }

    fn on_relay_peers(&self, peers: Vec<SocketAddr>) {
        self.relay_peers.lock().push(peers);
    }

    fn on_disposed(&self, remote: SocketAddr) {
        self.disposed.lock().push(remote);
    }
}

/// One peer's collaborator set, kept around so tests can inspect it after
/// wiring it into a connection.
pub struct TestNode {
    pub manager: Arc<TestManager>,
    pub dht: Arc<TestDht>,
    pub relays: Arc<TestRelayService>,
    pub events: Arc<TestEvents>,
}

impl TestNode {
    pub fn new() -> Self {
        Self {
            manager: Default::default(),
            dht: Default::default(),
            relays: Default::default(),
            events: Default::default(),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            manager: self.manager.clone(),
            dht: self.dht.clone(),
            relays: self.relays.clone(),
            events: self.events.clone(),
        }
    }

    /// Takes the oldest channel the application was handed, if any.
    pub fn take_opened_channel(&self) -> Option<Channel> {
        let mut opened = self.events.opened.lock();
        if opened.is_empty() { None } else { Some(opened.remove(0)) }
    }

    /// Takes the oldest accepted virtual-connection stream, if any.
    pub fn take_virtual_stream(&self) -> Option<(Channel, SocketAddr)> {
        let mut streams = self.manager.virtual_streams.lock();
        if streams.is_empty() { None } else { Some(streams.remove(0)) }
    }
}

/// Connects two nodes over loopback TCP without starting their readers;
/// outbound frames queue in the socket until `start` is called.
pub async fn unstarted_pair(a: &TestNode, b: &TestNode) -> (Connection, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = listener.local_addr().unwrap();

    let (outbound, accepted) = tokio::join!(TcpStream::connect(listen_addr), listener.accept());
    let outbound = outbound.unwrap();
    let (inbound, peer_addr) = accepted.unwrap();

    let a_conn = Connection::new(outbound, sample_peer_id(1), sample_peer_id(2), listen_addr, a.services());
    let b_conn = Connection::new(inbound, sample_peer_id(2), sample_peer_id(1), peer_addr, b.services());
    (a_conn, b_conn)
}

/// Connects two nodes over loopback TCP and starts both connections.
pub async fn connected_pair(a: &TestNode, b: &TestNode) -> (Connection, Connection) {
    let (a_conn, b_conn) = unstarted_pair(a, b).await;
    a_conn.start();
    b_conn.start();
    (a_conn, b_conn)
}

/// Reads exactly `len` bytes off the channel, returning them along with the
/// number of reads (= delivered payloads) it took.
pub async fn read_exactly(channel: &mut Channel, len: usize) -> (Vec<u8>, usize) {
    let mut collected = Vec::with_capacity(len);
    let mut reads = 0;
    let mut buffer = vec![0u8; len.max(1)];
    while collected.len() < len {
        let n = channel.read(&mut buffer).await.unwrap();
        assert!(n > 0, "channel closed after {} of {len} bytes", collected.len());
        collected.extend_from_slice(&buffer[..n]);
        reads += 1;
    }
    (collected, reads)
}

/// Reads off the channel until it closes, asserting the remainder matches.
pub async fn read_until_closed(channel: &mut Channel) -> Result<Vec<u8>, MuxError> {
    let mut collected = Vec::new();
    let mut buffer = vec![0u8; 65_536];
    loop {
        match channel.read(&mut buffer).await {
            Ok(0) => return Ok(collected),
            Ok(n) => collected.extend_from_slice(&buffer[..n]),
            Err(error) => return Err(error),
        }
    }
}
