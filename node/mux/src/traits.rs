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

use crate::{Channel, Connection};

use anyhow::Result;
use async_trait::async_trait;
use bitchat_node_signals::{ChannelName, NetworkId};
use bytes::Bytes;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// Establishes and tracks the connections of this node. Injected into every
/// connection so proxy tunnels can dial out and nested connections can be
/// handed back in.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Returns `true` if a live connection to the given peer exists.
    fn is_connected(&self, peer: SocketAddr) -> bool;

    /// Returns a connection to the given peer, establishing one if necessary.
    async fn connection_to(&self, peer: SocketAddr) -> Result<Connection>;

    /// Accepts a channel serving as the base stream of a new inbound
    /// connection to `peer`.
    async fn accept_virtual(&self, stream: Channel, peer: SocketAddr) -> Result<()>;
}

/// Consumes the out-of-band DHT datagrams a connection carries.
pub trait DhtClient: Send + Sync {
    /// Handles an inbound DHT packet, tagged with the sender's IP address.
    fn handle_packet(&self, payload: Bytes, from: IpAddr);
}

/// A relay hosted on behalf of a remote peer.
pub trait RelayHandle: Send + Sync {
    /// Stops the relay.
    fn stop(&self);
}

/// The registry of relays this node hosts and the relay peers it knows about.
pub trait RelayService: Send + Sync {
    /// Returns the known relay peer endpoints for a channel, excluding the
    /// peer that asked.
    fn lookup_peers(&self, channel: &ChannelName, exclude: SocketAddr) -> Vec<SocketAddr>;

    /// Starts hosting a relay for the given network.
    fn start(&self, network: NetworkId, trackers: Vec<String>) -> Result<Box<dyn RelayHandle>>;
}

/// Callbacks a connection raises. Every callback is dispatched on a worker
/// task, never under a mux lock, so a slow or faulty handler cannot take the
/// reader down.
pub trait ConnectionEvents: Send + Sync {
    /// The peer opened a network channel.
    fn on_channel_open(&self, channel: Channel);

    /// The peer sent an invitation to a network.
    fn on_invitation(&self, network: NetworkId, from: SocketAddr, message: String);

    /// The peer advertised relay endpoints for a channel this node opened.
    fn on_relay_peers(&self, peers: Vec<SocketAddr>);

    /// The connection was disposed.
    fn on_disposed(&self, remote: SocketAddr);
}

/// The collaborators a connection is constructed with.
#[derive(Clone)]
pub struct Services {
    pub manager: Arc<dyn ConnectionManager>,
    pub dht: Arc<dyn DhtClient>,
    pub relays: Arc<dyn RelayService>,
    pub events: Arc<dyn ConnectionEvents>,
}
