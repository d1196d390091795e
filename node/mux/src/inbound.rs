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

use crate::{
    channel::ChannelShared,
    connection::{ConnectionInner, FramedReader},
    Channel, MuxError,
};

use bitchat_node_signals::{
    ChannelKind, ChannelName, Frame, NetworkId, RelayPeerList, Signal, StartRelayRequest, StopRelayRequest,
};
use bytes::Bytes;
use std::{net::SocketAddr, sync::Arc};
use tokio_stream::StreamExt;

/// Runs the reader: pulls frames off the base stream one at a time and
/// dispatches on the signal kind, which keeps delivery on any one channel in
/// arrival order. Exiting the loop, for any reason, disposes the connection.
pub(crate) async fn run(connection: Arc<ConnectionInner>, mut reader: FramedReader) {
    loop {
        match reader.next().await {
            Some(Ok(frame)) => {
                let signal = frame.signal;
                if let Err(error) = dispatch(&connection, frame).await {
                    // A protocol violation costs the connection; anything else
                    // already cost at most the affected channel.
                    if error.is_fatal() {
                        warn!("Disconnecting from {}: {error}", connection.remote_endpoint());
                        break;
                    }
                    debug!("Failed to service a '{signal:?}' frame from {}: {error}", connection.remote_endpoint());
                }
            }
            Some(Err(error)) => {
                warn!("The base stream to {} failed: {error}", connection.remote_endpoint());
                break;
            }
            None => {
                debug!("The base stream to {} was closed", connection.remote_endpoint());
                break;
            }
        }
    }
    connection.dispose().await;
}

async fn dispatch(connection: &Arc<ConnectionInner>, frame: Frame) -> Result<(), MuxError> {
    let Frame { signal, channel: name, payload } = frame;
    match signal {
        // A keepalive; the random channel name carries no meaning.
        Signal::Noop => Ok(()),
        Signal::ConnectNetworkChannel => on_connect_network(connection, name).await,
        Signal::DataNetworkChannel => on_data(connection, ChannelKind::Network, name, payload).await,
        Signal::DisconnectNetworkChannel => on_disconnect(connection, ChannelKind::Network, name).await,
        Signal::ConnectProxyTunnel => on_connect_proxy(connection, name).await,
        Signal::DataProxyTunnel => on_data(connection, ChannelKind::ProxyTunnel, name, payload).await,
        Signal::DisconnectProxyTunnel => on_disconnect(connection, ChannelKind::ProxyTunnel, name).await,
        Signal::ConnectVirtualConnection => on_connect_virtual(connection, name).await,
        Signal::DataVirtualConnection => on_data(connection, ChannelKind::VirtualConnection, name, payload).await,
        Signal::DisconnectVirtualConnection => on_disconnect(connection, ChannelKind::VirtualConnection, name).await,
        Signal::PeerStatusQuery => on_peer_status_query(connection, name).await,
        Signal::PeerStatusAvailable => {
            // A miss is a benign race with the probe timing out.
            connection.pending_status().deliver(&name);
            Ok(())
        }
        Signal::StartRelay => on_start_relay(connection, name, payload).await,
        Signal::StopRelay => on_stop_relay(connection, name, payload).await,
        Signal::RelayResponseSuccess => {
            connection.pending_relay().deliver(&name);
            Ok(())
        }
        Signal::RelayResponsePeerList => on_relay_peer_list(connection, payload),
        Signal::DhtPacket => {
            let dht = connection.services().dht.clone();
            let from = connection.remote_endpoint().ip();
            tokio::spawn(async move { dht.handle_packet(payload, from) });
            Ok(())
        }
        Signal::NetworkInvitation => on_invitation(connection, name, payload),
    }
}

/// Creates a channel for an inbound `Connect*` frame. On a name collision the
/// existing channel wins and the new one is silently dropped.
fn create_inbound_channel(
    connection: &Arc<ConnectionInner>,
    kind: ChannelKind,
    name: ChannelName,
) -> Result<Option<(Channel, Arc<ChannelShared>)>, MuxError> {
    match connection.create_channel(kind, name) {
        Ok(pair) => Ok(Some(pair)),
        Err(MuxError::DuplicateChannel) => {
            debug!("Ignoring a duplicate {kind:?} channel '{name}' from {}", connection.remote_endpoint());
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

async fn on_connect_network(connection: &Arc<ConnectionInner>, name: ChannelName) -> Result<(), MuxError> {
    let Some((channel, _)) = create_inbound_channel(connection, ChannelKind::Network, name)? else {
        return Ok(());
    };

    // Hand the channel to the application off the reader.
    let events = connection.services().events.clone();
    tokio::spawn(async move { events.on_channel_open(channel) });

    // If this node hosts relays serving the same channel, advertise the relay
    // peers it knows about to the newly connected peer.
    let peers = connection.services().relays.lookup_peers(&name, connection.remote_endpoint());
    if !peers.is_empty() {
        let mut payload = Vec::new();
        RelayPeerList::new(peers)
            .serialize(&mut payload)
            .map_err(|error| MuxError::Protocol(error.to_string()))?;
        connection.send_frame(Frame::new(Signal::RelayResponsePeerList, name, payload.into())).await?;
    }
    Ok(())
}

async fn on_data(
    connection: &Arc<ConnectionInner>,
    kind: ChannelKind,
    name: ChannelName,
    payload: Bytes,
) -> Result<(), MuxError> {
    // A miss is a benign race with disposal.
    let Some(channel) = connection.registry(kind).get(&name) else {
        return Ok(());
    };
    if let Err(error) = channel.deliver(payload, connection.channel_write_timeout()).await {
        // The channel is stalled or gone; cut it loose.
        warn!("Disposing a stalled {kind:?} channel '{name}' to {}: {error}", connection.remote_endpoint());
        connection.dispose_channel(&channel, true).await;
    }
    Ok(())
}

async fn on_disconnect(
    connection: &Arc<ConnectionInner>,
    kind: ChannelKind,
    name: ChannelName,
) -> Result<(), MuxError> {
    // The peer already forgot the channel; no Disconnect echo. A miss is benign.
    if let Some(channel) = connection.registry(kind).get(&name) {
        connection.dispose_channel(&channel, false).await;
    }
    Ok(())
}

async fn on_connect_proxy(connection: &Arc<ConnectionInner>, name: ChannelName) -> Result<(), MuxError> {
    let endpoint = name.to_endpoint().map_err(|error| MuxError::Protocol(error.to_string()))?;
    let Some((tunnel, tunnel_shared)) = create_inbound_channel(connection, ChannelKind::ProxyTunnel, name)? else {
        return Ok(());
    };

    // Bridging dials out through the connection manager; do it off the reader
    // so the other channels keep flowing meanwhile.
    let connection = connection.clone();
    tokio::spawn(async move {
        if let Err(error) = bridge_proxy_tunnel(&connection, tunnel, endpoint).await {
            debug!("Unable to bridge a proxy tunnel to {endpoint}: {error}");
            connection.dispose_channel(&tunnel_shared, true).await;
        }
    });
    Ok(())
}

/// Bridges an inbound proxy tunnel: obtains a connection to the target,
/// opens a virtual channel on it naming the tunneling peer, and splices the
/// two. The joint owns both channels from here on.
async fn bridge_proxy_tunnel(
    connection: &Arc<ConnectionInner>,
    tunnel: Channel,
    endpoint: SocketAddr,
) -> anyhow::Result<()> {
    let bridge = connection.services().manager.connection_to(endpoint).await?;
    let virtual_channel = bridge.request_virtual_channel(connection.remote_endpoint()).await?;
    connection.register_joint(tunnel, virtual_channel);
    Ok(())
}

async fn on_connect_virtual(connection: &Arc<ConnectionInner>, name: ChannelName) -> Result<(), MuxError> {
    let endpoint = name.to_endpoint().map_err(|error| MuxError::Protocol(error.to_string()))?;
    let Some((channel, _)) = create_inbound_channel(connection, ChannelKind::VirtualConnection, name)? else {
        return Ok(());
    };

    // Hand the channel off as the base stream of a new inbound connection.
    let manager = connection.services().manager.clone();
    let via = connection.remote_endpoint();
    tokio::spawn(async move {
        if let Err(error) = manager.accept_virtual(channel, endpoint).await {
            debug!("Unable to accept a virtual connection to {endpoint} via {via}: {error}");
        }
    });
    Ok(())
}

async fn on_peer_status_query(connection: &Arc<ConnectionInner>, name: ChannelName) -> Result<(), MuxError> {
    let endpoint = name.to_endpoint().map_err(|error| MuxError::Protocol(error.to_string()))?;
    // Stay silent unless the peer is known to be reachable; the prober times
    // out on its own.
    if connection.services().manager.is_connected(endpoint) {
        connection.send_frame(Frame::empty(Signal::PeerStatusAvailable, name)).await?;
    }
    Ok(())
}

async fn on_start_relay(
    connection: &Arc<ConnectionInner>,
    name: ChannelName,
    payload: Bytes,
) -> Result<(), MuxError> {
    let request =
        StartRelayRequest::deserialize(payload, &name).map_err(|error| MuxError::Protocol(error.to_string()))?;
    for network in request.networks {
        connection.host_relay(network, &request.trackers);
    }
    connection.send_frame(Frame::empty(Signal::RelayResponseSuccess, name)).await
}

async fn on_stop_relay(
    connection: &Arc<ConnectionInner>,
    name: ChannelName,
    payload: Bytes,
) -> Result<(), MuxError> {
    let request =
        StopRelayRequest::deserialize(payload, &name).map_err(|error| MuxError::Protocol(error.to_string()))?;
    for network in &request.networks {
        connection.drop_relay(network);
    }
    connection.send_frame(Frame::empty(Signal::RelayResponseSuccess, name)).await
}

fn on_relay_peer_list(connection: &Arc<ConnectionInner>, payload: Bytes) -> Result<(), MuxError> {
    let list = RelayPeerList::deserialize(payload).map_err(|error| MuxError::Protocol(error.to_string()))?;
    let events = connection.services().events.clone();
    tokio::spawn(async move { events.on_relay_peers(list.peers) });
    Ok(())
}

fn on_invitation(connection: &Arc<ConnectionInner>, name: ChannelName, payload: Bytes) -> Result<(), MuxError> {
    let message =
        String::from_utf8(payload.to_vec()).map_err(|error| MuxError::Protocol(error.to_string()))?;
    let network = NetworkId::from(name);
    let events = connection.services().events.clone();
    let from = connection.remote_endpoint();
    tokio::spawn(async move { events.on_invitation(network, from, message) });
    Ok(())
}
