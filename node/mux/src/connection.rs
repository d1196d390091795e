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
    channel::{Channel, ChannelShared},
    helpers::Pending,
    inbound,
    joint::Joint,
    registry::ChannelRegistry,
    traits::{RelayHandle, Services},
    BaseStream, MuxError, CHANNEL_TIMEOUT_IN_SECS, PEER_STATUS_TIMEOUT_IN_SECS, START_RELAY_TIMEOUT_IN_SECS,
    STOP_RELAY_TIMEOUT_IN_SECS,
};

use bitchat_node_signals::{
    ChannelKind, ChannelName, Frame, FrameCodec, NetworkId, PeerId, Signal, StartRelayRequest, StopRelayRequest,
    MAX_PAYLOAD_SIZE,
};
use bytes::Bytes;
use futures_util::SinkExt;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};

pub(crate) type FramedReader = FramedRead<ReadHalf<Box<dyn BaseStream>>, FrameCodec>;
type FramedWriter = FramedWrite<WriteHalf<Box<dyn BaseStream>>, FrameCodec>;

/// A multiplexed connection to a peer: many logical channels plus control
/// signals over a single base stream.
///
/// Cloning is cheap and every clone drives the same connection. Dropping the
/// handles does not tear the connection down; call [`Connection::dispose`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Initializes a connection over the given base stream. The stream is
    /// assumed reliable, ordered, and already authenticated.
    pub fn new(
        stream: impl BaseStream + 'static,
        local_peer_id: PeerId,
        remote_peer_id: PeerId,
        remote_endpoint: SocketAddr,
        services: Services,
    ) -> Self {
        Self::from_parts(Box::new(stream), local_peer_id, remote_peer_id, remote_endpoint, services, false)
    }

    /// Initializes a connection whose base stream is a channel of another
    /// connection, i.e. a virtual connection.
    pub fn new_virtual(
        stream: Channel,
        local_peer_id: PeerId,
        remote_peer_id: PeerId,
        remote_endpoint: SocketAddr,
        services: Services,
    ) -> Self {
        Self::from_parts(Box::new(stream), local_peer_id, remote_peer_id, remote_endpoint, services, true)
    }

    fn from_parts(
        stream: Box<dyn BaseStream>,
        local_peer_id: PeerId,
        remote_peer_id: PeerId,
        remote_endpoint: SocketAddr,
        services: Services,
        is_virtual: bool,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let inner = Arc::new_cyclic(|this| ConnectionInner {
            this: this.clone(),
            local_peer_id,
            remote_peer_id,
            remote_endpoint,
            is_virtual,
            services,
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, FrameCodec::default())),
            reader: Mutex::new(Some(FramedRead::new(read_half, FrameCodec::default()))),
            reader_handle: Mutex::new(None),
            registries: Default::default(),
            joints: Default::default(),
            next_joint_id: AtomicU64::new(0),
            pending_status: Pending::default(),
            pending_relay: Pending::default(),
            relays: Default::default(),
            channel_write_timeout: RwLock::new(Duration::from_secs(CHANNEL_TIMEOUT_IN_SECS)),
            disposed: AtomicBool::new(false),
        });
        Self { inner }
    }

    /// Spawns the reader task; idempotent.
    pub fn start(&self) {
        let Some(reader) = self.inner.reader.lock().take() else {
            return;
        };
        let handle = tokio::spawn(inbound::run(self.inner.clone(), reader));
        self.inner.reader_handle.lock().replace(handle);
    }

    /// Returns the local peer id.
    pub fn local_peer_id(&self) -> PeerId {
        self.inner.local_peer_id
    }

    /// Returns the remote peer id.
    pub fn remote_peer_id(&self) -> PeerId {
        self.inner.remote_peer_id
    }

    /// Returns the address of the remote peer.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.inner.remote_endpoint
    }

    /// Returns `true` if the base stream is itself a channel of another
    /// connection.
    pub fn is_virtual(&self) -> bool {
        self.inner.is_virtual
    }

    /// Returns `true` if the connection was disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Returns how long an inbound payload may wait for a stalled channel
    /// before the channel is disposed.
    pub fn channel_write_timeout(&self) -> Duration {
        *self.inner.channel_write_timeout.read()
    }

    /// Sets the stalled-channel timeout.
    pub fn set_channel_write_timeout(&self, timeout: Duration) {
        *self.inner.channel_write_timeout.write() = timeout;
    }

    /// Derives the name of the channel this connection would use for the
    /// given network.
    pub fn network_channel_name(&self, network: &NetworkId) -> ChannelName {
        ChannelName::for_network(network, &self.inner.local_peer_id, &self.inner.remote_peer_id)
    }

    /// Opens a network channel under the given name and announces it to the
    /// peer. Fails if a channel with this name is already live.
    pub async fn open_network_channel(&self, name: ChannelName) -> Result<Channel, MuxError> {
        self.open_channel(ChannelKind::Network, name).await
    }

    /// Returns `true` if a network channel with the given name is live.
    pub fn has_network_channel(&self, name: &ChannelName) -> bool {
        self.inner.registry(ChannelKind::Network).contains(name)
    }

    /// Opens a proxy tunnel through the peer towards the given endpoint. The
    /// peer bridges the tunnel to a virtual connection with the target.
    pub async fn open_proxy_tunnel(&self, endpoint: SocketAddr) -> Result<Channel, MuxError> {
        self.open_channel(ChannelKind::ProxyTunnel, ChannelName::from_endpoint(&endpoint)).await
    }

    /// Opens a virtual-connection channel naming the given endpoint as the
    /// represented peer. Used while servicing an inbound proxy tunnel.
    pub(crate) async fn request_virtual_channel(&self, endpoint: SocketAddr) -> Result<Channel, MuxError> {
        self.open_channel(ChannelKind::VirtualConnection, ChannelName::from_endpoint(&endpoint)).await
    }

    async fn open_channel(&self, kind: ChannelKind, name: ChannelName) -> Result<Channel, MuxError> {
        let (channel, shared) = self.inner.create_channel(kind, name)?;
        if let Err(error) = self.inner.send_frame(Frame::empty(kind.connect_signal(), name)).await {
            self.inner.dispose_channel(&shared, false).await;
            return Err(error);
        }
        Ok(channel)
    }

    /// Probes whether the peer holds a live connection to the given endpoint.
    /// Returns `true` iff the peer confirmed within the probe timeout.
    pub async fn request_peer_status(&self, endpoint: SocketAddr) -> Result<bool, MuxError> {
        let name = ChannelName::from_endpoint(&endpoint);
        let frame = Frame::empty(Signal::PeerStatusQuery, name);
        self.inner
            .send_request(&self.inner.pending_status, name, frame, Duration::from_secs(PEER_STATUS_TIMEOUT_IN_SECS))
            .await
    }

    /// Asks the peer to start hosting relays for the given networks. Returns
    /// `true` iff the peer acknowledged within the relay timeout.
    pub async fn request_start_relay(
        &self,
        networks: Vec<NetworkId>,
        trackers: Vec<String>,
    ) -> Result<bool, MuxError> {
        // A fresh random name correlates the response and keys the mask.
        let name = ChannelName::random(&mut rand::thread_rng());
        let mut payload = Vec::new();
        StartRelayRequest::new(networks, trackers)
            .serialize(&mut payload, &name)
            .map_err(|error| MuxError::Protocol(error.to_string()))?;

        let frame = Frame::new(Signal::StartRelay, name, payload.into());
        self.inner
            .send_request(&self.inner.pending_relay, name, frame, Duration::from_secs(START_RELAY_TIMEOUT_IN_SECS))
            .await
    }

    /// Asks the peer to stop hosting relays for the given networks.
    pub async fn request_stop_relay(&self, networks: Vec<NetworkId>) -> Result<bool, MuxError> {
        let name = ChannelName::random(&mut rand::thread_rng());
        let mut payload = Vec::new();
        StopRelayRequest::new(networks)
            .serialize(&mut payload, &name)
            .map_err(|error| MuxError::Protocol(error.to_string()))?;

        let frame = Frame::new(Signal::StopRelay, name, payload.into());
        self.inner
            .send_request(&self.inner.pending_relay, name, frame, Duration::from_secs(STOP_RELAY_TIMEOUT_IN_SECS))
            .await
    }

    /// Sends a keepalive frame. The channel name is random and ignored by the
    /// receiver.
    pub async fn send_noop(&self) -> Result<(), MuxError> {
        let name = ChannelName::random(&mut rand::thread_rng());
        self.inner.send_frame(Frame::empty(Signal::Noop, name)).await
    }

    /// Sends an out-of-band DHT datagram. The channel name is random and
    /// ignored by the receiver.
    pub async fn send_dht_packet(&self, packet: Bytes) -> Result<(), MuxError> {
        let name = ChannelName::random(&mut rand::thread_rng());
        self.inner.send_frame(Frame::new(Signal::DhtPacket, name, packet)).await
    }

    /// Sends an invitation to the given network.
    pub async fn send_invitation(&self, network: NetworkId, message: &str) -> Result<(), MuxError> {
        let frame = Frame::new(
            Signal::NetworkInvitation,
            ChannelName::from(network),
            Bytes::copy_from_slice(message.as_bytes()),
        );
        self.inner.send_frame(frame).await
    }

    /// Disposes the connection: every channel, joint, hosted relay, and the
    /// base stream. Idempotent; no frames are emitted once this returns.
    pub async fn dispose(&self) {
        self.inner.dispose().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_endpoint", &self.inner.remote_endpoint)
            .field("is_virtual", &self.inner.is_virtual)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// The state behind a [`Connection`] handle. The reader task, the channels,
/// and the joints all hold it through `Arc`s (channels weakly).
pub(crate) struct ConnectionInner {
    /// A weak self-reference handed to channels as their back-reference.
    this: Weak<ConnectionInner>,
    local_peer_id: PeerId,
    remote_peer_id: PeerId,
    remote_endpoint: SocketAddr,
    is_virtual: bool,
    /// The collaborating services.
    services: Services,
    /// The write half of the base stream. The single lock serializes all
    /// outbound frames; a frame is never interleaved with another.
    writer: tokio::sync::Mutex<FramedWriter>,
    /// The read half of the base stream, taken by `start`.
    reader: Mutex<Option<FramedReader>>,
    /// The reader task.
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    /// The per-kind channel tables: network, proxy tunnel, virtual connection.
    registries: [ChannelRegistry; 3],
    /// The joints spliced on this connection.
    joints: Mutex<HashMap<u64, Arc<Joint>>>,
    next_joint_id: AtomicU64,
    /// Pending peer-status probes, keyed by the probe's channel name.
    pending_status: Pending,
    /// Pending relay requests, keyed by the request's random channel name.
    pending_relay: Pending,
    /// The relays hosted on behalf of the remote peer.
    relays: Mutex<HashMap<NetworkId, Box<dyn RelayHandle>>>,
    /// How long an inbound payload may wait for a stalled channel slot.
    channel_write_timeout: RwLock<Duration>,
    /// Set once the connection is disposed.
    disposed: AtomicBool,
}

impl ConnectionInner {
    /// Returns `true` if the connection was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns the address of the remote peer.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    /// Returns the collaborating services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Returns the pending peer-status probes.
    pub fn pending_status(&self) -> &Pending {
        &self.pending_status
    }

    /// Returns the pending relay requests.
    pub fn pending_relay(&self) -> &Pending {
        &self.pending_relay
    }

    /// Returns the stalled-channel timeout.
    pub fn channel_write_timeout(&self) -> Duration {
        *self.channel_write_timeout.read()
    }

    /// Returns the channel table for the given kind.
    pub fn registry(&self, kind: ChannelKind) -> &ChannelRegistry {
        match kind {
            ChannelKind::Network => &self.registries[0],
            ChannelKind::ProxyTunnel => &self.registries[1],
            ChannelKind::VirtualConnection => &self.registries[2],
        }
    }

    /// Creates and registers a channel of the given kind and name.
    pub fn create_channel(
        &self,
        kind: ChannelKind,
        name: ChannelName,
    ) -> Result<(Channel, Arc<ChannelShared>), MuxError> {
        if self.is_disposed() {
            return Err(MuxError::ConnectionClosed);
        }
        let (channel, shared) = Channel::create(kind, name, self.this.clone());
        self.registry(kind).insert(shared.clone())?;
        Ok((channel, shared))
    }

    /// Sends a single control frame.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), MuxError> {
        if self.is_disposed() {
            return Err(MuxError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(frame).await.map_err(MuxError::Transport)
    }

    /// Sends a logical write as one or more data frames under a single writer
    /// lock acquisition, so the fragments are contiguous on the wire. A
    /// zero-length write emits exactly one zero-length frame.
    pub async fn send_stream_data(
        &self,
        kind: ChannelKind,
        name: ChannelName,
        mut payload: Bytes,
    ) -> Result<(), MuxError> {
        if self.is_disposed() {
            return Err(MuxError::ConnectionClosed);
        }
        let signal = kind.data_signal();
        let mut writer = self.writer.lock().await;
        loop {
            let chunk = payload.split_to(payload.len().min(MAX_PAYLOAD_SIZE));
            writer.send(Frame::new(signal, name, chunk)).await.map_err(MuxError::Transport)?;
            if payload.is_empty() {
                break Ok(());
            }
        }
    }

    /// Registers a notifier, sends the request frame, and waits for the
    /// response. Returns `Ok(false)` when the wait elapses.
    async fn send_request(
        &self,
        pending: &Pending,
        name: ChannelName,
        frame: Frame,
        wait: Duration,
    ) -> Result<bool, MuxError> {
        let receiver = pending.insert(name);
        if let Err(error) = self.send_frame(frame).await {
            pending.remove(&name);
            return Err(error);
        }
        match timeout(wait, receiver).await {
            Ok(Ok(())) => Ok(true),
            // The table was cleared by disposal.
            Ok(Err(..)) => Ok(false),
            Err(_elapsed) => {
                pending.remove(&name);
                Ok(false)
            }
        }
    }

    /// Disposes a single channel: deregisters it, optionally notifies the
    /// peer best-effort, and wakes its readers. Idempotent.
    pub async fn dispose_channel(&self, channel: &Arc<ChannelShared>, notify_peer: bool) {
        let newly_closed = channel.close();
        self.registry(channel.kind()).remove(channel);

        if newly_closed && notify_peer && !self.is_disposed() {
            let frame = Frame::empty(channel.kind().disconnect_signal(), *channel.name());
            if let Err(error) = self.send_frame(frame).await {
                trace!("Unable to notify {} of a closed channel: {error}", self.remote_endpoint);
            }
        }
    }

    /// Splices two channels into a proxy pipe and tracks the joint.
    pub fn register_joint(&self, a: Channel, b: Channel) {
        let id = self.next_joint_id.fetch_add(1, Ordering::Relaxed);
        let joint = Joint::splice(self.this.clone(), id, a, b);
        // The pipers may have torn the joint down already; only track a live one.
        if !joint.is_disposed() {
            self.joints.lock().insert(id, joint);
        }
    }

    /// Forgets a joint that tore itself down.
    pub fn remove_joint(&self, id: u64) {
        self.joints.lock().remove(&id);
    }

    /// Starts hosting a relay for the given network, unless one is already
    /// hosted.
    pub fn host_relay(&self, network: NetworkId, trackers: &[String]) {
        if self.relays.lock().contains_key(&network) {
            return;
        }
        match self.services.relays.start(network, trackers.to_vec()) {
            Ok(handle) => {
                self.relays.lock().insert(network, handle);
            }
            Err(error) => warn!("Unable to host a relay for network {network}: {error}"),
        }
    }

    /// Stops and forgets the relay hosted for the given network.
    pub fn drop_relay(&self, network: &NetworkId) {
        if let Some(relay) = self.relays.lock().remove(network) {
            relay.stop();
        }
    }

    /// Disposes the connection. Safe to call from any task, including the
    /// reader itself.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Disposing the connection to {}", self.remote_endpoint);

        let reader_handle = self.reader_handle.lock().take();

        // Close every channel; their readers wake and observe closure. The
        // whole stream is going away, so no per-channel Disconnect frames.
        for registry in &self.registries {
            for channel in registry.drain() {
                channel.close();
            }
        }

        // Tear down the joints (their channels are closed already).
        let joints: Vec<_> = self.joints.lock().drain().map(|(_, joint)| joint).collect();
        for joint in joints {
            joint.dispose().await;
        }

        // Stop the relays hosted for this peer.
        let relays: Vec<_> = self.relays.lock().drain().map(|(_, relay)| relay).collect();
        for relay in relays {
            relay.stop();
        }

        // Wake any control-request waiters.
        self.pending_status.clear();
        self.pending_relay.clear();

        // Shut the base stream down; blocked reads and writes fault from here.
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.get_mut().shutdown().await;
        }

        let events = self.services.events.clone();
        let remote = self.remote_endpoint;
        tokio::spawn(async move { events.on_disposed(remote) });

        // Last: the reader may be the task running this very disposal, and an
        // abort only lands at its next await point.
        if let Some(handle) = reader_handle {
            handle.abort();
        }
    }
}
