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

#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

mod helpers;
pub use helpers::*;

mod relay_peers;
pub use relay_peers::RelayPeerList;

mod start_relay;
pub use start_relay::StartRelayRequest;

mod stop_relay;
pub use stop_relay::StopRelayRequest;

use bytes::Bytes;

/// The maximum size of a frame on the wire: 65,535 less a 256-byte allowance
/// for lower-layer headers.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize - 256;
/// The size of a frame header: signal, channel name, and payload length.
pub const HEADER_SIZE: usize = 1 + ID_SIZE + 2;
/// The maximum payload a single frame can carry; larger logical writes are
/// fragmented into successive frames.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// The opcode of a frame. The numeric codes are fixed by the wire protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    Noop = 0,
    ConnectNetworkChannel = 1,
    DataNetworkChannel = 2,
    DisconnectNetworkChannel = 3,
    ConnectProxyTunnel = 4,
    DataProxyTunnel = 5,
    DisconnectProxyTunnel = 6,
    ConnectVirtualConnection = 7,
    DataVirtualConnection = 8,
    DisconnectVirtualConnection = 9,
    PeerStatusQuery = 10,
    PeerStatusAvailable = 11,
    StartRelay = 12,
    StopRelay = 13,
    RelayResponseSuccess = 14,
    RelayResponsePeerList = 15,
    DhtPacket = 16,
    NetworkInvitation = 17,
}

impl Signal {
    /// Returns the signal corresponding to the given wire code.
    pub fn from_u8(code: u8) -> Option<Self> {
        let signal = match code {
            0 => Self::Noop,
            1 => Self::ConnectNetworkChannel,
            2 => Self::DataNetworkChannel,
            3 => Self::DisconnectNetworkChannel,
            4 => Self::ConnectProxyTunnel,
            5 => Self::DataProxyTunnel,
            6 => Self::DisconnectProxyTunnel,
            7 => Self::ConnectVirtualConnection,
            8 => Self::DataVirtualConnection,
            9 => Self::DisconnectVirtualConnection,
            10 => Self::PeerStatusQuery,
            11 => Self::PeerStatusAvailable,
            12 => Self::StartRelay,
            13 => Self::StopRelay,
            14 => Self::RelayResponseSuccess,
            15 => Self::RelayResponsePeerList,
            16 => Self::DhtPacket,
            17 => Self::NetworkInvitation,
            _ => return None,
        };
        Some(signal)
    }
}

/// The kind of a logical channel; each kind has its own name table and its own
/// connect/data/disconnect signals.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// A channel of a chat network, named by the HMAC derivation.
    Network,
    /// A NAT-traversal tunnel channel, named for an IP endpoint.
    ProxyTunnel,
    /// A channel serving as the base stream of a nested connection.
    VirtualConnection,
}

impl ChannelKind {
    /// Returns the signal that opens a channel of this kind.
    pub fn connect_signal(self) -> Signal {
        match self {
            Self::Network => Signal::ConnectNetworkChannel,
            Self::ProxyTunnel => Signal::ConnectProxyTunnel,
            Self::VirtualConnection => Signal::ConnectVirtualConnection,
        }
    }

    /// Returns the signal that carries payloads on a channel of this kind.
    pub fn data_signal(self) -> Signal {
        match self {
            Self::Network => Signal::DataNetworkChannel,
            Self::ProxyTunnel => Signal::DataProxyTunnel,
            Self::VirtualConnection => Signal::DataVirtualConnection,
        }
    }

    /// Returns the signal that closes a channel of this kind.
    pub fn disconnect_signal(self) -> Signal {
        match self {
            Self::Network => Signal::DisconnectNetworkChannel,
            Self::ProxyTunnel => Signal::DisconnectProxyTunnel,
            Self::VirtualConnection => Signal::DisconnectVirtualConnection,
        }
    }
}

/// A single unit of the mux protocol: a signal, the channel it concerns, and
/// an opaque payload of at most [`MAX_PAYLOAD_SIZE`] bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub signal: Signal,
    pub channel: ChannelName,
    pub payload: Bytes,
}

impl Frame {
    /// Initializes a new frame.
    pub fn new(signal: Signal, channel: ChannelName, payload: Bytes) -> Self {
        Self { signal, channel, payload }
    }

    /// Initializes a new frame with an empty payload.
    pub fn empty(signal: Signal, channel: ChannelName) -> Self {
        Self { signal, channel, payload: Bytes::new() }
    }

    /// Returns the size of the frame on the wire.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
