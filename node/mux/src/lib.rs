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

//! A connection multiplexer: a framed protocol layered on a single reliable
//! byte stream between two peers, carrying many independent logical channels
//! alongside control signals (peer probes, relay registration, proxy tunnels,
//! out-of-band datagrams, invitations). A channel can in turn serve as the
//! base stream of a nested connection, enabling proxied connections.

#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

mod channel;
pub use channel::Channel;

mod connection;
pub use connection::Connection;

mod errors;
pub use errors::MuxError;

mod helpers;

mod inbound;

mod joint;

mod registry;

mod traits;
pub use traits::{ConnectionEvents, ConnectionManager, DhtClient, RelayHandle, RelayService, Services};

use tokio::io::{AsyncRead, AsyncWrite};

/// The default read/write timeout of a channel, in seconds.
pub const CHANNEL_TIMEOUT_IN_SECS: u64 = 30;
/// The time a peer-status probe waits for the peer to answer, in seconds.
pub const PEER_STATUS_TIMEOUT_IN_SECS: u64 = 10;
/// The time a start-relay request waits for the peer to register, in seconds.
pub const START_RELAY_TIMEOUT_IN_SECS: u64 = 120;
/// The time a stop-relay request waits for the peer to acknowledge, in seconds.
pub const STOP_RELAY_TIMEOUT_IN_SECS: u64 = 10;

/// The reliable bidirectional byte stream a connection multiplexes. Encryption
/// and authentication are the business of whoever constructs the stream; a
/// [`Channel`] qualifies, which is what makes nested connections possible.
pub trait BaseStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> BaseStream for T {}
