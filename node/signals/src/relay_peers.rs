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

use crate::{read_endpoint, write_endpoint};

use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::{io::Write, net::SocketAddr};

/// The relay peer endpoints known for a channel, advertised by the hosting peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayPeerList {
    pub peers: Vec<SocketAddr>,
}

impl RelayPeerList {
    /// Initializes a new relay peer list.
    pub fn new(peers: Vec<SocketAddr>) -> Self {
        Self { peers }
    }

    /// Serializes the list into the buffer.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        if self.peers.len() > u8::MAX as usize {
            bail!("Too many peers in a relay peer list ({})", self.peers.len());
        }

        let mut buffer = BytesMut::new();
        buffer.put_u8(self.peers.len() as u8);
        for peer in &self.peers {
            write_endpoint(peer, &mut buffer);
        }
        writer.write_all(&buffer)?;
        Ok(())
    }

    /// Deserializes the given buffer into a peer list.
    pub fn deserialize(mut bytes: Bytes) -> Result<Self> {
        if bytes.remaining() < 1 {
            bail!("Missing peer count");
        }
        let count = bytes.get_u8() as usize;
        let mut peers = Vec::with_capacity(count);
        for _ in 0..count {
            peers.push(read_endpoint(&mut bytes)?);
        }
        Ok(Self { peers })
    }
}
