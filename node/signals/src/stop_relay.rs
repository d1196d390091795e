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

use crate::{start_relay::read_masked_networks, ChannelName, NetworkId};

use anyhow::{bail, Result};
use bytes::Bytes;
use std::io::Write;

/// A request for the remote peer to stop hosting relays for a set of networks.
/// Network ids are masked the same way as in [`crate::StartRelayRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopRelayRequest {
    pub networks: Vec<NetworkId>,
}

impl StopRelayRequest {
    /// Initializes a new stop-relay request.
    pub fn new(networks: Vec<NetworkId>) -> Self {
        Self { networks }
    }

    /// Serializes the request into the buffer, masking with the channel name.
    pub fn serialize<W: Write>(&self, writer: &mut W, mask: &ChannelName) -> Result<()> {
        if self.networks.len() > u8::MAX as usize {
            bail!("Too many networks in a relay request ({})", self.networks.len());
        }

        writer.write_all(&[self.networks.len() as u8])?;
        for network in &self.networks {
            writer.write_all((*network ^ *mask).as_bytes())?;
        }
        Ok(())
    }

    /// Deserializes the given buffer into a request, unmasking with the channel name.
    pub fn deserialize(mut bytes: Bytes, mask: &ChannelName) -> Result<Self> {
        Ok(Self { networks: read_masked_networks(&mut bytes, mask)? })
    }
}
