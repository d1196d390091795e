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

use crate::{ChannelName, ID_SIZE};

use anyhow::{bail, Result};
use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// The family tag of an IPv4 endpoint.
const FAMILY_IPV4: u8 = 0;
/// The family tag of an IPv6 endpoint.
const FAMILY_IPV6: u8 = 1;

/// Writes an IP endpoint: a family tag, the address bytes, and the port in
/// little-endian order.
pub fn write_endpoint<B: BufMut>(endpoint: &SocketAddr, buffer: &mut B) {
    match endpoint.ip() {
        IpAddr::V4(ip) => {
            buffer.put_u8(FAMILY_IPV4);
            buffer.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buffer.put_u8(FAMILY_IPV6);
            buffer.put_slice(&ip.octets());
        }
    }
    buffer.put_u16_le(endpoint.port());
}

/// Reads an IP endpoint written by [`write_endpoint`].
pub fn read_endpoint<B: Buf>(buffer: &mut B) -> Result<SocketAddr> {
    if buffer.remaining() < 1 {
        bail!("Missing address family");
    }
    let ip = match buffer.get_u8() {
        FAMILY_IPV4 => {
            if buffer.remaining() < 4 {
                bail!("Truncated IPv4 address");
            }
            let mut octets = [0u8; 4];
            buffer.copy_to_slice(&mut octets);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            if buffer.remaining() < 16 {
                bail!("Truncated IPv6 address");
            }
            let mut octets = [0u8; 16];
            buffer.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        family => bail!("Unsupported address family {family}"),
    };

    if buffer.remaining() < 2 {
        bail!("Missing port");
    }
    Ok(SocketAddr::new(ip, buffer.get_u16_le()))
}

impl ChannelName {
    /// Encodes an IP endpoint as a channel name, zero-padded to the full width.
    pub fn from_endpoint(endpoint: &SocketAddr) -> Self {
        let mut bytes = [0u8; ID_SIZE];
        let mut cursor = &mut bytes[..];
        write_endpoint(endpoint, &mut cursor);
        Self::new(bytes)
    }

    /// Decodes the IP endpoint this channel name encodes.
    pub fn to_endpoint(&self) -> Result<SocketAddr> {
        read_endpoint(&mut &self.as_bytes()[..])
    }
}
