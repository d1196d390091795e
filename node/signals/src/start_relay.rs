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

use crate::{ChannelName, NetworkId, ID_SIZE};

use anyhow::{bail, Result};
use bytes::{Buf, Bytes};
use std::io::Write;

/// A request for the remote peer to start hosting relays for a set of networks.
///
/// Each network id is XOR-masked with the frame's (random) channel name, so a
/// passive observer cannot collect network ids from relay handshakes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartRelayRequest {
    pub networks: Vec<NetworkId>,
    pub trackers: Vec<String>,
}

impl StartRelayRequest {
    /// Initializes a new start-relay request.
    pub fn new(networks: Vec<NetworkId>, trackers: Vec<String>) -> Self {
        Self { networks, trackers }
    }

    /// Serializes the request into the buffer, masking with the channel name.
    pub fn serialize<W: Write>(&self, writer: &mut W, mask: &ChannelName) -> Result<()> {
        if self.networks.len() > u8::MAX as usize {
            bail!("Too many networks in a relay request ({})", self.networks.len());
        }
        if self.trackers.len() > u8::MAX as usize {
            bail!("Too many trackers in a relay request ({})", self.trackers.len());
        }

        writer.write_all(&[self.networks.len() as u8])?;
        for network in &self.networks {
            writer.write_all((*network ^ *mask).as_bytes())?;
        }

        writer.write_all(&[self.trackers.len() as u8])?;
        for tracker in &self.trackers {
            if tracker.len() > u8::MAX as usize {
                bail!("Tracker URI exceeds 255 bytes");
            }
            writer.write_all(&[tracker.len() as u8])?;
            writer.write_all(tracker.as_bytes())?;
        }
        Ok(())
    }

    /// Deserializes the given buffer into a request, unmasking with the channel name.
    pub fn deserialize(mut bytes: Bytes, mask: &ChannelName) -> Result<Self> {
        let networks = read_masked_networks(&mut bytes, mask)?;

        if bytes.remaining() < 1 {
            bail!("Missing tracker count");
        }
        let count = bytes.get_u8() as usize;
        let mut trackers = Vec::with_capacity(count);
        for _ in 0..count {
            if bytes.remaining() < 1 {
                bail!("Missing tracker length");
            }
            let len = bytes.get_u8() as usize;
            if bytes.remaining() < len {
                bail!("Truncated tracker URI");
            }
            trackers.push(String::from_utf8(bytes.split_to(len).to_vec())?);
        }

        Ok(Self { networks, trackers })
    }
}

/// Reads a count-prefixed list of XOR-masked network ids.
pub(crate) fn read_masked_networks(bytes: &mut Bytes, mask: &ChannelName) -> Result<Vec<NetworkId>> {
    if bytes.remaining() < 1 {
        bail!("Missing network count");
    }
    let count = bytes.get_u8() as usize;
    let mut networks = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.remaining() < ID_SIZE {
            bail!("Truncated network id");
        }
        let mut id = [0u8; ID_SIZE];
        bytes.copy_to_slice(&mut id);
        networks.push(NetworkId::new(id) ^ *mask);
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn round_trip() {
        let mut rng = StdRng::seed_from_u64(1337);
        let mask = ChannelName::random(&mut rng);
        let request = StartRelayRequest::new(
            vec![NetworkId::new(rng.gen()), NetworkId::new(rng.gen())],
            vec!["http://t1/".to_string(), "http://t2/".to_string()],
        );

        let mut wire = Vec::new();
        request.serialize(&mut wire, &mask).unwrap();
        assert_eq!(StartRelayRequest::deserialize(wire.into(), &mask).unwrap(), request);
    }

    #[test]
    fn wire_layout_is_exact() {
        let mask = ChannelName::new([0x55; ID_SIZE]);
        let n1 = NetworkId::new([0x01; ID_SIZE]);
        let n2 = NetworkId::new([0x02; ID_SIZE]);
        let request =
            StartRelayRequest::new(vec![n1, n2], vec!["http://t1/".to_string(), "http://t2/".to_string()]);

        let mut wire = Vec::new();
        request.serialize(&mut wire, &mask).unwrap();

        let mut expected = vec![0x02];
        expected.extend_from_slice((n1 ^ mask).as_bytes());
        expected.extend_from_slice((n2 ^ mask).as_bytes());
        expected.push(0x02);
        expected.push(b"http://t1/".len() as u8);
        expected.extend_from_slice(b"http://t1/");
        expected.push(b"http://t2/".len() as u8);
        expected.extend_from_slice(b"http://t2/");
        assert_eq!(wire, expected);
    }

    #[test]
    fn unmasking_with_the_wrong_name_scrambles_ids() {
        let mut rng = StdRng::seed_from_u64(1337);
        let mask = ChannelName::random(&mut rng);
        let network = NetworkId::new(rng.gen());
        let request = StartRelayRequest::new(vec![network], vec![]);

        let mut wire = Vec::new();
        request.serialize(&mut wire, &mask).unwrap();

        let wrong = ChannelName::random(&mut rng);
        let decoded = StartRelayRequest::deserialize(wire.into(), &wrong).unwrap();
        assert_ne!(decoded.networks[0], network);
    }

    #[test]
    fn truncated_requests_are_rejected() {
        let mask = ChannelName::new([0u8; ID_SIZE]);
        assert!(StartRelayRequest::deserialize(Bytes::new(), &mask).is_err());
        // A network count with no network ids behind it.
        assert!(StartRelayRequest::deserialize(Bytes::from_static(&[3]), &mask).is_err());
    }
}
