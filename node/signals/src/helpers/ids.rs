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

use core::{fmt, ops::BitXor};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

/// The size of every protocol identifier: peer ids, network ids, and channel names.
pub const ID_SIZE: usize = 20;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; ID_SIZE]);

        impl $name {
            /// Initializes the identifier from its raw bytes.
            pub fn new(bytes: [u8; ID_SIZE]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes of the identifier.
            pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
                &self.0
            }
        }

        impl From<[u8; ID_SIZE]> for $name {
            fn from(bytes: [u8; ID_SIZE]) -> Self {
                Self(bytes)
            }
        }

        impl BitXor for $name {
            type Output = Self;

            fn bitxor(self, other: Self) -> Self {
                let mut bytes = self.0;
                for (byte, mask) in bytes.iter_mut().zip(other.0.iter()) {
                    *byte ^= mask;
                }
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

id_type!(
    /// The identity of a peer.
    PeerId
);
id_type!(
    /// The identity of a chat network. Network ids never appear on the wire in
    /// the clear; see [`ChannelName::for_network`] and the relay request masking.
    NetworkId
);
id_type!(
    /// The name of a logical channel within a connection.
    ChannelName
);

type HmacSha1 = Hmac<Sha1>;

impl ChannelName {
    /// Samples a fresh random channel name.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; ID_SIZE];
        rng.fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Derives the name of a network channel between two peers:
    /// `HMAC-SHA1(key = network, message = local ^ remote)`.
    ///
    /// The derivation is symmetric in the two peer ids, so both ends arrive at
    /// the same name, and a passive observer cannot recover the network id
    /// from channel traffic.
    pub fn for_network(network: &NetworkId, local: &PeerId, remote: &PeerId) -> Self {
        let mut mac = HmacSha1::new_from_slice(network.as_bytes()).expect("HMAC accepts any key size");
        mac.update((*local ^ *remote).as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut bytes = [0u8; ID_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }
}

impl From<NetworkId> for ChannelName {
    fn from(network: NetworkId) -> Self {
        Self(network.0)
    }
}

impl From<ChannelName> for NetworkId {
    fn from(name: ChannelName) -> Self {
        Self(name.0)
    }
}

impl BitXor<ChannelName> for NetworkId {
    type Output = Self;

    /// Masks the network id with a channel name, as relay requests do on the wire.
    fn bitxor(self, mask: ChannelName) -> Self {
        Self((ChannelName(self.0) ^ mask).0)
    }
}
