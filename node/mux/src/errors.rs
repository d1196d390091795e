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

use std::{fmt, io};

/// An error raised by the connection multiplexer.
#[derive(Debug)]
pub enum MuxError {
    /// The channel was disposed, locally or by the peer.
    ChannelClosed,
    /// The connection was disposed.
    ConnectionClosed,
    /// A channel name collided with a live channel of the same kind.
    DuplicateChannel,
    /// The peer violated the wire protocol.
    Protocol(String),
    /// A timed wait elapsed before completion.
    Timeout,
    /// The base stream faulted.
    Transport(io::Error),
}

impl MuxError {
    /// Returns `true` if the error warrants disposing the whole connection
    /// rather than a single channel.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(..) | Self::Protocol(..))
    }
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for MuxError {}

impl From<io::Error> for MuxError {
    fn from(error: io::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<MuxError> for io::Error {
    fn from(error: MuxError) -> Self {
        match error {
            MuxError::ChannelClosed | MuxError::ConnectionClosed => io::ErrorKind::BrokenPipe.into(),
            MuxError::DuplicateChannel => io::ErrorKind::AlreadyExists.into(),
            MuxError::Protocol(reason) => io::Error::new(io::ErrorKind::InvalidData, reason),
            MuxError::Timeout => io::ErrorKind::TimedOut.into(),
            MuxError::Transport(inner) => inner,
        }
    }
}
