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

use crate::{ChannelName, Frame, Signal, HEADER_SIZE, ID_SIZE, MAX_PAYLOAD_SIZE};

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// The codec used to decode and encode mux `Frame`s.
///
/// The header is fixed-layout rather than length-first: the payload length
/// sits behind the signal and the channel name, so decoding peeks at a fixed
/// offset instead of delegating to a length-delimited codec.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame payload exceeds the maximum size"));
        }

        dst.reserve(HEADER_SIZE + frame.payload.len());
        dst.put_u8(frame.signal as u8);
        dst.put_slice(frame.channel.as_bytes());
        dst.put_u16_le(frame.payload.len() as u16);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Error = io::Error;
    type Item = Frame;

    fn decode(&mut self, source: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if source.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek the payload length before committing to the frame.
        let len = u16::from_le_bytes([source[HEADER_SIZE - 2], source[HEADER_SIZE - 1]]) as usize;
        if source.len() < HEADER_SIZE + len {
            source.reserve(HEADER_SIZE + len - source.len());
            return Ok(None);
        }

        let mut header = source.split_to(HEADER_SIZE);
        let signal = match Signal::from_u8(header.get_u8()) {
            Some(signal) => signal,
            None => {
                error!("Received a frame with an invalid signal");
                return Err(io::ErrorKind::InvalidData.into());
            }
        };
        let mut name = [0u8; ID_SIZE];
        header.copy_to_slice(&mut name);
        let payload = source.split_to(len).freeze();

        Ok(Some(Frame::new(signal, ChannelName::new(name), payload)))
    }
}
