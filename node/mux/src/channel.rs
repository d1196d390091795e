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

use crate::{connection::ConnectionInner, MuxError, CHANNEL_TIMEOUT_IN_SECS};

use bitchat_node_signals::{ChannelKind, ChannelName};
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc::{self, error::SendTimeoutError},
    time::timeout_at,
};

/// The half of a channel the owning connection keeps in its registry: the
/// identity, the send side of the single-slot receive buffer, and a non-owning
/// back-reference to the connection.
pub(crate) struct ChannelShared {
    /// The channel kind; each kind has its own registry and wire signals.
    kind: ChannelKind,
    /// The channel name.
    name: ChannelName,
    /// The owning connection; gone once the connection is disposed.
    connection: Weak<ConnectionInner>,
    /// The send half of the single-slot receive buffer, dropped on disposal.
    slot: Mutex<Option<mpsc::Sender<Bytes>>>,
    /// Set once the channel is disposed.
    disposed: AtomicBool,
}

impl ChannelShared {
    /// Returns the channel kind.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Returns the channel name.
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Returns `true` if the channel was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns the owning connection, if it is still live.
    pub fn connection(&self) -> Result<Arc<ConnectionInner>, MuxError> {
        self.connection.upgrade().ok_or(MuxError::ConnectionClosed)
    }

    /// Places an inbound payload into the single-slot buffer, waiting up to
    /// `timeout` for the previous payload to be consumed. A timeout means the
    /// channel is stalled; the caller disposes it.
    pub async fn deliver(&self, payload: Bytes, timeout: Duration) -> Result<(), MuxError> {
        let sender = match self.slot.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(MuxError::ChannelClosed),
        };
        match sender.send_timeout(payload, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(..)) => Err(MuxError::Timeout),
            Err(SendTimeoutError::Closed(..)) => Err(MuxError::ChannelClosed),
        }
    }

    /// Marks the channel disposed and closes the slot, waking the reader once
    /// any buffered payload drains. Returns `false` if already disposed.
    pub fn close(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.slot.lock().take();
        true
    }
}

impl fmt::Debug for ChannelShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelShared")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A logical bidirectional byte stream within a connection.
///
/// Reads drain a single-slot receive buffer fed by the connection's reader;
/// the slot holds at most one in-flight payload, which couples the wire to
/// the consumer: a slow reader throttles the sender through the base stream.
/// Writes are framed and fragmented onto the base stream.
///
/// Channels implement [`AsyncRead`] and [`AsyncWrite`], so one can be spliced
/// into a proxy pipe or serve as the base stream of a nested connection.
pub struct Channel {
    shared: Arc<ChannelShared>,
    /// The receive half of the single-slot buffer.
    receiver: mpsc::Receiver<Bytes>,
    /// Bytes of the last payload not yet claimed by a read.
    pending: Bytes,
    /// Set once a read observed the closure.
    closed: bool,
    read_timeout: Duration,
    write_timeout: Duration,
    /// The in-flight outbound write, kept across `poll_write` calls.
    write_state: Option<Pin<Box<dyn Future<Output = Result<usize, MuxError>> + Send + Sync>>>,
}

impl Channel {
    /// Initializes a channel pair: the user-facing stream and the shared half
    /// the connection registers.
    pub(crate) fn create(
        kind: ChannelKind,
        name: ChannelName,
        connection: Weak<ConnectionInner>,
    ) -> (Self, Arc<ChannelShared>) {
        // Capacity 1: the single-slot receive buffer.
        let (sender, receiver) = mpsc::channel(1);
        let shared = Arc::new(ChannelShared {
            kind,
            name,
            connection,
            slot: Mutex::new(Some(sender)),
            disposed: AtomicBool::new(false),
        });
        let channel = Self {
            shared: shared.clone(),
            receiver,
            pending: Bytes::new(),
            closed: false,
            read_timeout: Duration::from_secs(CHANNEL_TIMEOUT_IN_SECS),
            write_timeout: Duration::from_secs(CHANNEL_TIMEOUT_IN_SECS),
            write_state: None,
        };
        (channel, shared)
    }

    /// Returns the channel kind.
    pub fn kind(&self) -> ChannelKind {
        self.shared.kind()
    }

    /// Returns the channel name.
    pub fn name(&self) -> &ChannelName {
        self.shared.name()
    }

    /// Returns `true` if the channel was disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Returns the read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Sets the read timeout.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Returns the write timeout.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Sets the write timeout.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Returns the shared half.
    pub(crate) fn shared(&self) -> Arc<ChannelShared> {
        self.shared.clone()
    }

    /// Reads up to `buffer.len()` bytes, waiting up to the read timeout for a
    /// payload. Returns `Ok(0)` exactly once when the channel closes after
    /// the slot drains; reading past that point fails with `ChannelClosed`.
    pub async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, MuxError> {
        if self.closed {
            return Err(MuxError::ChannelClosed);
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            let deadline = tokio::time::Instant::now() + self.read_timeout;
            loop {
                match timeout_at(deadline, self.receiver.recv()).await {
                    // A zero-length logical write; nothing to surface.
                    Ok(Some(payload)) if payload.is_empty() => continue,
                    Ok(Some(payload)) => {
                        self.pending = payload;
                        break;
                    }
                    Ok(None) => {
                        self.closed = true;
                        return Ok(0);
                    }
                    Err(_elapsed) => return Err(MuxError::Timeout),
                }
            }
        }

        let len = buffer.len().min(self.pending.len());
        buffer[..len].copy_from_slice(&self.pending.split_to(len));
        Ok(len)
    }

    /// Writes the buffer to the peer as one or more data frames, bounded by
    /// the write timeout.
    pub async fn write(&self, buffer: &[u8]) -> Result<(), MuxError> {
        if self.shared.is_disposed() {
            return Err(MuxError::ChannelClosed);
        }
        let connection = self.shared.connection()?;
        let payload = Bytes::copy_from_slice(buffer);

        let deadline = tokio::time::Instant::now() + self.write_timeout;
        match timeout_at(deadline, connection.send_stream_data(self.kind(), *self.name(), payload)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(MuxError::Timeout),
        }
    }

    /// Disposes the channel: deregisters it, notifies the peer best-effort,
    /// and wakes any readers. Idempotent.
    pub async fn dispose(&self) {
        match self.shared.connection() {
            Ok(connection) => connection.dispose_channel(&self.shared, true).await,
            Err(..) => {
                self.shared.close();
            }
        }
    }
}

impl AsyncRead for Channel {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.pending.is_empty() {
            match this.receiver.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                // EOF once the slot drains after disposal.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(payload)) => this.pending = payload,
            }
        }

        let len = buf.remaining().min(this.pending.len());
        buf.put_slice(&this.pending.split_to(len));
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for Channel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buffer: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_state.is_none() && this.shared.is_disposed() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }

        let shared = &this.shared;
        let write = this.write_state.get_or_insert_with(|| {
            let shared = shared.clone();
            let payload = Bytes::copy_from_slice(buffer);
            Box::pin(async move {
                let len = payload.len();
                shared.connection()?.send_stream_data(shared.kind(), *shared.name(), payload).await?;
                Ok(len)
            })
        });

        match write.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.write_state = None;
                Poll::Ready(result.map_err(io::Error::from))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are flushed by the connection writer as they are sent.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.shared.connection() {
            Ok(connection) => {
                let shared = this.shared.clone();
                tokio::spawn(async move {
                    connection.dispose_channel(&shared, true).await;
                });
            }
            Err(..) => {
                this.shared.close();
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind())
            .field("name", self.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
