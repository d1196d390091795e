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

use crate::{channel::ChannelShared, connection::ConnectionInner, Channel};

use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::{io, task::JoinHandle};

/// A bidirectional splice between two channels: two piper tasks shovel bytes
/// until either end closes, then both channels are disposed. This is how an
/// inbound proxy tunnel is bridged to its virtual connection.
pub(crate) struct Joint {
    id: u64,
    connection: Weak<ConnectionInner>,
    a: Arc<ChannelShared>,
    b: Arc<ChannelShared>,
    pipers: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Joint {
    /// Splices the two channels, spawning one piper per direction.
    pub fn splice(connection: Weak<ConnectionInner>, id: u64, a: Channel, b: Channel) -> Arc<Self> {
        let joint = Arc::new(Self {
            id,
            connection,
            a: a.shared(),
            b: b.shared(),
            pipers: Default::default(),
            disposed: Default::default(),
        });

        let (read_a, write_a) = io::split(a);
        let (read_b, write_b) = io::split(b);
        let pipers = vec![
            tokio::spawn(Self::pipe(joint.clone(), read_a, write_b)),
            tokio::spawn(Self::pipe(joint.clone(), read_b, write_a)),
        ];
        *joint.pipers.lock() = pipers;
        joint
    }

    /// Returns `true` if the joint was torn down.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Shovels bytes one way until EOF or an error; the first direction to
    /// stop tears the whole joint down.
    async fn pipe(joint: Arc<Joint>, mut reader: io::ReadHalf<Channel>, mut writer: io::WriteHalf<Channel>) {
        if let Err(error) = io::copy(&mut reader, &mut writer).await {
            trace!("A joint piper stopped: {error}");
        }
        joint.dispose().await;
    }

    /// Disposes both channels and unregisters the joint. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // The two ends may belong to different connections (a proxy tunnel on
        // one, a virtual channel on another); each is disposed through its own.
        for channel in [&self.a, &self.b] {
            match channel.connection() {
                Ok(connection) => connection.dispose_channel(channel, true).await,
                Err(..) => {
                    channel.close();
                }
            }
        }

        if let Some(connection) = self.connection.upgrade() {
            connection.remove_joint(self.id);
        }

        // Stop the other piper if it is still running; a piper ending its own
        // disposal here is only aborted at its next await, after this returns.
        for piper in self.pipers.lock().drain(..) {
            piper.abort();
        }
    }
}
