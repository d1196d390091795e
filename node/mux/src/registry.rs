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

use crate::{channel::ChannelShared, MuxError};

use bitchat_node_signals::ChannelName;
use parking_lot::Mutex;
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

/// The name-keyed table of live channels of a single kind. Each kind has its
/// own registry, so the same name may exist once per kind.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelName, Arc<ChannelShared>>>,
}

impl ChannelRegistry {
    /// Inserts the channel under its name; fails on a live collision.
    pub fn insert(&self, channel: Arc<ChannelShared>) -> Result<(), MuxError> {
        match self.channels.lock().entry(*channel.name()) {
            Entry::Occupied(..) => Err(MuxError::DuplicateChannel),
            Entry::Vacant(entry) => {
                entry.insert(channel);
                Ok(())
            }
        }
    }

    /// Returns the channel registered under the given name.
    pub fn get(&self, name: &ChannelName) -> Option<Arc<ChannelShared>> {
        self.channels.lock().get(name).cloned()
    }

    /// Returns `true` if a channel is registered under the given name.
    pub fn contains(&self, name: &ChannelName) -> bool {
        self.channels.lock().contains_key(name)
    }

    /// Removes the given channel, leaving any newer channel registered under
    /// the same name untouched.
    pub fn remove(&self, channel: &Arc<ChannelShared>) {
        let mut channels = self.channels.lock();
        if let Entry::Occupied(entry) = channels.entry(*channel.name()) {
            if Arc::ptr_eq(entry.get(), channel) {
                entry.remove();
            }
        }
    }

    /// Removes and returns every channel. Shutdown iterates over the snapshot
    /// so the lock is never held across a disposal.
    pub fn drain(&self) -> Vec<Arc<ChannelShared>> {
        self.channels.lock().drain().map(|(_, channel)| channel).collect()
    }
}
