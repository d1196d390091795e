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

use bitchat_node_signals::ChannelName;

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// A table of one-shot notifiers keyed by channel name, correlating a control
/// request with the response frame that answers it. A requester that gives up
/// removes its own entry.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    /// The map of channel names to response callbacks.
    callbacks: Mutex<HashMap<ChannelName, oneshot::Sender<()>>>,
}

impl Pending {
    /// Registers a callback under the given name, returning the receiver to
    /// wait on. A collision replaces the previous callback, closing its
    /// receiver.
    pub fn insert(&self, name: ChannelName) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.callbacks.lock().insert(name, sender);
        receiver
    }

    /// Signals the callback registered under the given name. Returns `false`
    /// on a miss, which is a benign race with a timeout or disposal.
    pub fn deliver(&self, name: &ChannelName) -> bool {
        match self.callbacks.lock().remove(name) {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    /// Removes the callback registered under the given name without signaling it.
    pub fn remove(&self, name: &ChannelName) {
        self.callbacks.lock().remove(name);
    }

    /// Drops every callback; the waiters wake and observe closure.
    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }
}
