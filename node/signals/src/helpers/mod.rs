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

mod codec;
pub use codec::FrameCodec;

mod endpoint;
pub use endpoint::{read_endpoint, write_endpoint};

mod ids;
pub use ids::{ChannelName, NetworkId, PeerId, ID_SIZE};
