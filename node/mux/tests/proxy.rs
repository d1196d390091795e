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

#[allow(dead_code)]
mod common;
use common::*;

use bitchat_node_mux::{Channel, Connection};
use bitchat_node_signals::ChannelName;

use deadline::deadline;
use rand::thread_rng;
use core::time::Duration;
use std::net::SocketAddr;

/// Wires up the proxy scenario: A talks to B, B talks to E, and A opens a
/// proxy tunnel towards E through B. Returns A's tunnel end, E's accepted
/// virtual stream, and the three nodes' connections.
async fn bridge_through_b() -> (Channel, Channel, SocketAddr, [Connection; 4], [TestNode; 3]) {
    let a_node = TestNode::new();
    let b_node = TestNode::new();
    let e_node = TestNode::new();

    let (ab_conn, ba_conn) = connected_pair(&a_node, &b_node).await;
    let (be_conn, eb_conn) = connected_pair(&b_node, &e_node).await;

    // B can reach E; that is what A's tunnel rides on.
    let e_endpoint = be_conn.remote_endpoint();
    b_node.manager.connections.lock().insert(e_endpoint, be_conn.clone());

    let tunnel = ab_conn.open_proxy_tunnel(e_endpoint).await.unwrap();

    // E accepts the far end as an inbound virtual connection.
    let e_manager = e_node.manager.clone();
    deadline!(Duration::from_secs(3), move || !e_manager.virtual_streams.lock().is_empty());
    let (e_stream, represented) = e_node.take_virtual_stream().unwrap();

    // The virtual channel names the peer that opened the tunnel.
    assert_eq!(represented, ba_conn.remote_endpoint());

    (tunnel, e_stream, represented, [ab_conn, ba_conn, be_conn, eb_conn], [a_node, b_node, e_node])
}

#[tokio::test]
async fn proxy_tunnel_splices_end_to_end() {
    let (mut tunnel, mut e_stream, _, connections, _nodes) = bridge_through_b().await;

    tunnel.write(b"ping through the mesh").await.unwrap();
    let (bytes, _) = read_exactly(&mut e_stream, 21).await;
    assert_eq!(bytes, b"ping through the mesh");

    e_stream.write(b"pong").await.unwrap();
    let (bytes, _) = read_exactly(&mut tunnel, 4).await;
    assert_eq!(bytes, b"pong");

    for connection in &connections {
        connection.dispose().await;
    }
}

#[tokio::test]
async fn closing_the_tunnel_tears_down_both_ends() {
    let (mut tunnel, mut e_stream, _, connections, _nodes) = bridge_through_b().await;

    tunnel.write(b"last words").await.unwrap();
    let (bytes, _) = read_exactly(&mut e_stream, 10).await;
    assert_eq!(bytes, b"last words");

    // Disposing A's end ripples through B's joint to E.
    tunnel.dispose().await;
    e_stream.set_read_timeout(Duration::from_secs(5));
    assert!(read_until_closed(&mut e_stream).await.is_ok());

    for connection in &connections {
        connection.dispose().await;
    }
}

#[tokio::test]
async fn a_tunnel_carries_a_nested_connection() {
    let (tunnel, e_stream, represented, connections, _nodes) = bridge_through_b().await;
    let e_endpoint = connections[2].remote_endpoint();

    // Run a whole connection over the spliced pair: A's end over the tunnel
    // channel, E's end over the accepted virtual stream.
    let nested_a_node = TestNode::new();
    let nested_e_node = TestNode::new();
    let nested_a = Connection::new_virtual(
        tunnel,
        sample_peer_id(10),
        sample_peer_id(11),
        e_endpoint,
        nested_a_node.services(),
    );
    let nested_e = Connection::new_virtual(
        e_stream,
        sample_peer_id(11),
        sample_peer_id(10),
        represented,
        nested_e_node.services(),
    );
    assert!(nested_a.is_virtual());
    assert!(nested_e.is_virtual());
    nested_a.start();
    nested_e.start();

    let name = ChannelName::random(&mut thread_rng());
    let mut a_channel = nested_a.open_network_channel(name).await.unwrap();

    let e_events = nested_e_node.events.clone();
    deadline!(Duration::from_secs(3), move || !e_events.opened.lock().is_empty());
    let mut e_channel = nested_e_node.take_opened_channel().unwrap();

    a_channel.write(b"nested hello").await.unwrap();
    let (bytes, _) = read_exactly(&mut e_channel, 12).await;
    assert_eq!(bytes, b"nested hello");

    e_channel.write(b"nested reply").await.unwrap();
    let (bytes, _) = read_exactly(&mut a_channel, 12).await;
    assert_eq!(bytes, b"nested reply");

    // Disposing the nested connection shuts its base channel down, which
    // ripples through the joint to the other nested end.
    nested_a.dispose().await;
    let nested_e_check = nested_e.clone();
    deadline!(Duration::from_secs(5), move || nested_e_check.is_disposed());

    for connection in &connections {
        connection.dispose().await;
    }
}
