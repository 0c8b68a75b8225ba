// Library for uniform asynchronous IP connection handling over TCP and UDP sockets.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Uniform abstraction over datagram (UDP) and stream (TCP) Internet Protocol sockets, exposed
//! under a single connection handle which hides the transport, the address family (IPv4/IPv6)
//! and the client or server role of the endpoint.
//!
//! The crate is layered:
//!
//! - [`poller`]: a poll set of socket descriptors with a single blocking wait, backed by either
//!   `poll(2)` or, for legacy hosts, `select(2)`;
//! - [`Netstack`]: the synchronous layer owning the poll set and performing all socket
//!   operations ([`Netstack::open`], [`Netstack::receive`], [`Netstack::accept`],
//!   [`Netstack::send`], [`Netstack::close`]);
//! - [`AsyncIp`]: the asynchronous facade, where every connection owns a bounded read queue and
//!   a bounded write queue, and two background workers (a reader and a writer) drive all I/O so
//!   that application code never blocks on the network.
//!
//! Messages are bounded payloads of at most [`MAX_MESSAGE`] bytes; the per-connection bound can
//! be lowered with [`AsyncIp::set_message_length`]. UDP servers have no accept operation:
//! remote peers are materialised as pseudo-client connections which share the server socket and
//! differ only in their remembered peer address.

#[macro_use]
extern crate amplify;

pub mod poller;
mod address;
mod connection;
mod engine;
mod error;
mod netstack;
mod queue;
mod registry;

use std::time::Duration;

pub use connection::{Connection, ConnectionType, Message, Role, Transport};
pub use engine::AsyncIp;
pub use error::Error;
pub use netstack::Netstack;
pub use queue::{MessageQueue, Mode};
pub use registry::{ConnectionId, Registry};

/// Hard upper bound, in bytes, on the payload of a single message.
pub const MAX_MESSAGE: usize = 512;

/// Capacity of every per-connection read and write queue.
pub const QUEUE_MAX_ITEMS: usize = 10;

/// Timeout of a single poll-set wait, and the bound on joining a worker thread during engine
/// shutdown.
pub const WAIT_TIME: Duration = Duration::from_millis(5000);

/// Lowest acceptable port number: the start of the dynamic/private port range.
pub const PORT_MIN: u16 = 49152;
