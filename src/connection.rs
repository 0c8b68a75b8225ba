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

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use socket2::Socket;

use crate::{address, Error, MAX_MESSAGE};

/// Transport protocol of a connection, fixed at creation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum Transport {
    /// Stream transport with per-remote descriptors.
    #[display("TCP")]
    Tcp,
    /// Datagram transport; a server and its pseudo-clients share one descriptor.
    #[display("UDP")]
    Udp,
}

/// Network role of a connection, fixed at creation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum Role {
    /// Connection bound to a local address, owning a set of clients.
    #[display("server")]
    Server,
    /// Connection pointing at a single remote address.
    #[display("client")]
    Client,
}

/// Transport and role of a connection, packed into the single type byte accepted by
/// [`crate::AsyncIp::open_connection`] and [`crate::Netstack::open`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ConnectionType {
    /// Transport protocol flag.
    pub transport: Transport,
    /// Network role flag.
    pub role: Role,
}

impl ConnectionType {
    /// TCP transport flag.
    pub const TCP: u8 = 0x10;
    /// UDP transport flag.
    pub const UDP: u8 = 0x20;
    /// Server role flag.
    pub const SERVER: u8 = 0x01;
    /// Client role flag.
    pub const CLIENT: u8 = 0x02;

    const TRANSPORT_MASK: u8 = 0xF0;
    const ROLE_MASK: u8 = 0x0F;

    /// Decodes the type byte; any combination other than one transport flag plus one role flag
    /// is rejected.
    pub fn from_byte(flags: u8) -> Result<Self, Error> {
        let transport = match flags & Self::TRANSPORT_MASK {
            Self::TCP => Transport::Tcp,
            Self::UDP => Transport::Udp,
            _ => return Err(Error::InvalidType(flags)),
        };
        let role = match flags & Self::ROLE_MASK {
            Self::SERVER => Role::Server,
            Self::CLIENT => Role::Client,
            _ => return Err(Error::InvalidType(flags)),
        };
        Ok(ConnectionType { transport, role })
    }

    /// Encodes the transport and role back into the type byte.
    pub fn to_byte(self) -> u8 {
        let transport = match self.transport {
            Transport::Tcp => Self::TCP,
            Transport::Udp => Self::UDP,
        };
        let role = match self.role {
            Role::Server => Self::SERVER,
            Role::Client => Self::CLIENT,
        };
        transport | role
    }
}

/// A bounded payload of at most [`MAX_MESSAGE`] bytes, optionally paired with the address of the
/// remote peer it was received from.
#[derive(Copy, Clone, Debug)]
pub struct Message {
    data: [u8; MAX_MESSAGE],
    len: usize,
    peer: Option<SocketAddr>,
}

impl Message {
    /// Constructs a message from a payload, truncating it to [`MAX_MESSAGE`] bytes.
    pub fn new(payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_MESSAGE);
        let mut data = [0u8; MAX_MESSAGE];
        data[..len].copy_from_slice(&payload[..len]);
        Message { data, len, peer: None }
    }

    pub(crate) fn with_peer(payload: &[u8], peer: SocketAddr) -> Self {
        let mut message = Message::new(payload);
        message.peer = Some(peer);
        message
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] { &self.data[..self.len] }

    /// Payload length in bytes.
    pub fn len(&self) -> usize { self.len }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Address of the remote peer the message was received from, where known.
    pub fn peer(&self) -> Option<SocketAddr> { self.peer }

    /// The payload zero-padded to the fixed `bound`-byte wire frame.
    pub(crate) fn frame(&self, bound: usize) -> &[u8] { &self.data[..bound.min(MAX_MESSAGE)] }
}

/// One remembered client of a server connection.
///
/// For TCP servers the socket is the accepted child descriptor; for UDP servers it is the
/// server's own shared descriptor and only the address distinguishes the peers.
#[derive(Clone)]
pub(crate) struct Peer {
    pub socket: Arc<Socket>,
    pub addr: SocketAddr,
}

/// Client list shared between a server connection and the client connections spawned from it.
pub(crate) struct Roster {
    peers: Mutex<Vec<Peer>>,
    /// Set when a UDP server is closed while pseudo-clients still share its descriptor; the
    /// descriptor is released by the last departing pseudo-client.
    closing: AtomicBool,
}

impl Roster {
    pub fn new() -> Arc<Self> {
        Arc::new(Roster {
            peers: Mutex::new(empty!()),
            closing: AtomicBool::new(false),
        })
    }

    pub fn count(&self) -> usize { self.peers.lock().expect("roster lock poisoned").len() }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.peers.lock().expect("roster lock poisoned").iter().any(|peer| peer.addr == addr)
    }

    pub fn add(&self, peer: Peer) { self.peers.lock().expect("roster lock poisoned").push(peer); }

    /// Unlinks the peer with the given address.
    ///
    /// # Returns
    ///
    /// Number of peers remaining on the roster.
    pub fn remove(&self, addr: SocketAddr) -> usize {
        let mut peers = self.peers.lock().expect("roster lock poisoned");
        if let Some(index) = peers.iter().position(|peer| peer.addr == addr) {
            peers.remove(index);
        }
        peers.len()
    }

    /// Snapshot of the current peers, for iteration without the roster lock.
    pub fn peers(&self) -> Vec<Peer> { self.peers.lock().expect("roster lock poisoned").clone() }

    pub fn begin_close(&self) { self.closing.store(true, Ordering::Release); }

    pub fn is_closing(&self) -> bool { self.closing.load(Ordering::Acquire) }
}

/// Role × transport behavior variant of a connection: a closed four-way dispatch.
pub(crate) enum Endpoint {
    /// TCP server owning a listening descriptor and a roster of accepted children.
    TcpServer { roster: Arc<Roster> },
    /// TCP client; accepted children keep a reference to the roster of the server which spawned
    /// them, directly opened clients carry `None`.
    TcpClient { roster: Option<Arc<Roster>> },
    /// UDP server owning a bound descriptor shared with its pseudo-clients.
    UdpServer { roster: Arc<Roster> },
    /// UDP client; pseudo-clients materialised by a server keep a reference to its roster and
    /// share its descriptor, directly opened clients carry `None` and own theirs.
    UdpClient { roster: Option<Arc<Roster>> },
}

/// An endpoint handle over one socket descriptor: transport, role, address and, for servers,
/// the set of remembered clients.
///
/// Connections are created by [`crate::Netstack::open`] (or accepted by
/// [`crate::Netstack::accept`]) and destroyed by [`crate::Netstack::close`]; role and transport
/// are immutable for the lifetime of the connection.
pub struct Connection {
    pub(crate) socket: Arc<Socket>,
    /// Local address for servers, remote peer address otherwise.
    pub(crate) address: SocketAddr,
    pub(crate) message_length: usize,
    /// Cleared when a zero-byte read reports an orderly shutdown by the remote.
    pub(crate) alive: bool,
    pub(crate) endpoint: Endpoint,
}

impl Connection {
    /// Transport protocol of the connection.
    pub fn transport(&self) -> Transport {
        match self.endpoint {
            Endpoint::TcpServer { .. } | Endpoint::TcpClient { .. } => Transport::Tcp,
            Endpoint::UdpServer { .. } | Endpoint::UdpClient { .. } => Transport::Udp,
        }
    }

    /// Network role of the connection.
    pub fn role(&self) -> Role {
        match self.endpoint {
            Endpoint::TcpServer { .. } | Endpoint::UdpServer { .. } => Role::Server,
            Endpoint::TcpClient { .. } | Endpoint::UdpClient { .. } => Role::Client,
        }
    }

    /// Whether the connection has the server role.
    pub fn is_server(&self) -> bool { self.role() == Role::Server }

    /// Local address for servers, remote peer address otherwise.
    pub fn address(&self) -> SocketAddr { self.address }

    /// The connection address as a `"<host>/<port>"` string.
    pub fn address_string(&self) -> String { address::format_address(self.address) }

    /// Current fixed message length of the connection, in bytes.
    pub fn message_length(&self) -> usize { self.message_length }

    /// Changes the fixed message length, clamping it to `1..=`[`MAX_MESSAGE`].
    ///
    /// # Returns
    ///
    /// The actual new message length.
    pub fn set_message_length(&mut self, length: usize) -> usize {
        self.message_length = length.clamp(1, MAX_MESSAGE);
        self.message_length
    }

    /// Number of remembered clients for a server connection; 1 for a client connection.
    pub fn clients_number(&self) -> usize {
        match &self.endpoint {
            Endpoint::TcpServer { roster } | Endpoint::UdpServer { roster } => roster.count(),
            Endpoint::TcpClient { .. } | Endpoint::UdpClient { .. } => 1,
        }
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd { self.socket.as_raw_fd() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn type_byte_codec() {
        for flags in [
            ConnectionType::TCP | ConnectionType::SERVER,
            ConnectionType::TCP | ConnectionType::CLIENT,
            ConnectionType::UDP | ConnectionType::SERVER,
            ConnectionType::UDP | ConnectionType::CLIENT,
        ] {
            let ty = ConnectionType::from_byte(flags).unwrap();
            assert_eq!(ty.to_byte(), flags);
        }

        let tcp_server = ConnectionType::from_byte(0x11).unwrap();
        assert_eq!(tcp_server.transport, Transport::Tcp);
        assert_eq!(tcp_server.role, Role::Server);
    }

    #[test]
    fn invalid_type_bytes() {
        for flags in [0x00, 0x10, 0x01, 0x30 | 0x01, 0x10 | 0x03, 0x40 | 0x02, 0xFF] {
            assert!(matches!(ConnectionType::from_byte(flags), Err(Error::InvalidType(_))));
        }
    }

    #[test]
    fn message_truncates_to_bound() {
        let oversize = vec![0xAA; MAX_MESSAGE + 64];
        let message = Message::new(&oversize);
        assert_eq!(message.len(), MAX_MESSAGE);

        let message = Message::new(b"hello");
        assert_eq!(message.payload(), b"hello");
        assert_eq!(message.frame(8), b"hello\0\0\0");
        assert!(message.peer().is_none());
    }

    #[test]
    fn roster_tracks_peers() {
        use socket2::{Domain, Socket as RawSocket, Type};

        let socket =
            Arc::new(RawSocket::new(Domain::IPV4, Type::DGRAM, None).expect("datagram socket"));
        let first: SocketAddr = "127.0.0.1:49900".parse().unwrap();
        let second: SocketAddr = "127.0.0.1:49901".parse().unwrap();

        let roster = Roster::new();
        roster.add(Peer { socket: socket.clone(), addr: first });
        roster.add(Peer { socket, addr: second });
        assert_eq!(roster.count(), 2);
        assert!(roster.contains(first));

        assert_eq!(roster.remove(first), 1);
        assert!(!roster.contains(first));
        assert_eq!(roster.remove(first), 1);

        assert!(!roster.is_closing());
        roster.begin_close();
        assert!(roster.is_closing());
    }
}
