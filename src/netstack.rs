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

//! Synchronous IP layer: socket creation and configuration, the four role × transport
//! communication variants and the poll set they are multiplexed on.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::collections::HashMap;
use std::io;
use std::mem::MaybeUninit;
#[cfg(not(feature = "legacy"))]
use std::net::IpAddr;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::connection::{Endpoint, Peer, Roster};
use crate::poller::{DefaultPoller, Poll, Readiness};
use crate::{
    address, Connection, ConnectionType, Error, Message, Role, Transport, MAX_MESSAGE, PORT_MIN,
};

/// A registration change requested while a wait may be in flight.
enum PollOp {
    Register(RawFd),
    Unregister(RawFd),
}

/// Concurrency wrapper around a [`Poll`] back-end.
///
/// The back-end itself is single-threaded; waits are serialised by the single reader worker,
/// while `open`/`close` running on application threads only append to the pending-operation
/// queue, which the next wait applies. Readiness is republished into a snapshot map after every
/// wait so that queries never contend with a blocking wait.
struct PollSet<P: Poll> {
    backend: Mutex<P>,
    pending: Mutex<Vec<PollOp>>,
    ready: Mutex<HashMap<RawFd, Readiness>>,
}

impl<P: Poll> PollSet<P> {
    fn new(backend: P) -> Self {
        PollSet {
            backend: Mutex::new(backend),
            pending: Mutex::new(empty!()),
            ready: Mutex::new(empty!()),
        }
    }

    fn insert(&self, fd: RawFd) {
        self.pending.lock().expect("poll set lock poisoned").push(PollOp::Register(fd));
    }

    fn remove(&self, fd: RawFd) {
        self.pending.lock().expect("poll set lock poisoned").push(PollOp::Unregister(fd));
        self.ready.lock().expect("poll set lock poisoned").remove(&fd);
    }

    fn wait(&self, timeout: Duration) -> io::Result<usize> {
        let mut backend = self.backend.lock().expect("poll set lock poisoned");
        for op in self.pending.lock().expect("poll set lock poisoned").drain(..) {
            match op {
                PollOp::Register(fd) => backend.register(fd),
                PollOp::Unregister(fd) => backend.unregister(fd),
            }
        }

        // Blocking call
        let result = backend.wait(timeout);

        let mut ready = self.ready.lock().expect("poll set lock poisoned");
        ready.clear();
        if let Ok(count) = &result {
            if *count > 0 {
                for fd in backend.descriptors() {
                    let bits = backend.readiness(fd);
                    if bits.any() {
                        ready.insert(fd, bits);
                    }
                }
            }
        }
        result
    }

    fn readiness(&self, fd: RawFd) -> Readiness {
        self.ready.lock().expect("poll set lock poisoned").get(&fd).copied().unwrap_or_default()
    }
}

/// The synchronous layer: owns the poll set and performs every socket operation.
///
/// All connection handles created by [`Netstack::open`] and [`Netstack::accept`] belong to the
/// stack they were created on and must be returned to it via [`Netstack::close`].
pub struct Netstack<P: Poll = DefaultPoller> {
    polls: PollSet<P>,
}

impl Netstack {
    /// Constructs a stack over the default poll back-end.
    pub fn new() -> Self { Netstack::with_poller(DefaultPoller::new()) }
}

impl Default for Netstack {
    fn default() -> Self { Netstack::new() }
}

impl<P: Poll> Netstack<P> {
    /// Constructs a stack over the given poll back-end.
    pub fn with_poller(poller: P) -> Self { Netstack { polls: PollSet::new(poller) } }

    /// Opens a new connection of the given type.
    ///
    /// The port must lie in the dynamic/private range (≥ 49152). The host may be `None` only
    /// for servers, which then bind to the "any" address; clients require an explicit remote.
    /// The returned connection has its descriptor registered in the poll set, is non-blocking,
    /// and carries the default message length of [`MAX_MESSAGE`] bytes.
    pub fn open(
        &self,
        ty: ConnectionType,
        host: Option<&str>,
        port: u16,
    ) -> Result<Connection, Error> {
        if port < PORT_MIN {
            return Err(Error::InvalidPort(port));
        }
        let address = address::resolve(host, port, ty.role)?;

        let socket = create_socket(ty.transport, address)?;
        match (ty.transport, ty.role) {
            (Transport::Tcp, Role::Server) => bind_tcp_server(&socket, address)?,
            (Transport::Udp, Role::Server) => bind_udp_server(&socket, address)?,
            (Transport::Tcp, Role::Client) => connect_tcp_client(&socket, address)?,
            (Transport::Udp, Role::Client) => connect_udp_client(&socket, address)?,
        }
        socket.set_nonblocking(true)?;

        let endpoint = match (ty.transport, ty.role) {
            (Transport::Tcp, Role::Server) => Endpoint::TcpServer { roster: Roster::new() },
            (Transport::Udp, Role::Server) => Endpoint::UdpServer { roster: Roster::new() },
            (Transport::Tcp, Role::Client) => Endpoint::TcpClient { roster: None },
            (Transport::Udp, Role::Client) => Endpoint::UdpClient { roster: None },
        };

        let socket = Arc::new(socket);
        self.polls.insert(socket.as_raw_fd());

        #[cfg(feature = "log")]
        log::debug!(
            target: "netstack",
            "Opened {} {} connection on {} (fd={})",
            ty.transport, ty.role, address::format_address(address), socket.as_raw_fd()
        );

        Ok(Connection {
            socket,
            address,
            message_length: MAX_MESSAGE,
            alive: true,
            endpoint,
        })
    }

    /// Blocks until a network event (inbound data or a pending accept) is available on any
    /// registered descriptor, or the timeout expires.
    ///
    /// # Returns
    ///
    /// Number of descriptors with events; zero on timeout or an OS-level error (which is
    /// logged).
    pub fn wait_event(&self, timeout: Duration) -> usize {
        match self.polls.wait(timeout) {
            Ok(count) => count,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(target: "netstack", "Error waiting for socket events: {err}");
                0
            }
        }
    }

    /// Whether the last [`Netstack::wait_event`] reported inbound data (messages for clients,
    /// pending clients for servers) on the connection's descriptor.
    pub fn is_data_available(&self, connection: &Connection) -> bool {
        connection.alive && self.polls.readiness(connection.as_raw_fd()).any()
    }

    /// Receives one message on a client-role connection.
    ///
    /// Returns `None` when no message destined to this connection is pending, when the remote
    /// has closed, or on a transient receive error (which is logged and dropped).
    pub fn receive(&self, connection: &mut Connection) -> Option<Message> {
        match (connection.transport(), connection.role()) {
            (Transport::Tcp, Role::Client) => self.receive_tcp(connection),
            (Transport::Udp, Role::Client) => self.receive_udp(connection),
            (_, Role::Server) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "netstack",
                    "Cannot receive on connection {}: {}",
                    connection.address_string(),
                    Error::WrongRole(Role::Client)
                );
                None
            }
        }
    }

    fn receive_tcp(&self, connection: &mut Connection) -> Option<Message> {
        if !connection.alive {
            return None;
        }
        let bound = connection.message_length;
        let mut buf = [0u8; MAX_MESSAGE];
        match recv(&connection.socket, &mut buf[..bound]) {
            // Zero-byte read: orderly shutdown on the remote side
            Ok(0) => {
                #[cfg(feature = "log")]
                log::debug!(
                    target: "netstack",
                    "Remote side of socket {} closed the connection", connection.as_raw_fd()
                );
                connection.alive = false;
                self.polls.remove(connection.as_raw_fd());
                None
            }
            Ok(len) => Some(Message::new(&buf[..len])),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "netstack",
                    "Error reading from socket {}: {err}", connection.as_raw_fd()
                );
                None
            }
        }
    }

    fn receive_udp(&self, connection: &mut Connection) -> Option<Message> {
        let bound = connection.message_length;
        let mut buf = [0u8; MAX_MESSAGE];
        let source = match peek_source(&connection.socket, &mut buf[..bound]) {
            Ok((_, source)) => source,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "netstack",
                    "Error reading from socket {}: {err}", connection.as_raw_fd()
                );
                return None;
            }
        };

        // Datagrams from other remotes stay queued for the connection owning that peer; a
        // multicast remote accepts any source, since group traffic never carries the group as
        // its source address.
        if source != connection.address && !connection.address.ip().is_multicast() {
            return None;
        }

        match recv(&connection.socket, &mut buf[..bound]) {
            Ok(len) => Some(Message::with_peer(&buf[..len], source)),
            Err(_) => None,
        }
    }

    /// Accepts one pending client on a server-role connection.
    ///
    /// For TCP servers this accepts a remote connection and returns it as a first-class client
    /// connection with its own descriptor, linked into the server's client list. For UDP
    /// servers it peeks the pending datagram: an unseen source address materialises a
    /// pseudo-client sharing the server's descriptor, while the datagram itself stays queued
    /// until that pseudo-client receives it.
    ///
    /// Returns `None` when nothing is pending, when the datagram source is already known, or on
    /// an accept error (which is logged).
    pub fn accept(&self, server: &Connection) -> Option<Connection> {
        match &server.endpoint {
            Endpoint::TcpServer { roster } => self.accept_tcp(server, roster),
            Endpoint::UdpServer { roster } => self.accept_udp(server, roster),
            Endpoint::TcpClient { .. } | Endpoint::UdpClient { .. } => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "netstack",
                    "Cannot accept on connection {}: {}",
                    server.address_string(),
                    Error::WrongRole(Role::Server)
                );
                None
            }
        }
    }

    fn accept_tcp(&self, server: &Connection, roster: &Arc<Roster>) -> Option<Connection> {
        let (socket, source) = match server.socket.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "netstack",
                    "Failed accepting connection on socket {}: {err}", server.as_raw_fd()
                );
                return None;
            }
        };
        let address = source.as_socket()?;
        if let Err(err) = socket.set_nonblocking(true) {
            #[cfg(feature = "log")]
            log::warn!(
                target: "netstack",
                "Failure setting accepted socket {} to non-blocking state: {err}",
                socket.as_raw_fd()
            );
        }

        let socket = Arc::new(socket);
        roster.add(Peer { socket: socket.clone(), addr: address });
        self.polls.insert(socket.as_raw_fd());

        #[cfg(feature = "log")]
        log::debug!(
            target: "netstack",
            "Accepted client {} on server {} (fd={})",
            address::format_address(address), server.address_string(), socket.as_raw_fd()
        );

        Some(Connection {
            socket,
            address,
            message_length: MAX_MESSAGE,
            alive: true,
            endpoint: Endpoint::TcpClient { roster: Some(roster.clone()) },
        })
    }

    fn accept_udp(&self, server: &Connection, roster: &Arc<Roster>) -> Option<Connection> {
        let mut buf = [0u8; MAX_MESSAGE];
        let source = match peek_source(&server.socket, &mut buf) {
            Ok((_, source)) => source,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "netstack",
                    "Error reading from socket {}: {err}", server.as_raw_fd()
                );
                return None;
            }
        };
        if roster.contains(source) {
            return None;
        }

        roster.add(Peer { socket: server.socket.clone(), addr: source });

        #[cfg(feature = "log")]
        log::debug!(
            target: "netstack",
            "Registered datagram client {} on server {} (shared fd={})",
            address::format_address(source), server.address_string(), server.as_raw_fd()
        );

        // The datagram itself is left queued on the shared descriptor for the pseudo-client's
        // own receive.
        Some(Connection {
            socket: server.socket.clone(),
            address: source,
            message_length: MAX_MESSAGE,
            alive: true,
            endpoint: Endpoint::UdpClient { roster: Some(roster.clone()) },
        })
    }

    /// Sends one message over the connection.
    ///
    /// The wire frame is exactly `message_length` bytes, zero-padded; a payload which does not
    /// fit (length + 1 exceeding the bound) is rejected with [`Error::MessageTooLong`] and
    /// nothing is sent. Server connections broadcast to every remembered client — except UDP
    /// servers bound to a multicast group, which transmit a single datagram to the group.
    ///
    /// A [`Error::PeerClosed`] or [`Error::Socket`] return means the connection is dead.
    pub fn send(&self, connection: &Connection, message: &Message) -> Result<(), Error> {
        if message.len() + 1 > connection.message_length {
            return Err(Error::MessageTooLong(message.len(), connection.message_length));
        }
        let frame = message.frame(connection.message_length);

        match &connection.endpoint {
            Endpoint::TcpClient { .. } => send_stream(connection, frame),
            Endpoint::UdpClient { .. } => {
                send_datagram(&connection.socket, connection.address, frame)
            }
            Endpoint::UdpServer { .. } if connection.address.ip().is_multicast() => {
                send_datagram(&connection.socket, connection.address, frame)
            }
            Endpoint::TcpServer { roster } => {
                for peer in roster.peers() {
                    if let Err(err) = peer.socket.send(frame) {
                        #[cfg(feature = "log")]
                        log::error!(
                            target: "netstack",
                            "Error writing to client socket {}: {err}", peer.socket.as_raw_fd()
                        );
                    }
                }
                Ok(())
            }
            Endpoint::UdpServer { roster } => {
                for peer in roster.peers() {
                    if let Err(err) = peer.socket.send_to(frame, &SockAddr::from(peer.addr)) {
                        #[cfg(feature = "log")]
                        log::error!(
                            target: "netstack",
                            "Error writing to datagram client {}: {err}",
                            address::format_address(peer.addr)
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Closes the connection, removing its descriptor from the poll set unless another
    /// connection still shares it.
    ///
    /// A UDP server closed while pseudo-clients share its descriptor defers the descriptor
    /// release to the last departing pseudo-client; callers must close the clients to reclaim
    /// it.
    pub fn close(&self, connection: Connection) {
        let fd = connection.as_raw_fd();
        #[cfg(feature = "log")]
        log::debug!(
            target: "netstack",
            "Closing {} {} connection on {} (fd={fd})",
            connection.transport(), connection.role(), connection.address_string()
        );

        match connection.endpoint {
            Endpoint::TcpServer { roster: _ } => {
                let _ = connection.socket.shutdown(Shutdown::Both);
                self.polls.remove(fd);
            }
            Endpoint::TcpClient { roster } => {
                if let Some(roster) = roster {
                    roster.remove(connection.address);
                }
                let _ = connection.socket.shutdown(Shutdown::Both);
                self.polls.remove(fd);
            }
            Endpoint::UdpServer { roster } => {
                if roster.count() == 0 {
                    self.polls.remove(fd);
                } else {
                    #[cfg(feature = "log")]
                    log::debug!(
                        target: "netstack",
                        "Deferring release of shared fd={fd} to {} remaining datagram clients",
                        roster.count()
                    );
                    roster.begin_close();
                }
            }
            Endpoint::UdpClient { roster } => match roster {
                None => self.polls.remove(fd),
                Some(roster) => {
                    if roster.remove(connection.address) == 0 && roster.is_closing() {
                        self.polls.remove(fd);
                    }
                }
            },
        }
    }
}

fn create_socket(transport: Transport, address: SocketAddr) -> Result<Socket, Error> {
    let domain = match address {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let (ty, protocol) = match transport {
        Transport::Tcp => (Type::STREAM, Protocol::TCP),
        Transport::Udp => (Type::DGRAM, Protocol::UDP),
    };
    let socket = Socket::new(domain, ty, Some(protocol))?;
    // Allow sockets to be bound to a local port in TIME_WAIT
    socket.set_reuse_address(true)?;
    Ok(socket)
}

fn bind_server(socket: &Socket, address: SocketAddr) -> Result<(), Error> {
    if address.is_ipv6() {
        // Let IPv6 servers accept IPv4-mapped clients
        socket.set_only_v6(false)?;
    }
    socket.bind(&SockAddr::from(address))?;
    Ok(())
}

fn bind_tcp_server(socket: &Socket, address: SocketAddr) -> Result<(), Error> {
    const BACKLOG: i32 = 20;

    bind_server(socket, address)?;
    socket.listen(BACKLOG)?;
    Ok(())
}

fn bind_udp_server(socket: &Socket, address: SocketAddr) -> Result<(), Error> {
    bind_server(socket, address)?;

    #[cfg(not(feature = "legacy"))]
    {
        const MULTICAST_HOPS: u32 = 255;

        match address {
            SocketAddr::V6(_) => {
                socket.set_multicast_hops_v6(MULTICAST_HOPS)?;
                // Interface 0 means the default one
                socket.set_multicast_if_v6(0)?;
            }
            SocketAddr::V4(_) => {
                socket.set_multicast_ttl_v4(MULTICAST_HOPS)?;
                socket.set_multicast_if_v4(&Ipv4Addr::UNSPECIFIED)?;
            }
        }
    }
    #[cfg(feature = "legacy")]
    socket.set_broadcast(true)?;

    Ok(())
}

fn connect_tcp_client(socket: &Socket, address: SocketAddr) -> Result<(), Error> {
    socket.connect(&SockAddr::from(address))?;
    Ok(())
}

fn connect_udp_client(socket: &Socket, address: SocketAddr) -> Result<(), Error> {
    // Multicast listeners must share the group port for group traffic to reach them; unicast
    // clients take an ephemeral port.
    let local_port = if address.ip().is_multicast() { address.port() } else { 0 };
    let local = match address {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, local_port)),
    };
    socket.bind(&SockAddr::from(local))?;

    #[cfg(not(feature = "legacy"))]
    match address.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?
        }
        IpAddr::V6(group) if group.is_multicast() => socket.join_multicast_v6(&group, 0)?,
        _ => {}
    }

    Ok(())
}

fn send_stream(connection: &Connection, frame: &[u8]) -> Result<(), Error> {
    if !connection.alive {
        return Err(Error::PeerClosed);
    }
    match connection.socket.send(frame) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            #[cfg(feature = "log")]
            log::warn!(
                target: "netstack",
                "Send on socket {} would block, dropping message", connection.as_raw_fd()
            );
            Ok(())
        }
        Err(err) => {
            #[cfg(feature = "log")]
            log::error!(
                target: "netstack",
                "Error writing to socket {}: {err}", connection.as_raw_fd()
            );
            Err(err.into())
        }
    }
}

fn send_datagram(socket: &Socket, address: SocketAddr, frame: &[u8]) -> Result<(), Error> {
    match socket.send_to(frame, &SockAddr::from(address)) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            #[cfg(feature = "log")]
            log::warn!(
                target: "netstack",
                "Send on socket {} would block, dropping message", socket.as_raw_fd()
            );
            Ok(())
        }
        Err(err) => {
            #[cfg(feature = "log")]
            log::error!(
                target: "netstack",
                "Error writing to socket {}: {err}", socket.as_raw_fd()
            );
            Err(err.into())
        }
    }
}

fn recv(socket: &Socket, buf: &mut [u8]) -> io::Result<usize> { socket.recv(uninit(buf)) }

fn peek_source(socket: &Socket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    let (len, source) = socket.peek_from(uninit(buf))?;
    let source =
        source.as_socket().ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))?;
    Ok((len, source))
}

// The socket receive calls take possibly-uninitialized buffers; ours are always zeroed.
fn uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tcp_server() -> ConnectionType {
        ConnectionType { transport: Transport::Tcp, role: Role::Server }
    }
    fn tcp_client() -> ConnectionType {
        ConnectionType { transport: Transport::Tcp, role: Role::Client }
    }
    fn udp_client() -> ConnectionType {
        ConnectionType { transport: Transport::Udp, role: Role::Client }
    }

    #[test]
    fn rejects_out_of_range_port() {
        let stack = Netstack::new();
        assert!(matches!(
            stack.open(tcp_server(), Some("127.0.0.1"), 8080),
            Err(Error::InvalidPort(8080))
        ));
    }

    #[test]
    fn client_requires_host() {
        let stack = Netstack::new();
        assert!(matches!(
            stack.open(tcp_client(), None, 49610),
            Err(Error::HostRequired)
        ));
    }

    #[test]
    fn tcp_connect_accept_receive() {
        let stack = Netstack::new();
        let server = stack.open(tcp_server(), Some("127.0.0.1"), 49611).unwrap();
        assert!(server.is_server());
        assert_eq!(server.clients_number(), 0);

        let client = stack.open(tcp_client(), Some("127.0.0.1"), 49611).unwrap();
        assert!(!client.is_server());
        assert_eq!(client.address_string(), "127.0.0.1/49611");

        assert!(stack.wait_event(Duration::from_secs(2)) >= 1);
        assert!(stack.is_data_available(&server));
        let mut child = stack.accept(&server).expect("pending client");
        assert_eq!(server.clients_number(), 1);
        assert_eq!(child.clients_number(), 1);

        stack.send(&client, &Message::new(b"hello")).unwrap();
        assert!(stack.wait_event(Duration::from_secs(2)) >= 1);
        let received = stack.receive(&mut child).expect("inbound message");
        assert_eq!(received.len(), MAX_MESSAGE);
        assert_eq!(&received.payload()[..5], b"hello");

        stack.close(client);
        stack.close(child);
        assert_eq!(server.clients_number(), 0);
        stack.close(server);
    }

    #[test]
    fn udp_client_discards_foreign_sources() {
        let stack = Netstack::new();
        let peer = std::net::UdpSocket::bind("127.0.0.1:49612").unwrap();

        let mut client = stack.open(udp_client(), Some("127.0.0.1"), 49612).unwrap();
        stack.send(&client, &Message::new(b"ping")).unwrap();

        let mut buf = [0u8; MAX_MESSAGE];
        let (len, client_addr) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(len, MAX_MESSAGE);
        assert_eq!(&buf[..4], b"ping");

        // A datagram from the configured remote is consumed
        peer.send_to(b"pong", client_addr).unwrap();
        assert!(stack.wait_event(Duration::from_secs(2)) >= 1);
        let received = stack.receive(&mut client).expect("matching datagram");
        assert_eq!(received.payload(), b"pong");
        assert_eq!(received.peer(), Some("127.0.0.1:49612".parse().unwrap()));

        // A datagram from a stranger is not
        let stranger = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        stranger.send_to(b"noise", client_addr).unwrap();
        assert!(stack.wait_event(Duration::from_secs(2)) >= 1);
        assert!(stack.receive(&mut client).is_none());

        stack.close(client);
    }

    #[test]
    fn message_length_is_enforced() {
        let stack = Netstack::new();
        let mut client = stack.open(udp_client(), Some("127.0.0.1"), 49613).unwrap();

        assert_eq!(client.set_message_length(0), 1);
        assert_eq!(client.set_message_length(4096), MAX_MESSAGE);
        assert_eq!(client.set_message_length(8), 8);

        assert!(matches!(
            stack.send(&client, &Message::new(b"overlong")),
            Err(Error::MessageTooLong(8, 8))
        ));
        stack.send(&client, &Message::new(b"fits-ok")).unwrap();

        stack.close(client);
    }

    #[test]
    fn legacy_poller_backend_roundtrip() {
        use crate::poller::select;

        let stack = Netstack::with_poller(select::Poller::new());
        let server = stack.open(tcp_server(), Some("127.0.0.1"), 49616).unwrap();
        let client = stack.open(tcp_client(), Some("127.0.0.1"), 49616).unwrap();

        assert!(stack.wait_event(Duration::from_secs(2)) >= 1);
        assert!(stack.is_data_available(&server));
        let mut child = stack.accept(&server).expect("pending client");

        stack.send(&client, &Message::new(b"legacy")).unwrap();
        assert!(stack.wait_event(Duration::from_secs(2)) >= 1);
        let received = stack.receive(&mut child).expect("inbound message");
        assert_eq!(&received.payload()[..6], b"legacy");

        stack.close(client);
        stack.close(child);
        stack.close(server);
    }

    #[test]
    fn wrong_role_dispatch() {
        let stack = Netstack::new();
        let mut server = stack.open(tcp_server(), Some("127.0.0.1"), 49614).unwrap();
        let client = stack.open(udp_client(), Some("127.0.0.1"), 49615).unwrap();

        assert!(stack.receive(&mut server).is_none());
        assert!(stack.accept(&client).is_none());

        stack.close(client);
        stack.close(server);
    }
}
