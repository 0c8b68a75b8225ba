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

//! Asynchronous facade: the registry of live connections, each wrapping one synchronous
//! connection plus a bounded read queue and a bounded write queue, and the two background
//! workers (reader and writer) driving all I/O.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel as chan;

use crate::netstack::Netstack;
use crate::poller::{DefaultPoller, Poll};
use crate::queue::{MessageQueue, Mode};
use crate::registry::{ConnectionId, Registry};
use crate::{Connection, ConnectionType, Error, Message, Role, QUEUE_MAX_ITEMS, WAIT_TIME};

/// Cadence of the writer worker's queue-draining passes.
const WRITE_PACE: Duration = Duration::from_millis(1000);

/// Inbound queue of an asynchronous connection; its content depends on the connection role.
enum ReadQueue {
    /// Servers queue the identifiers of freshly accepted client connections.
    Clients(MessageQueue<ConnectionId>),
    /// Clients queue inbound messages.
    Messages(MessageQueue<Message>),
}

impl ReadQueue {
    fn is_full(&self) -> bool {
        match self {
            ReadQueue::Clients(queue) => queue.count() >= QUEUE_MAX_ITEMS,
            ReadQueue::Messages(queue) => queue.count() >= QUEUE_MAX_ITEMS,
        }
    }
}

/// A synchronous connection wrapped for asynchronous use: the connection itself plus its read
/// and write queues.
struct AsyncConnection {
    /// Taken out on close, after which only the queues remain until the entry is reclaimed.
    base: Option<Connection>,
    read_queue: ReadQueue,
    write_queue: MessageQueue<Message>,
}

impl AsyncConnection {
    fn with(base: Connection) -> Self {
        let read_queue = if base.is_server() {
            ReadQueue::Clients(MessageQueue::new(QUEUE_MAX_ITEMS))
        } else {
            ReadQueue::Messages(MessageQueue::new(QUEUE_MAX_ITEMS))
        };
        AsyncConnection {
            base: Some(base),
            read_queue,
            write_queue: MessageQueue::new(QUEUE_MAX_ITEMS),
        }
    }
}

/// One of the two background workers, joined with a bounded wait on engine shutdown.
struct Worker {
    thread: thread::JoinHandle<()>,
    exited: chan::Receiver<()>,
}

impl Worker {
    fn spawn(name: &'static str, work: impl FnOnce() + Send + 'static) -> Self {
        let (exit_send, exited) = chan::bounded(1);
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                work();
                // Receiver learns about the exit either from this send or from the disconnect
                let _ = exit_send.send(());
            })
            .expect("unable to spawn worker thread");
        Worker { thread, exited }
    }

    /// Waits for the worker to exit within the timeout; a worker missing the deadline is
    /// detached and logged.
    fn join(self, timeout: Duration) {
        match self.exited.recv_timeout(timeout) {
            Err(chan::RecvTimeoutError::Timeout) => {
                #[cfg(feature = "log")]
                log::warn!(
                    target: "async-ip",
                    "Worker {} missed the shutdown deadline, detaching it",
                    self.thread.thread().name().unwrap_or("worker")
                );
            }
            _ => {
                let _ = self.thread.join();
            }
        }
    }
}

/// The engine running behind the facade while at least one connection is alive: the connection
/// registry, the two workers and their shared cancellation flag.
struct Engine {
    registry: Arc<Registry<AsyncConnection>>,
    running: Arc<AtomicBool>,
    reader: Worker,
    writer: Worker,
}

impl Engine {
    fn start<P: Poll + 'static>(stack: Arc<Netstack<P>>) -> Self {
        let registry = Arc::new(Registry::new());
        let running = Arc::new(AtomicBool::new(true));

        #[cfg(feature = "log")]
        log::debug!(target: "async-ip", "Starting reader and writer workers");

        let reader = Worker::spawn("ip-reader", {
            let stack = stack.clone();
            let registry = registry.clone();
            let running = running.clone();
            move || reader_loop(stack, registry, running)
        });
        let writer = Worker::spawn("ip-writer", {
            let registry = registry.clone();
            let running = running.clone();
            move || writer_loop(stack, registry, running)
        });

        Engine { registry, running, reader, writer }
    }

    fn stop(self) {
        #[cfg(feature = "log")]
        log::debug!(target: "async-ip", "Stopping reader and writer workers");

        self.running.store(false, Ordering::Release);
        self.reader.join(WAIT_TIME);
        self.writer.join(WAIT_TIME);
    }
}

/// Asynchronous IP connection facade.
///
/// Each open connection owns a bounded read queue and a bounded write queue; two background
/// workers drive all socket I/O, so none of the facade operations ever blocks on the network.
/// The workers are started by the first successful [`AsyncIp::open_connection`] and stopped,
/// with a bounded join, by the [`AsyncIp::close_connection`] which empties the registry.
///
/// Connections are addressed by the opaque [`ConnectionId`] assigned on open; identifiers are
/// never reused, and every operation on an unknown identifier is a no-op reported through its
/// return value.
pub struct AsyncIp<P: Poll = DefaultPoller> {
    stack: Arc<Netstack<P>>,
    engine: Mutex<Option<Engine>>,
}

impl AsyncIp {
    /// Constructs a facade over the default poll back-end.
    pub fn new() -> Self {
        AsyncIp {
            stack: Arc::new(Netstack::new()),
            engine: Mutex::new(None),
        }
    }
}

impl Default for AsyncIp {
    fn default() -> Self { AsyncIp::new() }
}

impl<P: Poll + 'static> AsyncIp<P> {
    /// Constructs a facade over a stack with a specific poll back-end.
    pub fn with_stack(stack: Netstack<P>) -> Self {
        AsyncIp {
            stack: Arc::new(stack),
            engine: Mutex::new(None),
        }
    }

    /// Opens a new connection and registers it for asynchronous use.
    ///
    /// The type byte combines one transport flag ([`ConnectionType::TCP`] or
    /// [`ConnectionType::UDP`]) with one role flag ([`ConnectionType::SERVER`] or
    /// [`ConnectionType::CLIENT`]). On the first successful open the two workers are started.
    ///
    /// # Returns
    ///
    /// Identifier of the new connection, or `None` on any failure (which is logged).
    pub fn open_connection(
        &self,
        connection_type: u8,
        host: Option<&str>,
        port: u16,
    ) -> Option<ConnectionId> {
        let ty = match ConnectionType::from_byte(connection_type) {
            Ok(ty) => ty,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(target: "async-ip", "{err}");
                return None;
            }
        };

        #[cfg(feature = "log")]
        log::debug!(
            target: "async-ip",
            "Opening {} {} connection to host {} on port {port}",
            ty.transport, ty.role, host.unwrap_or("(any)")
        );

        let base = match self.stack.open(ty, host, port) {
            Ok(base) => base,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "async-ip",
                    "Failed to open connection to host {} on port {port}: {err}",
                    host.unwrap_or("(any)")
                );
                return None;
            }
        };

        let mut slot = self.engine.lock().expect("engine lock poisoned");
        let engine = slot.get_or_insert_with(|| Engine::start(self.stack.clone()));
        let id = engine.registry.insert(AsyncConnection::with(base));

        #[cfg(feature = "log")]
        log::debug!(target: "async-ip", "Connection {id} registered");

        Some(id)
    }

    /// Closes the connection and discards its queues; idempotent on unknown identifiers.
    ///
    /// When the last connection is closed the registry is discarded and both workers are
    /// joined, each within a [`WAIT_TIME`] bound.
    pub fn close_connection(&self, id: ConnectionId) {
        let mut slot = self.engine.lock().expect("engine lock poisoned");
        let Some(engine) = slot.as_mut() else {
            return;
        };
        let Some(entry) = engine.registry.acquire(id) else {
            return;
        };

        {
            let mut connection = entry.lock().expect("connection lock poisoned");
            if let Some(base) = connection.base.take() {
                self.stack.close(base);
            }
        }
        engine.registry.remove(id);

        #[cfg(feature = "log")]
        log::debug!(target: "async-ip", "Connection {id} closed");

        if engine.registry.is_empty() {
            let engine = slot.take().expect("engine presence checked above");
            engine.stop();
        }
    }

    /// Pops the oldest inbound message queued on a client connection.
    ///
    /// Returns `None` when the queue is empty, the identifier is unknown, or the connection is
    /// a server (which is logged).
    pub fn read_message(&self, id: ConnectionId) -> Option<Vec<u8>> {
        let entry = self.acquire(id)?;
        let connection = entry.lock().expect("connection lock poisoned");
        match &connection.read_queue {
            ReadQueue::Messages(queue) if queue.count() > 0 => {
                queue.dequeue(Mode::Wait).map(|message| message.payload().to_vec())
            }
            ReadQueue::Messages(_) => None,
            ReadQueue::Clients(_) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "async-ip",
                    "Cannot read from connection {id}: {}", Error::WrongRole(Role::Client)
                );
                None
            }
        }
    }

    /// Pushes a message onto the connection's write queue; the writer worker sends it on its
    /// next pass.
    ///
    /// The enqueue never blocks: a full queue logs a warning and drops its oldest message so
    /// the freshest one survives.
    ///
    /// # Returns
    ///
    /// `false` only when no connection with the given identifier exists.
    pub fn write_message(&self, id: ConnectionId, payload: &[u8]) -> bool {
        let Some(entry) = self.acquire(id) else {
            return false;
        };
        let connection = entry.lock().expect("connection lock poisoned");
        if connection.write_queue.count() >= QUEUE_MAX_ITEMS {
            #[cfg(feature = "log")]
            log::warn!(
                target: "async-ip",
                "Connection {id} write queue is full, overwriting the oldest message"
            );
        }
        connection.write_queue.enqueue(Message::new(payload), Mode::NoWait);
        true
    }

    /// Pops the oldest accepted client identifier queued on a server connection.
    ///
    /// Returns `None` when no client is pending, the identifier is unknown, or the connection
    /// is a client (which is logged).
    pub fn get_client(&self, id: ConnectionId) -> Option<ConnectionId> {
        let entry = self.acquire(id)?;
        let connection = entry.lock().expect("connection lock poisoned");
        match &connection.read_queue {
            ReadQueue::Clients(queue) if queue.count() > 0 => queue.dequeue(Mode::Wait),
            ReadQueue::Clients(_) => None,
            ReadQueue::Messages(_) => {
                #[cfg(feature = "log")]
                log::error!(
                    target: "async-ip",
                    "Cannot take clients from connection {id}: {}",
                    Error::WrongRole(Role::Server)
                );
                None
            }
        }
    }

    /// The connection address as a `"<host>/<port>"` string, or `None` for unknown
    /// identifiers.
    pub fn get_address(&self, id: ConnectionId) -> Option<String> {
        let entry = self.acquire(id)?;
        let connection = entry.lock().expect("connection lock poisoned");
        connection.base.as_ref().map(Connection::address_string)
    }

    /// Number of connections currently registered.
    pub fn get_actives_number(&self) -> usize {
        let slot = self.engine.lock().expect("engine lock poisoned");
        slot.as_ref().map(|engine| engine.registry.len()).unwrap_or_default()
    }

    /// Number of remembered clients of a server connection; 1 for a client connection, 0 for
    /// unknown identifiers.
    pub fn get_clients_number(&self, id: ConnectionId) -> usize {
        let Some(entry) = self.acquire(id) else {
            return 0;
        };
        let connection = entry.lock().expect("connection lock poisoned");
        connection.base.as_ref().map(Connection::clients_number).unwrap_or_default()
    }

    /// Whether the connection has the server role; `false` for unknown identifiers.
    pub fn is_server(&self, id: ConnectionId) -> bool {
        let Some(entry) = self.acquire(id) else {
            return false;
        };
        let connection = entry.lock().expect("connection lock poisoned");
        connection.base.as_ref().map(Connection::is_server).unwrap_or_default()
    }

    /// Changes the connection's fixed message length, clamped to `1..=`[`crate::MAX_MESSAGE`].
    ///
    /// # Returns
    ///
    /// The actual new message length, or 0 for unknown identifiers.
    pub fn set_message_length(&self, id: ConnectionId, length: usize) -> usize {
        let Some(entry) = self.acquire(id) else {
            return 0;
        };
        let mut connection = entry.lock().expect("connection lock poisoned");
        connection
            .base
            .as_mut()
            .map(|base| base.set_message_length(length))
            .unwrap_or_default()
    }

    fn acquire(&self, id: ConnectionId) -> Option<Arc<Mutex<AsyncConnection>>> {
        let slot = self.engine.lock().expect("engine lock poisoned");
        slot.as_ref()?.registry.acquire(id)
    }
}

impl<P: Poll> Drop for AsyncIp<P> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.lock().expect("engine lock poisoned").take() {
            engine.stop();
        }
    }
}

/// Loop of the reader worker: blocks on the poll set, then lets every registered connection
/// read pending inbound data (messages for clients, new clients for servers) into its read
/// queue.
fn reader_loop<P: Poll>(
    stack: Arc<Netstack<P>>,
    registry: Arc<Registry<AsyncConnection>>,
    running: Arc<AtomicBool>,
) {
    #[cfg(feature = "log")]
    log::debug!(target: "reader", "Entering read loop");

    while running.load(Ordering::Acquire) {
        // Blocking call
        if stack.wait_event(WAIT_TIME) == 0 {
            continue;
        }
        for id in registry.ids() {
            read_to_queue(&stack, &registry, id);
        }
    }

    #[cfg(feature = "log")]
    log::debug!(target: "reader", "Read loop finished");
}

fn read_to_queue<P: Poll>(
    stack: &Netstack<P>,
    registry: &Registry<AsyncConnection>,
    id: ConnectionId,
) {
    let Some(entry) = registry.acquire(id) else {
        return;
    };
    let mut connection = entry.lock().expect("connection lock poisoned");

    // Do not proceed while the queue is full
    if connection.read_queue.is_full() {
        return;
    }
    let Some(base) = connection.base.as_mut() else {
        return;
    };
    if !stack.is_data_available(base) {
        return;
    }

    if base.is_server() {
        let Some(client) = stack.accept(base) else {
            return;
        };
        // Release the hold before re-entering the registry for the new client
        drop(connection);
        let client_id = registry.insert(AsyncConnection::with(client));

        #[cfg(feature = "log")]
        log::debug!(target: "reader", "Client {client_id} accepted on server connection {id}");

        let connection = entry.lock().expect("connection lock poisoned");
        if let ReadQueue::Clients(queue) = &connection.read_queue {
            queue.enqueue(client_id, Mode::Wait);
        }
    } else if let Some(message) = stack.receive(base) {
        #[cfg(feature = "log")]
        log::trace!(
            target: "reader",
            "Message of {} bytes received on connection {id}", message.len()
        );

        if let ReadQueue::Messages(queue) = &connection.read_queue {
            queue.enqueue(message, Mode::Wait);
        }
    }
}

/// Loop of the writer worker: periodically drains one message from every non-empty write queue
/// and sends it, evicting connections whose send reveals them dead.
fn writer_loop<P: Poll>(
    stack: Arc<Netstack<P>>,
    registry: Arc<Registry<AsyncConnection>>,
    running: Arc<AtomicBool>,
) {
    #[cfg(feature = "log")]
    log::debug!(target: "writer", "Entering write loop");

    while running.load(Ordering::Acquire) {
        for id in registry.ids() {
            write_from_queue(&stack, &registry, id);
        }
        thread::sleep(WRITE_PACE);
    }

    #[cfg(feature = "log")]
    log::debug!(target: "writer", "Write loop finished");
}

fn write_from_queue<P: Poll>(
    stack: &Netstack<P>,
    registry: &Registry<AsyncConnection>,
    id: ConnectionId,
) {
    let Some(entry) = registry.acquire(id) else {
        return;
    };
    let mut connection = entry.lock().expect("connection lock poisoned");

    // Do not proceed if the queue is empty
    if connection.write_queue.count() == 0 {
        return;
    }
    let Some(message) = connection.write_queue.dequeue(Mode::Wait) else {
        return;
    };
    let Some(base) = connection.base.as_ref() else {
        return;
    };

    match stack.send(base, &message) {
        Ok(()) => {}
        Err(err @ Error::MessageTooLong(..)) => {
            #[cfg(feature = "log")]
            log::warn!(target: "writer", "Dropping message for connection {id}: {err}");
        }
        Err(err) => {
            #[cfg(feature = "log")]
            log::error!(target: "writer", "Evicting dead connection {id}: {err}");

            let base = connection.base.take();
            drop(connection);
            registry.remove(id);
            if let Some(base) = base {
                stack.close(base);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::thread::sleep;
    use std::time::Instant;

    use super::*;
    use crate::MAX_MESSAGE;

    const TCP_SERVER: u8 = ConnectionType::TCP | ConnectionType::SERVER;
    const TCP_CLIENT: u8 = ConnectionType::TCP | ConnectionType::CLIENT;
    const UDP_SERVER: u8 = ConnectionType::UDP | ConnectionType::SERVER;
    const UDP_CLIENT: u8 = ConnectionType::UDP | ConnectionType::CLIENT;

    fn eventually<T>(mut probe: impl FnMut() -> Option<T>, deadline: Duration) -> Option<T> {
        let start = Instant::now();
        loop {
            if let Some(value) = probe() {
                return Some(value);
            }
            if start.elapsed() > deadline {
                return None;
            }
            sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn tcp_echo_roundtrip() {
        let ip = AsyncIp::new();
        let server = ip.open_connection(TCP_SERVER, Some("127.0.0.1"), 49650).unwrap();
        let client = ip.open_connection(TCP_CLIENT, Some("127.0.0.1"), 49650).unwrap();
        assert!(ip.is_server(server));
        assert!(!ip.is_server(client));

        assert!(ip.write_message(client, b"hello"));

        let child =
            eventually(|| ip.get_client(server), Duration::from_secs(5)).expect("accepted client");
        assert_eq!(ip.get_clients_number(server), 1);
        assert_eq!(ip.get_clients_number(client), 1);

        let payload = eventually(|| ip.read_message(child), Duration::from_secs(5))
            .expect("inbound message");
        assert_eq!(payload.len(), MAX_MESSAGE);
        assert_eq!(&payload[..5], b"hello");

        assert_eq!(ip.get_actives_number(), 3);
        assert_eq!(ip.get_address(server).as_deref(), Some("127.0.0.1/49650"));
        assert!(ip.get_address(child).is_some());

        for id in [client, child, server] {
            ip.close_connection(id);
        }
        assert_eq!(ip.get_actives_number(), 0);
    }

    #[test]
    fn udp_server_materialises_pseudo_clients() {
        let ip = AsyncIp::new();
        let server = ip.open_connection(UDP_SERVER, Some("127.0.0.1"), 49655).unwrap();
        let client = ip.open_connection(UDP_CLIENT, Some("127.0.0.1"), 49655).unwrap();

        assert!(ip.write_message(client, b"ping"));
        let pseudo =
            eventually(|| ip.get_client(server), Duration::from_secs(5)).expect("datagram client");
        assert!(!ip.is_server(pseudo));
        assert_eq!(ip.get_clients_number(server), 1);

        let payload = eventually(|| ip.read_message(pseudo), Duration::from_secs(5))
            .expect("inbound datagram");
        assert_eq!(&payload[..4], b"ping");

        // The same source address does not produce a second pseudo-client
        assert!(ip.write_message(client, b"ping2"));
        sleep(Duration::from_millis(1500));
        assert!(ip.get_client(server).is_none());
        assert_eq!(ip.get_clients_number(server), 1);

        ip.close_connection(pseudo);
        ip.close_connection(server);
        ip.close_connection(client);
        assert_eq!(ip.get_actives_number(), 0);
    }

    #[test]
    fn invalid_open_arguments() {
        let ip = AsyncIp::new();
        assert!(ip.open_connection(0x33, Some("127.0.0.1"), 49654).is_none());
        assert!(ip.open_connection(TCP_CLIENT, Some("127.0.0.1"), 1024).is_none());
        assert!(ip.open_connection(TCP_CLIENT, None, 49654).is_none());
        assert_eq!(ip.get_actives_number(), 0);
    }

    #[test]
    fn wrong_role_is_rejected() {
        let ip = AsyncIp::new();
        let server = ip.open_connection(TCP_SERVER, Some("127.0.0.1"), 49651).unwrap();
        let client = ip.open_connection(UDP_CLIENT, Some("127.0.0.1"), 49652).unwrap();

        assert!(ip.read_message(server).is_none());
        assert!(ip.get_client(client).is_none());

        ip.close_connection(client);
        ip.close_connection(server);
    }

    #[test]
    fn unknown_identifiers_are_reported() {
        let ip = AsyncIp::new();
        let id = ip.open_connection(UDP_CLIENT, Some("127.0.0.1"), 49653).unwrap();
        ip.close_connection(id);

        assert!(!ip.write_message(id, b"gone"));
        assert!(ip.get_address(id).is_none());
        assert_eq!(ip.get_clients_number(id), 0);
        assert_eq!(ip.set_message_length(id, 64), 0);
        ip.close_connection(id);
    }

    #[test]
    fn engine_restarts_after_teardown() {
        let ip = AsyncIp::new();
        let first = ip.open_connection(UDP_CLIENT, Some("127.0.0.1"), 49656).unwrap();
        ip.close_connection(first);
        assert_eq!(ip.get_actives_number(), 0);

        let second = ip.open_connection(UDP_CLIENT, Some("127.0.0.1"), 49657).unwrap();
        assert_eq!(ip.get_actives_number(), 1);
        ip.close_connection(second);
        assert_eq!(ip.get_actives_number(), 0);
    }

    #[test]
    fn inbound_messages_keep_order_under_backpressure() {
        let listener = TcpListener::bind("127.0.0.1:49658").unwrap();
        let ip = AsyncIp::new();
        let client = ip.open_connection(TCP_CLIENT, Some("127.0.0.1"), 49658).unwrap();
        let (mut remote, _) = listener.accept().unwrap();

        // Flood the client with more inbound frames than its read queue can hold
        for index in 0..20u8 {
            let mut frame = [0u8; MAX_MESSAGE];
            frame[0] = index;
            remote.write_all(&frame).unwrap();
        }

        let mut seen = Vec::with_capacity(20);
        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.len() < 20 && Instant::now() < deadline {
            match ip.read_message(client) {
                Some(payload) => seen.push(payload[0]),
                None => sleep(Duration::from_millis(50)),
            }
        }
        assert_eq!(seen, (0..20u8).collect::<Vec<_>>());

        ip.close_connection(client);
    }

    #[test]
    fn facade_over_select_backend() {
        use crate::poller::select;

        let ip = AsyncIp::with_stack(Netstack::with_poller(select::Poller::new()));
        let server = ip.open_connection(TCP_SERVER, Some("127.0.0.1"), 49660).unwrap();
        let client = ip.open_connection(TCP_CLIENT, Some("127.0.0.1"), 49660).unwrap();

        assert!(ip.write_message(client, b"over select"));
        let child =
            eventually(|| ip.get_client(server), Duration::from_secs(5)).expect("accepted client");
        let payload = eventually(|| ip.read_message(child), Duration::from_secs(5))
            .expect("inbound message");
        assert_eq!(&payload[..11], b"over select");

        for id in [client, child, server] {
            ip.close_connection(id);
        }
        assert_eq!(ip.get_actives_number(), 0);
    }

    #[test]
    fn peer_close_evicts_connection_on_next_write() {
        let listener = TcpListener::bind("127.0.0.1:49659").unwrap();
        let ip = AsyncIp::new();
        let client = ip.open_connection(TCP_CLIENT, Some("127.0.0.1"), 49659).unwrap();
        let (remote, _) = listener.accept().unwrap();

        // Orderly shutdown from the peer; let the reader observe the EOF before forcing a send
        drop(remote);
        sleep(Duration::from_millis(500));

        assert!(ip.write_message(client, b"into the void"));
        eventually(
            || (ip.get_actives_number() == 0).then_some(()),
            Duration::from_secs(5),
        )
        .expect("dead connection evicted");
        assert!(ip.get_address(client).is_none());
    }
}
