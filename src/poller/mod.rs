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

//! Poll set: the set of socket descriptors the reader worker multiplexes on.
//!
//! Two back-ends implement the same [`Poll`] trait: [`poll::Poller`], dispatching to `poll(2)`
//! over an array of descriptors kept sorted by descriptor value, and [`select::Poller`],
//! dispatching to `select(2)` over a descriptor bitmap for hosts which lack the former.

pub mod poll;
pub mod select;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness bits reported for a registered descriptor by the last [`Poll::wait`].
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct Readiness {
    /// Normal-priority data can be read from the descriptor.
    pub readable: bool,
    /// Out-of-band data can be read from the descriptor.
    pub priority: bool,
}

impl Readiness {
    /// Whether any form of inbound data is pending on the descriptor.
    pub fn any(self) -> bool { self.readable || self.priority }
}

impl Display for Readiness {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.readable, self.priority) {
            (false, false) => f.write_str("none"),
            (true, false) => f.write_str("readable"),
            (false, true) => f.write_str("oob"),
            (true, true) => f.write_str("readable+oob"),
        }
    }
}

/// Manager for a set of socket descriptors multiplexed with a single blocking wait.
///
/// Implementations are plain single-threaded state machines; thread safety is layered on top by
/// the [`crate::Netstack`], which serialises [`Poll::wait`] in the reader worker and defers
/// registrations made by other threads to the top of the next wait.
pub trait Poll: Send {
    /// Subscribes a descriptor to inbound readiness events.
    ///
    /// Registering an already-subscribed descriptor is a no-op: UDP pseudo-client connections
    /// share their server's descriptor.
    fn register(&mut self, fd: RawFd);

    /// Removes a descriptor from the set. Unknown descriptors are ignored.
    fn unregister(&mut self, fd: RawFd);

    /// Blocks until at least one subscribed descriptor becomes ready, or the timeout expires.
    ///
    /// # Returns
    ///
    /// Number of ready descriptors; zero on timeout. Per-descriptor readiness is retained and
    /// can be queried with [`Poll::readiness`] until the next wait.
    fn wait(&mut self, timeout: Duration) -> io::Result<usize>;

    /// Readiness reported for the given descriptor by the last [`Poll::wait`].
    fn readiness(&self, fd: RawFd) -> Readiness;

    /// All currently subscribed descriptors.
    fn descriptors(&self) -> Vec<RawFd>;

    /// Number of subscribed descriptors.
    fn len(&self) -> usize;

    /// Whether no descriptor is currently subscribed.
    fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Poll set back-end used when no specific one is requested.
#[cfg(not(feature = "legacy"))]
pub type DefaultPoller = poll::Poller;
/// Poll set back-end used when no specific one is requested.
#[cfg(feature = "legacy")]
pub type DefaultPoller = select::Poller;
