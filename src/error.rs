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

use std::io;

use crate::Role;

/// Errors happening during connection setup and socket I/O.
///
/// Only [`crate::Netstack::open`] failures propagate to the caller; runtime I/O errors are
/// absorbed by the asynchronous workers, which log them and evict connections which turn out to
/// be dead.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// invalid connection type flags {0:#04x}
    InvalidType(u8),

    /// port {0} is outside the dynamic/private range (49152-65535)
    InvalidPort(u16),

    /// a host address is required for client connections
    HostRequired,

    /// unable to resolve host address "{0}"
    Resolve(String),

    /// OS-level socket operation failure: {0}
    #[from]
    Socket(io::Error),

    /// message of {0} bytes does not fit into the {1}-byte connection bound
    MessageTooLong(usize, usize),

    /// remote peer has closed the connection
    PeerClosed,

    /// the operation requires a {0} connection
    WrongRole(Role),
}
