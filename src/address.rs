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

#[cfg(feature = "legacy")]
use std::net::Ipv4Addr;
#[cfg(not(feature = "legacy"))]
use std::net::{Ipv6Addr, ToSocketAddrs};
use std::net::{IpAddr, SocketAddr};

use crate::{Error, Role};

/// Resolves a host string and port into a socket address.
///
/// A missing host is accepted for servers only and resolves to the unspecified ("any") address.
/// Resolution prefers IPv6 results and falls back to IPv4 ones.
#[cfg(not(feature = "legacy"))]
pub(crate) fn resolve(host: Option<&str>, port: u16, role: Role) -> Result<SocketAddr, Error> {
    let host = match host {
        Some(host) => host,
        None if role == Role::Server => {
            return Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));
        }
        None => return Err(Error::HostRequired),
    };

    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::Resolve(host.to_owned()))?
        .collect::<Vec<_>>();

    candidates
        .iter()
        .find(|address| address.is_ipv6())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| Error::Resolve(host.to_owned()))
}

/// Resolves a host string and port into a socket address.
///
/// Legacy hosts understand IPv4 literals only; `"255.255.255.255"` maps to the broadcast
/// address, and a missing host is accepted for servers only and maps to the "any" address.
#[cfg(feature = "legacy")]
pub(crate) fn resolve(host: Option<&str>, port: u16, role: Role) -> Result<SocketAddr, Error> {
    let ip = match host {
        None if role == Role::Server => Ipv4Addr::UNSPECIFIED,
        None => return Err(Error::HostRequired),
        Some("255.255.255.255") => Ipv4Addr::BROADCAST,
        Some(host) => host.parse::<Ipv4Addr>().map_err(|_| Error::Resolve(host.to_owned()))?,
    };
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Formats a socket address as `"<numeric-host>/<numeric-port>"`; IPv6 hosts use their colon
/// form.
pub(crate) fn format_address(address: SocketAddr) -> String {
    format!("{}/{}", address.ip(), address.port())
}
