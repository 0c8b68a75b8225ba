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
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::poller::{Poll, Readiness};

/// Sentinel descriptor value which sorts after every real descriptor.
const FD_REMOVED: RawFd = RawFd::MAX;

/// Poll set back-end dispatching to `poll(2)`.
///
/// Entries are kept in an array sorted by descriptor value, so that lookup, insertion and
/// removal are all binary searches. Every entry subscribes to both normal and out-of-band
/// readable events.
pub struct Poller {
    entries: Vec<libc::pollfd>,
}

impl Poller {
    /// Constructs an empty poll set.
    pub fn new() -> Self { Self { entries: empty!() } }

    fn position(&self, fd: RawFd) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&fd, |entry| entry.fd)
    }
}

impl Default for Poller {
    fn default() -> Self { Poller::new() }
}

impl Poll for Poller {
    fn register(&mut self, fd: RawFd) {
        if let Err(index) = self.position(fd) {
            self.entries.insert(index, libc::pollfd {
                fd,
                events: libc::POLLRDNORM | libc::POLLRDBAND,
                revents: 0,
            });
        }
    }

    fn unregister(&mut self, fd: RawFd) {
        if let Ok(index) = self.position(fd) {
            // Mark the entry with the sentinel so it sinks to the end on re-sort, then shrink
            // over it.
            self.entries[index].fd = FD_REMOVED;
            self.entries.sort_unstable_by_key(|entry| entry.fd);
            self.entries.pop();
        }
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        for entry in &mut self.entries {
            entry.revents = 0;
        }

        // Blocking call
        let count = unsafe {
            libc::poll(
                self.entries.as_mut_ptr(),
                self.entries.len() as libc::nfds_t,
                timeout.as_millis() as libc::c_int,
            )
        };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(count as usize)
    }

    fn readiness(&self, fd: RawFd) -> Readiness {
        let Ok(index) = self.position(fd) else {
            return Readiness::default();
        };
        let revents = self.entries[index].revents;
        Readiness {
            readable: revents & libc::POLLRDNORM != 0,
            priority: revents & libc::POLLRDBAND != 0,
        }
    }

    fn descriptors(&self) -> Vec<RawFd> { self.entries.iter().map(|entry| entry.fd).collect() }

    fn len(&self) -> usize { self.entries.len() }
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn sorted_registration() {
        let mut poller = Poller::new();
        poller.register(7);
        poller.register(3);
        poller.register(5);
        poller.register(3);
        assert_eq!(poller.descriptors(), vec![3, 5, 7]);
        assert_eq!(poller.len(), 3);
    }

    #[test]
    fn sentinel_removal() {
        let mut poller = Poller::new();
        poller.register(3);
        poller.register(5);
        poller.register(7);
        poller.unregister(5);
        assert_eq!(poller.descriptors(), vec![3, 7]);
        poller.unregister(5);
        assert_eq!(poller.len(), 2);
    }

    #[test]
    fn wait_reports_readable() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let fd = reader.as_raw_fd();

        let mut poller = Poller::new();
        poller.register(fd);

        assert_eq!(poller.wait(Duration::from_millis(10)).unwrap(), 0);
        assert!(!poller.readiness(fd).any());

        writer.write_all(b"ping").unwrap();
        assert_eq!(poller.wait(Duration::from_millis(1000)).unwrap(), 1);
        assert!(poller.readiness(fd).readable);
    }

    #[test]
    fn unknown_descriptor_is_never_ready() {
        let poller = Poller::new();
        assert!(!poller.readiness(42).any());
    }
}
