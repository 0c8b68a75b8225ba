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

use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{io, mem, ptr};

use crate::poller::{Poll, Readiness};

/// Poll set back-end dispatching to `select(2)`, for hosts which lack `poll(2)`.
///
/// Subscribed descriptors are kept in a bitmap together with a high-water mark one past the
/// largest subscribed descriptor. Waiting copies the bitmap into a scratch set, since `select`
/// overwrites its argument with the readiness result.
pub struct Poller {
    subscribed: libc::fd_set,
    active: libc::fd_set,
    highest: RawFd,
    count: usize,
}

impl Poller {
    /// Constructs an empty poll set.
    pub fn new() -> Self {
        let mut subscribed = unsafe { mem::zeroed::<libc::fd_set>() };
        let mut active = unsafe { mem::zeroed::<libc::fd_set>() };
        unsafe {
            libc::FD_ZERO(&mut subscribed);
            libc::FD_ZERO(&mut active);
        }
        Self {
            subscribed,
            active,
            highest: 0,
            count: 0,
        }
    }

    fn is_subscribed(&self, fd: RawFd) -> bool { unsafe { libc::FD_ISSET(fd, &self.subscribed) } }
}

impl Default for Poller {
    fn default() -> Self { Poller::new() }
}

impl Poll for Poller {
    fn register(&mut self, fd: RawFd) {
        if self.is_subscribed(fd) {
            return;
        }
        unsafe { libc::FD_SET(fd, &mut self.subscribed) };
        if fd >= self.highest {
            self.highest = fd + 1;
        }
        self.count += 1;
    }

    fn unregister(&mut self, fd: RawFd) {
        if !self.is_subscribed(fd) {
            return;
        }
        unsafe {
            libc::FD_CLR(fd, &mut self.subscribed);
            libc::FD_CLR(fd, &mut self.active);
        }
        // Conservative shrink: a precise recomputation would require scanning the whole bitmap.
        if fd + 1 >= self.highest {
            self.highest = fd;
        }
        self.count -= 1;
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        let mut wait_time = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        self.active = self.subscribed;

        // Blocking call
        let count = unsafe {
            libc::select(
                self.highest,
                &mut self.active,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut wait_time,
            )
        };
        if count < 0 {
            unsafe { libc::FD_ZERO(&mut self.active) };
            return Err(io::Error::last_os_error());
        }

        Ok(count as usize)
    }

    fn readiness(&self, fd: RawFd) -> Readiness {
        Readiness {
            readable: unsafe { libc::FD_ISSET(fd, &self.active) },
            priority: false,
        }
    }

    fn descriptors(&self) -> Vec<RawFd> {
        (0..self.highest).filter(|fd| self.is_subscribed(*fd)).collect()
    }

    fn len(&self) -> usize { self.count }
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn bitmap_bookkeeping() {
        let (left, right) = UnixStream::pair().unwrap();
        let (lo, hi) = {
            let (a, b) = (left.as_raw_fd(), right.as_raw_fd());
            (a.min(b), a.max(b))
        };

        let mut poller = Poller::new();
        poller.register(lo);
        poller.register(hi);
        poller.register(hi);
        assert_eq!(poller.len(), 2);
        assert_eq!(poller.descriptors(), vec![lo, hi]);
        assert_eq!(poller.highest, hi + 1);

        poller.unregister(hi);
        assert_eq!(poller.len(), 1);
        assert_eq!(poller.highest, hi);
        poller.unregister(hi);
        assert_eq!(poller.len(), 1);
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
}
