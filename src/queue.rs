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

use crossbeam_channel as chan;

/// Blocking discipline of a queue operation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Mode {
    /// Block until the operation can proceed.
    Wait,
    /// Return immediately. An enqueue into a full queue discards the oldest item so the
    /// freshest one survives; a dequeue from an empty queue returns nothing.
    NoWait,
}

/// Bounded thread-safe FIFO of fixed capacity.
///
/// The queue is a multi-producer multi-consumer channel pair: producers and consumers may live
/// on different threads without any external locking.
///
/// ```
/// use async_ip::{MessageQueue, Mode};
///
/// let queue = MessageQueue::new(2);
/// queue.enqueue(1, Mode::NoWait);
/// queue.enqueue(2, Mode::NoWait);
/// // The queue is full: the oldest item is dropped to admit the freshest one.
/// queue.enqueue(3, Mode::NoWait);
/// assert_eq!(queue.dequeue(Mode::NoWait), Some(2));
/// assert_eq!(queue.dequeue(Mode::NoWait), Some(3));
/// assert_eq!(queue.dequeue(Mode::NoWait), None);
/// ```
pub struct MessageQueue<T> {
    tx: chan::Sender<T>,
    rx: chan::Receiver<T>,
}

impl<T> MessageQueue<T> {
    /// Constructs an empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = chan::bounded(capacity);
        Self { tx, rx }
    }

    /// Number of items currently queued.
    pub fn count(&self) -> usize { self.rx.len() }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool { self.rx.is_empty() }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool { self.rx.is_full() }

    /// Appends an item at the back of the queue.
    ///
    /// In [`Mode::Wait`] a full queue blocks the caller until a consumer makes room. In
    /// [`Mode::NoWait`] a full queue drops its oldest item instead.
    pub fn enqueue(&self, item: T, mode: Mode) {
        match mode {
            Mode::Wait => {
                let _ = self.tx.send(item);
            }
            Mode::NoWait => {
                if let Err(chan::TrySendError::Full(item)) = self.tx.try_send(item) {
                    let _ = self.rx.try_recv();
                    let _ = self.tx.try_send(item);
                }
            }
        }
    }

    /// Removes and returns the item at the front of the queue.
    ///
    /// In [`Mode::Wait`] an empty queue blocks the caller until a producer delivers an item.
    pub fn dequeue(&self, mode: Mode) -> Option<T> {
        match mode {
            Mode::Wait => self.rx.recv().ok(),
            Mode::NoWait => self.rx.try_recv().ok(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new(4);
        for item in 0..4 {
            queue.enqueue(item, Mode::NoWait);
        }
        assert_eq!(queue.count(), 4);
        assert!(queue.is_full());
        for item in 0..4 {
            assert_eq!(queue.dequeue(Mode::NoWait), Some(item));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn nowait_enqueue_overwrites_oldest() {
        let queue = MessageQueue::new(3);
        for item in 0..5 {
            queue.enqueue(item, Mode::NoWait);
        }
        assert_eq!(queue.count(), 3);
        assert_eq!(queue.dequeue(Mode::NoWait), Some(2));
        assert_eq!(queue.dequeue(Mode::NoWait), Some(3));
        assert_eq!(queue.dequeue(Mode::NoWait), Some(4));
    }

    #[test]
    fn nowait_dequeue_on_empty() {
        let queue = MessageQueue::<u8>::new(1);
        assert_eq!(queue.dequeue(Mode::NoWait), None);
    }

    #[test]
    fn wait_enqueue_blocks_for_consumer() {
        let queue = std::sync::Arc::new(MessageQueue::new(1));
        queue.enqueue(1u8, Mode::Wait);

        let producer = queue.clone();
        let handle = thread::spawn(move || {
            // Queue is full: this enqueue parks until the consumer below makes room
            producer.enqueue(2u8, Mode::Wait);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.dequeue(Mode::Wait), Some(1));
        handle.join().unwrap();
        assert_eq!(queue.dequeue(Mode::Wait), Some(2));
    }

    #[test]
    fn wait_dequeue_blocks_for_producer() {
        let queue = std::sync::Arc::new(MessageQueue::new(1));
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.enqueue(7u8, Mode::Wait);
        });
        assert_eq!(queue.dequeue(Mode::Wait), Some(7));
        handle.join().unwrap();
    }
}
