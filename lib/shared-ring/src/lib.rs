// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared-memory descriptor queues.
//!
//! Every data path between two protection domains in this system is a pair
//! of fixed-capacity circular queues living in a shared memory region: a
//! *free* queue of buffers available to the packet producer, and a *used*
//! queue of buffers carrying work for the consumer. Buffers themselves
//! never move; only their descriptors circulate.
//!
//! Each queue is single-producer single-consumer. The producer is the sole
//! writer of `write_idx` and of the slots it publishes; the consumer is the
//! sole writer of `read_idx`. Multi-producer use would require an external
//! lock and is not supported here.
//!
//! This module just moves memory around very carefully. Every field another
//! domain can observe is an atomic word: descriptor publication is a batch
//! of relaxed slot stores committed by a release store of `write_idx`, and
//! consumption acquire-loads `write_idx` before touching any slot. Because
//! no non-atomic location is ever shared, a misconfigured system (say, two
//! producers on one ring) can lose or duplicate descriptors but cannot
//! break memory safety, which is why the API below is safe.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use static_assertions::const_assert;

/// Number of descriptor slots in every ring. One slot is always kept empty
/// to distinguish full from empty, so the usable capacity is one less.
pub const RING_SIZE: usize = 512;

// The index arithmetic below reduces modulo RING_SIZE after wrapping
// subtraction, which requires the size to divide 2^32.
const_assert!(RING_SIZE.is_power_of_two());

// Each ring must fit in the single region the system description maps for
// it.
const_assert!(core::mem::size_of::<RawRing>() <= 0x20_0000);

/// A buffer descriptor: the unit of transfer on every ring.
///
/// `addr` is the buffer's address in the producer's view of the world --
/// virtual on the client side of a multiplexer, physical on the driver
/// side. `len` is the packet length (used rings) or the buffer capacity
/// (free rings). `cookie` is an opaque token the original producer uses to
/// recognize the buffer when it comes back; nothing in between interprets
/// it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferDesc {
    pub addr: usize,
    pub len: u32,
    pub cookie: usize,
}

/// Error returned when enqueueing on a full ring. This is ordinary flow
/// control, not a fault: the producer stops and waits to be notified.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RingFull;

/// Error returned when dequeueing from an empty ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RingEmpty;

#[repr(C)]
struct Slot {
    addr: AtomicUsize,
    len: AtomicU32,
    cookie: AtomicUsize,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: Slot = Slot {
    addr: AtomicUsize::new(0),
    len: AtomicU32::new(0),
    cookie: AtomicUsize::new(0),
};

/// The in-memory layout of one shared ring. A freshly mapped (zeroed)
/// region is a valid empty ring, so boot-time wiring does not need an
/// initialization handshake beyond mapping the region into both domains.
#[repr(C)]
pub struct RawRing {
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    notify_reader: AtomicU32,
    slots: [Slot; RING_SIZE],
}

impl RawRing {
    pub const fn new() -> Self {
        Self {
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            notify_reader: AtomicU32::new(0),
            slots: [EMPTY_SLOT; RING_SIZE],
        }
    }

    /// Reinterprets a mapped shared region as a ring.
    ///
    /// # Safety
    ///
    /// `addr` must point to at least `size_of::<RawRing>()` bytes of mapped,
    /// suitably aligned memory that stays mapped forever, is zeroed (or
    /// holds a previously valid ring), and is only ever accessed through
    /// the ring protocol.
    pub unsafe fn from_addr(addr: usize) -> &'static Self {
        &*(addr as *const Self)
    }
}

impl Default for RawRing {
    fn default() -> Self {
        Self::new()
    }
}

/// One side's view of one shared ring.
///
/// Whether a given domain enqueues or dequeues on a given ring is fixed by
/// the system's wiring; a `Ring` exposes both operations and relies on each
/// side honouring its single role.
pub struct Ring {
    raw: &'static RawRing,
}

impl Ring {
    pub fn new(raw: &'static RawRing) -> Self {
        Self { raw }
    }

    /// Publishes one descriptor. Fails with [`RingFull`] if no slot is
    /// free, in which case nothing is written.
    pub fn enqueue(
        &self,
        addr: usize,
        len: u32,
        cookie: usize,
    ) -> Result<(), RingFull> {
        let w = self.raw.write_idx.load(Ordering::Relaxed);
        // Acquire here pairs with the consumer's release of `read_idx`,
        // ensuring its reads of the slot we are about to overwrite have
        // completed.
        let r = self.raw.read_idx.load(Ordering::Acquire);
        if next(w) == r {
            return Err(RingFull);
        }

        let slot = &self.raw.slots[w as usize];
        slot.addr.store(addr, Ordering::Relaxed);
        slot.len.store(len, Ordering::Relaxed);
        slot.cookie.store(cookie, Ordering::Relaxed);
        // Commit: the release makes the slot contents visible to any
        // consumer that observes the new index.
        self.raw.write_idx.store(next(w), Ordering::Release);
        Ok(())
    }

    /// Takes the oldest descriptor off the ring, or fails with
    /// [`RingEmpty`].
    pub fn dequeue(&self) -> Result<BufferDesc, RingEmpty> {
        let r = self.raw.read_idx.load(Ordering::Relaxed);
        let w = self.raw.write_idx.load(Ordering::Acquire);
        if r == w {
            return Err(RingEmpty);
        }

        let slot = &self.raw.slots[r as usize];
        let desc = BufferDesc {
            addr: slot.addr.load(Ordering::Relaxed),
            len: slot.len.load(Ordering::Relaxed),
            cookie: slot.cookie.load(Ordering::Relaxed),
        };
        // Release the slot back to the producer.
        self.raw.read_idx.store(next(r), Ordering::Release);
        Ok(desc)
    }

    pub fn is_empty(&self) -> bool {
        let w = self.raw.write_idx.load(Ordering::Relaxed);
        let r = self.raw.read_idx.load(Ordering::Relaxed);
        w == r
    }

    pub fn is_full(&self) -> bool {
        let w = self.raw.write_idx.load(Ordering::Relaxed);
        let r = self.raw.read_idx.load(Ordering::Relaxed);
        next(w) == r
    }

    /// Number of descriptors currently queued.
    pub fn len(&self) -> usize {
        let w = self.raw.write_idx.load(Ordering::Relaxed);
        let r = self.raw.read_idx.load(Ordering::Relaxed);
        (w.wrapping_sub(r) as usize) % RING_SIZE
    }

    /// Reads the consumer's wake-me hint. The hint is advisory: a producer
    /// that observes it clear may skip signalling, and the consumer guards
    /// against the resulting lost-wakeup window by re-scanning its rings
    /// after setting the hint and before going idle.
    pub fn notify_reader(&self) -> bool {
        self.raw.notify_reader.load(Ordering::Relaxed) != 0
    }

    /// Sets or clears the wake-me hint. Consumers keep this clear while
    /// actively draining and set it just before going idle.
    pub fn set_notify_reader(&self, wanted: bool) {
        self.raw.notify_reader.store(wanted as u32, Ordering::Relaxed);
    }
}

#[inline(always)]
fn next(idx: u32) -> u32 {
    (idx + 1) % RING_SIZE as u32
}

/// The `(free, used)` ring pair a domain holds for one direction of one
/// peering.
pub struct RingHandle {
    pub free: Ring,
    pub used: Ring,
}

impl RingHandle {
    pub fn new(free: Ring, used: Ring) -> Self {
        Self { free, used }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn fresh() -> Ring {
        Ring::new(Box::leak(Box::new(RawRing::new())))
    }

    /// Two views of the same storage, standing in for the two domains of a
    /// peering.
    fn fresh_pair() -> (Ring, Ring) {
        let raw: &'static RawRing = Box::leak(Box::new(RawRing::new()));
        (Ring::new(raw), Ring::new(raw))
    }

    #[test]
    fn base_state() {
        let ring = fresh();
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.dequeue(), Err(RingEmpty));
    }

    #[test]
    fn fifo_order() {
        let ring = fresh();
        for i in 0..10 {
            ring.enqueue(0x1000 + i, i as u32, i).unwrap();
        }
        assert_eq!(ring.len(), 10);
        for i in 0..10 {
            let d = ring.dequeue().unwrap();
            assert_eq!(d.addr, 0x1000 + i);
            assert_eq!(d.len, i as u32);
            assert_eq!(d.cookie, i);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn capacity_is_size_minus_one() {
        let ring = fresh();
        for i in 0..RING_SIZE - 1 {
            ring.enqueue(i, 0, 0).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.enqueue(0, 0, 0), Err(RingFull));
        assert_eq!(ring.len(), RING_SIZE - 1);

        // Draining one slot unsticks the producer.
        ring.dequeue().unwrap();
        ring.enqueue(0, 0, 0).unwrap();
        assert!(ring.is_full());
    }

    #[test]
    fn index_wraparound() {
        let ring = fresh();
        // Push the indices around the ring a few times with a small
        // resident population.
        for i in 0..3 * RING_SIZE {
            ring.enqueue(i, 1, i).unwrap();
            let d = ring.dequeue().unwrap();
            assert_eq!(d.addr, i);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn notify_hint() {
        let ring = fresh();
        assert!(!ring.notify_reader());
        ring.set_notify_reader(true);
        assert!(ring.notify_reader());
        ring.set_notify_reader(false);
        assert!(!ring.notify_reader());
    }

    /// One producer, one consumer, no loss, no reordering, no invention.
    #[test]
    fn spsc_threaded() {
        const N: usize = 100_000;
        let (prod, cons) = fresh_pair();

        let producer = std::thread::spawn(move || {
            let mut sent = 0usize;
            while sent < N {
                // Tag each descriptor so the consumer can check integrity
                // of the whole triple, not just the sequence number.
                if prod.enqueue(sent, (sent % 1536) as u32, !sent).is_ok() {
                    sent += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let consumer = std::thread::spawn(move || {
            let mut seen = 0usize;
            while seen < N {
                match cons.dequeue() {
                    Ok(d) => {
                        assert_eq!(d.addr, seen);
                        assert_eq!(d.len, (seen % 1536) as u32);
                        assert_eq!(d.cookie, !seen);
                        seen += 1;
                    }
                    Err(RingEmpty) => std::thread::yield_now(),
                }
            }
            // Nothing extra shows up afterwards.
            assert_eq!(cons.dequeue(), Err(RingEmpty));
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    proptest! {
        /// The ring agrees with a queue model under arbitrary interleaved
        /// enqueue/dequeue sequences, including across index wraparound.
        #[test]
        fn matches_queue_model(ops in proptest::collection::vec(any::<(bool, u16)>(), 1..2000)) {
            let ring = fresh();
            let mut model: VecDeque<(usize, u32, usize)> = VecDeque::new();

            for (is_enq, v) in ops {
                if is_enq {
                    let desc = (v as usize, v as u32, (v as usize) << 1);
                    match ring.enqueue(desc.0, desc.1, desc.2) {
                        Ok(()) => model.push_back(desc),
                        Err(RingFull) => {
                            prop_assert_eq!(model.len(), RING_SIZE - 1)
                        }
                    }
                } else {
                    match ring.dequeue() {
                        Ok(d) => {
                            let m = model.pop_front();
                            prop_assert_eq!(
                                m,
                                Some((d.addr, d.len, d.cookie))
                            );
                        }
                        Err(RingEmpty) => prop_assert!(model.is_empty()),
                    }
                }
                prop_assert_eq!(ring.len(), model.len());
                prop_assert_eq!(ring.is_empty(), model.is_empty());
                prop_assert_eq!(ring.is_full(), model.len() == RING_SIZE - 1);
            }
        }
    }
}
