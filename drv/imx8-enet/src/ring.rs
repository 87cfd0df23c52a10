// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DMA descriptor rings.
//!
//! The ENET engine consumes legacy 8-byte buffer descriptors laid out in a
//! contiguous ring whose physical base is programmed into `rdsr`/`tdsr`.
//! Ownership of each slot is carried in the status halfword: on receive,
//! `EMPTY` means the slot belongs to the engine and is waiting for a frame;
//! on transmit, `READY` means the engine has yet to send it. The `WRAP` bit
//! on the last slot tells the engine to return to slot zero.
//!
//! This module does not touch the hardware; it just moves memory around
//! very carefully. Descriptor words are atomics so that the publication of
//! a slot to the device is an ordered, tear-free store, and so that the
//! test harness can stand in for the device without aliasing trouble.

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use shared_ring::BufferDesc;
use static_assertions::const_assert_eq;

/// Receive slot is owned by the engine, awaiting a frame.
pub const RXD_EMPTY: u16 = 1 << 15;
/// Transmit slot is owned by the engine, awaiting transmission.
pub const TXD_READY: u16 = 1 << 15;
/// Last slot of the ring; the engine wraps to slot zero after it.
pub const WRAP: u16 = 1 << 13;
/// This descriptor ends its frame.
pub const TXD_LAST: u16 = 1 << 11;
/// Append an FCS to the outgoing frame.
pub const TXD_ADDCRC: u16 = 1 << 10;

/// One hardware buffer descriptor: `{len, stat, addr}` with `DBSWP`
/// byte-swapping enabled, so plain little-endian values.
#[repr(C)]
pub struct HwDesc {
    len: AtomicU16,
    stat: AtomicU16,
    addr: AtomicU32,
}

const_assert_eq!(core::mem::size_of::<HwDesc>(), 8);

impl HwDesc {
    pub const fn new() -> Self {
        Self {
            len: AtomicU16::new(0),
            stat: AtomicU16::new(0),
            addr: AtomicU32::new(0),
        }
    }

    /// Reads the status halfword, ordered after any earlier device writes
    /// to the rest of the descriptor.
    pub fn stat(&self) -> u16 {
        self.stat.load(Ordering::Acquire)
    }

    pub fn len(&self) -> u16 {
        self.len.load(Ordering::Relaxed)
    }

    pub fn addr(&self) -> u32 {
        self.addr.load(Ordering::Relaxed)
    }

    /// Overwrites the status halfword. This is the device's half of the
    /// protocol; the driver proper only ever goes through [`Self::program`].
    /// It exists so a test harness can play the device.
    pub fn set_stat(&self, stat: u16) {
        self.stat.store(stat, Ordering::Release);
    }

    /// Writes the frame length field. Device-side, as for [`Self::set_stat`].
    pub fn set_len(&self, len: u16) {
        self.len.store(len, Ordering::Relaxed);
    }

    /// Programs the whole descriptor and hands it to the engine. The
    /// address and length must be globally visible before the status store
    /// publishes the slot, hence the barrier: the engine is not a party to
    /// our atomics.
    fn program(&self, addr: u32, len: u16, stat: u16) {
        self.addr.store(addr, Ordering::Relaxed);
        self.len.store(len, Ordering::Relaxed);
        membar::store_store_barrier();
        self.stat.store(stat, Ordering::Release);
    }
}

/// Software control block for one descriptor ring.
///
/// `tail` is where the driver publishes next; `head` chases the engine's
/// completions. Two slots are always kept empty so a full ring is never
/// mistaken for an empty one. Alongside each slot we remember the buffer
/// descriptor it came from, so completion can hand the buffer back to the
/// right upstream ring.
pub struct HwRing {
    descr: &'static [HwDesc],
    cookies: &'static mut [BufferDesc],
    head: usize,
    tail: usize,
}

impl HwRing {
    /// Creates a ring over `descr`, with `cookies` as the per-slot
    /// bookkeeping store.
    ///
    /// Taking the descriptors by `&mut` makes the caller prove exclusive
    /// ownership; we immediately demote to shared, because from here on
    /// the slots are shared with the DMA engine.
    ///
    /// # Panics
    ///
    /// If the two slices differ in length, or the ring is too small to
    /// hold the two-slot cushion.
    pub fn new(
        descr: &'static mut [HwDesc],
        cookies: &'static mut [BufferDesc],
    ) -> Self {
        assert_eq!(descr.len(), cookies.len());
        assert!(descr.len() > 2);
        let descr = &*descr;
        // Scrub every slot so nothing is owned by the engine yet.
        for d in descr {
            d.program(0, 0, 0);
        }
        Self {
            descr,
            cookies,
            head: 0,
            tail: 0,
        }
    }

    /// Number of slots in the ring.
    pub fn len(&self) -> usize {
        self.descr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Slots still available to the driver, keeping the two-slot cushion.
    pub fn remaining(&self) -> usize {
        let cnt = self.descr.len();
        let in_flight = if self.tail >= self.head {
            self.tail - self.head
        } else {
            cnt - self.head + self.tail
        };
        cnt - 2 - in_flight
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// The slot array, for loading into the engine and for inspection.
    pub fn descriptors(&self) -> &[HwDesc] {
        self.descr
    }

    /// Publishes `desc` at the tail slot with the given hardware length
    /// and status, setting `WRAP` if this is the last slot, and advances
    /// the tail.
    ///
    /// The caller must have checked [`Self::remaining`]; publishing into a
    /// ring without room would hand the engine a live slot.
    pub fn publish(&mut self, desc: BufferDesc, len: u16, stat: u16) {
        let idx = self.tail;
        let mut stat = stat;
        let mut new_tail = idx + 1;
        if new_tail == self.descr.len() {
            new_tail = 0;
            stat |= WRAP;
        }

        let addr = u32::try_from(desc.addr)
            .expect("buffer physical address beyond the engine's reach");
        self.cookies[idx] = desc;
        self.descr[idx].program(addr, len, stat);
        self.tail = new_tail;
    }

    /// Takes the buffer at the head slot back from the engine, if the
    /// engine is done with it: returns the remembered descriptor and the
    /// hardware-written length, or `None` if the ring is empty or the head
    /// slot still carries `owned_flag`.
    pub fn retire(&mut self, owned_flag: u16) -> Option<(BufferDesc, u16)> {
        if self.head == self.tail {
            return None;
        }
        let d = &self.descr[self.head];
        if d.stat() & owned_flag != 0 {
            return None;
        }

        let len = d.len();
        let desc = self.cookies[self.head];
        self.head = if self.head + 1 == self.descr.len() {
            0
        } else {
            self.head + 1
        };
        Some((desc, len))
    }
}
