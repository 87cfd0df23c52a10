// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffers for debugging drivers and protection domains.
//!
//! A ring buffer declared with [`ringbuf!`] is a named static, so its
//! contents survive a domain fault and can be read out of a memory dump or
//! over a debug link. The design center is development-time tracing; the
//! buffers are cheap enough to leave in production builds, and can be
//! compiled out entirely with the `disabled` feature.
//!
//! The payload type must be `Copy + PartialEq`. Consecutive identical
//! entries from the same line are collapsed into a count rather than
//! consuming fresh slots, which keeps tight polling loops legible.
//!
//! ```ignore
//! ringbuf!(Trace, 16, Trace::None);
//!
//! fn handler() {
//!     ringbuf_entry!(Trace::Irq);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Interior-mutability wrapper for the trace statics.
///
/// This is narrower than a `RefCell`: there is no guard object to carry
/// around, and no shared borrows at all. Access happens inside a closure,
/// scoped to exactly one entry insertion, so the buffer can never be held
/// locked across other work. Domains are single-threaded, which means the
/// flag can only trip on *reentrant* tracing (an entry generated while
/// generating an entry), and that is a bug worth a loud stop.
pub struct TraceCell<T> {
    taken: AtomicBool,
    value: UnsafeCell<T>,
}

// Entering the cell hands `&mut T` to the closure, which is equivalent to
// sending the contents to the entering thread.
unsafe impl<T: Send> Sync for TraceCell<T> {}

impl<T> TraceCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `f` with exclusive access to the contents.
    ///
    /// Panics if entered reentrantly. If `f` panics the cell stays taken,
    /// which is fine: the domain is gone, and the buffer contents remain
    /// intact for the post-mortem.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        if self.taken.swap(true, Ordering::Acquire) {
            panic!("reentrant trace");
        }
        // Safety: the flag above guarantees this is the only live access
        // to the contents until it is cleared below.
        let result = f(unsafe { &mut *self.value.get() });
        self.taken.store(false, Ordering::Release);
        result
    }
}

/// One entry in a [`Ringbuf`].
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of parametrized payload type and size. Instantiating this
/// directly is unusual; see [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub fn entry(&mut self, line: u16, payload: T) {
        let ndx = match self.last {
            None => 0,
            Some(last) => {
                let ent = &mut self.buffer[last];
                if ent.line == line && ent.payload == payload {
                    // Reuse the entry unless its count would overflow.
                    if let Some(new_count) = ent.count.checked_add(1) {
                        ent.count = new_count;
                        return;
                    }
                }

                if last + 1 >= self.buffer.len() {
                    0
                } else {
                    last + 1
                }
            }
        };

        let ent = &mut self.buffer[ndx];
        ent.line = line;
        ent.payload = payload;
        ent.count = 1;
        ent.generation = ent.generation.wrapping_add(1);

        self.last = Some(ndx);
    }
}

/// Declares a ring buffer in the current module.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a static ring buffer named `NAME`
/// with room for `N` entries of type `Type`, all initialized to `expr`. If
/// you omit the name it defaults to `__RINGBUF`, at the cost of allowing
/// only one per module.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::TraceCell<$crate::Ringbuf<$t, $n>> =
            $crate::TraceCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {};
    ($t:ty, $n:expr, $init:expr) => {};
}

/// Inserts data into a ring buffer declared with [`ringbuf!`].
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both operands before either can observe the other's
        // binding.
        let (p, buf) = ($payload, &$buf);
        $crate::TraceCell::with(buf, |rb| {
            $crate::Ringbuf::entry(rb, line!() as u16, p);
        });
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {};
    ($payload:expr) => {};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty<const N: usize>() -> Ringbuf<u32, N> {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: 0,
            }; N],
        }
    }

    #[test]
    fn collapses_repeats() {
        let mut rb = empty::<4>();

        rb.entry(7, 42);
        rb.entry(7, 42);
        rb.entry(7, 42);
        assert_eq!(rb.last, Some(0));
        assert_eq!(rb.buffer[0].count, 3);

        rb.entry(7, 43);
        assert_eq!(rb.last, Some(1));
        assert_eq!(rb.buffer[1].count, 1);
    }

    #[test]
    fn wraps_around() {
        let mut rb = empty::<2>();

        rb.entry(1, 10);
        rb.entry(2, 20);
        rb.entry(3, 30);
        assert_eq!(rb.last, Some(0));
        assert_eq!(rb.buffer[0].payload, 30);
        assert_eq!(rb.buffer[0].generation, 2);
    }

    #[test]
    fn trace_cell_scoped_access() {
        static CELL: TraceCell<u32> = TraceCell::new(3);

        let doubled = CELL.with(|v| {
            *v *= 2;
            *v
        });
        assert_eq!(doubled, 6);

        // Sequential entries are fine; the lock lives only inside `with`.
        CELL.with(|v| assert_eq!(*v, 6));
    }
}
