// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the host microkernel, as seen by a protection domain.
//!
//! Domains in this system never talk to the kernel directly; they are handed
//! an object implementing [`Notify`] (and, where they need time, [`Clock`])
//! at construction. This keeps the data-plane crates free of any syscall
//! surface, which in turn lets their logic run under the host test harness
//! with recording fakes standing in for the kernel.

#![no_std]

/// Index of a communication channel, fixed at boot by the system
/// description. Channel numbers are only meaningful within one domain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelId(pub u32);

/// Outbound signalling operations a domain may perform on its channels.
///
/// `notify` delivers a coalesced wake event to the peer domain.
/// `notify_delayed` is the same event, but batched by the kernel to its next
/// entry/exit boundary; use it when more signals may follow in the same
/// activation. `irq_ack_delayed` re-arms an interrupt channel, likewise at
/// the next kernel boundary.
pub trait Notify {
    fn notify(&self, ch: ChannelId);
    fn notify_delayed(&self, ch: ChannelId);
    fn irq_ack_delayed(&self, ch: ChannelId);
}

impl<T: Notify> Notify for &T {
    fn notify(&self, ch: ChannelId) {
        (**self).notify(ch)
    }

    fn notify_delayed(&self, ch: ChannelId) {
        (**self).notify_delayed(ch)
    }

    fn irq_ack_delayed(&self, ch: ChannelId) {
        (**self).irq_ack_delayed(ch)
    }
}

/// Monotonic time source. Ticks are opaque; consumers only ever subtract
/// readings, so wrapping arithmetic is fine over any realistic uptime.
pub trait Clock {
    fn now(&self) -> u64;
}

impl<T: Clock> Clock for &T {
    fn now(&self) -> u64 {
        (**self).now()
    }
}
