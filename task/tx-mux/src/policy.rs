// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmit scheduling policies.
//!
//! A policy decides in what order, and how far, client queues are drained
//! into the driver's ring during one activation. Policies see the queues
//! only through [`TxPath`], so the two implementations here share no state
//! beyond what the multiplexer itself owns.

use ipc::Clock;

use crate::TxPath;

pub trait Policy<const C: usize> {
    /// Forwards buffers until the policy decides to stop; returns how many
    /// were moved.
    fn forward(&mut self, path: &TxPath<'_, C>) -> usize;
}

/// Serve clients one buffer at a time in fixed rotation.
///
/// Each sweep takes at most one buffer from every client, so the share each
/// client gets is independent of how fast it produces. A sweep that moves
/// nothing ends the activation.
pub struct RoundRobin;

impl<const C: usize> Policy<C> for RoundRobin {
    fn forward(&mut self, path: &TxPath<'_, C>) -> usize {
        let mut moved = 0;
        while !path.driver_full() {
            let before = moved;
            for client in 0..C {
                if path.forward_one(client).is_some() {
                    moved += 1;
                }
            }
            if moved == before {
                break;
            }
        }
        moved
    }
}

/// Byte budgets for [`PriorityQuota`].
#[derive(Copy, Clone, Debug)]
pub struct QuotaConfig<const C: usize> {
    /// Client ids from highest to lowest priority.
    pub order: [usize; C],
    /// Bytes each client may transmit per timeslice.
    pub byte_limit: [u64; C],
    /// Timeslice length, in [`Clock`] ticks.
    pub timeslice: u64,
}

/// Strict priority with per-timeslice byte quotas.
///
/// The highest-priority client is drained until its queue or its byte
/// budget for the current timeslice runs out, then the next, and so on.
/// When the timeslice ends, every budget resets and draining restarts from
/// the top, so a lower-priority client can never starve a higher one and a
/// higher one can only crowd out the rest up to its configured rate.
///
/// Byte counts persist across activations within one timeslice; they are
/// part of the policy, not of any single run.
pub struct PriorityQuota<K, const C: usize> {
    clock: K,
    config: QuotaConfig<C>,
    slice_start: u64,
    spent: [u64; C],
}

impl<K: Clock, const C: usize> PriorityQuota<K, C> {
    /// # Panics
    ///
    /// If `timeslice` is zero, which would make every instant an expiry.
    pub fn new(clock: K, config: QuotaConfig<C>) -> Self {
        assert!(config.timeslice > 0);
        let slice_start = clock.now();
        Self {
            clock,
            config,
            slice_start,
            spent: [0; C],
        }
    }

    fn slice_expired(&self) -> bool {
        self.clock.now().wrapping_sub(self.slice_start)
            >= self.config.timeslice
    }

    fn reset_slice(&mut self) {
        self.slice_start = self.clock.now();
        self.spent = [0; C];
    }
}

impl<K: Clock, const C: usize> Policy<C> for PriorityQuota<K, C> {
    fn forward(&mut self, path: &TxPath<'_, C>) -> usize {
        let mut moved = 0;
        'slice: loop {
            if self.slice_expired() {
                self.reset_slice();
            }
            for prio in 0..C {
                let client = self.config.order[prio];
                while !path.driver_full()
                    && self.spent[client] < self.config.byte_limit[client]
                {
                    if self.slice_expired() {
                        self.reset_slice();
                        continue 'slice;
                    }
                    match path.forward_one(client) {
                        Some(bytes) => {
                            self.spent[client] += u64::from(bytes);
                            moved += 1;
                        }
                        None => break,
                    }
                }
            }
            break;
        }
        moved
    }
}
