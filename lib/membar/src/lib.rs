// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mostly-portable memory barrier operations.
//!
//! These barriers order memory operations as issued by the processor, for
//! the cases where the other observer is a bus-mastering device rather than
//! another thread of Rust code. If you are ordering _atomic_ accesses
//! against each other, you want `core::sync::atomic` orderings instead;
//! this crate exists because `volatile`/DMA-visible accesses have no
//! defined interaction with those.

#![no_std]

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        use aarch64::*;
    } else if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        use x86_64::*;
    } else {
        mod portable;
        use portable::*;
    }
}

/// Ensure that the data for any loads _before_ the barrier is accessed
/// before any loads _after_ the barrier are performed.
#[inline(always)]
pub fn load_load_barrier() {
    arch_specific_load_load();
}

/// Ensure that the data for any loads _before_ the barrier is accessed
/// before any store _after_ the barrier is performed.
#[inline(always)]
pub fn load_store_barrier() {
    arch_specific_load_store();
}

/// Ensure that the data written by any stores _before_ the barrier is made
/// visible before the data written by any store _after_ the barrier.
#[inline(always)]
pub fn store_store_barrier() {
    arch_specific_store_store();
}

/// Ensure that the data written by any stores _before_ the barrier is made
/// visible before the data for any load _after_ the barrier is accessed.
#[inline(always)]
pub fn store_load_barrier() {
    arch_specific_store_load();
}
