// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fallback barrier operations for targets without a dedicated module.
//!
//! A SeqCst fence is stronger than any of the barriers we advertise, so
//! this is correct everywhere, if occasionally more expensive than a
//! hand-picked instruction would be.

use core::sync::atomic::{fence, Ordering};

#[inline(always)]
pub fn arch_specific_load_load() {
    fence(Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_load_store() {
    fence(Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_store_store() {
    fence(Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_store_load() {
    fence(Ordering::SeqCst);
}
