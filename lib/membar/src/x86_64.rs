// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! x86-64 barrier operations.
//!
//! x86 already orders most accesses; the SSE2 fence instructions cover the
//! remaining cases. `mfence` is the only one that stops a load from being
//! served out of the store buffer, hence its use for store-load.

use core::arch::asm;

#[inline(always)]
pub fn arch_specific_load_load() {
    unsafe {
        asm!("lfence", options(nostack));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_load_store() {
    unsafe {
        asm!("lfence", options(nostack));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_store_store() {
    unsafe {
        asm!("sfence", options(nostack));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_store_load() {
    unsafe {
        asm!("mfence", options(nostack));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}
