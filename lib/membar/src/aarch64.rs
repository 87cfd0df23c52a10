// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AArch64 barrier operations.
//!
//! `dmb` with the right domain/type argument covers everything we need
//! here. Device memory on the platforms we care about is mapped
//! non-cacheable and the DMA engines are coherent observers in the outer
//! shareable domain, so we use `sy`-scoped barriers throughout rather than
//! trying to be clever with `ish`.

use core::arch::asm;

#[inline(always)]
fn dmb_sy() {
    // The asm block is not marked `nomem` so that the compiler treats it as
    // touching memory and does not move accesses across it.
    unsafe {
        asm!("dmb sy", options(nostack, preserves_flags));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
fn dmb_ld() {
    unsafe {
        asm!("dmb ld", options(nostack, preserves_flags));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
fn dmb_st() {
    unsafe {
        asm!("dmb st", options(nostack, preserves_flags));
    }
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

#[inline(always)]
pub fn arch_specific_load_load() {
    dmb_ld();
}

#[inline(always)]
pub fn arch_specific_load_store() {
    dmb_ld();
}

#[inline(always)]
pub fn arch_specific_store_store() {
    dmb_st();
}

#[inline(always)]
pub fn arch_specific_store_load() {
    dmb_sy();
}
