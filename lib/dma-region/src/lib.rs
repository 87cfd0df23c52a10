// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client DMA windows and address translation.
//!
//! Each client of the data plane owns one contiguous DMA window: a virtual
//! range in its own address space backed by an equally contiguous physical
//! range. Packet buffers are carved from these windows, so translating a
//! buffer address between the two views, and identifying which client a
//! buffer belongs to, are both range lookups over a small static table.
//!
//! Translation is total on valid addresses and fails (with `None`) on
//! anything outside every window; callers treat that as a protocol
//! violation, because no honest peer can produce such an address.

#![cfg_attr(not(test), no_std)]

/// Index of a client, in the fixed order of the system description.
pub type ClientId = usize;

/// One client's DMA window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DmaRegion {
    pub vbase: usize,
    pub pbase: usize,
    pub size: usize,
}

impl DmaRegion {
    pub const fn new(vbase: usize, pbase: usize, size: usize) -> Self {
        Self { vbase, pbase, size }
    }

    fn contains_virt(&self, vaddr: usize) -> bool {
        vaddr >= self.vbase && vaddr - self.vbase < self.size
    }

    fn contains_phys(&self, paddr: usize) -> bool {
        paddr >= self.pbase && paddr - self.pbase < self.size
    }
}

/// The per-client window table, indexed by [`ClientId`].
pub struct DmaMap<const N: usize> {
    regions: [DmaRegion; N],
}

impl<const N: usize> DmaMap<N> {
    /// Builds a map over the given windows.
    ///
    /// # Panics
    ///
    /// If any two windows overlap in either address space. Overlap would
    /// make `client_of`/`virt_of` ambiguous, and can only arise from a bad
    /// system description.
    pub fn new(regions: [DmaRegion; N]) -> Self {
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                let disjoint_virt = a.vbase + a.size <= b.vbase
                    || b.vbase + b.size <= a.vbase;
                let disjoint_phys = a.pbase + a.size <= b.pbase
                    || b.pbase + b.size <= a.pbase;
                if !disjoint_virt || !disjoint_phys {
                    panic!("overlapping DMA windows");
                }
            }
        }
        Self { regions }
    }

    pub fn region(&self, client: ClientId) -> &DmaRegion {
        &self.regions[client]
    }

    /// Identifies the client whose window contains `vaddr`.
    pub fn client_of(&self, vaddr: usize) -> Option<ClientId> {
        self.regions.iter().position(|r| r.contains_virt(vaddr))
    }

    /// Translates a virtual buffer address to the physical address the DMA
    /// engine must be given.
    pub fn phys_of(&self, vaddr: usize) -> Option<usize> {
        let r = self.regions.iter().find(|r| r.contains_virt(vaddr))?;
        Some(r.pbase + (vaddr - r.vbase))
    }

    /// Translates a physical address back to the owning client's virtual
    /// view.
    pub fn virt_of(&self, paddr: usize) -> Option<usize> {
        let r = self.regions.iter().find(|r| r.contains_phys(paddr))?;
        Some(r.vbase + (paddr - r.pbase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const MB2: usize = 0x20_0000;

    fn three_clients() -> DmaMap<3> {
        DmaMap::new([
            DmaRegion::new(0x1000_0000, 0x8000_0000, MB2),
            DmaRegion::new(0x2000_0000, 0x8020_0000, MB2),
            DmaRegion::new(0x3000_0000, 0x8040_0000, MB2),
        ])
    }

    #[test]
    fn translates_both_ways() {
        let map = three_clients();
        assert_eq!(map.phys_of(0x1000_0000), Some(0x8000_0000));
        assert_eq!(map.phys_of(0x2000_0800), Some(0x8020_0800));
        assert_eq!(map.virt_of(0x8040_0000 + MB2 - 1), Some(0x3000_0000 + MB2 - 1));
    }

    #[test]
    fn identifies_clients() {
        let map = three_clients();
        assert_eq!(map.client_of(0x1000_0000), Some(0));
        assert_eq!(map.client_of(0x2012_3456), Some(1));
        assert_eq!(map.client_of(0x3000_0000 + MB2 - 1), Some(2));
    }

    #[test]
    fn rejects_out_of_range() {
        let map = three_clients();
        assert_eq!(map.client_of(0x0fff_ffff), None);
        assert_eq!(map.client_of(0x1000_0000 + MB2), None);
        assert_eq!(map.phys_of(0x4000_0000), None);
        assert_eq!(map.virt_of(0x9000_0000), None);
    }

    #[test]
    #[should_panic]
    fn rejects_overlap() {
        let _ = DmaMap::new([
            DmaRegion::new(0x1000_0000, 0x8000_0000, MB2),
            DmaRegion::new(0x1010_0000, 0x9000_0000, MB2),
        ]);
    }

    proptest! {
        /// phys_of and virt_of are inverse bijections on every window, and
        /// client identity survives the round trip.
        #[test]
        fn round_trip(client in 0usize..3, offset in 0usize..MB2) {
            let map = three_clients();
            let vaddr = map.region(client).vbase + offset;

            let paddr = map.phys_of(vaddr).unwrap();
            prop_assert_eq!(map.virt_of(paddr), Some(vaddr));
            prop_assert_eq!(map.client_of(vaddr), Some(client));
        }
    }
}
