// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the ENET (FEC) Ethernet controller on the i.MX8.
//!
//! The driver owns the hardware descriptor rings and nothing else. Frames
//! live in buffers belonging to the upstream domains; descriptors for
//! those buffers arrive and depart over shared rings:
//!
//! * transmit: buffers to send come in on the TX used ring (with physical
//!   addresses already filled in by the multiplexer) and go back on the TX
//!   free ring once the engine is done with them;
//! * receive: empty buffers come in on the RX free ring and go back on the
//!   RX used ring carrying frames.
//!
//! The driver runs as a single-threaded protection domain: each entry into
//! [`Enet::notified`] runs to completion, and all queue operations fail
//! fast rather than block. Backpressure is expressed entirely through ring
//! occupancy and interrupt masking: when the upstream RX side has nothing
//! to give (or no room to take), the driver masks `RXF` and waits to be
//! notified instead of spinning on the interrupt.

#![cfg_attr(not(test), no_std)]

use ipc::{ChannelId, Notify};
use ringbuf::{ringbuf, ringbuf_entry};
use shared_ring::{BufferDesc, RingEmpty, RingHandle};
use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::LocalRegisterCopy;

pub mod device;
pub mod ring;

use crate::device::{
    irq_mask, tx_error_mask, EnetRegisters, ECR, EIR, MDC_DIVIDER, MIBC,
    MSCR, OPD, RACC, RCR, RDAR, TACC, TCR, TDAR, TFWR, TIPG, TIPG_DEFAULT,
    TXIC,
};
use crate::ring::{HwRing, RXD_EMPTY, TXD_ADDCRC, TXD_LAST, TXD_READY};

/// Channel numbers fixed by the system description.
pub const IRQ: ChannelId = ChannelId(0);
/// Peer on the transmit path (the TX multiplexer).
pub const TX: ChannelId = ChannelId(1);
/// Peer on the receive path.
pub const RX: ChannelId = ChannelId(2);
/// Startup handshake: told to upstream once the hardware is up.
pub const INIT: ChannelId = ChannelId(3);

/// Each buffer occupies 2 KiB of its client's DMA window, which keeps
/// buffers alignment-friendly even though a frame needs less.
pub const PACKET_BUFFER_SIZE: usize = 2048;
/// Largest frame the engine is configured to receive into one buffer.
pub const MAX_PACKET_SIZE: usize = 1536;

/// Descriptor counts for the two hardware rings.
pub const RX_COUNT: usize = 256;
pub const TX_COUNT: usize = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    None,
    Mac([u8; 6]),
    /// RX refill found the upstream free ring empty; `RXF` masked.
    RxStarved,
    /// Upstream used ring full; `RXF` masked.
    RxBackpressure,
    /// The transmit ring had been full and completion reclaimed space.
    TxSpaceReclaimed,
    BusError,
}

ringbuf!(Trace, 32, Trace::None);

/// Control block for the ENET driver.
pub struct Enet<N> {
    /// The register file.
    regs: &'static EnetRegisters,
    /// Hardware receive ring and its physical base address.
    rx: HwRing,
    rx_paddr: u32,
    /// Hardware transmit ring and its physical base address.
    tx: HwRing,
    tx_paddr: u32,
    /// Upstream receive rings: `free` feeds refill, `used` takes frames.
    rx_ring: RingHandle,
    /// Upstream transmit rings: `used` feeds submission, `free` takes
    /// completions.
    tx_ring: RingHandle,
    /// Mirror of `eimr`, refreshed on every mask update, so masking
    /// decisions don't need an MMIO read. Starts all-masked; `init`
    /// programs the real interest set.
    irq_mask: LocalRegisterCopy<u32, EIR::Register>,
    /// Station address captured before reset.
    mac: [u8; 6],
    sys: N,
}

impl<N: Notify> Enet<N> {
    /// Assembles a driver instance. The hardware is untouched until
    /// [`Self::init`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        regs: &'static EnetRegisters,
        rx: HwRing,
        rx_paddr: u32,
        tx: HwRing,
        tx_paddr: u32,
        rx_ring: RingHandle,
        tx_ring: RingHandle,
        sys: N,
    ) -> Self {
        Self {
            regs,
            rx,
            rx_paddr,
            tx,
            tx_paddr,
            rx_ring,
            tx_ring,
            irq_mask: LocalRegisterCopy::new(0),
            mac: [0; 6],
            sys,
        }
    }

    /// Resets and configures the controller, then signals `INIT` so the
    /// upstream domains know they can start seeding rings.
    ///
    /// The reset and statistics-block waits are busy-waits; a device that
    /// never comes back from reset is unrecoverable anyway.
    pub fn init(&mut self) {
        // The bootloader may have left a station address programmed, and
        // reset scrambles it on some parts; capture it first.
        self.mac = self.station_mac();
        ringbuf_entry!(Trace::Mac(self.mac));

        self.regs.ecr.write(ECR::RESET::SET);
        while self.regs.ecr.is_set(ECR::RESET) {}
        self.regs.ecr.modify(ECR::DBSWP::SET);

        // Mask and clear all events.
        self.regs.eimr.set(0);
        self.regs.eir.set(!0);

        self.regs.mscr.write(MSCR::MII_SPEED.val(MDC_DIVIDER));

        // Cycle the statistics block: disable, clear, restart.
        self.regs.mibc.modify(MIBC::MIB_DIS::SET);
        while !self.regs.mibc.is_set(MIBC::MIB_IDLE) {}
        self.regs.mibc.modify(MIBC::MIB_CLEAR::SET);
        while !self.regs.mibc.is_set(MIBC::MIB_IDLE) {}
        self.regs.mibc.modify(MIBC::MIB_CLEAR::CLEAR);
        self.regs.mibc.modify(MIBC::MIB_DIS::CLEAR);

        // Clear the unicast and multicast hash tables; these survive
        // reset.
        self.regs.iaur.set(0);
        self.regs.ialr.set(0);
        self.regs.gaur.set(0);
        self.regs.galr.set(0);

        if self.regs.palr.get() == 0 {
            // Reset took the station address with it; put it back.
            self.set_station_mac();
        }

        self.regs
            .opd
            .write(OPD::OPCODE.val(1) + OPD::PAUSE_DUR.val(0));
        // Coalesce transmit interrupts into batches of 128 frames.
        self.regs.txic0.write(
            TXIC::ICEN::SET + TXIC::ICFT.val(128) + TXIC::ICTT.val(0xff),
        );
        self.regs.tipg.write(TIPG::IPG.val(TIPG_DEFAULT));
        // Store-and-forward on transmit, required for checksum insertion;
        // likewise no cut-through on receive.
        self.regs.tfwr.write(TFWR::STRFWD::SET);
        self.regs.rsfl.set(0);
        self.regs.racc.write(
            RACC::LINEDIS::SET + RACC::IPDIS::SET + RACC::PRODIS::SET,
        );
        self.regs.tacc.write(TACC::IPCHK::SET + TACC::PROCHK::SET);

        // Descriptor ring bases and maximum receive buffer size.
        self.regs.rdsr.set(self.rx_paddr);
        self.regs.tdsr.set(self.tx_paddr);
        self.regs.mrbr.set(MAX_PACKET_SIZE as u32);

        self.regs.rcr.write(
            RCR::MAX_FL.val(1518)
                + RCR::RGMII_EN::SET
                + RCR::MII_MODE::SET
                + RCR::PROM::SET,
        );
        self.regs.tcr.write(TCR::FDEN::SET);

        self.regs.ecr.modify(ECR::SPEED::SET);
        self.regs.ecr.modify(ECR::ETHEREN::SET);

        self.regs.rdar.write(RDAR::ACTIVE::SET);

        // Drop any events that accumulated during setup, then unmask the
        // set we service.
        let stale = self.regs.eir.get();
        self.regs.eir.set(stale);
        self.enable_irqs(irq_mask());

        self.sys.notify(INIT);
    }

    fn station_mac(&self) -> [u8; 6] {
        let l = self.regs.palr.get();
        let h = self.regs.paur.get();
        [
            (l >> 24) as u8,
            (l >> 16) as u8,
            (l >> 8) as u8,
            l as u8,
            (h >> 24) as u8,
            (h >> 16) as u8,
        ]
    }

    fn set_station_mac(&self) {
        let m = &self.mac;
        self.regs.palr.set(
            (m[0] as u32) << 24
                | (m[1] as u32) << 16
                | (m[2] as u32) << 8
                | m[3] as u32,
        );
        self.regs
            .paur
            .set((m[4] as u32) << 24 | (m[5] as u32) << 16);
    }

    fn enable_irqs(&mut self, mask: FieldValue<u32, EIR::Register>) {
        self.regs.eimr.write(mask);
        self.irq_mask = self.regs.eimr.extract();
    }

    /// The current interrupt interest set, mostly useful to observers.
    pub fn irq_interest(&self) -> LocalRegisterCopy<u32, EIR::Register> {
        self.irq_mask
    }

    pub fn hw_rx(&self) -> &HwRing {
        &self.rx
    }

    pub fn hw_tx(&self) -> &HwRing {
        &self.tx
    }

    /// Tops the hardware receive ring up from the upstream free ring.
    ///
    /// If this pass published nothing because upstream had nothing to
    /// give, receive interrupts are masked: frames would have nowhere to
    /// go, and the RX notification will re-run this refill once buffers
    /// come back.
    pub fn fill_rx_bufs(&mut self) {
        let mut published = 0;
        let mut starved = false;
        while self.rx.remaining() > 0 {
            match self.rx_ring.free.dequeue() {
                Ok(desc) => {
                    // Hand the slot to the engine.
                    self.rx.publish(desc, 0, RXD_EMPTY);
                    published += 1;
                }
                Err(RingEmpty) => {
                    starved = true;
                    break;
                }
            }
        }

        if published > 0 {
            // The engine suspends its descriptor scan when it runs dry;
            // poke it if it isn't already scanning.
            if !self.regs.rdar.is_set(RDAR::ACTIVE) {
                self.regs.rdar.write(RDAR::ACTIVE::SET);
            }
            if !self.irq_mask.is_set(EIR::RXF) {
                self.enable_irqs(irq_mask());
            }
        } else if starved {
            ringbuf_entry!(Trace::RxStarved);
            self.enable_irqs(tx_error_mask());
        }
    }

    /// Moves completed receive descriptors to the upstream used ring.
    ///
    /// Stops at the first slot the engine still owns, or when upstream is
    /// full; in the latter case receive interrupts are masked until the
    /// consumer drains and returns buffers.
    pub fn handle_rx(&mut self) {
        let og_size = self.rx_ring.used.len();
        let mut num = 0usize;

        while !self.rx_ring.used.is_full() {
            match self.rx.retire(RXD_EMPTY) {
                Some((desc, hw_len)) => {
                    self.rx_ring
                        .used
                        .enqueue(desc.addr, hw_len as u32, desc.cookie)
                        .expect("rx used ring filled behind its own check");
                    num += 1;
                }
                None => break,
            }
        }

        if self.rx_ring.used.is_full() {
            ringbuf_entry!(Trace::RxBackpressure);
            self.enable_irqs(tx_error_mask());
        }

        // Wake the consumer only if we actually forwarded frames and it
        // may have gone idle: either the ring was empty when we started,
        // or its occupancy moved.
        if num != 0 && (og_size == 0 || self.rx_ring.used.len() != og_size)
        {
            self.sys.notify(RX);
        }
    }

    /// Drains the upstream TX used ring into the hardware transmit ring.
    pub fn handle_tx(&mut self) {
        while self.tx.remaining() > 1 {
            match self.tx_ring.used.dequeue() {
                Ok(desc) => self.raw_tx(desc),
                Err(RingEmpty) => break,
            }
        }
    }

    fn raw_tx(&mut self, desc: BufferDesc) {
        self.tx.publish(
            desc,
            desc.len as u16,
            TXD_READY | TXD_ADDCRC | TXD_LAST,
        );
        if !self.regs.tdar.is_set(TDAR::ACTIVE) {
            self.regs.tdar.write(TDAR::ACTIVE::SET);
        }
    }

    /// Returns transmitted buffers to the upstream free ring.
    ///
    /// Notifies the transmit peer at most once per run: when the free
    /// ring was empty and now is not (so the peer may be waiting for
    /// buffers), or when the hardware ring had been full and this run
    /// reclaimed space (transmit backpressure cleared).
    pub fn complete_tx(&mut self) {
        let was_empty = self.tx_ring.free.is_empty();
        // Submission keeps one slot beyond the cushion in hand, so "no
        // room" from its point of view is anything at or below that.
        let had_no_room = self.tx.remaining() <= 1;
        let mut enqueued = 0usize;

        while !self.tx_ring.free.is_full() {
            match self.tx.retire(TXD_READY) {
                Some((desc, _)) => {
                    self.tx_ring
                        .free
                        .enqueue(desc.addr, desc.len, desc.cookie)
                        .expect("tx free ring filled behind its own check");
                    enqueued += 1;
                }
                None => break,
            }
        }

        if enqueued != 0 && (was_empty || had_no_room) {
            if had_no_room {
                ringbuf_entry!(Trace::TxSpaceReclaimed);
            }
            self.sys.notify(TX);
        }
    }

    /// Events pending in `eir`, limited to the current interest set.
    fn pending_events(&self) -> LocalRegisterCopy<u32, EIR::Register> {
        let pending = self.regs.eir.extract();
        LocalRegisterCopy::new(pending.get() & self.irq_mask.get())
    }

    /// Services the controller interrupt: read the masked events, clear
    /// them, dispatch, and repeat until no interesting event remains.
    pub fn handle_irq(&mut self) {
        let mut events = self.pending_events();
        // Events are write-one-to-clear.
        self.regs.eir.set(events.get());

        while events.get() != 0 {
            if events.is_set(EIR::TXF) {
                self.complete_tx();
            }
            if events.is_set(EIR::RXF) {
                self.handle_rx();
                self.fill_rx_bufs();
            }
            if events.is_set(EIR::EBERR) {
                ringbuf_entry!(Trace::BusError);
                panic!("ENET: system bus/uDMA error");
            }

            events = self.pending_events();
            self.regs.eir.set(events.get());
        }
    }

    /// Event dispatch for the domain's notification handler.
    pub fn notified(&mut self, ch: ChannelId) {
        match ch {
            IRQ => {
                self.handle_irq();
                // Ack at the next kernel boundary, after the handler
                // returns.
                self.sys.irq_ack_delayed(IRQ);
            }
            RX => self.fill_rx_bufs(),
            TX => self.handle_tx(),
            _ => panic!("ENET: notification on unexpected channel"),
        }
    }
}
