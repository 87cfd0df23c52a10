// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level description of the ENET (FEC) peripheral.
//!
//! There is no generated peripheral crate for this block, so the registers
//! the driver touches are defined here with `tock_registers`, offsets and
//! fields transcribed from the i.MX8 reference manual. Everything else is
//! reserved padding, which also guards against accidental use; the
//! `register_structs!` macro checks the offsets at compile time.

use tock_registers::fields::FieldValue;
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

register_structs! {
    // The ENET register file.
    pub EnetRegisters {
        (0x000 => _reserved0),
        // Event register (write 1 to clear).
        (0x004 => pub eir: ReadWrite<u32, EIR::Register>),
        // Event mask; same layout as `eir`.
        (0x008 => pub eimr: ReadWrite<u32, EIR::Register>),
        (0x00c => _reserved1),
        // Receive descriptor active.
        (0x010 => pub rdar: ReadWrite<u32, RDAR::Register>),
        // Transmit descriptor active.
        (0x014 => pub tdar: ReadWrite<u32, TDAR::Register>),
        (0x018 => _reserved2),
        // Control: reset, enable, byte swap, speed.
        (0x024 => pub ecr: ReadWrite<u32, ECR::Register>),
        (0x028 => _reserved3),
        // MII management frame (unused here; PHY management is board
        // glue).
        (0x040 => pub mmfr: ReadWrite<u32>),
        // MII speed control (MDC divider).
        (0x044 => pub mscr: ReadWrite<u32, MSCR::Register>),
        (0x048 => _reserved4),
        // MIB statistics control.
        (0x064 => pub mibc: ReadWrite<u32, MIBC::Register>),
        (0x068 => _reserved5),
        // Receive control.
        (0x084 => pub rcr: ReadWrite<u32, RCR::Register>),
        (0x088 => _reserved6),
        // Transmit control.
        (0x0c4 => pub tcr: ReadWrite<u32, TCR::Register>),
        (0x0c8 => _reserved7),
        // Station address, low 4 bytes.
        (0x0e4 => pub palr: ReadWrite<u32>),
        // Station address, high 2 bytes (+ type field).
        (0x0e8 => pub paur: ReadWrite<u32>),
        // Opcode/pause duration for outgoing PAUSE frames.
        (0x0ec => pub opd: ReadWrite<u32, OPD::Register>),
        // Transmit interrupt coalescing, ring 0.
        (0x0f0 => pub txic0: ReadWrite<u32, TXIC::Register>),
        (0x0f4 => _reserved8),
        // Receive interrupt coalescing, ring 0; same layout as `txic0`.
        (0x100 => pub rxic0: ReadWrite<u32, TXIC::Register>),
        (0x104 => _reserved9),
        // Individual hash table, high and low words.
        (0x118 => pub iaur: ReadWrite<u32>),
        (0x11c => pub ialr: ReadWrite<u32>),
        // Group (multicast) hash table, high and low words.
        (0x120 => pub gaur: ReadWrite<u32>),
        (0x124 => pub galr: ReadWrite<u32>),
        (0x128 => _reserved10),
        // Transmit FIFO watermark / store-and-forward.
        (0x144 => pub tfwr: ReadWrite<u32, TFWR::Register>),
        (0x148 => _reserved11),
        // Receive descriptor ring base (physical).
        (0x180 => pub rdsr: ReadWrite<u32>),
        // Transmit descriptor ring base (physical).
        (0x184 => pub tdsr: ReadWrite<u32>),
        // Maximum receive buffer size.
        (0x188 => pub mrbr: ReadWrite<u32>),
        (0x18c => _reserved12),
        // Receive FIFO section full threshold (0 = store and forward).
        (0x190 => pub rsfl: ReadWrite<u32>),
        // Remaining receive/transmit FIFO thresholds.
        (0x194 => pub rsem: ReadWrite<u32>),
        (0x198 => pub raem: ReadWrite<u32>),
        (0x19c => pub rafl: ReadWrite<u32>),
        (0x1a0 => pub tsem: ReadWrite<u32>),
        (0x1a4 => pub taem: ReadWrite<u32>),
        (0x1a8 => pub tafl: ReadWrite<u32>),
        // Transmit inter-packet gap.
        (0x1ac => pub tipg: ReadWrite<u32, TIPG::Register>),
        // Frame truncation length.
        (0x1b0 => pub ftrl: ReadWrite<u32>),
        (0x1b4 => _reserved13),
        // Transmit accelerator function configuration.
        (0x1c4 => pub tacc: ReadWrite<u32, TACC::Register>),
        // Receive accelerator function configuration.
        (0x1c8 => pub racc: ReadWrite<u32, RACC::Register>),
        (0x1cc => @END),
    }
}

register_bitfields![u32,
    // Event bits, shared by `eir` (write 1 to clear) and `eimr` (mask).
    pub EIR [
        BABR OFFSET(30) NUMBITS(1) [],
        BABT OFFSET(29) NUMBITS(1) [],
        GRA OFFSET(28) NUMBITS(1) [],
        // Frame transmitted.
        TXF OFFSET(27) NUMBITS(1) [],
        TXB OFFSET(26) NUMBITS(1) [],
        // Frame received.
        RXF OFFSET(25) NUMBITS(1) [],
        RXB OFFSET(24) NUMBITS(1) [],
        MII OFFSET(23) NUMBITS(1) [],
        // System bus error during DMA. Fatal.
        EBERR OFFSET(22) NUMBITS(1) [],
        LC OFFSET(21) NUMBITS(1) [],
        RL OFFSET(20) NUMBITS(1) [],
        UN OFFSET(19) NUMBITS(1) [],
        WAKEUP OFFSET(17) NUMBITS(1) []
    ],

    // Reads as set while the engine is scanning descriptors; writing the
    // bit restarts the scan.
    pub RDAR [
        ACTIVE OFFSET(24) NUMBITS(1) []
    ],

    pub TDAR [
        ACTIVE OFFSET(24) NUMBITS(1) []
    ],

    pub ECR [
        RESET OFFSET(0) NUMBITS(1) [],
        ETHEREN OFFSET(1) NUMBITS(1) [],
        MAGICEN OFFSET(2) NUMBITS(1) [],
        SLEEP OFFSET(3) NUMBITS(1) [],
        EN1588 OFFSET(4) NUMBITS(1) [],
        // Gigabit operation.
        SPEED OFFSET(5) NUMBITS(1) [],
        DBGEN OFFSET(6) NUMBITS(1) [],
        // Swap descriptor bytes so we can keep them little-endian in
        // memory.
        DBSWP OFFSET(8) NUMBITS(1) []
    ],

    pub MSCR [
        // MDC = module clock / 2(n + 1).
        MII_SPEED OFFSET(1) NUMBITS(6) [],
        DIS_PRE OFFSET(7) NUMBITS(1) [],
        HOLDTIME OFFSET(8) NUMBITS(3) []
    ],

    pub MIBC [
        MIB_CLEAR OFFSET(29) NUMBITS(1) [],
        MIB_IDLE OFFSET(30) NUMBITS(1) [],
        MIB_DIS OFFSET(31) NUMBITS(1) []
    ],

    pub RCR [
        LOOP OFFSET(0) NUMBITS(1) [],
        DRT OFFSET(1) NUMBITS(1) [],
        MII_MODE OFFSET(2) NUMBITS(1) [],
        PROM OFFSET(3) NUMBITS(1) [],
        BC_REJ OFFSET(4) NUMBITS(1) [],
        FCE OFFSET(5) NUMBITS(1) [],
        RGMII_EN OFFSET(6) NUMBITS(1) [],
        RMII_MODE OFFSET(8) NUMBITS(1) [],
        // Maximum frame length.
        MAX_FL OFFSET(16) NUMBITS(14) []
    ],

    pub TCR [
        GTS OFFSET(0) NUMBITS(1) [],
        // Full-duplex enable.
        FDEN OFFSET(2) NUMBITS(1) [],
        TFC_PAUSE OFFSET(3) NUMBITS(1) [],
        RFC_PAUSE OFFSET(4) NUMBITS(1) []
    ],

    pub OPD [
        // Pause duration advertised in outgoing PAUSE frames.
        PAUSE_DUR OFFSET(0) NUMBITS(16) [],
        // The PAUSE opcode is always 1.
        OPCODE OFFSET(16) NUMBITS(16) []
    ],

    // Interrupt coalescing, used for both `txic0` and `rxic0`.
    pub TXIC [
        // Coalescing timer, in units of 64 clocks.
        ICTT OFFSET(0) NUMBITS(16) [],
        // Frame-count threshold.
        ICFT OFFSET(20) NUMBITS(8) [],
        ICCS OFFSET(30) NUMBITS(1) [],
        ICEN OFFSET(31) NUMBITS(1) []
    ],

    pub TFWR [
        TFWR OFFSET(0) NUMBITS(6) [],
        // Store and forward.
        STRFWD OFFSET(8) NUMBITS(1) []
    ],

    pub TACC [
        SHIFT16 OFFSET(0) NUMBITS(1) [],
        // Insert the IP header checksum on transmit.
        IPCHK OFFSET(3) NUMBITS(1) [],
        // Insert the protocol (TCP/UDP/ICMP) checksum on transmit.
        PROCHK OFFSET(4) NUMBITS(1) []
    ],

    pub RACC [
        PADREM OFFSET(0) NUMBITS(1) [],
        // Discard frames with invalid IP header checksums.
        IPDIS OFFSET(1) NUMBITS(1) [],
        // Discard frames with invalid protocol checksums.
        PRODIS OFFSET(2) NUMBITS(1) [],
        // Discard frames with MAC-layer errors.
        LINEDIS OFFSET(6) NUMBITS(1) [],
        SHIFT16 OFFSET(7) NUMBITS(1) []
    ],

    pub TIPG [
        // Inter-packet gap, in bytes.
        IPG OFFSET(0) NUMBITS(5) []
    ]
];

impl EnetRegisters {
    /// Reinterprets the fixed MMIO mapping as the register file.
    ///
    /// # Safety
    ///
    /// `addr` must be the virtual address at which the system description
    /// maps the ENET register page, and this must be called at most once
    /// per domain, so that register accesses are not interleaved from
    /// multiple aliases.
    pub unsafe fn from_mmio(addr: usize) -> &'static Self {
        &*(addr as *const Self)
    }
}

/// The events this driver services.
pub fn irq_mask() -> FieldValue<u32, EIR::Register> {
    EIR::TXF::SET + EIR::RXF::SET + EIR::EBERR::SET
}

/// Reduced interest while the receive path is stalled: transmit and error
/// events only.
pub fn tx_error_mask() -> FieldValue<u32, EIR::Register> {
    EIR::TXF::SET + EIR::EBERR::SET
}

/// MDC divider programmed into `MSCR::MII_SPEED`, for a roughly 20 MHz
/// management clock off the 1 GHz ENET AXI clock.
pub const MDC_DIVIDER: u32 = 24;

/// Default transmit inter-packet gap, in bytes.
pub const TIPG_DEFAULT: u32 = 12;
