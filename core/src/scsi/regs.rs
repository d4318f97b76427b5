//! NCR 53C710 register file layout

use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use crate::scsi::ScsiPhase;

/// Byte offsets of the registers in the 64-byte register window
pub mod offset {
    pub const SCNTL0: u8 = 0x00;
    pub const SCNTL1: u8 = 0x01;
    pub const SDID: u8 = 0x02;
    pub const SIEN: u8 = 0x03;
    pub const SCID: u8 = 0x04;
    pub const SXFER: u8 = 0x05;
    pub const SODL: u8 = 0x06;
    pub const SOCL: u8 = 0x07;
    pub const SFBR: u8 = 0x08;
    pub const SIDL: u8 = 0x09;
    pub const SBDL: u8 = 0x0A;
    pub const SBCL: u8 = 0x0B;
    pub const DSTAT: u8 = 0x0C;
    pub const SSTAT0: u8 = 0x0D;
    pub const SSTAT1: u8 = 0x0E;
    pub const SSTAT2: u8 = 0x0F;
    pub const DSA: u8 = 0x10;
    pub const CTEST0: u8 = 0x14;
    pub const CTEST2: u8 = 0x16;
    pub const CTEST3: u8 = 0x17;
    pub const CTEST5: u8 = 0x19;
    pub const CTEST7: u8 = 0x1B;
    pub const TEMP: u8 = 0x1C;
    pub const DFIFO: u8 = 0x20;
    pub const ISTAT: u8 = 0x21;
    pub const CTEST8: u8 = 0x22;
    pub const LCRC: u8 = 0x23;
    pub const DBC: u8 = 0x24;
    pub const DCMD: u8 = 0x27;
    pub const DNAD: u8 = 0x28;
    pub const DSP: u8 = 0x2C;
    pub const DSPS: u8 = 0x30;
    pub const SCRATCH: u8 = 0x34;
    pub const DMODE: u8 = 0x38;
    pub const DIEN: u8 = 0x39;
    pub const DWT: u8 = 0x3A;
    pub const DCNTL: u8 = 0x3B;
    pub const ADDER: u8 = 0x3C;

    /// Size of the register window
    pub const WINDOW: u8 = 0x40;
}

/// A decoded register offset. Multi-byte registers carry the byte lane.
#[derive(Debug, PartialEq, Eq, Clone, Copy, strum::IntoStaticStr)]
pub enum Reg {
    Scntl0,
    Scntl1,
    Sdid,
    Sien,
    Scid,
    Sxfer,
    Sodl,
    Socl,
    Sfbr,
    Sidl,
    Sbdl,
    Sbcl,
    Dstat,
    Sstat0,
    Sstat1,
    Sstat2,
    Dsa(usize),
    Ctest(usize),
    Temp(usize),
    Dfifo,
    Istat,
    Ctest8,
    Lcrc,
    Dbc(usize),
    Dcmd,
    Dnad(usize),
    Dsp(usize),
    Dsps(usize),
    Scratch(usize),
    Dmode,
    Dien,
    Dwt,
    Dcntl,
    Adder(usize),
}

impl Reg {
    pub fn from_offset(offset: u8) -> Option<Self> {
        let o = offset as usize;
        Some(match offset {
            0x00 => Self::Scntl0,
            0x01 => Self::Scntl1,
            0x02 => Self::Sdid,
            0x03 => Self::Sien,
            0x04 => Self::Scid,
            0x05 => Self::Sxfer,
            0x06 => Self::Sodl,
            0x07 => Self::Socl,
            0x08 => Self::Sfbr,
            0x09 => Self::Sidl,
            0x0A => Self::Sbdl,
            0x0B => Self::Sbcl,
            0x0C => Self::Dstat,
            0x0D => Self::Sstat0,
            0x0E => Self::Sstat1,
            0x0F => Self::Sstat2,
            0x10..=0x13 => Self::Dsa(o - 0x10),
            0x14..=0x1B => Self::Ctest(o - 0x14),
            0x1C..=0x1F => Self::Temp(o - 0x1C),
            0x20 => Self::Dfifo,
            0x21 => Self::Istat,
            0x22 => Self::Ctest8,
            0x23 => Self::Lcrc,
            0x24..=0x26 => Self::Dbc(o - 0x24),
            0x27 => Self::Dcmd,
            0x28..=0x2B => Self::Dnad(o - 0x28),
            0x2C..=0x2F => Self::Dsp(o - 0x2C),
            0x30..=0x33 => Self::Dsps(o - 0x30),
            0x34..=0x37 => Self::Scratch(o - 0x34),
            0x38 => Self::Dmode,
            0x39 => Self::Dien,
            0x3A => Self::Dwt,
            0x3B => Self::Dcntl,
            0x3C..=0x3F => Self::Adder(o - 0x3C),
            _ => return None,
        })
    }

    /// Register name for tracing
    pub fn name(self) -> &'static str {
        self.into()
    }
}

bitfield! {
    /// SCSI Control 0
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegScntl0(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Target mode
        pub trg: bool @ 0,
        /// Assert ATN on parity error
        pub aap: bool @ 1,
        /// Enable parity generation
        pub epg: bool @ 2,
        /// Enable parity checking
        pub epc: bool @ 3,
        /// Select with ATN on start sequence
        pub watn: bool @ 4,
        /// Start sequence
        pub start: bool @ 5,
        /// Arbitration mode
        pub arb: u8 @ 6..=7,
    }
}

bitfield! {
    /// SCSI Control 1
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegScntl1(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Assert even SCSI parity (force bad parity)
        pub aesp: bool @ 2,
        /// Assert SCSI RST
        pub rst: bool @ 3,
        /// Connected
        pub con: bool @ 4,
        /// Enable selection/reselection
        pub esr: bool @ 5,
        /// Assert data bus
        pub adb: bool @ 6,
        /// Extra clock cycle of data setup
        pub exc: bool @ 7,
    }
}

bitfield! {
    /// SCSI Status 0, also the layout of SIEN
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegSstat0(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Parity error
        pub par: bool @ 0,
        /// SCSI RST received
        pub rst: bool @ 1,
        /// Unexpected disconnect
        pub udc: bool @ 2,
        /// SCSI gross error
        pub sge: bool @ 3,
        /// Selected or reselected
        pub sel: bool @ 4,
        /// Selection timeout
        pub sto: bool @ 5,
        /// Function complete
        pub fcmp: bool @ 6,
        /// Phase mismatch
        pub ma: bool @ 7,
    }
}

bitfield! {
    /// SCSI Status 1
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegSstat1(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// SCSI parity bit of the last latched byte
        pub sdp: bool @ 0,
        /// Output register (SODL) full
        pub orf: bool @ 1,
        /// Input latch (SIDL) full
        pub ilf: bool @ 2,
    }
}

bitfield! {
    /// SCSI Status 2
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegSstat2(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Current information transfer phase (MSG, C/D, I/O)
        pub phase: u8 @ 0..=2,
        /// SCSI FIFO byte count
        pub fifo_flags: u8 @ 4..=7,
    }
}

bitfield! {
    /// SCSI bus control lines, layout of both SBCL and SOCL
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegBusLines(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub phase: u8 @ 0..=2,

        pub io: bool @ 0,
        pub cd: bool @ 1,
        pub msg: bool @ 2,
        pub atn: bool @ 3,
        pub sel: bool @ 4,
        pub bsy: bool @ 5,
        pub ack: bool @ 6,
        pub req: bool @ 7,
    }
}

bitfield! {
    /// DMA Status, also the layout of DIEN
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegDstat(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Illegal instruction detected
        pub iid: bool @ 0,
        /// Watchdog timeout
        pub wtd: bool @ 1,
        /// SCRIPTS interrupt instruction received
        pub sir: bool @ 2,
        /// Single step interrupt
        pub ssi: bool @ 3,
        /// Aborted
        pub abrt: bool @ 4,
        /// Bus fault
        pub bf: bool @ 5,
        /// Master data parity error
        pub mdpe: bool @ 6,
        /// DMA FIFO empty
        pub dfe: bool @ 7,
    }
}

bitfield! {
    /// Interrupt Status
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegIstat(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// DMA interrupt pending
        pub dip: bool @ 0,
        /// SCSI interrupt pending
        pub sip: bool @ 1,
        /// Connected
        pub con: bool @ 3,
        /// Signal process
        pub sigp: bool @ 5,
        /// Software reset
        pub rst: bool @ 6,
        /// Abort operation
        pub abrt: bool @ 7,
    }
}

bitfield! {
    /// Chip Test 2
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegCtest2(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Data acknowledge status
        pub dack: bool @ 0,
        /// Data request status
        pub dreq: bool @ 1,
        /// Tear-off status (set on read)
        pub teop: bool @ 2,
        /// SCSI FIFO parity bit of the last byte popped through CTEST3
        pub scsi_parity: bool @ 4,
    }
}

bitfield! {
    /// Chip Test 8 (write side)
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegCtest8(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Clear SCSI FIFO
        pub clf: bool @ 2,
        /// Flush DMA FIFO
        pub flf: bool @ 3,
        /// Chip revision level
        pub rev: u8 @ 4..=7,
    }
}

bitfield! {
    /// DMA Control
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RegDcntl(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// 53C700 compatibility
        pub com: bool @ 0,
        /// Start DMA operation (manual start)
        pub std: bool @ 2,
        /// Single-step mode
        pub ssm: bool @ 4,
        /// Prefetch flush
        pub pff: bool @ 6,
    }
}

/// CTEST0 bit reflecting a DATA IN phase
pub const CTEST0_DATA_IN: u8 = 1 << 0;

/// The programmer-visible register file.
///
/// Plain storage only; side effects live in the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registers {
    pub scntl0: RegScntl0,
    pub scntl1: RegScntl1,
    pub sdid: u8,
    pub sien: RegSstat0,
    pub scid: u8,
    pub sxfer: u8,
    pub sodl: u8,
    pub socl: RegBusLines,
    pub sfbr: u8,
    pub sidl: u8,
    pub sbdl: u8,
    pub sbcl: RegBusLines,
    pub dstat: RegDstat,
    pub sstat0: RegSstat0,
    pub sstat1: RegSstat1,
    pub sstat2: RegSstat2,
    pub dsa: u32,
    /// CTEST0..CTEST7
    pub ctest: [u8; 8],
    pub temp: u32,
    pub dfifo: u8,
    pub istat: RegIstat,
    pub ctest8: u8,
    pub lcrc: u8,
    /// 24-bit byte counter
    pub dbc: u32,
    pub dcmd: u8,
    pub dnad: u32,
    pub dsp: u32,
    pub dsps: u32,
    pub scratch: u32,
    pub dmode: u8,
    pub dien: RegDstat,
    pub dwt: u8,
    pub dcntl: RegDcntl,
    pub adder: u32,
}

impl Registers {
    /// Register contents after a chip reset
    pub fn new() -> Self {
        Self {
            scntl0: RegScntl0(0xC0),
            scntl1: RegScntl1(0),
            sdid: 0,
            sien: RegSstat0(0),
            scid: 0x80,
            sxfer: 0,
            sodl: 0,
            socl: RegBusLines(0),
            sfbr: 0,
            sidl: 0,
            sbdl: 0,
            sbcl: RegBusLines(0),
            dstat: RegDstat(0).with_dfe(true),
            sstat0: RegSstat0(0),
            sstat1: RegSstat1(0),
            sstat2: RegSstat2(0),
            dsa: 0,
            ctest: [0, 0, RegCtest2(0).with_dack(true).0, 0, 0, 0, 0, 0],
            temp: 0,
            dfifo: 0,
            istat: RegIstat(0),
            ctest8: 0,
            lcrc: 0,
            dbc: 0,
            dcmd: 0x40,
            dnad: 0,
            dsp: 0,
            dsps: 0,
            scratch: 0,
            dmode: 0,
            dien: RegDstat(0).with_sir(true),
            dwt: 0,
            dcntl: RegDcntl(0),
            adder: 0,
        }
    }

    /// Applies a software reset. ISTAT.RST and the CTEST registers
    /// not touched by reset survive.
    pub fn soft_reset(&mut self) {
        let istat = RegIstat(0).with_rst(self.istat.rst());
        let ctest = self.ctest;
        let (sodl, sbdl, dfifo, ctest8, lcrc, dwt, adder) = (
            self.sodl,
            self.sbdl,
            self.dfifo,
            self.ctest8,
            self.lcrc,
            self.dwt,
            self.adder,
        );

        *self = Self::new();
        self.istat = istat;
        self.ctest[0] = ctest[0];
        self.ctest[1] = ctest[1];
        self.ctest[6] = ctest[6];
        self.ctest[7] = ctest[7];
        self.sodl = sodl;
        self.sbdl = sbdl;
        self.dfifo = dfifo;
        self.ctest8 = ctest8;
        self.lcrc = lcrc;
        self.dwt = dwt;
        self.adder = adder;
    }

    /// Current information transfer phase
    pub fn phase(&self) -> ScsiPhase {
        ScsiPhase::from_bits(self.sstat2.phase())
    }

    pub fn ctest2(&self) -> RegCtest2 {
        RegCtest2(self.ctest[2])
    }
}
