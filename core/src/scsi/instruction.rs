//! SCRIPTS instruction encoding
//!
//! Every instruction is two 32-bit words (three for memory-to-memory
//! moves), fetched big-endian. The class is in the top two bits of the
//! first word.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use proc_bitfield::bitfield;

bitfield! {
    /// Block move (class 0)
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct BlockMoveInsn(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Byte count
        pub count: u32 @ 0..=23,
        /// Expected phase
        pub phase: u8 @ 24..=26,
        /// Chained move / wait-for-valid-phase (initiator mode: ignored)
        pub opcode: bool @ 27,
        /// Count and address from a DSA-relative descriptor
        pub table_indirect: bool @ 28,
        /// Second word points to the real address
        pub indirect: bool @ 29,
    }
}

bitfield! {
    /// I/O instruction (class 1, opcode 0..=4)
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct IoInsn(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// DSA-relative offset of the id word (table indirect)
        pub table_offset: u32 @ 0..=23,
        /// Set/Clear ATN
        pub atn: bool @ 3,
        /// Set/Clear carry
        pub carry: bool @ 10,
        /// Target id bits
        pub id_bits: u8 @ 16..=23,
        /// Select with ATN
        pub select_atn: bool @ 24,
        pub table_indirect: bool @ 25,
        /// Alternate address is DSP-relative
        pub relative: bool @ 26,
        pub opcode: u8 @ 27..=29,
    }
}

bitfield! {
    /// Read/write register instruction (class 1, opcode 5..=7)
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RegRwInsn(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Register address bit 7
        pub reg_high: bool @ 7,
        /// Immediate operand
        pub data: u8 @ 8..=15,
        /// Register address bits 0..=6
        pub reg_low: u8 @ 16..=22,
        /// Use SFBR as the second operand (read-modify-write only)
        pub use_sfbr: bool @ 23,
        pub operator: u8 @ 24..=26,
        pub opcode: u8 @ 27..=29,
    }
}

impl RegRwInsn {
    /// Register offset addressed by this instruction
    pub fn reg(self) -> u8 {
        self.reg_low() | if self.reg_high() { 0x80 } else { 0 }
    }
}

bitfield! {
    /// Transfer control (class 2)
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct TransferControlInsn(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Data to compare against SFBR
        pub data: u8 @ 0..=7,
        /// Inverted compare mask
        pub mask: u8 @ 8..=15,
        /// Wait for valid phase (ignored)
        pub wait: bool @ 16,
        pub compare_phase: bool @ 17,
        pub compare_data: bool @ 18,
        /// Condition polarity: act when the comparison is true
        pub if_true: bool @ 19,
        /// Interrupt-on-the-fly
        pub on_the_fly: bool @ 20,
        pub test_carry: bool @ 21,
        /// Target address is DSP-relative
        pub relative: bool @ 23,
        pub phase: u8 @ 24..=26,
        pub opcode: u8 @ 27..=29,
    }
}

bitfield! {
    /// Memory move and load/store (class 3)
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct MemoryInsn(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Byte count of a memory-to-memory move
        pub count: u32 @ 0..=23,
        /// Load/store byte count, 0 means 8
        pub ls_count: u8 @ 0..=2,
        /// First register of a load/store
        pub reg: u8 @ 16..=23,
        /// Load (set) or store (clear)
        pub load: bool @ 24,
        /// Address is DSA-relative
        pub dsa_relative: bool @ 28,
        /// Load/store (set) or memory-to-memory (clear)
        pub load_store: bool @ 29,
    }
}

impl MemoryInsn {
    pub fn ls_len(self) -> usize {
        match self.ls_count() {
            0 => 8,
            n => n as usize,
        }
    }
}

/// I/O opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum IoOpcode {
    Select = 0,
    Disconnect = 1,
    WaitReselect = 2,
    Set = 3,
    Clear = 4,
}

/// Register read/write opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum RegRwOpcode {
    /// SFBR op data -> register
    FromSfbr = 5,
    /// register op data -> SFBR
    ToSfbr = 6,
    /// register op (data or SFBR) -> register
    ReadModifyWrite = 7,
}

/// Transfer control opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum TransferOpcode {
    Jump = 0,
    Call = 1,
    Return = 2,
    Interrupt = 3,
}

/// A decoded first instruction word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    BlockMove(BlockMoveInsn),
    Io(IoOpcode, IoInsn),
    RegRw(RegRwOpcode, RegRwInsn),
    /// None for the reserved opcodes 4..=7
    TransferControl(Option<TransferOpcode>, TransferControlInsn),
    MemoryMove(MemoryInsn),
    LoadStore(MemoryInsn),
}

impl Instruction {
    pub fn decode(word: u32) -> Self {
        match word >> 30 {
            0 => Self::BlockMove(BlockMoveInsn(word)),
            1 => {
                let opcode = ((word >> 27) & 7) as u8;
                if let Some(io) = IoOpcode::from_u8(opcode) {
                    Self::Io(io, IoInsn(word))
                } else {
                    // 5..=7
                    let rw = RegRwOpcode::from_u8(opcode).unwrap_or(RegRwOpcode::ReadModifyWrite);
                    Self::RegRw(rw, RegRwInsn(word))
                }
            }
            2 => {
                let insn = TransferControlInsn(word);
                Self::TransferControl(TransferOpcode::from_u8(insn.opcode()), insn)
            }
            _ => {
                let insn = MemoryInsn(word);
                if insn.load_store() {
                    Self::LoadStore(insn)
                } else {
                    Self::MemoryMove(insn)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_block_move() {
        // MOVE 512, buf, WHEN DATA_IN
        let Instruction::BlockMove(bm) = Instruction::decode(0x0100_0200) else {
            panic!()
        };
        assert_eq!(bm.count(), 512);
        assert_eq!(bm.phase(), 1);
        assert!(!bm.indirect());
        assert!(!bm.table_indirect());

        let Instruction::BlockMove(bm) = Instruction::decode(0x1E00_0010) else {
            panic!()
        };
        assert!(bm.table_indirect());
        assert_eq!(bm.phase(), 6);
    }

    #[test]
    fn decode_io() {
        // SELECT ATN id 2
        let Instruction::Io(op, io) = Instruction::decode(0x4104_0000) else {
            panic!()
        };
        assert_eq!(op, IoOpcode::Select);
        assert!(io.select_atn());
        assert_eq!(io.id_bits(), 0x04);

        // SET CARRY
        let Instruction::Io(op, io) = Instruction::decode(0x5800_0400) else {
            panic!()
        };
        assert_eq!(op, IoOpcode::Set);
        assert!(io.carry());
        assert!(!io.atn());

        assert!(matches!(
            Instruction::decode(0x4800_0000),
            Instruction::Io(IoOpcode::Disconnect, _)
        ));
    }

    #[test]
    fn decode_reg_rw() {
        // MOVE SCRATCH0 + 0x10 TO SFBR
        let Instruction::RegRw(op, rw) = Instruction::decode(0x7634_1000) else {
            panic!()
        };
        assert_eq!(op, RegRwOpcode::ToSfbr);
        assert_eq!(rw.operator(), 6);
        assert_eq!(rw.reg(), 0x34);
        assert_eq!(rw.data(), 0x10);

        let Instruction::RegRw(op, rw) = Instruction::decode(0x7FB4_0080) else {
            panic!()
        };
        assert_eq!(op, RegRwOpcode::ReadModifyWrite);
        assert!(rw.use_sfbr());
        assert_eq!(rw.reg(), 0xB4);
    }

    #[test]
    fn decode_transfer_control() {
        // JUMP rel, IF MSG_IN
        let Instruction::TransferControl(op, tc) = Instruction::decode(0x878A_0000) else {
            panic!()
        };
        assert_eq!(op, Some(TransferOpcode::Jump));
        assert!(tc.relative());
        assert!(tc.compare_phase());
        assert!(tc.if_true());
        assert_eq!(tc.phase(), 7);

        assert!(matches!(
            Instruction::decode(0xA000_0000),
            Instruction::TransferControl(None, _)
        ));
    }

    #[test]
    fn decode_memory() {
        let Instruction::MemoryMove(mm) = Instruction::decode(0xC000_0100) else {
            panic!()
        };
        assert_eq!(mm.count(), 0x100);

        // LOAD SCRATCH0, 4, DSAREL(8)
        let Instruction::LoadStore(ls) = Instruction::decode(0xF134_0004) else {
            panic!()
        };
        assert!(ls.load());
        assert!(ls.dsa_relative());
        assert_eq!(ls.reg(), 0x34);
        assert_eq!(ls.ls_len(), 4);
        assert_eq!(MemoryInsn(0xE134_0000).ls_len(), 8);
    }
}
