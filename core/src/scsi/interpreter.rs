//! SCRIPTS instruction execution

use crate::bus::{Address, DmaHost};
use crate::scsi::alu::AluOp;
use crate::scsi::controller::{ScriptFault, ScsiController, SCSI_TRACE};
use crate::scsi::instruction::{
    BlockMoveInsn, Instruction, IoInsn, IoOpcode, MemoryInsn, RegRwInsn, RegRwOpcode,
    TransferControlInsn, TransferOpcode,
};
use crate::scsi::regs::{RegDstat, RegSstat0};
use crate::scsi::request::{CommandState, RequestState, WaitReason};
use crate::scsi::{ScsiBus, ScsiPhase};
use crate::util::{id_from_bits, offset24};

/// Memory-to-memory moves are split into chunks of this size
const MEMCPY_CHUNK: usize = 4096;

impl<THost, TBus> ScsiController<THost, TBus>
where
    THost: DmaHost,
    TBus: ScsiBus,
{
    /// Reads a SCRIPTS word (big-endian) from host memory
    pub(super) fn read_dword(&mut self, addr: Address) -> u32 {
        self.host.dma_read_be32(addr)
    }

    /// Fetches, decodes and executes the instruction at DSP
    pub(super) fn execute_instruction(&mut self) -> Result<(), ScriptFault> {
        let insn_addr = self.regs.dsp;
        let word = self.read_dword(insn_addr);

        if word == 0 {
            // Padding between instructions
            self.regs.dsp = self.regs.dsp.wrapping_add(4);
            self.nop_words += 1;
            if self.nop_words >= self.config.max_nop_words {
                self.nop_words = 0;
                return Err(ScriptFault::IllegalInstruction(word));
            }
            return Ok(());
        }
        self.nop_words = 0;

        let addr = self.read_dword(insn_addr.wrapping_add(4));
        self.regs.dsps = addr;
        self.regs.dcmd = (word >> 24) as u8;
        self.regs.dbc = word & 0x00FF_FFFF;
        self.regs.dsp = insn_addr.wrapping_add(8);

        let insn = Instruction::decode(word);
        if SCSI_TRACE {
            log::debug!("{:08X}: {:08X} {:08X} {:?}", insn_addr, word, addr, insn);
        }

        let result = match insn {
            Instruction::BlockMove(bm) => self.op_block_move(insn_addr, bm, addr),
            Instruction::Io(op, io) => self.op_io(op, io, addr),
            Instruction::RegRw(op, rw) => {
                self.op_reg_rw(op, rw);
                Ok(())
            }
            Instruction::TransferControl(op, tc) => self.op_transfer_control(op, tc, word, addr),
            Instruction::MemoryMove(mm) => {
                self.op_memory_move(mm, addr);
                Ok(())
            }
            Instruction::LoadStore(ls) => {
                self.op_load_store(ls, addr);
                Ok(())
            }
        };
        self.reselected = false;
        result
    }

    /// Converts a fault to status bits
    pub(super) fn raise_fault(&mut self, fault: ScriptFault) {
        match fault {
            ScriptFault::PhaseMismatch {
                insn_addr, actual, ..
            } => {
                if SCSI_TRACE {
                    log::debug!("{}", fault);
                }
                self.regs.dsp = insn_addr;
                self.set_phase(actual);
                self.regs.sbcl.set_req(true);
                self.script_scsi_interrupt(RegSstat0(0).with_ma(true));
                self.stop_script();
            }
            ScriptFault::SelectionTimeout(id_bits) => self.bad_selection(id_bits),
            ScriptFault::BufferUnderrun { .. } => {
                log::error!("{}", fault);
                self.script_dma_interrupt(RegDstat(0).with_iid(true));
            }
            ScriptFault::IllegalInstruction(_)
            | ScriptFault::ReturnWithoutCall
            | ScriptFault::NoActiveRequest => {
                log::warn!("SCRIPTS fault at {:08X}: {}", self.regs.dsp, fault);
                self.script_dma_interrupt(RegDstat(0).with_iid(true));
            }
        }
    }

    /// Computes a DSP-relative address, latching it in ADDER
    fn relative(&mut self, disp: u32) -> u32 {
        let target = offset24(self.regs.dsp, disp);
        self.regs.adder = target;
        target
    }

    fn op_block_move(
        &mut self,
        insn_addr: u32,
        insn: BlockMoveInsn,
        mut addr: u32,
    ) -> Result<(), ScriptFault> {
        if self.regs.sstat0.sto() {
            // Selection timed out; wait for the host to deal with it
            self.stop_script();
            self.update_irq();
            return Ok(());
        }

        if insn.indirect() {
            addr = self.read_dword(addr);
        } else if insn.table_indirect() {
            let table = offset24(self.regs.dsa, addr);
            let mut desc = [0; 8];
            self.host.dma_read(table, &mut desc);
            let [c0, c1, c2, _, a0, a1, a2, a3] = desc;
            self.regs.dbc = u32::from_le_bytes([c0, c1, c2, 0]);
            addr = u32::from_le_bytes([a0, a1, a2, a3]);
        }

        let expected = ScsiPhase::from_bits(insn.phase());
        let actual = self.regs.phase();
        if expected != actual {
            return Err(ScriptFault::PhaseMismatch {
                insn_addr,
                expected,
                actual,
            });
        }

        self.regs.dnad = addr;
        match expected {
            ScsiPhase::DataIn | ScsiPhase::DataOut => {
                if self.current.is_none() {
                    return Err(ScriptFault::NoActiveRequest);
                }
                let out = expected == ScsiPhase::DataOut;
                self.waiting = WaitReason::Dma;
                self.enter(if out {
                    RequestState::DataOut
                } else {
                    RequestState::DataIn
                });
                self.do_dma(out)?;
            }
            ScsiPhase::Command => self.do_command()?,
            ScsiPhase::Status => self.do_status(),
            ScsiPhase::MessageOut => self.do_msgout(),
            ScsiPhase::MessageIn => self.do_msgin(),
            ScsiPhase::Reserved4 | ScsiPhase::Reserved5 => {
                log::warn!("Block move in reserved phase {:?}", expected);
            }
        }

        self.regs.ctest[5] = (self.regs.ctest[5] & !3) | ((self.regs.dbc >> 8) & 3) as u8;
        Ok(())
    }

    fn op_io(&mut self, op: IoOpcode, insn: IoInsn, addr: u32) -> Result<(), ScriptFault> {
        let id_bits = if insn.table_indirect() {
            let table = offset24(self.regs.dsa, insn.table_offset());
            (self.read_dword(table) >> 16) as u8
        } else {
            insn.id_bits()
        };
        let alt = if insn.relative() {
            self.relative(addr)
        } else {
            addr
        };
        self.regs.dnad = alt;

        match op {
            IoOpcode::Select => {
                self.regs.sdid = id_bits;
                if self.regs.scntl1.con() {
                    if !insn.select_atn() {
                        // Already connected (reselected), take the alternate path
                        self.regs.dsp = alt;
                    }
                    return Ok(());
                }

                let id = id_from_bits(id_bits).unwrap_or(0);
                if self.bus.find_target(id, 0).is_none() {
                    return Err(ScriptFault::SelectionTimeout(id_bits));
                }
                if SCSI_TRACE {
                    log::debug!("Selected target {} (ATN {})", id, insn.select_atn());
                }

                self.enter(RequestState::Selecting);
                self.select_tag = u32::from(id_bits) << 8;
                self.msgout_carry.clear();
                self.msgout_skip = 0;
                self.current_lun = 0;
                self.regs.scntl1.set_con(true);
                self.regs.istat.set_con(true);
                if insn.select_atn() {
                    self.regs.socl.set_atn(true);
                    self.set_phase(ScsiPhase::MessageOut);
                } else {
                    self.set_phase(ScsiPhase::Command);
                }
            }
            IoOpcode::Disconnect => {
                if self.reselected {
                    // Resumed after reselection, the bus is ours again
                    if SCSI_TRACE {
                        log::debug!("Disconnect completed by reselection");
                    }
                } else if self.command_complete != CommandState::Pending {
                    self.regs.scntl1.set_con(false);
                    self.regs.istat.set_con(false);
                    if self.waiting == WaitReason::Reselect {
                        self.waiting = WaitReason::None;
                    }
                    self.enter(RequestState::Idle);
                } else {
                    let resume = self.regs.dsp;
                    if let Some(cur) = self.current.as_mut() {
                        cur.resume_offset = resume;
                    }
                    if SCSI_TRACE {
                        log::debug!("Disconnected, resume at {:08X}", resume);
                    }
                    self.waiting = WaitReason::Reselect;
                    self.stop_script();
                    self.enter(RequestState::Disconnected);
                    self.timer
                        .schedule(self.cycles + self.config.reselect_retry_delay);
                }
            }
            IoOpcode::WaitReselect => {
                if !self.regs.sien.sel() {
                    self.waiting = WaitReason::Reselect;
                    self.stop_script();
                    if self
                        .current
                        .as_ref()
                        .is_some_and(|c| c.has_data())
                    {
                        self.timer.schedule(self.cycles);
                    }
                }
            }
            IoOpcode::Set | IoOpcode::Clear => {
                let set = op == IoOpcode::Set;
                if insn.atn() {
                    self.regs.socl.set_atn(set);
                    if set {
                        self.set_phase(ScsiPhase::MessageOut);
                    }
                }
                if insn.carry() {
                    self.carry = set;
                }
            }
        }
        Ok(())
    }

    fn op_reg_rw(&mut self, op: RegRwOpcode, insn: RegRwInsn) {
        let reg = insn.reg();
        let alu = AluOp::from_operator(insn.operator());
        let data = insn.data();

        let (op0, op1) = match op {
            RegRwOpcode::FromSfbr => (self.regs.sfbr, data),
            RegRwOpcode::ToSfbr | RegRwOpcode::ReadModifyWrite if alu == AluOp::Move => (0, data),
            RegRwOpcode::ToSfbr => (self.read_reg(reg), data),
            RegRwOpcode::ReadModifyWrite => {
                let op1 = if insn.use_sfbr() { self.regs.sfbr } else { data };
                (self.read_reg(reg), op1)
            }
        };
        let (result, carry) = alu.apply(op0, op1, self.carry);
        self.carry = carry;

        if SCSI_TRACE {
            log::debug!(
                "{:?} reg {:02X}: {:02X} {:?} {:02X} = {:02X}",
                op,
                reg,
                op0,
                alu,
                op1,
                result
            );
        }

        match op {
            RegRwOpcode::FromSfbr | RegRwOpcode::ReadModifyWrite => self.write_reg(reg, result),
            RegRwOpcode::ToSfbr => self.regs.sfbr = result,
        }
    }

    /// Evaluates the jump condition: each enabled test must agree with
    /// the polarity bit
    fn transfer_condition(&self, insn: TransferControlInsn) -> bool {
        let want = insn.if_true();
        let mut cond = want;

        if cond == want && insn.test_carry() {
            cond = self.carry;
        }
        if cond == want && insn.compare_phase() {
            cond = self.regs.sstat2.phase() == insn.phase();
        }
        if cond == want && insn.compare_data() {
            let mask = !insn.mask();
            cond = (self.regs.sfbr & mask) == (insn.data() & mask);
        }
        cond == want
    }

    fn op_transfer_control(
        &mut self,
        op: Option<TransferOpcode>,
        insn: TransferControlInsn,
        word: u32,
        addr: u32,
    ) -> Result<(), ScriptFault> {
        if self.regs.sstat0.sto() {
            return Ok(());
        }

        let Some(op) = op else {
            return Err(ScriptFault::IllegalInstruction(word));
        };
        if !self.transfer_condition(insn) {
            if SCSI_TRACE {
                log::debug!("{:?} not taken", op);
            }
            return Ok(());
        }

        let target = if insn.relative() {
            self.relative(addr)
        } else {
            addr
        };

        match op {
            TransferOpcode::Jump => self.regs.dsp = target,
            TransferOpcode::Call => {
                // Single return slot
                self.regs.temp = self.regs.dsp;
                self.regs.dsp = target;
            }
            TransferOpcode::Return => {
                if self.regs.temp == 0 {
                    return Err(ScriptFault::ReturnWithoutCall);
                }
                self.regs.dsp = self.regs.temp;
            }
            TransferOpcode::Interrupt => {
                self.regs.dsps = addr;
                if insn.on_the_fly() {
                    self.update_irq();
                } else {
                    if SCSI_TRACE {
                        log::debug!("SCRIPTS interrupt {:08X}", addr);
                    }
                    self.script_dma_interrupt(RegDstat(0).with_sir(true));
                }
            }
        }
        Ok(())
    }

    fn op_memory_move(&mut self, insn: MemoryInsn, src: u32) {
        let dest = self.read_dword(self.regs.dsp);
        self.regs.dsp = self.regs.dsp.wrapping_add(4);
        self.regs.dnad = dest;

        let mut remaining = insn.count() as usize;
        let (mut src, mut dest) = (src, dest);
        let mut buf = vec![0; remaining.min(MEMCPY_CHUNK)];
        while remaining > 0 {
            let chunk = remaining.min(MEMCPY_CHUNK);
            self.host.dma_read(src, &mut buf[..chunk]);
            self.host.dma_write(dest, &buf[..chunk]);
            src = src.wrapping_add(chunk as u32);
            dest = dest.wrapping_add(chunk as u32);
            remaining -= chunk;
        }
        self.regs.dbc = 0;
    }

    fn op_load_store(&mut self, insn: MemoryInsn, addr: u32) {
        let addr = if insn.dsa_relative() {
            offset24(self.regs.dsa, addr)
        } else {
            addr
        };
        let len = insn.ls_len();
        let reg = insn.reg();

        if insn.load() {
            let mut data = [0; 8];
            self.host.dma_read(addr, &mut data[..len]);
            for (i, &b) in data[..len].iter().enumerate() {
                self.write_reg(reg.wrapping_add(i as u8), b);
            }
        } else {
            let data: Vec<u8> = (0..len)
                .map(|i| self.read_reg(reg.wrapping_add(i as u8)))
                .collect();
            self.host.dma_write(addr, &data);
        }
    }
}
