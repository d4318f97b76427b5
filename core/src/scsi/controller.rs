//! NCR 53C710 SCSI I/O processor
//!
//! The controller owns the register file, the SCSI FIFO and the single
//! outstanding request. Everything that can make progress (register
//! writes, bus events, the reselection timer) funnels into
//! [`ScsiController::service`], which runs the SCRIPTS program until it
//! blocks or stops. Bus events only mutate state; they never run the
//! interpreter themselves.

use anyhow::Result;
use arrayvec::ArrayVec;
use thiserror::Error;

use crate::bus::{Address, BusMember, DmaHost};
use crate::scsi::config::ControllerConfig;
use crate::scsi::fifo::{ParitySense, ScsiFifo};
use crate::scsi::regs::{
    offset, Reg, RegBusLines, RegCtest2, RegCtest8, RegDcntl, RegDstat, RegIstat, RegScntl1,
    RegSstat0, Registers, CTEST0_DATA_IN,
};
use crate::scsi::request::{
    ActiveRequest, CommandState, MsgAction, RequestState, WaitReason,
};
use crate::scsi::timer::ReselectTimer;
use crate::scsi::{
    RequestId, ScsiBus, ScsiBusEvent, ScsiPhase, TransferDirection, MSG_IDENTIFY, MSG_SIMPLE_TAG,
};
use crate::tickable::{Tickable, Ticks};
use crate::types::ByteLanes;

pub(super) const SCSI_TRACE: bool = false;

pub const MAX_MSGIN_LEN: usize = 8;

/// DSPS value reported when a target reselected us
pub const RESELECTED_DURING_SELECTION: u32 = 0x1000;

/// Instruction-level fault, converted to status bits by the run loop
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ScriptFault {
    #[error("Illegal instruction {0:08X}")]
    IllegalInstruction(u32),
    #[error("Return without a preceding call")]
    ReturnWithoutCall,
    #[error("Data phase without an active request")]
    NoActiveRequest,
    #[error("Request buffer holds {have} bytes, {want} needed")]
    BufferUnderrun { want: usize, have: usize },
    #[error("Phase mismatch at {insn_addr:08X}: expected {expected:?}, bus in {actual:?}")]
    PhaseMismatch {
        insn_addr: u32,
        expected: ScsiPhase,
        actual: ScsiPhase,
    },
    #[error("Selection timeout (id bits {0:02X})")]
    SelectionTimeout(u8),
}

/// NCR 53C710 SCSI I/O processor
pub struct ScsiController<THost: DmaHost, TBus: ScsiBus> {
    /// Host memory and interrupt line
    pub host: THost,

    /// SCSI bus with the targets
    pub bus: TBus,

    pub(super) config: ControllerConfig,
    pub(super) regs: Registers,
    pub(super) fifo: ScsiFifo,

    /// Queued MESSAGE IN bytes
    pub(super) msg: ArrayVec<u8, MAX_MSGIN_LEN>,
    pub(super) msg_action: MsgAction,

    /// Start of a MESSAGE OUT message split by a chunk boundary
    pub(super) msgout_carry: ArrayVec<u8, 4>,
    /// MESSAGE OUT body bytes still to be skipped
    pub(super) msgout_skip: usize,

    /// Status byte of the last completed command
    pub(super) status: u8,
    pub(super) carry: bool,
    pub(super) script_active: bool,
    pub(super) waiting: WaitReason,
    pub(super) command_complete: CommandState,

    /// Selected id bits << 8, plus tag byte and TAG_VALID after a tag message
    pub(super) select_tag: u32,
    pub(super) current_lun: u8,
    pub(super) current: Option<ActiveRequest>,
    pub(super) request_state: RequestState,

    /// Reconnected by a target, the next DISCONNECT has already happened
    pub(super) reselected: bool,

    pub(super) timer: ReselectTimer,
    pub(super) cycles: Ticks,

    /// Consecutive zero instruction words skipped
    pub(super) nop_words: usize,

    irq: bool,
    in_service: bool,
}

impl<THost, TBus> ScsiController<THost, TBus>
where
    THost: DmaHost,
    TBus: ScsiBus,
{
    pub fn new(host: THost, bus: TBus, config: ControllerConfig) -> Self {
        let mut ctrl = Self {
            host,
            bus,
            config,
            regs: Registers::new(),
            fifo: ScsiFifo::new(),
            msg: ArrayVec::new(),
            msg_action: MsgAction::Command,
            msgout_carry: ArrayVec::new(),
            msgout_skip: 0,
            status: 0,
            carry: false,
            script_active: false,
            waiting: WaitReason::None,
            command_complete: CommandState::Pending,
            select_tag: 0,
            current_lun: 0,
            current: None,
            request_state: RequestState::Idle,
            reselected: false,
            timer: ReselectTimer::new(),
            cycles: 0,
            nop_words: 0,
            irq: false,
            in_service: false,
        };
        ctrl.update_irq();
        ctrl
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn regs(&self) -> &Registers {
        &self.regs
    }

    /// Current SCSI phase (SSTAT2)
    pub fn phase(&self) -> ScsiPhase {
        self.regs.phase()
    }

    pub fn wait_reason(&self) -> WaitReason {
        self.waiting
    }

    pub fn command_state(&self) -> CommandState {
        self.command_complete
    }

    pub fn request_state(&self) -> RequestState {
        self.request_state
    }

    pub fn is_script_active(&self) -> bool {
        self.script_active
    }

    pub fn carry(&self) -> bool {
        self.carry
    }

    pub fn active_request(&self) -> Option<&ActiveRequest> {
        self.current.as_ref()
    }

    /// Queued MESSAGE IN bytes
    pub fn msg_in_queue(&self) -> &[u8] {
        &self.msg
    }

    pub fn fifo(&self) -> &ScsiFifo {
        &self.fifo
    }

    pub fn reselect_deadline(&self) -> Option<Ticks> {
        self.timer.deadline()
    }

    /// Level of the interrupt output
    pub fn get_irq(&self) -> bool {
        self.irq
    }

    /// Software reset of the chip
    pub fn reset(&mut self) {
        self.soft_reset();
    }

    /// Drains pending bus events and runs the script if that made progress
    pub fn process_events(&mut self) {
        self.service();
    }

    /// The target made `len` bytes available for request `req`
    pub fn on_data_ready(&mut self, req: RequestId, len: usize) {
        self.handle_data_ready(req, len);
        self.service();
    }

    /// The target completed request `req`
    pub fn on_complete(&mut self, req: RequestId, status: u8, residual: usize) {
        self.handle_complete(req, status, residual);
        self.service();
    }

    /// The bus released request `req`
    pub fn on_cancelled(&mut self, req: RequestId) {
        self.handle_cancelled(req);
        self.service();
    }

    /// Little-endian register read of 1, 2 or 4 bytes
    pub fn read_sized(&mut self, offset: u8, size: usize) -> u32 {
        if !matches!(size, 1 | 2 | 4) {
            log::warn!("Register read of {} bytes at {:02X}", size, offset);
            return 0;
        }
        (0..size).fold(0, |acc, i| {
            acc | (u32::from(self.read_reg(offset.wrapping_add(i as u8))) << (i * 8))
        })
    }

    /// Little-endian register write of 1, 2 or 4 bytes, lowest address first
    pub fn write_sized(&mut self, offset: u8, size: usize, val: u32) {
        if !matches!(size, 1 | 2 | 4) {
            log::warn!("Register write of {} bytes at {:02X}", size, offset);
            return;
        }
        for i in 0..size {
            self.write_reg(offset.wrapping_add(i as u8), (val >> (i * 8)) as u8);
        }
    }

    /// Runs the script until it blocks or stops
    pub(super) fn service(&mut self) {
        if self.in_service {
            // The outer loop picks up whatever changed
            return;
        }
        self.in_service = true;

        let mut executed = 0;
        loop {
            self.drain_events();
            if !self.script_active {
                break;
            }
            match self.waiting {
                WaitReason::None => (),
                WaitReason::Dma | WaitReason::Reserved
                    if self.command_complete == CommandState::Complete =>
                {
                    self.waiting = WaitReason::None;
                }
                _ => break,
            }
            if executed >= self.config.max_insns_per_run {
                if SCSI_TRACE {
                    log::debug!("Yielding after {} instructions", executed);
                }
                break;
            }
            executed += 1;
            self.step();
        }

        self.in_service = false;
    }

    /// Executes one instruction
    fn step(&mut self) {
        if let Err(fault) = self.execute_instruction() {
            self.raise_fault(fault);
        }

        if self.script_active && self.waiting == WaitReason::None && self.regs.dcntl.ssm() {
            self.script_dma_interrupt(RegDstat(0).with_ssi(true));
        }
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.bus.poll_event() {
            match event {
                ScsiBusEvent::TransferData { req, len } => self.handle_data_ready(req, len),
                ScsiBusEvent::Complete {
                    req,
                    status,
                    residual,
                } => self.handle_complete(req, status, residual),
                ScsiBusEvent::Cancelled { req } => self.handle_cancelled(req),
            }
        }
    }

    fn is_current(&self, req: RequestId) -> bool {
        self.current.as_ref().is_some_and(|c| c.req == req)
    }

    fn handle_data_ready(&mut self, req: RequestId, len: usize) {
        if !self.is_current(req) {
            if SCSI_TRACE {
                log::debug!("Data ready for stale request {:?}", req);
            }
            return;
        }
        if SCSI_TRACE {
            log::debug!("Data ready: {} bytes, waiting {:?}", len, self.waiting);
        }

        let phase = self.regs.phase();
        let Some(cur) = self.current.as_mut() else {
            return;
        };
        match self.waiting {
            WaitReason::Dma => {
                cur.dma_len = len;
                cur.dma_offset = 0;
                self.waiting = WaitReason::None;
                if self.regs.dbc > 0 && matches!(phase, ScsiPhase::DataIn | ScsiPhase::DataOut) {
                    // Continue the suspended block move where it left off
                    if let Err(fault) = self.do_dma(phase == ScsiPhase::DataOut) {
                        self.raise_fault(fault);
                    }
                }
            }
            WaitReason::Reselect => {
                cur.pending = len;
                cur.dma_offset = 0;
                self.timer.schedule(self.cycles);
            }
            WaitReason::None | WaitReason::Reserved => {
                cur.dma_len = len;
                cur.dma_offset = 0;
                self.command_complete = CommandState::DataReady;
            }
        }
    }

    fn handle_complete(&mut self, req: RequestId, status: u8, residual: usize) {
        if !self.is_current(req) {
            if SCSI_TRACE {
                log::debug!("Completion of stale request {:?}", req);
            }
            return;
        }
        if SCSI_TRACE {
            log::debug!("Command complete: status {:02X}, residual {}", status, residual);
        }

        self.regs.lcrc = 0;
        self.status = status;
        self.command_complete = CommandState::Complete;
        if let Some(cur) = self.current.as_mut() {
            cur.pending = 0;
        }
        self.timer.cancel();
        self.set_phase(ScsiPhase::Status);
        self.enter(RequestState::Status);

        match self.waiting {
            WaitReason::Reselect => {
                // Target came back with status only
                self.regs.scntl1.set_con(true);
                self.regs.istat.set_con(true);
                self.waiting = WaitReason::None;
                self.script_active = true;
            }
            WaitReason::Dma => {
                self.waiting = WaitReason::None;
                self.script_active = true;
            }
            WaitReason::None | WaitReason::Reserved => (),
        }
    }

    fn handle_cancelled(&mut self, req: RequestId) {
        if !self.is_current(req) {
            return;
        }
        if SCSI_TRACE {
            log::debug!("Request {:?} cancelled", req);
        }
        self.current = None;
        self.timer.cancel();
        self.enter(RequestState::Idle);
    }

    /// Drops the outstanding request, releasing it at the bus
    pub(super) fn release_current(&mut self) {
        if let Some(cur) = self.current.take() {
            self.bus.cancel_request(cur.req);
        }
        self.timer.cancel();
    }

    pub(super) fn enter(&mut self, state: RequestState) {
        if SCSI_TRACE && state != self.request_state {
            log::debug!("Request state {:?} -> {:?}", self.request_state, state);
        }
        self.request_state = state;
    }

    /// Recomputes ISTAT.DIP/SIP and the interrupt output
    pub(super) fn update_irq(&mut self) {
        let dma_status = self.regs.dstat.with_dfe(false).0;
        self.regs.istat.set_dip(dma_status != 0);
        self.regs.istat.set_sip(self.regs.sstat0.0 != 0);

        let level =
            (dma_status & self.regs.dien.0) != 0 || (self.regs.sstat0.0 & self.regs.sien.0) != 0;
        if SCSI_TRACE && level != self.irq {
            log::debug!(
                "IRQ {} (DSTAT {:02X} SSTAT0 {:02X})",
                level,
                self.regs.dstat.0,
                self.regs.sstat0.0
            );
        }
        self.irq = level;
        self.host.set_irq_level(level);
    }

    pub(super) fn stop_script(&mut self) {
        self.script_active = false;
        self.regs.scntl1.set_con(false);
        self.regs.istat.set_con(false);
    }

    /// Latches SCSI status; stops the script if the condition is enabled
    pub(super) fn script_scsi_interrupt(&mut self, stat: RegSstat0) {
        self.regs.sstat0.0 |= stat.0;
        if stat.0 & self.regs.sien.0 != 0 {
            self.stop_script();
        }
        self.update_irq();
    }

    /// Latches DMA status and stops the script
    pub(super) fn script_dma_interrupt(&mut self, stat: RegDstat) {
        if stat.sir() {
            self.regs.dstat.set_dfe(false);
        }
        self.regs.dstat.0 |= stat.0;
        self.update_irq();
        self.stop_script();
    }

    pub(super) fn set_phase(&mut self, phase: ScsiPhase) {
        self.regs.sstat2.set_phase(phase as u8);
        self.regs.ctest[0] &= !CTEST0_DATA_IN;
        if phase == ScsiPhase::DataIn {
            self.regs.ctest[0] |= CTEST0_DATA_IN;
        }
        self.regs.sbcl.set_req(false);
    }

    pub(super) fn disconnect(&mut self) {
        if self.waiting == WaitReason::None {
            self.regs.scntl1.set_con(false);
            self.regs.istat.set_con(false);
        }
        self.regs.sstat2.set_phase(0);
    }

    pub(super) fn bad_selection(&mut self, id_bits: u8) {
        if SCSI_TRACE {
            log::debug!("Selection of id bits {:02X} timed out", id_bits);
        }
        self.regs.dstat = RegDstat(0);
        self.regs.dsps = 0;
        self.script_scsi_interrupt(RegSstat0(0).with_sto(true));
        self.disconnect();
        self.enter(RequestState::Idle);
    }

    fn clear_selection_timeout(&mut self) {
        if self.regs.sstat0.sto() {
            self.regs.sstat0.set_sto(false);
            self.release_current();
            self.update_irq();
        }
    }

    fn soft_reset(&mut self) {
        if SCSI_TRACE {
            log::debug!("Soft reset");
        }
        self.release_current();
        self.regs.soft_reset();
        self.fifo.reset();
        self.msg.clear();
        self.msg_action = MsgAction::Command;
        self.msgout_carry.clear();
        self.msgout_skip = 0;
        self.status = 0;
        self.carry = false;
        self.script_active = false;
        self.waiting = WaitReason::None;
        self.command_complete = CommandState::Pending;
        self.select_tag = 0;
        self.current_lun = 0;
        self.reselected = false;
        self.nop_words = 0;
        self.enter(RequestState::Idle);
        self.update_irq();
    }

    /// ISTAT.ABRT: cancel the request, force a disconnect
    fn abort(&mut self) {
        if SCSI_TRACE {
            log::debug!("Abort");
        }
        self.release_current();
        self.waiting = WaitReason::None;
        self.disconnect();
        self.enter(RequestState::Idle);
        self.script_dma_interrupt(RegDstat(0).with_abrt(true));
    }

    /// SCSI id bit of this chip as used on the bus
    pub(super) fn chip_id(&self) -> u8 {
        self.scid_value() & 7
    }

    fn scid_value(&self) -> u8 {
        if self.regs.scid & 0x7F == 0 {
            0x80 | self.config.host_id
        } else {
            self.regs.scid | 0x80
        }
    }

    /// Data bus contents during reselection: target and initiator id bits
    pub(super) fn reselect_id_bits(target: u8, host: u8) -> u8 {
        let bit = |id: u8| if id == 0 { 0 } else { 1u8 << id };
        bit(target) | bit(host)
    }

    /// Reconnects to the outstanding request on behalf of its target
    pub(super) fn reselect(&mut self) {
        let host_id = self.chip_id();
        let Some(cur) = self.current.as_mut() else {
            return;
        };
        if cur.pending > 0 {
            cur.dma_len = std::mem::take(&mut cur.pending);
            cur.dma_offset = 0;
        }
        let (target, lun, tag, resume, direction) = (
            cur.target,
            cur.lun,
            cur.queue_tag(),
            cur.resume_offset,
            cur.direction,
        );
        if SCSI_TRACE {
            log::debug!(
                "Reselected by target {} lun {}, resuming at {:08X}",
                target,
                lun,
                resume
            );
        }

        self.enter(RequestState::Selecting);
        self.regs.scntl1.set_con(true);
        self.regs.istat.set_con(true);
        self.regs.sbcl = RegBusLines(0)
            .with_io(true)
            .with_cd(true)
            .with_msg(true)
            .with_bsy(true)
            .with_sel(true)
            .with_req(true);
        self.regs.sfbr = Self::reselect_id_bits(target, host_id);
        self.set_phase(ScsiPhase::MessageIn);
        self.enter(RequestState::MessageIn);

        self.add_msg_byte(MSG_IDENTIFY | (lun & 7));
        if let Some(tag) = tag {
            self.add_msg_byte(MSG_SIMPLE_TAG);
            self.add_msg_byte(tag);
        }
        self.msg_action = match direction {
            TransferDirection::Out => MsgAction::DataOut,
            TransferDirection::In | TransferDirection::None => MsgAction::DataIn,
        };

        self.regs.dsp = resume.wrapping_sub(8);
        self.regs.dsps = RESELECTED_DURING_SELECTION;
        self.command_complete = CommandState::Pending;
        self.waiting = WaitReason::None;
        self.reselected = true;

        // Resume unless the host wants to handle the reselection itself.
        // SEL is only latched for the host, a stale SIP would hold off the
        // next reselection.
        let host_handles = self.regs.sien.sel();
        if host_handles {
            self.regs.sstat0.set_sel(true);
        }
        self.script_active = !host_handles;
        self.update_irq();
    }

    /// Reselection retry timer expired
    pub(super) fn reselection_retry(&mut self) {
        let Some(cur) = self.current.as_ref() else {
            return;
        };
        if self.waiting != WaitReason::Reselect || !cur.has_data() {
            return;
        }
        if self.regs.istat.sip() || self.regs.istat.dip() {
            self.timer
                .schedule(self.cycles + self.config.reselect_retry_delay);
            return;
        }
        self.reselect();
    }

    /// Register read with side effects
    pub fn read_reg(&mut self, offset: u8) -> u8 {
        let Some(reg) = Reg::from_offset(offset) else {
            return 0;
        };

        let val = match reg {
            Reg::Scntl0 => self.regs.scntl0.0,
            Reg::Scntl1 => self.regs.scntl1.0,
            Reg::Sdid => self.regs.sdid,
            Reg::Sien => self.regs.sien.0,
            Reg::Scid => self.scid_value(),
            Reg::Sxfer => self.regs.sxfer,
            Reg::Sodl => self.regs.sodl,
            Reg::Socl => self.regs.socl.0,
            Reg::Sfbr => self.regs.sfbr,
            Reg::Sidl => self.regs.sidl,
            Reg::Sbdl => self.regs.sbdl,
            Reg::Sbcl => self.read_sbcl(),
            Reg::Dstat => self.read_dstat(),
            Reg::Sstat0 => self.read_sstat0(),
            Reg::Sstat1 => self.regs.sstat1.0,
            Reg::Sstat2 => self
                .regs
                .sstat2
                .with_fifo_flags(self.fifo.len() as u8)
                .0,
            Reg::Dsa(lane) => self.regs.dsa.lane(lane),
            Reg::Ctest(2) => {
                let val = self.regs.ctest[2];
                self.regs.ctest[2] = RegCtest2(val).with_teop(true).0;
                val
            }
            Reg::Ctest(3) => self.read_ctest3(),
            Reg::Ctest(n) => self.regs.ctest[n],
            Reg::Temp(lane) => self.regs.temp.lane(lane),
            Reg::Dfifo => std::mem::take(&mut self.regs.dfifo),
            Reg::Istat => self.regs.istat.0,
            Reg::Ctest8 => self.regs.ctest8,
            Reg::Lcrc => self.regs.lcrc,
            Reg::Dbc(lane) => self.regs.dbc.lane(lane),
            Reg::Dcmd => self.regs.dcmd,
            Reg::Dnad(lane) => self.regs.dnad.lane(lane),
            Reg::Dsp(lane) => self.regs.dsp.lane(lane),
            Reg::Dsps(lane) => self.regs.dsps.lane(lane),
            Reg::Scratch(lane) => self.regs.scratch.lane(lane),
            Reg::Dmode => self.regs.dmode,
            Reg::Dien => self.regs.dien.0,
            Reg::Dwt => self.regs.dwt,
            Reg::Dcntl => self.regs.dcntl.0,
            Reg::Adder(lane) => self.regs.adder.lane(lane),
        };

        if SCSI_TRACE {
            log::debug!("Read {} ({:02X}): {:02X}", reg.name(), offset, val);
        }
        val
    }

    fn read_sbcl(&self) -> u8 {
        if !self.regs.scntl1.con() {
            return 0;
        }
        let mut lines = self.regs.sbcl;
        lines.set_phase(self.regs.sstat2.phase());
        if self.regs.socl.atn() {
            lines.set_atn(true);
        }
        lines.0
    }

    fn read_dstat(&mut self) -> u8 {
        let val = self.regs.dstat.0;
        self.regs.dstat = RegDstat(0).with_dfe(true);
        self.update_irq();

        let has_pending = self.current.as_ref().is_some_and(|c| c.pending > 0);
        if self.waiting == WaitReason::Reselect
            && self.current.as_ref().is_some_and(ActiveRequest::has_data)
        {
            self.timer.schedule(self.cycles);
        }
        if has_pending
            && self.command_complete == CommandState::Complete
            && (!self.script_active || self.waiting != WaitReason::None)
        {
            if let Some(cur) = self.current.as_mut() {
                cur.pending = 0;
            }
            self.waiting = WaitReason::None;
            self.script_active = true;
            self.service();
        }
        val
    }

    fn read_sstat0(&mut self) -> u8 {
        let val = self.regs.sstat0.0;
        if val != 0 && !self.regs.sstat0.sto() {
            self.regs.sstat0 = RegSstat0(0);
            self.regs.sbcl = RegBusLines(0);
            self.update_irq();
        }
        val
    }

    /// Pops the SCSI FIFO for chip test purposes
    fn read_ctest3(&mut self) -> u8 {
        if self.fifo.is_empty() {
            return self.regs.ctest[3];
        }
        let (data, parity) = self.fifo.dequeue();
        self.regs.ctest[2] = RegCtest2(self.regs.ctest[2])
            .with_scsi_parity(parity)
            .0;
        data
    }

    /// Register write with side effects
    pub fn write_reg(&mut self, offset: u8, val: u8) {
        let Some(reg) = Reg::from_offset(offset) else {
            return;
        };
        if SCSI_TRACE {
            log::debug!("Write {} ({:02X}): {:02X}", reg.name(), offset, val);
        }

        match reg {
            Reg::Scntl0 => self.regs.scntl0.0 = val,
            Reg::Scntl1 => self.write_scntl1(val),
            Reg::Sdid => self.regs.sdid = val & 0x0F,
            Reg::Sien => {
                self.regs.sien = RegSstat0(val);
                self.update_irq();
            }
            Reg::Scid => self.regs.scid = val,
            Reg::Sxfer => self.regs.sxfer = val,
            Reg::Sodl => {
                self.regs.sodl = val;
                self.regs.sstat1.set_orf(true);
            }
            Reg::Socl => self.regs.socl = RegBusLines(val),
            Reg::Sfbr => self.regs.sfbr = val,
            Reg::Sbcl => {
                self.regs.sbcl = RegBusLines(val);
                self.set_phase(ScsiPhase::from_bits(val));
            }
            Reg::Sidl
            | Reg::Sbdl
            | Reg::Dstat
            | Reg::Sstat0
            | Reg::Sstat1
            | Reg::Sstat2
            | Reg::Dfifo
            | Reg::Adder(_) => {
                // Read-only
            }
            Reg::Dsa(lane) => self.regs.dsa.set_lane(lane, val),
            Reg::Ctest(n) => self.regs.ctest[n] = val,
            Reg::Temp(lane) => self.regs.temp.set_lane(lane, val),
            Reg::Istat => self.write_istat(val),
            Reg::Ctest8 => self.write_ctest8(val),
            Reg::Lcrc => self.regs.lcrc = val,
            Reg::Dbc(lane) => self.regs.dbc.set_lane(lane, val),
            Reg::Dcmd => self.regs.dcmd = val,
            Reg::Dnad(lane) => self.regs.dnad.set_lane(lane, val),
            Reg::Dsp(lane) => {
                self.regs.dsp.set_lane(lane, val);
                if lane == 3 {
                    self.start_script();
                }
            }
            Reg::Dsps(lane) => self.regs.dsps.set_lane(lane, val),
            Reg::Scratch(lane) => self.regs.scratch.set_lane(lane, val),
            Reg::Dmode => self.regs.dmode = val,
            Reg::Dien => {
                self.regs.dien = RegDstat(val);
                self.update_irq();
            }
            Reg::Dwt => self.regs.dwt = val,
            Reg::Dcntl => self.write_dcntl(val),
        }
    }

    /// DSP most significant byte written: run from DSP
    fn start_script(&mut self) {
        self.waiting = WaitReason::None;
        self.script_active = true;
        self.regs.istat.set_con(true);
        self.clear_selection_timeout();
        self.service();
    }

    fn write_scntl1(&mut self, val: u8) {
        let old = self.regs.scntl1;
        let new = RegScntl1(val);
        self.regs.scntl1 = new;

        if SCSI_TRACE && old.aesp() != new.aesp() {
            log::debug!(
                "SCSI parity sense now {}",
                if new.aesp() { "even" } else { "odd" }
            );
        }

        if new.rst() {
            if !old.rst() {
                log::debug!("SCSI bus reset");
                self.soft_reset();
                self.regs.scntl1 = new;
            }
            if !self.regs.sstat0.rst() {
                self.script_scsi_interrupt(RegSstat0(0).with_rst(true));
            }
        } else if self.regs.sstat0.rst() {
            self.regs.sstat0.set_rst(false);
            self.update_irq();
        }
    }

    fn write_istat(&mut self, val: u8) {
        let old = self.regs.istat;
        let new = RegIstat(val);

        if old.dip() && !new.dip() {
            self.regs.dstat = RegDstat(0).with_dfe(true);
            self.regs.dsps = 0;
        }
        if old.sip() && !new.sip() {
            self.regs.sstat0 = RegSstat0(0);
        }

        // DIP and SIP are status, not writable
        self.regs.istat = new.with_dip(old.dip()).with_sip(old.sip());
        self.update_irq();

        if new.abrt() {
            self.abort();
        }
    }

    fn write_ctest8(&mut self, val: u8) {
        let cmd = RegCtest8(val);
        if cmd.flf() {
            self.regs.dstat.set_dfe(true);
        }
        if cmd.clf() {
            self.fifo.reset();
            self.regs.dstat.set_dfe(true);
        }
        self.regs.ctest8 = cmd.with_clf(false).with_flf(false).0;
    }

    fn write_dcntl(&mut self, val: u8) {
        let dcntl = RegDcntl(val).with_pff(false);
        self.regs.dcntl = dcntl;
        if dcntl.std() {
            self.waiting = WaitReason::None;
            self.script_active = true;
            self.service();
            self.regs.dcntl.set_std(false);
        }
    }

    pub(super) fn parity_sense(&self) -> ParitySense {
        if self.regs.scntl1.aesp() {
            ParitySense::Even
        } else {
            ParitySense::Odd
        }
    }
}

impl<THost, TBus> BusMember<Address> for ScsiController<THost, TBus>
where
    THost: DmaHost,
    TBus: ScsiBus,
{
    fn read(&mut self, addr: Address) -> Option<u8> {
        let offset = (addr & 0xFF) as u8;
        (offset < offset::WINDOW).then(|| self.read_reg(offset))
    }

    fn write(&mut self, addr: Address, val: u8) -> Option<()> {
        let offset = (addr & 0xFF) as u8;
        if offset >= offset::WINDOW {
            return None;
        }
        self.write_reg(offset, val);
        Some(())
    }
}

impl<THost, TBus> Tickable for ScsiController<THost, TBus>
where
    THost: DmaHost,
    TBus: ScsiBus,
{
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        self.cycles += ticks;
        self.drain_events();
        if self.timer.take_expired(self.cycles) {
            self.reselection_retry();
        }
        self.service();
        Ok(ticks)
    }
}
