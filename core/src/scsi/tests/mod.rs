//! SCRIPTS scenario tests

mod transfer;

use std::collections::VecDeque;

use anyhow::{bail, Result};

use crate::bus::testbus::Testbus;
use crate::bus::Address;
use crate::scsi::bus::ScsiTargetBus;
use crate::scsi::config::ControllerConfig;
use crate::scsi::controller::ScsiController;
use crate::scsi::disk::{ScsiTargetDisk, DISK_BLOCKSIZE};
use crate::scsi::regs::offset;
use crate::scsi::{
    RequestId, ScsiBus, ScsiBusEvent, ScsiDevice, ScsiPhase, TransferDirection, STATUS_GOOD,
};

pub(super) const SCRIPT_BASE: Address = 0x1000;

/// Minimal SCRIPTS assembler
pub(super) mod asm {
    use crate::scsi::ScsiPhase;

    pub fn block_move(count: u32, phase: ScsiPhase, addr: u32) -> Vec<u32> {
        vec![((phase as u32) << 24) | (count & 0xFF_FFFF), addr]
    }

    pub fn block_move_indirect(count: u32, phase: ScsiPhase, ptr: u32) -> Vec<u32> {
        vec![(1 << 29) | ((phase as u32) << 24) | (count & 0xFF_FFFF), ptr]
    }

    pub fn block_move_table(phase: ScsiPhase, dsa_offset: u32) -> Vec<u32> {
        vec![(1 << 28) | ((phase as u32) << 24), dsa_offset]
    }

    pub fn select(id: u8, atn: bool, alt: u32) -> Vec<u32> {
        vec![0x4000_0000 | (u32::from(atn) << 24) | (1 << (16 + id)), alt]
    }

    pub fn disconnect() -> Vec<u32> {
        vec![0x4800_0000, 0]
    }

    pub fn wait_reselect(alt: u32) -> Vec<u32> {
        vec![0x5000_0000, alt]
    }

    pub fn set_carry() -> Vec<u32> {
        vec![0x5800_0400, 0]
    }

    pub fn clear_carry() -> Vec<u32> {
        vec![0x6000_0400, 0]
    }

    pub fn set_atn() -> Vec<u32> {
        vec![0x5800_0008, 0]
    }

    /// Register instruction: opcode 5 (from SFBR), 6 (to SFBR), 7 (RMW)
    pub fn reg_rw(opcode: u32, operator: u32, reg: u8, data: u8) -> Vec<u32> {
        vec![
            0x4000_0000
                | (opcode << 27)
                | (operator << 24)
                | (u32::from(reg & 0x7F) << 16)
                | (u32::from(data) << 8)
                | u32::from(reg & 0x80),
            0,
        ]
    }

    pub fn jump(addr: u32) -> Vec<u32> {
        vec![0x8008_0000, addr]
    }

    pub fn jump_rel(disp: i32) -> Vec<u32> {
        vec![0x8088_0000, (disp as u32) & 0xFF_FFFF]
    }

    pub fn jump_if_carry(addr: u32) -> Vec<u32> {
        vec![0x8028_0000, addr]
    }

    pub fn jump_if_phase(phase: ScsiPhase, addr: u32) -> Vec<u32> {
        vec![0x800A_0000 | ((phase as u32) << 24), addr]
    }

    /// Jump if (SFBR & !mask) == (data & !mask)
    pub fn jump_if_data(data: u8, mask: u8, addr: u32) -> Vec<u32> {
        vec![
            0x800C_0000 | (u32::from(mask) << 8) | u32::from(data),
            addr,
        ]
    }

    pub fn jump_if_not_data(data: u8, addr: u32) -> Vec<u32> {
        vec![0x8004_0000 | u32::from(data), addr]
    }

    pub fn call(addr: u32) -> Vec<u32> {
        vec![0x8808_0000, addr]
    }

    pub fn ret() -> Vec<u32> {
        vec![0x9008_0000, 0]
    }

    pub fn int(vector: u32) -> Vec<u32> {
        vec![0x9808_0000, vector]
    }

    pub fn int_fly(vector: u32) -> Vec<u32> {
        vec![0x9818_0000, vector]
    }

    pub fn memory_move(count: u32, src: u32, dest: u32) -> Vec<u32> {
        vec![0xC000_0000 | (count & 0xFF_FFFF), src, dest]
    }

    pub fn load(reg: u8, len: u32, addr: u32) -> Vec<u32> {
        vec![0xE100_0000 | (u32::from(reg) << 16) | (len & 7), addr]
    }

    pub fn load_dsa(reg: u8, len: u32, disp: u32) -> Vec<u32> {
        vec![0xF100_0000 | (u32::from(reg) << 16) | (len & 7), disp]
    }

    pub fn store(reg: u8, len: u32, addr: u32) -> Vec<u32> {
        vec![0xE000_0000 | (u32::from(reg) << 16) | (len & 7), addr]
    }
}

/// SCSI bus with hand-fed bursts. Events can be held back to model a slow
/// target.
pub(super) struct ScriptedBus {
    pub ids: Vec<u8>,
    pub direction: TransferDirection,
    pub data: Vec<u8>,
    pub bursts: VecDeque<usize>,
    pub status: u8,
    pub hold: bool,
    pub issued: Vec<(ScsiDevice, u32, Vec<u8>)>,
    pub cancelled: Vec<RequestId>,
    held: VecDeque<ScsiBusEvent>,
    events: VecDeque<ScsiBusEvent>,
    next_req: u64,
    pos: usize,
    burst: usize,
}

impl ScriptedBus {
    /// Target 2 answering a read with `data` in the given bursts
    pub fn data_in(data: Vec<u8>, bursts: &[usize]) -> Self {
        Self {
            ids: vec![2],
            direction: TransferDirection::In,
            data,
            bursts: bursts.iter().copied().collect(),
            status: STATUS_GOOD,
            hold: false,
            issued: vec![],
            cancelled: vec![],
            held: VecDeque::new(),
            events: VecDeque::new(),
            next_req: 1,
            pos: 0,
            burst: 0,
        }
    }

    pub fn current_req(&self) -> RequestId {
        RequestId(self.next_req - 1)
    }

    /// Delivers held events
    pub fn release(&mut self) {
        self.events.extend(self.held.drain(..));
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn post(&mut self, event: ScsiBusEvent) {
        if self.hold {
            self.held.push_back(event);
        } else {
            self.events.push_back(event);
        }
    }
}

impl ScsiBus for ScriptedBus {
    fn find_target(&self, id: u8, lun: u8) -> Option<ScsiDevice> {
        self.ids.contains(&id).then_some(ScsiDevice { id, lun })
    }

    fn issue_command(
        &mut self,
        device: ScsiDevice,
        tag: u32,
        cdb: &[u8],
    ) -> Result<(RequestId, TransferDirection)> {
        if cdb.is_empty() {
            bail!("Empty CDB");
        }
        self.issued.push((device, tag, cdb.to_vec()));
        let req = RequestId(self.next_req);
        self.next_req += 1;
        self.pos = 0;
        self.burst = 0;
        if self.direction == TransferDirection::None {
            self.post(ScsiBusEvent::Complete {
                req,
                status: self.status,
                residual: 0,
            });
        }
        Ok((req, self.direction))
    }

    fn continue_request(&mut self, req: RequestId) {
        self.pos += self.burst;
        self.burst = 0;
        if let Some(burst) = self.bursts.pop_front() {
            self.burst = burst;
            self.post(ScsiBusEvent::TransferData { req, len: burst });
        } else {
            self.post(ScsiBusEvent::Complete {
                req,
                status: self.status,
                residual: self.data.len().saturating_sub(self.pos),
            });
        }
    }

    fn cancel_request(&mut self, req: RequestId) {
        self.cancelled.push(req);
        self.post(ScsiBusEvent::Cancelled { req });
    }

    fn request_buffer(&mut self, _req: RequestId) -> &mut [u8] {
        let end = (self.pos + self.burst).min(self.data.len());
        let start = self.pos.min(end);
        &mut self.data[start..end]
    }

    fn poll_event(&mut self) -> Option<ScsiBusEvent> {
        self.events.pop_front()
    }
}

pub(super) type TestController<B> = ScsiController<Testbus, B>;

pub(super) fn controller<B: ScsiBus>(bus: B) -> TestController<B> {
    ScsiController::new(Testbus::new(), bus, ControllerConfig::default())
}

/// Reference bus with a 16-block disk at id 2, block n filled with n
pub(super) fn disk_bus(max_burst: usize) -> ScsiTargetBus {
    let mut contents = vec![0; DISK_BLOCKSIZE * 16];
    for (i, b) in contents.iter_mut().enumerate() {
        *b = (i / DISK_BLOCKSIZE) as u8;
    }
    let mut bus = ScsiTargetBus::new();
    bus.set_max_burst(max_burst);
    bus.attach(2, Box::new(ScsiTargetDisk::from_bytes(contents).unwrap()))
        .unwrap();
    bus
}

/// Writes a script at `addr`
pub(super) fn load_script<B: ScsiBus>(ctrl: &mut TestController<B>, addr: Address, insns: &[Vec<u32>]) {
    for (i, word) in insns.iter().flatten().enumerate() {
        ctrl.host.write_be32(addr + (i as u32) * 4, *word);
    }
}

/// Address of instruction `n` in a script of 2-word instructions
pub(super) const fn insn_addr(n: u32) -> Address {
    SCRIPT_BASE + n * 8
}

/// Starts the script by writing DSP
pub(super) fn start<B: ScsiBus>(ctrl: &mut TestController<B>, addr: Address) {
    ctrl.write_sized(offset::DSP, 4, addr);
}

/// Puts the bus in `phase` as if a target was connected
pub(super) fn connect_in_phase<B: ScsiBus>(ctrl: &mut TestController<B>, phase: ScsiPhase) {
    ctrl.regs.scntl1.set_con(true);
    ctrl.set_phase(phase);
}
