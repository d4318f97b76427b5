//! Information transfer phase handlers of the block move instruction

use crate::bus::DmaHost;
use crate::scsi::controller::{ScriptFault, ScsiController, SCSI_TRACE};
use crate::scsi::fifo::SCSI_FIFO_SIZE;
use crate::scsi::regs::RegSstat0;
use crate::scsi::request::{
    ActiveRequest, CommandState, MsgAction, RequestState, WaitReason, TAG_VALID,
};
use crate::scsi::{
    ScsiBus, ScsiPhase, TransferDirection, EXT_MSG_SDTR, EXT_MSG_WDTR, MSG_ABORT, MSG_ABORT_TAG,
    MSG_BUS_DEVICE_RESET, MSG_CLEAR_QUEUE, MSG_COMMAND_COMPLETE, MSG_DISCONNECT, MSG_EXTENDED,
    MSG_HEAD_OF_QUEUE_TAG, MSG_NOP, MSG_ORDERED_TAG, MSG_REJECT, MSG_RESTORE_POINTERS,
    MSG_SAVE_DATA_POINTER, MSG_SIMPLE_TAG,
};
use crate::util::id_from_bits;

/// Longest CDB accepted from a command phase move
const MAX_CDB_LEN: u32 = 16;

impl<THost, TBus> ScsiController<THost, TBus>
where
    THost: DmaHost,
    TBus: ScsiBus,
{
    /// Moves data between host memory (DNAD) and the request buffer
    pub(super) fn do_dma(&mut self, out: bool) -> Result<(), ScriptFault> {
        let Some(cur) = self.current.as_ref() else {
            return Err(ScriptFault::NoActiveRequest);
        };
        if cur.dma_len == 0 {
            // Nothing from the target yet
            self.waiting = WaitReason::Dma;
            return Ok(());
        }

        let count = (self.regs.dbc as usize).min(cur.dma_len);
        let (req, start) = (cur.req, cur.dma_offset);
        let addr = self.regs.dnad;

        let buf = self.bus.request_buffer(req);
        let have = buf.len();
        let Some(data) = buf.get_mut(start..start + count) else {
            return Err(ScriptFault::BufferUnderrun {
                want: start + count,
                have,
            });
        };
        if out {
            self.host.dma_read(addr, data);
        } else {
            self.host.dma_write(addr, data);
        }
        if SCSI_TRACE {
            log::debug!(
                "DMA {} {} bytes at {:08X}, buffer offset {}",
                if out { "out" } else { "in" },
                count,
                addr,
                start
            );
        }

        self.regs.dnad = addr.wrapping_add(count as u32);
        self.regs.dbc -= count as u32;

        let Some(cur) = self.current.as_mut() else {
            return Err(ScriptFault::NoActiveRequest);
        };
        cur.dma_len -= count;
        if cur.dma_len == 0 {
            cur.dma_offset = 0;
            cur.pending = 0;
            self.waiting = WaitReason::Dma;
            self.bus.continue_request(req);
        } else {
            cur.dma_offset += count;
            self.waiting = WaitReason::None;
        }
        Ok(())
    }

    /// Sends the CDB at DNAD to the selected target
    pub(super) fn do_command(&mut self) -> Result<(), ScriptFault> {
        if self.regs.dbc > MAX_CDB_LEN {
            log::warn!("Command block of {} bytes clamped", self.regs.dbc);
            self.regs.dbc = MAX_CDB_LEN;
        }
        let len = self.regs.dbc as usize;
        let mut buf = [0; MAX_CDB_LEN as usize];
        self.host.dma_read(self.regs.dnad, &mut buf[..len]);
        let cdb = &buf[..len];

        self.regs.sfbr = cdb.first().copied().unwrap_or(0);
        self.command_complete = CommandState::Pending;
        let id_bits = (self.select_tag >> 8) as u8;
        self.regs.lcrc = id_bits;
        self.enter(RequestState::Command);

        let id = id_from_bits(id_bits).unwrap_or(0);
        let lun = self.current_lun;
        let Some(device) = self.bus.find_target(id, lun) else {
            return Err(ScriptFault::SelectionTimeout(id_bits));
        };

        // One outstanding request; a new command supersedes the old one
        self.release_current();
        let tag = self.select_tag;
        let (req, direction) = match self.bus.issue_command(device, tag, cdb) {
            Ok(r) => r,
            Err(e) => {
                log::error!("Target {} lun {} command {:02X?}: {:#}", id, lun, cdb, e);
                return Err(ScriptFault::SelectionTimeout(id_bits));
            }
        };
        if SCSI_TRACE {
            log::debug!(
                "Target {} lun {} tag {:05X} command {:02X?}: {:?}",
                id,
                lun,
                tag,
                cdb,
                direction
            );
        }

        self.regs.dnad = self.regs.dnad.wrapping_add(len as u32);
        self.regs.dbc = 0;
        self.current = Some(ActiveRequest::new(req, id, lun, tag, direction));
        match direction {
            TransferDirection::In => {
                self.set_phase(ScsiPhase::DataIn);
                self.bus.continue_request(req);
            }
            TransferDirection::Out => {
                self.set_phase(ScsiPhase::DataOut);
                self.bus.continue_request(req);
            }
            TransferDirection::None => self.set_phase(ScsiPhase::Status),
        }
        Ok(())
    }

    /// Moves the status byte to DNAD and moves on to MESSAGE IN
    pub(super) fn do_status(&mut self) {
        if self.regs.dbc != 1 {
            log::warn!("Status move of {} bytes", self.regs.dbc);
        }
        let mut status = [self.status];
        self.regs.sfbr = self.status;
        self.fifo_transfer(&mut status);
        self.host.dma_write(self.regs.dnad, &status);
        self.regs.dnad = self.regs.dnad.wrapping_add(1);
        self.regs.dbc = 0;

        self.set_phase(ScsiPhase::MessageIn);
        self.enter(RequestState::MessageIn);
        self.msg_action = MsgAction::Disconnect;
        self.add_msg_byte(MSG_COMMAND_COMPLETE);
    }

    /// Hands queued MESSAGE IN bytes to the script
    pub(super) fn do_msgin(&mut self) {
        if self.msg.is_empty() || self.regs.dbc == 0 {
            log::warn!(
                "Message in move of {} bytes with {} queued",
                self.regs.dbc,
                self.msg.len()
            );
            return;
        }

        let len = self.msg.len().min(self.regs.dbc as usize);
        let mut data: Vec<u8> = self.msg.drain(..len).collect();
        self.fifo_transfer(&mut data);
        self.host.dma_write(self.regs.dnad, &data);
        self.regs.sfbr = data[0];
        if let Some(&last) = data.last() {
            self.regs.sidl = last;
        }
        if SCSI_TRACE {
            log::debug!("Message in {:02X?}", data);
        }
        self.regs.dnad = self.regs.dnad.wrapping_add(len as u32);
        self.regs.dbc -= len as u32;

        if !self.msg.is_empty() {
            return;
        }
        match self.msg_action {
            MsgAction::Command => self.set_phase(ScsiPhase::Command),
            MsgAction::Disconnect => {
                self.disconnect();
                self.enter(RequestState::Idle);
            }
            MsgAction::DataOut => {
                self.set_phase(ScsiPhase::DataOut);
                self.enter(RequestState::DataOut);
            }
            MsgAction::DataIn => {
                self.set_phase(ScsiPhase::DataIn);
                self.enter(RequestState::DataIn);
            }
        }
    }

    /// Consumes MESSAGE OUT bytes in FIFO sized chunks
    pub(super) fn do_msgout(&mut self) {
        while self.regs.dbc > 0 {
            let n = (self.regs.dbc as usize).min(SCSI_FIFO_SIZE);
            let mut chunk = [0; SCSI_FIFO_SIZE];
            self.host.dma_read(self.regs.dnad, &mut chunk[..n]);
            self.fifo_transfer(&mut chunk[..n]);
            self.regs.dnad = self.regs.dnad.wrapping_add(n as u32);
            self.regs.dbc -= n as u32;

            if !self.parse_msgout(&chunk[..n]) {
                break;
            }
        }
    }

    /// Interprets a chunk of MESSAGE OUT bytes. Returns false if a message
    /// was rejected.
    fn parse_msgout(&mut self, chunk: &[u8]) -> bool {
        let mut bytes: Vec<u8> = self.msgout_carry.drain(..).collect();
        bytes.extend_from_slice(chunk);

        let mut i = self.msgout_skip.min(bytes.len());
        self.msgout_skip -= i;

        while i < bytes.len() {
            let rest = &bytes[i..];
            let msg = rest[0];
            self.regs.sfbr = msg;
            if SCSI_TRACE {
                log::debug!("Message out {:02X}", msg);
            }
            match msg {
                MSG_COMMAND_COMPLETE | MSG_SAVE_DATA_POINTER | MSG_RESTORE_POINTERS => i += 1,
                MSG_EXTENDED => {
                    if rest.len() < 3 {
                        self.carry_msgout(rest);
                        return true;
                    }
                    let (ext_len, code) = (rest[1] as usize, rest[2]);
                    if code != EXT_MSG_SDTR && code != EXT_MSG_WDTR {
                        self.reject_msgout(code);
                        return false;
                    }
                    // Negotiation is not supported; asynchronous narrow it is
                    i += 3;
                    let body = ext_len.saturating_sub(1);
                    let avail = body.min(bytes.len() - i);
                    i += avail;
                    self.msgout_skip = body - avail;
                }
                MSG_SIMPLE_TAG | MSG_HEAD_OF_QUEUE_TAG | MSG_ORDERED_TAG => {
                    if rest.len() < 2 {
                        self.carry_msgout(rest);
                        return true;
                    }
                    self.select_tag = (self.select_tag & 0xFF00) | u32::from(rest[1]) | TAG_VALID;
                    i += 2;
                }
                MSG_ABORT | MSG_ABORT_TAG | MSG_CLEAR_QUEUE | MSG_BUS_DEVICE_RESET => {
                    if SCSI_TRACE {
                        log::debug!("Abort message {:02X}", msg);
                    }
                    self.release_current();
                    self.enter(RequestState::Idle);
                    self.disconnect();
                    i += 1;
                }
                MSG_DISCONNECT => {
                    self.disconnect();
                    i += 1;
                }
                MSG_REJECT | MSG_NOP => {
                    self.set_phase(ScsiPhase::Command);
                    i += 1;
                }
                m if m & 0x80 != 0 => {
                    // Identify
                    self.current_lun = m & 7;
                    self.set_phase(ScsiPhase::Command);
                    i += 1;
                }
                _ => {
                    self.reject_msgout(msg);
                    return false;
                }
            }
        }
        true
    }

    fn carry_msgout(&mut self, rest: &[u8]) {
        self.msgout_carry.clear();
        if self.msgout_carry.try_extend_from_slice(rest).is_err() {
            log::warn!("Message out remainder {:02X?} dropped", rest);
        }
    }

    fn reject_msgout(&mut self, msg: u8) {
        log::warn!("Unsupported message {:02X}, rejecting", msg);
        self.msgout_carry.clear();
        self.msgout_skip = 0;
        self.set_phase(ScsiPhase::MessageIn);
        self.add_msg_byte(MSG_REJECT);
        self.msg_action = MsgAction::Command;
    }

    pub(super) fn add_msg_byte(&mut self, data: u8) {
        if self.msg.try_push(data).is_err() {
            log::warn!("Message in queue full, dropping {:02X}", data);
        }
    }

    /// Passes bytes through the SCSI FIFO, generating and checking parity
    pub(super) fn fifo_transfer(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(SCSI_FIFO_SIZE) {
            for &b in chunk.iter() {
                self.fifo_push(b);
            }
            for b in chunk.iter_mut() {
                *b = self.fifo_pop();
            }
        }
    }

    fn fifo_push(&mut self, data: u8) {
        let parity = self.regs.scntl0.epg() && self.parity_sense().parity_of(data);
        if !self.fifo.enqueue(data, parity) {
            log::warn!("SCSI FIFO overrun, {:02X} lost", data);
            self.fifo_gross_error();
        }
    }

    pub(super) fn fifo_pop(&mut self) -> u8 {
        if self.fifo.is_empty() {
            log::warn!("SCSI FIFO underrun");
            self.fifo_gross_error();
            return 0;
        }
        let (data, parity) = self.fifo.dequeue();
        self.regs.sstat1.set_sdp(parity);
        if self.regs.scntl0.epc() && parity != self.parity_sense().parity_of(data) {
            self.parity_error(data);
        }
        data
    }

    /// Over- or underrun: latched in SSTAT0.SGE, the script keeps running
    fn fifo_gross_error(&mut self) {
        self.regs.sstat0.set_sge(true);
        self.update_irq();
    }

    fn parity_error(&mut self, data: u8) {
        log::warn!("SCSI parity error on {:02X}", data);
        if self.regs.scntl0.aap() {
            self.regs.socl.set_atn(true);
        }
        self.script_scsi_interrupt(RegSstat0(0).with_par(true));
    }
}
