//! Outstanding request and the sequencing states around it

use serde::{Deserialize, Serialize};

use crate::scsi::{RequestId, TransferDirection};

/// Marks `ActiveRequest::tag` as carrying a queue tag from a tag message
pub const TAG_VALID: u32 = 1 << 16;

/// Why the script is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, Serialize, Deserialize)]
pub enum WaitReason {
    None,
    /// Disconnected, waiting for the target to reselect
    Reselect,
    /// Block move waiting for the next data burst
    Dma,
    Reserved,
}

/// Progress of the command on the SCSI bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, Serialize, Deserialize)]
pub enum CommandState {
    Pending,
    DataReady,
    Complete,
}

/// Follow-up once the queued MESSAGE IN bytes are drained
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, Serialize, Deserialize)]
pub enum MsgAction {
    Command,
    Disconnect,
    DataOut,
    DataIn,
}

/// Request lifecycle, tracked for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, Serialize, Deserialize)]
pub enum RequestState {
    Idle,
    Selecting,
    Command,
    DataIn,
    DataOut,
    Status,
    MessageIn,
    Disconnected,
}

/// The single command in flight between the chip and a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRequest {
    pub req: RequestId,
    pub target: u8,
    pub lun: u8,
    /// Selection id bits << 8, tag byte and TAG_VALID
    pub tag: u32,
    pub direction: TransferDirection,
    /// Bytes left in the current burst
    pub dma_len: usize,
    /// Position in the bus request buffer
    pub dma_offset: usize,
    /// Burst announced while disconnected
    pub pending: usize,
    /// DSP to resume at after reselection
    pub resume_offset: u32,
}

impl ActiveRequest {
    pub fn new(
        req: RequestId,
        target: u8,
        lun: u8,
        tag: u32,
        direction: TransferDirection,
    ) -> Self {
        Self {
            req,
            target,
            lun,
            tag,
            direction,
            dma_len: 0,
            dma_offset: 0,
            pending: 0,
            resume_offset: 0,
        }
    }

    /// Queue tag byte, if a tag message was sent
    pub fn queue_tag(&self) -> Option<u8> {
        (self.tag & TAG_VALID != 0).then_some(self.tag as u8)
    }

    /// True if the target still has data to hand over
    pub fn has_data(&self) -> bool {
        self.pending > 0 || self.dma_len > 0
    }
}
