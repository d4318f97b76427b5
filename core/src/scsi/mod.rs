//! SCSI I/O processor, bus contract, devices and associated code

pub mod alu;
pub mod bus;
pub mod config;
pub mod controller;
pub mod disk;
pub mod fifo;
pub mod instruction;
mod interpreter;
mod phases;
pub mod regs;
pub mod request;
pub mod target;
pub mod timer;

#[cfg(test)]
mod tests;

use anyhow::Result;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

pub const STATUS_GOOD: u8 = 0;
pub const STATUS_CHECK_CONDITION: u8 = 2;

pub const MSG_COMMAND_COMPLETE: u8 = 0x00;
pub const MSG_EXTENDED: u8 = 0x01;
pub const MSG_SAVE_DATA_POINTER: u8 = 0x02;
pub const MSG_RESTORE_POINTERS: u8 = 0x03;
pub const MSG_DISCONNECT: u8 = 0x04;
pub const MSG_ABORT: u8 = 0x06;
pub const MSG_REJECT: u8 = 0x07;
pub const MSG_NOP: u8 = 0x08;
pub const MSG_BUS_DEVICE_RESET: u8 = 0x0C;
pub const MSG_ABORT_TAG: u8 = 0x0D;
pub const MSG_CLEAR_QUEUE: u8 = 0x0E;
pub const MSG_SIMPLE_TAG: u8 = 0x20;
pub const MSG_HEAD_OF_QUEUE_TAG: u8 = 0x21;
pub const MSG_ORDERED_TAG: u8 = 0x22;
pub const MSG_IDENTIFY: u8 = 0x80;

/// Extended message codes
pub const EXT_MSG_SDTR: u8 = 0x01;
pub const EXT_MSG_WDTR: u8 = 0x03;

const fn scsi_cmd_len(cmdnum: u8) -> Option<usize> {
    match cmdnum {
        // UNIT READY
        0x00
        // REQUEST SENSE
        | 0x03
        // FORMAT UNIT
        | 0x04
        // READ(6)
        | 0x08
        // WRITE(6)
        | 0x0A
        // INQUIRY
        | 0x12
        // MODE SELECT(6)
        | 0x15
        // MODE SENSE(6)
        | 0x1A
        => Some(6),
        // READ CAPACITY(10)
        0x25
        // READ(10)
        | 0x28
        // WRITE(10)
        | 0x2A
        // VERIFY(10)
        | 0x2F
        // READ BUFFER(10)
        | 0x3C
        => Some(10),
        _ => {
            None
        }
    }
}

/// Result of a command
pub enum ScsiCmdResult {
    /// Immediately turn to the Status phase
    Status(u8),
    /// Returns data to the initiator
    DataIn(Vec<u8>),
    /// Expects data written to target
    DataOut(usize),
}

/// SCSI information transfer phases, as encoded on MSG/C/D/I/O
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromPrimitive,
    ToPrimitive,
    strum::IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum ScsiPhase {
    /// Initiator -> Target
    DataOut = 0,
    /// Target -> Initiator
    DataIn = 1,
    Command = 2,
    Status = 3,
    Reserved4 = 4,
    Reserved5 = 5,
    MessageOut = 6,
    MessageIn = 7,
}

impl ScsiPhase {
    /// Decodes the MSG, C/D and I/O bits (bits 2..0)
    pub fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => Self::DataOut,
            1 => Self::DataIn,
            2 => Self::Command,
            3 => Self::Status,
            4 => Self::Reserved4,
            5 => Self::Reserved5,
            6 => Self::MessageOut,
            _ => Self::MessageIn,
        }
    }
}

/// Handle of a command issued on the SCSI bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// A target/LUN pair that answered selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScsiDevice {
    pub id: u8,
    pub lun: u8,
}

/// Data direction of an issued command, from the initiator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// No data phase, straight to status
    None,
    In,
    Out,
}

/// Events raised by the SCSI bus for an outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiBusEvent {
    /// The next `len` bytes are available in (or expected into) the
    /// request buffer
    TransferData { req: RequestId, len: usize },
    /// The target finished the command
    Complete {
        req: RequestId,
        status: u8,
        residual: usize,
    },
    /// The request was released by the bus
    Cancelled { req: RequestId },
}

/// The SCSI bus as seen by an initiator.
///
/// Requests progress asynchronously: the bus reports progress through
/// [`ScsiBus::poll_event`], the initiator acknowledges consumed data
/// through [`ScsiBus::continue_request`].
pub trait ScsiBus {
    /// Resolves a target for selection, None if nothing responds
    fn find_target(&self, id: u8, lun: u8) -> Option<ScsiDevice>;

    /// Starts a command on a previously found target
    fn issue_command(
        &mut self,
        device: ScsiDevice,
        tag: u32,
        cdb: &[u8],
    ) -> Result<(RequestId, TransferDirection)>;

    /// The current data burst was consumed; request the next one or the
    /// command status
    fn continue_request(&mut self, req: RequestId);

    fn cancel_request(&mut self, req: RequestId);

    /// Transfer buffer of the current burst, empty for unknown requests
    fn request_buffer(&mut self, req: RequestId) -> &mut [u8];

    fn poll_event(&mut self) -> Option<ScsiBusEvent>;
}
