//! SCSI target generic/shared code

use anyhow::{bail, Context, Result};

use crate::scsi::{scsi_cmd_len, ScsiCmdResult, STATUS_CHECK_CONDITION, STATUS_GOOD};

/// Sense keys
pub const SENSE_NO_SENSE: u8 = 0x00;
pub const SENSE_NOT_READY: u8 = 0x02;
pub const SENSE_ILLEGAL_REQUEST: u8 = 0x05;

/// Additional sense codes (ASC << 8 | ASCQ)
pub const ASC_INVALID_COMMAND: u16 = 0x2000;
pub const ASC_LBA_OUT_OF_RANGE: u16 = 0x2100;
pub const ASC_INVALID_FIELD_IN_CDB: u16 = 0x2400;

/// Decoded block range of a READ/WRITE CDB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub first: usize,
    pub count: usize,
}

impl BlockRange {
    /// Parses the LBA and transfer length of a 6 or 10 byte READ/WRITE
    pub fn from_cdb(cmd: &[u8]) -> Result<Self> {
        match cmd.len() {
            6 => {
                let first =
                    (u32::from_be_bytes(cmd[0..4].try_into()?) & 0x1F_FFFF) as usize;
                // A transfer length of 0 means 256 blocks
                let count = if cmd[4] == 0 { 256 } else { cmd[4] as usize };
                Ok(Self { first, count })
            }
            10 => Ok(Self {
                first: u32::from_be_bytes(cmd[2..6].try_into()?) as usize,
                count: u16::from_be_bytes(cmd[7..9].try_into()?) as usize,
            }),
            n => bail!("No block range in a {} byte CDB", n),
        }
    }

    pub fn end(&self) -> usize {
        self.first + self.count
    }
}

/// An abstraction of a generic SCSI target
pub trait ScsiTarget {
    fn inquiry(&mut self, cmd: &[u8]) -> Result<ScsiCmdResult>;

    /// Returns a single mode page, None if unsupported
    fn mode_page(&self, page: u8) -> Option<Vec<u8>>;

    /// Latched sense data (key, ASC/ASCQ)
    fn sense(&self) -> (u8, u16);
    fn set_sense(&mut self, key: u8, asc: u16);

    fn unit_ready(&mut self) -> Result<ScsiCmdResult> {
        Ok(ScsiCmdResult::Status(STATUS_GOOD))
    }

    // For block devices
    fn blocksize(&self) -> Option<usize>;
    fn blocks(&self) -> Option<usize>;
    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8>;
    fn write(&mut self, block_offset: usize, data: &[u8]);

    /// Device-specific commands
    fn specific_cmd(&mut self, cmd: &[u8], _outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        log::warn!("Unsupported command {:02X}", cmd[0]);
        Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND))
    }

    /// Returns the drives total capacity in bytes
    fn capacity(&self) -> Option<usize> {
        Some(self.blocksize()? * self.blocks()?)
    }

    /// Latches sense data and returns CHECK CONDITION
    fn check_condition(&mut self, key: u8, asc: u16) -> ScsiCmdResult {
        self.set_sense(key, asc);
        ScsiCmdResult::Status(STATUS_CHECK_CONDITION)
    }

    /// Header, block descriptor and the requested page(s) of MODE SENSE(6)
    fn mode_sense(&mut self, page: u8) -> Result<ScsiCmdResult> {
        let pages = if page == 0x3F {
            (0..0x3F).filter_map(|p| self.mode_page(p)).flatten().collect()
        } else if let Some(p) = self.mode_page(page) {
            p
        } else {
            log::warn!("Unsupported mode page {:02X}", page);
            return Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_FIELD_IN_CDB));
        };

        let mut result = vec![0; 4];
        if let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) {
            result[3] = 8;
            let mut desc = [0; 8];
            desc[1..4].copy_from_slice(&(blocks as u32).to_be_bytes()[1..]);
            desc[5..8].copy_from_slice(&(blocksize as u32).to_be_bytes()[1..]);
            result.extend_from_slice(&desc);
        }
        result.extend(pages);
        // Mode data length excludes itself
        result[0] = (result.len() - 1) as u8;
        Ok(ScsiCmdResult::DataIn(result))
    }

    fn cmd_read(&mut self, cmd: &[u8]) -> Result<ScsiCmdResult> {
        let Some(blocks) = self.blocks() else {
            log::warn!("READ command to non-block device");
            return Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND));
        };
        let range = BlockRange::from_cdb(cmd)?;
        if range.end() > blocks {
            log::error!("Reading beyond disk: {:?}", range);
            return Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE));
        }
        if range.count == 0 {
            return Ok(ScsiCmdResult::Status(STATUS_GOOD));
        }
        Ok(ScsiCmdResult::DataIn(self.read(range.first, range.count)))
    }

    fn cmd_write(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
            log::warn!("WRITE command to non-block device");
            return Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND));
        };
        let range = BlockRange::from_cdb(cmd)?;
        if range.end() > blocks {
            log::error!("Writing beyond disk: {:?}", range);
            return Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE));
        }
        if range.count == 0 {
            return Ok(ScsiCmdResult::Status(STATUS_GOOD));
        }
        match outdata {
            Some(data) => {
                self.write(range.first, data);
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            None => Ok(ScsiCmdResult::DataOut(range.count * blocksize)),
        }
    }

    /// Executes a command. Called once without `outdata`; a
    /// [`ScsiCmdResult::DataOut`] result is answered by a second call with
    /// the data.
    fn cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        let Some(&opcode) = cmd.first() else {
            bail!("Empty command block");
        };
        if let Some(len) = scsi_cmd_len(opcode) {
            if cmd.len() < len {
                bail!("Command {:02X}: {} bytes, expected {}", opcode, cmd.len(), len);
            }
        }
        let cmd = &cmd[..scsi_cmd_len(opcode).unwrap_or(cmd.len())];

        match opcode {
            0x00 => {
                // TEST UNIT READY
                self.unit_ready()
            }
            0x03 => {
                // REQUEST SENSE
                let (key, asc) = self.sense();
                let mut result = vec![0; 18];
                result[0] = 0x70;
                result[2] = key & 0x0F;
                result[7] = (result.len() - 8) as u8;
                result[12..14].copy_from_slice(&asc.to_be_bytes());
                self.set_sense(SENSE_NO_SENSE, 0);

                let alloc = match cmd[4] {
                    0 => 4,
                    n => n as usize,
                };
                result.truncate(alloc);
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x04 => {
                // FORMAT UNIT(6)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x08 | 0x28 => {
                // READ(6) / READ(10)
                self.cmd_read(cmd)
            }
            0x0A | 0x2A => {
                // WRITE(6) / WRITE(10)
                self.cmd_write(cmd, outdata)
            }
            0x12 => {
                // INQUIRY
                self.inquiry(cmd)
            }
            0x15 => {
                // MODE SELECT(6)
                let len = cmd[4] as usize;
                match outdata {
                    _ if len == 0 => Ok(ScsiCmdResult::Status(STATUS_GOOD)),
                    // Parameters are accepted and ignored
                    Some(_) => Ok(ScsiCmdResult::Status(STATUS_GOOD)),
                    None => Ok(ScsiCmdResult::DataOut(len)),
                }
            }
            0x1A => {
                // MODE SENSE(6)
                let alloc = cmd[4] as usize;
                match self.mode_sense(cmd[2] & 0x3F)? {
                    ScsiCmdResult::DataIn(mut data) => {
                        data.truncate(alloc);
                        if data.is_empty() {
                            Ok(ScsiCmdResult::Status(STATUS_GOOD))
                        } else {
                            Ok(ScsiCmdResult::DataIn(data))
                        }
                    }
                    other => Ok(other),
                }
            }
            0x25 => {
                // READ CAPACITY(10)
                let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
                    log::warn!("READ CAPACITY(10) command to non-block device");
                    return Ok(self.check_condition(SENSE_ILLEGAL_REQUEST, ASC_INVALID_COMMAND));
                };
                if blocks == 0 {
                    return Ok(self.check_condition(SENSE_NOT_READY, 0x3A00));
                }

                let mut result = vec![0; 8];
                result[0..4].copy_from_slice(&((blocks as u32) - 1).to_be_bytes());
                result[4..8].copy_from_slice(&(blocksize as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x2F => {
                // VERIFY(10)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x3C => {
                // READ BUFFER(10)
                // 0 reserved, 1..4 buffer capacity (none)
                Ok(ScsiCmdResult::DataIn(vec![0; 4]))
            }
            _ => self
                .specific_cmd(cmd, outdata)
                .with_context(|| format!("Command {:02X}", opcode)),
        }
    }
}
