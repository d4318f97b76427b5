//! SCSI hard disk drive (block device)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::scsi::target::{ScsiTarget, SENSE_NO_SENSE};
use crate::scsi::ScsiCmdResult;

pub const DISK_BLOCKSIZE: usize = 512;

/// In-memory block device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScsiTargetDisk {
    /// Disk contents
    disk: Vec<u8>,

    /// Path where the original image resides
    path: Option<PathBuf>,

    /// Check condition sense key
    cc_code: u8,

    /// Check condition ASC/ASCQ
    cc_asc: u16,
}

impl ScsiTargetDisk {
    /// Creates a disk from raw contents, a multiple of the block size
    pub fn from_bytes(disk: Vec<u8>) -> Result<Self> {
        if disk.len() % DISK_BLOCKSIZE != 0 {
            bail!(
                "Disk size {} is not a multiple of {}",
                disk.len(),
                DISK_BLOCKSIZE
            );
        }
        Ok(Self {
            disk,
            path: None,
            cc_code: SENSE_NO_SENSE,
            cc_asc: 0,
        })
    }

    /// Creates a zero-filled disk of `blocks` blocks
    pub fn blank(blocks: usize) -> Self {
        Self {
            disk: vec![0; blocks * DISK_BLOCKSIZE],
            path: None,
            cc_code: SENSE_NO_SENSE,
            cc_asc: 0,
        }
    }

    /// Loads a disk image into memory, given the filename of the image.
    pub fn load_disk(filename: &Path) -> Result<Self> {
        if !filename.exists() {
            bail!("File not found: {}", filename.display());
        }

        let disk = fs::read(filename)
            .with_context(|| format!("Failed to open file {}", filename.display()))?;
        let mut result = Self::from_bytes(disk)
            .with_context(|| format!("Cannot load disk image {}", filename.display()))?;
        result.path = Some(filename.to_path_buf());
        Ok(result)
    }

    pub fn image_fn(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contents(&self) -> &[u8] {
        &self.disk
    }
}

impl ScsiTarget for ScsiTargetDisk {
    fn sense(&self) -> (u8, u16) {
        (self.cc_code, self.cc_asc)
    }

    fn set_sense(&mut self, key: u8, asc: u16) {
        self.cc_code = key;
        self.cc_asc = asc;
    }

    fn inquiry(&mut self, cmd: &[u8]) -> Result<ScsiCmdResult> {
        let mut result = vec![0; 36];

        // 0 Peripheral qualifier (5-7), peripheral device type (4-0)
        result[0] = 0; // Magnetic disk

        // SCSI version compliance
        result[2] = 0x02; // ANSI-2
        result[3] = 0x02; // ANSI-2

        // 4 Additional length (N-4), min. 32
        result[4] = result.len() as u8 - 4;

        // 7 Tagged command queueing
        result[7] = 0x02;

        // 8..16 Vendor identification
        result[8..16].copy_from_slice(b"SIOP    ");

        // 16..32 Product identification
        result[16..32].copy_from_slice(b"VIRTUAL DISK    ");

        // 32..36 Revision
        result[32..36].copy_from_slice(b"1.0 ");

        let alloc = cmd.get(4).copied().unwrap_or(0) as usize;
        if alloc > 0 {
            result.truncate(alloc);
        }
        Ok(ScsiCmdResult::DataIn(result))
    }

    fn mode_page(&self, page: u8) -> Option<Vec<u8>> {
        match page {
            0x01 => {
                // Read/write error recovery page
                Some(vec![
                    0x01,        // Page code
                    0x0A,        // Page length
                    0b1100_0000, // DCR, DTE, PER, EER, RC, TB, ARRE, AWRE
                    8,           // Read retry count
                    0,           // Correction span
                    0,           // Head offset count
                    0,           // Data strobe offset count
                    0,           // Reserved
                    0,           // Write retry count
                    0,           // Reserved
                    0,           // Recovery time limit (MSB)
                    0,           // Recovery time limit (LSB)
                ])
            }
            0x02 => {
                // Disconnect-reconnect page
                let mut result = vec![0; 16];
                result[0] = 0x02;
                result[1] = 0x0E;
                Some(result)
            }
            0x03 => {
                // Format device page
                let mut result = vec![0; 24];
                result[0] = 0x03;
                result[1] = 0x16;
                // Bytes per physical sector
                result[12..14].copy_from_slice(&(DISK_BLOCKSIZE as u16).to_be_bytes());
                Some(result)
            }
            _ => None,
        }
    }

    fn blocksize(&self) -> Option<usize> {
        Some(DISK_BLOCKSIZE)
    }

    fn blocks(&self) -> Option<usize> {
        Some(self.disk.len() / DISK_BLOCKSIZE)
    }

    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8> {
        self.disk[(block_offset * DISK_BLOCKSIZE)..((block_offset + block_count) * DISK_BLOCKSIZE)]
            .to_vec()
    }

    fn write(&mut self, block_offset: usize, data: &[u8]) {
        let offset = block_offset * DISK_BLOCKSIZE;
        let end = (offset + data.len()).min(self.disk.len());
        self.disk[offset..end].copy_from_slice(&data[..(end - offset)]);
    }
}
