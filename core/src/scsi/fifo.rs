//! SCSI FIFO: 8 slots of 9 bits (data + parity)

use serde::{Deserialize, Serialize};

use crate::util::odd_bits;

pub const SCSI_FIFO_SIZE: usize = 8;

/// Parity sense used on the SCSI data bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParitySense {
    /// Regular SCSI parity
    Odd,
    /// Inverted (forced bad) parity
    Even,
}

impl ParitySense {
    /// Parity bit to drive alongside `data`
    pub fn parity_of(self, data: u8) -> bool {
        match self {
            Self::Odd => !odd_bits(data),
            Self::Even => odd_bits(data),
        }
    }
}

/// Circular buffer between the SCSI bus and the DMA core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScsiFifo {
    data: [u8; SCSI_FIFO_SIZE],
    parity: [bool; SCSI_FIFO_SIZE],
    head: usize,
    count: usize,
}

impl ScsiFifo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == SCSI_FIFO_SIZE
    }

    /// Adds a byte at the tail. Returns false (and leaves the contents
    /// untouched) when full.
    pub fn enqueue(&mut self, data: u8, parity: bool) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = (self.head + self.count) % SCSI_FIFO_SIZE;
        self.data[tail] = data;
        self.parity[tail] = parity;
        self.count += 1;
        true
    }

    /// Removes the byte at the head, (0, false) when empty
    pub fn dequeue(&mut self) -> (u8, bool) {
        if self.is_empty() {
            return (0, false);
        }
        let entry = (self.data[self.head], self.parity[self.head]);
        self.head = (self.head + 1) % SCSI_FIFO_SIZE;
        self.count -= 1;
        entry
    }
}
