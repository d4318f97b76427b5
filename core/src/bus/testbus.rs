use std::collections::HashMap;

use super::{Address, DmaHost};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug)]
pub struct TraceEntry {
    pub addr: Address,
    pub access: Access,
    pub len: usize,
}

/// Sparse host memory for tests, recording DMA accesses and the
/// interrupt line.
pub struct Testbus {
    pub mem: HashMap<Address, u8>,
    trace: Vec<TraceEntry>,
    trace_enabled: bool,
    irq: bool,
    irq_rising_edges: usize,
}

impl Testbus {
    pub fn new() -> Self {
        Self {
            mem: HashMap::new(),
            trace: vec![],
            trace_enabled: false,
            irq: false,
            irq_rising_edges: 0,
        }
    }

    pub fn reset_trace(&mut self) {
        self.trace.clear();
        self.trace_enabled = true;
    }

    pub fn get_trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn irq(&self) -> bool {
        self.irq
    }

    /// Number of low-to-high transitions seen on the interrupt line
    pub fn irq_rising_edges(&self) -> usize {
        self.irq_rising_edges
    }

    pub fn write_bytes(&mut self, addr: Address, data: &[u8]) {
        for (a, &b) in (addr..).zip(data) {
            self.mem.insert(a, b);
        }
    }

    pub fn read_bytes(&self, addr: Address, len: usize) -> Vec<u8> {
        (addr..)
            .take(len)
            .map(|a| *self.mem.get(&a).unwrap_or(&0))
            .collect()
    }

    /// Writes a 32-bit value in SCRIPTS (big-endian) byte order
    pub fn write_be32(&mut self, addr: Address, val: u32) {
        self.write_bytes(addr, &val.to_be_bytes());
    }

    pub fn write_le32(&mut self, addr: Address, val: u32) {
        self.write_bytes(addr, &val.to_le_bytes());
    }
}

impl DmaHost for Testbus {
    fn dma_read(&mut self, addr: Address, buf: &mut [u8]) {
        for (a, b) in (addr..).zip(buf.iter_mut()) {
            *b = *self.mem.get(&a).unwrap_or(&0);
        }
        if self.trace_enabled {
            self.trace.push(TraceEntry {
                addr,
                access: Access::Read,
                len: buf.len(),
            });
        }
    }

    fn dma_write(&mut self, addr: Address, data: &[u8]) {
        self.write_bytes(addr, data);
        if self.trace_enabled {
            self.trace.push(TraceEntry {
                addr,
                access: Access::Write,
                len: data.len(),
            });
        }
    }

    fn set_irq_level(&mut self, level: bool) {
        if level && !self.irq {
            self.irq_rising_edges += 1;
        }
        self.irq = level;
    }
}
