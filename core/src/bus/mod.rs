pub mod testbus;

use num_traits::PrimInt;

/// Host bus address as seen by the SCRIPTS processor (32-bit)
pub type Address = u32;

/// A register block mapped into a parent address decoder
pub trait BusMember<T: PrimInt> {
    fn read(&mut self, addr: T) -> Option<u8>;
    fn write(&mut self, addr: T, val: u8) -> Option<()>;
}

/// The host side of the I/O processor: system memory reachable through
/// bus-master DMA and the interrupt request line.
///
/// DMA accesses never fail from the point of view of the chip; unmapped
/// memory is the host's business.
pub trait DmaHost {
    fn dma_read(&mut self, addr: Address, buf: &mut [u8]);
    fn dma_write(&mut self, addr: Address, data: &[u8]);

    /// Level-triggered interrupt output
    fn set_irq_level(&mut self, level: bool);

    /// Reads a 32-bit word in SCRIPTS (big-endian) byte order
    fn dma_read_be32(&mut self, addr: Address) -> u32 {
        let mut buf = [0; 4];
        self.dma_read(addr, &mut buf);
        u32::from_be_bytes(buf)
    }
}
