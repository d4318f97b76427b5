pub type Byte = u8;
pub type Long = u32;

/// Byte lane access to multi-byte registers.
///
/// Lane 0 is the least significant byte, matching the little-endian
/// layout of the register file.
pub trait ByteLanes {
    fn lane(&self, lane: usize) -> Byte;
    fn set_lane(&mut self, lane: usize, val: Byte);
}

impl ByteLanes for Long {
    fn lane(&self, lane: usize) -> Byte {
        debug_assert!(lane < 4);
        (*self >> (lane * 8)) as Byte
    }

    fn set_lane(&mut self, lane: usize, val: Byte) {
        debug_assert!(lane < 4);
        let shift = lane * 8;
        *self = (*self & !(0xFF << shift)) | (Long::from(val) << shift);
    }
}
