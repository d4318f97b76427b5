use num_traits::PrimInt;

/// Sign-extends the low 24 bits of a SCRIPTS displacement
pub const fn sign_extend24(val: u32) -> i32 {
    ((val << 8) as i32) >> 8
}

/// Adds a signed 24-bit displacement to a 32-bit address, wrapping
pub const fn offset24(base: u32, disp: u32) -> u32 {
    base.wrapping_add_signed(sign_extend24(disp))
}

/// Converts a SCSI id bitmask to the id of the highest set bit
pub fn id_from_bits<T: PrimInt>(bits: T) -> Option<u8> {
    if bits.is_zero() {
        return None;
    }
    let width = T::zero().count_zeros();
    Some((width - 1 - bits.leading_zeros()) as u8)
}

/// True if the value has an odd number of bits set
pub fn odd_bits<T: PrimInt>(val: T) -> bool {
    val.count_ones() & 1 != 0
}
