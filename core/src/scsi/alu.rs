//! Register ALU of the read/write instructions

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum AluOp {
    Move = 0,
    /// Shift left through carry
    Shl = 1,
    Or = 2,
    Xor = 3,
    And = 4,
    /// Shift right through carry
    Shr = 5,
    Add = 6,
    /// Add with carry
    Adc = 7,
}

impl AluOp {
    pub fn from_operator(operator: u8) -> Self {
        // 3-bit field, all values defined
        Self::from_u8(operator & 7).unwrap_or(Self::Move)
    }

    /// Computes `op0 <op> op1`, returns (result, carry out)
    pub fn apply(self, op0: u8, op1: u8, carry: bool) -> (u8, bool) {
        match self {
            Self::Move => (op1, carry),
            Self::Shl => ((op0 << 1) | u8::from(carry), op0 & 0x80 != 0),
            Self::Or => (op0 | op1, carry),
            Self::Xor => (op0 ^ op1, carry),
            Self::And => (op0 & op1, carry),
            Self::Shr => ((op0 >> 1) | (u8::from(carry) << 7), op0 & 1 != 0),
            Self::Add => op0.overflowing_add(op1),
            Self::Adc => {
                let (r1, c1) = op0.overflowing_add(op1);
                let (result, c2) = r1.overflowing_add(u8::from(carry));
                (result, c1 || c2)
            }
        }
    }
}
