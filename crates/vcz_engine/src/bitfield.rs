//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait VczBitfield {
    /// A bitfield of `pieces` bits, all unset.
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    /// Decode the bytes of a "Bitfield" message and set the vector to a new
    /// len, in bits. The wire format pads the last byte, the spare bits are
    /// dropped.
    fn new_and_resize(vec: Vec<u8>, len: usize) -> Bitfield {
        let mut s = Bitfield::from_vec(vec);
        s.resize(len, false);
        s
    }

    fn safe_set(&mut self, index: usize);

    /// If the bit is set, indexes out of bounds are unset.
    fn has(&self, index: usize) -> bool;
}

impl VczBitfield for Bitfield {
    fn safe_set(&mut self, index: usize) {
        if self.len() <= index {
            self.resize(index + 1, false);
        }
        self.set(index, true);
    }

    fn has(&self, index: usize) -> bool {
        self.get(index).is_some_and(|b| *b)
    }
}
