//! Fixed-layout, little-endian wire types for neighbour exchanges.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A component id attached to a cell: halo exchange payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct WireCellLabel {
    pub cell_le: u64,
    pub id_le: u64,
}

impl WireCellLabel {
    pub fn new(cell: u64, id: u64) -> Self {
        Self {
            cell_le: cell.to_le(),
            id_le: id.to_le(),
        }
    }
    pub fn cell(&self) -> u64 {
        u64::from_le(self.cell_le)
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// A pair of component ids: `target` lives on the receiver, `value` is either
/// the sender's adjacent component (edge symmetrization) or a proposed root
/// (least-label propagation).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct WireIdPair {
    pub target_le: u64,
    pub value_le: u64,
}

impl WireIdPair {
    pub fn new(target: u64, value: u64) -> Self {
        Self {
            target_le: target.to_le(),
            value_le: value.to_le(),
        }
    }
    pub fn target(&self) -> u64 {
        u64::from_le(self.target_le)
    }
    pub fn value(&self) -> u64 {
        u64::from_le(self.value_le)
    }
}

const _: () = {
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireCellLabel>() == 16);
    assert!(size_of::<WireIdPair>() == 16);
    assert!(align_of::<WireIdPair>() == 8);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_pair_bytes_are_little_endian() {
        let v = [WireIdPair::new(1, 0x0102)];
        let bytes = cast_slice(&v);
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..], &0x0102u64.to_le_bytes());
    }

    #[test]
    fn label_decodes_through_byte_buffer() {
        let src = [WireCellLabel::new(42, 7), WireCellLabel::new(43, 9)];
        let mut out = [WireCellLabel::zeroed(); 2];
        cast_slice_mut(&mut out).copy_from_slice(cast_slice(&src));
        assert_eq!((out[1].cell(), out[1].id()), (43, 9));
    }
}
