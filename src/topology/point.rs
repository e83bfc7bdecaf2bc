//! `CellId`: a strong, zero-cost handle for mesh cells
//!
//! Every cell (owned, ghost, or refined parent) is named by a globally unique
//! `CellId`. The same physical cell carries the same id on its owner and on
//! every process that mirrors it, so ids can be shipped between ranks as-is.
//!
//! `CellId` wraps a `NonZeroU64`; 0 is reserved as invalid.

use std::{fmt, num::NonZeroU64};

use crate::particle_error::ParticleError;

/// Globally unique cell handle.
///
/// # Memory layout
/// `repr(transparent)` over `NonZeroU64`, so `Option<CellId>` is also 8 bytes
/// and the id travels on the wire as a plain little-endian `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct CellId(NonZeroU64);

impl CellId {
    /// Creates a new `CellId` from a raw `u64` value.
    ///
    /// # Errors
    /// Returns [`ParticleError::InvalidCellId`] if `raw == 0`.
    #[inline]
    pub fn new(raw: u64) -> Result<Self, ParticleError> {
        NonZeroU64::new(raw)
            .map(CellId)
            .ok_or(ParticleError::InvalidCellId)
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CellId").field(&self.get()).finish()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl TryFrom<u64> for CellId {
    type Error = ParticleError;
    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        CellId::new(raw)
    }
}

/// `CellId` has the same MPI datatype as `u64`.
#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for CellId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}
