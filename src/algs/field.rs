//! Per-cell scalar samples and the threshold predicate.
//!
//! The surrounding field layer reduces its distributed field to one scalar per
//! owned leaf cell (typically the max-norm of the cell's nodal values). The
//! segmenter only ever asks "is this sample admitted?".

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::particle_error::ParticleError;
use crate::topology::mesh::CellMesh;
use crate::topology::point::CellId;

/// Which side of the threshold belongs to a particle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    /// `sample > value` (solid particles in a phase field).
    #[default]
    Above,
    /// `sample < value` (pores: cells where the field is nearly absent).
    Below,
}

/// Threshold predicate over cell samples.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    #[serde(default)]
    pub mode: ThresholdMode,
}

impl Threshold {
    pub const fn above(value: f64) -> Self {
        Self {
            value,
            mode: ThresholdMode::Above,
        }
    }

    pub const fn below(value: f64) -> Self {
        Self {
            value,
            mode: ThresholdMode::Below,
        }
    }

    /// NaN samples are never admitted.
    #[inline]
    pub fn admits(&self, sample: f64) -> bool {
        match self.mode {
            ThresholdMode::Above => sample > self.value,
            ThresholdMode::Below => sample < self.value,
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::above(1e-9)
    }
}

/// One scalar per owned leaf cell.
#[derive(Clone, Debug, Default)]
pub struct CellSamples {
    values: HashMap<CellId, f64>,
}

impl CellSamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cell: CellId, value: f64) {
        self.values.insert(cell, value);
    }

    pub fn get(&self, cell: CellId) -> Option<f64> {
        self.values.get(&cell).copied()
    }

    /// Sample or [`ParticleError::MissingSample`].
    pub fn require(&self, cell: CellId) -> Result<f64, ParticleError> {
        self.get(cell).ok_or(ParticleError::MissingSample(cell))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample every owned leaf with `f(cell center)`.
    pub fn from_fn<M, F>(mesh: &M, f: F) -> Result<Self, ParticleError>
    where
        M: CellMesh + Sync + ?Sized,
        F: Fn([f64; 3]) -> f64 + Sync,
    {
        let owned: Vec<CellId> = mesh.owned_cells().collect();
        let centers = owned
            .iter()
            .map(|&c| mesh.record(c).map(|r| r.center))
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "rayon")]
        let values: Vec<f64> = {
            use rayon::prelude::*;
            centers.par_iter().map(|&x| f(x)).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let values: Vec<f64> = centers.iter().map(|&x| f(x)).collect();

        Ok(Self {
            values: owned.into_iter().zip(values).collect(),
        })
    }

    /// Sample every owned leaf by the max-norm of its nodal values, as
    /// returned by `nodal(cell)`.
    pub fn from_nodal_max_norm<M, F, I>(mesh: &M, mut nodal: F) -> Result<Self, ParticleError>
    where
        M: CellMesh + ?Sized,
        F: FnMut(CellId) -> I,
        I: IntoIterator<Item = f64>,
    {
        let mut out = Self::new();
        for cell in mesh.owned_cells() {
            // `f64::max` drops NaN, so any NaN node poisons the norm explicitly
            let norm = nodal(cell).into_iter().map(f64::abs).fold(0.0_f64, |acc, v| {
                if acc.is_nan() || v.is_nan() { f64::NAN } else { acc.max(v) }
            });
            out.insert(cell, norm);
        }
        Ok(out)
    }
}

impl FromIterator<(CellId, f64)> for CellSamples {
    fn from_iter<T: IntoIterator<Item = (CellId, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
