//! Per-particle volume, centroid and equivalent radius.
//!
//! Every rank accumulates `Σ measure` and `Σ measure·center` of its labeled
//! owned leaves into one flat buffer indexed by particle, then a single sum
//! reduction combines the buffers.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::{Communicator, agree};
use crate::algs::offsets::GlobalLabels;
use crate::algs::stitching::{ParticleId, StitchMap};
use crate::particle_error::ParticleError;
use crate::topology::mesh::CellMesh;

/// Where the particle table is materialized.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPolicy {
    /// Only on the given rank (rooted reduction).
    Root(usize),
    /// On every rank (all-reduction).
    Replicated,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        OutputPolicy::Root(0)
    }
}

impl OutputPolicy {
    /// Whether `rank` receives the table.
    pub fn materializes_on(self, rank: usize) -> bool {
        match self {
            OutputPolicy::Root(r) => r == rank,
            OutputPolicy::Replicated => true,
        }
    }
}

/// Aggregated properties of one particle.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleProperties {
    pub id: ParticleId,
    pub volume: f64,
    /// Unused trailing components are zero.
    pub centroid: [f64; 3],
    pub equivalent_radius: f64,
}

/// Dense table of all particles, indexed by [`ParticleId`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleTable {
    pub dim: usize,
    pub particles: Vec<ParticleProperties>,
}

impl ParticleTable {
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn get(&self, id: ParticleId) -> Option<&ParticleProperties> {
        self.particles.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticleProperties> {
        self.particles.iter()
    }

    pub fn total_volume(&self) -> f64 {
        self.particles.iter().map(|p| p.volume).sum()
    }
}

impl fmt::Display for ParticleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.particles {
            write!(f, "Particle {} has volume {} and center (", p.id, p.volume)?;
            for (k, x) in p.centroid.iter().take(self.dim.max(1)).enumerate() {
                if k > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{x}")?;
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

/// Radius of the `dim`-ball with measure `volume`.
pub fn equivalent_radius(dim: usize, volume: f64) -> f64 {
    match dim {
        1 => volume / 2.0,
        2 => (volume / PI).sqrt(),
        _ => (3.0 * volume / (4.0 * PI)).cbrt(),
    }
}

/// Reduce cell contributions into the particle table. Collective.
///
/// Returns `Some(table)` on the ranks selected by `policy`, `None` elsewhere.
///
/// # Errors
/// - [`ParticleError::UnmappedComponent`] if a labeled cell has no particle.
/// - [`ParticleError::ZeroMeasureParticle`] if a particle sums to exactly
///   zero measure.
/// - [`ParticleError::InvalidConfig`] if the root rank is out of range.
pub fn aggregate_properties<M, C>(
    mesh: &M,
    labels: &GlobalLabels,
    stitch: &StitchMap,
    comm: &C,
    policy: OutputPolicy,
) -> Result<Option<ParticleTable>, ParticleError>
where
    M: CellMesh + ?Sized,
    C: Communicator + ?Sized,
{
    let dim = mesh.dim();
    let mut buf = agree(
        comm,
        "aggregation",
        accumulate(mesh, labels, stitch, comm.size(), policy),
    )?;
    let stride = 1 + dim;
    let n = stitch.n_particles() as usize;

    match policy {
        OutputPolicy::Root(r) => comm.reduce_sum_f64(r, &mut buf)?,
        OutputPolicy::Replicated => comm.allreduce_sum_f64(&mut buf)?,
    }
    if !policy.materializes_on(comm.rank()) {
        return Ok(None);
    }

    let mut particles = Vec::with_capacity(n);
    for (i, slot) in buf.chunks_exact(stride).enumerate() {
        let volume = slot[0];
        if volume == 0.0 {
            return Err(ParticleError::ZeroMeasureParticle(i as u32));
        }
        let mut centroid = [0.0; 3];
        for k in 0..dim {
            centroid[k] = slot[1 + k] / volume;
        }
        particles.push(ParticleProperties {
            id: ParticleId(i as u32),
            volume,
            centroid,
            equivalent_radius: equivalent_radius(dim, volume),
        });
    }
    Ok(Some(ParticleTable { dim, particles }))
}

/// Per-particle `[measure, measure * center..]` sums over the owned cells.
fn accumulate<M>(
    mesh: &M,
    labels: &GlobalLabels,
    stitch: &StitchMap,
    world: usize,
    policy: OutputPolicy,
) -> Result<Vec<f64>, ParticleError>
where
    M: CellMesh + ?Sized,
{
    let dim = mesh.dim();
    if !(1..=3).contains(&dim) {
        return Err(ParticleError::InvalidGeometry(format!(
            "dimension {dim} is not 1, 2 or 3"
        )));
    }
    if let OutputPolicy::Root(r) = policy {
        if r >= world {
            return Err(ParticleError::InvalidConfig(format!(
                "output root {r} is outside a world of {world}"
            )));
        }
    }

    let stride = 1 + dim;
    let mut buf = vec![0.0_f64; stitch.n_particles() as usize * stride];
    for cell in mesh.owned_cells() {
        let Some(id) = labels.get(cell) else {
            continue;
        };
        let p = stitch
            .particle_of(id)
            .ok_or(ParticleError::UnmappedComponent(id.get()))?;
        let rec = mesh.record(cell)?;
        let slot = &mut buf[p.index() * stride..(p.index() + 1) * stride];
        slot[0] += rec.measure;
        for k in 0..dim {
            slot[1 + k] += rec.measure * rec.center[k];
        }
    }
    Ok(buf)
}
