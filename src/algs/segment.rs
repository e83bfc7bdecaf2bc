//! Local flood-fill of owned leaf cells into connected components.

use hashbrown::HashMap;

use crate::algs::field::{CellSamples, Threshold};
use crate::particle_error::ParticleError;
use crate::topology::leaves::adjacent_leaves;
use crate::topology::mesh::CellMesh;
use crate::topology::point::CellId;

/// A connected-component id.
///
/// Local ids run `0..k` on each rank; after
/// [`allocate_global_ids`](crate::algs::offsets::allocate_global_ids) they are
/// unique across all ranks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct ComponentId(pub u64);

impl ComponentId {
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-rank component labels before global numbering.
///
/// Only admitted owned leaves carry a label; every other cell is unlabeled.
#[derive(Clone, Debug, Default)]
pub struct LocalLabels {
    labels: HashMap<CellId, ComponentId>,
    count: usize,
}

impl LocalLabels {
    pub fn get(&self, cell: CellId) -> Option<ComponentId> {
        self.labels.get(&cell).copied()
    }

    /// Number of local components `k`; labels are `0..k`.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of labeled cells.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, ComponentId)> + '_ {
        self.labels.iter().map(|(&c, &id)| (c, id))
    }

    pub(crate) fn into_parts(self) -> (HashMap<CellId, ComponentId>, usize) {
        (self.labels, self.count)
    }
}

/// Label every admitted owned leaf with a local component id.
///
/// Seeds are taken in ascending [`CellId`] order, so the numbering is
/// deterministic for a given mesh and field. The flood crosses faces only
/// between leaves owned by this rank; refined neighbours are resolved to
/// the leaves on the shared face.
///
/// # Errors
/// [`ParticleError::MissingSample`] when an owned leaf has no sample, and the
/// mesh errors of [`adjacent_leaves`] for broken connectivity.
pub fn segment_local<M>(
    mesh: &M,
    samples: &CellSamples,
    threshold: &Threshold,
) -> Result<LocalLabels, ParticleError>
where
    M: CellMesh + ?Sized,
{
    let me = mesh.rank();
    let mut labels: HashMap<CellId, ComponentId> = HashMap::new();
    let mut next = 0u64;
    let mut stack = Vec::new();
    let mut adj = Vec::new();

    for seed in mesh.owned_cells() {
        if labels.contains_key(&seed) || !threshold.admits(samples.require(seed)?) {
            continue;
        }
        let id = ComponentId(next);
        next += 1;
        labels.insert(seed, id);
        stack.push(seed);

        while let Some(cell) = stack.pop() {
            adjacent_leaves(mesh, cell, &mut adj)?;
            for &n in &adj {
                if labels.contains_key(&n) || mesh.leaf_owner(n)? != me {
                    continue;
                }
                if threshold.admits(samples.require(n)?) {
                    labels.insert(n, id);
                    stack.push(n);
                }
            }
        }
    }

    log::debug!(
        "[segment] rank {me}: {next} local components over {} cells",
        labels.len()
    );
    Ok(LocalLabels {
        labels,
        count: next as usize,
    })
}
