//! Globally unique component numbering by exclusive prefix sum.

use hashbrown::HashMap;

use crate::algs::communicator::Communicator;
use crate::algs::segment::{ComponentId, LocalLabels};
use crate::debug_invariants::DebugInvariants;
use crate::particle_error::ParticleError;
use crate::topology::point::CellId;

/// Component labels after offsetting: rank `p` owns ids
/// `offset..offset + count`, disjoint from every other rank's range.
#[derive(Clone, Debug, Default)]
pub struct GlobalLabels {
    labels: HashMap<CellId, ComponentId>,
    rank: usize,
    offset: u64,
    count: usize,
    total: u64,
}

impl GlobalLabels {
    pub fn get(&self, cell: CellId) -> Option<ComponentId> {
        self.labels.get(&cell).copied()
    }

    /// First id of this rank's range.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of components on this rank.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of components on all ranks together.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Whether `id` falls in this rank's range.
    pub fn owns(&self, id: ComponentId) -> bool {
        (self.offset..self.offset + self.count as u64).contains(&id.get())
    }

    /// Position of an owned id within this rank's range.
    pub fn local_index(&self, id: ComponentId) -> Option<usize> {
        self.owns(id).then(|| (id.get() - self.offset) as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, ComponentId)> + '_ {
        self.labels.iter().map(|(&c, &id)| (c, id))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Shift local ids by the exclusive prefix sum of component counts over
/// lower ranks. Collective.
///
/// Consumes `local`, so a labeling is offset exactly once.
pub fn allocate_global_ids<C>(local: LocalLabels, comm: &C) -> Result<GlobalLabels, ParticleError>
where
    C: Communicator + ?Sized,
{
    let (mut labels, count) = local.into_parts();
    let offset = comm.exscan_sum_u64(count as u64)?;
    let total = comm.allreduce_sum_u64(count as u64)?;
    for id in labels.values_mut() {
        id.0 += offset;
    }
    log::debug!(
        "[offsets] rank {}: {count} components at offset {offset} (total {total})",
        comm.rank()
    );
    let out = GlobalLabels {
        labels,
        rank: comm.rank(),
        offset,
        count,
        total,
    };
    out.debug_assert_invariants();
    Ok(out)
}

impl DebugInvariants for GlobalLabels {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "GlobalLabels");
    }

    fn validate_invariants(&self) -> Result<(), ParticleError> {
        let end = self.offset + self.count as u64;
        if end > self.total {
            return Err(ParticleError::UnknownComponent {
                rank: self.rank,
                id: end - 1,
            });
        }
        if let Some((_, &id)) = self.labels.iter().find(|(_, id)| !self.owns(**id)) {
            return Err(ParticleError::UnknownComponent {
                rank: self.rank,
                id: id.get(),
            });
        }
        Ok(())
    }
}
