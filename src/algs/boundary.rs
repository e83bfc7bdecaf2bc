//! Cross-process component adjacency.
//!
//! An edge joins a local component to a component owned by another rank
//! whenever a labeled owned leaf shares a face with a labeled ghost leaf.
//! Refined interfaces are resolved to the leaves on the shared face, so a
//! coarse cell next to a refined ghost sees every child it touches.

use std::collections::BTreeSet;

use crate::algs::halo::GhostLabels;
use crate::algs::offsets::GlobalLabels;
use crate::algs::segment::ComponentId;
use crate::particle_error::ParticleError;
use crate::topology::leaves::adjacent_leaves;
use crate::topology::mesh::CellMesh;

/// One endpoint of a cross-process edge: a component on a remote rank.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RemoteComponent {
    pub rank: usize,
    pub id: ComponentId,
}

/// Cross-process edges, keyed by local component.
///
/// `edges[i]` lists the remote neighbours of component `offset + i`, sorted
/// and de-duplicated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundaryGraph {
    pub offset: u64,
    pub edges: Vec<Vec<RemoteComponent>>,
}

impl BoundaryGraph {
    /// An edgeless graph over `count` components starting at `offset`.
    pub fn empty(offset: u64, count: usize) -> Self {
        Self {
            offset,
            edges: vec![Vec::new(); count],
        }
    }

    /// Number of local components (vertices).
    pub fn num_components(&self) -> usize {
        self.edges.len()
    }

    /// Total number of directed edges.
    pub fn num_edges(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    /// Remote neighbours of `id`, or `None` when `id` is not local.
    pub fn neighbors_of(&self, id: ComponentId) -> Option<&[RemoteComponent]> {
        let idx = id.get().checked_sub(self.offset)?;
        self.edges.get(idx as usize).map(Vec::as_slice)
    }

    /// Ranks named by at least one edge.
    pub fn neighbor_ranks(&self) -> BTreeSet<usize> {
        self.edges.iter().flatten().map(|e| e.rank).collect()
    }
}

/// Scan the owned side of every owner boundary for labeled pairs.
pub fn build_boundary_graph<M>(
    mesh: &M,
    labels: &GlobalLabels,
    ghosts: &GhostLabels,
) -> Result<BoundaryGraph, ParticleError>
where
    M: CellMesh + ?Sized,
{
    let me = mesh.rank();
    let mut graph = BoundaryGraph::empty(labels.offset(), labels.count());
    let mut adj = Vec::new();

    for cell in mesh.owned_cells() {
        let Some(id) = labels.get(cell) else {
            continue;
        };
        let idx = labels.local_index(id).ok_or(ParticleError::UnknownComponent {
            rank: me,
            id: id.get(),
        })?;
        adjacent_leaves(mesh, cell, &mut adj)?;
        for &n in &adj {
            let owner = mesh.leaf_owner(n)?;
            if owner == me {
                continue;
            }
            if let Some(&remote) = ghosts.get(&n) {
                graph.edges[idx].push(RemoteComponent { rank: owner, id: remote });
            }
        }
    }

    for list in &mut graph.edges {
        list.sort_unstable();
        list.dedup();
    }
    log::debug!(
        "[boundary] rank {me}: {} edges over {} components",
        graph.num_edges(),
        graph.num_components()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::field::{CellSamples, Threshold};
    use crate::algs::offsets::allocate_global_ids;
    use crate::algs::segment::segment_local;
    use crate::topology::mesh::{CellRecord, InMemoryCellMesh};
    use crate::topology::point::CellId;

    fn cid(u: u64) -> CellId {
        CellId::new(u).unwrap()
    }

    /// Rank 0 owns coarse cell 1; the ghost neighbour 2 (rank 1) is refined
    /// into 3, 4 (on the shared face) and 5, 6 (away from it), in 2D.
    fn coarse_next_to_refined_ghost() -> InMemoryCellMesh {
        let mut m = InMemoryCellMesh::new(2, 0);
        m.insert(cid(1), CellRecord::leaf(0, 1.0, [0.5, 0.5, 0.0]));
        m.insert(cid(2), CellRecord::leaf(1, 1.0, [1.5, 0.5, 0.0]));
        for (c, x, y) in [(3, 1.25, 0.25), (4, 1.25, 0.75), (5, 1.75, 0.25), (6, 1.75, 0.75)] {
            m.insert(cid(c), CellRecord::leaf(1, 0.25, [x, y, 0.0]));
            m.link_child(cid(2), cid(c)).unwrap();
        }
        m.get_mut(cid(1)).unwrap().face_neighbors.push(cid(2));
        for c in [3, 4] {
            m.get_mut(cid(c)).unwrap().face_neighbors.push(cid(1));
        }
        m
    }

    #[test]
    fn refined_ghost_face_children_become_edges() {
        let m = coarse_next_to_refined_ghost();
        let s: CellSamples = [(cid(1), 1.0)].into_iter().collect();
        let local = segment_local(&m, &s, &Threshold::above(0.5)).unwrap();
        let labels = allocate_global_ids(local, &NoComm).unwrap();
        let ghosts: GhostLabels = [
            (cid(3), ComponentId(7)),
            (cid(4), ComponentId(7)),
            (cid(5), ComponentId(9)),
        ]
        .into_iter()
        .collect();
        let g = build_boundary_graph(&m, &labels, &ghosts).unwrap();
        assert_eq!(g.num_components(), 1);
        // 3 and 4 share component 7 and collapse to one edge; 5 is not adjacent
        assert_eq!(
            g.neighbors_of(ComponentId(0)).unwrap(),
            &[RemoteComponent { rank: 1, id: ComponentId(7) }]
        );
        assert_eq!(g.neighbor_ranks(), BTreeSet::from([1]));
    }

    #[test]
    fn unlabeled_ghosts_give_no_edges() {
        let m = coarse_next_to_refined_ghost();
        let s: CellSamples = [(cid(1), 1.0)].into_iter().collect();
        let local = segment_local(&m, &s, &Threshold::above(0.5)).unwrap();
        let labels = allocate_global_ids(local, &NoComm).unwrap();
        let g = build_boundary_graph(&m, &labels, &GhostLabels::new()).unwrap();
        assert_eq!(g.num_edges(), 0);
        assert!(g.neighbors_of(ComponentId(1)).is_none());
    }
}
