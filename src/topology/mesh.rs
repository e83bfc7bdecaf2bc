//! The local cell graph consumed by the particle pipeline.
//!
//! A process sees its owned leaf cells, the ghost leaves that share a face
//! with them, and enough of the refinement tree around both to resolve
//! hanging faces. [`CellMesh`] is the seam to an external mesh layer;
//! [`InMemoryCellMesh`] is the bundled implementation.

use std::collections::{BTreeMap, BTreeSet};

use crate::debug_invariants::DebugInvariants;
use crate::particle_error::ParticleError;
use crate::topology::leaves::adjacent_leaves;
use crate::topology::point::CellId;

/// Geometry and connectivity of one cell.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CellRecord {
    /// Owning rank. Set on leaves, `None` on refined parents.
    pub owner: Option<usize>,
    /// Length, area, or volume of the cell.
    pub measure: f64,
    /// Cell center; unused trailing components are zero.
    pub center: [f64; 3],
    pub parent: Option<CellId>,
    pub children: Vec<CellId>,
    /// Face neighbours at the same or a coarser level.
    pub face_neighbors: Vec<CellId>,
}

impl CellRecord {
    /// A leaf cell with no links yet.
    pub fn leaf(owner: usize, measure: f64, center: [f64; 3]) -> Self {
        Self {
            owner: Some(owner),
            measure,
            center,
            parent: None,
            children: Vec::new(),
            face_neighbors: Vec::new(),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Read-only view of the local part of a partitioned mesh.
pub trait CellMesh {
    /// Spatial dimension (1, 2 or 3).
    fn dim(&self) -> usize;

    /// Rank of the process holding this view.
    fn rank(&self) -> usize;

    /// Number of cells known locally, refined parents included.
    fn num_cells(&self) -> usize;

    /// Look up a cell.
    fn cell(&self, id: CellId) -> Option<&CellRecord>;

    /// Leaf cells owned by this rank, in ascending id order.
    fn owned_cells(&self) -> Box<dyn Iterator<Item = CellId> + '_>;

    /// Leaf cells owned by other ranks, in ascending id order.
    fn ghost_cells(&self) -> Box<dyn Iterator<Item = CellId> + '_>;

    /// Look up a cell or fail with [`ParticleError::MissingCell`].
    fn record(&self, id: CellId) -> Result<&CellRecord, ParticleError> {
        self.cell(id).ok_or(ParticleError::MissingCell(id))
    }

    /// Owner of a leaf cell.
    fn leaf_owner(&self, id: CellId) -> Result<usize, ParticleError> {
        self.record(id)?.owner.ok_or(ParticleError::MissingOwner(id))
    }

    /// Ranks owning at least one leaf that shares a face with an owned leaf.
    ///
    /// Face adjacency is symmetric, so this set is symmetric across ranks and
    /// can drive sparse neighbour exchanges without an all-to-all.
    fn neighbor_ranks(&self) -> Result<BTreeSet<usize>, ParticleError> {
        let me = self.rank();
        let mut ranks = BTreeSet::new();
        let mut adj = Vec::new();
        for cell in self.owned_cells() {
            adjacent_leaves(self, cell, &mut adj)?;
            for &n in &adj {
                let owner = self.leaf_owner(n)?;
                if owner != me {
                    ranks.insert(owner);
                }
            }
        }
        Ok(ranks)
    }
}

/// `BTreeMap`-backed [`CellMesh`].
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct InMemoryCellMesh {
    dim: usize,
    rank: usize,
    cells: BTreeMap<CellId, CellRecord>,
}

impl InMemoryCellMesh {
    pub fn new(dim: usize, rank: usize) -> Self {
        Self {
            dim,
            rank,
            cells: BTreeMap::new(),
        }
    }

    /// Insert or replace a cell.
    pub fn insert(&mut self, id: CellId, record: CellRecord) -> Option<CellRecord> {
        self.cells.insert(id, record)
    }

    pub fn get_mut(&mut self, id: CellId) -> Option<&mut CellRecord> {
        self.cells.get_mut(&id)
    }

    /// Link `child` under `parent`, updating both records.
    pub fn link_child(&mut self, parent: CellId, child: CellId) -> Result<(), ParticleError> {
        if !self.cells.contains_key(&child) {
            return Err(ParticleError::MissingCell(child));
        }
        let p = self
            .cells
            .get_mut(&parent)
            .ok_or(ParticleError::MissingCell(parent))?;
        if !p.children.contains(&child) {
            p.children.push(child);
        }
        p.owner = None;
        if let Some(c) = self.cells.get_mut(&child) {
            c.parent = Some(parent);
        }
        Ok(())
    }

    /// Record a face adjacency in both directions.
    pub fn link_faces(&mut self, a: CellId, b: CellId) -> Result<(), ParticleError> {
        if !self.cells.contains_key(&b) {
            return Err(ParticleError::MissingCell(b));
        }
        let ra = self.cells.get_mut(&a).ok_or(ParticleError::MissingCell(a))?;
        if !ra.face_neighbors.contains(&b) {
            ra.face_neighbors.push(b);
        }
        if let Some(rb) = self.cells.get_mut(&b) {
            if !rb.face_neighbors.contains(&a) {
                rb.face_neighbors.push(a);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over every local cell in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &CellRecord)> {
        self.cells.iter().map(|(&id, rec)| (id, rec))
    }
}

impl CellMesh for InMemoryCellMesh {
    fn dim(&self) -> usize {
        self.dim
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn num_cells(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, id: CellId) -> Option<&CellRecord> {
        self.cells.get(&id)
    }

    fn owned_cells(&self) -> Box<dyn Iterator<Item = CellId> + '_> {
        let me = self.rank;
        Box::new(
            self.cells
                .iter()
                .filter(move |(_, r)| r.is_leaf() && r.owner == Some(me))
                .map(|(&id, _)| id),
        )
    }

    fn ghost_cells(&self) -> Box<dyn Iterator<Item = CellId> + '_> {
        let me = self.rank;
        Box::new(
            self.cells
                .iter()
                .filter(move |(_, r)| r.is_leaf() && r.owner.is_some_and(|o| o != me))
                .map(|(&id, _)| id),
        )
    }
}

impl DebugInvariants for InMemoryCellMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "InMemoryCellMesh");
    }

    fn validate_invariants(&self) -> Result<(), ParticleError> {
        if !(1..=3).contains(&self.dim) {
            return Err(ParticleError::InvalidGeometry(format!(
                "dimension {} is not 1, 2 or 3",
                self.dim
            )));
        }
        for (&id, rec) in &self.cells {
            if !rec.measure.is_finite() || rec.measure < 0.0 {
                return Err(ParticleError::InvalidGeometry(format!(
                    "cell {id} has measure {}",
                    rec.measure
                )));
            }
            if rec.is_leaf() && rec.owner.is_none() {
                return Err(ParticleError::MissingOwner(id));
            }
            for &child in &rec.children {
                let crec = self.record(child)?;
                if crec.parent != Some(id) {
                    return Err(ParticleError::MalformedRefinement {
                        cell: child,
                        detail: format!("listed under {id} but its parent is {:?}", crec.parent),
                    });
                }
            }
            if let Some(parent) = rec.parent {
                if !self.record(parent)?.children.contains(&id) {
                    return Err(ParticleError::MalformedRefinement {
                        cell: id,
                        detail: format!("parent {parent} does not list it as a child"),
                    });
                }
            }
        }
        for id in self.owned_cells() {
            for &n in &self.record(id)?.face_neighbors {
                self.record(n)?;
            }
        }
        Ok(())
    }
}
