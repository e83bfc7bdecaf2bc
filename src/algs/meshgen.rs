//! Structured box meshes with hierarchical refinement, partitioned into
//! per-rank [`InMemoryCellMesh`] views.
//!
//! Cells are axis-aligned boxes addressed by `(level, index)`; refining a
//! cell splits it into `2^dim` children. Neighbouring leaves may differ by
//! any number of levels. Each leaf records, across each of its faces, the
//! same-level cell if it exists and otherwise the coarser leaf covering the
//! face.
//!
//! A rank's view holds its owned leaves, the ghost leaves sharing a face with
//! them, and the whole level-0 tree of every owned or ghost leaf. Leaves in
//! those trees that are neither owned nor ghosts are artificial: present for
//! tree consistency and carrying their true owner.

use std::collections::{BTreeSet, HashMap};

use crate::debug_invariants::DebugInvariants;
use crate::particle_error::ParticleError;
use crate::topology::leaves::adjacent_leaves;
use crate::topology::mesh::{CellRecord, InMemoryCellMesh};
use crate::topology::point::CellId;

#[derive(Clone, Debug)]
struct GenCell {
    level: u32,
    index: [i64; 3],
    parent: Option<usize>,
    children: Vec<usize>,
}

/// A refinable structured box.
#[derive(Clone, Debug)]
pub struct BoxMesh {
    dim: usize,
    lower: [f64; 3],
    upper: [f64; 3],
    counts: [usize; 3],
    cells: Vec<GenCell>,
    lookup: HashMap<(u32, [i64; 3]), usize>,
}

impl BoxMesh {
    /// `counts[d]` coarse cells along each of the first `dim` axes; trailing
    /// axes are ignored.
    pub fn new(
        dim: usize,
        lower: [f64; 3],
        upper: [f64; 3],
        counts: [usize; 3],
    ) -> Result<Self, ParticleError> {
        if !(1..=3).contains(&dim) {
            return Err(ParticleError::InvalidGeometry(format!(
                "dimension {dim} is not 1, 2 or 3"
            )));
        }
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        let mut n = [1usize; 3];
        for d in 0..dim {
            if !(upper[d] > lower[d]) || !lower[d].is_finite() || !upper[d].is_finite() {
                return Err(ParticleError::InvalidGeometry(format!(
                    "axis {d}: upper bound {} must exceed lower bound {}",
                    upper[d], lower[d]
                )));
            }
            if counts[d] == 0 {
                return Err(ParticleError::InvalidGeometry(format!(
                    "axis {d} has zero cells"
                )));
            }
            lo[d] = lower[d];
            hi[d] = upper[d];
            n[d] = counts[d];
        }

        let mut mesh = Self {
            dim,
            lower: lo,
            upper: hi,
            counts: n,
            cells: Vec::with_capacity(n[0] * n[1] * n[2]),
            lookup: HashMap::new(),
        };
        for k in 0..n[2] as i64 {
            for j in 0..n[1] as i64 {
                for i in 0..n[0] as i64 {
                    mesh.push(0, [i, j, k], None);
                }
            }
        }
        Ok(mesh)
    }

    pub fn interval(x0: f64, x1: f64, n: usize) -> Result<Self, ParticleError> {
        Self::new(1, [x0, 0.0, 0.0], [x1, 0.0, 0.0], [n, 1, 1])
    }

    pub fn rectangle(lower: [f64; 2], upper: [f64; 2], counts: [usize; 2]) -> Result<Self, ParticleError> {
        Self::new(
            2,
            [lower[0], lower[1], 0.0],
            [upper[0], upper[1], 0.0],
            [counts[0], counts[1], 1],
        )
    }

    pub fn cuboid(lower: [f64; 3], upper: [f64; 3], counts: [usize; 3]) -> Result<Self, ParticleError> {
        Self::new(3, lower, upper, counts)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// All cells, refined parents included.
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.cells.iter().filter(|c| c.children.is_empty()).count()
    }

    /// Refine every leaf `levels` times.
    pub fn refine_global(&mut self, levels: u32) {
        for _ in 0..levels {
            self.refine_where(|_| true);
        }
    }

    /// Refine the current leaves for which `pred` holds, once. The record
    /// passed to `pred` has geometry only. Returns the number of refined
    /// leaves.
    pub fn refine_where<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&CellRecord) -> bool,
    {
        let marked: Vec<usize> = (0..self.cells.len())
            .filter(|&k| self.cells[k].children.is_empty())
            .filter(|&k| pred(&self.geometry(k)))
            .collect();
        for &k in &marked {
            self.split(k);
        }
        marked.len()
    }

    /// Every leaf on rank 0 of a world of one.
    pub fn serial(&self) -> Result<InMemoryCellMesh, ParticleError> {
        self.partition(1, |_| 0)?
            .pop()
            .ok_or_else(|| ParticleError::InvalidGeometry("empty partition".into()))
    }

    /// Assign every leaf to `owner_of(center)` and build the view of each of
    /// the `size` ranks, indexed by rank.
    pub fn partition<F>(&self, size: usize, owner_of: F) -> Result<Vec<InMemoryCellMesh>, ParticleError>
    where
        F: Fn([f64; 3]) -> usize,
    {
        let n = self.cells.len();
        let ids = (0..n)
            .map(|k| CellId::new(k as u64 + 1))
            .collect::<Result<Vec<_>, _>>()?;

        let mut global = InMemoryCellMesh::new(self.dim, 0);
        let mut records = Vec::with_capacity(n);
        for k in 0..n {
            let mut rec = self.geometry(k);
            rec.parent = self.cells[k].parent.map(|p| ids[p]);
            rec.children = self.cells[k].children.iter().map(|&c| ids[c]).collect();
            if rec.is_leaf() {
                let owner = owner_of(rec.center);
                if owner >= size {
                    return Err(ParticleError::InvalidConfig(format!(
                        "cell {} assigned to rank {owner} in a world of {size}",
                        ids[k]
                    )));
                }
                rec.owner = Some(owner);
                rec.face_neighbors = self.face_neighbors(k).into_iter().map(|c| ids[c]).collect();
            } else {
                rec.owner = None;
            }
            global.insert(ids[k], rec.clone());
            records.push(rec);
        }

        let roots: Vec<usize> = (0..n).map(|k| self.root_of(k)).collect();
        let mut trees: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); size];
        let mut adj = Vec::new();
        for k in (0..n).filter(|&k| self.cells[k].children.is_empty()) {
            let Some(owner) = records[k].owner else {
                continue;
            };
            trees[owner].insert(roots[k]);
            adjacent_leaves(&global, ids[k], &mut adj)?;
            for &nb in &adj {
                let j = (nb.get() - 1) as usize;
                trees[owner].insert(roots[j]);
            }
        }

        let mut views = Vec::with_capacity(size);
        for (rank, tree_set) in trees.iter().enumerate() {
            let mut view = InMemoryCellMesh::new(self.dim, rank);
            for k in (0..n).filter(|&k| tree_set.contains(&roots[k])) {
                let mut rec = records[k].clone();
                rec.face_neighbors
                    .retain(|c| tree_set.contains(&roots[(c.get() - 1) as usize]));
                view.insert(ids[k], rec);
            }
            view.debug_assert_invariants();
            views.push(view);
        }
        log::debug!(
            "[meshgen] {} cells ({} leaves) over {size} ranks",
            n,
            self.num_leaves()
        );
        Ok(views)
    }

    fn push(&mut self, level: u32, index: [i64; 3], parent: Option<usize>) -> usize {
        let k = self.cells.len();
        self.cells.push(GenCell {
            level,
            index,
            parent,
            children: Vec::new(),
        });
        self.lookup.insert((level, index), k);
        k
    }

    fn split(&mut self, k: usize) {
        if !self.cells[k].children.is_empty() {
            return;
        }
        let GenCell { level, index, .. } = self.cells[k].clone();
        let mut children = Vec::with_capacity(1 << self.dim);
        for bits in 0..(1usize << self.dim) {
            let mut child = [0i64; 3];
            for d in 0..self.dim {
                child[d] = 2 * index[d] + ((bits >> d) & 1) as i64;
            }
            children.push(self.push(level + 1, child, Some(k)));
        }
        self.cells[k].children = children;
    }

    /// Extents of a cell at `level` along each active axis.
    fn widths(&self, level: u32) -> [f64; 3] {
        let mut h = [0.0; 3];
        for d in 0..self.dim {
            h[d] = (self.upper[d] - self.lower[d]) / (self.counts[d] as f64) / f64::from(1u32 << level);
        }
        h
    }

    fn geometry(&self, k: usize) -> CellRecord {
        let cell = &self.cells[k];
        let h = self.widths(cell.level);
        let mut center = [0.0; 3];
        let mut measure = 1.0;
        for d in 0..self.dim {
            center[d] = self.lower[d] + (cell.index[d] as f64 + 0.5) * h[d];
            measure *= h[d];
        }
        CellRecord {
            owner: None,
            measure,
            center,
            parent: None,
            children: Vec::new(),
            face_neighbors: Vec::new(),
        }
    }

    fn root_of(&self, mut k: usize) -> usize {
        while let Some(p) = self.cells[k].parent {
            k = p;
        }
        k
    }

    /// Across each face: the same-level cell, or the coarser leaf covering it.
    fn face_neighbors(&self, k: usize) -> Vec<usize> {
        let GenCell { level, index, .. } = self.cells[k];
        let mut out = Vec::with_capacity(2 * self.dim);
        for d in 0..self.dim {
            let bound = (self.counts[d] as i64) << level;
            for step in [-1i64, 1] {
                let mut j = index;
                j[d] += step;
                if j[d] < 0 || j[d] >= bound {
                    continue;
                }
                let found = (0..=level).rev().find_map(|l| {
                    let shift = level - l;
                    let key = [j[0] >> shift, j[1] >> shift, j[2] >> shift];
                    self.lookup.get(&(l, key)).copied()
                });
                if let Some(n) = found {
                    out.push(n);
                }
            }
        }
        out
    }
}
