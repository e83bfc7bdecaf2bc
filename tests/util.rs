#![allow(dead_code)]
use mesh_particles::algs::communicator::{Communicator, RayonComm};
use mesh_particles::prelude::*;

pub fn cid(u: u64) -> CellId {
    CellId::new(u).unwrap()
}

/// Run `f` once per rank on its own thread over one in-process world and
/// collect the results in rank order.
pub fn run_ranks<F, T>(n: usize, f: F) -> Vec<T>
where
    F: Fn(RayonComm) -> T + Sync,
    T: Send,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = RayonComm::world(n)
            .into_iter()
            .map(|c| s.spawn(|| f(c)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Partition `boxed`, sample `field` at leaf centers, and run the pipeline on
/// every rank.
pub fn identify_on<P, F>(
    boxed: &BoxMesh,
    n_ranks: usize,
    owner_of: P,
    field: F,
    cfg: &ParticleConfig,
) -> Vec<(InMemoryCellMesh, ParticleReport)>
where
    P: Fn([f64; 3]) -> usize,
    F: Fn([f64; 3]) -> f64 + Sync,
{
    let views = boxed.partition(n_ranks, owner_of).unwrap();
    run_ranks(n_ranks, |c| {
        let mesh = views[c.rank()].clone();
        let samples = CellSamples::from_fn(&mesh, &field).unwrap();
        let report = identify_particles(&mesh, &samples, cfg, &c).unwrap();
        (mesh, report)
    })
}

/// Strip partition along x: rank `floor((x - x0) / (x1 - x0) * n)`.
pub fn x_strips(x0: f64, x1: f64, n: usize) -> impl Fn([f64; 3]) -> usize {
    move |x| (((x[0] - x0) / (x1 - x0) * n as f64) as usize).min(n - 1)
}

/// Indicator of a union of discs `(cx, cy, r)`.
pub fn discs(list: &'static [(f64, f64, f64)]) -> impl Fn([f64; 3]) -> f64 + Sync {
    move |x| {
        let inside = list
            .iter()
            .any(|&(cx, cy, r)| (x[0] - cx).powi(2) + (x[1] - cy).powi(2) < r * r);
        if inside { 1.0 } else { 0.0 }
    }
}

/// Canonical particle of every labeled cell over all ranks.
pub fn cell_to_particle(results: &[(InMemoryCellMesh, ParticleReport)]) -> Vec<(CellId, ParticleId)> {
    let mut out: Vec<(CellId, ParticleId)> = results
        .iter()
        .flat_map(|(_, r)| r.cell_particles.iter().map(|(&c, &p)| (c, p)))
        .collect();
    out.sort_unstable();
    out
}

/// Group cells by particle, as sorted cell lists sorted among themselves:
/// the equivalence classes, independent of numbering.
pub fn classes(pairs: &[(CellId, ParticleId)]) -> Vec<Vec<CellId>> {
    let mut by: std::collections::BTreeMap<ParticleId, Vec<CellId>> = Default::default();
    for &(c, p) in pairs {
        by.entry(p).or_default().push(c);
    }
    let mut out: Vec<Vec<CellId>> = by
        .into_values()
        .map(|mut v| {
            v.sort_unstable();
            v
        })
        .collect();
    out.sort();
    out
}

/// Minimal serial union-find over dense indices.
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
