//! Distributed connected components over the cross-process edge graph.
//!
//! Each component starts as its own root. In every round a rank tells the
//! owners of its remote neighbours the current root of each component whose
//! root moved since the last round; receivers keep the smaller value. Local
//! pointer jumping then follows roots that name another component of the
//! same rank. A global max-reduction of the "changed" flag ends the loop.
//! Roots only decrease, so the loop settles on the least id of every
//! connected component.
//!
//! Canonical particle ids are the ranks of the surviving roots in the
//! globally sorted root list, so they are dense and identical everywhere.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::algs::boundary::{BoundaryGraph, RemoteComponent};
use crate::algs::communicator::{
    CommTag, Communicator, ExchangeTags, agree, allgather_varcount_u64,
};
use crate::algs::exchange::exchange_records;
use crate::algs::segment::ComponentId;
use crate::algs::wire::WireIdPair;
use crate::particle_error::ParticleError;

/// Dense canonical particle id, `0..n_particles`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ParticleId(pub u32);

impl ParticleId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ParticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stitching knobs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Hard cap on propagation rounds. `None` uses the global component
    /// count plus one, which bounds the diameter of any component graph.
    pub max_rounds: Option<usize>,
}

impl StitchConfig {
    pub fn round_cap(&self, total_components: u64) -> usize {
        self.max_rounds
            .unwrap_or_else(|| usize::try_from(total_components).map_or(usize::MAX, |t| t.saturating_add(1)))
    }
}

/// Local component → canonical particle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StitchMap {
    offset: u64,
    local_to_global: Vec<ParticleId>,
    n_particles: u32,
    rounds: usize,
}

impl StitchMap {
    /// Particle of a local component, `None` for ids outside this rank's range.
    pub fn particle_of(&self, id: ComponentId) -> Option<ParticleId> {
        let idx = id.get().checked_sub(self.offset)?;
        self.local_to_global.get(idx as usize).copied()
    }

    /// Number of particles across all ranks.
    pub fn n_particles(&self) -> u32 {
        self.n_particles
    }

    /// Propagation rounds run, the final quiet round included.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn num_components(&self) -> usize {
        self.local_to_global.len()
    }
}

/// Status values folded by the per-round max-reduction.
const QUIET: u64 = 0;
const CHANGED: u64 = 1;
const FAILED: u64 = 2;

/// Resolve every local component to its canonical particle. Collective.
///
/// `neighbors` is the symmetric halo neighbour set; `total` is the global
/// component count. Uses the tags `tag_base..tag_base + 4`.
///
/// # Errors
/// - [`ParticleError::UnknownNeighbor`] if an edge names a rank outside
///   `neighbors`.
/// - [`ParticleError::UnknownComponent`] if a neighbour addresses an id this
///   rank does not own.
/// - [`ParticleError::StitchingDidNotConverge`] on every rank when the round
///   cap is hit.
pub fn stitch_components<C>(
    graph: &BoundaryGraph,
    neighbors: &BTreeSet<usize>,
    total: u64,
    comm: &C,
    cfg: &StitchConfig,
    tag_base: CommTag,
) -> Result<StitchMap, ParticleError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let offset = graph.offset;
    let n = graph.num_components();
    let edges_known = match graph.neighbor_ranks().into_iter().find(|r| !neighbors.contains(r)) {
        Some(rank) => Err(ParticleError::UnknownNeighbor { rank }),
        None => Ok(()),
    };
    agree(comm, "stitching setup", edges_known)?;
    let sym_tags = ExchangeTags::from_base(tag_base);
    let round_tags = ExchangeTags::from_base(tag_base.offset(2));

    // --- symmetrize edges ---
    let mut failure: Option<ParticleError> = None;
    let mut adj = graph.edges.clone();
    let mut outgoing: HashMap<usize, Vec<WireIdPair>> = HashMap::new();
    for (i, list) in graph.edges.iter().enumerate() {
        for e in list {
            outgoing
                .entry(e.rank)
                .or_default()
                .push(WireIdPair::new(e.id.get(), offset + i as u64));
        }
    }
    for (src, pairs) in exchange_records(&outgoing, comm, sym_tags, neighbors)? {
        for p in pairs {
            match local_slot(p.target(), offset, n) {
                Some(idx) => adj[idx].push(RemoteComponent {
                    rank: src,
                    id: ComponentId(p.value()),
                }),
                None => {
                    failure.get_or_insert(ParticleError::UnknownComponent {
                        rank: me,
                        id: p.target(),
                    });
                }
            }
        }
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }

    // --- least-label propagation ---
    let cap = cfg.round_cap(total);
    let mut roots: Vec<u64> = (0..n as u64).map(|i| offset + i).collect();
    let mut dirty = vec![true; n];
    let mut rounds = 0usize;
    loop {
        if rounds == cap {
            return Err(ParticleError::StitchingDidNotConverge { rounds });
        }
        rounds += 1;

        let mut outgoing: HashMap<usize, Vec<WireIdPair>> = HashMap::new();
        for (i, list) in adj.iter().enumerate().filter(|(i, _)| dirty[*i]) {
            for e in list {
                outgoing
                    .entry(e.rank)
                    .or_default()
                    .push(WireIdPair::new(e.id.get(), roots[i]));
            }
        }
        dirty.fill(false);

        let mut changed = false;
        for (_, pairs) in exchange_records(&outgoing, comm, round_tags, neighbors)? {
            for p in pairs {
                match local_slot(p.target(), offset, n) {
                    Some(idx) if p.value() < roots[idx] => {
                        roots[idx] = p.value();
                        dirty[idx] = true;
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        failure.get_or_insert(ParticleError::UnknownComponent {
                            rank: me,
                            id: p.target(),
                        });
                    }
                }
            }
        }
        changed |= compress_local(&mut roots, &mut dirty, offset);

        let mine = if failure.is_some() {
            FAILED
        } else if changed {
            CHANGED
        } else {
            QUIET
        };
        let status = comm.allreduce_max_u64(mine)?;
        log::trace!("[stitch] rank {me}: round {rounds} status {mine} (global {status})");
        match status {
            QUIET => break,
            CHANGED => continue,
            _ => {
                return Err(failure.unwrap_or_else(|| {
                    ParticleError::comm(me, "another rank failed during stitching")
                }));
            }
        }
    }

    // --- dense relabel ---
    let representatives: Vec<u64> = roots
        .iter()
        .enumerate()
        .filter(|&(i, &r)| r == offset + i as u64)
        .map(|(_, &r)| r)
        .collect();
    let gathered = allgather_varcount_u64(comm, &representatives)?;
    let sorted: Vec<u64> = gathered.into_iter().kmerge().dedup().collect();
    let n_particles = u32::try_from(sorted.len())
        .map_err(|_| ParticleError::UnmappedComponent(sorted.len() as u64))?;
    let local_to_global = roots
        .iter()
        .map(|&r| {
            sorted
                .binary_search(&r)
                .map(|pos| ParticleId(pos as u32))
                .map_err(|_| ParticleError::UnmappedComponent(r))
        })
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "[stitch] rank {me}: {n} components -> {n_particles} particles in {rounds} rounds"
    );
    Ok(StitchMap {
        offset,
        local_to_global,
        n_particles,
        rounds,
    })
}

fn local_slot(id: u64, offset: u64, n: usize) -> Option<usize> {
    let idx = id.checked_sub(offset)?;
    (idx < n as u64).then_some(idx as usize)
}

/// Follow roots that point at another local component until they stop
/// decreasing. Returns whether any root moved.
fn compress_local(roots: &mut [u64], dirty: &mut [bool], offset: u64) -> bool {
    let n = roots.len();
    let mut changed = false;
    for i in 0..n {
        while let Some(j) = local_slot(roots[i], offset, n) {
            if roots[j] >= roots[i] {
                break;
            }
            roots[i] = roots[j];
            dirty[i] = true;
            changed = true;
        }
    }
    changed
}
