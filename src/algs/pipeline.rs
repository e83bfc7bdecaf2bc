//! End-to-end particle identification.
//!
//! ```text
//! samples ──segment──▶ local ids ──exscan──▶ global ids ──halo──▶ ghost ids
//!        ──boundary──▶ edges ──stitch──▶ particles ──reduce──▶ table
//! ```

use hashbrown::HashMap;
use serde::Serialize;

use crate::algs::aggregate::{ParticleTable, aggregate_properties};
use crate::algs::boundary::build_boundary_graph;
use crate::algs::communicator::{Communicator, ExchangeTags, agree};
use crate::algs::field::CellSamples;
use crate::algs::halo::exchange_ghost_labels;
use crate::algs::offsets::allocate_global_ids;
use crate::algs::segment::segment_local;
use crate::algs::stitching::{ParticleId, stitch_components};
use crate::config::ParticleConfig;
use crate::particle_error::ParticleError;
use crate::topology::mesh::CellMesh;
use crate::topology::point::CellId;

/// Result of one run on one rank.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ParticleReport {
    /// Number of particles across all ranks.
    pub n_particles: u32,
    /// Canonical particle of every labeled owned leaf.
    pub cell_particles: HashMap<CellId, ParticleId>,
    /// Present on the ranks selected by the output policy.
    pub table: Option<ParticleTable>,
    pub stitch_rounds: usize,
}

impl ParticleReport {
    pub fn particle_of(&self, cell: CellId) -> Option<ParticleId> {
        self.cell_particles.get(&cell).copied()
    }

    pub fn to_json(&self) -> Result<String, ParticleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Identify the connected regions of admitted cells across all ranks and
/// aggregate their properties. Collective: every rank calls it with its own
/// view of the same mesh.
///
/// A failure on one rank fails the call on every rank: the failing rank
/// returns its own error and the others a [`ParticleError::CommError`].
pub fn identify_particles<M, C>(
    mesh: &M,
    samples: &CellSamples,
    config: &ParticleConfig,
    comm: &C,
) -> Result<ParticleReport, ParticleError>
where
    M: CellMesh + ?Sized,
    C: Communicator + ?Sized,
{
    let me = comm.rank();

    // Every rank-local failure is settled with `agree` before the next
    // blocking stage, so all ranks return together.
    let prepared = config.validate().and_then(|()| {
        let local = segment_local(mesh, samples, &config.threshold)?;
        let neighbors = mesh.neighbor_ranks()?;
        Ok((local, neighbors))
    });
    let (local, neighbors) = agree(comm, "segmentation", prepared)?;
    let labels = agree(comm, "numbering", allocate_global_ids(local, comm))?;
    log::debug!("[pipeline] rank {me}: neighbour ranks {neighbors:?}");

    let ghosts = exchange_ghost_labels(
        mesh,
        &labels,
        comm,
        ExchangeTags::from_base(config.tag(0)),
        &neighbors,
    )?;
    let graph = agree(
        comm,
        "boundary graph",
        build_boundary_graph(mesh, &labels, &ghosts),
    )?;
    let stitch = stitch_components(
        &graph,
        &neighbors,
        labels.total(),
        comm,
        &config.stitch,
        config.tag(2),
    )?;

    let mapped = labels
        .iter()
        .map(|(cell, id)| {
            stitch
                .particle_of(id)
                .map(|p| (cell, p))
                .ok_or(ParticleError::UnmappedComponent(id.get()))
        })
        .collect::<Result<HashMap<_, _>, _>>();
    let cell_particles = agree(comm, "particle mapping", mapped)?;

    let table = aggregate_properties(mesh, &labels, &stitch, comm, config.output)?;
    if me == 0 {
        log::info!(
            "[pipeline] identified {} particles from {} components in {} rounds",
            stitch.n_particles(),
            labels.total(),
            stitch.rounds()
        );
    }
    Ok(ParticleReport {
        n_particles: stitch.n_particles(),
        cell_particles,
        table,
        stitch_rounds: stitch.rounds(),
    })
}
