//! Ghost-label update: owners push component ids of their boundary cells to
//! the ranks that mirror those cells as ghosts.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::algs::communicator::{Communicator, ExchangeTags, agree};
use crate::algs::exchange::exchange_records;
use crate::algs::offsets::GlobalLabels;
use crate::algs::segment::ComponentId;
use crate::algs::wire::WireCellLabel;
use crate::particle_error::ParticleError;
use crate::topology::leaves::adjacent_leaves;
use crate::topology::mesh::CellMesh;
use crate::topology::point::CellId;

/// Component ids of labeled ghost leaves, as assigned by their owners.
/// Ghosts absent from the map are unlabeled.
pub type GhostLabels = HashMap<CellId, ComponentId>;

/// Exchange labels of owned boundary cells with every neighbour rank.
///
/// `neighbors` must be [`CellMesh::neighbor_ranks`] of `mesh`. Every neighbour
/// receives a (possibly empty) message.
///
/// Collective on failure: if any rank fails, every rank returns an error.
///
/// # Errors
/// - [`ParticleError::AsymmetricHalo`] when a neighbour sends a label for a
///   cell that is not a leaf it owns in the local view.
/// - [`ParticleError::UnknownNeighbor`] when a boundary cell touches a ghost
///   whose owner is not in `neighbors`.
/// - [`ParticleError::CommError`] on the ranks that did not fail themselves.
pub fn exchange_ghost_labels<M, C>(
    mesh: &M,
    labels: &GlobalLabels,
    comm: &C,
    tags: ExchangeTags,
    neighbors: &BTreeSet<usize>,
) -> Result<GhostLabels, ParticleError>
where
    M: CellMesh + ?Sized,
    C: Communicator + ?Sized,
{
    let me = mesh.rank();
    if neighbors.is_empty() && mesh.ghost_cells().next().is_some() {
        log::warn!("[halo] rank {me} has ghost cells but no neighbour ranks");
    }

    let outgoing = agree(comm, "halo packing", pack_boundary_labels(mesh, labels, neighbors))?;
    let incoming = exchange_records(&outgoing, comm, tags, neighbors)?;
    let ghosts = agree(comm, "halo unpacking", unpack_ghost_labels(mesh, incoming))?;
    log::debug!(
        "[halo] rank {me}: received {} ghost labels from {} neighbours",
        ghosts.len(),
        neighbors.len()
    );
    Ok(ghosts)
}

fn pack_boundary_labels<M>(
    mesh: &M,
    labels: &GlobalLabels,
    neighbors: &BTreeSet<usize>,
) -> Result<HashMap<usize, Vec<WireCellLabel>>, ParticleError>
where
    M: CellMesh + ?Sized,
{
    let me = mesh.rank();
    let mut outgoing: HashMap<usize, Vec<WireCellLabel>> = HashMap::new();
    let mut adj = Vec::new();
    for cell in mesh.owned_cells() {
        let Some(id) = labels.get(cell) else {
            continue;
        };
        adjacent_leaves(mesh, cell, &mut adj)?;
        let mut sent_to = Vec::new();
        for &n in &adj {
            let owner = mesh.leaf_owner(n)?;
            if owner != me && !sent_to.contains(&owner) {
                if !neighbors.contains(&owner) {
                    return Err(ParticleError::UnknownNeighbor { rank: owner });
                }
                sent_to.push(owner);
                outgoing
                    .entry(owner)
                    .or_default()
                    .push(WireCellLabel::new(cell.get(), id.get()));
            }
        }
    }
    Ok(outgoing)
}

fn unpack_ghost_labels<M>(
    mesh: &M,
    incoming: HashMap<usize, Vec<WireCellLabel>>,
) -> Result<GhostLabels, ParticleError>
where
    M: CellMesh + ?Sized,
{
    let mut ghosts = GhostLabels::new();
    for (src, recs) in incoming {
        for rec in recs {
            let cell = CellId::new(rec.cell())?;
            let mirrored = mesh
                .cell(cell)
                .is_some_and(|r| r.is_leaf() && r.owner == Some(src));
            if !mirrored {
                return Err(ParticleError::AsymmetricHalo {
                    neighbor: src,
                    cell,
                });
            }
            ghosts.insert(cell, ComponentId(rec.id()));
        }
    }
    Ok(ghosts)
}
