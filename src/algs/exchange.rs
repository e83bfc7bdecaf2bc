//! Sparse neighbour exchange: counts first, then fixed-size records.
//!
//! Both phases post every receive before any send and drain every handle
//! before returning, even when an error is detected part-way. The neighbour
//! set must be symmetric (if `a` lists `b`, `b` lists `a`); every listed
//! neighbour receives a count, possibly zero, so no rank waits on a message
//! that is never sent.

use std::collections::BTreeSet;

use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::particle_error::ParticleError;

/// Exchange per-neighbour record counts. Returns `neighbour → count` for
/// every neighbour in `neighbors`.
pub fn exchange_sizes_symmetric<C>(
    counts: &HashMap<usize, usize>,
    comm: &C,
    tag: CommTag,
    neighbors: &BTreeSet<usize>,
) -> Result<HashMap<usize, usize>, ParticleError>
where
    C: Communicator + ?Sized,
{
    // 1) post all receives
    let mut recv_size = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_size.push((nbr, h));
    }

    // 2) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let count = WireCount::new(counts.get(&nbr).copied().unwrap_or(0));
        pending_sends.push(comm.isend(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = HashMap::with_capacity(neighbors.len());
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                let mut cnt = WireCount::new(0);
                cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                sizes_in.insert(nbr, cnt.get());
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(ParticleError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(ParticleError::comm(
                    nbr,
                    format!("failed to receive size from rank {nbr}"),
                ));
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Send `outgoing[nbr]` to each neighbour and collect what every neighbour
/// sent back. Neighbours with nothing to say send an empty list.
///
/// # Errors
/// [`ParticleError::UnknownNeighbor`] if `outgoing` addresses a rank outside
/// `neighbors`; communication errors for missing or mis-sized messages.
pub fn exchange_records<T, C>(
    outgoing: &HashMap<usize, Vec<T>>,
    comm: &C,
    tags: ExchangeTags,
    neighbors: &BTreeSet<usize>,
) -> Result<HashMap<usize, Vec<T>>, ParticleError>
where
    T: Pod + Zeroable,
    C: Communicator + ?Sized,
{
    if let Some(&rank) = outgoing.keys().find(|r| !neighbors.contains(r)) {
        return Err(ParticleError::UnknownNeighbor { rank });
    }
    let counts: HashMap<usize, usize> = outgoing.iter().map(|(&r, v)| (r, v.len())).collect();
    let recv_counts = exchange_sizes_symmetric(&counts, comm, tags.sizes, neighbors)?;

    let mut recv_data = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let n_items = recv_counts.get(&nbr).copied().unwrap_or(0);
        let mut buffer = vec![T::zeroed(); n_items];
        let h = comm.irecv(nbr, tags.data.as_u16(), cast_slice_mut(&mut buffer));
        recv_data.push((nbr, h, buffer));
    }

    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let items = outgoing.get(&nbr).map_or(&[][..], |v| &v[..]);
        pending_sends.push(comm.isend(nbr, tags.data.as_u16(), cast_slice(items)));
    }

    let mut received = HashMap::with_capacity(neighbors.len());
    let mut maybe_err = None;
    for (nbr, h, mut buffer) in recv_data {
        let expected = std::mem::size_of_val(buffer.as_slice());
        match h.wait() {
            Some(raw) if raw.len() == expected => {
                cast_slice_mut(&mut buffer).copy_from_slice(&raw);
                received.insert(nbr, buffer);
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(ParticleError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected,
                    got: raw.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(ParticleError::comm(
                    nbr,
                    "no data received (wait returned None)",
                ));
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}
