//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! A [`Communicator`] is the process context every distributed stage receives:
//! it knows its rank and the world size, moves contiguous byte slices between
//! ranks, and offers the handful of collectives the pipeline synchronizes on.
//! All point-to-point handles are **waitable**; callers `.wait()` before they
//! trust a buffer. Messages between one `(src, dst, tag)` triple are delivered
//! in the order they were sent.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

use crate::particle_error::ParticleError;

/// Typed message tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// The tag `n` slots after this one.
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

/// The two tags of a sizes-then-data exchange.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Non-blocking point-to-point messaging plus the collectives the pipeline
/// needs.
///
/// Collectives must be entered by every rank in the same order.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive from `peer`; `buf.len()` is the expected message size.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), ParticleError>;

    /// Gather equally sized contributions from every rank into `recv`, in
    /// rank order. `recv.len()` must be `size() * send.len()`.
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), ParticleError>;

    /// Sum of `value` over all lower ranks (0 on rank 0).
    fn exscan_sum_u64(&self, value: u64) -> Result<u64, ParticleError> {
        let all = allgather_u64(self, value)?;
        Ok(all[..self.rank()].iter().sum())
    }

    /// Sum of `value` over all ranks.
    fn allreduce_sum_u64(&self, value: u64) -> Result<u64, ParticleError> {
        Ok(allgather_u64(self, value)?.iter().sum())
    }

    /// Maximum of `value` over all ranks.
    fn allreduce_max_u64(&self, value: u64) -> Result<u64, ParticleError> {
        Ok(allgather_u64(self, value)?.into_iter().max().unwrap_or(value))
    }

    /// Element-wise sum of `values` over all ranks, result on every rank.
    ///
    /// The default sums contributions in rank order, so every rank obtains
    /// bit-identical results.
    fn allreduce_sum_f64(&self, values: &mut [f64]) -> Result<(), ParticleError> {
        let n = values.len();
        let send: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut recv = vec![0u8; send.len() * self.size()];
        self.allgather(&send, &mut recv)?;
        values.fill(0.0);
        for contribution in recv.chunks_exact(8 * n.max(1)).take(self.size()) {
            for (v, raw) in values.iter_mut().zip(contribution.chunks_exact(8)) {
                *v += f64::from_le_bytes(raw.try_into().unwrap_or([0; 8]));
            }
        }
        Ok(())
    }

    /// Element-wise sum of `values` over all ranks, result on `root` only.
    /// The contents of `values` on other ranks are unspecified afterwards.
    fn reduce_sum_f64(&self, root: usize, values: &mut [f64]) -> Result<(), ParticleError> {
        let _ = root;
        self.allreduce_sum_f64(values)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Gather one `u64` from every rank, in rank order.
pub fn allgather_u64<C>(comm: &C, value: u64) -> Result<Vec<u64>, ParticleError>
where
    C: Communicator + ?Sized,
{
    let mut recv = vec![0u8; 8 * comm.size()];
    comm.allgather(&value.to_le_bytes(), &mut recv)?;
    Ok(recv
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
        .collect())
}

/// Gather a variable-length `u64` list from every rank, in rank order.
///
/// Two collectives: the lengths, then the lists padded to the longest one.
pub fn allgather_varcount_u64<C>(comm: &C, values: &[u64]) -> Result<Vec<Vec<u64>>, ParticleError>
where
    C: Communicator + ?Sized,
{
    let counts = allgather_u64(comm, values.len() as u64)?;
    let width = counts.iter().copied().max().unwrap_or(0) as usize;
    let mut send = vec![0u8; 8 * width];
    for (slot, v) in send.chunks_exact_mut(8).zip(values) {
        slot.copy_from_slice(&v.to_le_bytes());
    }
    let mut recv = vec![0u8; send.len() * comm.size()];
    comm.allgather(&send, &mut recv)?;
    let mut out = Vec::with_capacity(comm.size());
    for (r, &n) in counts.iter().enumerate() {
        let block = &recv[r * 8 * width..(r * 8 * width + 8 * n as usize)];
        out.push(
            block
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        );
    }
    Ok(out)
}

/// Settle a rank-local outcome collectively before the next blocking stage.
///
/// One max-reduction tells every rank whether any rank failed. A failed rank
/// returns its own error; the others return a [`ParticleError::CommError`]
/// naming `stage`, so no rank is left waiting on a peer that already quit.
pub fn agree<T, C>(
    comm: &C,
    stage: &str,
    local: Result<T, ParticleError>,
) -> Result<T, ParticleError>
where
    C: Communicator + ?Sized,
{
    let any_failed = comm.allreduce_max_u64(u64::from(local.is_err()))?;
    match local {
        Err(e) => Err(e),
        Ok(_) if any_failed != 0 => Err(ParticleError::comm(
            comm.rank(),
            format!("another rank failed during {stage}"),
        )),
        Ok(v) => Ok(v),
    }
}

/// Compile-time no-op comm for pure serial runs: rank 0 of a world of one.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) -> Result<(), ParticleError> {
        Ok(())
    }
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), ParticleError> {
        if recv.len() != send.len() {
            return Err(ParticleError::BufferSizeMismatch {
                neighbor: 0,
                expected: send.len(),
                got: recv.len(),
            });
        }
        recv.copy_from_slice(send);
        Ok(())
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Tag reserved for collectives built from point-to-point messages.
const COLLECTIVE_TAG: u16 = u16::MAX;

/// In-process communicator: each rank is a thread sharing one FIFO mailbox.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<DashMap<Key, VecDeque<Bytes>>>,
    timeout: Option<Duration>,
}

impl RayonComm {
    /// Create the `size` communicators of one world, indexed by rank.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| RayonComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout: None,
            })
            .collect()
    }

    /// Give up on receives after `timeout`; `wait` then returns `None`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn wait_for(&self, peer: usize, tag: u16) -> Result<Vec<u8>, ParticleError> {
        self.irecv(peer, tag, &mut [])
            .wait()
            .ok_or_else(|| ParticleError::comm(peer, "collective message never arrived"))
    }
}

pub struct LocalHandle {
    mailbox: Arc<DashMap<Key, VecDeque<Bytes>>>,
    key: Key,
    deadline: Option<Instant>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            deadline: self.timeout.map(|t| Instant::now() + t),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), ParticleError> {
        self.allgather(&[], &mut [])
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), ParticleError> {
        let n = send.len();
        if recv.len() != n * self.size {
            return Err(ParticleError::BufferSizeMismatch {
                neighbor: self.rank,
                expected: n * self.size,
                got: recv.len(),
            });
        }
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.isend(peer, COLLECTIVE_TAG, send);
        }
        recv[self.rank * n..(self.rank + 1) * n].copy_from_slice(send);
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            let data = self.wait_for(peer, COLLECTIVE_TAG)?;
            if data.len() != n {
                return Err(ParticleError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: n,
                    got: data.len(),
                });
            }
            recv[peer * n..(peer + 1) * n].copy_from_slice(&data);
        }
        Ok(())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI_COMM_WORLD wrapper. Keeps the universe alive for its lifetime.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, ParticleError> {
            let universe = mpi::initialize().ok_or(ParticleError::MpiInit)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    /// Pending send. Owns a heap copy of the payload until `wait`.
    pub struct MpiSendHandle {
        request: mpi::ffi::MPI_Request,
        payload: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            // SAFETY: `request` came from `into_raw` on a live send request and
            // `payload` stays allocated until that request completes.
            unsafe {
                mpi::ffi::MPI_Wait(&mut self.request, mpi::ffi::RSMPI_STATUS_IGNORE);
                drop(Box::from_raw(self.payload));
            }
            None
        }
    }

    /// Receive that runs when waited on. Sends never block, so posting the
    /// matching receive late cannot deadlock an exchange.
    pub struct MpiRecvHandle {
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let world = SimpleCommunicator::world();
            let (msg, _status) = world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(msg)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let payload: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the boxed payload is freed only in `MpiSendHandle::wait`.
            let data: &'static [u8] = unsafe { &*payload };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, i32::from(tag));
            let (request, _) = request.into_raw();
            MpiSendHandle { request, payload }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                peer: peer as i32,
                tag: i32::from(tag),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) -> Result<(), ParticleError> {
            self.world.barrier();
            Ok(())
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), ParticleError> {
            if recv.len() != send.len() * self.size {
                return Err(ParticleError::BufferSizeMismatch {
                    neighbor: self.rank,
                    expected: send.len() * self.size,
                    got: recv.len(),
                });
            }
            self.world.all_gather_into(send, recv);
            Ok(())
        }

        fn exscan_sum_u64(&self, value: u64) -> Result<u64, ParticleError> {
            let mut out = 0u64;
            self.world
                .exclusive_scan_into(&value, &mut out, SystemOperation::sum());
            // MPI leaves the rank-0 result undefined.
            Ok(if self.rank == 0 { 0 } else { out })
        }

        fn allreduce_sum_u64(&self, value: u64) -> Result<u64, ParticleError> {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::sum());
            Ok(out)
        }

        fn allreduce_max_u64(&self, value: u64) -> Result<u64, ParticleError> {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }

        fn allreduce_sum_f64(&self, values: &mut [f64]) -> Result<(), ParticleError> {
            let send = values.to_vec();
            self.world
                .all_reduce_into(&send[..], values, SystemOperation::sum());
            Ok(())
        }

        fn reduce_sum_f64(&self, root: usize, values: &mut [f64]) -> Result<(), ParticleError> {
            let send = values.to_vec();
            let root_proc = self.world.process_at_rank(root as i32);
            if self.rank == root {
                root_proc.reduce_into_root(&send[..], values, SystemOperation::sum());
            } else {
                root_proc.reduce_into(&send[..], SystemOperation::sum());
            }
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
