#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-particles
//!
//! mesh-particles finds connected regions ("particles") of a thresholded scalar
//! field on a partitioned, adaptively refined mesh and reports the volume,
//! centroid and equivalent radius of each one. Regions may span any number of
//! processes; every process ends up with the same dense numbering.
//!
//! ## Pipeline
//! 1. **Local segmentation**: flood-fill of owned leaf cells admitted by a
//!    [`Threshold`](algs::field::Threshold).
//! 2. **Identifier allocation**: one exclusive scan makes component ids
//!    globally unique.
//! 3. **Halo update and boundary graph**: owners push ids of boundary cells to
//!    the ranks mirroring them; each rank then lists cross-process edges.
//! 4. **Stitching**: distributed least-label propagation with a global
//!    convergence check, then a dense relabel.
//! 5. **Aggregation**: one sum reduction of per-particle moments.
//!
//! [`identify_particles`](algs::pipeline::identify_particles) runs all five.
//!
//! ## Communication backends
//! - [`NoComm`](algs::communicator::NoComm): a world of one.
//! - [`RayonComm`](algs::communicator::RayonComm): ranks as threads of one
//!   process, sharing a mailbox.
//! - `MpiComm` (feature `mpi-support`): MPI via `rsmpi`.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-particles = "0.3"
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```
//! use mesh_particles::prelude::*;
//!
//! let mut boxed = BoxMesh::rectangle([0.0, 0.0], [2.0, 1.0], [8, 4]).unwrap();
//! boxed.refine_global(1);
//! let mesh = boxed.serial().unwrap();
//! let disc = |x: [f64; 3]| ((x[0] - 1.0).powi(2) + (x[1] - 0.5).powi(2) < 0.09) as u8 as f64;
//! let samples = CellSamples::from_fn(&mesh, disc).unwrap();
//! let report = identify_particles(&mesh, &samples, &ParticleConfig::default(), &NoComm).unwrap();
//! assert_eq!(report.n_particles, 1);
//! ```

pub mod algs;
pub mod config;
pub mod debug_invariants;
pub mod particle_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use particle_error::{ErrorClass, ParticleError};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::aggregate::{OutputPolicy, ParticleProperties, ParticleTable};
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::field::{CellSamples, Threshold, ThresholdMode};
    pub use crate::algs::meshgen::BoxMesh;
    pub use crate::algs::pipeline::{ParticleReport, identify_particles};
    pub use crate::algs::stitching::{ParticleId, StitchConfig};
    pub use crate::config::ParticleConfig;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::particle_error::{ErrorClass, ParticleError};
    pub use crate::topology::{CellId, CellMesh, CellRecord, InMemoryCellMesh};
}
