//! Re-export public algorithms.

pub mod aggregate;
pub mod boundary;
pub mod communicator;
pub mod exchange;
pub mod field;
pub mod halo;
pub mod meshgen;
pub mod offsets;
pub mod pipeline;
pub mod segment;
pub mod stitching;
pub mod wire;

pub use aggregate::{OutputPolicy, ParticleProperties, ParticleTable, aggregate_properties};
pub use boundary::{BoundaryGraph, RemoteComponent, build_boundary_graph};
pub use field::{CellSamples, Threshold, ThresholdMode};
pub use offsets::{GlobalLabels, allocate_global_ids};
pub use pipeline::{ParticleReport, identify_particles};
pub use segment::{ComponentId, LocalLabels, segment_local};
pub use stitching::{ParticleId, StitchConfig, StitchMap, stitch_components};
