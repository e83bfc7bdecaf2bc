//! ParticleError: unified error type for mesh-particles public APIs
//!
//! Every anomaly the pipeline can hit is fatal for the current invocation.
//! Callers discard the partial result and rerun on a fresh field snapshot.

use thiserror::Error;

use crate::topology::point::CellId;

/// Broad classification of a [`ParticleError`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Malformed mesh, refinement, or input data supplied by the caller.
    Precondition,
    /// Dropped, truncated, or never-settling message traffic.
    Communication,
    /// Internal numerical consistency breach.
    Numerical,
    /// Invalid configuration.
    Configuration,
}

/// Unified error type for mesh-particles operations.
#[derive(Debug, Error)]
pub enum ParticleError {
    /// Attempted to construct a CellId with a zero value.
    #[error("CellId must be non-zero (0 is reserved as invalid)")]
    InvalidCellId,
    /// A cell referenced by the mesh graph is not known locally.
    #[error("cell {0} is referenced but not present in the local mesh")]
    MissingCell(CellId),
    /// A leaf cell carries no owning rank.
    #[error("leaf cell {0} has no owner")]
    MissingOwner(CellId),
    /// An owned leaf cell has no scalar sample.
    #[error("owned cell {0} has no scalar sample")]
    MissingSample(CellId),
    /// Parent/child links are inconsistent.
    #[error("malformed refinement at cell {cell}: {detail}")]
    MalformedRefinement { cell: CellId, detail: String },
    /// Cell geometry is unusable (negative measure, non-finite center, ...).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A neighbour sent a component id for a cell it does not own or that is
    /// not a ghost here.
    #[error("rank {neighbor} sent a label for cell {cell}, which is not its ghost here")]
    AsymmetricHalo { neighbor: usize, cell: CellId },
    /// A boundary edge names a rank outside the neighbour set.
    #[error("boundary edge references rank {rank}, which is not a halo neighbour")]
    UnknownNeighbor { rank: usize },
    /// A component id falls outside the owning rank's id range.
    #[error("component id {id} is not owned by rank {rank}")]
    UnknownComponent { rank: usize, id: u64 },
    /// A cell's component id does not resolve to a particle.
    #[error("component {0} has no canonical particle id")]
    UnmappedComponent(u64),
    /// Communication error with a neighbour rank.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received buffer has the wrong size.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// The stitching fixed point was not reached within the round cap.
    #[error("distributed stitching did not converge within {rounds} rounds")]
    StitchingDidNotConverge { rounds: usize },
    /// A canonical particle accumulated zero measure.
    #[error("particle {0} accumulated zero measure")]
    ZeroMeasureParticle(u32),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// MPI could not be initialized.
    #[error("MPI initialization failed")]
    MpiInit,
}

impl ParticleError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        use ParticleError::*;
        match self {
            InvalidCellId
            | MissingCell(_)
            | MissingOwner(_)
            | MissingSample(_)
            | MalformedRefinement { .. }
            | InvalidGeometry(_)
            | AsymmetricHalo { .. }
            | UnknownNeighbor { .. }
            | UnknownComponent { .. } => ErrorClass::Precondition,
            CommError { .. }
            | BufferSizeMismatch { .. }
            | StitchingDidNotConverge { .. }
            | MpiInit => ErrorClass::Communication,
            UnmappedComponent(_) | ZeroMeasureParticle(_) => ErrorClass::Numerical,
            InvalidConfig(_) | ConfigParse(_) | Io(_) => ErrorClass::Configuration,
        }
    }

    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        ParticleError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
