//! Top-level module for the local cell graph.
//!
//! This module provides the types the particle pipeline reads the mesh through:
//! - [`CellId`](point::CellId), the globally unique cell handle
//! - [`CellMesh`](mesh::CellMesh), the trait an external mesh layer implements,
//!   and the in-memory [`InMemoryCellMesh`](mesh::InMemoryCellMesh)
//! - leaf resolution over refinement trees in [`leaves`]

pub mod leaves;
pub mod mesh;
pub mod point;

pub use mesh::{CellMesh, CellRecord, InMemoryCellMesh};
pub use point::CellId;
