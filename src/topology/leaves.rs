//! Leaf resolution over the refinement tree.
//!
//! Both routines walk with explicit worklists, so auxiliary memory is bounded
//! by the tree width and call depth stays constant regardless of refinement
//! depth.

use crate::particle_error::ParticleError;
use crate::topology::mesh::CellMesh;
use crate::topology::point::CellId;

/// Collect the leaf descendants of `cell` into `out` (the cell itself when it
/// is a leaf). `out` is cleared first.
///
/// # Errors
/// [`ParticleError::MalformedRefinement`] when a child does not name the cell
/// it hangs under as its parent, or when the walk visits more cells than the
/// mesh holds (a cycle in the child links).
pub fn leaf_descendants<M>(mesh: &M, cell: CellId, out: &mut Vec<CellId>) -> Result<(), ParticleError>
where
    M: CellMesh + ?Sized,
{
    out.clear();
    let budget = mesh.num_cells();
    let mut visited = 0usize;
    let mut stack = vec![cell];
    while let Some(c) = stack.pop() {
        visited += 1;
        if visited > budget {
            return Err(ParticleError::MalformedRefinement {
                cell,
                detail: "child links form a cycle".into(),
            });
        }
        let rec = mesh.record(c)?;
        if rec.is_leaf() {
            out.push(c);
            continue;
        }
        for &child in rec.children.iter().rev() {
            let crec = mesh.record(child)?;
            if crec.parent != Some(c) {
                return Err(ParticleError::MalformedRefinement {
                    cell: child,
                    detail: format!("listed under {c} but its parent is {:?}", crec.parent),
                });
            }
            stack.push(child);
        }
    }
    Ok(())
}

/// Collect the leaves sharing a face with the leaf `cell` into `out`, sorted
/// and de-duplicated. `out` is cleared first.
///
/// A leaf neighbour is taken as-is. A refined neighbour is expanded to those
/// of its leaf descendants that list `cell` as a face neighbour, i.e. the
/// children on the shared (sub)face.
pub fn adjacent_leaves<M>(mesh: &M, cell: CellId, out: &mut Vec<CellId>) -> Result<(), ParticleError>
where
    M: CellMesh + ?Sized,
{
    out.clear();
    let rec = mesh.record(cell)?;
    if !rec.is_leaf() {
        return Err(ParticleError::MalformedRefinement {
            cell,
            detail: "adjacency requested for a refined cell".into(),
        });
    }
    let mut sub = Vec::new();
    for &n in &rec.face_neighbors {
        if n == cell {
            continue;
        }
        if mesh.record(n)?.is_leaf() {
            out.push(n);
            continue;
        }
        leaf_descendants(mesh, n, &mut sub)?;
        for &leaf in &sub {
            if mesh.record(leaf)?.face_neighbors.contains(&cell) {
                out.push(leaf);
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::mesh::{CellRecord, InMemoryCellMesh};

    fn cid(u: u64) -> CellId {
        CellId::new(u).unwrap()
    }

    /// Coarse cell 1 next to cell 2, which is refined into 3 and 4 (1D).
    /// Only child 3 touches cell 1.
    fn hanging() -> InMemoryCellMesh {
        let mut m = InMemoryCellMesh::new(1, 0);
        m.insert(cid(1), CellRecord::leaf(0, 1.0, [0.5, 0.0, 0.0]));
        m.insert(cid(2), CellRecord::leaf(0, 1.0, [1.5, 0.0, 0.0]));
        m.insert(cid(3), CellRecord::leaf(0, 0.5, [1.25, 0.0, 0.0]));
        m.insert(cid(4), CellRecord::leaf(0, 0.5, [1.75, 0.0, 0.0]));
        m.link_child(cid(2), cid(3)).unwrap();
        m.link_child(cid(2), cid(4)).unwrap();
        m.get_mut(cid(1)).unwrap().face_neighbors.push(cid(2));
        m.link_faces(cid(3), cid(4)).unwrap();
        m.get_mut(cid(3)).unwrap().face_neighbors.push(cid(1));
        m
    }

    #[test]
    fn descendants_of_leaf_is_itself() {
        let m = hanging();
        let mut out = Vec::new();
        leaf_descendants(&m, cid(1), &mut out).unwrap();
        assert_eq!(out, vec![cid(1)]);
        leaf_descendants(&m, cid(2), &mut out).unwrap();
        assert_eq!(out, vec![cid(3), cid(4)]);
    }

    #[test]
    fn refined_neighbor_expands_to_face_children() {
        let m = hanging();
        let mut out = Vec::new();
        adjacent_leaves(&m, cid(1), &mut out).unwrap();
        assert_eq!(out, vec![cid(3)]);
        adjacent_leaves(&m, cid(3), &mut out).unwrap();
        assert_eq!(out, vec![cid(1), cid(4)]);
    }

    #[test]
    fn wrong_parent_is_fatal() {
        let mut m = hanging();
        m.get_mut(cid(4)).unwrap().parent = Some(cid(1));
        let mut out = Vec::new();
        assert!(matches!(
            leaf_descendants(&m, cid(2), &mut out),
            Err(ParticleError::MalformedRefinement { cell, .. }) if cell == cid(4)
        ));
    }

    #[test]
    fn child_cycle_is_fatal() {
        let mut m = InMemoryCellMesh::new(1, 0);
        m.insert(cid(1), CellRecord::leaf(0, 1.0, [0.0; 3]));
        m.insert(cid(2), CellRecord::leaf(0, 1.0, [0.0; 3]));
        m.link_child(cid(1), cid(2)).unwrap();
        m.link_child(cid(2), cid(1)).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            leaf_descendants(&m, cid(1), &mut out),
            Err(ParticleError::MalformedRefinement { .. })
        ));
    }

    #[test]
    fn missing_neighbor_is_fatal() {
        let mut m = hanging();
        m.get_mut(cid(1)).unwrap().face_neighbors.push(cid(42));
        let mut out = Vec::new();
        assert!(matches!(
            adjacent_leaves(&m, cid(1), &mut out),
            Err(ParticleError::MissingCell(c)) if c == cid(42)
        ));
    }
}
