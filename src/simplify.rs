//! Exact simplification: iterative edge collapse driven by quadric error.

use crate::collapse::{
    perform_edge_collapses, pick_edge_collapses, rank_edge_collapses, remap_edge_loops, remap_index_buffer,
    sort_edge_collapses, Collapse,
};
use crate::quadric::{fill_edge_quadrics, fill_face_quadrics, Quadric};
use crate::stream::{rescale_positions, PositionStream};
use crate::topology::{build_edge_adjacency, build_position_remap, classify_vertices, EdgeAdjacency, VertexKind, KIND_COUNT};
use crate::{Vector3, INVALID_INDEX};

use tracing::{debug, trace};

/// Optional write-once outputs of [`simplify_debug`], filled at the end of the
/// run: the topological kind of every vertex and its boundary loop pointer
/// (`INVALID_INDEX` for vertices that are not on a border or seam).
#[derive(Default)]
pub struct SimplifyDebug<'a> {
    pub kind: Option<&'a mut [VertexKind]>,
    pub loops: Option<&'a mut [u32]>,
}

/// Reduces the number of triangles in the mesh, attempting to preserve mesh
/// appearance as much as possible.
///
/// The algorithm tries to preserve mesh topology (boundaries and attribute
/// seams) and can stop short of the target goal based on topology constraints
/// or the target error. Surviving triangles keep referencing the original
/// vertex buffer; unused vertices are not compacted.
///
/// Returns the number of indices written to `destination` (always a multiple
/// of 3).
///
/// # Arguments
///
/// * `destination`: must have room for the **source** index buffer, since the
///   collapse passes run inside it (`indices.len()` elements, not
///   `target_index_count`)
/// * `target_error`: maximum error allowed for a collapse, in the quadric
///   metric over unit-cube-normalized positions; pass `f32::MAX` to only
///   limit by triangle count
pub fn simplify(
    destination: &mut [u32],
    indices: &[u32],
    positions: &PositionStream,
    target_index_count: usize,
    target_error: f32,
) -> usize {
    simplify_debug(
        destination,
        indices,
        positions,
        target_index_count,
        target_error,
        SimplifyDebug::default(),
    )
}

/// [`simplify`] variant that runs the collapse passes directly inside the
/// caller's index buffer, for callers that have no use for the original
/// indices afterwards.
pub fn simplify_in_place(
    indices: &mut [u32],
    positions: &PositionStream,
    target_index_count: usize,
    target_error: f32,
) -> usize {
    simplify_inner(indices, positions, target_index_count, target_error, SimplifyDebug::default())
}

/// [`simplify`] variant that additionally fills the supplied [`SimplifyDebug`]
/// sinks with per-vertex classification data.
pub fn simplify_debug(
    destination: &mut [u32],
    indices: &[u32],
    positions: &PositionStream,
    target_index_count: usize,
    target_error: f32,
    debug: SimplifyDebug<'_>,
) -> usize {
    assert!(destination.len() >= indices.len());

    let result = &mut destination[..indices.len()];
    result.copy_from_slice(indices);

    simplify_inner(result, positions, target_index_count, target_error, debug)
}

fn simplify_inner(
    result: &mut [u32],
    positions: &PositionStream,
    target_index_count: usize,
    target_error: f32,
    debug: SimplifyDebug<'_>,
) -> usize {
    assert_eq!(result.len() % 3, 0);
    assert!(target_index_count <= result.len());

    let vertex_count = positions.len();

    // build adjacency information
    let mut adjacency = EdgeAdjacency::default();
    build_edge_adjacency(&mut adjacency, result, vertex_count);

    // build position remap that maps each vertex to the one with identical position
    let mut remap = vec![0u32; vertex_count];
    let mut wedge = vec![0u32; vertex_count];
    build_position_remap(&mut remap, &mut wedge, positions);

    // classify vertices; vertex kind determines collapse rules, see `CAN_COLLAPSE`
    let mut vertex_kind = vec![VertexKind::Manifold; vertex_count];
    let mut loop_ = vec![INVALID_INDEX; vertex_count];
    classify_vertices(&mut vertex_kind, &mut loop_, vertex_count, &adjacency, &remap, &wedge);

    if tracing::enabled!(tracing::Level::DEBUG) {
        let mut unique_positions = 0;
        let mut kinds = [0usize; KIND_COUNT];

        for i in 0..vertex_count {
            if remap[i] == i as u32 {
                unique_positions += 1;
                kinds[vertex_kind[i].index()] += 1;
            }
        }

        debug!(
            vertices = vertex_count,
            positions = unique_positions,
            manifold = kinds[0],
            border = kinds[1],
            seam = kinds[2],
            locked = kinds[3],
            "classified vertices"
        );
    }

    let mut vertex_positions = vec![Vector3::default(); vertex_count];
    rescale_positions(&mut vertex_positions, positions);

    let mut vertex_quadrics = vec![Quadric::default(); vertex_count];
    fill_face_quadrics(&mut vertex_quadrics, result, &vertex_positions, &remap);
    fill_edge_quadrics(&mut vertex_quadrics, result, &vertex_positions, &remap, &vertex_kind, &loop_);

    let mut edge_collapses = vec![Collapse::default(); result.len()];
    let mut collapse_order = vec![0u32; result.len()];
    let mut collapse_remap = vec![0u32; vertex_count];
    let mut collapse_locked = vec![false; vertex_count];

    let mut result_count = result.len();
    let mut pass_count = 0usize;

    while result_count > target_index_count {
        let edge_collapse_count = pick_edge_collapses(
            &mut edge_collapses,
            &result[..result_count],
            &remap,
            &vertex_kind,
            &loop_,
        );

        // no edges can be collapsed any more due to topology restrictions
        if edge_collapse_count == 0 {
            break;
        }

        rank_edge_collapses(
            &mut edge_collapses[..edge_collapse_count],
            &vertex_positions,
            &vertex_quadrics,
            &remap,
        );

        sort_edge_collapses(&mut collapse_order[..edge_collapse_count], &edge_collapses[..edge_collapse_count]);

        // most collapses remove 2 triangles; use this to establish a bound on the pass in terms of error limit
        // note that edge_collapse_goal is an estimate; triangle_collapse_goal will be used to actually limit collapses
        let triangle_collapse_goal = (result_count - target_index_count) / 3;
        let edge_collapse_goal = triangle_collapse_goal / 2;

        // we limit the error in each pass based on the error of the optimal last collapse; since many collapses will be locked
        // as they will share vertices with other successful collapses, we need to increase the acceptable error by this factor
        const PASS_ERROR_BOUND: f32 = 1.5;

        let error_goal = if edge_collapse_goal < edge_collapse_count {
            let c = &edge_collapses[collapse_order[edge_collapse_goal] as usize];
            (unsafe { c.u.error }) * PASS_ERROR_BOUND
        } else {
            f32::MAX
        };

        let error_limit = error_goal.min(target_error);

        for (i, r) in collapse_remap.iter_mut().enumerate() {
            *r = i as u32;
        }

        collapse_locked.fill(false);

        let collapses = perform_edge_collapses(
            &mut collapse_remap,
            &mut collapse_locked,
            &mut vertex_quadrics,
            &edge_collapses[..edge_collapse_count],
            &collapse_order[..edge_collapse_count],
            &remap,
            &wedge,
            &vertex_kind,
            triangle_collapse_goal,
            error_limit,
        );

        // no edges can be collapsed any more due to hitting the error limit or triangle collapse limit
        if collapses == 0 {
            break;
        }

        remap_edge_loops(&mut loop_, &collapse_remap);

        let new_count = remap_index_buffer(&mut result[..result_count], &collapse_remap);
        assert!(new_count < result_count);

        pass_count += 1;

        trace!(
            pass = pass_count,
            triangles_in = result_count / 3,
            triangles_out = new_count / 3,
            collapses,
            candidates = edge_collapse_count,
            error_limit,
            "collapse pass"
        );

        result_count = new_count;
    }

    debug!(
        passes = pass_count,
        triangles = result_count / 3,
        target = target_index_count / 3,
        "simplification done"
    );

    if let Some(kind) = debug.kind {
        kind[..vertex_count].copy_from_slice(&vertex_kind);
    }

    if let Some(loops) = debug.loops {
        loops[..vertex_count].copy_from_slice(&loop_);
    }

    result_count
}

#[cfg(test)]
mod test {
    use super::*;

    // 4x4 vertex grid in the xy plane, 18 triangles
    fn grid_mesh() -> (Vec<[f32; 3]>, Vec<u32>) {
        let mut points = Vec::new();
        let mut indices = Vec::new();

        for y in 0..4 {
            for x in 0..4 {
                points.push([x as f32, y as f32, 0.0]);
            }
        }

        for y in 0..3u32 {
            for x in 0..3u32 {
                let i = y * 4 + x;

                indices.extend_from_slice(&[i, i + 1, i + 5]);
                indices.extend_from_slice(&[i, i + 5, i + 4]);
            }
        }

        (points, indices)
    }

    fn tetrahedron() -> (Vec<[f32; 3]>, Vec<u32>) {
        let points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let indices = vec![0, 1, 2, 0, 2, 3, 0, 3, 1, 2, 1, 3];

        (points, indices)
    }

    fn check_output(result: &[u32], vertex_count: usize) {
        assert_eq!(result.len() % 3, 0);

        for abc in result.chunks_exact(3) {
            assert!(abc.iter().all(|i| (*i as usize) < vertex_count));
            assert!(abc[0] != abc[1] && abc[0] != abc[2] && abc[1] != abc[2]);
        }
    }

    #[test]
    fn test_empty() {
        let mut dst = [0u32; 0];

        assert_eq!(simplify(&mut dst, &[], &PositionStream::from_points(&[]), 0, 1e-2), 0);
    }

    #[test]
    fn test_single_triangle() {
        let points = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let indices = [0u32, 1, 2];
        let mut dst = [0u32; 3];

        let count = simplify(&mut dst, &indices, &PositionStream::from_points(&points), 0, f32::MAX);

        // a lone triangle has three border corners on one loop and collapses to nothing
        assert!(count == 0 || count == 3);
        check_output(&dst[..count], points.len());
    }

    #[test]
    fn test_tetrahedron_to_nothing() {
        let (points, indices) = tetrahedron();
        let mut dst = vec![0u32; indices.len()];

        let count = simplify(&mut dst, &indices, &PositionStream::from_points(&points), 0, f32::MAX);

        assert_eq!(count, 0);
    }

    #[test]
    fn test_cube_blocked_by_error_limit() {
        // closed cube: every vertex is manifold and every collapse has positive
        // error, so a zero error budget keeps the mesh intact
        let points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 1.0],
        ];
        let indices: Vec<u32> = vec![
            0, 2, 1, 1, 2, 3, // z = 0
            4, 5, 6, 5, 7, 6, // z = 1
            0, 1, 4, 1, 5, 4, // y = 0
            2, 6, 3, 3, 6, 7, // y = 1
            0, 4, 2, 2, 4, 6, // x = 0
            1, 3, 5, 3, 7, 5, // x = 1
        ];

        let mut dst = vec![0u32; indices.len()];
        let count = simplify(&mut dst, &indices, &PositionStream::from_points(&points), 0, 0.0);

        assert_eq!(count, indices.len());
        assert_eq!(&dst[..count], &indices[..]);
    }

    #[test]
    fn test_grid_to_target() {
        let (points, indices) = grid_mesh();
        let mut dst = vec![0u32; indices.len()];

        let count = simplify(&mut dst, &indices, &PositionStream::from_points(&points), 6, f32::MAX);

        // interior and straight-edge collapses are all free on a flat grid
        assert_eq!(count, 6);
        check_output(&dst[..count], points.len());
    }

    #[test]
    fn test_coplanar_pair_to_one() {
        let points = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        let indices = [0u32, 1, 3, 0, 3, 2];
        let mut dst = [0u32; 6];

        let count = simplify(&mut dst, &indices, &PositionStream::from_points(&points), 3, f32::MAX);

        assert_eq!(count, 3);
        check_output(&dst[..count], points.len());
    }

    #[test]
    fn test_quad_blocked_by_border_error() {
        // a small error budget forbids moving the corners
        let points = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        let indices = [0u32, 1, 3, 0, 3, 2];
        let mut dst = [0u32; 6];

        let count = simplify(&mut dst, &indices, &PositionStream::from_points(&points), 3, 1e-3);

        assert_eq!(count, 6);
    }

    #[test]
    fn test_target_equal_to_input_is_identity() {
        let (points, indices) = grid_mesh();
        let mut dst = vec![0u32; indices.len()];

        let count = simplify(
            &mut dst,
            &indices,
            &PositionStream::from_points(&points),
            indices.len(),
            f32::MAX,
        );

        assert_eq!(count, indices.len());
        assert_eq!(dst, indices);
    }

    #[test]
    fn test_deterministic() {
        let (points, indices) = grid_mesh();
        let stream = PositionStream::from_points(&points);

        let mut dst1 = vec![0u32; indices.len()];
        let mut dst2 = vec![0u32; indices.len()];

        let count1 = simplify(&mut dst1, &indices, &stream, 6, f32::MAX);
        let count2 = simplify(&mut dst2, &indices, &stream, 6, f32::MAX);

        assert_eq!(count1, count2);
        assert_eq!(dst1[..count1], dst2[..count2]);
    }

    #[test]
    fn test_idempotent() {
        let (points, indices) = grid_mesh();
        let stream = PositionStream::from_points(&points);

        let mut once = vec![0u32; indices.len()];
        let count_once = simplify(&mut once, &indices, &stream, 6, f32::MAX);

        let mut twice = vec![0u32; count_once];
        let count_twice = simplify(&mut twice, &once[..count_once], &stream, 6, f32::MAX);

        assert_eq!(count_once, count_twice);
        assert_eq!(once[..count_once], twice[..count_twice]);
    }

    #[test]
    fn test_in_place_matches_copy() {
        let (points, indices) = grid_mesh();
        let stream = PositionStream::from_points(&points);

        let mut dst = vec![0u32; indices.len()];
        let count = simplify(&mut dst, &indices, &stream, 6, f32::MAX);

        let mut aliased = indices.clone();
        let count_aliased = simplify_in_place(&mut aliased, &stream, 6, f32::MAX);

        assert_eq!(count, count_aliased);
        assert_eq!(dst[..count], aliased[..count_aliased]);
    }

    #[test]
    fn test_debug_sinks() {
        let (points, indices) = grid_mesh();
        let stream = PositionStream::from_points(&points);

        let mut dst = vec![0u32; indices.len()];
        let mut kind = vec![VertexKind::Manifold; points.len()];
        let mut loops = vec![0u32; points.len()];

        simplify_debug(
            &mut dst,
            &indices,
            &stream,
            indices.len(),
            f32::MAX,
            SimplifyDebug {
                kind: Some(&mut kind),
                loops: Some(&mut loops),
            },
        );

        // interior vertices are manifold, the outer ring is border
        assert_eq!(kind[5], VertexKind::Manifold);
        assert_eq!(kind[6], VertexKind::Manifold);
        assert_eq!(kind[0], VertexKind::Border);
        assert_eq!(kind[3], VertexKind::Border);
        assert_eq!(kind[12], VertexKind::Border);

        assert_ne!(loops[0], INVALID_INDEX);
        assert_eq!(loops[5], INVALID_INDEX);
    }

    #[test]
    fn test_seam_collapse_keeps_wedges_paired() {
        // two 1x4 quad strips joined along x == 1 with the joint column
        // duplicated; the three interior joint pairs classify as seams
        let mut points = Vec::new();
        let mut indices: Vec<u32> = Vec::new();

        // left strip vertices: (x, y) for x in 0..=1, y in 0..=4
        for y in 0..=4 {
            points.push([0.0, y as f32, 0.0]);
            points.push([1.0, y as f32, 0.0]);
        }

        // right strip vertices: (x, y) for x in 1..=2, y in 0..=4
        for y in 0..=4 {
            points.push([1.0, y as f32, 0.0]);
            points.push([2.0, y as f32, 0.0]);
        }

        for y in 0..4u32 {
            let i = y * 2;

            // left: 0/1 columns
            indices.extend_from_slice(&[i, i + 1, i + 3]);
            indices.extend_from_slice(&[i, i + 3, i + 2]);

            // right: 10 + same layout
            let j = 10 + y * 2;
            indices.extend_from_slice(&[j, j + 1, j + 3]);
            indices.extend_from_slice(&[j, j + 3, j + 2]);
        }

        let stream = PositionStream::from_points(&points);

        let mut kind = vec![VertexKind::Manifold; points.len()];
        let mut dst = vec![0u32; indices.len()];

        simplify_debug(
            &mut dst,
            &indices,
            &stream,
            indices.len(),
            f32::MAX,
            SimplifyDebug {
                kind: Some(&mut kind),
                loops: None,
            },
        );

        // joint interior pairs (1,y)/(10+..) for y in 1..=3 are seams
        assert_eq!(kind[3], VertexKind::Seam);
        assert_eq!(kind[5], VertexKind::Seam);
        assert_eq!(kind[7], VertexKind::Seam);
        assert_eq!(kind[12], VertexKind::Seam);
        assert_eq!(kind[14], VertexKind::Seam);
        assert_eq!(kind[16], VertexKind::Seam);

        // the strips are flat, so seam collapses along the joint are free and
        // the mesh keeps shrinking towards the target
        let count = simplify(&mut dst, &indices, &stream, 12, f32::MAX);

        assert!(count <= 12);
        check_output(&dst[..count], points.len());

        // seam pairs are remapped in lockstep, so no output triangle can end
        // up with two corners at the same position through different wedges
        for abc in dst[..count].chunks_exact(3) {
            let p: Vec<[f32; 3]> = abc.iter().map(|i| points[*i as usize]).collect();

            assert!(p[0] != p[1] && p[0] != p[2] && p[1] != p[2]);
        }
    }

    #[test]
    fn test_error_limit_honored() {
        // a pyramid over a square base; flattening the apex needs real error
        let points = vec![
            [0.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [2.0, 2.0, 0.0],
            [0.0, 2.0, 0.0],
            [1.0, 1.0, 1.0],
        ];
        let indices: Vec<u32> = vec![
            0, 1, 4, 1, 2, 4, 2, 3, 4, 3, 0, 4, // sides
            0, 2, 1, 0, 3, 2, // base
        ];

        let stream = PositionStream::from_points(&points);
        let mut dst = vec![0u32; indices.len()];

        // tiny error budget: nothing may move
        let count = simplify(&mut dst, &indices, &stream, 0, 1e-6);
        assert_eq!(count, indices.len());

        // unbounded error: the pyramid collapses away
        let count = simplify(&mut dst, &indices, &stream, 0, f32::MAX);
        assert!(count < indices.len());
    }
}
