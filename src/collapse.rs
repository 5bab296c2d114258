//! Edge collapse selection, ordering and application.

use crate::quadric::Quadric;
use crate::topology::{VertexKind, CAN_COLLAPSE, HAS_OPPOSITE};
use crate::Vector3;
use crate::INVALID_INDEX;

/// Third field of a [`Collapse`], reused across pipeline stages: candidate
/// enumeration writes `bidi`, ranking overwrites it with `error`, and sorting
/// reads the raw bits through `errorui`.
pub(crate) union CollapseUnion {
    pub bidi: u32,
    pub error: f32,
    pub errorui: u32,
}

impl Clone for CollapseUnion {
    fn clone(&self) -> Self {
        Self {
            bidi: unsafe { self.bidi },
        }
    }
}

impl Default for CollapseUnion {
    fn default() -> Self {
        Self { bidi: 0 }
    }
}

/// Directed collapse candidate `v0 -> v1`.
#[derive(Clone, Default)]
pub(crate) struct Collapse {
    pub v0: u32,
    pub v1: u32,
    pub u: CollapseUnion,
}

/// Enumerates candidate collapses from the current index buffer.
///
/// Returns the number of candidates written to `collapses`, which must hold
/// one record per index.
pub(crate) fn pick_edge_collapses(
    collapses: &mut [Collapse],
    indices: &[u32],
    remap: &[u32],
    vertex_kind: &[VertexKind],
    loop_: &[u32],
) -> usize {
    let mut collapse_count = 0;

    for i in indices.chunks_exact(3) {
        const NEXT: [usize; 3] = [1, 2, 0];

        for e in 0..3 {
            let i0 = i[e] as usize;
            let i1 = i[NEXT[e]] as usize;

            // this can happen either when input has a zero-length edge, or when we perform collapses for complex
            // topology w/seams and collapse a manifold vertex that connects to both wedges onto one of them
            // we leave edges like this alone since they may be important for preserving mesh integrity
            if remap[i0] == remap[i1] {
                continue;
            }

            let k0 = vertex_kind[i0];
            let k1 = vertex_kind[i1];

            // the edge has to be collapsible in at least one direction
            if !(CAN_COLLAPSE[k0.index()][k1.index()] || CAN_COLLAPSE[k1.index()][k0.index()]) {
                continue;
            }

            // manifold and seam edges should occur twice (i0->i1 and i1->i0) - skip redundant edges
            if HAS_OPPOSITE[k0.index()][k1.index()] && remap[i1] > remap[i0] {
                continue;
            }

            // two vertices are on a border or a seam, but there's no direct edge between them
            // this indicates that they belong to two different edge loops and we should not collapse this edge
            // loop[] tracks half edges so we only need to check i0->i1
            if k0 == k1 && (k0 == VertexKind::Border || k0 == VertexKind::Seam) && loop_[i0] != i1 as u32 {
                continue;
            }

            // edge can be collapsed in either direction - we will pick the one with minimum error
            // note: we evaluate error later during collapse ranking, here we just tag the edge as bidirectional
            if CAN_COLLAPSE[k0.index()][k1.index()] & CAN_COLLAPSE[k1.index()][k0.index()] {
                collapses[collapse_count] = Collapse {
                    v0: i0 as u32,
                    v1: i1 as u32,
                    u: CollapseUnion { bidi: 1 },
                };
                collapse_count += 1;
            } else {
                // edge can only be collapsed in one direction
                let e0 = if CAN_COLLAPSE[k0.index()][k1.index()] { i0 } else { i1 };
                let e1 = if CAN_COLLAPSE[k0.index()][k1.index()] { i1 } else { i0 };

                collapses[collapse_count] = Collapse {
                    v0: e0 as u32,
                    v1: e1 as u32,
                    u: CollapseUnion { bidi: 0 },
                };
                collapse_count += 1;
            }
        }
    }

    collapse_count
}

/// Scores each candidate with the quadric error at the surviving endpoint,
/// resolving bidirectional candidates to the cheaper direction.
pub(crate) fn rank_edge_collapses(
    collapses: &mut [Collapse],
    vertex_positions: &[Vector3],
    vertex_quadrics: &[Quadric],
    remap: &[u32],
) {
    for c in collapses {
        let i0 = c.v0;
        let i1 = c.v1;

        // most edges are bidirectional which means we need to evaluate errors for two collapses
        // to keep this code branchless we just use the same edge for unidirectional edges
        let bidi = unsafe { c.u.bidi } != 0;
        let j0 = if bidi { i1 } else { i0 };
        let j1 = if bidi { i0 } else { i1 };

        let qi = &vertex_quadrics[remap[i0 as usize] as usize];
        let qj = &vertex_quadrics[remap[j0 as usize] as usize];

        let ei = qi.error(&vertex_positions[i1 as usize]);
        let ej = qj.error(&vertex_positions[j1 as usize]);

        // pick edge direction with minimal error
        c.v0 = if ei <= ej { i0 } else { j0 };
        c.v1 = if ei <= ej { i1 } else { j1 };
        c.u.error = ei.min(ej);
    }
}

/// Computes the ascending-error permutation of `collapses` into `sort_order`.
///
/// Single-pass counting sort on the top 11 bits of the error bit pattern;
/// errors are non-negative so shifting out the sign bit keeps the order, and
/// the truncated key is enough discrimination for a greedy pick while the
/// histogram stays cache-resident. Ties keep enumeration order.
pub(crate) fn sort_edge_collapses(sort_order: &mut [u32], collapses: &[Collapse]) {
    const SORT_BITS: usize = 11;

    // fill histogram for counting sort
    let mut histogram = [0u32; 1 << SORT_BITS];

    for c in collapses {
        // skip sign bit since error is non-negative
        let key = unsafe { (c.u.errorui << 1) >> (32 - SORT_BITS) };

        histogram[key as usize] += 1;
    }

    // compute offsets based on histogram data
    let mut histogram_sum = 0;

    for h in histogram.iter_mut() {
        let count = *h;
        *h = histogram_sum;
        histogram_sum += count;
    }

    assert_eq!(histogram_sum as usize, collapses.len());

    // compute sort order based on offsets
    for (i, c) in collapses.iter().enumerate() {
        // skip sign bit since error is non-negative
        let key = unsafe { ((c.u.errorui << 1) >> (32 - SORT_BITS)) as usize };

        sort_order[histogram[key] as usize] = i as u32;
        histogram[key] += 1;
    }
}

/// Applies collapses in ascending error order until the triangle budget or the
/// error limit is hit.
///
/// At most one collapse may touch a position-canonical vertex per pass; the
/// locking keeps the greedy schedule valid without re-ranking mid-pass.
#[allow(clippy::too_many_arguments)]
pub(crate) fn perform_edge_collapses(
    collapse_remap: &mut [u32],
    collapse_locked: &mut [bool],
    vertex_quadrics: &mut [Quadric],
    collapses: &[Collapse],
    collapse_order: &[u32],
    remap: &[u32],
    wedge: &[u32],
    vertex_kind: &[VertexKind],
    triangle_collapse_goal: usize,
    error_limit: f32,
) -> usize {
    let mut edge_collapses = 0;
    let mut triangle_collapses = 0;

    for order in collapse_order {
        let c = &collapses[*order as usize];

        let error = unsafe { c.u.error };

        if error > error_limit {
            break;
        }

        if triangle_collapses >= triangle_collapse_goal {
            break;
        }

        let i0 = c.v0 as usize;
        let i1 = c.v1 as usize;

        let r0 = remap[i0] as usize;
        let r1 = remap[i1] as usize;

        // we don't collapse vertices that had source or target vertex involved in a collapse
        // it's important to not move the vertices twice since it complicates the tracking/remapping logic
        // it's important to not move other vertices towards a moved vertex to preserve error since we don't re-rank collapses mid-pass
        if collapse_locked[r0] || collapse_locked[r1] {
            continue;
        }

        assert_eq!(collapse_remap[r0] as usize, r0);
        assert_eq!(collapse_remap[r1] as usize, r1);

        // the survivor absorbs the error history of the removed vertex
        let q = vertex_quadrics[r0];
        vertex_quadrics[r1] += q;

        if vertex_kind[i0] == VertexKind::Seam {
            // remap v0 to v1 and seam pair of v0 to seam pair of v1
            let s0 = wedge[i0] as usize;
            let s1 = wedge[i1] as usize;

            assert!(s0 != i0 && s1 != i1);
            assert!(wedge[s0] as usize == i0 && wedge[s1] as usize == i1);

            collapse_remap[i0] = i1 as u32;
            collapse_remap[s0] = s1 as u32;
        } else {
            assert_eq!(wedge[i0] as usize, i0);

            collapse_remap[i0] = i1 as u32;
        }

        collapse_locked[r0] = true;
        collapse_locked[r1] = true;

        // border edges collapse 1 triangle, other edges collapse 2 or more
        triangle_collapses += if vertex_kind[i0] == VertexKind::Border { 1 } else { 2 };
        edge_collapses += 1;
    }

    edge_collapses
}

/// Substitutes the collapse remap on every corner and compacts, dropping
/// triangles that degenerated.
pub(crate) fn remap_index_buffer(indices: &mut [u32], collapse_remap: &[u32]) -> usize {
    let mut write = 0;

    for i in (0..indices.len()).step_by(3) {
        let v0 = collapse_remap[indices[i] as usize];
        let v1 = collapse_remap[indices[i + 1] as usize];
        let v2 = collapse_remap[indices[i + 2] as usize];

        // we never move the vertex twice during a single pass
        assert_eq!(collapse_remap[v0 as usize], v0);
        assert_eq!(collapse_remap[v1 as usize], v1);
        assert_eq!(collapse_remap[v2 as usize], v2);

        if v0 != v1 && v0 != v2 && v1 != v2 {
            indices[write] = v0;
            indices[write + 1] = v1;
            indices[write + 2] = v2;
            write += 3;
        }
    }

    write
}

/// Routes live loop pointers through the collapse remap.
pub(crate) fn remap_edge_loops(loop_: &mut [u32], collapse_remap: &[u32]) {
    for i in 0..loop_.len() {
        if loop_[i] != INVALID_INDEX {
            let l = loop_[i];
            let r = collapse_remap[l as usize];

            // i == r is a special case when the seam edge is collapsed in a direction opposite to where loop goes
            loop_[i] = if i == r as usize { loop_[l as usize] } else { r };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn collapse_with_error(v0: u32, v1: u32, error: f32) -> Collapse {
        Collapse {
            v0,
            v1,
            u: CollapseUnion { error },
        }
    }

    #[test]
    fn test_sort_is_ascending_and_stable() {
        let collapses = [
            collapse_with_error(0, 1, 0.5),
            collapse_with_error(1, 2, 0.0),
            collapse_with_error(2, 3, 4.0),
            collapse_with_error(3, 4, 0.5),
            collapse_with_error(4, 5, 0.25),
        ];

        let mut order = vec![0u32; collapses.len()];
        sort_edge_collapses(&mut order, &collapses);

        assert_eq!(order, [1, 4, 0, 3, 2]);
    }

    #[test]
    fn test_sort_distinguishes_magnitudes() {
        // errors chosen so the 11-bit key (sign bit dropped) differs for each
        let errors = [1e-3f32, 1e3, 1.0, 1e-6, 0.0];
        let collapses: Vec<Collapse> = errors
            .iter()
            .enumerate()
            .map(|(i, e)| collapse_with_error(i as u32, i as u32 + 1, *e))
            .collect();

        let mut order = vec![0u32; collapses.len()];
        sort_edge_collapses(&mut order, &collapses);

        let sorted: Vec<f32> = order.iter().map(|o| errors[*o as usize]).collect();
        assert_eq!(sorted, [0.0, 1e-6, 1e-3, 1.0, 1e3]);
    }

    #[test]
    fn test_remap_drops_degenerates() {
        let mut indices = [0u32, 1, 2, 1, 2, 3, 2, 3, 4];
        // collapse 4 -> 3, which degenerates the last triangle only
        let collapse_remap = [0u32, 1, 2, 3, 3];

        let count = remap_index_buffer(&mut indices, &collapse_remap);

        assert_eq!(count, 6);
        assert_eq!(&indices[..6], &[0, 1, 2, 1, 2, 3][..6]);
    }

    #[test]
    fn test_remap_edge_loops_follows_collapse() {
        let mut loop_ = [1u32, 2, INVALID_INDEX, INVALID_INDEX];
        let collapse_remap = [0u32, 0, 2, 3];

        remap_edge_loops(&mut loop_, &collapse_remap);

        // 0's loop target 1 moved onto 0 itself, so the loop skips ahead to 1's old target
        assert_eq!(loop_[0], 2);
        // 1's target was not moved
        assert_eq!(loop_[1], 2);
        assert_eq!(loop_[2], INVALID_INDEX);
    }
}
