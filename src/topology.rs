//! Mesh connectivity: half-edge adjacency, position remap, vertex classification.

use crate::hash::{hash_buckets, hash_lookup, PositionHasher};
use crate::stream::PositionStream;
use crate::INVALID_INDEX;

/// Compressed-sparse-row table of outgoing half-edges per vertex.
///
/// Half-edge `v -> data[offsets[v] + k]` is a directed edge of some triangle;
/// edges are not deduplicated, so the data array has one entry per index.
#[derive(Default)]
pub(crate) struct EdgeAdjacency {
    pub counts: Vec<u32>,
    pub offsets: Vec<u32>,
    pub data: Vec<u32>,
}

pub(crate) fn build_edge_adjacency(adjacency: &mut EdgeAdjacency, indices: &[u32], vertex_count: usize) {
    let face_count = indices.len() / 3;

    // allocate arrays
    adjacency.counts = vec![0; vertex_count];
    adjacency.offsets = vec![0; vertex_count];
    adjacency.data = vec![0; indices.len()];

    // fill edge counts
    for index in indices {
        assert!((*index as usize) < vertex_count);

        adjacency.counts[*index as usize] += 1;
    }

    // fill offset table
    let mut offset = 0;

    for (o, count) in adjacency.offsets.iter_mut().zip(adjacency.counts.iter()) {
        *o = offset;
        offset += *count;
    }

    assert_eq!(offset as usize, indices.len());

    // fill edge data
    for i in 0..face_count {
        let a = indices[i * 3] as usize;
        let b = indices[i * 3 + 1] as usize;
        let c = indices[i * 3 + 2] as usize;

        adjacency.data[adjacency.offsets[a] as usize] = b as u32;
        adjacency.data[adjacency.offsets[b] as usize] = c as u32;
        adjacency.data[adjacency.offsets[c] as usize] = a as u32;

        adjacency.offsets[a] += 1;
        adjacency.offsets[b] += 1;
        adjacency.offsets[c] += 1;
    }

    // fix offsets that have been disturbed by the previous pass
    for (offset, count) in adjacency.offsets.iter_mut().zip(adjacency.counts.iter()) {
        assert!(*offset >= *count);

        *offset -= *count;
    }
}

pub(crate) fn has_edge(adjacency: &EdgeAdjacency, a: u32, b: u32) -> bool {
    let count = adjacency.counts[a as usize] as usize;
    let offset = adjacency.offsets[a as usize] as usize;

    adjacency.data[offset..offset + count].iter().any(|d| *d == b)
}

/// Counts outgoing half-edges of `vertex` whose reverse edge is absent,
/// returning the last such target as well.
fn count_open_edges(adjacency: &EdgeAdjacency, vertex: u32) -> (usize, u32) {
    let mut result = 0;
    let mut last = INVALID_INDEX;

    let count = adjacency.counts[vertex as usize] as usize;
    let offset = adjacency.offsets[vertex as usize] as usize;

    for target in &adjacency.data[offset..offset + count] {
        if !has_edge(adjacency, *target, vertex) {
            result += 1;
            last = *target;
        }
    }

    (result, last)
}

/// Walks the wedge ring of `a` looking for a wedge with an edge towards `b`.
fn find_wedge_edge(adjacency: &EdgeAdjacency, wedge: &[u32], a: u32, b: u32) -> u32 {
    let mut v = a;

    loop {
        if has_edge(adjacency, v, b) {
            return v;
        }

        v = wedge[v as usize];

        if v == a {
            return INVALID_INDEX;
        }
    }
}

/// Builds the position equivalence classes.
///
/// `remap[i]` is the lowest-indexed vertex with the same position bits as `i`
/// (so `remap[i] <= i`); `wedge[i]` is the next vertex of a cyclic list
/// through all vertices sharing `i`'s position, with `wedge[i] == i` for
/// position-unique vertices.
pub(crate) fn build_position_remap(remap: &mut [u32], wedge: &mut [u32], positions: &PositionStream) {
    let vertex_count = positions.len();

    let hasher = PositionHasher { positions };

    let table_size = hash_buckets(vertex_count);
    let mut table = vec![INVALID_INDEX; table_size];

    // build forward remap: for each vertex, which other (canonical) vertex does it map to?
    // we use position equivalence for this, and remap vertices to other existing vertices
    for index in 0..vertex_count as u32 {
        let entry = hash_lookup(&table, &hasher, &index, &INVALID_INDEX);

        if table[entry] == INVALID_INDEX {
            table[entry] = index;
        }

        remap[index as usize] = table[entry];
    }

    // build wedge table: for each vertex, which other vertex is the next wedge that also maps to the same vertex?
    // entries in table form a (cyclic) wedge loop per vertex; for manifold vertices, wedge[i] == remap[i] == i
    for (i, w) in wedge.iter_mut().enumerate() {
        *w = i as u32;
    }

    for i in 0..vertex_count {
        let r = remap[i] as usize;

        if r != i {
            wedge[i] = wedge[r];
            wedge[r] = i as u32;
        }
    }
}

/// Topological class of a vertex, deciding which collapses may touch it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexKind {
    /// Not on an attribute seam, not on any boundary.
    Manifold,
    /// Not on an attribute seam, on an open boundary.
    Border,
    /// On an attribute seam with exactly two wedges, both on matching open edges.
    Seam,
    /// None of the above; these vertices can't move.
    Locked,
}

pub(crate) const KIND_COUNT: usize = 4;

impl VertexKind {
    pub(crate) fn index(&self) -> usize {
        match *self {
            VertexKind::Manifold => 0,
            VertexKind::Border => 1,
            VertexKind::Seam => 2,
            VertexKind::Locked => 3,
        }
    }
}

// manifold vertices can collapse onto anything
// border/seam vertices can only be collapsed onto border/seam respectively
pub(crate) const CAN_COLLAPSE: [[bool; KIND_COUNT]; KIND_COUNT] = [
    [true, true, true, true],
    [false, true, false, false],
    [false, false, true, false],
    [false, false, false, false],
];

// if a vertex is manifold or seam, adjoining edges are guaranteed to have an opposite edge
// note that for seam edges, the opposite edge isn't present in the attribute-based topology
// but is present if you consider a position-only mesh variant
pub(crate) const HAS_OPPOSITE: [[bool; KIND_COUNT]; KIND_COUNT] = [
    [true, true, true, true],
    [true, false, true, false],
    [true, true, true, true],
    [true, false, true, false],
];

/// Classifies every vertex and records, for border/seam vertices, the single
/// outgoing open half-edge in `loop_`.
///
/// Only canonical vertices are classified; the rest inherit from their
/// canonical vertex.
pub(crate) fn classify_vertices(
    result: &mut [VertexKind],
    loop_: &mut [u32],
    vertex_count: usize,
    adjacency: &EdgeAdjacency,
    remap: &[u32],
    wedge: &[u32],
) {
    loop_.fill(INVALID_INDEX);

    for i in 0..vertex_count {
        if remap[i] == i as u32 {
            if wedge[i] == i as u32 {
                // no attribute seam, need to check if it's manifold
                let (edges, v) = count_open_edges(adjacency, i as u32);

                // note: we classify any vertices with no open edges as manifold
                // this is technically incorrect - if 4 triangles share an edge, we'll classify vertices as manifold
                // it's unclear if this is a problem in practice
                // also note that we classify vertices as border if they have *one* open edge, not two
                // this is because we only have half-edges - so a border vertex would have one incoming and one outgoing edge
                if edges == 0 {
                    result[i] = VertexKind::Manifold;
                } else if edges == 1 {
                    result[i] = VertexKind::Border;
                    loop_[i] = v;
                } else {
                    result[i] = VertexKind::Locked;
                }
            } else if wedge[wedge[i] as usize] == i as u32 {
                // attribute seam; need to distinguish between Seam and Locked
                let w = wedge[i];

                let (a_count, a) = count_open_edges(adjacency, i as u32);
                let (b_count, b) = count_open_edges(adjacency, w);

                // seam should have one open half-edge for each vertex, and the edges need to "connect" - point to the same vertex post-remap
                if a_count == 1 && b_count == 1 {
                    let ao = find_wedge_edge(adjacency, wedge, a, w);
                    let bo = find_wedge_edge(adjacency, wedge, b, i as u32);

                    if ao != INVALID_INDEX && bo != INVALID_INDEX {
                        result[i] = VertexKind::Seam;

                        loop_[i] = a;
                        loop_[w as usize] = b;
                    } else {
                        result[i] = VertexKind::Locked;
                    }
                } else {
                    result[i] = VertexKind::Locked;
                }
            } else {
                // more than one vertex maps to this one; we don't have classification available
                result[i] = VertexKind::Locked;
            }
        } else {
            assert!(remap[i] < i as u32);

            result[i] = result[remap[i] as usize];
        }
    }
}
