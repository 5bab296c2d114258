//! Sloppy simplification: vertex clustering on a uniform grid.
//!
//! Vertices are quantized into cubic cells, one representative per cell is
//! chosen by quadric error, and triangles are re-emitted against the
//! representatives. Topology is not preserved, but the triangle target is
//! reached much faster than with edge collapse.

use crate::hash::{hash_buckets, hash_lookup, CellHasher, GridCell, EMPTY_CELL};
use crate::quadric::{fill_face_quadrics, fill_point_quadrics, Quadric};
use crate::stream::{rescale_positions, PositionStream};
use crate::{Vector3, INVALID_INDEX};

use tracing::{debug, trace};

/// Quantizes unit-cube positions into packed 30-bit cell ids, 10 bits per
/// axis: `(x << 20) | (y << 10) | z` with each coordinate clamped to
/// `[0, 1023]`.
fn compute_cell_ids(vertex_ids: &mut [u32], vertex_positions: &[Vector3], cell_scale: f32) {
    for (pos, id) in vertex_positions.iter().zip(vertex_ids.iter_mut()) {
        let xi = ((pos.x * cell_scale + 0.5) as i32).min(1023);
        let yi = ((pos.y * cell_scale + 0.5) as i32).min(1023);
        let zi = ((pos.z * cell_scale + 0.5) as i32).min(1023);

        *id = ((xi << 20) | (yi << 10) | zi) as u32;
    }
}

/// Approximates the number of distinct cell ids under `mask` with a
/// single-bit occupancy table; collisions only ever undercount.
fn count_cells_approx(count_table: &mut [u8], vertex_ids: &[u32], mask: u32) -> usize {
    debug_assert!(count_table.len().is_power_of_two());

    count_table.fill(0);

    let hasher = CellHasher;
    let hashmod = count_table.len() - 1;

    let mut cell_count = 0;

    for id in vertex_ids {
        let hash = hasher.hash_id(*id & mask) as usize & hashmod;

        cell_count += (1 - count_table[hash]) as usize;
        count_table[hash] = 1;
    }

    cell_count
}

/// Assigns a dense cell index to every vertex based on its masked cell id;
/// returns the number of distinct cells.
fn fill_vertex_cells(table: &mut [GridCell], vertex_cells: &mut [u32], vertex_ids: &[u32], mask: u32) -> usize {
    table.fill(EMPTY_CELL);

    let hasher = CellHasher;
    let mut cell_count = 0u32;

    for (cell, id) in vertex_cells.iter_mut().zip(vertex_ids.iter()) {
        let key = GridCell {
            id: *id & mask,
            cell: 0,
        };

        let entry = hash_lookup(table, &hasher, &key, &EMPTY_CELL);

        if table[entry].id == INVALID_INDEX {
            table[entry] = GridCell {
                id: key.id,
                cell: cell_count,
            };
            cell_count += 1;
        }

        *cell = table[entry].cell;
    }

    cell_count as usize
}

/// Sizes the grid by scanning power-of-two cell sizes from coarse to fine
/// until the (approximate) number of occupied cells reaches the target, then
/// assigns cells with the chosen mask.
#[cfg(not(feature = "grid-bisect"))]
fn assign_vertex_cells(vertex_cells: &mut [u32], vertex_positions: &[Vector3], target_cell_count: usize) -> usize {
    let vertex_count = vertex_positions.len();

    let mut vertex_ids = vec![0u32; vertex_count];
    compute_cell_ids(&mut vertex_ids, vertex_positions, 1023.5);

    let mut count_table = vec![0u8; hash_buckets(target_cell_count * 4)];

    let mut mask = 0u32;

    for pass in 0..10 {
        let maskc = 1023u32 & !((1 << (9 - pass)) - 1);
        mask = (maskc << 20) | (maskc << 10) | maskc;

        let cell_count = count_cells_approx(&mut count_table, &vertex_ids, mask);

        trace!(pass, cell_count, bits = pass + 1, "grid sizing pass");

        if cell_count >= target_cell_count {
            break;
        }
    }

    let mut table = vec![EMPTY_CELL; hash_buckets(vertex_count)];

    fill_vertex_cells(&mut table, vertex_cells, &vertex_ids, mask)
}

/// Sizes the grid by bisecting the cell size in `[1/1024, 1]`; inner passes
/// count approximately, the final pass assigns cells exactly.
#[cfg(feature = "grid-bisect")]
fn assign_vertex_cells(vertex_cells: &mut [u32], vertex_positions: &[Vector3], target_cell_count: usize) -> usize {
    const PASSES: usize = 10;

    let vertex_count = vertex_positions.len();

    let mut vertex_ids = vec![0u32; vertex_count];

    let mut count_table = vec![0u8; hash_buckets(target_cell_count * 4)];
    let mut table = vec![EMPTY_CELL; hash_buckets(vertex_count)];

    let mut cell_min_size = 1.0f32 / 1024.0;
    let mut cell_max_size = 1.0f32;

    for pass in 0..=PASSES {
        let cell_size = if pass == PASSES {
            cell_max_size
        } else {
            (cell_min_size + cell_max_size) * 0.5
        };

        let mut cell_scale = 1.0 / cell_size;
        cell_scale = cell_scale.min(1023.5);
        if cell_scale < 0.5 {
            cell_scale = 0.0;
        }

        compute_cell_ids(&mut vertex_ids, vertex_positions, cell_scale);

        if pass < PASSES {
            let cell_count = count_cells_approx(&mut count_table, &vertex_ids, !0u32);

            trace!(pass, cell_count, cell_size, "grid sizing pass");

            if cell_count < target_cell_count {
                cell_max_size = cell_size;
            } else {
                cell_min_size = cell_size;
            }
        }
    }

    fill_vertex_cells(&mut table, vertex_cells, &vertex_ids, !0u32)
}

/// Keeps the minimum-error input vertex of each cell as its representative,
/// caching the current minimum to avoid re-evaluating it per vertex.
fn fill_cell_remap(
    cell_remap: &mut [u32],
    cell_errors: &mut [f32],
    vertex_cells: &[u32],
    cell_quadrics: &[Quadric],
    vertex_positions: &[Vector3],
) {
    for (i, (cell, pos)) in vertex_cells.iter().zip(vertex_positions.iter()).enumerate() {
        let cell = *cell as usize;
        let error = cell_quadrics[cell].error(pos);

        if cell_remap[cell] == INVALID_INDEX || error < cell_errors[cell] {
            cell_remap[cell] = i as u32;
            cell_errors[cell] = error;
        }
    }
}

/// Emits triangles against the cell representatives, dropping triangles that
/// collapsed into one or two cells.
#[cfg(not(feature = "filter-duplicates"))]
fn emit_triangles(destination: &mut [u32], indices: &[u32], vertex_cells: &[u32], cell_remap: &[u32]) -> usize {
    let mut write = 0;

    for i in (0..indices.len()).step_by(3) {
        let c0 = vertex_cells[indices[i] as usize] as usize;
        let c1 = vertex_cells[indices[i + 1] as usize] as usize;
        let c2 = vertex_cells[indices[i + 2] as usize] as usize;

        if c0 != c1 && c0 != c2 && c1 != c2 {
            destination[write] = cell_remap[c0];
            destination[write + 1] = cell_remap[c1];
            destination[write + 2] = cell_remap[c2];
            write += 3;
        }
    }

    write
}

/// Emits triangles against the cell representatives, additionally dropping
/// duplicate triangles through a hash keyed on the rotation-canonical corner
/// order.
#[cfg(feature = "filter-duplicates")]
fn emit_triangles(destination: &mut [u32], indices: &[u32], vertex_cells: &[u32], cell_remap: &[u32]) -> usize {
    use crate::hash::{Triangle, TriangleHasher, EMPTY_TRIANGLE};

    let mut tritable = vec![EMPTY_TRIANGLE; hash_buckets(indices.len() / 3)];
    let hasher = TriangleHasher;

    let mut write = 0;

    for i in (0..indices.len()).step_by(3) {
        let c0 = vertex_cells[indices[i] as usize] as usize;
        let c1 = vertex_cells[indices[i + 1] as usize] as usize;
        let c2 = vertex_cells[indices[i + 2] as usize] as usize;

        if c0 != c1 && c0 != c2 && c1 != c2 {
            let (a, b, c) = (cell_remap[c0], cell_remap[c1], cell_remap[c2]);

            // rotate the minimum corner first so all rotations of a triangle match
            let mut tri = Triangle { a, b, c };

            if tri.b < tri.a && tri.b < tri.c {
                tri = Triangle {
                    a: tri.b,
                    b: tri.c,
                    c: tri.a,
                };
            } else if tri.c < tri.a && tri.c < tri.b {
                tri = Triangle {
                    a: tri.c,
                    b: tri.a,
                    c: tri.b,
                };
            }

            let entry = hash_lookup(&tritable, &hasher, &tri, &EMPTY_TRIANGLE);

            if tritable[entry].a == INVALID_INDEX {
                tritable[entry] = tri;

                destination[write] = a;
                destination[write + 1] = b;
                destination[write + 2] = c;
                write += 3;
            }
        }
    }

    write
}

/// Reduces the number of triangles in the mesh, sacrificing mesh appearance
/// for simplification performance.
///
/// The algorithm does not preserve mesh topology: boundaries and seams can
/// move or disappear. Surviving triangles keep referencing the original
/// vertex buffer; unused vertices are not compacted.
///
/// Returns the number of indices written to `destination` (a multiple of 3).
/// The output triangle count approximates the target through the grid
/// resolution and can land on either side of it.
///
/// # Arguments
///
/// * `destination`: must have room for the source index buffer
///   (`indices.len()` elements)
/// * `target_error`: accepted for signature parity with [`simplify`] but not
///   consulted; the grid search targets triangle count only
///
/// [`simplify`]: crate::simplify::simplify
pub fn simplify_sloppy(
    destination: &mut [u32],
    indices: &[u32],
    positions: &PositionStream,
    target_index_count: usize,
    target_error: f32,
) -> usize {
    let _ = target_error;

    assert_eq!(indices.len() % 3, 0);
    assert!(target_index_count <= indices.len());
    assert!(destination.len() >= indices.len());

    // we expect to get ~2 triangles/vertex in the output
    let target_cell_count = target_index_count / 6;

    if target_cell_count == 0 {
        return 0;
    }

    let vertex_count = positions.len();

    let mut vertex_positions = vec![Vector3::default(); vertex_count];
    rescale_positions(&mut vertex_positions, positions);

    // first pass: find the grid resolution and map vertices to cells
    let mut vertex_cells = vec![0u32; vertex_count];
    let cell_count = assign_vertex_cells(&mut vertex_cells, &vertex_positions, target_cell_count);

    // second pass: build a quadric for each target cell
    let mut cell_quadrics = vec![Quadric::default(); cell_count];
    fill_face_quadrics(&mut cell_quadrics, indices, &vertex_positions, &vertex_cells);

    // third pass: for each target cell, find the vertex with the minimal error
    let mut cell_remap = vec![INVALID_INDEX; cell_count];
    let mut cell_errors = vec![0.0f32; cell_count];
    fill_cell_remap(&mut cell_remap, &mut cell_errors, &vertex_cells, &cell_quadrics, &vertex_positions);

    // fourth pass: collapse triangles
    let write = emit_triangles(destination, indices, &vertex_cells, &cell_remap);

    debug!(
        cells = cell_count,
        triangles = write / 3,
        target = target_index_count / 3,
        "sloppy simplification done"
    );

    write
}

/// [`simplify_sloppy`] variant that emits the result over the caller's index
/// buffer.
pub fn simplify_sloppy_in_place(
    indices: &mut [u32],
    positions: &PositionStream,
    target_index_count: usize,
    target_error: f32,
) -> usize {
    let source = indices.to_vec();

    simplify_sloppy(indices, &source, positions, target_index_count, target_error)
}

/// Reduces the number of points in the cloud to at most the given target.
///
/// Reuses the grid machinery of [`simplify_sloppy`]: the grid resolution is
/// bisected (with exact cell counting, so the result never exceeds the
/// target), every cell accumulates a distance quadric of its points, and the
/// minimum-error point of each cell survives.
///
/// Returns the number of point indices written to `destination`.
///
/// # Arguments
///
/// * `destination`: must have room for `target_vertex_count` elements
pub fn simplify_points(destination: &mut [u32], positions: &PositionStream, target_vertex_count: usize) -> usize {
    let vertex_count = positions.len();

    assert!(target_vertex_count <= vertex_count);

    if target_vertex_count == 0 {
        return 0;
    }

    let mut vertex_positions = vec![Vector3::default(); vertex_count];
    rescale_positions(&mut vertex_positions, positions);

    let mut vertex_ids = vec![0u32; vertex_count];
    let mut vertex_cells = vec![0u32; vertex_count];
    let mut table = vec![EMPTY_CELL; hash_buckets(vertex_count)];

    // bisect the grid resolution; invariant: min_grid holds <= target cells
    // (grid size 1 collapses everything into a single cell)
    let mut min_grid: i32 = 1;
    let mut max_grid: i32 = 1025;

    while max_grid - min_grid > 1 {
        let grid_size = (min_grid + max_grid) / 2;

        compute_cell_ids(&mut vertex_ids, &vertex_positions, (grid_size - 1) as f32);
        let cell_count = fill_vertex_cells(&mut table, &mut vertex_cells, &vertex_ids, !0u32);

        trace!(grid_size, cell_count, "point grid sizing pass");

        if cell_count <= target_vertex_count {
            min_grid = grid_size;
        } else {
            max_grid = grid_size;
        }
    }

    compute_cell_ids(&mut vertex_ids, &vertex_positions, (min_grid - 1) as f32);
    let cell_count = fill_vertex_cells(&mut table, &mut vertex_cells, &vertex_ids, !0u32);

    assert!(cell_count <= target_vertex_count);

    // build a distance quadric for each cell and keep its best point
    let mut cell_quadrics = vec![Quadric::default(); cell_count];
    fill_point_quadrics(&mut cell_quadrics, &vertex_positions, &vertex_cells);

    let mut cell_remap = vec![INVALID_INDEX; cell_count];
    let mut cell_errors = vec![0.0f32; cell_count];
    fill_cell_remap(&mut cell_remap, &mut cell_errors, &vertex_cells, &cell_quadrics, &vertex_positions);

    debug!(cells = cell_count, target = target_vertex_count, "point simplification done");

    destination[..cell_count].copy_from_slice(&cell_remap);

    cell_count
}
