//! Garland-Heckbert error quadrics.

use crate::topology::VertexKind;
use crate::Vector3;

use std::ops::{AddAssign, MulAssign};

/// Accumulated sum of weighted plane equations.
///
/// Encodes `v'Av + 2b'v + c` in ten floats; evaluating at a point yields the
/// sum of squared distances to the accumulated planes, each weighted by the
/// area (or edge length) it came from.
#[derive(Clone, Copy, Default)]
pub(crate) struct Quadric {
    a00: f32,
    a10: f32,
    a11: f32,
    a20: f32,
    a21: f32,
    a22: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    c: f32,
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, other: Self) {
        self.a00 += other.a00;
        self.a10 += other.a10;
        self.a11 += other.a11;
        self.a20 += other.a20;
        self.a21 += other.a21;
        self.a22 += other.a22;
        self.b0 += other.b0;
        self.b1 += other.b1;
        self.b2 += other.b2;
        self.c += other.c;
    }
}

impl MulAssign<f32> for Quadric {
    fn mul_assign(&mut self, s: f32) {
        self.a00 *= s;
        self.a10 *= s;
        self.a11 *= s;
        self.a20 *= s;
        self.a21 *= s;
        self.a22 *= s;
        self.b0 *= s;
        self.b1 *= s;
        self.b2 *= s;
        self.c *= s;
    }
}

impl Quadric {
    fn from_plane(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            a00: a * a,
            a10: b * a,
            a11: b * b,
            a20: c * a,
            a21: c * b,
            a22: c * c,
            b0: d * a,
            b1: d * b,
            b2: d * c,
            c: d * d,
        }
    }

    /// Plane quadric of a triangle, weighted by its area.
    ///
    /// A degenerate triangle has a zero-length normal and contributes a zero
    /// quadric.
    pub fn from_triangle(p0: &Vector3, p1: &Vector3, p2: &Vector3) -> Self {
        let p10 = Vector3::new(p1.x - p0.x, p1.y - p0.y, p1.z - p0.z);
        let p20 = Vector3::new(p2.x - p0.x, p2.y - p0.y, p2.z - p0.z);

        // normal = cross(p1 - p0, p2 - p0); its length is twice the triangle area
        let mut normal = Vector3::new(
            p10.y * p20.z - p10.z * p20.y,
            p10.z * p20.x - p10.x * p20.z,
            p10.x * p20.y - p10.y * p20.x,
        );
        let area = normal.normalize();

        let distance = normal.x * p0.x + normal.y * p0.y + normal.z * p0.z;

        let mut q = Self::from_plane(normal.x, normal.y, normal.z, -distance);
        q *= area;
        q
    }

    /// Virtual plane through the edge `p0 p1`, perpendicular to the triangle
    /// containing it, weighted by squared edge length.
    ///
    /// Penalizes moving border/seam edges away from the open boundary.
    pub fn from_triangle_edge(p0: &Vector3, p1: &Vector3, p2: &Vector3, weight: f32) -> Self {
        let mut p10 = Vector3::new(p1.x - p0.x, p1.y - p0.y, p1.z - p0.z);
        let length = p10.normalize();

        // p20p = length of projection of p2 - p0 onto normalize(p1 - p0)
        let p20 = Vector3::new(p2.x - p0.x, p2.y - p0.y, p2.z - p0.z);
        let p20p = p20.x * p10.x + p20.y * p10.y + p20.z * p10.z;

        // normal = altitude of the triangle from p2 onto the edge p1 - p0
        let mut normal = Vector3::new(p20.x - p10.x * p20p, p20.y - p10.y * p20p, p20.z - p10.z * p20p);
        normal.normalize();

        let distance = normal.x * p0.x + normal.y * p0.y + normal.z * p0.z;

        let mut q = Self::from_plane(normal.x, normal.y, normal.z, -distance);
        q *= length * length * weight;
        q
    }

    /// Distance-to-point quadric; evaluates to `|v - p|^2`.
    pub fn from_point(x: f32, y: f32, z: f32) -> Self {
        Self {
            a00: 1.0,
            a10: 0.0,
            a11: 1.0,
            a20: 0.0,
            a21: 0.0,
            a22: 1.0,
            b0: -x,
            b1: -y,
            b2: -z,
            c: x * x + y * y + z * z,
        }
    }

    pub fn error(&self, v: &Vector3) -> f32 {
        let mut rx = self.b0;
        let mut ry = self.b1;
        let mut rz = self.b2;

        rx += self.a10 * v.y;
        ry += self.a21 * v.z;
        rz += self.a20 * v.x;

        rx *= 2.0;
        ry *= 2.0;
        rz *= 2.0;

        rx += self.a00 * v.x;
        ry += self.a11 * v.y;
        rz += self.a22 * v.z;

        let mut r = self.c;
        r += rx * v.x;
        r += ry * v.y;
        r += rz * v.z;

        // mask tiny negative values produced by rounding
        r.abs()
    }
}

/// Adds each triangle's plane quadric to its three corners.
///
/// `remap` routes the contribution to the position-canonical vertex; the
/// sloppy path reuses this with the cell index array in its place.
pub(crate) fn fill_face_quadrics(
    vertex_quadrics: &mut [Quadric],
    indices: &[u32],
    vertex_positions: &[Vector3],
    remap: &[u32],
) {
    for i in indices.chunks_exact(3) {
        let (i0, i1, i2) = (i[0] as usize, i[1] as usize, i[2] as usize);

        let q = Quadric::from_triangle(&vertex_positions[i0], &vertex_positions[i1], &vertex_positions[i2]);

        vertex_quadrics[remap[i0] as usize] += q;
        vertex_quadrics[remap[i1] as usize] += q;
        vertex_quadrics[remap[i2] as usize] += q;
    }
}

/// Adds edge quadrics along border and seam edges, discouraging their motion.
pub(crate) fn fill_edge_quadrics(
    vertex_quadrics: &mut [Quadric],
    indices: &[u32],
    vertex_positions: &[Vector3],
    remap: &[u32],
    vertex_kind: &[VertexKind],
    loop_: &[u32],
) {
    for i in indices.chunks_exact(3) {
        const NEXT: [usize; 3] = [1, 2, 0];

        for e in 0..3 {
            let i0 = i[e] as usize;
            let i1 = i[NEXT[e]] as usize;

            let k0 = vertex_kind[i0];
            let k1 = vertex_kind[i1];

            // check that i0 and i1 are border/seam and are on the same edge loop
            // loop[] tracks half edges so we only need to check i0->i1
            if k0 != k1 || (k0 != VertexKind::Border && k0 != VertexKind::Seam) || loop_[i0] != i1 as u32 {
                continue;
            }

            let i2 = i[NEXT[NEXT[e]]] as usize;

            // we try hard to maintain border edge geometry; seam edges can move more freely
            // due to topological restrictions on collapses, seam quadrics slightly improve collapse structure but aren't critical
            const EDGE_WEIGHT_SEAM: f32 = 1.0;
            const EDGE_WEIGHT_BORDER: f32 = 10.0;

            let edge_weight = if k0 == VertexKind::Seam {
                EDGE_WEIGHT_SEAM
            } else {
                EDGE_WEIGHT_BORDER
            };

            let q = Quadric::from_triangle_edge(
                &vertex_positions[i0],
                &vertex_positions[i1],
                &vertex_positions[i2],
                edge_weight,
            );

            vertex_quadrics[remap[i0] as usize] += q;
            vertex_quadrics[remap[i1] as usize] += q;
        }
    }
}

/// Adds one distance quadric per point to its cell; used by the point-cloud path.
pub(crate) fn fill_point_quadrics(cell_quadrics: &mut [Quadric], vertex_positions: &[Vector3], vertex_cells: &[u32]) {
    for (c, v) in vertex_cells.iter().zip(vertex_positions.iter()) {
        cell_quadrics[*c as usize] += Quadric::from_point(v.x, v.y, v.z);
    }
}
