//! Sphere sampling and coordinate conversions.
//!
//! Directions are unit vectors `[x, y, z]`. Spherical coordinates follow the
//! physics convention: `theta` is the polar angle from +z, `phi` the azimuth
//! in the xy-plane.
//!
//! The dense sampling used for FOD positivity and peak search is a subdivided
//! icosahedron. It is centrally symmetric, so a hemisphere is obtained by
//! keeping one vertex of every antipodal pair.

use std::collections::{BTreeSet, HashMap};

/// Tolerance for deciding whether a vertex lies on the equator / axis.
const PLANE_EPS: f64 = 1e-12;

/// Cartesian → `(r, theta, phi)`.
pub fn cart2sphere(v: [f64; 3]) -> (f64, f64, f64) {
    let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if r == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let theta = (v[2] / r).clamp(-1.0, 1.0).acos();
    let phi = v[1].atan2(v[0]);
    (r, theta, phi)
}

/// `(theta, phi)` → unit vector.
pub fn sphere2cart(theta: f64, phi: f64) -> [f64; 3] {
    let st = theta.sin();
    [st * phi.cos(), st * phi.sin(), theta.cos()]
}

pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let n = dot(v, v).sqrt();
    if !n.is_finite() || n == 0.0 {
        return None;
    }
    Some([v[0] / n, v[1] / n, v[2] / n])
}

/// Triangulated unit sphere.
#[derive(Debug, Clone)]
pub struct SphereMesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

impl SphereMesh {
    /// Neighbor lists derived from the triangle edges.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut sets = vec![BTreeSet::new(); self.vertices.len()];
        for &[a, b, c] in &self.faces {
            for (i, j) in [(a, b), (b, c), (c, a)] {
                sets[i].insert(j);
                sets[j].insert(i);
            }
        }
        sets.into_iter().map(|s| s.into_iter().collect()).collect()
    }
}

/// Subdivided icosahedron (`10 · 4^s + 2` vertices).
pub fn icosphere(subdivisions: usize) -> SphereMesh {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;

    let raw: [[f64; 3]; 12] = [
        [-1.0, phi, 0.0],
        [1.0, phi, 0.0],
        [-1.0, -phi, 0.0],
        [1.0, -phi, 0.0],
        [0.0, -1.0, phi],
        [0.0, 1.0, phi],
        [0.0, -1.0, -phi],
        [0.0, 1.0, -phi],
        [phi, 0.0, -1.0],
        [phi, 0.0, 1.0],
        [-phi, 0.0, -1.0],
        [-phi, 0.0, 1.0],
    ];
    let norm = (1.0 + phi * phi).sqrt();
    let mut vertices: Vec<[f64; 3]> = raw
        .iter()
        .map(|v| [v[0] / norm, v[1] / norm, v[2] / norm])
        .collect();

    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let (v, f) = subdivide(&vertices, &faces);
        vertices = v;
        faces = f;
    }

    SphereMesh { vertices, faces }
}

fn subdivide(vertices: &[[f64; 3]], faces: &[[usize; 3]]) -> (Vec<[f64; 3]>, Vec<[usize; 3]>) {
    let mut out_vertices = vertices.to_vec();
    let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
    let mut out_faces = Vec::with_capacity(faces.len() * 4);

    let mut midpoint = |i: usize, j: usize, verts: &mut Vec<[f64; 3]>| -> usize {
        let key = (i.min(j), i.max(j));
        if let Some(&idx) = midpoints.get(&key) {
            return idx;
        }
        let a = verts[i];
        let b = verts[j];
        let mid = [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0, (a[2] + b[2]) / 2.0];
        // Edge midpoints of a unit sphere mesh are never at the origin.
        let mid = normalize(mid).unwrap_or(a);
        let idx = verts.len();
        verts.push(mid);
        midpoints.insert(key, idx);
        idx
    };

    for &[a, b, c] in faces {
        let ab = midpoint(a, b, &mut out_vertices);
        let bc = midpoint(b, c, &mut out_vertices);
        let ca = midpoint(c, a, &mut out_vertices);
        out_faces.push([a, ab, ca]);
        out_faces.push([b, bc, ab]);
        out_faces.push([c, ca, bc]);
        out_faces.push([ab, bc, ca]);
    }

    (out_vertices, out_faces)
}

/// Whether `v` is the representative of its antipodal pair.
///
/// Upper hemisphere wins; on the equator `y > 0` wins; on the x-axis `x > 0`.
pub fn in_upper_hemisphere(v: [f64; 3]) -> bool {
    if v[2] > PLANE_EPS {
        return true;
    }
    if v[2] < -PLANE_EPS {
        return false;
    }
    if v[1] > PLANE_EPS {
        return true;
    }
    if v[1] < -PLANE_EPS {
        return false;
    }
    v[0] > 0.0
}

/// One direction per antipodal pair of an icosphere.
pub fn hemisphere(subdivisions: usize) -> Vec<[f64; 3]> {
    icosphere(subdivisions)
        .vertices
        .into_iter()
        .filter(|&v| in_upper_hemisphere(v))
        .collect()
}
