//! Basic procedural mesh generation routines.
use crate::mesh::{TetrahedralMesh, TriangleMesh2d};
use crate::Real;
use itertools::iproduct;
use nalgebra::{Point2, Point3};

fn cell_size<T: Real>(cells_per_dim: usize) -> T {
    T::one() / T::from_usize(cells_per_dim).expect("Must be able to fit usize in T")
}

fn to_t<T: Real>(i: usize) -> T {
    T::from_usize(i).expect("Must be able to fit usize in T")
}

/// Generates a uniform triangle mesh of the unit square `[0, 1]^2`.
///
/// Every square cell is split along the diagonal from its lower left to its upper right corner,
/// giving `2 n^2` counter-clockwise triangles.
pub fn create_unit_square_uniform_tri_mesh_2d<T: Real>(cells_per_dim: usize) -> TriangleMesh2d<T> {
    let n = cells_per_dim;
    if n == 0 {
        return TriangleMesh2d::from_vertices_and_cells(Vec::new(), Vec::new())
            .expect("An empty mesh is always valid");
    }
    let h = cell_size::<T>(n);
    let to_global_vertex_index = |i, j| (n + 1) * j + i;

    let vertices = iproduct!(0..=n, 0..=n)
        .map(|(j, i)| Point2::new(to_t::<T>(i) * h, to_t::<T>(j) * h))
        .collect();

    let mut cells = Vec::with_capacity(6 * n * n);
    for (j, i) in iproduct!(0..n, 0..n) {
        let v00 = to_global_vertex_index(i, j);
        let v10 = to_global_vertex_index(i + 1, j);
        let v11 = to_global_vertex_index(i + 1, j + 1);
        let v01 = to_global_vertex_index(i, j + 1);
        cells.extend_from_slice(&[v00, v10, v11]);
        cells.extend_from_slice(&[v00, v11, v01]);
    }

    TriangleMesh2d::from_vertices_and_cells(vertices, cells).expect("Generated mesh is always valid")
}

/// Generates a uniform tetrahedral mesh of the unit box `[0, 1]^3`.
///
/// Every cube is split into the six tetrahedra of its Kuhn subdivision, all sharing the main
/// diagonal of the cube, which yields a conforming mesh.
pub fn create_unit_box_uniform_tet_mesh_3d<T: Real>(cells_per_dim: usize) -> TetrahedralMesh<T> {
    let n = cells_per_dim;
    if n == 0 {
        return TetrahedralMesh::from_vertices_and_cells(Vec::new(), Vec::new())
            .expect("An empty mesh is always valid");
    }
    let h = cell_size::<T>(n);
    let to_global_vertex_index = |[i, j, k]: [usize; 3]| (n + 1) * (n + 1) * k + (n + 1) * j + i;

    let vertices = iproduct!(0..=n, 0..=n, 0..=n)
        .map(|(k, j, i)| Point3::new(to_t::<T>(i) * h, to_t::<T>(j) * h, to_t::<T>(k) * h))
        .collect();

    const AXIS_PERMUTATIONS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    let mut cells = Vec::with_capacity(24 * n * n * n);
    for (k, j, i) in iproduct!(0..n, 0..n, 0..n) {
        for permutation in AXIS_PERMUTATIONS {
            let mut corner = [i, j, k];
            cells.push(to_global_vertex_index(corner));
            for axis in permutation {
                corner[axis] += 1;
                cells.push(to_global_vertex_index(corner));
            }
        }
    }

    TetrahedralMesh::from_vertices_and_cells(vertices, cells).expect("Generated mesh is always valid")
}
