//! Simplex meshes.
use crate::allocators::DimAllocator;
use crate::element::{FiniteElement, SimplexElement};
use crate::error::CutFemError;
use crate::{Real, SmallDim};
use nalgebra::{DefaultAllocator, OPoint, U2, U3};
use serde::{Deserialize, Serialize};

pub mod procedural;

pub type TriangleMesh2d<T> = SimplexMesh<T, U2>;
pub type TetrahedralMesh<T> = SimplexMesh<T, U3>;

/// A conforming mesh of straight-sided simplices.
///
/// Cells are stored as a flat list of vertex indices with stride `D + 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "OPoint<T, D>: Serialize",
    deserialize = "OPoint<T, D>: Deserialize<'de>"
))]
pub struct SimplexMesh<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    vertices: Vec<OPoint<T, D>>,
    cells: Vec<usize>,
}

impl<T, D> SimplexMesh<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn from_vertices_and_cells(vertices: Vec<OPoint<T, D>>, cells: Vec<usize>) -> Result<Self, CutFemError> {
        let stride = D::dim() + 1;
        if cells.len() % stride != 0 {
            return Err(CutFemError::InvalidMesh(format!(
                "cell index list of length {} is not a multiple of {}",
                cells.len(),
                stride
            )));
        }
        if let Some(&index) = cells.iter().find(|&&v| v >= vertices.len()) {
            return Err(CutFemError::InvalidMesh(format!(
                "cell references vertex {}, but the mesh only has {} vertices",
                index,
                vertices.len()
            )));
        }
        Ok(Self { vertices, cells })
    }

    pub fn vertices(&self) -> &[OPoint<T, D>] {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len() / (D::dim() + 1)
    }

    /// The vertex indices of the given cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell index is out of bounds.
    pub fn cell_vertices(&self, cell_index: usize) -> &[usize] {
        let stride = D::dim() + 1;
        &self.cells[stride * cell_index..stride * (cell_index + 1)]
    }

    pub fn cell_iter(&self) -> impl '_ + ExactSizeIterator<Item = &[usize]> {
        self.cells.chunks_exact(D::dim() + 1)
    }

    /// Returns the linear geometric element of the given cell.
    pub fn element(&self, cell_index: usize) -> Result<SimplexElement<T, D>, CutFemError> {
        self.element_with_order(cell_index, 1)
    }

    pub(crate) fn element_with_order(&self, cell_index: usize, order: usize) -> Result<SimplexElement<T, D>, CutFemError> {
        if cell_index >= self.num_cells() {
            return Err(CutFemError::ElementOutOfBounds(cell_index));
        }
        let vertices = self
            .cell_vertices(cell_index)
            .iter()
            .map(|&v| self.vertices[v].clone())
            .collect();
        Ok(SimplexElement::from_vertices(vertices, order))
    }

    /// Finds a cell containing the given point together with the reference coordinates of the
    /// point in that cell.
    ///
    /// Points on shared faces are attributed to the first cell found.
    pub fn locate_point(&self, x: &OPoint<T, D>) -> Option<(usize, OPoint<T, D>)> {
        let tolerance = T::from_f64(1e-12).expect("f64 must be representable in T");
        (0..self.num_cells()).find_map(|cell_index| {
            let element = self.element(cell_index).ok()?;
            let xi = element.map_physical_coords(x)?;
            element
                .contains_reference_point(&xi, tolerance)
                .then_some((cell_index, xi))
        })
    }
}
