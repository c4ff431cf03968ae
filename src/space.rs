//! Continuous Lagrange finite element spaces on simplex meshes, and functions living in them.
use crate::allocators::DimAllocator;
use crate::element::{simplex_edges, simplex_node_count, FiniteElement, SimplexElement};
use crate::error::CutFemError;
use crate::mesh::SimplexMesh;
use crate::workspace::Workspace;
use crate::{Real, SmallDim};
use nalgebra::{DVector, DefaultAllocator, OPoint, OVector};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A continuous Lagrange space of order 1 or 2 on a simplex mesh.
///
/// Global nodes are numbered with all mesh vertices first, in mesh order, followed (order 2)
/// by one node per mesh edge, numbered in the order the edges are first encountered.
#[derive(Debug, Clone)]
pub struct H1Space<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    mesh: Arc<SimplexMesh<T, D>>,
    order: usize,
    num_nodes: usize,
    element_nodes: Vec<usize>,
}

impl<T, D> H1Space<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(mesh: Arc<SimplexMesh<T, D>>, order: usize) -> Result<Self, CutFemError> {
        let d = D::dim();
        let element_nodes = match order {
            1 => mesh.cell_iter().flatten().copied().collect(),
            2 => {
                let mut edge_nodes = FxHashMap::default();
                let mut element_nodes = Vec::with_capacity(mesh.num_cells() * simplex_node_count(d, 2));
                for cell in mesh.cell_iter() {
                    element_nodes.extend_from_slice(cell);
                    for (a, b) in simplex_edges(d) {
                        let key = (cell[a].min(cell[b]), cell[a].max(cell[b]));
                        let next_index = mesh.num_vertices() + edge_nodes.len();
                        let node = *edge_nodes.entry(key).or_insert(next_index);
                        element_nodes.push(node);
                    }
                }
                element_nodes
            }
            _ => return Err(CutFemError::UnsupportedOrder(order)),
        };
        let num_nodes = element_nodes
            .iter()
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
            .max(mesh.num_vertices());
        Ok(Self {
            mesh,
            order,
            num_nodes,
            element_nodes,
        })
    }

    pub fn mesh(&self) -> &Arc<SimplexMesh<T, D>> {
        &self.mesh
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_elements(&self) -> usize {
        self.mesh.num_cells()
    }

    pub fn element_node_count(&self) -> usize {
        simplex_node_count(D::dim(), self.order)
    }

    /// The global node indices of the given element, in local node order.
    ///
    /// # Panics
    ///
    /// Panics if the element index is out of bounds.
    pub fn element_nodes(&self, element_index: usize) -> &[usize] {
        let n = self.element_node_count();
        &self.element_nodes[n * element_index..n * (element_index + 1)]
    }

    /// The finite element of the given cell, with the polynomial order of the space.
    pub fn element(&self, element_index: usize) -> Result<SimplexElement<T, D>, CutFemError> {
        self.mesh.element_with_order(element_index, self.order)
    }
}

/// Scratch buffers for evaluating a grid function in a single element.
#[derive(Debug)]
struct InterpolationBuffer<T> {
    basis_values: Vec<T>,
    u_local: Vec<T>,
}

impl<T> Default for InterpolationBuffer<T> {
    fn default() -> Self {
        Self {
            basis_values: Vec::new(),
            u_local: Vec::new(),
        }
    }
}

/// A finite element function with `solution_dim` components per node.
///
/// Coefficients are interleaved by node: component `c` of node `i` is stored at index
/// `solution_dim * i + c`.
#[derive(Debug, Clone)]
pub struct GridFunction<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    space: Arc<H1Space<T, D>>,
    solution_dim: usize,
    coefficients: DVector<T>,
}

impl<T, D> GridFunction<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn zeros(space: Arc<H1Space<T, D>>, solution_dim: usize) -> Self {
        let coefficients = DVector::zeros(solution_dim * space.num_nodes());
        Self {
            space,
            solution_dim,
            coefficients,
        }
    }

    /// Creates a grid function from existing coefficients.
    pub fn from_coefficients(
        space: Arc<H1Space<T, D>>,
        solution_dim: usize,
        coefficients: DVector<T>,
    ) -> Result<Self, CutFemError> {
        let expected = solution_dim * space.num_nodes();
        if coefficients.len() != expected {
            return Err(CutFemError::DimensionMismatch {
                expected,
                actual: coefficients.len(),
            });
        }
        Ok(Self {
            space,
            solution_dim,
            coefficients,
        })
    }

    /// Nodal interpolation of a scalar function.
    pub fn interpolate_scalar(
        space: Arc<H1Space<T, D>>,
        f: impl Fn(&OPoint<T, D>) -> T,
    ) -> Result<Self, CutFemError> {
        let mut u = Self::zeros(space, 1);
        u.interpolate_nodes(|x, values| values[0] = f(x))?;
        Ok(u)
    }

    /// Nodal interpolation of a vector function with `D` components.
    pub fn interpolate_vector(
        space: Arc<H1Space<T, D>>,
        f: impl Fn(&OPoint<T, D>) -> OVector<T, D>,
    ) -> Result<Self, CutFemError> {
        let mut u = Self::zeros(space, D::dim());
        u.interpolate_nodes(|x, values| values.copy_from_slice(f(x).as_slice()))?;
        Ok(u)
    }

    fn interpolate_nodes(&mut self, f: impl Fn(&OPoint<T, D>, &mut [T])) -> Result<(), CutFemError> {
        let s = self.solution_dim;
        for element_index in 0..self.space.num_elements() {
            let element = self.space.element(element_index)?;
            let nodes = self.space.element_nodes(element_index);
            for (&node, x) in nodes.iter().zip(element.nodes()) {
                f(&x, &mut self.coefficients.as_mut_slice()[s * node..s * (node + 1)]);
            }
        }
        Ok(())
    }

    pub fn space(&self) -> &Arc<H1Space<T, D>> {
        &self.space
    }

    pub fn mesh(&self) -> &Arc<SimplexMesh<T, D>> {
        self.space.mesh()
    }

    pub fn order(&self) -> usize {
        self.space.order()
    }

    pub fn solution_dim(&self) -> usize {
        self.solution_dim
    }

    pub fn coefficients(&self) -> &DVector<T> {
        &self.coefficients
    }

    pub fn coefficients_mut(&mut self) -> &mut DVector<T> {
        &mut self.coefficients
    }

    /// Whether both functions are defined on the very same mesh instance.
    pub fn shares_mesh_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(self.mesh(), other.mesh())
    }

    pub fn element(&self, element_index: usize) -> Result<SimplexElement<T, D>, CutFemError> {
        self.space.element(element_index)
    }

    /// Gathers the element-local coefficients, interleaved by local node.
    pub fn populate_element_dofs(&self, element_index: usize, u_local: &mut [T]) -> Result<(), CutFemError> {
        if element_index >= self.space.num_elements() {
            return Err(CutFemError::ElementOutOfBounds(element_index));
        }
        let s = self.solution_dim;
        let nodes = self.space.element_nodes(element_index);
        if u_local.len() != s * nodes.len() {
            return Err(CutFemError::DimensionMismatch {
                expected: s * nodes.len(),
                actual: u_local.len(),
            });
        }
        for (i, &node) in nodes.iter().enumerate() {
            u_local[s * i..s * (i + 1)].copy_from_slice(&self.coefficients.as_slice()[s * node..s * (node + 1)]);
        }
        Ok(())
    }

    /// Evaluates all components of the function at the given reference coordinates of an element.
    pub fn evaluate_in_element(
        &self,
        element_index: usize,
        reference_coords: &OPoint<T, D>,
        result: &mut [T],
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError> {
        let s = self.solution_dim;
        if result.len() != s {
            return Err(CutFemError::DimensionMismatch {
                expected: s,
                actual: result.len(),
            });
        }
        let element = self.element(element_index)?;
        let n = element.num_nodes();
        let buffer: &mut InterpolationBuffer<T> = workspace.get_or_default();
        buffer.basis_values.resize(n, T::zero());
        buffer.u_local.resize(s * n, T::zero());
        self.populate_element_dofs(element_index, &mut buffer.u_local)?;
        element.populate_basis(&mut buffer.basis_values, reference_coords);

        result.fill(T::zero());
        for (i, &phi) in buffer.basis_values.iter().enumerate() {
            for (c, r) in result.iter_mut().enumerate() {
                *r += phi * buffer.u_local[s * i + c];
            }
        }
        Ok(())
    }

    /// Evaluates a scalar function at the given reference coordinates of an element.
    pub fn evaluate_scalar_in_element(
        &self,
        element_index: usize,
        reference_coords: &OPoint<T, D>,
        workspace: &mut Workspace,
    ) -> Result<T, CutFemError> {
        self.check_solution_dim(1)?;
        let mut value = [T::zero()];
        self.evaluate_in_element(element_index, reference_coords, &mut value, workspace)?;
        Ok(value[0])
    }

    /// Evaluates a scalar function at an arbitrary physical point.
    ///
    /// Returns an error if the point is not contained in any cell of the mesh.
    pub fn evaluate_scalar_at_point(&self, x: &OPoint<T, D>, workspace: &mut Workspace) -> Result<T, CutFemError> {
        self.check_solution_dim(1)?;
        let (element_index, xi) = self
            .mesh()
            .locate_point(x)
            .ok_or(CutFemError::PointOutsideMesh)?;
        self.evaluate_scalar_in_element(element_index, &xi, workspace)
    }

    pub(crate) fn check_solution_dim(&self, expected: usize) -> Result<(), CutFemError> {
        if self.solution_dim == expected {
            Ok(())
        } else {
            Err(CutFemError::WrongSolutionDim {
                expected,
                actual: self.solution_dim,
            })
        }
    }
}
