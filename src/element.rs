//! Finite elements.
//!
//! All elements in this crate are volumetric, so the reference dimension coincides with the
//! geometry dimension.
use crate::allocators::DimAllocator;
use crate::error::CutFemError;
use crate::{Real, SmallDim};
use itertools::Itertools;
use nalgebra::{
    DMatrix, DefaultAllocator, DimName, Matrix2, Matrix2x4, Matrix4x2, OMatrix, OPoint, OVector, Point2, Vector2,
    Vector4, U2,
};
use numeric_literals::replace_float_literals;

pub trait FiniteElement<T>
where
    T: Real,
    DefaultAllocator: DimAllocator<T, Self::GeometryDim>,
{
    type GeometryDim: SmallDim;

    /// Returns the number of nodes in the element.
    fn num_nodes(&self) -> usize;

    /// Evaluates each basis function at the given reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `basis_values` does not have exactly one entry per node.
    fn populate_basis(&self, basis_values: &mut [T], reference_coords: &OPoint<T, Self::GeometryDim>);

    /// Populates a `D x n` matrix whose columns are the gradients of each basis function with
    /// respect to reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the matrix does not have dimensions `D x n`.
    fn populate_basis_gradients(
        &self,
        basis_gradients: &mut DMatrix<T>,
        reference_coords: &OPoint<T, Self::GeometryDim>,
    );

    /// Compute the Jacobian of the transformation from the reference element to the given
    /// element at the given reference coordinates.
    fn reference_jacobian(
        &self,
        reference_coords: &OPoint<T, Self::GeometryDim>,
    ) -> OMatrix<T, Self::GeometryDim, Self::GeometryDim>;

    /// Maps reference coordinates to physical coordinates in the element.
    fn map_reference_coords(&self, reference_coords: &OPoint<T, Self::GeometryDim>) -> OPoint<T, Self::GeometryDim>;

    /// The diameter of the finite element, i.e. the largest distance between any two of its points.
    fn diameter(&self) -> T;

    /// Whether the reference point lies inside the reference domain, up to the given tolerance.
    fn contains_reference_point(&self, reference_coords: &OPoint<T, Self::GeometryDim>, tolerance: T) -> bool;
}

/// Computes the gradients of all basis functions with respect to physical coordinates.
///
/// `reference_gradients` is used as a buffer for the reference gradients; the physical gradients
/// are stored column by column in `physical_gradients`. Both matrices must be `D x n`. The element
/// index is only used to report a singular Jacobian.
pub fn populate_physical_basis_gradients<T, E>(
    element_index: usize,
    element: &E,
    reference_coords: &OPoint<T, E::GeometryDim>,
    reference_gradients: &mut DMatrix<T>,
    physical_gradients: &mut DMatrix<T>,
) -> Result<(), CutFemError>
where
    T: Real,
    E: FiniteElement<T>,
    DefaultAllocator: DimAllocator<T, E::GeometryDim>,
{
    let d = E::GeometryDim::dim();
    element.populate_basis_gradients(reference_gradients, reference_coords);
    let j_inv_t = element
        .reference_jacobian(reference_coords)
        .try_inverse()
        .ok_or(CutFemError::SingularJacobian(element_index))?
        .transpose();
    for i in 0..element.num_nodes() {
        let grad_ref = OVector::<T, E::GeometryDim>::from_fn(|k, _| reference_gradients[(k, i)]);
        let grad = &j_inv_t * grad_ref;
        for k in 0..d {
            physical_gradients[(k, i)] = grad[k];
        }
    }
    Ok(())
}

/// The number of nodes of a Lagrange simplex element of the given order in dimension `d`.
pub fn simplex_node_count(d: usize, order: usize) -> usize {
    match order {
        1 => d + 1,
        2 => (d + 1) + (d + 1) * d / 2,
        _ => 0,
    }
}

/// The edges `(a, b)` with `a < b` of a simplex in dimension `d`, in lexicographic order.
///
/// This is also the order of the edge nodes of second order simplex elements.
pub fn simplex_edges(d: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..=d).tuple_combinations()
}

/// A Lagrange finite element of order 1 or 2 on a straight-sided simplex.
///
/// The reference element is the unit simplex `{ξ ≥ 0, Σ ξ ≤ 1}` with vertices `0, e_1, ..., e_D`.
/// The nodes are the `D + 1` vertices, followed for second order elements by one node on each
/// edge, in the order given by [`simplex_edges`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexElement<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    vertices: Vec<OPoint<T, D>>,
    order: usize,
    jacobian: OMatrix<T, D, D>,
}

impl<T, D> SimplexElement<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Creates an element from the `D + 1` simplex vertices.
    ///
    /// # Panics
    ///
    /// Panics if the number of vertices is not `D + 1`, or if the order is not 1 or 2.
    pub fn from_vertices(vertices: Vec<OPoint<T, D>>, order: usize) -> Self {
        let d = D::dim();
        assert_eq!(vertices.len(), d + 1, "A simplex needs D + 1 vertices");
        assert!(order == 1 || order == 2, "Only first and second order simplices are supported");
        let jacobian = OMatrix::<T, D, D>::from_fn(|i, k| vertices[k + 1][i] - vertices[0][i]);
        Self {
            vertices,
            order,
            jacobian,
        }
    }

    /// The reference simplex itself.
    pub fn reference(order: usize) -> Self {
        let d = D::dim();
        let vertices = (0..=d)
            .map(|v| OPoint::from(OVector::<T, D>::from_fn(|i, _| if v == i + 1 { T::one() } else { T::zero() })))
            .collect();
        Self::from_vertices(vertices, order)
    }

    pub fn vertices(&self) -> &[OPoint<T, D>] {
        &self.vertices
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// The reference coordinates of each node, in node order.
    pub fn reference_nodes(&self) -> Vec<OPoint<T, D>> {
        let reference = Self::reference(self.order);
        let half = T::from_f64(0.5).expect("f64 must be representable in T");
        let mut nodes = reference.vertices.clone();
        if self.order == 2 {
            for (a, b) in simplex_edges(D::dim()) {
                let midpoint = (&reference.vertices[a].coords + &reference.vertices[b].coords) * half;
                nodes.push(OPoint::from(midpoint));
            }
        }
        nodes
    }

    /// The physical coordinates of each node, in node order.
    pub fn nodes(&self) -> Vec<OPoint<T, D>> {
        self.reference_nodes()
            .iter()
            .map(|xi| self.map_reference_coords(xi))
            .collect()
    }

    /// The volume (area in 2D) of the simplex.
    pub fn volume(&self) -> T {
        let factorial = (1..=D::dim()).fold(T::one(), |acc, k| {
            acc * T::from_usize(k).expect("Must be able to fit usize in T")
        });
        self.jacobian.determinant().abs() / factorial
    }

    /// Maps physical coordinates to reference coordinates.
    ///
    /// Returns `None` if the simplex is degenerate.
    pub fn map_physical_coords(&self, x: &OPoint<T, D>) -> Option<OPoint<T, D>> {
        let j_inv = self.jacobian.clone().try_inverse()?;
        Some(OPoint::from(j_inv * (x - &self.vertices[0])))
    }

    /// Barycentric coordinates `λ_0, ..., λ_D` of the given reference point.
    pub fn barycentric_coords(reference_coords: &OPoint<T, D>) -> impl Iterator<Item = T> + '_ {
        let first = (0..D::dim()).fold(T::one(), |acc, k| acc - reference_coords[k]);
        std::iter::once(first).chain(reference_coords.coords.iter().copied())
    }
}

impl<T, D> FiniteElement<T> for SimplexElement<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    type GeometryDim = D;

    fn num_nodes(&self) -> usize {
        simplex_node_count(D::dim(), self.order)
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn populate_basis(&self, basis_values: &mut [T], reference_coords: &OPoint<T, D>) {
        assert_eq!(basis_values.len(), self.num_nodes(), "Basis buffer dimension mismatch");
        let d = D::dim();
        let lambda: Vec<T> = Self::barycentric_coords(reference_coords).collect();
        match self.order {
            1 => basis_values.copy_from_slice(&lambda),
            _ => {
                for (phi, &l) in basis_values.iter_mut().zip(&lambda) {
                    *phi = l * (2.0 * l - 1.0);
                }
                for ((a, b), phi) in simplex_edges(d).zip(&mut basis_values[d + 1..]) {
                    *phi = 4.0 * lambda[a] * lambda[b];
                }
            }
        }
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn populate_basis_gradients(&self, basis_gradients: &mut DMatrix<T>, reference_coords: &OPoint<T, D>) {
        let d = D::dim();
        assert_eq!(basis_gradients.nrows(), d, "Gradient buffer dimension mismatch");
        assert_eq!(basis_gradients.ncols(), self.num_nodes(), "Gradient buffer dimension mismatch");

        // The gradient of barycentric coordinate v with respect to component k
        let lambda_grad = |v: usize, k: usize| match v {
            0 => -1.0,
            _ if v == k + 1 => 1.0,
            _ => 0.0,
        };

        match self.order {
            1 => {
                for v in 0..=d {
                    for k in 0..d {
                        basis_gradients[(k, v)] = lambda_grad(v, k);
                    }
                }
            }
            _ => {
                let lambda: Vec<T> = Self::barycentric_coords(reference_coords).collect();
                for v in 0..=d {
                    for k in 0..d {
                        basis_gradients[(k, v)] = (4.0 * lambda[v] - 1.0) * lambda_grad(v, k);
                    }
                }
                for (e, (a, b)) in simplex_edges(d).enumerate() {
                    for k in 0..d {
                        basis_gradients[(k, d + 1 + e)] =
                            4.0 * (lambda[b] * lambda_grad(a, k) + lambda[a] * lambda_grad(b, k));
                    }
                }
            }
        }
    }

    fn reference_jacobian(&self, _reference_coords: &OPoint<T, D>) -> OMatrix<T, D, D> {
        self.jacobian.clone()
    }

    fn map_reference_coords(&self, reference_coords: &OPoint<T, D>) -> OPoint<T, D> {
        &self.vertices[0] + &self.jacobian * &reference_coords.coords
    }

    fn diameter(&self) -> T {
        self.vertices
            .iter()
            .tuple_combinations()
            .map(|(x, y)| (x - y).norm())
            .fold(T::zero(), |a, b| a.max(b))
    }

    fn contains_reference_point(&self, reference_coords: &OPoint<T, D>, tolerance: T) -> bool {
        Self::barycentric_coords(reference_coords).all(|l| l >= -tolerance)
    }
}

/// A bilinear quadrilateral element in two dimensions.
///
/// The reference element is `[-1, 1]^2`, with nodes ordered counter-clockwise starting at
/// `(-1, -1)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quad4d2Element<T>
where
    T: Real,
{
    vertices: [Point2<T>; 4],
}

impl<T> Quad4d2Element<T>
where
    T: Real,
{
    pub fn from_vertices(vertices: [Point2<T>; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point2<T>; 4] {
        &self.vertices
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn reference() -> Self {
        Self::from_vertices([
            Point2::new(-1.0, -1.0),
            Point2::new(1.0, -1.0),
            Point2::new(1.0, 1.0),
            Point2::new(-1.0, 1.0),
        ])
    }

    #[rustfmt::skip]
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn evaluate_basis(xi: &Point2<T>) -> Vector4<T> {
        // N_{alpha, beta}([alpha, beta]) = 1 with alpha, beta = 1 or -1
        let phi = |alpha, beta| (1.0 + alpha * xi[0]) * (1.0 + beta * xi[1]) / 4.0;
        Vector4::new(
            phi(-1.0, -1.0),
            phi( 1.0, -1.0),
            phi( 1.0,  1.0),
            phi(-1.0,  1.0),
        )
    }

    #[rustfmt::skip]
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn gradients(xi: &Point2<T>) -> Matrix2x4<T> {
        let phi_grad = |alpha, beta|
            Vector2::new(
                alpha * (1.0 + beta * xi[1]) / 4.0,
                beta * (1.0 + alpha * xi[0]) / 4.0,
            );

        Matrix2x4::from_columns(&[
            phi_grad(-1.0, -1.0),
            phi_grad( 1.0, -1.0),
            phi_grad( 1.0,  1.0),
            phi_grad(-1.0,  1.0),
        ])
    }
}

impl<T> FiniteElement<T> for Quad4d2Element<T>
where
    T: Real,
{
    type GeometryDim = U2;

    fn num_nodes(&self) -> usize {
        4
    }

    fn populate_basis(&self, basis_values: &mut [T], reference_coords: &Point2<T>) {
        basis_values.copy_from_slice(Self::evaluate_basis(reference_coords).as_slice());
    }

    fn populate_basis_gradients(&self, basis_gradients: &mut DMatrix<T>, reference_coords: &Point2<T>) {
        assert_eq!(basis_gradients.shape(), (2, 4), "Gradient buffer dimension mismatch");
        basis_gradients.copy_from(&Self::gradients(reference_coords));
    }

    #[allow(non_snake_case)]
    fn reference_jacobian(&self, xi: &Point2<T>) -> Matrix2<T> {
        let X: Matrix2x4<T> = Matrix2x4::from_fn(|i, j| self.vertices[j][i]);
        let G: Matrix4x2<T> = Self::gradients(xi).transpose();
        X * G
    }

    #[allow(non_snake_case)]
    fn map_reference_coords(&self, xi: &Point2<T>) -> Point2<T> {
        let X: Matrix2x4<T> = Matrix2x4::from_fn(|i, j| self.vertices[j][i]);
        let N = Self::evaluate_basis(xi);
        Point2::from(X * N)
    }

    fn diameter(&self) -> T {
        self.vertices
            .iter()
            .tuple_combinations()
            .map(|(x, y)| (x - y).norm())
            .fold(T::zero(), |a, b| a.max(b))
    }

    fn contains_reference_point(&self, xi: &Point2<T>, tolerance: T) -> bool {
        let bound = T::one() + tolerance;
        xi.coords.iter().all(|x| x.abs() <= bound)
    }
}
