//! Evaluation of finite element functions at points shifted between two deformed configurations
//! of the same mesh.
//!
//! Given a point `x = Φ(ξ)` of an element with geometry map `Φ`, and two vector fields `back`
//! and `forth` on the mesh, the shifted point is the reference point `ξ'` of the same element
//! that satisfies
//!
//! ```text
//! Φ(ξ') + forth(ξ') = Φ(ξ) + back(ξ).
//! ```
//!
//! In other words, `x` is moved into the configuration described by `back` and then pulled back
//! through the configuration described by `forth`. The equation is solved with Newton's method,
//! starting from `ξ`.
use crate::allocators::DimAllocator;
use crate::element::{FiniteElement, SimplexElement};
use crate::error::CutFemError;
use crate::space::GridFunction;
use crate::workspace::Workspace;
use crate::{Real, SmallDim};
use log::warn;
use nalgebra::{DMatrix, DVector, DefaultAllocator, OMatrix, OPoint, OVector};
use serde::{Deserialize, Serialize};

/// A linear operator mapping element-local coefficients to a pointwise value.
///
/// Element-local coefficient vectors are interleaved by node, with [`dim`](Self::dim)
/// components per node.
pub trait DifferentialOperator<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn name(&self) -> &str;

    /// The number of components of the operator output.
    fn dim(&self) -> usize;

    /// The order of differentiation, used to decide on quadrature strength.
    fn diff_order(&self) -> usize;

    /// The reference point at which the basis functions are evaluated for the given
    /// quadrature point.
    fn evaluation_point<E>(
        &self,
        element_index: usize,
        element: &E,
        reference_coords: &OPoint<T, D>,
        workspace: &mut Workspace,
    ) -> Result<OPoint<T, D>, CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>;

    /// Computes the `dim x (dim * n)` matrix of the operator at the given point.
    fn calc_matrix<E>(
        &self,
        element_index: usize,
        element: &E,
        reference_coords: &OPoint<T, D>,
        matrix: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        let d = self.dim();
        let n = element.num_nodes();
        let xi = self.evaluation_point(element_index, element, reference_coords, workspace)?;
        let basis = populate_basis_buffer(element, &xi, workspace);
        matrix.resize_mut(d, d * n, T::zero());
        matrix.fill(T::zero());
        for (i, &phi) in basis.iter().enumerate() {
            for c in 0..d {
                matrix[(c, d * i + c)] = phi;
            }
        }
        Ok(())
    }

    /// Applies the operator to the element-local coefficients `x`, storing the result in `flux`.
    fn apply<E>(
        &self,
        element_index: usize,
        element: &E,
        reference_coords: &OPoint<T, D>,
        x: &[T],
        flux: &mut [T],
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        let d = self.dim();
        check_len(x.len(), d * element.num_nodes())?;
        check_len(flux.len(), d)?;
        let xi = self.evaluation_point(element_index, element, reference_coords, workspace)?;
        let basis = populate_basis_buffer(element, &xi, workspace);
        flux.fill(T::zero());
        for (i, &phi) in basis.iter().enumerate() {
            for (c, f) in flux.iter_mut().enumerate() {
                *f += phi * x[d * i + c];
            }
        }
        Ok(())
    }

    /// Applies the transpose of the operator to `flux`, overwriting the element-local
    /// coefficients `x`.
    fn apply_transpose<E>(
        &self,
        element_index: usize,
        element: &E,
        reference_coords: &OPoint<T, D>,
        flux: &[T],
        x: &mut [T],
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        let d = self.dim();
        check_len(x.len(), d * element.num_nodes())?;
        check_len(flux.len(), d)?;
        let xi = self.evaluation_point(element_index, element, reference_coords, workspace)?;
        let basis = populate_basis_buffer(element, &xi, workspace);
        for (i, &phi) in basis.iter().enumerate() {
            for (c, &f) in flux.iter().enumerate() {
                x[d * i + c] = phi * f;
            }
        }
        Ok(())
    }
}

fn check_len(actual: usize, expected: usize) -> Result<(), CutFemError> {
    if actual == expected {
        Ok(())
    } else {
        Err(CutFemError::DimensionMismatch { expected, actual })
    }
}

#[derive(Debug)]
struct OperatorBuffer<T> {
    basis_values: Vec<T>,
}

impl<T> Default for OperatorBuffer<T> {
    fn default() -> Self {
        Self {
            basis_values: Vec::new(),
        }
    }
}

fn populate_basis_buffer<'w, T, E>(element: &E, xi: &OPoint<T, E::GeometryDim>, workspace: &'w mut Workspace) -> &'w [T]
where
    T: Real,
    E: FiniteElement<T>,
    DefaultAllocator: DimAllocator<T, E::GeometryDim>,
{
    let buffer: &mut OperatorBuffer<T> = workspace.get_or_default();
    buffer.basis_values.resize(element.num_nodes(), T::zero());
    element.populate_basis(&mut buffer.basis_values, xi);
    &buffer.basis_values
}

/// Plain pointwise evaluation of a vector-valued function with `D` components.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct VectorEvaluation;

impl<T, D> DifferentialOperator<T, D> for VectorEvaluation
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn name(&self) -> &str {
        "vector_evaluation"
    }

    fn dim(&self) -> usize {
        D::dim()
    }

    fn diff_order(&self) -> usize {
        0
    }

    fn evaluation_point<E>(
        &self,
        _element_index: usize,
        _element: &E,
        reference_coords: &OPoint<T, D>,
        _workspace: &mut Workspace,
    ) -> Result<OPoint<T, D>, CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        Ok(reference_coords.clone())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSettings<T> {
    pub max_iterations: usize,
    /// Tolerance on the residual of the shift equation, relative to the element diameter.
    pub tolerance: T,
    /// Tolerance of the inside test for the shifted reference point.
    pub inside_tolerance: T,
}

impl<T: Real> Default for ShiftSettings<T> {
    fn default() -> Self {
        let convert = |x: f64| T::from_f64(x).expect("f64 must be representable in T");
        Self {
            max_iterations: 20,
            tolerance: convert(1e-12),
            inside_tolerance: convert(1e-10),
        }
    }
}

/// Two vector fields with `D` components on the same mesh.
#[derive(Debug, Copy, Clone)]
pub struct DeformationPair<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    back: &'a GridFunction<T, D>,
    forth: &'a GridFunction<T, D>,
}

impl<'a, T, D> DeformationPair<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(back: &'a GridFunction<T, D>, forth: &'a GridFunction<T, D>) -> Result<Self, CutFemError> {
        back.check_solution_dim(D::dim())?;
        forth.check_solution_dim(D::dim())?;
        if !back.shares_mesh_with(forth) {
            return Err(CutFemError::MeshMismatch);
        }
        Ok(Self { back, forth })
    }

    pub fn back(&self) -> &'a GridFunction<T, D> {
        self.back
    }

    pub fn forth(&self) -> &'a GridFunction<T, D> {
        self.forth
    }
}

#[derive(Debug)]
struct ShiftBuffer<T> {
    u_local: Vec<T>,
    basis_values: Vec<T>,
    basis_gradients: DMatrix<T>,
}

impl<T: Real> Default for ShiftBuffer<T> {
    fn default() -> Self {
        Self {
            u_local: Vec::new(),
            basis_values: Vec::new(),
            basis_gradients: DMatrix::zeros(0, 0),
        }
    }
}

impl<T: Real> ShiftBuffer<T> {
    /// Evaluates a vector field and its Jacobian with respect to reference coordinates.
    fn evaluate_field<D>(
        &mut self,
        u: &GridFunction<T, D>,
        u_element: &SimplexElement<T, D>,
        element_index: usize,
        xi: &OPoint<T, D>,
    ) -> Result<(OVector<T, D>, OMatrix<T, D, D>), CutFemError>
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<T, D>,
    {
        let d = D::dim();
        let n = u_element.num_nodes();
        self.u_local.resize(d * n, T::zero());
        self.basis_values.resize(n, T::zero());
        self.basis_gradients.resize_mut(d, n, T::zero());
        u.populate_element_dofs(element_index, &mut self.u_local)?;
        u_element.populate_basis(&mut self.basis_values, xi);
        u_element.populate_basis_gradients(&mut self.basis_gradients, xi);

        let mut value = OVector::<T, D>::zeros();
        let mut jacobian = OMatrix::<T, D, D>::zeros();
        for i in 0..n {
            let phi = self.basis_values[i];
            for c in 0..d {
                let u_ic = self.u_local[d * i + c];
                value[c] += phi * u_ic;
                for k in 0..d {
                    jacobian[(c, k)] += u_ic * self.basis_gradients[(k, i)];
                }
            }
        }
        Ok((value, jacobian))
    }
}

/// Evaluation of a vector-valued function at the shifted point.
///
/// The operator has differential order zero: it moves the evaluation point, but does not
/// differentiate.
#[derive(Debug, Clone)]
pub struct ShiftedEvaluation<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    deformation: DeformationPair<'a, T, D>,
    settings: ShiftSettings<T>,
}

impl<'a, T, D> ShiftedEvaluation<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(deformation: DeformationPair<'a, T, D>) -> Self {
        Self {
            deformation,
            settings: ShiftSettings::default(),
        }
    }

    pub fn with_settings(self, settings: ShiftSettings<T>) -> Self {
        Self { settings, ..self }
    }

    pub fn deformation(&self) -> &DeformationPair<'a, T, D> {
        &self.deformation
    }

    /// The physical target point `Φ(ξ) + back(ξ)`.
    fn shift_target<E>(
        &self,
        element_index: usize,
        element: &E,
        xi: &OPoint<T, D>,
        buffer: &mut ShiftBuffer<T>,
    ) -> Result<OPoint<T, D>, CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        let back = self.deformation.back;
        let back_element = back.element(element_index)?;
        let (b, _) = buffer.evaluate_field(back, &back_element, element_index, xi)?;
        Ok(element.map_reference_coords(xi) + b)
    }

    /// Solves `Φ(ξ') + forth(ξ') = target` for `ξ'` with Newton's method.
    fn solve_shift<E>(
        &self,
        element_index: usize,
        element: &E,
        target: &OPoint<T, D>,
        start: OPoint<T, D>,
        buffer: &mut ShiftBuffer<T>,
    ) -> Result<OPoint<T, D>, CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        let forth = self.deformation.forth;
        let forth_element = forth.element(element_index)?;
        let tolerance = self.settings.tolerance * element.diameter().max(T::one());
        let mut xi = start;
        for iteration in 0..=self.settings.max_iterations {
            let (f, grad_f) = buffer.evaluate_field(forth, &forth_element, element_index, &xi)?;
            let residual = (element.map_reference_coords(&xi) + f) - target;
            if residual.norm() <= tolerance {
                return Ok(xi);
            }
            if iteration == self.settings.max_iterations {
                break;
            }
            let jacobian = element.reference_jacobian(&xi) + grad_f;
            let step = jacobian
                .lu()
                .solve(&residual)
                .ok_or(CutFemError::SingularJacobian(element_index))?;
            xi -= step;
        }
        Err(CutFemError::ShiftNotConverged { element_index })
    }

    /// Computes the shifted reference point `ξ'` in the same element.
    ///
    /// Fails with [`CutFemError::ShiftedPointOutsideElement`] if the shifted point leaves the
    /// element.
    pub fn shifted_reference_point<E>(
        &self,
        element_index: usize,
        element: &E,
        reference_coords: &OPoint<T, D>,
        workspace: &mut Workspace,
    ) -> Result<OPoint<T, D>, CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        let buffer: &mut ShiftBuffer<T> = workspace.get_or_default();
        let target = self.shift_target(element_index, element, reference_coords, buffer)?;
        let xi = self.solve_shift(element_index, element, &target, reference_coords.clone(), buffer)?;
        if element.contains_reference_point(&xi, self.settings.inside_tolerance) {
            Ok(xi)
        } else {
            Err(CutFemError::ShiftedPointOutsideElement { element_index })
        }
    }

    /// Searches the whole mesh for the cell and reference point whose position in the `forth`
    /// configuration is the given target.
    fn locate_in_deformed_mesh(
        &self,
        target: &OPoint<T, D>,
        buffer: &mut ShiftBuffer<T>,
    ) -> Result<(usize, OPoint<T, D>), CutFemError> {
        let mesh = self.deformation.forth.mesh();
        let centroid_coord = T::one() / T::from_usize(D::dim() + 1).expect("Must be able to fit usize in T");
        let centroid = OPoint::from(OVector::<T, D>::repeat(centroid_coord));
        for cell_index in 0..mesh.num_cells() {
            let element = mesh.element(cell_index)?;
            if let Ok(xi) = self.solve_shift(cell_index, &element, target, centroid.clone(), buffer) {
                if element.contains_reference_point(&xi, self.settings.inside_tolerance) {
                    return Ok((cell_index, xi));
                }
            }
        }
        Err(CutFemError::PointOutsideMesh)
    }

    /// Evaluates a grid function at the point obtained by shifting the given point of an element.
    ///
    /// If the shifted point does not lie in the same element, it is located in the whole mesh
    /// in the `forth` configuration instead. Points outside the deformed mesh are an error.
    pub fn evaluate_grid_function(
        &self,
        u: &GridFunction<T, D>,
        element_index: usize,
        reference_coords: &OPoint<T, D>,
        workspace: &mut Workspace,
    ) -> Result<DVector<T>, CutFemError> {
        if !u.shares_mesh_with(self.deformation.forth) {
            return Err(CutFemError::MeshMismatch);
        }
        let geometry = u.mesh().element(element_index)?;
        let (cell_index, xi) = match self.shifted_reference_point(element_index, &geometry, reference_coords, workspace)
        {
            Ok(xi) => (element_index, xi),
            Err(CutFemError::ShiftedPointOutsideElement { .. } | CutFemError::ShiftNotConverged { .. }) => {
                warn!(
                    "Shifted point left element {}, searching the deformed mesh instead",
                    element_index
                );
                let buffer: &mut ShiftBuffer<T> = workspace.get_or_default();
                let target = self.shift_target(element_index, &geometry, reference_coords, buffer)?;
                self.locate_in_deformed_mesh(&target, buffer)?
            }
            Err(err) => return Err(err),
        };

        let mut result = DVector::zeros(u.solution_dim());
        u.evaluate_in_element(cell_index, &xi, result.as_mut_slice(), workspace)?;
        Ok(result)
    }
}

impl<'a, T, D> DifferentialOperator<T, D> for ShiftedEvaluation<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn name(&self) -> &str {
        "shifted_evaluation"
    }

    fn dim(&self) -> usize {
        D::dim()
    }

    fn diff_order(&self) -> usize {
        0
    }

    fn evaluation_point<E>(
        &self,
        element_index: usize,
        element: &E,
        reference_coords: &OPoint<T, D>,
        workspace: &mut Workspace,
    ) -> Result<OPoint<T, D>, CutFemError>
    where
        E: FiniteElement<T, GeometryDim = D>,
    {
        self.shifted_reference_point(element_index, element, reference_coords, workspace)
    }
}
