//! Piecewise linear re-approximation of level set functions.
use crate::allocators::DimAllocator;
use crate::coefficient::CoefficientFunction;
use crate::element::SimplexElement;
use crate::error::{real_to_f64, CutFemError};
use crate::space::GridFunction;
use crate::workspace::Workspace;
use crate::{Real, SmallDim};
use fixedbitset::FixedBitSet;
use log::debug;
use nalgebra::DefaultAllocator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar field that can be sampled at mesh vertices.
pub enum ScalarField<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// A function that can be evaluated anywhere in space.
    Analytic(&'a dyn CoefficientFunction<T, D>),
    /// A scalar finite element function of order 1 or 2.
    Discretized(&'a GridFunction<T, D>),
}

impl<'a, T, D> fmt::Debug for ScalarField<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analytic(_) => write!(f, "ScalarField::Analytic(..)"),
            Self::Discretized(u) => write!(f, "ScalarField::Discretized(order = {})", u.order()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvingSettings<T> {
    /// Nodal values with magnitude below this threshold are pushed away from zero.
    pub eps_perturbation: T,
}

impl<T: Real> Default for CurvingSettings<T> {
    fn default() -> Self {
        Self {
            eps_perturbation: T::from_f64(1e-15).expect("f64 must be representable in T"),
        }
    }
}

/// Summary of a call to [`LevelSetCurver::interpolate_into`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurvingReport {
    /// The number of vertex values written to the target.
    pub num_nodes: usize,
    /// The number of vertex values that were perturbed away from zero.
    pub num_perturbed: usize,
}

/// Pushes a value away from zero if its magnitude is below `eps`.
///
/// Ties are broken towards the positive side, so that `0` becomes `eps`.
pub fn perturb_away_from_zero<T: Real>(value: T, eps: T) -> T {
    if value.abs() < eps {
        if value >= T::zero() {
            eps
        } else {
            -eps
        }
    } else {
        value
    }
}

/// Interpolates a scalar field into the space of continuous piecewise linear functions.
///
/// Values at vertices within `eps_perturbation` of zero are perturbed, so that every element
/// whose vertex values change sign is cut by a non-degenerate line or plane.
#[derive(Debug)]
pub struct LevelSetCurver<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    source: ScalarField<'a, T, D>,
    settings: CurvingSettings<T>,
}

impl<'a, T, D> LevelSetCurver<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(source: ScalarField<'a, T, D>) -> Self {
        Self {
            source,
            settings: CurvingSettings::default(),
        }
    }

    pub fn with_settings(self, settings: CurvingSettings<T>) -> Self {
        Self { settings, ..self }
    }

    pub fn settings(&self) -> &CurvingSettings<T> {
        &self.settings
    }

    fn validate(&self, target: &GridFunction<T, D>) -> Result<(), CutFemError> {
        let eps = self.settings.eps_perturbation;
        if !(eps.is_finite() && eps >= T::zero()) {
            return Err(CutFemError::InvalidPerturbation(real_to_f64(eps)));
        }
        if target.order() != 1 {
            return Err(CutFemError::WrongOrder {
                expected: 1,
                actual: target.order(),
            });
        }
        target.check_solution_dim(1)?;
        if let ScalarField::Discretized(source) = &self.source {
            if !source.shares_mesh_with(target) {
                return Err(CutFemError::MeshMismatch);
            }
            source.check_solution_dim(1)?;
        }
        Ok(())
    }

    /// Writes the (perturbed) source values at all mesh vertices into the P1 target.
    ///
    /// A discretized source is evaluated in the cells around each vertex. Vertices that belong to
    /// no cell are located in the mesh instead, and fail with [`CutFemError::PointOutsideMesh`] if
    /// no cell contains them.
    pub fn interpolate_into(
        &self,
        target: &mut GridFunction<T, D>,
        workspace: &mut Workspace,
    ) -> Result<CurvingReport, CutFemError> {
        self.validate(target)?;
        let eps = self.settings.eps_perturbation;
        let mesh = target.mesh().clone();
        let reference_vertices = SimplexElement::<T, D>::reference(1).vertices().to_vec();

        let mut visited = FixedBitSet::with_capacity(mesh.num_vertices());
        let mut report = CurvingReport::default();

        for element_index in 0..mesh.num_cells() {
            for (local_vertex, &vertex) in mesh.cell_vertices(element_index).iter().enumerate() {
                if visited.put(vertex) {
                    continue;
                }
                let value = match &self.source {
                    ScalarField::Analytic(f) => f.evaluate(&mesh.vertices()[vertex]),
                    ScalarField::Discretized(u) => {
                        u.evaluate_scalar_in_element(element_index, &reference_vertices[local_vertex], workspace)?
                    }
                };
                store_vertex_value(target, vertex, value, eps, &mut report);
            }
        }

        // Vertices that no cell references are sampled directly at their position
        let vertices = mesh.vertices();
        for vertex in (0..mesh.num_vertices()).filter(|&v| !visited.contains(v)) {
            let x = &vertices[vertex];
            let value = match &self.source {
                ScalarField::Analytic(f) => f.evaluate(x),
                ScalarField::Discretized(u) => u.evaluate_scalar_at_point(x, workspace)?,
            };
            store_vertex_value(target, vertex, value, eps, &mut report);
        }

        debug!(
            "Curved level set into P1: {} vertex values, {} perturbed (eps = {:e})",
            report.num_nodes,
            report.num_perturbed,
            real_to_f64(eps)
        );
        Ok(report)
    }
}

fn store_vertex_value<T, D>(target: &mut GridFunction<T, D>, vertex: usize, value: T, eps: T, report: &mut CurvingReport)
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    let perturbed = perturb_away_from_zero(value, eps);
    if perturbed != value {
        report.num_perturbed += 1;
    }
    // Vertices are the first nodes of every Lagrange space, so the P1 node index coincides with
    // the vertex index
    target.coefficients_mut()[vertex] = perturbed;
    report.num_nodes += 1;
}
