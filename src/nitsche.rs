//! Nitsche coupling across the interface of cut elements.
//!
//! An element cut by the interface carries two copies of its basis, one for the negative and one
//! for the positive region. Element matrices are therefore `2n x 2n`, with the negative copy
//! occupying the first `n` rows and columns.
//!
//! With the unit normal `ν` pointing from the negative into the positive region, the jump and
//! the weighted average flux of a two-sided function `w` are
//!
//! ```text
//! [[w]]     = β⁻ w⁻ - β⁺ w⁺,
//! {{α∂ν w}} = κ⁻ α⁻ ∂ν w⁻ + κ⁺ α⁺ ∂ν w⁺,
//! ```
//!
//! and the interface contribution to the bilinear form is
//!
//! ```text
//! - ∫_Γ {{α∂ν u}} [[v]] - ∫_Γ [[u]] {{α∂ν v}} + γ ∫_Γ [[u]] [[v]].
//! ```
use crate::allocators::DimAllocator;
use crate::coefficient::{Coefficient, TwoSided};
use crate::cut::ElementCutDecomposition;
use crate::element::{populate_physical_basis_gradients, FiniteElement};
use crate::error::{real_to_f64, CutFemError};
use crate::quadrature::{Quadrature, QuadraturePair};
use crate::workspace::Workspace;
use crate::{Real, SmallDim};
use itertools::izip;
use log::trace;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DVector, DefaultAllocator, DimName, OPoint, OVector};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The scheme used to weight the two sides in the average flux.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KappaChoice {
    /// Both sides are weighted equally.
    #[default]
    HalfHalf,
    /// Weights proportional to the volume of each side in the element.
    Hansbo,
    /// Each side is weighted by the `beta` of the opposite side.
    Beta,
    /// Each side is weighted by the `alpha` of the opposite side.
    Alpha,
    /// Each side is weighted by the product `alpha * beta` of the opposite side.
    AlphaBeta,
    /// Volume weights, scaled by the `beta` of the opposite side.
    HansboBeta,
}

impl KappaChoice {
    pub const ALL: [KappaChoice; 6] = [
        KappaChoice::HalfHalf,
        KappaChoice::Hansbo,
        KappaChoice::Beta,
        KappaChoice::Alpha,
        KappaChoice::AlphaBeta,
        KappaChoice::HansboBeta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KappaChoice::HalfHalf => "halfhalf",
            KappaChoice::Hansbo => "hansbo",
            KappaChoice::Beta => "beta",
            KappaChoice::Alpha => "alpha",
            KappaChoice::AlphaBeta => "alphabeta",
            KappaChoice::HansboBeta => "hansbobeta",
        }
    }

    /// Computes the averaging weights `(κ⁻, κ⁺)`.
    ///
    /// The weights are non-negative and satisfy `κ⁻ + κ⁺ = 1` exactly. If the scheme's raw
    /// weights are both zero (e.g. volume weights of an element without volume), both sides are
    /// weighted equally.
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn weights<T: Real>(&self, alpha: TwoSided<T>, beta: TwoSided<T>, volume: TwoSided<T>) -> TwoSided<T> {
        let (w_neg, w_pos) = match self {
            KappaChoice::HalfHalf => return TwoSided::new(0.5, 0.5),
            KappaChoice::Hansbo => (volume.neg, volume.pos),
            KappaChoice::Beta => (beta.pos, beta.neg),
            KappaChoice::Alpha => (alpha.pos, alpha.neg),
            KappaChoice::AlphaBeta => (alpha.pos * beta.pos, alpha.neg * beta.neg),
            KappaChoice::HansboBeta => (volume.neg * beta.pos, volume.pos * beta.neg),
        };
        let sum = w_neg + w_pos;
        let kappa_neg = if sum > 0.0 && sum.is_finite() { w_neg / sum } else { 0.5 };
        TwoSided::new(kappa_neg, 1.0 - kappa_neg)
    }
}

impl fmt::Display for KappaChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for KappaChoice {
    type Err = CutFemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        KappaChoice::ALL
            .into_iter()
            .find(|choice| choice.name() == lower)
            .ok_or_else(|| CutFemError::UnknownKappaChoice(s.to_string()))
    }
}

const COEFFICIENT_NAMES: [&str; 5] = ["alpha_neg", "alpha_pos", "beta_neg", "beta_pos", "lambda"];

/// The two-sided coefficients of a Nitsche integrator.
///
/// All coefficients must be constant. They are evaluated once when an integrator is constructed.
#[derive(Debug)]
pub struct NitscheCoefficients<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub alpha: TwoSided<Coefficient<'a, T, D>>,
    pub beta: TwoSided<Coefficient<'a, T, D>>,
    pub lambda: Option<Coefficient<'a, T, D>>,
}

impl<'a, T, D> NitscheCoefficients<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// Builds the coefficients from the positional list
    /// `[alpha_neg, alpha_pos, beta_neg, beta_pos, (lambda)]`.
    pub fn from_list(coefficients: Vec<Coefficient<'a, T, D>>) -> Result<Self, CutFemError> {
        let num_coefficients = coefficients.len();
        if num_coefficients < 4 {
            return Err(CutFemError::MissingCoefficient(COEFFICIENT_NAMES[num_coefficients]));
        }
        if num_coefficients > 5 {
            return Err(CutFemError::DimensionMismatch {
                expected: 5,
                actual: num_coefficients,
            });
        }
        let mut iter = coefficients.into_iter();
        let mut next = || iter.next().ok_or(CutFemError::MissingCoefficient("alpha_neg"));
        let alpha = TwoSided::new(next()?, next()?);
        let beta = TwoSided::new(next()?, next()?);
        let lambda = next().ok();
        Ok(Self { alpha, beta, lambda })
    }

    /// Constant coefficients, owned by the returned value.
    pub fn constant(alpha: TwoSided<T>, beta: TwoSided<T>, lambda: Option<T>) -> Self {
        Self {
            alpha: alpha.map(Coefficient::constant),
            beta: beta.map(Coefficient::constant),
            lambda: lambda.map(Coefficient::constant),
        }
    }

    /// Evaluates all coefficients and checks that they are positive.
    pub fn evaluate(&self) -> Result<NitscheConstants<T>, CutFemError> {
        let constants = NitscheConstants {
            alpha: TwoSided::new(
                evaluate_constant(&self.alpha.neg, COEFFICIENT_NAMES[0])?,
                evaluate_constant(&self.alpha.pos, COEFFICIENT_NAMES[1])?,
            ),
            beta: TwoSided::new(
                evaluate_constant(&self.beta.neg, COEFFICIENT_NAMES[2])?,
                evaluate_constant(&self.beta.pos, COEFFICIENT_NAMES[3])?,
            ),
            lambda: self
                .lambda
                .as_ref()
                .map(|lambda| evaluate_constant(lambda, COEFFICIENT_NAMES[4]))
                .transpose()?,
        };
        constants.validate()?;
        Ok(constants)
    }
}

fn evaluate_constant<T, D>(coefficient: &Coefficient<T, D>, name: &'static str) -> Result<T, CutFemError>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    coefficient
        .evaluate_const()
        .ok_or(CutFemError::NonConstantCoefficient(name))
}

fn check_positive<T: Real>(value: T, name: &'static str) -> Result<(), CutFemError> {
    if value.is_finite() && value > T::zero() {
        Ok(())
    } else {
        Err(CutFemError::InvalidCoefficient {
            name,
            value: real_to_f64(value),
        })
    }
}

/// Evaluated two-sided coefficients.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct NitscheConstants<T> {
    pub alpha: TwoSided<T>,
    pub beta: TwoSided<T>,
    pub lambda: Option<T>,
}

impl<T: Real> NitscheConstants<T> {
    pub fn validate(&self) -> Result<(), CutFemError> {
        check_positive(self.alpha.neg, COEFFICIENT_NAMES[0])?;
        check_positive(self.alpha.pos, COEFFICIENT_NAMES[1])?;
        check_positive(self.beta.neg, COEFFICIENT_NAMES[2])?;
        check_positive(self.beta.pos, COEFFICIENT_NAMES[3])?;
        if let Some(lambda) = self.lambda {
            check_positive(lambda, COEFFICIENT_NAMES[4])?;
        }
        Ok(())
    }

    /// The diffusion coefficients `alpha * beta` of each side.
    pub fn ab(&self) -> TwoSided<T> {
        TwoSided::new(self.alpha.neg * self.beta.neg, self.alpha.pos * self.beta.pos)
    }
}

/// How the penalty term of the Nitsche form is scaled.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stabilization<T> {
    /// `γ = λ (κ⁻α⁻ + κ⁺α⁺) / h` with the element diameter `h`.
    Penalty { lambda: T },
    /// The smallest penalty for which the element contribution, together with the diffusion
    /// block, is guaranteed to be positive semi-definite.
    Minimal,
}

/// Gradient buffers shared by the element-local integrators.
#[derive(Debug)]
pub(crate) struct GradientBuffer<T> {
    pub basis_values: Vec<T>,
    pub reference_gradients: DMatrix<T>,
    pub physical_gradients: DMatrix<T>,
}

impl<T: Real> Default for GradientBuffer<T> {
    fn default() -> Self {
        Self {
            basis_values: Vec::new(),
            reference_gradients: DMatrix::zeros(0, 0),
            physical_gradients: DMatrix::zeros(0, 0),
        }
    }
}

impl<T: Real> GradientBuffer<T> {
    pub fn resize(&mut self, num_nodes: usize, dim: usize) {
        self.basis_values.resize(num_nodes, T::zero());
        self.reference_gradients.resize_mut(dim, num_nodes, T::zero());
        self.physical_gradients.resize_mut(dim, num_nodes, T::zero());
    }

    /// Computes the spatial jump and average flux vectors (each of length `2n`) of the two-sided
    /// basis at an interface point.
    #[allow(clippy::too_many_arguments)]
    pub fn populate_jump_and_flux<E>(
        &mut self,
        element_index: usize,
        element: &E,
        xi: &OPoint<T, E::GeometryDim>,
        normal: &OVector<T, E::GeometryDim>,
        beta: TwoSided<T>,
        kappa_alpha: TwoSided<T>,
        jump: &mut DVector<T>,
        flux: &mut DVector<T>,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T>,
        DefaultAllocator: DimAllocator<T, E::GeometryDim>,
    {
        let n = element.num_nodes();
        element.populate_basis(&mut self.basis_values, xi);
        populate_physical_basis_gradients(
            element_index,
            element,
            xi,
            &mut self.reference_gradients,
            &mut self.physical_gradients,
        )?;
        for i in 0..n {
            let phi = self.basis_values[i];
            let dn = self.physical_gradients.column(i).dot(normal);
            jump[i] = beta.neg * phi;
            jump[n + i] = -beta.pos * phi;
            flux[i] = kappa_alpha.neg * dn;
            flux[n + i] = kappa_alpha.pos * dn;
        }
        Ok(())
    }
}

/// Diffusion `ab⁻ ∫_{T⁻} ∇u·∇v` and `ab⁺ ∫_{T⁺} ∇u·∇v` on the two diagonal blocks of a cut element.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutDiffusionIntegrator<T> {
    ab: TwoSided<T>,
}

impl<T: Real> CutDiffusionIntegrator<T> {
    pub fn new(ab: TwoSided<T>) -> Self {
        Self { ab }
    }

    pub fn ab(&self) -> TwoSided<T> {
        self.ab
    }

    pub fn assemble_element_matrix<E>(
        &self,
        element_index: usize,
        element: &E,
        decomposition: &ElementCutDecomposition<T, E::GeometryDim>,
        output: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T>,
        DefaultAllocator: DimAllocator<T, E::GeometryDim>,
    {
        let buffer: &mut GradientBuffer<T> = workspace.get_or_default();
        self.assemble_with_buffer(element_index, element, decomposition, output, buffer)
    }

    fn assemble_with_buffer<E>(
        &self,
        element_index: usize,
        element: &E,
        decomposition: &ElementCutDecomposition<T, E::GeometryDim>,
        output: &mut DMatrix<T>,
        buffer: &mut GradientBuffer<T>,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T>,
        DefaultAllocator: DimAllocator<T, E::GeometryDim>,
    {
        let n = element.num_nodes();
        buffer.resize(n, E::GeometryDim::dim());
        output.resize_mut(2 * n, 2 * n, T::zero());
        output.fill(T::zero());
        let regions = [(decomposition.negative(), self.ab.neg, 0), (decomposition.positive(), self.ab.pos, n)];
        for (rule, ab, offset) in regions {
            accumulate_region_stiffness(element_index, element, rule, ab, offset, output, buffer)?;
        }
        Ok(())
    }
}

fn accumulate_region_stiffness<T, E>(
    element_index: usize,
    element: &E,
    rule: &QuadraturePair<T, E::GeometryDim>,
    coefficient: T,
    offset: usize,
    output: &mut DMatrix<T>,
    buffer: &mut GradientBuffer<T>,
) -> Result<(), CutFemError>
where
    T: Real,
    E: FiniteElement<T>,
    DefaultAllocator: DimAllocator<T, E::GeometryDim>,
{
    let n = element.num_nodes();
    for (&w, xi) in rule.weights().iter().zip(rule.points()) {
        populate_physical_basis_gradients(
            element_index,
            element,
            xi,
            &mut buffer.reference_gradients,
            &mut buffer.physical_gradients,
        )?;
        let g = &buffer.physical_gradients;
        output
            .view_mut((offset, offset), (n, n))
            .gemm_tr(w * coefficient, g, g, T::one());
    }
    Ok(())
}

/// Computes the largest `C` such that `vᵀ F v ≤ C vᵀ A v` for all `v`, for symmetric positive
/// semi-definite `A` and `F` where `F` vanishes on the kernel of `A`.
///
/// Eigenvalues of `A` below a relative threshold are treated as belonging to its kernel.
pub fn generalized_max_eigenvalue<T: Real>(a: &DMatrix<T>, f: &DMatrix<T>) -> T {
    block_diagonal_generalized_max_eigenvalue(a, f, &[a.nrows()])
}

/// Same as [`generalized_max_eigenvalue`], for a block-diagonal `A` with the given block sizes.
///
/// The kernel of `A` is determined block by block, relative to the largest eigenvalue of each
/// block, so that a block with a much smaller scale than the others keeps its range.
///
/// # Panics
///
/// Panics if the block sizes do not add up to the dimension of `A`.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn block_diagonal_generalized_max_eigenvalue<T: Real>(a: &DMatrix<T>, f: &DMatrix<T>, block_sizes: &[usize]) -> T {
    let m = a.nrows();
    assert_eq!(block_sizes.iter().sum::<usize>(), m, "Block sizes must add up to the matrix dimension");

    // Columns of Q Λ^{-1/2} for each block, restricted to the range of the block
    let mut range_columns = Vec::new();
    let mut offset = 0;
    for &size in block_sizes {
        let eigen = a.view((offset, offset), (size, size)).clone_owned().symmetric_eigen();
        let max_eigenvalue = eigen.eigenvalues.iter().fold(0.0, |acc: T, &lambda| acc.max(lambda));
        if max_eigenvalue > 0.0 {
            let threshold = 1e-10 * max_eigenvalue;
            for (k, &lambda) in eigen.eigenvalues.iter().enumerate() {
                if lambda > threshold {
                    let mut column = DVector::<T>::zeros(m);
                    column
                        .rows_mut(offset, size)
                        .copy_from(&(eigen.eigenvectors.column(k) / lambda.sqrt()));
                    range_columns.push(column);
                }
            }
        }
        offset += size;
    }
    if range_columns.is_empty() {
        return 0.0;
    }

    let scaled_range = DMatrix::from_columns(&range_columns);
    let reduced = scaled_range.transpose() * f * &scaled_range;
    let reduced = (&reduced + reduced.transpose()) * 0.5;
    reduced
        .symmetric_eigen()
        .eigenvalues
        .iter()
        .fold(0.0, |acc: T, &lambda| acc.max(lambda))
}

#[derive(Debug)]
struct NitscheBuffer<T> {
    gradients: GradientBuffer<T>,
    jump: DVector<T>,
    flux: DVector<T>,
    penalty: DMatrix<T>,
    flux_gram: DMatrix<T>,
    diffusion: DMatrix<T>,
}

impl<T: Real> Default for NitscheBuffer<T> {
    fn default() -> Self {
        Self {
            gradients: GradientBuffer::default(),
            jump: DVector::zeros(0),
            flux: DVector::zeros(0),
            penalty: DMatrix::zeros(0, 0),
            flux_gram: DMatrix::zeros(0, 0),
            diffusion: DMatrix::zeros(0, 0),
        }
    }
}

/// Nitsche coupling terms across the interface of a cut element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceNitscheIntegrator<T> {
    kappa_choice: KappaChoice,
    constants: NitscheConstants<T>,
    diffusion: CutDiffusionIntegrator<T>,
}

impl<T: Real> InterfaceNitscheIntegrator<T> {
    /// Creates an integrator from (constant) coefficients.
    ///
    /// Without a `lambda` coefficient, the minimal stabilization is used.
    pub fn new<D>(coefficients: &NitscheCoefficients<T, D>, kappa_choice: KappaChoice) -> Result<Self, CutFemError>
    where
        D: DimName,
        DefaultAllocator: Allocator<T, D>,
    {
        Self::from_constants(coefficients.evaluate()?, kappa_choice)
    }

    pub fn from_constants(constants: NitscheConstants<T>, kappa_choice: KappaChoice) -> Result<Self, CutFemError> {
        constants.validate()?;
        Ok(Self {
            kappa_choice,
            constants,
            diffusion: CutDiffusionIntegrator::new(constants.ab()),
        })
    }

    pub fn kappa_choice(&self) -> KappaChoice {
        self.kappa_choice
    }

    pub fn constants(&self) -> &NitscheConstants<T> {
        &self.constants
    }

    pub fn stabilization(&self) -> Stabilization<T> {
        match self.constants.lambda {
            Some(lambda) => Stabilization::Penalty { lambda },
            None => Stabilization::Minimal,
        }
    }

    /// The diffusion block integrator with the coefficients `alpha * beta`.
    pub fn diffusion_integrator(&self) -> &CutDiffusionIntegrator<T> {
        &self.diffusion
    }

    /// The averaging weights for the given element.
    pub fn kappa<D>(&self, decomposition: &ElementCutDecomposition<T, D>) -> TwoSided<T>
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<T, D>,
    {
        let volume = TwoSided::new(decomposition.negative_volume(), decomposition.positive_volume());
        self.kappa_choice
            .weights(self.constants.alpha, self.constants.beta, volume)
    }

    /// Assembles the `2n x 2n` interface matrix of a cut element.
    ///
    /// An element whose decomposition has no interface quadrature points gets a zero matrix.
    pub fn assemble_element_matrix<E>(
        &self,
        element_index: usize,
        element: &E,
        decomposition: &ElementCutDecomposition<T, E::GeometryDim>,
        output: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T>,
        DefaultAllocator: DimAllocator<T, E::GeometryDim>,
    {
        let n = element.num_nodes();
        output.resize_mut(2 * n, 2 * n, T::zero());
        output.fill(T::zero());

        let interface = decomposition.interface();
        if interface.is_empty() {
            trace!("Element {} has an empty interface, skipping Nitsche terms", element_index);
            return Ok(());
        }

        let buffer: &mut NitscheBuffer<T> = workspace.get_or_default();
        buffer.gradients.resize(n, E::GeometryDim::dim());
        buffer.jump.resize_vertically_mut(2 * n, T::zero());
        buffer.flux.resize_vertically_mut(2 * n, T::zero());
        buffer.penalty.resize_mut(2 * n, 2 * n, T::zero());
        buffer.penalty.fill(T::zero());
        buffer.flux_gram.resize_mut(2 * n, 2 * n, T::zero());
        buffer.flux_gram.fill(T::zero());

        let alpha = self.constants.alpha;
        let kappa = self.kappa(decomposition);
        let kappa_alpha = TwoSided::new(kappa.neg * alpha.neg, kappa.pos * alpha.pos);

        for (&w, xi, normal) in izip!(interface.weights(), interface.points(), interface.normals()) {
            buffer.gradients.populate_jump_and_flux(
                element_index,
                element,
                xi,
                normal,
                self.constants.beta,
                kappa_alpha,
                &mut buffer.jump,
                &mut buffer.flux,
            )?;
            output.ger(-w, &buffer.flux, &buffer.jump, T::one());
            output.ger(-w, &buffer.jump, &buffer.flux, T::one());
            buffer.penalty.ger(w, &buffer.jump, &buffer.jump, T::one());
            buffer.flux_gram.ger(w, &buffer.flux, &buffer.flux, T::one());
        }

        let gamma = match self.stabilization() {
            Stabilization::Penalty { lambda } => lambda * kappa_alpha.sum() / element.diameter(),
            Stabilization::Minimal => {
                self.diffusion.assemble_with_buffer(
                    element_index,
                    element,
                    decomposition,
                    &mut buffer.diffusion,
                    &mut buffer.gradients,
                )?;
                let c = block_diagonal_generalized_max_eigenvalue(&buffer.diffusion, &buffer.flux_gram, &[n, n]);
                trace!("Minimal stabilization constant for element {}: {:e}", element_index, real_to_f64(c));
                (T::one() + T::one()) * c
            }
        };
        *output += &buffer.penalty * gamma;
        Ok(())
    }
}
