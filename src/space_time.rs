//! Nitsche coupling on space-time slabs.
//!
//! Within a slab `[t0, t1)`, the interface may move, so each side of a cut element is a
//! space-time prism with varying cross-section. The unknowns of a space-time element are the
//! products of the spatial basis `φ_i` with a Lagrange basis `ψ_l` on the reference time
//! interval `[0, 1]`, numbered time-major (`l * n + i`) within each side. As in the stationary
//! case, the negative side comes first.
use crate::allocators::DimAllocator;
use crate::coefficient::TwoSided;
use crate::cut::ElementCutDecomposition;
use crate::element::FiniteElement;
use crate::error::{real_to_f64, CutFemError};
use crate::nitsche::{GradientBuffer, KappaChoice, NitscheCoefficients, NitscheConstants};
use crate::quadrature::{Quadrature, QuadraturePair1d};
use crate::workspace::Workspace;
use crate::{Real, SmallDim};
use itertools::izip;
use log::{debug, trace};
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DVector, DefaultAllocator, DimName, OPoint, OVector};
use serde::{Deserialize, Serialize};

/// A half-open time interval `[t0, t1)`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval<T> {
    t0: T,
    t1: T,
}

impl<T: Real> TimeInterval<T> {
    /// Creates a new interval.
    ///
    /// Fails if a bound is not finite or if `t1 < t0`. Empty intervals with `t0 == t1` are allowed.
    pub fn new(t0: T, t1: T) -> Result<Self, CutFemError> {
        if t0.is_finite() && t1.is_finite() && t1 >= t0 {
            Ok(Self { t0, t1 })
        } else {
            Err(CutFemError::InvalidTimeInterval {
                t0: real_to_f64(t0),
                t1: real_to_f64(t1),
            })
        }
    }

    pub fn t0(&self) -> T {
        self.t0
    }

    pub fn t1(&self) -> T {
        self.t1
    }

    /// The length `t1 - t0` of the interval.
    pub fn tau(&self) -> T {
        self.t1 - self.t0
    }

    /// Maps reference time `s ∈ [0, 1]` to physical time.
    pub fn map_reference_time(&self, s: T) -> T {
        self.t0 + s * self.tau()
    }
}

/// A Lagrange basis of a given order on the reference time interval `[0, 1]`, with equispaced
/// nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBasis<T> {
    nodes: Vec<T>,
}

impl<T: Real> TimeBasis<T> {
    pub fn new(order: usize) -> Self {
        let nodes = if order == 0 {
            vec![T::zero()]
        } else {
            let k = T::from_usize(order).expect("Must be able to fit usize in T");
            (0..=order)
                .map(|l| T::from_usize(l).expect("Must be able to fit usize in T") / k)
                .collect()
        };
        Self { nodes }
    }

    pub fn order(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn num_functions(&self) -> usize {
        self.nodes.len()
    }

    /// The nodes of the basis on the reference interval.
    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    /// # Panics
    ///
    /// Panics if `values` does not have one entry per basis function.
    pub fn populate_values(&self, values: &mut [T], s: T) {
        assert_eq!(values.len(), self.num_functions(), "Time basis buffer dimension mismatch");
        for (l, value) in values.iter_mut().enumerate() {
            *value = self
                .nodes
                .iter()
                .enumerate()
                .filter(|&(m, _)| m != l)
                .fold(T::one(), |acc, (_, &s_m)| acc * (s - s_m) / (self.nodes[l] - s_m));
        }
    }
}

/// The cut decomposition of a space-time element.
///
/// Interface points carry a spatial reference point, a reference time in `[0, 1]`, and a weight
/// for the physical surface measure times the reference time measure. Region measures are
/// likewise integrated over reference time. Physical space-time measures follow by scaling with
/// the slab length `tau`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceTimeCutDecomposition<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    measures: TwoSided<T>,
    weights: Vec<T>,
    points: Vec<OPoint<T, D>>,
    times: Vec<T>,
    normals: Vec<OVector<T, D>>,
}

impl<T, D> SpaceTimeCutDecomposition<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// # Panics
    ///
    /// Panics if the interface lists do not all have the same length.
    pub fn new(
        measures: TwoSided<T>,
        weights: Vec<T>,
        points: Vec<OPoint<T, D>>,
        times: Vec<T>,
        normals: Vec<OVector<T, D>>,
    ) -> Self {
        assert_eq!(weights.len(), points.len(), "Must have as many weights as points");
        assert_eq!(weights.len(), times.len(), "Must have as many weights as times");
        assert_eq!(weights.len(), normals.len(), "Must have as many weights as normals");
        Self {
            measures,
            weights,
            points,
            times,
            normals,
        }
    }

    /// The decomposition of a stationary interface, extruded over the reference time interval
    /// with the given time quadrature on `[0, 1]`.
    pub fn extrude(spatial: &ElementCutDecomposition<T, D>, time_rule: &QuadraturePair1d<T>) -> Self {
        let time_measure = time_rule.weights().iter().fold(T::zero(), |acc, &w| acc + w);
        let measures = TwoSided::new(
            spatial.negative_volume() * time_measure,
            spatial.positive_volume() * time_measure,
        );
        let interface = spatial.interface();
        let mut decomposition = Self::new(measures, Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for (&w_t, s) in time_rule.weights().iter().zip(time_rule.points()) {
            for (&w, xi, normal) in izip!(interface.weights(), interface.points(), interface.normals()) {
                decomposition.weights.push(w * w_t);
                decomposition.points.push(xi.clone());
                decomposition.times.push(s.x);
                decomposition.normals.push(normal.clone());
            }
        }
        decomposition
    }

    /// Space-time measures of the negative and positive parts, in reference time.
    pub fn measures(&self) -> TwoSided<T> {
        self.measures
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn points(&self) -> &[OPoint<T, D>] {
        &self.points
    }

    pub fn times(&self) -> &[T] {
        &self.times
    }

    pub fn normals(&self) -> &[OVector<T, D>] {
        &self.normals
    }

    pub fn is_interface_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[derive(Debug)]
struct SpaceTimeBuffer<T> {
    gradients: GradientBuffer<T>,
    time_values: Vec<T>,
    spatial_jump: DVector<T>,
    spatial_flux: DVector<T>,
    jump: DVector<T>,
    flux: DVector<T>,
    penalty: DMatrix<T>,
}

impl<T: Real> Default for SpaceTimeBuffer<T> {
    fn default() -> Self {
        Self {
            gradients: GradientBuffer::default(),
            time_values: Vec::new(),
            spatial_jump: DVector::zeros(0),
            spatial_flux: DVector::zeros(0),
            jump: DVector::zeros(0),
            flux: DVector::zeros(0),
            penalty: DMatrix::zeros(0, 0),
        }
    }
}

/// Nitsche coupling terms across a moving interface within a space-time slab.
///
/// Unlike [`InterfaceNitscheIntegrator`](crate::nitsche::InterfaceNitscheIntegrator), the
/// penalty parameter `lambda` is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceTimeInterfaceNitscheIntegrator<T> {
    kappa_choice: KappaChoice,
    constants: NitscheConstants<T>,
    lambda: T,
    time_basis: TimeBasis<T>,
    time_interval: Option<TimeInterval<T>>,
}

impl<T: Real> SpaceTimeInterfaceNitscheIntegrator<T> {
    /// Creates an integrator with a time basis of the given order.
    ///
    /// The values of `beta_neg` and `beta_pos` also serve as the initial slab bounds `t0` and
    /// `t1`. If they do not form a valid interval, no slab is set until
    /// [`set_time_interval`](Self::set_time_interval) is called.
    ///
    /// The coefficients are validated before they are read as slab bounds, so both must be
    /// positive. A slab that starts at `t0 <= 0` can therefore not be seeded here: passing
    /// `beta_neg = 0` fails with [`CutFemError::InvalidCoefficient`]. Such slabs must be set with
    /// [`set_time_interval`](Self::set_time_interval).
    pub fn new<D>(
        coefficients: &NitscheCoefficients<T, D>,
        kappa_choice: KappaChoice,
        time_order: usize,
    ) -> Result<Self, CutFemError>
    where
        D: DimName,
        DefaultAllocator: Allocator<T, D>,
    {
        if coefficients.lambda.is_none() {
            return Err(CutFemError::MissingCoefficient("lambda"));
        }
        Self::from_constants(coefficients.evaluate()?, kappa_choice, time_order)
    }

    /// Creates an integrator from constant coefficients.
    ///
    /// Slab bounds are seeded from `beta` as in [`new`](Self::new), with the same restriction to
    /// positive `t0`.
    pub fn from_constants(
        constants: NitscheConstants<T>,
        kappa_choice: KappaChoice,
        time_order: usize,
    ) -> Result<Self, CutFemError> {
        constants.validate()?;
        let lambda = constants
            .lambda
            .ok_or(CutFemError::MissingCoefficient("lambda"))?;
        let time_interval = TimeInterval::new(constants.beta.neg, constants.beta.pos).ok();
        Ok(Self {
            kappa_choice,
            constants,
            lambda,
            time_basis: TimeBasis::new(time_order),
            time_interval,
        })
    }

    pub fn kappa_choice(&self) -> KappaChoice {
        self.kappa_choice
    }

    pub fn constants(&self) -> &NitscheConstants<T> {
        &self.constants
    }

    pub fn time_basis(&self) -> &TimeBasis<T> {
        &self.time_basis
    }

    /// Sets the slab for subsequent calls to
    /// [`assemble_element_matrix_in_slab`](Self::assemble_element_matrix_in_slab).
    pub fn set_time_interval(&mut self, time_interval: TimeInterval<T>) {
        debug!(
            "Space-time Nitsche integrator moved to slab [{}, {})",
            real_to_f64(time_interval.t0()),
            real_to_f64(time_interval.t1())
        );
        self.time_interval = Some(time_interval);
    }

    pub fn time_interval(&self) -> Option<&TimeInterval<T>> {
        self.time_interval.as_ref()
    }

    pub fn tau(&self) -> Option<T> {
        self.time_interval.as_ref().map(TimeInterval::tau)
    }

    /// The number of unknowns of the space-time element for `n` spatial nodes.
    pub fn num_element_unknowns(&self, num_spatial_nodes: usize) -> usize {
        2 * num_spatial_nodes * self.time_basis.num_functions()
    }

    /// The averaging weights for the given space-time element.
    pub fn kappa<D>(&self, decomposition: &SpaceTimeCutDecomposition<T, D>) -> TwoSided<T>
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<T, D>,
    {
        self.kappa_choice
            .weights(self.constants.alpha, self.constants.beta, decomposition.measures())
    }

    /// Assembles the element matrix using the slab set by
    /// [`set_time_interval`](Self::set_time_interval).
    pub fn assemble_element_matrix_in_slab<E>(
        &self,
        element_index: usize,
        element: &E,
        decomposition: &SpaceTimeCutDecomposition<T, E::GeometryDim>,
        output: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T>,
        DefaultAllocator: DimAllocator<T, E::GeometryDim>,
    {
        let time_interval = self
            .time_interval
            .ok_or_else(|| CutFemError::InvalidTimeInterval {
                t0: real_to_f64(self.constants.beta.neg),
                t1: real_to_f64(self.constants.beta.pos),
            })?;
        self.assemble_element_matrix(element_index, element, decomposition, &time_interval, output, workspace)
    }

    /// Assembles the space-time interface matrix of a cut element on the given slab.
    ///
    /// The matrix has dimensions `2 n n_t x 2 n n_t`, where `n_t` is the number of time basis
    /// functions. It is zero if the decomposition has no interface points.
    pub fn assemble_element_matrix<E>(
        &self,
        element_index: usize,
        element: &E,
        decomposition: &SpaceTimeCutDecomposition<T, E::GeometryDim>,
        time_interval: &TimeInterval<T>,
        output: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> Result<(), CutFemError>
    where
        E: FiniteElement<T>,
        DefaultAllocator: DimAllocator<T, E::GeometryDim>,
    {
        let n = element.num_nodes();
        let n_t = self.time_basis.num_functions();
        let m = self.num_element_unknowns(n);
        output.resize_mut(m, m, T::zero());
        output.fill(T::zero());

        if decomposition.is_interface_empty() {
            trace!("Space-time element {} has an empty interface, skipping Nitsche terms", element_index);
            return Ok(());
        }

        let buffer: &mut SpaceTimeBuffer<T> = workspace.get_or_default();
        buffer.gradients.resize(n, E::GeometryDim::dim());
        buffer.time_values.resize(n_t, T::zero());
        buffer.spatial_jump.resize_vertically_mut(2 * n, T::zero());
        buffer.spatial_flux.resize_vertically_mut(2 * n, T::zero());
        buffer.jump.resize_vertically_mut(m, T::zero());
        buffer.flux.resize_vertically_mut(m, T::zero());
        buffer.penalty.resize_mut(m, m, T::zero());
        buffer.penalty.fill(T::zero());

        let tau = time_interval.tau();
        let alpha = self.constants.alpha;
        let kappa = self.kappa(decomposition);
        let kappa_alpha = TwoSided::new(kappa.neg * alpha.neg, kappa.pos * alpha.pos);

        for (&w, xi, &s, normal) in izip!(
            decomposition.weights(),
            decomposition.points(),
            decomposition.times(),
            decomposition.normals()
        ) {
            buffer.gradients.populate_jump_and_flux(
                element_index,
                element,
                xi,
                normal,
                self.constants.beta,
                kappa_alpha,
                &mut buffer.spatial_jump,
                &mut buffer.spatial_flux,
            )?;
            self.time_basis.populate_values(&mut buffer.time_values, s);
            for side in 0..2 {
                for (l, &psi) in buffer.time_values.iter().enumerate() {
                    for i in 0..n {
                        let index = side * n * n_t + l * n + i;
                        buffer.jump[index] = psi * buffer.spatial_jump[side * n + i];
                        buffer.flux[index] = psi * buffer.spatial_flux[side * n + i];
                    }
                }
            }

            let w = w * tau;
            output.ger(-w, &buffer.flux, &buffer.jump, T::one());
            output.ger(-w, &buffer.jump, &buffer.flux, T::one());
            buffer.penalty.ger(w, &buffer.jump, &buffer.jump, T::one());
        }

        let gamma = self.lambda * kappa_alpha.sum() / element.diameter();
        *output += &buffer.penalty * gamma;
        Ok(())
    }
}
