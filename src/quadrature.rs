//! Quadrature rules for reference domains.
//!
//! The reference triangle used throughout the crate is the unit simplex `{ξ ≥ 0, ξ_0 + ξ_1 ≤ 1}`.
use crate::error::CutFemError;
use crate::Real;
use nalgebra::allocator::Allocator;
use fenris_quadrature::{polyquad, univariate};
use nalgebra::{convert, DefaultAllocator, DimName, OPoint, Point1, Point2, Scalar, U1, U2};
use num::Zero;
use std::ops::{AddAssign, Mul};

pub type QuadraturePair<T, D> = (Vec<T>, Vec<OPoint<T, D>>);
pub type QuadraturePair1d<T> = QuadraturePair<T, U1>;
pub type QuadraturePair2d<T> = QuadraturePair<T, U2>;

/// A quadrature rule consisting of weights and points.
pub trait Quadrature<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn weights(&self) -> &[T];
    fn points(&self) -> &[OPoint<T, D>];

    /// Approximates the integral of the given function using this quadrature rule.
    fn integrate<U, Function>(&self, f: Function) -> U
    where
        Function: Fn(&OPoint<T, D>) -> U,
        U: Zero + Mul<T, Output = U> + AddAssign<U>,
    {
        let mut integral = U::zero();
        for (w, p) in self.weights().iter().zip(self.points()) {
            integral += f(p) * w.clone();
        }
        integral
    }
}

impl<T, D> Quadrature<T, D> for QuadraturePair<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn weights(&self) -> &[T] {
        &self.0
    }

    fn points(&self) -> &[OPoint<T, D>] {
        &self.1
    }
}

fn convert_quadrature_rule_from_1d_f64<T: Real>(quadrature: fenris_quadrature::Rule<1>) -> QuadraturePair1d<T> {
    let (weights, points) = quadrature;
    let weights = weights.into_iter().map(convert).collect();
    let points = points.into_iter().map(Point1::from).map(convert).collect();
    (weights, points)
}

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Given `n` points, the rule integrates polynomials of order up to `2n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss<T: Real>(num_points: usize) -> QuadraturePair1d<T> {
    convert_quadrature_rule_from_1d_f64(univariate::gauss(num_points))
}

/// Gauss quadrature for the unit interval [0, 1].
pub fn segment<T: Real>(num_points: usize) -> QuadraturePair1d<T> {
    let half = T::from_f64(0.5).expect("f64 must be representable in T");
    let (weights, points) = gauss::<T>(num_points);
    (
        weights.into_iter().map(|w| w * half).collect(),
        points
            .into_iter()
            .map(|p| Point1::new(half * (p.x + T::one())))
            .collect(),
    )
}

/// Quadrature rules for the unit reference triangle.
///
/// Returns a rule that integrates polynomials of total degree up to `strength` exactly. The rules
/// are the polyquad rules on the triangle `(-1, -1), (1, -1), (-1, 1)`, mapped affinely to the
/// unit simplex.
pub fn triangle<T: Real>(strength: usize) -> Result<QuadraturePair2d<T>, CutFemError> {
    let (weights, points) = polyquad::triangle(strength).map_err(|_| CutFemError::NoRuleAvailable)?;
    // The polyquad reference triangle has area 2, the unit simplex has area 1/2
    let weights = weights.into_iter().map(|w| convert(0.25 * w)).collect();
    let points = points
        .into_iter()
        .map(|[x, y]| convert(Point2::new(0.5 * (x + 1.0), 0.5 * (y + 1.0))))
        .collect();
    Ok((weights, points))
}
