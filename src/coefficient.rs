//! Scalar coefficient functions.
use crate::Real;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, OPoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use std::ops::Deref;

/// A scalar function of space that can be evaluated at arbitrary physical points.
pub trait CoefficientFunction<T, D>: Send + Sync
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn evaluate(&self, x: &OPoint<T, D>) -> T;

    /// Returns the value of the function if it is constant.
    ///
    /// The default implementation returns `None`, i.e. the function is treated as non-constant.
    fn evaluate_const(&self) -> Option<T> {
        None
    }
}

impl<T, D, C> CoefficientFunction<T, D> for &C
where
    T: Real,
    D: DimName,
    C: CoefficientFunction<T, D> + ?Sized,
    DefaultAllocator: Allocator<T, D>,
{
    fn evaluate(&self, x: &OPoint<T, D>) -> T {
        C::evaluate(self, x)
    }

    fn evaluate_const(&self) -> Option<T> {
        C::evaluate_const(self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantCoefficient<T>(pub T);

impl<T, D> CoefficientFunction<T, D> for ConstantCoefficient<T>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn evaluate(&self, _x: &OPoint<T, D>) -> T {
        self.0
    }

    fn evaluate_const(&self) -> Option<T> {
        Some(self.0)
    }
}

/// Wraps a closure as a (non-constant) coefficient function.
#[derive(Copy, Clone)]
pub struct FnCoefficient<F>(pub F);

impl<F> Debug for FnCoefficient<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnCoefficient")
    }
}

impl<T, D, F> CoefficientFunction<T, D> for FnCoefficient<F>
where
    T: Real,
    D: DimName,
    F: Fn(&OPoint<T, D>) -> T + Send + Sync,
    DefaultAllocator: Allocator<T, D>,
{
    fn evaluate(&self, x: &OPoint<T, D>) -> T {
        (self.0)(x)
    }
}

/// A coefficient that is either owned or borrowed from the caller.
pub enum Coefficient<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    Owned(Box<dyn CoefficientFunction<T, D> + 'a>),
    Borrowed(&'a dyn CoefficientFunction<T, D>),
}

impl<'a, T, D> Coefficient<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn owned(coefficient: impl CoefficientFunction<T, D> + 'a) -> Self {
        Self::Owned(Box::new(coefficient))
    }

    pub fn constant(value: T) -> Self {
        Self::owned(ConstantCoefficient(value))
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl<'a, T, D> Deref for Coefficient<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    type Target = dyn CoefficientFunction<T, D> + 'a;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(coefficient) => coefficient.as_ref(),
            Self::Borrowed(coefficient) => *coefficient,
        }
    }
}

impl<'a, T, D> From<&'a dyn CoefficientFunction<T, D>> for Coefficient<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn from(coefficient: &'a dyn CoefficientFunction<T, D>) -> Self {
        Self::Borrowed(coefficient)
    }
}

impl<'a, T, D> Debug for Coefficient<'a, T, D>
where
    T: Real,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_owned() { "Owned" } else { "Borrowed" };
        match self.evaluate_const() {
            Some(value) => write!(f, "Coefficient::{}({:?})", kind, value),
            None => write!(f, "Coefficient::{}(..)", kind),
        }
    }
}

/// A pair of values, one for each side of an interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoSided<T> {
    pub neg: T,
    pub pos: T,
}

impl<T> TwoSided<T> {
    pub fn new(neg: T, pos: T) -> Self {
        Self { neg, pos }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> TwoSided<U> {
        TwoSided {
            neg: f(self.neg),
            pos: f(self.pos),
        }
    }
}

impl<T: Copy + std::ops::Add<Output = T>> TwoSided<T> {
    pub fn sum(&self) -> T {
        self.neg + self.pos
    }
}
