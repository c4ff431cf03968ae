//! Library-wide error type.
use thiserror::Error;

/// Errors produced by the cut finite element integrators and their host-side helpers.
///
/// The variants fall into three groups:
///
/// - configuration mismatches (wrong mesh, order or coefficients), reported at construction or at
///   the start of assembly,
/// - geometric failures (singular Jacobians, a Newton shift that does not converge),
/// - out-of-domain evaluation, which is never clamped silently.
///
/// Degenerate cut decompositions are *not* errors: integrators produce a zero contribution instead.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CutFemError {
    #[error("source and target fields are not defined on the same mesh")]
    MeshMismatch,
    #[error("expected a field of polynomial order {expected}, got order {actual}")]
    WrongOrder { expected: usize, actual: usize },
    #[error("polynomial order {0} is not supported")]
    UnsupportedOrder(usize),
    #[error("expected a field with {expected} component(s), got {actual}")]
    WrongSolutionDim { expected: usize, actual: usize },
    #[error("local vector or matrix has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("required coefficient `{0}` was not supplied")]
    MissingCoefficient(&'static str),
    #[error("coefficient `{0}` must be constant")]
    NonConstantCoefficient(&'static str),
    #[error("coefficient `{name}` must be positive and finite, but evaluates to {value}")]
    InvalidCoefficient { name: &'static str, value: f64 },
    #[error("unknown kappa choice `{0}`")]
    UnknownKappaChoice(String),
    #[error("invalid time interval [{t0}, {t1}): the end must not precede the start")]
    InvalidTimeInterval { t0: f64, t1: f64 },
    #[error("perturbation threshold must be non-negative and finite, got {0}")]
    InvalidPerturbation(f64),
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
    #[error("element index {0} is out of bounds")]
    ElementOutOfBounds(usize),
    #[error("singular element Jacobian encountered in element {0}")]
    SingularJacobian(usize),
    #[error("shifted evaluation point lies outside element {element_index}")]
    ShiftedPointOutsideElement { element_index: usize },
    #[error("Newton iteration for the shifted point in element {element_index} did not converge")]
    ShiftNotConverged { element_index: usize },
    #[error("point lies outside the mesh")]
    PointOutsideMesh,
    #[error("there is no quadrature rule satisfying the requirements available")]
    NoRuleAvailable,
}

/// Converts a generic real to `f64` for error reporting.
pub(crate) fn real_to_f64<T: crate::Real>(value: T) -> f64 {
    value.to_subset().unwrap_or(f64::NAN)
}
