//! Unfitted finite element building blocks.
//!
//! The crate provides the element-local machinery needed for cut-cell (unfitted) finite element
//! discretizations, where an interface is described implicitly by the zero set of a level set
//! function rather than by the mesh:
//!
//! - [`level_set::LevelSetCurver`] re-approximates a level set by a P1 function whose nodal values
//!   are bounded away from zero,
//! - [`shifted::ShiftedEvaluation`] evaluates finite element functions at points mapped between
//!   two deformed configurations of the same mesh,
//! - [`nitsche::InterfaceNitscheIntegrator`] and
//!   [`space_time::SpaceTimeInterfaceNitscheIntegrator`] assemble Nitsche coupling terms across
//!   the interface of a cut element.
use nalgebra::{DimMin, DimName, RealField};

pub mod allocators;
pub mod assembly;
pub mod coefficient;
pub mod cut;
pub mod element;
pub mod error;
pub mod level_set;
pub mod mesh;
pub mod nitsche;
pub mod quadrature;
pub mod shifted;
pub mod space;
pub mod space_time;
pub mod workspace;

pub use error::CutFemError;

pub extern crate nalgebra;

/// Real scalar types supported by the crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// A small, fixed-size dimension.
///
/// Used as a trait alias for various traits frequently needed by generic routines.
pub trait SmallDim: DimName + DimMin<Self, Output = Self> {}

impl<D> SmallDim for D where D: DimName + DimMin<Self, Output = Self> {}
