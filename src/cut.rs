//! Cut element geometry.
//!
//! A level set `φ` splits every element into a negative region `{φ < 0}`, a positive region
//! `{φ > 0}` and the interface `{φ = 0}` between them. The integrators in this crate consume the
//! quadrature rules of this decomposition through [`CutGeometryProvider`], and never construct
//! them themselves. [`TriangleCutter`] provides the decomposition for piecewise linear level sets
//! on triangle meshes.
use crate::allocators::DimAllocator;
use crate::element::{FiniteElement, SimplexElement};
use crate::error::CutFemError;
use crate::quadrature::{self, Quadrature, QuadraturePair, QuadraturePair1d, QuadraturePair2d};
use crate::space::GridFunction;
use crate::{Real, SmallDim};
use fixedbitset::FixedBitSet;
use log::debug;
use nalgebra::{DefaultAllocator, Matrix2, OPoint, OVector, Point2, Vector2, U2};
use serde::{Deserialize, Serialize};

/// The location of an element relative to the interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainType {
    /// The element lies entirely in the negative region.
    Neg,
    /// The element lies entirely in the positive region.
    Pos,
    /// The element is cut by the interface.
    If,
}

impl DomainType {
    /// Classifies an element by the level set values at its vertices.
    ///
    /// Values are considered negative if they are strictly less than zero.
    pub fn from_vertex_values<T: Real>(values: impl IntoIterator<Item = T>) -> Self {
        let (mut any_neg, mut any_pos) = (false, false);
        for value in values {
            if value < T::zero() {
                any_neg = true;
            } else {
                any_pos = true;
            }
        }
        match (any_neg, any_pos) {
            (true, true) => DomainType::If,
            (true, false) => DomainType::Neg,
            _ => DomainType::Pos,
        }
    }
}

/// Quadrature on the interface part of an element.
///
/// Points are given in reference coordinates of the element, weights are physical surface
/// measures, and normals are physical unit vectors pointing from the negative into the positive
/// region.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceQuadrature<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    weights: Vec<T>,
    points: Vec<OPoint<T, D>>,
    normals: Vec<OVector<T, D>>,
}

impl<T, D> InterfaceQuadrature<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// # Panics
    ///
    /// Panics if the three lists do not have the same length.
    pub fn from_points_and_normals(weights: Vec<T>, points: Vec<OPoint<T, D>>, normals: Vec<OVector<T, D>>) -> Self {
        assert_eq!(weights.len(), points.len(), "Must have as many weights as points");
        assert_eq!(weights.len(), normals.len(), "Must have as many weights as normals");
        Self {
            weights,
            points,
            normals,
        }
    }

    pub fn empty() -> Self {
        Self::from_points_and_normals(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn points(&self) -> &[OPoint<T, D>] {
        &self.points
    }

    pub fn normals(&self) -> &[OVector<T, D>] {
        &self.normals
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// The total measure of the interface.
    pub fn measure(&self) -> T {
        self.weights.iter().fold(T::zero(), |acc, &w| acc + w)
    }
}

/// The decomposition of a single element into a negative region, a positive region and the
/// interface between them.
///
/// Region quadrature points are given in reference coordinates of the element, with weights that
/// are physical volume measures.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCutDecomposition<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    negative: QuadraturePair<T, D>,
    positive: QuadraturePair<T, D>,
    interface: InterfaceQuadrature<T, D>,
}

impl<T, D> ElementCutDecomposition<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(
        negative: QuadraturePair<T, D>,
        positive: QuadraturePair<T, D>,
        interface: InterfaceQuadrature<T, D>,
    ) -> Self {
        Self {
            negative,
            positive,
            interface,
        }
    }

    pub fn negative(&self) -> &QuadraturePair<T, D> {
        &self.negative
    }

    pub fn positive(&self) -> &QuadraturePair<T, D> {
        &self.positive
    }

    pub fn interface(&self) -> &InterfaceQuadrature<T, D> {
        &self.interface
    }

    pub fn negative_volume(&self) -> T {
        self.negative.integrate(|_| T::one())
    }

    pub fn positive_volume(&self) -> T {
        self.positive.integrate(|_| T::one())
    }

    pub fn domain_type(&self) -> DomainType {
        if !self.interface.is_empty() {
            DomainType::If
        } else if self.positive.weights().is_empty() {
            DomainType::Neg
        } else {
            DomainType::Pos
        }
    }
}

/// Supplies the cut decomposition of the elements of a mesh.
pub trait CutGeometryProvider<T, D>: Sync
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn num_elements(&self) -> usize;

    fn element_decomposition(&self, element_index: usize) -> Result<ElementCutDecomposition<T, D>, CutFemError>;
}

/// Cuts triangles along the zero line of a continuous piecewise linear level set.
///
/// In a cut triangle, the single vertex on one side of the interface spans a triangle with the two
/// edge intersection points, and the remaining quadrilateral is split into two triangles.
/// Each sub-triangle receives a mapped copy of a symmetric triangle rule, and the interface
/// segment receives a Gauss rule.
#[derive(Debug, Clone)]
pub struct TriangleCutter<'a, T: Real> {
    level_set: &'a GridFunction<T, U2>,
    region_rule: QuadraturePair2d<T>,
    interface_rule: QuadraturePair1d<T>,
}

impl<'a, T: Real> TriangleCutter<'a, T> {
    /// Creates a cutter with exact rules for polynomials of the given degree.
    pub fn new(level_set: &'a GridFunction<T, U2>, strength: usize) -> Result<Self, CutFemError> {
        if level_set.order() != 1 {
            return Err(CutFemError::WrongOrder {
                expected: 1,
                actual: level_set.order(),
            });
        }
        level_set.check_solution_dim(1)?;
        Ok(Self {
            level_set,
            region_rule: quadrature::triangle(strength)?,
            interface_rule: quadrature::segment(strength / 2 + 1),
        })
    }

    pub fn level_set(&self) -> &'a GridFunction<T, U2> {
        self.level_set
    }

    fn vertex_values(&self, element_index: usize) -> [T; 3] {
        let mesh = self.level_set.mesh();
        let cell = mesh.cell_vertices(element_index);
        let u = self.level_set.coefficients();
        [u[cell[0]], u[cell[1]], u[cell[2]]]
    }

    /// Appends the region rule mapped to the sub-triangle with the given reference vertices.
    fn push_sub_triangle(&self, rule: &mut QuadraturePair2d<T>, vertices: [Point2<T>; 3], jacobian_det: T) {
        let [v0, v1, v2] = vertices;
        let a = Matrix2::from_columns(&[v1 - v0, v2 - v0]);
        let scale = a.determinant().abs() * jacobian_det;
        for (&w, xi) in self.region_rule.weights().iter().zip(self.region_rule.points()) {
            rule.0.push(w * scale);
            rule.1.push(v0 + a * xi.coords);
        }
    }
}

impl<'a, T: Real> CutGeometryProvider<T, U2> for TriangleCutter<'a, T> {
    fn num_elements(&self) -> usize {
        self.level_set.mesh().num_cells()
    }

    fn element_decomposition(&self, element_index: usize) -> Result<ElementCutDecomposition<T, U2>, CutFemError> {
        let mesh = self.level_set.mesh();
        let element = mesh.element(element_index)?;
        let jacobian = element.reference_jacobian(&Point2::origin());
        let jacobian_det = jacobian.determinant().abs();
        let values = self.vertex_values(element_index);
        let reference_vertices: Vec<Point2<T>> = SimplexElement::<T, U2>::reference(1).vertices().to_vec();

        let mut negative = (Vec::new(), Vec::new());
        let mut positive = (Vec::new(), Vec::new());

        let is_negative = values.map(|v| v < T::zero());
        let num_negative = is_negative.iter().filter(|&&neg| neg).count();
        if num_negative == 0 || num_negative == 3 {
            let region = if num_negative == 0 { &mut positive } else { &mut negative };
            let vertices = [reference_vertices[0], reference_vertices[1], reference_vertices[2]];
            self.push_sub_triangle(region, vertices, jacobian_det);
            return Ok(ElementCutDecomposition::new(negative, positive, InterfaceQuadrature::empty()));
        }

        // The lone vertex is the only one on its side of the interface
        let lone_is_negative = num_negative == 1;
        let a = (0..3)
            .find(|&i| is_negative[i] == lone_is_negative)
            .ok_or_else(|| CutFemError::InvalidMesh(format!("inconsistent signs in element {}", element_index)))?;
        let (b, c) = ((a + 1) % 3, (a + 2) % 3);
        let edge_intersection = |other: usize| {
            let t = values[a] / (values[a] - values[other]);
            reference_vertices[a] + (reference_vertices[other] - reference_vertices[a]) * t
        };
        let p1 = edge_intersection(b);
        let p2 = edge_intersection(c);

        let (lone, rest) = if lone_is_negative {
            (&mut negative, &mut positive)
        } else {
            (&mut positive, &mut negative)
        };
        self.push_sub_triangle(lone, [reference_vertices[a], p1, p2], jacobian_det);
        self.push_sub_triangle(rest, [p1, reference_vertices[b], reference_vertices[c]], jacobian_det);
        self.push_sub_triangle(rest, [p1, reference_vertices[c], p2], jacobian_det);

        // The level set is linear, so its gradient and the normal are constant on the element
        let reference_gradient = Vector2::new(values[1] - values[0], values[2] - values[0]);
        let gradient = jacobian
            .try_inverse()
            .ok_or(CutFemError::SingularJacobian(element_index))?
            .transpose()
            * reference_gradient;
        let normal = gradient.normalize();

        let segment_length = (jacobian * (p2 - p1)).norm();
        let (weights, points): (Vec<_>, Vec<_>) = self
            .interface_rule
            .weights()
            .iter()
            .zip(self.interface_rule.points())
            .map(|(&w, s)| (w * segment_length, p1 + (p2 - p1) * s.x))
            .unzip();
        let normals = vec![normal; weights.len()];

        Ok(ElementCutDecomposition::new(
            negative,
            positive,
            InterfaceQuadrature::from_points_and_normals(weights, points, normals),
        ))
    }
}

/// Classification of all elements of a triangle mesh with respect to a P1 level set.
#[derive(Debug, Clone, PartialEq)]
pub struct CutInfo<T> {
    domain_types: Vec<DomainType>,
    negative_volume_ratios: Vec<T>,
}

impl<T: Real> CutInfo<T> {
    pub fn new(level_set: &GridFunction<T, U2>) -> Result<Self, CutFemError> {
        let cutter = TriangleCutter::new(level_set, 1)?;
        let num_elements = cutter.num_elements();
        let mut domain_types = Vec::with_capacity(num_elements);
        let mut negative_volume_ratios = Vec::with_capacity(num_elements);
        for element_index in 0..num_elements {
            domain_types.push(DomainType::from_vertex_values(cutter.vertex_values(element_index)));
            let decomposition = cutter.element_decomposition(element_index)?;
            let negative = decomposition.negative_volume();
            let total = negative + decomposition.positive_volume();
            negative_volume_ratios.push(if total > T::zero() { negative / total } else { T::zero() });
        }

        let info = Self {
            domain_types,
            negative_volume_ratios,
        };
        debug!(
            "Classified {} elements: {} negative, {} positive, {} cut",
            num_elements,
            info.elements_of_type(DomainType::Neg).count_ones(..),
            info.elements_of_type(DomainType::Pos).count_ones(..),
            info.elements_of_type(DomainType::If).count_ones(..)
        );
        Ok(info)
    }

    pub fn num_elements(&self) -> usize {
        self.domain_types.len()
    }

    pub fn domain_types(&self) -> &[DomainType] {
        &self.domain_types
    }

    /// The fraction of each element's volume that lies in the negative region.
    pub fn negative_volume_ratios(&self) -> &[T] {
        &self.negative_volume_ratios
    }

    pub fn elements_of_type(&self, domain_type: DomainType) -> FixedBitSet {
        let mut elements = FixedBitSet::with_capacity(self.domain_types.len());
        for (i, &dt) in self.domain_types.iter().enumerate() {
            elements.set(i, dt == domain_type);
        }
        elements
    }
}
