use super::unit_square_space;
use fenris_cutfem::element::FiniteElement;
use fenris_cutfem::shifted::{DeformationPair, DifferentialOperator, ShiftSettings, ShiftedEvaluation, VectorEvaluation};
use fenris_cutfem::space::{GridFunction, H1Space};
use fenris_cutfem::workspace::Workspace;
use fenris_cutfem::CutFemError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, Matrix2, Point2, Vector2, U2};
use std::sync::Arc;

fn linear_field(x: &Point2<f64>) -> Vector2<f64> {
    Matrix2::new(1.0, -0.5, 0.25, 2.0) * x.coords + Vector2::new(0.1, -0.3)
}

fn reference_points() -> Vec<Point2<f64>> {
    vec![
        Point2::new(1.0 / 3.0, 1.0 / 3.0),
        Point2::new(0.1, 0.2),
        Point2::new(0.6, 0.15),
        Point2::new(0.05, 0.9),
    ]
}

#[test]
fn operator_metadata() {
    let space = unit_square_space(2, 1);
    let d = GridFunction::zeros(space, 2);
    let op = ShiftedEvaluation::new(DeformationPair::new(&d, &d).unwrap());
    assert_eq!(op.name(), "shifted_evaluation");
    assert_eq!(op.dim(), 2);
    assert_eq!(op.diff_order(), 0);
    assert_eq!(DifferentialOperator::<f64, U2>::name(&VectorEvaluation), "vector_evaluation");
    assert_eq!(DifferentialOperator::<f64, U2>::dim(&VectorEvaluation), 2);
}

#[test]
fn identical_deformations_reduce_to_plain_evaluation() {
    let space = unit_square_space(3, 1);
    let deformation =
        GridFunction::interpolate_vector(space.clone(), |x| Vector2::new(0.05 * x.y, -0.03 * x.x * x.x)).unwrap();
    let deformation_copy = deformation.clone();
    let u = GridFunction::interpolate_vector(space.clone(), |x| Vector2::new(x.x.sin(), x.x * x.y)).unwrap();
    let mut workspace = Workspace::default();

    for pair in [
        DeformationPair::new(&deformation, &deformation).unwrap(),
        DeformationPair::new(&deformation, &deformation_copy).unwrap(),
    ] {
        let op = ShiftedEvaluation::new(pair);
        for element_index in 0..space.num_elements() {
            let element = space.element(element_index).unwrap();
            let mut u_local = vec![0.0; 6];
            u.populate_element_dofs(element_index, &mut u_local).unwrap();
            for xi in reference_points() {
                let mut shifted = [0.0; 2];
                let mut plain = [0.0; 2];
                op.apply(element_index, &element, &xi, &u_local, &mut shifted, &mut workspace)
                    .unwrap();
                VectorEvaluation
                    .apply(element_index, &element, &xi, &u_local, &mut plain, &mut workspace)
                    .unwrap();
                assert_eq!(shifted, plain);
            }
        }
    }
}

#[test]
fn constant_back_shift_translates_the_evaluation_point() {
    let space = unit_square_space(2, 1);
    let c = Vector2::new(0.02, -0.01);
    let back = GridFunction::interpolate_vector(space.clone(), |_| c).unwrap();
    let forth = GridFunction::zeros(space.clone(), 2);
    let op = ShiftedEvaluation::new(DeformationPair::new(&back, &forth).unwrap());
    let u = GridFunction::interpolate_vector(space.clone(), linear_field).unwrap();
    let mut workspace = Workspace::default();

    let element_index = 3;
    let element = space.element(element_index).unwrap();
    let xi = Point2::new(0.3, 0.2);
    let x = element.map_reference_coords(&xi);

    let shifted_xi = op
        .shifted_reference_point(element_index, &element, &xi, &mut workspace)
        .unwrap();
    assert_matrix_eq!(shifted_xi.coords, Vector2::new(0.34, 0.14), comp = abs, tol = 1e-12);

    let mut u_local = vec![0.0; 6];
    u.populate_element_dofs(element_index, &mut u_local).unwrap();
    let mut flux = [0.0; 2];
    op.apply(element_index, &element, &xi, &u_local, &mut flux, &mut workspace)
        .unwrap();
    let expected = linear_field(&(x + c));
    assert_matrix_eq!(Vector2::from(flux), expected, comp = abs, tol = 1e-12);

    let value = op
        .evaluate_grid_function(&u, element_index, &xi, &mut workspace)
        .unwrap();
    assert_matrix_eq!(value, expected, comp = abs, tol = 1e-12);
}

#[test]
fn calc_matrix_is_consistent_with_apply() {
    let space = unit_square_space(2, 1);
    let back = GridFunction::interpolate_vector(space.clone(), |x| Vector2::new(0.01 * x.x, 0.02 * x.y)).unwrap();
    let forth = GridFunction::interpolate_vector(space.clone(), |x| Vector2::new(-0.01 * x.y, 0.0)).unwrap();
    let op = ShiftedEvaluation::new(DeformationPair::new(&back, &forth).unwrap());
    let mut workspace = Workspace::default();

    let element_index = 5;
    let element = space.element(element_index).unwrap();
    let xi = Point2::new(0.25, 0.25);
    let x = DVector::from_fn(6, |i, _| 0.5 + i as f64);
    let f = DVector::from_vec(vec![1.5, -0.5]);

    let mut matrix = DMatrix::zeros(0, 0);
    op.calc_matrix(element_index, &element, &xi, &mut matrix, &mut workspace)
        .unwrap();
    assert_eq!(matrix.shape(), (2, 6));

    let mut flux = DVector::zeros(2);
    op.apply(element_index, &element, &xi, x.as_slice(), flux.as_mut_slice(), &mut workspace)
        .unwrap();
    assert_matrix_eq!(&matrix * &x, flux, comp = abs, tol = 1e-14);

    let mut x_transpose = DVector::zeros(6);
    op.apply_transpose(element_index, &element, &xi, f.as_slice(), x_transpose.as_mut_slice(), &mut workspace)
        .unwrap();
    assert_matrix_eq!(matrix.transpose() * &f, x_transpose, comp = abs, tol = 1e-14);
    assert_scalar_eq!(flux.dot(&f), x.dot(&x_transpose), comp = abs, tol = 1e-13);
}

#[test]
fn local_vectors_must_match_the_element() {
    let space = unit_square_space(1, 1);
    let element = space.element(0).unwrap();
    let mut workspace = Workspace::default();
    let xi = Point2::new(0.2, 0.2);
    let mut flux = [0.0; 2];
    let result = VectorEvaluation.apply(0, &element, &xi, &[0.0; 4], &mut flux, &mut workspace);
    assert_eq!(result, Err(CutFemError::DimensionMismatch { expected: 6, actual: 4 }));
    let mut flux = [0.0; 3];
    let result = VectorEvaluation.apply(0, &element, &xi, &[0.0; 6], &mut flux, &mut workspace);
    assert_eq!(result, Err(CutFemError::DimensionMismatch { expected: 2, actual: 3 }));
}

#[test]
fn shift_leaving_the_element_falls_back_to_mesh_search() {
    let space = unit_square_space(4, 1);
    let c = Vector2::new(0.5, 0.5);
    let back = GridFunction::interpolate_vector(space.clone(), |_| c).unwrap();
    let forth = GridFunction::zeros(space.clone(), 2);
    let op = ShiftedEvaluation::new(DeformationPair::new(&back, &forth).unwrap());
    let mut workspace = Workspace::default();

    let element = space.element(0).unwrap();
    let xi = Point2::new(1.0 / 3.0, 1.0 / 3.0);
    let mut flux = [0.0; 2];
    let result = op.apply(0, &element, &xi, &[0.0; 6], &mut flux, &mut workspace);
    assert_eq!(result, Err(CutFemError::ShiftedPointOutsideElement { element_index: 0 }));

    let scalar_space = Arc::new(H1Space::new(space.mesh().clone(), 1).unwrap());
    let g = |x: &Point2<f64>| 2.0 * x.x - x.y + 0.5;
    let u = GridFunction::interpolate_scalar(scalar_space, g).unwrap();
    let value = op
        .evaluate_grid_function(&u, 0, &xi, &mut workspace)
        .unwrap();
    let x = element.map_reference_coords(&xi) + c;
    assert_eq!(value.len(), 1);
    assert_scalar_eq!(value[0], g(&x), comp = abs, tol = 1e-12);
}

#[test]
fn shift_leaving_the_mesh_is_an_error() {
    let space = unit_square_space(2, 1);
    let back = GridFunction::interpolate_vector(space.clone(), |_| Vector2::new(2.0, 0.0)).unwrap();
    let forth = GridFunction::zeros(space.clone(), 2);
    let op = ShiftedEvaluation::new(DeformationPair::new(&back, &forth).unwrap());
    let u = GridFunction::zeros(space, 2);
    let mut workspace = Workspace::default();
    let result = op.evaluate_grid_function(&u, 0, &Point2::new(0.25, 0.25), &mut workspace);
    assert_eq!(result, Err(CutFemError::PointOutsideMesh));
}

#[test]
fn iteration_limit_is_respected() {
    let space = unit_square_space(2, 1);
    let back = GridFunction::interpolate_vector(space.clone(), |_| Vector2::new(0.01, 0.01)).unwrap();
    let forth = GridFunction::zeros(space.clone(), 2);
    let settings = ShiftSettings {
        max_iterations: 0,
        ..ShiftSettings::default()
    };
    let op = ShiftedEvaluation::new(DeformationPair::new(&back, &forth).unwrap()).with_settings(settings);
    let mut workspace = Workspace::default();
    let element = space.element(2).unwrap();
    let result = op.shifted_reference_point(2, &element, &Point2::new(0.25, 0.25), &mut workspace);
    assert_eq!(result, Err(CutFemError::ShiftNotConverged { element_index: 2 }));
}

#[test]
fn evaluated_function_must_share_the_mesh() {
    let space = unit_square_space(2, 1);
    let d = GridFunction::zeros(space, 2);
    let op = ShiftedEvaluation::new(DeformationPair::new(&d, &d).unwrap());
    let other = GridFunction::zeros(unit_square_space(2, 1), 2);
    let mut workspace = Workspace::default();
    assert_eq!(
        op.evaluate_grid_function(&other, 0, &Point2::new(0.25, 0.25), &mut workspace),
        Err(CutFemError::MeshMismatch)
    );
}

#[test]
fn deformation_pair_validation() {
    let space = unit_square_space(2, 1);
    let vector = GridFunction::zeros(space.clone(), 2);
    let scalar = GridFunction::zeros(space, 1);
    assert!(matches!(
        DeformationPair::new(&scalar, &vector),
        Err(CutFemError::WrongSolutionDim { expected: 2, actual: 1 })
    ));
    assert!(matches!(
        DeformationPair::new(&vector, &scalar),
        Err(CutFemError::WrongSolutionDim { expected: 2, actual: 1 })
    ));
    let other_mesh = GridFunction::zeros(unit_square_space(2, 1), 2);
    assert!(matches!(
        DeformationPair::new(&vector, &other_mesh),
        Err(CutFemError::MeshMismatch)
    ));
}
