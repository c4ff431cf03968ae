use super::p1_level_set;
use fenris_cutfem::coefficient::TwoSided;
use fenris_cutfem::cut::{CutGeometryProvider, DomainType, ElementCutDecomposition, TriangleCutter};
use fenris_cutfem::element::SimplexElement;
use fenris_cutfem::nitsche::{InterfaceNitscheIntegrator, KappaChoice, NitscheCoefficients, NitscheConstants};
use fenris_cutfem::quadrature::segment;
use fenris_cutfem::space_time::{
    SpaceTimeCutDecomposition, SpaceTimeInterfaceNitscheIntegrator, TimeBasis, TimeInterval,
};
use fenris_cutfem::workspace::Workspace;
use fenris_cutfem::CutFemError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, Point2, Vector2, U2};

fn constants(beta: (f64, f64), lambda: Option<f64>) -> NitscheConstants<f64> {
    NitscheConstants {
        alpha: TwoSided::new(1.0, 3.0),
        beta: TwoSided::new(beta.0, beta.1),
        lambda,
    }
}

/// A cut element of a P1 level set together with its spatial decomposition.
fn cut_element() -> (SimplexElement<f64, U2>, ElementCutDecomposition<f64, U2>) {
    let level_set = p1_level_set(3, |x| x.x + 0.5 * x.y - 0.6);
    let cutter = TriangleCutter::new(&level_set, 2).unwrap();
    (0..cutter.num_elements())
        .find_map(|e| {
            let decomposition = cutter.element_decomposition(e).unwrap();
            (decomposition.domain_type() == DomainType::If).then(|| (level_set.element(e).unwrap(), decomposition))
        })
        .unwrap()
}

fn spatial_matrix(constants: NitscheConstants<f64>) -> DMatrix<f64> {
    let (element, decomposition) = cut_element();
    let integrator = InterfaceNitscheIntegrator::from_constants(constants, KappaChoice::Hansbo).unwrap();
    let mut output = DMatrix::zeros(0, 0);
    integrator
        .assemble_element_matrix(0, &element, &decomposition, &mut output, &mut Workspace::default())
        .unwrap();
    output
}

#[test]
fn time_interval() {
    let interval = TimeInterval::new(0.5, 1.25).unwrap();
    assert_eq!(interval.t0(), 0.5);
    assert_eq!(interval.t1(), 1.25);
    assert_eq!(interval.tau(), 0.75);
    assert_eq!(interval.map_reference_time(0.5), 0.875);
    assert_eq!(TimeInterval::new(1.0, 1.0).unwrap().tau(), 0.0);
    assert_eq!(
        TimeInterval::new(2.0, 1.0),
        Err(CutFemError::InvalidTimeInterval { t0: 2.0, t1: 1.0 })
    );
    assert!(matches!(
        TimeInterval::new(0.0, f64::NAN),
        Err(CutFemError::InvalidTimeInterval { .. })
    ));
}

#[test]
fn time_basis() {
    let constant = TimeBasis::<f64>::new(0);
    assert_eq!(constant.num_functions(), 1);
    let mut value = [0.0];
    constant.populate_values(&mut value, 0.7);
    assert_eq!(value, [1.0]);

    let quadratic = TimeBasis::<f64>::new(2);
    assert_eq!(quadratic.order(), 2);
    assert_eq!(quadratic.nodes(), &[0.0, 0.5, 1.0]);
    let mut values = [0.0; 3];
    for (l, &s) in quadratic.nodes().iter().enumerate() {
        quadratic.populate_values(&mut values, s);
        for (m, &v) in values.iter().enumerate() {
            assert_scalar_eq!(v, if l == m { 1.0 } else { 0.0 }, comp = abs, tol = 1e-14);
        }
    }
    for s in [0.1, 0.33, 0.8] {
        quadratic.populate_values(&mut values, s);
        assert_scalar_eq!(values.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
    }
}

#[test]
fn lambda_is_required() {
    let coefficients = NitscheCoefficients::<f64, U2>::constant(TwoSided::new(1.0, 1.0), TwoSided::new(1.0, 1.0), None);
    assert_eq!(
        SpaceTimeInterfaceNitscheIntegrator::new(&coefficients, KappaChoice::HalfHalf, 1),
        Err(CutFemError::MissingCoefficient("lambda"))
    );
    assert_eq!(
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((1.0, 1.0), None), KappaChoice::HalfHalf, 1),
        Err(CutFemError::MissingCoefficient("lambda"))
    );

    let coefficients =
        NitscheCoefficients::<f64, U2>::constant(TwoSided::new(1.0, 1.0), TwoSided::new(1.0, 1.0), Some(5.0));
    let integrator = SpaceTimeInterfaceNitscheIntegrator::new(&coefficients, KappaChoice::HalfHalf, 1).unwrap();
    assert_eq!(integrator.time_basis().num_functions(), 2);
    assert_eq!(integrator.num_element_unknowns(3), 12);
    assert_eq!(integrator.kappa_choice(), KappaChoice::HalfHalf);
}

#[test]
fn slab_set_from_coefficients_and_explicitly() {
    let (element, spatial) = cut_element();
    let decomposition = SpaceTimeCutDecomposition::extrude(&spatial, &segment(1));
    let mut workspace = Workspace::default();
    let mut output = DMatrix::zeros(0, 0);

    let integrator =
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((0.5, 1.5), Some(10.0)), KappaChoice::Beta, 0)
            .unwrap();
    assert_eq!(integrator.time_interval(), Some(&TimeInterval::new(0.5, 1.5).unwrap()));
    assert_eq!(integrator.tau(), Some(1.0));

    let mut integrator =
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((2.0, 1.0), Some(10.0)), KappaChoice::Beta, 0)
            .unwrap();
    assert_eq!(integrator.time_interval(), None);
    assert_eq!(
        integrator.assemble_element_matrix_in_slab(0, &element, &decomposition, &mut output, &mut workspace),
        Err(CutFemError::InvalidTimeInterval { t0: 2.0, t1: 1.0 })
    );

    let interval = TimeInterval::new(0.0, 0.1).unwrap();
    integrator.set_time_interval(interval);
    assert_eq!(integrator.tau(), Some(0.1));
    integrator
        .assemble_element_matrix_in_slab(0, &element, &decomposition, &mut output, &mut workspace)
        .unwrap();
    let mut explicit = DMatrix::zeros(0, 0);
    integrator
        .assemble_element_matrix(0, &element, &decomposition, &interval, &mut explicit, &mut workspace)
        .unwrap();
    assert_eq!(output, explicit);
}

#[test]
fn slab_starting_at_zero_must_be_set_explicitly() {
    let result =
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((0.0, 1.0), Some(10.0)), KappaChoice::Beta, 1);
    assert!(matches!(
        result,
        Err(CutFemError::InvalidCoefficient { name: "beta_neg", .. })
    ));

    let mut integrator =
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((0.5, 1.5), Some(10.0)), KappaChoice::Beta, 1)
            .unwrap();
    integrator.set_time_interval(TimeInterval::new(0.0, 1.0).unwrap());
    assert_eq!(integrator.time_interval(), Some(&TimeInterval::new(0.0, 1.0).unwrap()));
    assert_eq!(integrator.constants().beta, TwoSided::new(0.5, 1.5));
}

#[test]
fn constant_in_time_basis_reproduces_scaled_spatial_matrix() {
    let (element, spatial) = cut_element();
    let constants = constants((1.0, 2.0), Some(20.0));
    let expected = spatial_matrix(constants) * 0.25;

    let integrator = SpaceTimeInterfaceNitscheIntegrator::from_constants(constants, KappaChoice::Hansbo, 0).unwrap();
    let decomposition = SpaceTimeCutDecomposition::extrude(&spatial, &segment(2));
    let interval = TimeInterval::new(1.0, 1.25).unwrap();
    let mut output = DMatrix::zeros(0, 0);
    integrator
        .assemble_element_matrix(0, &element, &decomposition, &interval, &mut output, &mut Workspace::default())
        .unwrap();
    assert_eq!(output.shape(), (6, 6));
    assert_matrix_eq!(output, expected, comp = abs, tol = 1e-12);
}

#[test]
fn stationary_interface_with_linear_time_basis_has_tensor_structure() {
    let (element, spatial) = cut_element();
    let constants = constants((1.0, 2.0), Some(20.0));
    let spatial_matrix = spatial_matrix(constants);
    let time_mass = [[1.0 / 3.0, 1.0 / 6.0], [1.0 / 6.0, 1.0 / 3.0]];
    let (n, n_t) = (3, 2);
    let tau = 0.5;

    let integrator = SpaceTimeInterfaceNitscheIntegrator::from_constants(constants, KappaChoice::Hansbo, 1).unwrap();
    let decomposition = SpaceTimeCutDecomposition::extrude(&spatial, &segment(2));
    let interval = TimeInterval::new(0.0, tau).unwrap();
    let mut output = DMatrix::zeros(0, 0);
    integrator
        .assemble_element_matrix(0, &element, &decomposition, &interval, &mut output, &mut Workspace::default())
        .unwrap();
    assert_eq!(output.shape(), (12, 12));

    let expected = DMatrix::from_fn(12, 12, |r, c| {
        let (side_r, l, i) = (r / (n * n_t), (r / n) % n_t, r % n);
        let (side_c, m, j) = (c / (n * n_t), (c / n) % n_t, c % n);
        tau * time_mass[l][m] * spatial_matrix[(side_r * n + i, side_c * n + j)]
    });
    assert_matrix_eq!(output, expected, comp = abs, tol = 1e-12);
}

#[test]
fn empty_space_time_interface_gives_zero_matrix() {
    let (element, _) = cut_element();
    let decomposition =
        SpaceTimeCutDecomposition::new(TwoSided::new(0.1, 0.0), Vec::new(), Vec::new(), Vec::new(), Vec::new());
    assert!(decomposition.is_interface_empty());
    let integrator =
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((1.0, 1.0), Some(1.0)), KappaChoice::Hansbo, 2)
            .unwrap();
    let mut output = DMatrix::repeat(1, 1, 7.0);
    integrator
        .assemble_element_matrix(
            0,
            &element,
            &decomposition,
            &TimeInterval::new(0.0, 1.0).unwrap(),
            &mut output,
            &mut Workspace::default(),
        )
        .unwrap();
    assert_eq!(output.shape(), (18, 18));
    assert!(output.iter().all(|&v| v == 0.0));
}

#[test]
fn kappa_uses_space_time_measures() {
    let decomposition =
        SpaceTimeCutDecomposition::<f64, U2>::new(TwoSided::new(0.2, 0.6), Vec::new(), Vec::new(), Vec::new(), Vec::new());
    let integrator =
        SpaceTimeInterfaceNitscheIntegrator::from_constants(constants((1.0, 1.0), Some(1.0)), KappaChoice::Hansbo, 1)
            .unwrap();
    let kappa = integrator.kappa(&decomposition);
    assert_scalar_eq!(kappa.neg, 0.25, comp = abs, tol = 1e-15);
    assert_scalar_eq!(kappa.pos, 0.75, comp = abs, tol = 1e-15);
}

#[test]
fn extruded_decomposition() {
    let (_, spatial) = cut_element();
    let time_rule = segment(3);
    let decomposition = SpaceTimeCutDecomposition::extrude(&spatial, &time_rule);
    let num_spatial = spatial.interface().len();
    assert_eq!(decomposition.weights().len(), 3 * num_spatial);
    assert_eq!(decomposition.points().len(), 3 * num_spatial);
    assert_eq!(decomposition.normals().len(), 3 * num_spatial);
    assert!(decomposition.times().iter().all(|&s| s > 0.0 && s < 1.0));
    let total: f64 = decomposition.weights().iter().sum();
    assert_scalar_eq!(total, spatial.interface().measure(), comp = abs, tol = 1e-14);
    assert_scalar_eq!(decomposition.measures().neg, spatial.negative_volume(), comp = abs, tol = 1e-14);
    assert_scalar_eq!(decomposition.measures().pos, spatial.positive_volume(), comp = abs, tol = 1e-14);
}

/// A P1 triangle with vertices `(0, 0)`, `(2, 0)` and `(0, 1)`, whose physical basis gradients
/// are constant.
fn stretched_triangle() -> SimplexElement<f64, U2> {
    SimplexElement::from_vertices(vec![Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), Point2::new(0.0, 1.0)], 1)
}

const STRETCHED_TRIANGLE_GRADIENTS: [[f64; 2]; 3] = [[-0.5, -1.0], [0.5, 0.0], [0.0, 1.0]];

/// An interface that moves and turns over the slab, sampled at two space-time points.
fn moving_interface(measures: TwoSided<f64>) -> SpaceTimeCutDecomposition<f64, U2> {
    SpaceTimeCutDecomposition::new(
        measures,
        vec![0.3, 0.2],
        vec![Point2::new(0.2, 0.3), Point2::new(0.4, 0.1)],
        vec![0.25, 0.75],
        vec![Vector2::new(1.0, 0.0), Vector2::new(0.6, 0.8)],
    )
}

#[test]
fn moving_interface_matches_hand_assembled_matrix() {
    let element = stretched_triangle();
    let decomposition = moving_interface(TwoSided::new(0.1, 0.3));
    let constants = constants((1.0, 2.0), Some(20.0));
    let integrator = SpaceTimeInterfaceNitscheIntegrator::from_constants(constants, KappaChoice::Hansbo, 1).unwrap();
    let kappa = integrator.kappa(&decomposition);
    assert_scalar_eq!(kappa.neg, 0.25, comp = abs, tol = 1e-15);
    assert_scalar_eq!(kappa.pos, 0.75, comp = abs, tol = 1e-15);

    let interval = TimeInterval::new(0.5, 1.0).unwrap();
    let mut output = DMatrix::zeros(0, 0);
    integrator
        .assemble_element_matrix(0, &element, &decomposition, &interval, &mut output, &mut Workspace::default())
        .unwrap();
    assert_eq!(output.shape(), (12, 12));

    let tau = 0.5;
    let (beta_neg, beta_pos) = (1.0, 2.0);
    let (kappa_alpha_neg, kappa_alpha_pos) = (0.25 * 1.0, 0.75 * 3.0);
    let gamma = 20.0 * (kappa_alpha_neg + kappa_alpha_pos) / 5.0f64.sqrt();
    let mut expected = DMatrix::<f64>::zeros(12, 12);
    for q in 0..2 {
        let w = decomposition.weights()[q];
        let xi = decomposition.points()[q];
        let s = decomposition.times()[q];
        let normal = decomposition.normals()[q];
        let phi = [1.0 - xi.x - xi.y, xi.x, xi.y];
        let psi = [1.0 - s, s];
        let mut jump = DVector::<f64>::zeros(12);
        let mut flux = DVector::<f64>::zeros(12);
        for l in 0..2 {
            for i in 0..3 {
                let [gx, gy] = STRETCHED_TRIANGLE_GRADIENTS[i];
                let dn = gx * normal.x + gy * normal.y;
                jump[3 * l + i] = beta_neg * phi[i] * psi[l];
                jump[6 + 3 * l + i] = -beta_pos * phi[i] * psi[l];
                flux[3 * l + i] = kappa_alpha_neg * dn * psi[l];
                flux[6 + 3 * l + i] = kappa_alpha_pos * dn * psi[l];
            }
        }
        expected -= (&flux * jump.transpose() + &jump * flux.transpose()) * (w * tau);
        expected += &jump * jump.transpose() * (gamma * w * tau);
    }
    assert_matrix_eq!(output, expected, comp = abs, tol = 1e-12);
}

#[test]
fn moving_interface_with_equal_coefficients_is_symmetric_and_preserves_constants() {
    let element = stretched_triangle();
    // The measures only enter through kappa, which is fixed by HalfHalf
    let decomposition = moving_interface(TwoSided::new(0.05, 0.45));
    let constants = NitscheConstants {
        alpha: TwoSided::new(2.0, 2.0),
        beta: TwoSided::new(1.5, 1.5),
        lambda: Some(10.0),
    };
    let integrator = SpaceTimeInterfaceNitscheIntegrator::from_constants(constants, KappaChoice::HalfHalf, 2).unwrap();
    let interval = TimeInterval::new(1.0, 1.2).unwrap();
    let mut output = DMatrix::zeros(0, 0);
    integrator
        .assemble_element_matrix(0, &element, &decomposition, &interval, &mut output, &mut Workspace::default())
        .unwrap();
    assert_eq!(output.shape(), (18, 18));
    assert!(output.amax() > 0.0);
    assert_matrix_eq!(output, output.transpose(), comp = abs, tol = 1e-12);

    // A function that is one everywhere has no jump when both betas agree
    let ones = DVector::repeat(18, 1.0);
    assert_matrix_eq!(&output * &ones, DVector::<f64>::zeros(18), comp = abs, tol = 1e-12);
}
