use super::p1_level_set;
use fenris_cutfem::allocators::DimAllocator;
use fenris_cutfem::assembly::{assemble_element_matrices, par_assemble_element_matrices, ElementMatrixAssembler, NitscheElementAssembler};
use fenris_cutfem::coefficient::TwoSided;
use fenris_cutfem::cut::{
    CutGeometryProvider, CutInfo, DomainType, ElementCutDecomposition, InterfaceQuadrature, TriangleCutter,
};
use fenris_cutfem::mesh::procedural::create_unit_box_uniform_tet_mesh_3d;
use fenris_cutfem::nitsche::{InterfaceNitscheIntegrator, KappaChoice, NitscheConstants};
use fenris_cutfem::space::H1Space;
use fenris_cutfem::workspace::Workspace;
use fenris_cutfem::{CutFemError, SmallDim};
use matrixcompare::assert_matrix_eq;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DefaultAllocator, Point2, Point3, Vector3, U3};
use std::sync::Arc;

fn integrator(lambda: Option<f64>) -> InterfaceNitscheIntegrator<f64> {
    let constants = NitscheConstants {
        alpha: TwoSided::new(1.0, 10.0),
        beta: TwoSided::new(1.0, 2.0),
        lambda,
    };
    InterfaceNitscheIntegrator::from_constants(constants, KappaChoice::AlphaBeta).unwrap()
}

#[test]
fn cut_elements_match_cut_info() {
    let level_set = p1_level_set(8, |x| (x - Point2::new(0.5, 0.5)).norm() - 0.3);
    let space = H1Space::new(level_set.mesh().clone(), 1).unwrap();
    let cutter = TriangleCutter::new(&level_set, 2).unwrap();
    let integrator = integrator(Some(10.0));
    let assembler = NitscheElementAssembler::new(&space, &cutter, &integrator);

    let cut_elements = assembler.cut_elements().unwrap();
    let info = CutInfo::new(&level_set).unwrap();
    let expected: Vec<usize> = info.elements_of_type(DomainType::If).ones().collect();
    assert!(!expected.is_empty());
    assert_eq!(cut_elements, expected);
    assert_eq!(assembler.num_elements(), 128);
}

#[test]
fn parallel_assembly_matches_sequential_assembly() {
    let level_set = p1_level_set(8, |x| (x - Point2::new(0.4, 0.55)).norm() - 0.25);
    let cutter = TriangleCutter::new(&level_set, 2).unwrap();
    for (order, lambda) in [(1, Some(10.0)), (2, Some(10.0)), (2, None)] {
        let space = H1Space::new(level_set.mesh().clone(), order).unwrap();
        let integrator = integrator(lambda);
        let assembler = NitscheElementAssembler::new(&space, &cutter, &integrator);
        let cut_elements = assembler.cut_elements().unwrap();

        let sequential = assemble_element_matrices(&assembler, &cut_elements).unwrap();
        let parallel = par_assemble_element_matrices(&assembler, &cut_elements).unwrap();
        assert_eq!(sequential, parallel);

        let pairs = assembler.assemble_cut_elements_par().unwrap();
        assert_eq!(pairs.len(), cut_elements.len());
        for ((element_index, matrix), (&expected_index, expected)) in pairs.iter().zip(cut_elements.iter().zip(&sequential)) {
            assert_eq!(*element_index, expected_index);
            assert_eq!(matrix, expected);
            let n = space.element_node_count();
            assert_eq!(matrix.shape(), (2 * n, 2 * n));
        }
    }
}

#[test]
fn assembler_reports_out_of_bounds_elements() {
    let level_set = p1_level_set(2, |x| x.x - 0.3);
    let space = H1Space::new(level_set.mesh().clone(), 1).unwrap();
    let cutter = TriangleCutter::new(&level_set, 1).unwrap();
    let integrator = integrator(None);
    let assembler = NitscheElementAssembler::new(&space, &cutter, &integrator);
    let mut output = DMatrix::zeros(0, 0);
    let result = assembler.assemble_element_matrix_into(100, &mut output, &mut Workspace::default());
    assert!(result.is_err());
}

fn assemble_in_parallel<D>(
    space: &H1Space<f64, D>,
    cut_geometry: &dyn CutGeometryProvider<f64, D>,
    integrator: &InterfaceNitscheIntegrator<f64>,
) -> Vec<(usize, DMatrix<f64>)>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
    <DefaultAllocator as Allocator<f64, D>>::Buffer: Send + Sync,
{
    NitscheElementAssembler::new(space, cut_geometry, integrator)
        .assemble_cut_elements_par()
        .unwrap()
}

/// Cuts every tetrahedron by the plane through its centroid with normal `e_x`, using one-point
/// rules for each part.
struct CentroidPlaneCutter {
    num_elements: usize,
}

impl CutGeometryProvider<f64, U3> for CentroidPlaneCutter {
    fn num_elements(&self) -> usize {
        self.num_elements
    }

    fn element_decomposition(&self, element_index: usize) -> Result<ElementCutDecomposition<f64, U3>, CutFemError> {
        if element_index >= self.num_elements {
            return Err(CutFemError::ElementOutOfBounds(element_index));
        }
        let centroid = Point3::new(0.25, 0.25, 0.25);
        let half_volume = 1.0 / 12.0;
        Ok(ElementCutDecomposition::new(
            (vec![half_volume], vec![centroid]),
            (vec![half_volume], vec![centroid]),
            InterfaceQuadrature::from_points_and_normals(vec![0.1], vec![centroid], vec![Vector3::x()]),
        ))
    }
}

#[test]
fn generic_parallel_assembly_in_two_and_three_dimensions() {
    let level_set = p1_level_set(6, |x| (x - Point2::new(0.5, 0.5)).norm() - 0.3);
    let space = H1Space::new(level_set.mesh().clone(), 2).unwrap();
    let cutter = TriangleCutter::new(&level_set, 4).unwrap();
    let integrator = integrator(Some(10.0));
    let pairs = assemble_in_parallel(&space, &cutter, &integrator);
    let assembler = NitscheElementAssembler::new(&space, &cutter, &integrator);
    assert_eq!(pairs.len(), assembler.cut_elements().unwrap().len());

    let mesh = Arc::new(create_unit_box_uniform_tet_mesh_3d::<f64>(2));
    let space = H1Space::new(mesh.clone(), 1).unwrap();
    let cutter = CentroidPlaneCutter {
        num_elements: mesh.num_cells(),
    };
    let pairs = assemble_in_parallel(&space, &cutter, &integrator);
    assert_eq!(pairs.len(), 48);
    for (element_index, (pair_index, matrix)) in pairs.iter().enumerate() {
        assert_eq!(*pair_index, element_index);
        assert_eq!(matrix.shape(), (8, 8));
        assert_matrix_eq!(*matrix, matrix.transpose(), comp = abs, tol = 1e-12);
        assert!(matrix.amax() > 0.0);
    }
}
