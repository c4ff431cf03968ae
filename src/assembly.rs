//! Element-wise assembly drivers.
use crate::allocators::DimAllocator;
use crate::cut::{CutGeometryProvider, DomainType};
use crate::nitsche::InterfaceNitscheIntegrator;
use crate::space::H1Space;
use crate::workspace::{ThreadLocalWorkspace, Workspace};
use crate::{Real, SmallDim};
use eyre::WrapErr;
use log::debug;
use nalgebra::allocator::Allocator;
use nalgebra::{DMatrix, DefaultAllocator};
use rayon::prelude::*;

pub trait ElementMatrixAssembler<T: Real>: Sync {
    fn num_elements(&self) -> usize;

    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        output: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> eyre::Result<()>;
}

/// Assembles the element matrices of the given elements in parallel.
///
/// Every worker thread uses its own workspace. The matrices are returned in the order of
/// `element_indices`.
pub fn par_assemble_element_matrices<T: Real>(
    assembler: &dyn ElementMatrixAssembler<T>,
    element_indices: &[usize],
) -> eyre::Result<Vec<DMatrix<T>>> {
    let workspace = ThreadLocalWorkspace::new();
    element_indices
        .par_iter()
        .with_min_len(16)
        .map(|&element_index| {
            workspace.with(|ws| {
                let mut matrix = DMatrix::zeros(0, 0);
                assembler.assemble_element_matrix_into(element_index, &mut matrix, ws)?;
                Ok(matrix)
            })
        })
        .collect()
}

/// Assembles the element matrices of the given elements one after another with a single
/// workspace.
pub fn assemble_element_matrices<T: Real>(
    assembler: &dyn ElementMatrixAssembler<T>,
    element_indices: &[usize],
) -> eyre::Result<Vec<DMatrix<T>>> {
    let mut workspace = Workspace::default();
    element_indices
        .iter()
        .map(|&element_index| {
            let mut matrix = DMatrix::zeros(0, 0);
            assembler.assemble_element_matrix_into(element_index, &mut matrix, &mut workspace)?;
            Ok(matrix)
        })
        .collect()
}

/// Nitsche interface matrices for the elements of a Lagrange space.
pub struct NitscheElementAssembler<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    space: &'a H1Space<T, D>,
    cut_geometry: &'a dyn CutGeometryProvider<T, D>,
    integrator: &'a InterfaceNitscheIntegrator<T>,
}

impl<'a, T, D> NitscheElementAssembler<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
    <DefaultAllocator as Allocator<T, D>>::Buffer: Send + Sync,
{
    pub fn new(
        space: &'a H1Space<T, D>,
        cut_geometry: &'a dyn CutGeometryProvider<T, D>,
        integrator: &'a InterfaceNitscheIntegrator<T>,
    ) -> Self {
        Self {
            space,
            cut_geometry,
            integrator,
        }
    }

    /// The indices of all elements cut by the interface.
    pub fn cut_elements(&self) -> eyre::Result<Vec<usize>> {
        let cut_elements = (0..self.cut_geometry.num_elements())
            .into_par_iter()
            .filter_map(|element_index| {
                match self.cut_geometry.element_decomposition(element_index) {
                    Ok(decomposition) => (decomposition.domain_type() == DomainType::If).then_some(Ok(element_index)),
                    Err(err) => Some(Err(err)),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .wrap_err("failed to compute the cut decomposition")?;
        debug!(
            "Found {} cut elements out of {}",
            cut_elements.len(),
            self.cut_geometry.num_elements()
        );
        Ok(cut_elements)
    }

    /// Assembles the interface matrices of all cut elements in parallel.
    pub fn assemble_cut_elements_par(&self) -> eyre::Result<Vec<(usize, DMatrix<T>)>> {
        let cut_elements = self.cut_elements()?;
        let matrices = par_assemble_element_matrices(self, &cut_elements)?;
        Ok(cut_elements.into_iter().zip(matrices).collect())
    }
}

impl<'a, T, D> ElementMatrixAssembler<T> for NitscheElementAssembler<'a, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
    <DefaultAllocator as Allocator<T, D>>::Buffer: Send + Sync,
{
    fn num_elements(&self) -> usize {
        self.space.num_elements()
    }

    fn assemble_element_matrix_into(
        &self,
        element_index: usize,
        output: &mut DMatrix<T>,
        workspace: &mut Workspace,
    ) -> eyre::Result<()> {
        let element = self.space.element(element_index)?;
        let decomposition = self
            .cut_geometry
            .element_decomposition(element_index)
            .wrap_err_with(|| format!("failed to cut element {}", element_index))?;
        self.integrator
            .assemble_element_matrix(element_index, &element, &decomposition, output, workspace)
            .wrap_err_with(|| format!("failed to assemble Nitsche matrix of element {}", element_index))
    }
}
