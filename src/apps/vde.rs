//! Vertical detachment energy of an open-shell, anionic species.
//!
//! Photoelectron-spectrum style calculation: minimize the doublet anion,
//! single-point the neutral singlet at that geometry, report the difference.

use crate::error::ChemflowError;
use crate::graph::{TaskSpec, WorkflowBuilder, WorkflowGraph};

use super::{mdt_image, nwchem_image};

pub fn build() -> Result<WorkflowGraph, ChemflowError> {
    let mut b = WorkflowBuilder::new("vde", mdt_image());
    let molecule_json = b.input("molecule_json");

    let read_molecule = b.add_task(
        TaskSpec::new("read_molecule", "read_molecule")
            .input("description", molecule_json)
            .outputs(["mol"]),
    )?;

    // size/shell sanity checks before any QM time is spent
    b.add_task(
        TaskSpec::new("validate", "validate_vde")
            .input("mol", read_molecule.output("mol"))
            .outputs(["success", "errors", "pdbstring"])
            .preprocessor(),
    )?;

    let minimize_doublet = b.add_task(
        TaskSpec::new("minimize_doublet", "minimize_doublet")
            .input("mol", read_molecule.output("mol"))
            .literal("nsteps", 50)
            .outputs(["traj", "mol", "pdbstring"])
            .image(nwchem_image()),
    )?;

    let single_point_singlet = b.add_task(
        TaskSpec::new("single_point_singlet", "single_point_singlet")
            .input("mol", minimize_doublet.output("mol"))
            .outputs(["mol"])
            .image(nwchem_image()),
    )?;

    let get_results = b.add_task(
        TaskSpec::new("get_results", "vde_results")
            .input("doublet", minimize_doublet.output("mol"))
            .input("singlet", single_point_singlet.output("mol"))
            .outputs(["results"]),
    )?;

    b.set_output("final_structure.pdb", minimize_doublet.output("pdbstring"))?;
    b.set_output("results", get_results.output("results"))?;

    b.finalize()
}
