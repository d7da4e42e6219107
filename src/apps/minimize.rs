//! Refine a ligand binding site: assign a force field to a biomolecule
//! (AMBER14 + GAFF, non-standard residues included) and minimize it.
//!
//! The human picks which candidate ligand to parameterize, so the graph
//! carries an interactive selection task; `validate` is the preprocessing
//! stop point for UI-driven runs.

use crate::error::ChemflowError;
use crate::graph::{TaskSpec, WorkflowBuilder, WorkflowGraph};

use super::{ambertools_image, mdt_image};

pub fn build() -> Result<WorkflowGraph, ChemflowError> {
    let mut b = WorkflowBuilder::new("MMminimize", mdt_image());
    let molecule_json = b.input("molecule_json");

    let read_molecule = b.add_task(
        TaskSpec::new("read_molecule", "read_molecule")
            .input("description", molecule_json)
            .outputs(["mol"]),
    )?;

    // dict of candidate ligands: {ligand_name: [atom_idx, ...], ...};
    // a ligand spans at most 2 residues
    let get_ligands = b.add_task(
        TaskSpec::new("get_ligands", "get_ligands")
            .input("mol", read_molecule.output("mol"))
            .outputs(["ligand_options", "mv_ligand_strings"]),
    )?;

    b.add_task(
        TaskSpec::new("validate", "validate_binding_site")
            .input("mol", read_molecule.output("mol"))
            .input("ligands", get_ligands.output("ligand_options"))
            .input("mv_ligand_strings", get_ligands.output("mv_ligand_strings"))
            .outputs(["success", "errors", "pdbstring", "ligands", "mv_ligand_strings"])
            .preprocessor(),
    )?;

    let atomselection = b.add_task(
        TaskSpec::new("user_atom_selection", "select_atoms")
            .input("choices", get_ligands.output("ligand_options"))
            .outputs(["ligandname", "atom_ids"])
            .interactive(),
    )?;

    let prep_ligand = b.add_task(
        TaskSpec::new("prep_ligand", "prep_ligand")
            .input("mol", read_molecule.output("mol"))
            .input("ligand_atom_ids", atomselection.output("atom_ids"))
            .input("ligandname", atomselection.output("ligandname"))
            .outputs(["ligand_parameters", "ligand"])
            .image(ambertools_image()),
    )?;

    let prep_forcefield = b.add_task(
        TaskSpec::new("prep_forcefield", "prep_forcefield")
            .input("mol", read_molecule.output("mol"))
            .input("ligand_atom_ids", atomselection.output("atom_ids"))
            .input("ligand_params", prep_ligand.output("ligand_parameters"))
            .outputs(["molecule", "prmtop", "inpcrd"])
            .image(ambertools_image()),
    )?;

    let mm_minimization = b.add_task(
        TaskSpec::new("mm_minimization", "mm_minimization")
            .input("mol", prep_forcefield.output("molecule"))
            .outputs([
                "trajectory",
                "molecule",
                "pdbstring",
                "results",
                "minstep_frames",
                "minsteps.tar.gz",
            ]),
    )?;

    b.set_output("prmtop", prep_forcefield.output("prmtop"))?;
    b.set_output("inpcrd", prep_forcefield.output("inpcrd"))?;
    b.set_output("results", mm_minimization.output("results"))?;
    b.set_output("final_structure.pdb", mm_minimization.output("pdbstring"))?;
    b.set_output("minsteps.tar.gz", mm_minimization.output("minsteps.tar.gz"))?;
    b.set_output("minstep_frames", mm_minimization.output("minstep_frames"))?;

    b.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Runner;

    #[test]
    fn preprocessor_is_validate() {
        let graph = build().unwrap();
        assert_eq!(graph.first_preprocessor().unwrap().name, "validate");
    }

    #[test]
    fn selection_task_is_interactive() {
        let graph = build().unwrap();
        assert!(graph.task("user_atom_selection").unwrap().interactive);
    }

    #[test]
    fn full_run_closure_skips_validate() {
        let graph = build().unwrap();
        let closure = graph.output_closure();
        let validate_idx = graph.index_of("validate").unwrap();
        assert!(!closure.contains(&validate_idx));
        // but everything feeding the outputs is in
        for name in ["read_molecule", "get_ligands", "user_atom_selection", "mm_minimization"] {
            assert!(closure.contains(&graph.index_of(name).unwrap()), "{name} missing");
        }
    }

    #[test]
    fn prep_tasks_use_ambertools_image() {
        let graph = build().unwrap();
        assert!(graph
            .task("prep_ligand")
            .unwrap()
            .image
            .as_deref()
            .unwrap()
            .contains("ambertools"));
        assert!(graph.task("mm_minimization").unwrap().image.is_none());
    }

    #[test]
    fn topological_order_is_declaration_compatible() {
        let graph = build().unwrap();
        let order: Vec<&str> = graph
            .topo_order()
            .iter()
            .map(|&i| graph.tasks()[i].name.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "read_molecule",
                "get_ligands",
                "validate",
                "user_atom_selection",
                "prep_ligand",
                "prep_forcefield",
                "mm_minimization",
            ]
        );
    }

    #[test]
    fn shareable_across_runners() {
        use std::collections::BTreeMap;
        use std::sync::Arc;

        let graph = Arc::new(build().unwrap());
        let backend = Arc::new(crate::backend::InProcessBackend::with_builtin_bodies());
        let r1 = Runner::new(Arc::clone(&graph), backend.clone(), BTreeMap::new());
        let r2 = Runner::new(Arc::clone(&graph), backend, BTreeMap::new());
        assert_eq!(r1.states().len(), r2.states().len());
    }
}
