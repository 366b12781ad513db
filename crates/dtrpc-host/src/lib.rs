//! Local execution host (§4.6): offered-procedure declarations, executable
//! discovery under a configured `bins` directory, and subprocess lifecycle
//! tracking for the executable backing a step.

mod process;
mod rpcs;
mod which;

pub use process::{run_step, ExecutionOutcome, ProcessConfig, ProcessStatus};
pub use rpcs::RpcsManifest;
pub use which::{command_exists_in, which_in};

use dtrpc_core::Procedure;
use std::path::{Path, PathBuf};

/// Whether this node offers `(name, arity)` and has a backing executable on
/// disk (§4.6 step 5, "offering check").
///
/// Returns the resolved executable path on success. The executable naming
/// convention is the procedure name, searched for in `bins_dir`.
pub fn resolve_offering(
    manifest: &RpcsManifest,
    bins_dir: &Path,
    name: &str,
    arity: usize,
) -> Option<(Procedure, PathBuf)> {
    let procedure = manifest.find(name, arity)?.clone();
    let executable = which_in(bins_dir, &procedure.name)?;
    Some((procedure, executable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_offering_requires_both_declaration_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echo"), b"#!/bin/sh\n").unwrap();
        let manifest = RpcsManifest::parse(
            r#"
            [[procedures]]
            name = "echo"
            args = ["str"]
            "#,
        )
        .unwrap();

        assert!(resolve_offering(&manifest, dir.path(), "echo", 1).is_some());
        assert!(resolve_offering(&manifest, dir.path(), "echo", 2).is_none());
        assert!(resolve_offering(&manifest, dir.path(), "reverse", 1).is_none());
    }

    #[test]
    fn resolve_offering_fails_when_binary_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = RpcsManifest::parse(
            r#"
            [[procedures]]
            name = "echo"
            args = ["str"]
            "#,
        )
        .unwrap();

        assert!(resolve_offering(&manifest, dir.path(), "echo", 1).is_none());
    }
}
