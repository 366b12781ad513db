//! Offered-procedure declarations (§6.6 `rpcs = "./rpcs.toml"`).
//!
//! A node's `rpcs.toml` enumerates the procedures it is willing to run and
//! the arity/argument shape of each. Capability values live in the main
//! configuration; this file only says *what can be called*, not *how loaded
//! the node currently is*.

use dtrpc_core::{ArgKind, Procedure};
use dtrpc_error::{DtrpcError, ErrorCode};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RpcsFile {
    #[serde(default)]
    procedures: Vec<ProcedureEntry>,
}

#[derive(Debug, Deserialize)]
struct ProcedureEntry {
    name: String,
    #[serde(default)]
    args: Vec<String>,
}

/// The set of procedures a node offers, parsed from `rpcs.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RpcsManifest {
    procedures: Vec<Procedure>,
}

impl RpcsManifest {
    /// Parse the textual contents of an `rpcs.toml` file.
    pub fn parse(text: &str) -> Result<Self, DtrpcError> {
        let file: RpcsFile = toml::from_str(text).map_err(|e| {
            DtrpcError::new(ErrorCode::ConfigInvalid, format!("malformed rpcs.toml: {e}"))
        })?;
        let procedures = file
            .procedures
            .into_iter()
            .map(|entry| {
                let arg_types = entry.args.iter().map(|a| ArgKind::parse(a)).collect();
                Procedure::new(entry.name, arg_types)
            })
            .collect();
        Ok(Self { procedures })
    }

    /// Load and parse `rpcs.toml` from `path`.
    pub async fn load(path: &Path) -> Result<Self, DtrpcError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            DtrpcError::new(
                ErrorCode::ConfigInvalid,
                format!("cannot read rpcs file {}: {e}", path.display()),
            )
        })?;
        Self::parse(&text)
    }

    /// All declared procedures.
    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    /// Find the declared procedure matching `name` and `arity`, if any.
    pub fn find(&self, name: &str, arity: usize) -> Option<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.matches_name_and_arity(name, arity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_procedures_with_file_and_other_args() {
        let manifest = RpcsManifest::parse(
            r#"
            [[procedures]]
            name = "echo"
            args = ["str"]

            [[procedures]]
            name = "concat"
            args = ["file", "file"]
            "#,
        )
        .unwrap();

        assert_eq!(manifest.procedures().len(), 2);
        let concat = manifest.find("concat", 2).unwrap();
        assert!(concat.arg_types.iter().all(|a| a.is_file()));
        assert!(manifest.find("concat", 1).is_none());
    }

    #[test]
    fn empty_file_yields_empty_manifest() {
        let manifest = RpcsManifest::parse("").unwrap();
        assert!(manifest.procedures().is_empty());
    }

    #[test]
    fn malformed_toml_is_config_invalid() {
        let err = RpcsManifest::parse("not valid [[ toml").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }
}
