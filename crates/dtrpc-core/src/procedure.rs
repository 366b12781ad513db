//! Procedure declarations: what a node offers, and the shape of its
//! argument list.

use serde::{Deserialize, Serialize};

/// The kind of a single procedure argument slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// The argument must resolve to a local file path after extracting the
    /// call package.
    File,
    /// Any other argument token (the literal spelling is preserved for
    /// diagnostics but otherwise carries no special handling).
    Other(String),
}

impl ArgKind {
    /// Parse a single arg-type token from an offer payload line.
    pub fn parse(token: &str) -> Self {
        if token == "file" {
            ArgKind::File
        } else {
            ArgKind::Other(token.to_string())
        }
    }

    /// `true` if this slot must resolve to a local file.
    pub fn is_file(&self) -> bool {
        matches!(self, ArgKind::File)
    }
}

/// A procedure a node can offer: its name plus the shape of its argument
/// list. Arity is `arg_types.len()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Procedure name, matched exactly against a job's `procedure` field.
    pub name: String,
    /// Ordered argument-slot kinds.
    pub arg_types: Vec<ArgKind>,
}

impl Procedure {
    /// Construct a procedure declaration.
    pub fn new(name: impl Into<String>, arg_types: Vec<ArgKind>) -> Self {
        Self {
            name: name.into(),
            arg_types,
        }
    }

    /// The number of arguments this procedure expects.
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    /// `true` if `name` and argument count match exactly.
    pub fn matches_name_and_arity(&self, name: &str, arity: usize) -> bool {
        self.name == name && self.arity() == arity
    }

    /// Indices of argument slots that must resolve to local files.
    pub fn file_arg_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.arg_types
            .iter()
            .enumerate()
            .filter(|(_, kind)| kind.is_file())
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_kind_parses_file_token() {
        assert_eq!(ArgKind::parse("file"), ArgKind::File);
        assert!(ArgKind::parse("file").is_file());
    }

    #[test]
    fn arg_kind_parses_other_token() {
        assert_eq!(ArgKind::parse("str"), ArgKind::Other("str".to_string()));
        assert!(!ArgKind::parse("str").is_file());
    }

    #[test]
    fn matches_name_and_arity() {
        let p = Procedure::new("echo", vec![ArgKind::Other("str".into())]);
        assert!(p.matches_name_and_arity("echo", 1));
        assert!(!p.matches_name_and_arity("echo", 2));
        assert!(!p.matches_name_and_arity("reverse", 1));
    }

    #[test]
    fn file_arg_indices_finds_file_slots() {
        let p = Procedure::new(
            "concat",
            vec![ArgKind::File, ArgKind::Other("str".into()), ArgKind::File],
        );
        assert_eq!(p.file_arg_indices().collect::<Vec<_>>(), vec![0, 2]);
    }
}
