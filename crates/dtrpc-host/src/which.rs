//! Portable executable discovery, scoped to a configured `bins` directory
//! plus `PATH` (§4.6 step 5, "the matching executable must exist and be
//! executable").

use std::path::{Path, PathBuf};

/// Locate an executable named `bin` inside `dir`, falling back to `PATH`
/// if it isn't found there.
pub fn which_in(dir: &Path, bin: &str) -> Option<PathBuf> {
    let candidate = Path::new(bin);
    if has_path(candidate) {
        return candidate.exists().then(|| candidate.to_path_buf());
    }

    if let Some(found) = resolve_in_dir(dir, bin) {
        return Some(found);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|d| resolve_in_dir(&d, bin))
}

/// `true` when an executable can be resolved in `dir` or `PATH`.
pub fn command_exists_in(dir: &Path, command: &str) -> bool {
    which_in(dir, command).is_some()
}

fn has_path(candidate: &Path) -> bool {
    candidate.components().count() > 1
}

fn resolve_in_dir(dir: &Path, command: &str) -> Option<PathBuf> {
    let direct = dir.join(command);
    if direct.exists() {
        return Some(direct);
    }

    if !cfg!(windows) {
        return None;
    }

    ["", ".exe", ".cmd", ".bat", ".com"]
        .into_iter()
        .map(|ext| dir.join(format!("{command}{ext}")))
        .find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_executable_in_bins_dir() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("echo_step");
        std::fs::write(&bin, b"#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(which_in(dir.path(), "echo_step"), Some(bin));
    }

    #[test]
    fn missing_executable_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(which_in(dir.path(), "no-such-binary-dtrpc").is_none());
        assert!(!command_exists_in(dir.path(), "no-such-binary-dtrpc"));
    }
}
