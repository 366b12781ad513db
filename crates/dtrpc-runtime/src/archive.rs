//! ZIP packaging for call/result packages (§4.4 step 5, §4.6 steps 2-3 and
//! 10-11).
//!
//! Call and result packages are plain ZIP archives: a single `*.jb` job
//! document plus whatever local files the current step's arguments name.
//! Building and extracting them is kept in one place so the client engine
//! and the step handler share identical framing.

use dtrpc_error::{DtrpcError, ErrorCode};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Build a ZIP archive in memory from `(entry_name, contents)` pairs.
pub fn build_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, DtrpcError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, contents) in entries {
            writer
                .start_file(name, options)
                .map_err(|e| zip_error("failed to start zip entry", e))?;
            writer
                .write_all(contents)
                .map_err(|e| DtrpcError::new(ErrorCode::Internal, format!("zip write failed: {e}")))?;
        }
        writer
            .finish()
            .map_err(|e| zip_error("failed to finalize zip", e))?;
    }
    Ok(cursor.into_inner())
}

/// Extract every entry in `payload` into `dest_dir`, which must already
/// exist. Directory entries inside the archive are created as needed.
///
/// Returns [`ErrorCode::ProtocolNotAZip`] if `payload` is not a valid ZIP.
pub fn extract_zip(payload: &[u8], dest_dir: &Path) -> Result<(), DtrpcError> {
    let cursor = Cursor::new(payload);
    let mut archive = ZipArchive::new(cursor).map_err(|e| {
        DtrpcError::new(ErrorCode::ProtocolNotAZip, format!("not a valid zip: {e}"))
    })?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| zip_error("failed to read zip entry", e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let out_path = dest_dir.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(DtrpcError::from)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(DtrpcError::from)?;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| DtrpcError::new(ErrorCode::Internal, format!("zip read failed: {e}")))?;
        std::fs::write(&out_path, contents).map_err(DtrpcError::from)?;
    }
    Ok(())
}

/// Find the single `*.jb` job file directly inside `dir`.
pub fn find_job_file(dir: &Path) -> Result<PathBuf, DtrpcError> {
    let mut found = None;
    let entries = std::fs::read_dir(dir).map_err(DtrpcError::from)?;
    for entry in entries {
        let entry = entry.map_err(DtrpcError::from)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jb") {
            if found.is_some() {
                return Err(DtrpcError::new(
                    ErrorCode::ProtocolMissingJobFile,
                    "call package contains more than one .jb file",
                ));
            }
            found = Some(path);
        }
    }
    found.ok_or_else(|| {
        DtrpcError::new(ErrorCode::ProtocolMissingJobFile, "no .jb file found in call package")
    })
}

fn zip_error(context: &str, err: zip::result::ZipError) -> DtrpcError {
    DtrpcError::new(ErrorCode::Internal, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_extract_roundtrip() {
        let entries = vec![
            ("job.jb".to_string(), b"client_sid=aa\n".to_vec()),
            ("input.txt".to_string(), b"hello".to_vec()),
        ];
        let zip_bytes = build_zip(&entries).unwrap();

        let dir = tempfile::tempdir().unwrap();
        extract_zip(&zip_bytes, dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("job.jb")).unwrap(),
            "client_sid=aa\n"
        );
        assert_eq!(
            std::fs::read(dir.path().join("input.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn extract_rejects_non_zip_payload() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_zip(b"not a zip", dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolNotAZip);
    }

    #[test]
    fn find_job_file_locates_single_jb() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("call.jb"), b"x").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"y").unwrap();
        let found = find_job_file(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "call.jb");
    }

    #[test]
    fn find_job_file_errors_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_job_file(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolMissingJobFile);
    }
}
