use std::fs;
use std::io::Write;
use std::path::Path;

use pagewatch_core::error::AppError;
use tempfile::NamedTempFile;

/// Replace `path` with `contents` in one rename.
///
/// The bytes go to a temp file in the destination directory first, so a
/// reader sees either the old file or the new one, never a partial write.
/// Missing parent directories are created.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| AppError::Persistence(format!("cannot create {}: {e}", dir.display())))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| AppError::Persistence(format!("cannot stage {}: {e}", path.display())))?;
    tmp.write_all(contents)
        .and_then(|()| tmp.flush())
        .map_err(|e| AppError::Persistence(format!("cannot write {}: {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| AppError::Persistence(format!("cannot replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Like [`write_atomic`] but leaves the file alone when it already holds
/// `contents`. Returns whether a write happened.
pub fn write_if_changed(path: &Path, contents: &[u8]) -> Result<bool, AppError> {
    match fs::read(path) {
        Ok(existing) if existing == contents => Ok(false),
        _ => write_atomic(path, contents).map(|()| true),
    }
}
