//! Working-directory path helpers.

use std::path::Path;

use bstr::BString;

use crate::RepoError;

/// Normalize path separators to `/`. A no-op on POSIX systems.
pub fn git_internal_slash(mut bytes: BString) -> BString {
    if cfg!(windows) {
        for b in bytes.iter_mut() {
            if *b == b'\\' {
                *b = b'/';
            }
        }
    }
    bytes
}

/// The workdir-relative, `/`-separated form of `file`.
///
/// Fails when `file` does not live under `workdir`.
pub fn strip_work_dir(workdir: &Path, file: &Path) -> Result<BString, RepoError> {
    let rel = file
        .strip_prefix(workdir)
        .map_err(|_| RepoError::OutsideWorkDir(file.to_path_buf()))?;

    let mut out = BString::default();
    for component in rel.components() {
        if !out.is_empty() {
            out.push(b'/');
        }
        out.extend_from_slice(component.as_os_str().as_encoded_bytes());
    }
    Ok(git_internal_slash(out))
}
