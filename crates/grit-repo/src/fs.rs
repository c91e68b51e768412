//! Filesystem capability probes for the executable bit.

use std::io;
use std::path::Path;

/// Whether the filesystem tracks an executable bit at all.
pub fn supports_executable() -> bool {
    cfg!(unix)
}

/// Whether the file at `path` is executable by the current user.
pub fn is_executable(path: &Path) -> bool {
    is_executable::is_executable(path)
}

/// Set or clear the executable bits. Execute permission mirrors the read
/// bits when set. A no-op on platforms without an executable bit.
#[cfg(unix)]
pub fn set_executable(path: &Path, on: bool) -> io::Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let mut mode = fs::metadata(path)?.permissions().mode();
    if on {
        mode |= (mode & 0o444) >> 2;
    } else {
        mode &= !0o111;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path, _on: bool) -> io::Result<()> {
    Ok(())
}
