//! POSIX metadata helpers for the restore path

use snapsafe_core::error::{Result, SnapSafeError};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn cpath(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SnapSafeError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains interior NUL",
        ))
    })
}

/// Apply a stored mode to an existing path
pub fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set access and modification time, both to `mod_time` nanoseconds
/// since the Unix epoch. Follows symlinks, matching chtimes semantics.
pub fn set_times(path: &Path, mod_time: i64) -> Result<()> {
    let secs = mod_time.div_euclid(1_000_000_000);
    let nanos = mod_time.rem_euclid(1_000_000_000);
    let ts = libc::timespec {
        tv_sec: secs,
        tv_nsec: nanos,
    };
    let times = [ts, ts];

    let path = cpath(path)?;
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(SnapSafeError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

/// Restore ownership without following symlinks
pub fn lchown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let path = cpath(path)?;
    let rc = unsafe { libc::lchown(path.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(SnapSafeError::Io(io::Error::last_os_error()));
    }
    Ok(())
}
