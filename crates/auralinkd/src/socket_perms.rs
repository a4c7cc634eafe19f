//! Socket directory/file permission handling.
//!
//! A thin, testable wrapper over the POSIX syscalls, not a full
//! socket-directory policy engine — which directory to use is
//! configuration (`auralink_config::paths`), not this module's concern.

use std::ffi::CString;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Mode bits spec.md §6 requires for files under the socket directory.
pub const SOCKET_MODE: u32 = 0o770;

/// Resolve `group` to a gid via `getgrnam`.
///
/// # Errors
///
/// Returns an error if the group name is not found or contains an
/// embedded NUL.
pub fn resolve_group_gid(group: &str) -> io::Result<u32> {
    let c_group = CString::new(group)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "group name contains a NUL byte"))?;
    // SAFETY: `getgrnam` is called with a valid, NUL-terminated C string and
    // its return value is checked for null before the pointed-to `gr_gid`
    // field is read; the returned pointer is into libc's static buffer and
    // is not retained past this call.
    #[allow(unsafe_code)]
    unsafe {
        let entry = libc::getgrnam(c_group.as_ptr());
        if entry.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such group: {group}"),
            ));
        }
        Ok((*entry).gr_gid)
    }
}

/// Apply spec.md §6 permissions to `path`: mode `0770` and group ownership
/// set to `group` (owner/uid left unchanged).
///
/// # Errors
///
/// Returns an error if the group cannot be resolved or the chown/chmod
/// syscalls fail.
pub fn apply_socket_permissions(path: &Path, group: &str) -> io::Result<()> {
    let gid = resolve_group_gid(group)?;
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    // SAFETY: `c_path` is a valid NUL-terminated path; `-1` as the uid
    // argument to `chown` means "leave the owner unchanged", matching this
    // function's documented contract.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::chown(c_path.as_ptr(), u32::MAX, gid) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_group_rejects_embedded_nul() {
        assert!(resolve_group_gid("bad\0group").is_err());
    }

    #[test]
    fn resolve_group_rejects_unknown_group() {
        assert!(resolve_group_gid("definitely-not-a-real-group-12345").is_err());
    }

    #[test]
    fn apply_permissions_rejects_path_with_nul() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("x\0y");
        let err = apply_socket_permissions(&bogus, "root").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
