//! Relative path validation for file names carried on the wire.

use crate::error::{ProtocolError, ProtocolResult};

/// Separator used for relative paths on the wire.
pub const PATH_SEPARATOR: char = '/';

/// File name prefix reserved for in-flight transfer files.
pub const TEMP_PREFIX: &str = ".tandem-";

/// Checks that `path` is a safe relative path.
///
/// Accepted paths are non-empty, `/`-separated, and contain no empty,
/// `.` or `..` segments, no leading separator, no backslashes and no NUL
/// bytes. The last segment must not start with [`TEMP_PREFIX`]; such
/// names belong to transfers in progress and are never synchronized. A
/// receiver joins an accepted path onto its root without escaping
/// it.
///
/// # Errors
///
/// Returns `InvalidPath` naming the first violated rule.
pub fn validate_relative_path(path: &str) -> ProtocolResult<()> {
    if path.is_empty() {
        return Err(ProtocolError::invalid_path(path, "empty path"));
    }
    if path.starts_with(PATH_SEPARATOR) {
        return Err(ProtocolError::invalid_path(path, "absolute path"));
    }
    if path.contains('\\') {
        return Err(ProtocolError::invalid_path(path, "backslash in path"));
    }
    if path.contains('\0') {
        return Err(ProtocolError::invalid_path(path, "NUL byte in path"));
    }

    for segment in path.split(PATH_SEPARATOR) {
        match segment {
            "" => return Err(ProtocolError::invalid_path(path, "empty segment")),
            "." => return Err(ProtocolError::invalid_path(path, "current-directory segment")),
            ".." => return Err(ProtocolError::invalid_path(path, "parent traversal")),
            _ => {}
        }
    }
    if path
        .rsplit(PATH_SEPARATOR)
        .next()
        .is_some_and(|name| name.starts_with(TEMP_PREFIX))
    {
        return Err(ProtocolError::invalid_path(path, "reserved temp file name"));
    }

    Ok(())
}
