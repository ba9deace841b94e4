//! Module `path`
//!
//! Pure path-resolution functions: the sandbox boundary every command
//! that names a path must call before touching `RemoteFs` (spec §4.3).
//! Grounded in `original_source/CFtpServer.h`'s `SimplifyPath` /
//! `BuildPath` / `BuildVirtualPath`.

use crate::error::FilesystemError;

/// Tokenizes on `/`, drops `.` and empty segments, pops on `..`, and
/// fails if a `..` would escape above the root. Idempotent:
/// `simplify(simplify(p)) == simplify(p)` for all inputs that succeed once.
pub fn simplify(path: &str) -> Result<String, FilesystemError> {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return Err(FilesystemError::PathEscape(path.to_string()));
                }
            }
            other => stack.push(other),
        }
    }
    Ok(format!("/{}", stack.join("/")))
}

/// Joins `cwd` with `asked` (absolute `asked` replaces `cwd`), simplifies,
/// and preserves a trailing slash iff `asked` had one. This is the
/// client-visible virtual path.
pub fn build_virtual(cwd: &str, asked: &str) -> Result<String, FilesystemError> {
    let joined = if asked.starts_with('/') {
        asked.to_string()
    } else if cwd.ends_with('/') {
        format!("{cwd}{asked}")
    } else {
        format!("{cwd}/{asked}")
    };

    let mut simplified = simplify(&joined)?;
    if asked.ends_with('/') && !simplified.ends_with('/') {
        simplified.push('/');
    }
    Ok(simplified)
}

/// Concatenates the user's home with a virtual path, re-simplifies, and
/// verifies the result still begins with `user_home` (defense in depth
/// against path-escape beyond what `simplify` already rejects).
pub fn build_remote(user_home: &str, virtual_path: &str) -> Result<String, FilesystemError> {
    let home = simplify(user_home)?;
    let joined = if home == "/" {
        virtual_path.to_string()
    } else {
        format!("{home}{virtual_path}")
    };
    let remote = simplify(&joined)?;

    let prefix_ok = remote == home || remote.starts_with(&format!("{home}/")) || home == "/";
    if !prefix_ok {
        return Err(FilesystemError::PathEscape(virtual_path.to_string()));
    }
    Ok(remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_double_slashes_and_dot_segments() {
        assert_eq!(simplify("/a//b/./c").unwrap(), "/a/b/c");
    }

    #[test]
    fn pops_on_dotdot() {
        assert_eq!(simplify("/a/b/../c").unwrap(), "/a/c");
    }

    #[test]
    fn rejects_escape_above_root() {
        assert!(simplify("/a/../../b").is_err());
        assert!(simplify("..").is_err());
    }

    #[test]
    fn root_dotdot_is_an_escape() {
        assert!(build_virtual("/", "..").is_err());
    }

    #[test]
    fn idempotent_on_any_path_that_succeeds_once() {
        let inputs = ["/a/b/c", "/a//b/./c/", "/x", "/"];
        for p in inputs {
            let once = simplify(p).unwrap();
            let twice = simplify(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn build_virtual_preserves_trailing_slash() {
        assert_eq!(build_virtual("/a", "b/").unwrap(), "/a/b/");
        assert_eq!(build_virtual("/a", "b").unwrap(), "/a/b");
    }

    #[test]
    fn build_virtual_absolute_asked_replaces_cwd() {
        assert_eq!(build_virtual("/a/b", "/x/y").unwrap(), "/x/y");
    }

    #[test]
    fn build_remote_has_home_as_prefix() {
        let remote = build_remote("/u/alice", "/docs/report.txt").unwrap();
        assert_eq!(remote, "/u/alice/docs/report.txt");
        assert!(remote.starts_with("/u/alice"));
    }

    #[test]
    fn build_remote_rejects_escape() {
        // simplify() on the virtual path alone would already catch this,
        // but build_remote is exercised directly here as the sandbox's
        // second line of defense.
        assert!(build_remote("/u/alice", "/../../etc/passwd").is_err());
    }
}
