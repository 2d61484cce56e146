//! Target resolution and argument classification
//!
//! Turns the raw strings an application hands to the exec family into
//! absolute paths the policy engine can compare against managed lists.

use crate::canonicalize::{canonicalize, normalize_lexically, CanonicalizeMode};
use crate::error::{ExecGateError, Result};
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Search path used when `PATH` is not set (glibc's `_CS_PATH`).
///
/// Carries no empty entry, so the current directory is not searched when
/// `PATH` is unset, matching glibc since 2.24.
pub const DEFAULT_SEARCH_PATH: &str = "/bin:/usr/bin";

/// Resolve a program name or path the way `execvp` locates it.
///
/// Names containing a `/` are canonicalized directly (the target may not
/// exist yet). Bare names are looked up in `PATH`.
pub fn resolve(name: &OsStr) -> Result<PathBuf> {
    resolve_with(name, std::env::var_os("PATH").as_deref())
}

/// [`resolve`] with an explicit search path instead of the `PATH` variable.
pub fn resolve_with(name: &OsStr, search: Option<&OsStr>) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(ExecGateError::EmptyPath);
    }
    if name.as_bytes().contains(&b'/') {
        return canonicalize(Path::new(name), CanonicalizeMode::AllowMissing);
    }
    let found = search_path(name, search)?;
    canonicalize(&found, CanonicalizeMode::MustExist)
}

/// Find the first executable `name` in a colon-separated search path.
///
/// Empty entries (a leading, trailing or doubled `:`) mean the current
/// directory. When no candidate is usable and at least one was rejected for
/// lack of permission, the search fails with
/// [`ExecGateError::SearchPermissionDenied`] rather than
/// [`ExecGateError::CommandNotFound`]. Any unexpected error stops the search
/// immediately, as `execvp` does.
pub fn search_path(name: &OsStr, search: Option<&OsStr>) -> Result<PathBuf> {
    let search = search.unwrap_or(OsStr::new(DEFAULT_SEARCH_PATH));
    let mut got_eacces = false;

    for dir in search.as_bytes().split(|b| *b == b':') {
        let candidate = if dir.is_empty() {
            PathBuf::from(name)
        } else {
            Path::new(OsStr::from_bytes(dir)).join(name)
        };

        match check_executable(&candidate) {
            Ok(()) => {
                trace!("Search for {:?} matched {}", name, candidate.display());
                return Ok(candidate);
            }
            Err(Errno::EACCES) => got_eacces = true,
            Err(
                Errno::ENOENT
                | Errno::ENAMETOOLONG
                | Errno::ENOTDIR
                | Errno::ELOOP
                | Errno::EROFS
                | Errno::ETXTBSY,
            ) => {}
            Err(errno) => {
                return Err(ExecGateError::PathSearch {
                    name: name.to_os_string(),
                    source: std::io::Error::from_raw_os_error(errno as i32),
                })
            }
        }
    }

    if got_eacces {
        Err(ExecGateError::SearchPermissionDenied(name.to_os_string()))
    } else {
        Err(ExecGateError::CommandNotFound(name.to_os_string()))
    }
}

fn check_executable(candidate: &Path) -> std::result::Result<(), Errno> {
    access(candidate, AccessFlags::X_OK)?;
    // execve refuses directories with EACCES even though they pass X_OK
    match std::fs::metadata(candidate) {
        Ok(meta) if meta.is_dir() => Err(Errno::EACCES),
        Ok(_) => Ok(()),
        Err(e) => Err(Errno::from_raw(e.raw_os_error().unwrap_or(libc::ENOENT))),
    }
}

/// Best-effort judgment of what an exec argument refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgClassification {
    /// Whether the argument looks like it names a file
    pub is_path_like: bool,
    /// Absolute form of the argument, canonicalized where possible
    pub resolved: Option<PathBuf>,
}

/// Classify one exec argument.
pub fn classify_argument(arg: &OsStr) -> ArgClassification {
    classify_argument_with(arg, std::env::var_os("HOME").as_deref())
}

/// [`classify_argument`] with an explicit home directory for `~` expansion.
///
/// An argument is path-like if it contains a `/`, if it can be statted, or
/// if statting fails in a way that implies the file exists (permission
/// denied, symlink loop, name too long, overflow). The test leans towards
/// "path": a non-path wrongly treated as one simply matches nothing, while a
/// missed path could slip past the managed-file check.
///
/// If canonicalization fails, the lexically normalized path is used so a
/// managed prefix is still recognised.
pub fn classify_argument_with(arg: &OsStr, home: Option<&OsStr>) -> ArgClassification {
    if arg.is_empty() {
        return ArgClassification {
            is_path_like: false,
            resolved: None,
        };
    }

    let expanded = expand_home_with(arg, home);
    let target = expanded.as_deref().unwrap_or(Path::new(arg));

    let resolved = match canonicalize(target, CanonicalizeMode::AllowMissing) {
        Ok(path) => path,
        Err(e) => {
            trace!("Falling back to lexical form of {:?}: {}", arg, e);
            normalize_lexically(target)
        }
    };

    let is_path_like = arg.as_bytes().contains(&b'/') || stat_implies_existence(target);

    ArgClassification {
        is_path_like,
        resolved: Some(resolved),
    }
}

fn stat_implies_existence(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(_) => true,
        Err(e) => matches!(
            e.raw_os_error(),
            Some(libc::EACCES | libc::ELOOP | libc::ENAMETOOLONG | libc::EOVERFLOW)
        ),
    }
}

/// Expand a leading `~` or `~/` against `home`.
///
/// Returns `None` when the argument does not start with a home reference,
/// or when no home directory is known.
pub fn expand_home_with(arg: &OsStr, home: Option<&OsStr>) -> Option<PathBuf> {
    let bytes = arg.as_bytes();
    let rest = if bytes == b"~" {
        &[][..]
    } else {
        bytes.strip_prefix(b"~/")?
    };
    let home = home.filter(|h| !h.is_empty())?;

    let mut expanded = OsString::from(home);
    if !rest.is_empty() {
        expanded.push("/");
        expanded.push(OsStr::from_bytes(rest));
    }
    Some(PathBuf::from(expanded))
}
