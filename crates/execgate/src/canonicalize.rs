//! Path canonicalization
//!
//! Resolves a path to an absolute form free of symlinks, `.` and `..`,
//! walking it one component at a time with `lstat`/`readlink`.
//! Unlike [`std::fs::canonicalize`], the [`CanonicalizeMode::AllowMissing`]
//! mode tolerates a missing tail: the first missing component and everything
//! after it are appended lexically. That lets exec targets and arguments that
//! do not exist yet still be compared against managed paths.

use crate::error::{ExecGateError, Result};
use std::collections::{HashSet, VecDeque};
use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

/// Hard cap on symlink expansions per call, matching the kernel's limit.
const MAX_SYMLINK_EXPANSIONS: usize = 40;

/// How missing components are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalizeMode {
    /// Every component must exist
    MustExist,
    /// Resolve as far as the filesystem allows, append the rest verbatim
    AllowMissing,
}

/// Canonicalize `path` according to `mode`.
///
/// Relative paths are resolved against the current working directory.
/// Symlink cycles fail with [`ExecGateError::SymlinkLoop`]. A cycle is a
/// symlink expanded twice with the same remaining suffix, so a link that is
/// legitimately traversed again on the way to a different final name does
/// not count.
pub fn canonicalize(path: &Path, mode: CanonicalizeMode) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ExecGateError::EmptyPath);
    }

    let mut resolved = if path.is_absolute() {
        PathBuf::from("/")
    } else {
        std::env::current_dir().map_err(|e| ExecGateError::PathCanonicalization {
            path: path.to_path_buf(),
            source: e,
        })?
    };

    let mut pending: VecDeque<OsString> = split_components(path.as_os_str()).collect();
    let mut seen_links: HashSet<(u64, u64, OsString)> = HashSet::new();
    let mut expansions = 0usize;
    let mut missing = false;

    while let Some(component) = pending.pop_front() {
        if component == "." {
            continue;
        }
        if component == ".." {
            resolved.pop();
            continue;
        }

        let candidate = resolved.join(&component);
        if missing {
            resolved = candidate;
            continue;
        }

        let meta = match std::fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => match mode {
                CanonicalizeMode::MustExist => return Err(ExecGateError::PathNotFound(candidate)),
                CanonicalizeMode::AllowMissing => {
                    missing = true;
                    resolved = candidate;
                    continue;
                }
            },
            Err(e) => {
                return Err(ExecGateError::PathCanonicalization {
                    path: candidate,
                    source: e,
                })
            }
        };

        if meta.file_type().is_symlink() {
            let remaining = join_components(&pending);
            expansions += 1;
            if expansions > MAX_SYMLINK_EXPANSIONS
                || !seen_links.insert((meta.dev(), meta.ino(), remaining))
            {
                return Err(ExecGateError::SymlinkLoop(path.to_path_buf()));
            }

            let target = std::fs::read_link(&candidate).map_err(|e| {
                ExecGateError::PathCanonicalization {
                    path: candidate.clone(),
                    source: e,
                }
            })?;
            if target.is_absolute() {
                resolved = PathBuf::from("/");
            }
            for part in split_components(target.as_os_str())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
            {
                pending.push_front(part);
            }
            continue;
        }

        if !meta.is_dir() && !pending.is_empty() {
            return Err(ExecGateError::NotADirectory(candidate));
        }
        resolved = candidate;
    }

    Ok(resolved)
}

/// Make `path` absolute and collapse `.`/`..` without touching the filesystem
/// beyond reading the working directory.
///
/// Used as a fallback when canonicalization fails, so that an unresolvable
/// path is still compared in its most likely form.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = if path.is_absolute() {
        PathBuf::from("/")
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    };

    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Path of the file behind an open descriptor, read from `/proc/self/fd`.
pub fn read_fd_path(fd: i32) -> Result<PathBuf> {
    if fd < 0 {
        return Err(ExecGateError::InvalidFileDescriptor(fd));
    }
    let link = PathBuf::from(format!("/proc/self/fd/{fd}"));
    std::fs::read_link(&link).map_err(|e| ExecGateError::FdResolution { fd, source: e })
}

fn split_components(path: &OsStr) -> impl Iterator<Item = OsString> + '_ {
    path.as_bytes()
        .split(|b| *b == b'/')
        .filter(|part| !part.is_empty())
        .map(|part| OsStr::from_bytes(part).to_os_string())
}

fn join_components(parts: &VecDeque<OsString>) -> OsString {
    let mut joined = OsString::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            joined.push("/");
        }
        joined.push(part);
    }
    joined
}
