//! Error types for the execgate library

use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while mediating an exec call
#[derive(Error, Debug)]
pub enum ExecGateError {
    // Path errors
    #[error("Empty path")]
    EmptyPath,

    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Too many levels of symbolic links: {0}")]
    SymlinkLoop(PathBuf),

    #[error("Failed to canonicalize path {path}: {source}")]
    PathCanonicalization {
        path: PathBuf,
        source: std::io::Error,
    },

    // Search path errors
    #[error("Command not found in search path: {}", .0.to_string_lossy())]
    CommandNotFound(OsString),

    #[error("Permission denied for every candidate of '{}'", .0.to_string_lossy())]
    SearchPermissionDenied(OsString),

    #[error("Search for '{}' failed: {source}", name.to_string_lossy())]
    PathSearch {
        name: OsString,
        source: std::io::Error,
    },

    // File descriptor errors
    #[error("Invalid file descriptor: {0}")]
    InvalidFileDescriptor(i32),

    #[error("Failed to resolve file descriptor {fd}: {source}")]
    FdResolution { fd: i32, source: std::io::Error },

    // Configuration errors
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    // Association profile errors
    #[error("Profile read error at {path}: {source}")]
    ProfileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Profile parse error at {path}: {reason}")]
    ProfileParse { path: PathBuf, reason: String },

    #[error("{member} already belongs to association group {group}")]
    AssociationConflict { member: PathBuf, group: PathBuf },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for execgate operations
pub type Result<T> = std::result::Result<T, ExecGateError>;
