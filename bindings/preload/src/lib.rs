//! `LD_PRELOAD` shim routing exec-family calls through execgate.
//!
//! Loaded into a sandboxed application, this shared object interposes
//! `execve`, `execvpe`, `fexecve`, `execv` and `execvp`. Every call is
//! judged by the process-wide [`execgate::ExecGate`]; allowed calls reach
//! libc unchanged, delegated ones exec `<sentinel-prefix><target>` and then
//! fail with `EACCES`. Callers only ever observe libc's error contract.
//!
//! Diagnostics go to stderr, filtered by the `EXECGATE_LOG` environment
//! variable (`warn` when unset).
//!
//! # Query surface
//!
//! A few functions let cooperating tools inspect association groups.
//!
//! - Returned `char*` strings are caller-owned. Free with
//!   `execgate_string_free()`. NULL is safe to pass.
//!
//! - `execgate_last_error()` returns a caller-owned string, or NULL if no
//!   error has occurred on this thread.
//!
//! - Input `const char*` parameters are borrowed.

pub mod hooks;
pub mod real;

use execgate::{ExecGate, ExecGateError};
use std::cell::RefCell;
use std::ffi::{CStr, CString, OsStr};
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

pub use hooks::*;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "EXECGATE_LOG";

static LOGGING: OnceLock<()> = OnceLock::new();

/// Install the stderr subscriber once, unless the host already has one.
pub(crate) fn init_logging() {
    LOGGING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

pub(crate) fn set_errno(code: c_int) {
    // SAFETY: __errno_location returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() = code };
}

// ---------------------------------------------------------------------------
// Thread-local error store
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for the current thread.
pub(crate) fn set_last_error(msg: &str) {
    LAST_ERROR.with(|cell| {
        let cstr = match CString::new(msg) {
            Ok(s) => s,
            Err(nul_err) => {
                let pos = nul_err.nul_position();
                let mut bytes = nul_err.into_vec();
                bytes.truncate(pos);
                match CString::new(bytes) {
                    Ok(s) => s,
                    Err(_) => return,
                }
            }
        };
        *cell.borrow_mut() = Some(cstr);
    });
}

fn os_error_or(source: &std::io::Error, fallback: c_int) -> c_int {
    source.raw_os_error().unwrap_or(fallback)
}

/// Map an `ExecGateError` to the errno an exec call reports and store the
/// message.
///
/// Every variant is matched explicitly so the compiler flags new variants
/// that need a mapping.
pub(crate) fn map_errno(e: &ExecGateError) -> c_int {
    set_last_error(&e.to_string());
    match e {
        ExecGateError::EmptyPath
        | ExecGateError::PathNotFound(_)
        | ExecGateError::CommandNotFound(_) => libc::ENOENT,
        ExecGateError::NotADirectory(_) => libc::ENOTDIR,
        ExecGateError::SymlinkLoop(_) => libc::ELOOP,
        ExecGateError::SearchPermissionDenied(_) => libc::EACCES,
        ExecGateError::PathCanonicalization { source, .. }
        | ExecGateError::PathSearch { source, .. }
        | ExecGateError::ConfigRead { source, .. }
        | ExecGateError::ProfileRead { source, .. } => os_error_or(source, libc::ENOENT),
        ExecGateError::InvalidFileDescriptor(_) | ExecGateError::FdResolution { .. } => {
            libc::EINVAL
        }
        ExecGateError::ConfigParse(_)
        | ExecGateError::ProfileParse { .. }
        | ExecGateError::AssociationConflict { .. } => libc::EINVAL,
        ExecGateError::Io(source) => os_error_or(source, libc::ENOENT),
    }
}

// ---------------------------------------------------------------------------
// String helpers
// ---------------------------------------------------------------------------

/// Convert a Rust `String` to a caller-owned C string.
///
/// Returns NULL and sets the last error if the string contains an interior
/// NUL byte.
pub(crate) fn rust_string_to_c(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(nul_err) => {
            set_last_error(&format!(
                "string contains interior NUL byte at position {}",
                nul_err.nul_position()
            ));
            std::ptr::null_mut()
        }
    }
}

/// Borrow a C string as a path. Paths need not be UTF-8.
///
/// # Safety
///
/// The pointer must be null or point to a valid null-terminated C string
/// that remains valid for the lifetime `'a`.
pub(crate) unsafe fn c_str_to_path<'a>(ptr: *const c_char) -> Option<&'a Path> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees ptr is a valid null-terminated C string.
    let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes();
    Some(Path::new(OsStr::from_bytes(bytes)))
}

// ---------------------------------------------------------------------------
// Public FFI: association queries
// ---------------------------------------------------------------------------

/// Colon-separated list of every member of `path`'s association group.
///
/// Returns an empty string when `path` belongs to no group, and NULL (with
/// the last error set) when `path` is NULL.
///
/// Caller must free the returned string with `execgate_string_free()`.
///
/// # Safety
///
/// `path` must be NULL or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn execgate_list_siblings(path: *const c_char) -> *mut c_char {
    init_logging();
    // SAFETY: caller guarantees path is NULL or a valid C string.
    let Some(path) = (unsafe { c_str_to_path(path) }) else {
        set_last_error("path is NULL");
        return std::ptr::null_mut();
    };
    rust_string_to_c(ExecGate::global().registry().list_siblings_string(path))
}

/// Whether `callee` belongs to the association group of `caller`.
///
/// Returns 1 if associated, 0 if not, and -1 (with the last error set) if
/// either argument is NULL.
///
/// # Safety
///
/// Both arguments must be NULL or valid null-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn execgate_is_associated(
    caller: *const c_char,
    callee: *const c_char,
) -> c_int {
    init_logging();
    // SAFETY: caller guarantees both pointers are NULL or valid C strings.
    let (caller, callee) = unsafe { (c_str_to_path(caller), c_str_to_path(callee)) };
    match (caller, callee) {
        (Some(caller), Some(callee)) => {
            c_int::from(ExecGate::global().registry().is_associated(caller, callee))
        }
        _ => {
            set_last_error("caller and callee must not be NULL");
            -1
        }
    }
}

// ---------------------------------------------------------------------------
// Public FFI: error and string management
// ---------------------------------------------------------------------------

/// Get the last error message for the current thread.
///
/// Returns a caller-owned copy, or NULL if no error has occurred.
/// Caller must free the returned string with `execgate_string_free()`.
#[no_mangle]
pub extern "C" fn execgate_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| match cell.borrow().as_ref() {
        Some(cstr) => match CString::new(cstr.as_bytes().to_vec()) {
            Ok(copy) => copy.into_raw(),
            Err(_) => std::ptr::null_mut(),
        },
        None => std::ptr::null_mut(),
    })
}

/// Clear the last error for the current thread.
#[no_mangle]
pub extern "C" fn execgate_clear_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Free a string previously returned by an execgate function.
///
/// NULL-safe (no-op on NULL).
///
/// # Safety
///
/// `s` must be NULL or a pointer previously returned by an execgate function.
#[no_mangle]
pub unsafe extern "C" fn execgate_string_free(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: The pointer was created by CString::into_raw() in this
        // library.
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Get the execgate version string.
///
/// Caller must free the returned string with `execgate_string_free()`.
#[no_mangle]
pub extern "C" fn execgate_version() -> *mut c_char {
    rust_string_to_c(env!("CARGO_PKG_VERSION").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        // SAFETY: ptr was just returned by an execgate function.
        let s = unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned();
        // SAFETY: ptr is caller-owned.
        unsafe { execgate_string_free(ptr) };
        s
    }

    #[test]
    fn test_errno_mapping() {
        let cases = [
            (ExecGateError::EmptyPath, libc::ENOENT),
            (ExecGateError::PathNotFound(PathBuf::from("/x")), libc::ENOENT),
            (ExecGateError::CommandNotFound(OsString::from("vlc")), libc::ENOENT),
            (
                ExecGateError::SearchPermissionDenied(OsString::from("vlc")),
                libc::EACCES,
            ),
            (ExecGateError::SymlinkLoop(PathBuf::from("/x")), libc::ELOOP),
            (ExecGateError::NotADirectory(PathBuf::from("/x")), libc::ENOTDIR),
            (ExecGateError::InvalidFileDescriptor(-1), libc::EINVAL),
            (
                ExecGateError::PathCanonicalization {
                    path: PathBuf::from("/x"),
                    source: std::io::Error::from_raw_os_error(libc::ENAMETOOLONG),
                },
                libc::ENAMETOOLONG,
            ),
            (
                ExecGateError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")),
                libc::ENOENT,
            ),
        ];
        for (error, errno) in cases {
            assert_eq!(map_errno(&error), errno, "{error}");
        }
    }

    #[test]
    fn test_map_errno_records_message() {
        execgate_clear_error();
        map_errno(&ExecGateError::CommandNotFound(OsString::from("vlc")));
        let msg = take_string(execgate_last_error());
        assert!(msg.contains("vlc"), "unexpected message: {msg}");
        execgate_clear_error();
        assert!(execgate_last_error().is_null());
    }

    #[test]
    fn test_list_siblings_builtin_group() {
        // SAFETY: valid C string literal.
        let siblings = take_string(unsafe { execgate_list_siblings(c"/usr/bin/cvlc".as_ptr()) });
        assert!(siblings.split(':').any(|p| p == "/usr/bin/vlc"));
        assert!(siblings.split(':').any(|p| p == "/usr/bin/cvlc"));

        // SAFETY: valid C string literal.
        let none = take_string(unsafe { execgate_list_siblings(c"/bin/true".as_ptr()) });
        assert!(none.is_empty());
    }

    #[test]
    fn test_list_siblings_null() {
        // SAFETY: deliberate NULL.
        assert!(unsafe { execgate_list_siblings(std::ptr::null()) }.is_null());
        execgate_clear_error();
    }

    #[test]
    fn test_is_associated() {
        // SAFETY: valid C string literals and a deliberate NULL.
        unsafe {
            assert_eq!(
                execgate_is_associated(c"/usr/bin/cvlc".as_ptr(), c"/usr/bin/vlc".as_ptr()),
                1
            );
            assert_eq!(
                execgate_is_associated(c"/usr/bin/vlc".as_ptr(), c"/usr/bin/thunar".as_ptr()),
                0
            );
            assert_eq!(
                execgate_is_associated(std::ptr::null(), c"/usr/bin/vlc".as_ptr()),
                -1
            );
        }
        execgate_clear_error();
    }

    #[test]
    fn test_string_free_null_safe() {
        // SAFETY: deliberate NULL.
        unsafe { execgate_string_free(std::ptr::null_mut()) };
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!take_string(execgate_version()).is_empty());
    }
}
