//! File-backed managed lists and their process-wide cache
//!
//! A managed list is a newline-separated file of absolute path prefixes. The
//! helper-binary, managed-binary and managed-file lists all share this format
//! and the same whole-segment prefix matcher.
//!
//! [`ListCache`] keeps the last successfully read content of each list file
//! and re-reads it only when the file's modification time moves forward.
//! Read failures never propagate: they degrade to the previous content, or to
//! "no list" when nothing was ever read.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, trace, warn};

const ENTRY_SEPARATOR: u8 = b'\n';
const PATH_SEPARATOR: u8 = b'/';

/// Whether `entry` is a whole-segment prefix of `path`.
///
/// Holds iff `path == entry` or `path` continues with `/` right after
/// `entry`, so `/a/b` covers `/a/b/c` but not `/a/bc`. A trailing `/` on the
/// entry is ignored, and the root entry `/` covers every absolute path.
#[must_use]
pub fn path_matches_entry(entry: &[u8], path: &[u8]) -> bool {
    let entry = trim_trailing_separators(entry);
    if entry.is_empty() {
        return false;
    }
    if entry == [PATH_SEPARATOR] {
        return path.first() == Some(&PATH_SEPARATOR);
    }
    match path.strip_prefix(entry) {
        Some(rest) => rest.is_empty() || rest[0] == PATH_SEPARATOR,
        None => false,
    }
}

fn trim_trailing_separators(entry: &[u8]) -> &[u8] {
    let mut end = entry.len();
    while end > 1 && entry[end - 1] == PATH_SEPARATOR {
        end -= 1;
    }
    &entry[..end]
}

/// Content of one managed list file
///
/// Cloning is cheap: the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedList {
    content: Arc<[u8]>,
}

impl ManagedList {
    /// Wrap raw list file content.
    #[must_use]
    pub fn from_bytes(content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// The raw content exactly as read from disk.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }

    /// Iterate the entries of the list.
    ///
    /// Blank lines and `#` comments are skipped; a trailing `\r` is dropped.
    pub fn entries(&self) -> impl Iterator<Item = &Path> {
        self.content
            .split(|b| *b == ENTRY_SEPARATOR)
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty() && line[0] != b'#')
            .map(|line| Path::new(OsStr::from_bytes(line)))
    }

    /// True if the list holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Returns the first entry covering `path`, if any.
    #[must_use]
    pub fn matching_entry(&self, path: &Path) -> Option<&Path> {
        let path = path.as_os_str().as_bytes();
        self.entries()
            .find(|entry| path_matches_entry(entry.as_os_str().as_bytes(), path))
    }

    /// True if any entry covers `path`.
    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.matching_entry(path).is_some()
    }
}

#[derive(Debug)]
struct CachedList {
    list: ManagedList,
    modified: SystemTime,
}

type Slot = Arc<Mutex<Option<CachedList>>>;

/// Process-wide cache of managed list files keyed by their path
///
/// Each backing file gets its own slot lock, so refreshing one list never
/// blocks queries against another, and a reader can never observe content
/// paired with the wrong modification time.
#[derive(Debug, Default)]
pub struct ListCache {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    reads: AtomicUsize,
}

impl ListCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current content of the list stored at `file_path`.
    ///
    /// Re-reads the file on first use and whenever its modification time is
    /// strictly newer than the cached one. Returns the previous content when
    /// the file can no longer be statted or read, and `None` if it was never
    /// read successfully.
    pub fn get_list(&self, file_path: &Path) -> Option<ManagedList> {
        let slot = self.slot(file_path);
        let mut cached = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let modified = match std::fs::metadata(file_path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                debug!("Cannot stat list {}: {}", file_path.display(), e);
                return cached.as_ref().map(|c| c.list.clone());
            }
        };

        let fresh = cached.as_ref().is_some_and(|c| modified <= c.modified);
        if fresh {
            trace!("List {} served from cache", file_path.display());
            return cached.as_ref().map(|c| c.list.clone());
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        match std::fs::read(file_path) {
            Ok(content) => {
                debug!(
                    "Loaded list {} ({} bytes)",
                    file_path.display(),
                    content.len()
                );
                let list = ManagedList::from_bytes(content);
                *cached = Some(CachedList {
                    list: list.clone(),
                    modified,
                });
                Some(list)
            }
            Err(e) => {
                warn!("Failed to read list {}: {}", file_path.display(), e);
                cached.as_ref().map(|c| c.list.clone())
            }
        }
    }

    /// Number of times a backing file was actually read.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn slot(&self, file_path: &Path) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(file_path.to_path_buf()).or_default())
    }
}
