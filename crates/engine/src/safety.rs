//! Entry naming and path safety.
//!
//! Extraction validates every entry path before anything is written so an
//! archive cannot place files outside the destination (zip-slip). Creation
//! reduces source display names to a single safe path component.

use crate::error::SecurityError;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Archive entry kinds the codecs distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Links, devices, FIFOs and anything else; never extracted
    Other,
}

/// Validates and normalizes an archive entry path.
///
/// Rejects absolute paths and `..` components, drops `.` components and
/// redundant separators, and rejects paths that normalize to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use archive_engine::safety::validate_entry_path;
///
/// let safe_path = validate_entry_path(Path::new("dir/./file.txt")).unwrap();
/// assert_eq!(safe_path, Path::new("dir/file.txt"));
///
/// assert!(validate_entry_path(Path::new("../../etc/passwd")).is_err());
/// assert!(validate_entry_path(Path::new("/etc/passwd")).is_err());
/// ```
pub fn validate_entry_path(path: &Path) -> Result<PathBuf, SecurityError> {
    if path.is_absolute() {
        return Err(SecurityError::AbsolutePath(path.display().to_string()));
    }

    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => continue,
            Component::ParentDir => {
                return Err(SecurityError::PathTraversal(format!(
                    "Path contains '..' component: {}",
                    path.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SecurityError::AbsolutePath(path.display().to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(SecurityError::PathTraversal(
            "Path normalizes to empty".to_string(),
        ));
    }

    Ok(normalized)
}

/// Reduce a source display name to one safe archive entry name.
///
/// Only the final path component is kept; characters outside
/// `[A-Za-z0-9._- ]` become `_`. Names that end up empty, `.` or `..` fall
/// back to `file_<index>`.
pub fn safe_entry_name(display_name: &str, index: usize) -> String {
    let last = display_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("");

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        format!("file_{}", index)
    } else {
        cleaned
    }
}

/// Make `name` unique within `taken` by appending ` (1)`, ` (2)`, ... before
/// the extension, then record it.
pub fn dedupe_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.clone(), None),
    };

    let mut i = 1;
    loop {
        let candidate = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        i += 1;
    }
}
