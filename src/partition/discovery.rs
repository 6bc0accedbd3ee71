use super::state::parse_state;
use crate::core::{MappleError, PartitionState, Result};
use crate::storage::{PartitionHandle, PartitionStore};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Matches `*.<ext>.*`, the naming convention of every store file.
/// Hidden files are excluded, as a shell glob would.
fn partition_pattern(extension: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(r"^[^.].*\.{}\..*$", regex::escape(extension)))?)
}

/// Matches `<base>.<ext>.*`.
fn single_file_pattern(base: &str, extension: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(
        r"^{}\.{}\..*$",
        regex::escape(base),
        regex::escape(extension)
    ))?)
}

/// Files in `dir` whose name matches `pattern`, sorted by name.
fn list_matching(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| MappleError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MappleError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        // Non-UTF-8 names are matched on their lossy form and kept as-is.
        let name = entry.file_name();
        if pattern.is_match(&name.to_string_lossy()) {
            names.push(name);
        }
    }
    names.sort();

    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Resolve exactly one `<base>.<ext>.*` file in `dir`.
pub fn find_single_file(base: &str, dir: &Path, extension: &str) -> Result<PathBuf> {
    let pattern = single_file_pattern(base, extension)?;
    let mut matches = list_matching(dir, &pattern)?;
    if matches.len() != 1 {
        return Err(MappleError::AmbiguousOrMissingFile {
            pattern: dir.join(format!("{}.{}.*", base, extension)).display().to_string(),
            matches: matches.len(),
        });
    }
    Ok(matches.remove(0))
}

/// Paths of every partition in `dir` whose recorded state is active.
///
/// Files that fail to open, or that carry no readable state record, are
/// skipped rather than failing the scan.
pub fn find_active_partitions<S: PartitionStore>(
    store: &S,
    dir: &Path,
    extension: &str,
    state_record: &str,
) -> Result<Vec<PathBuf>> {
    let pattern = partition_pattern(extension)?;
    let mut active = Vec::new();

    for path in list_matching(dir, &pattern)? {
        let handle = match store.open_partition(&path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping partition file that failed to open");
                continue;
            }
        };

        match read_state(&handle, state_record) {
            Some(PartitionState::Active) => active.push(path),
            Some(state) => debug!(path = %path.display(), %state, "skipping inactive partition"),
            None => debug!(path = %path.display(), "skipping partition without a usable state record"),
        }
    }

    Ok(active)
}

fn read_state<H: PartitionHandle>(handle: &H, state_record: &str) -> Option<PartitionState> {
    let raw = handle.read_local(state_record).ok().flatten()?;
    let text = String::from_utf8_lossy(&raw);
    parse_state(&text).ok().flatten()
}
