/*!
 * Cgroup Resolution
 */

use std::fs;
use std::path::{Path, PathBuf};

/// Find the cgroup directory named `name` directly under `root`
///
/// Matching is on the first path component only; returns `None` if the root
/// is unreadable or nothing matches.
pub fn find_cgroup_path(root: &Path, name: &str) -> Option<PathBuf> {
    fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| entry.file_name() == name)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
}
