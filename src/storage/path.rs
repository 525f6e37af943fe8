use std::path::{Path, PathBuf};

/// Translates a caller-supplied relative path into an absolute path under
/// the sandbox root. Leading separators are redundant, not an escape to the
/// filesystem root, so they are stripped before joining.
///
/// Purely textual: no existence checks, no normalization. The security gate
/// validates the result before anything touches the disk.
pub fn resolve(root: &Path, relative: &str) -> PathBuf {
    let trimmed = relative.trim_start_matches(|c| c == '/' || c == '\\');
    root.join(trimmed)
}
