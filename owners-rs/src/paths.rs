//! Normalised path keys.
//!
//! Files are keyed as `./dir/name`, directories as `./dir/` and the root as
//! `./`. Paths handed to a [`RepoReader`](crate::repo::RepoReader) drop the
//! leading `./`.

/// Key of the repository root directory.
pub const ROOT: &str = "./";

/// Normalise a file path into its `./`-prefixed key. Empty and `.` segments
/// are dropped; `..` segments are kept as-is since changed files never carry
/// them.
pub fn file_key(path: &str) -> String {
    let mut key = String::from(ROOT);
    let mut first = true;
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if !first {
            key.push('/');
        }
        key.push_str(segment);
        first = false;
    }
    key
}

/// Split a file key into its directory key and base name.
pub fn split_file(file_key: &str) -> (&str, &str) {
    match file_key.rfind('/') {
        Some(idx) => (&file_key[..=idx], &file_key[idx + 1..]),
        None => (ROOT, file_key),
    }
}

/// The parent of a directory key, or `None` for the root.
pub fn parent_dir(dir_key: &str) -> Option<&str> {
    if dir_key == ROOT {
        return None;
    }
    let trimmed = dir_key.strip_suffix('/').unwrap_or(dir_key);
    trimmed.rfind('/').map(|idx| &trimmed[..=idx])
}

/// Scope key for a per-file glob declared in `dir_key`.
pub fn glob_scope(dir_key: &str, glob: &str) -> String {
    format!("{}{}", dir_key, glob)
}

/// Repository-relative path of a file named `name` inside `dir_key`.
pub fn repo_path(dir_key: &str, name: &str) -> String {
    let dir = dir_key.strip_prefix(ROOT).unwrap_or(dir_key);
    format!("{}{}", dir, name)
}

/// Resolve an include `target` against the repository-relative path of the
/// file containing it. A leading `/` anchors the target at the root.
/// Returns `None` when `..` would climb above the root.
pub fn resolve_include(including_file: &str, target: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    if !target.starts_with('/') {
        segments.extend(including_file.split('/').filter(|s| !s.is_empty()));
        // Drop the including file's own name.
        segments.pop();
    }
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            _ => segments.push(segment),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
