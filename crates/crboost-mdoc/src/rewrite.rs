//! Line-level rewriting applied when session files are imported into a
//! project. Everything except the touched lines is preserved byte-for-byte
//! so re-imports and diffs stay readable.

/// Marker key appended to imported session files. Records the absolute
/// source path so a re-import of different data under the same name is
/// detected instead of silently overwriting.
pub const ROOT_MDOC_KEY: &str = "CryoBoost_RootMdocPath";

/// Rewrite every `SubFramePath` to the bare file name with `prefix`
/// prepended. Returns the rewritten content and the original basenames, in
/// order of appearance.
///
/// Session files written by acquisition software routinely carry Windows
/// paths; both separators are understood.
pub fn rewrite_subframe_paths(content: &str, prefix: &str) -> (String, Vec<String>) {
    let mut basenames = Vec::new();
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("SubFramePath") {
            if let Some((_, value)) = rest.split_once('=') {
                let basename = path_basename(value.trim());
                out.push_str(&format!("SubFramePath = {prefix}{basename}\n"));
                basenames.push(basename.to_string());
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    (out, basenames)
}

/// The recorded source path, if this content was imported before.
pub fn root_marker(content: &str) -> Option<String> {
    for line in content.lines() {
        if let Some(rest) = line.trim().strip_prefix(ROOT_MDOC_KEY) {
            if let Some((_, value)) = rest.split_once('=') {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Append the source-path marker line.
pub fn append_root_marker(content: &str, source: &str) -> String {
    let mut out = content.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("{ROOT_MDOC_KEY} = {source}\n"));
    out
}

/// Final component of a path using either separator.
fn path_basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
