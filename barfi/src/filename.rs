/// Suffix marking an in-progress upload in direct mode. Names ending in
/// it are never accepted from peers and never enumerated as waiting.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Maps a peer-supplied base name to an absolute path inside the staging
/// root, or `None` if the name is unsafe. The gate never touches the
/// filesystem.
///
/// A name is accepted only if it survives every host filesystem we run
/// on: no path separators, none of the punctuation Windows reserves, no
/// control characters, no leading/trailing whitespace, at most 255 bytes,
/// not `.` or `..`, and not ending in the partial suffix.
pub(crate) fn disk_path(root: &std::path::Path, base_name: &str) -> Option<std::path::PathBuf> {
    if base_name.is_empty() || base_name.len() > 255 {
        return None;
    }
    if base_name.trim() != base_name {
        return None;
    }
    if base_name == "." || base_name == ".." {
        return None;
    }
    if base_name.ends_with(PARTIAL_SUFFIX) {
        return None;
    }
    if !base_name.chars().all(valid_filename_char) {
        return None;
    }
    Some(root.join(base_name))
}

fn valid_filename_char(c: char) -> bool {
    match c {
        '/' => false,
        // Invalid on Windows, rejected everywhere so a file received on
        // one OS stays portable to the others.
        '\\' | ':' | '*' | '"' | '<' | '>' | '|' => false,
        _ => !c.is_control(),
    }
}
