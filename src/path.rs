//! Filer path helpers

/// Absolute, slash-separated path with `.`/`..` resolved and no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Normalized path with the trailing slash the filer expects for directories.
pub fn dir_path(path: &str) -> String {
    let normalized = normalize_path(path);
    if normalized.ends_with('/') {
        normalized
    } else {
        normalized + "/"
    }
}

/// Join segments without doubling slashes.
pub fn join_path(parts: &[&str]) -> String {
    normalize_path(&parts.join("/"))
}

/// Last path segment; empty for the root.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Percent-encode each segment, keeping `/` separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
