//! Absolute path handling.
//!
//! Paths are `/`-separated UTF-8 strings resolved from the root; there
//! is no notion of a working directory, `.` or `..`.

/// Splits a path into its non-empty components.
///
/// Consecutive and trailing slashes are ignored. The empty string and
/// `"/"` both yield no components.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|component| !component.is_empty()).collect()
}

/// Joins a parent path and a child name without doubling the slash
/// after the root.
pub fn join_child(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_ordinary_paths() {
        assert_eq!(split_path("/a/b/c.txt"), ["a", "b", "c.txt"]);
        assert_eq!(split_path("/a"), ["a"]);
    }

    #[test]
    fn split_degenerate_paths() {
        assert!(split_path("").is_empty());
        assert!(split_path("/").is_empty());
        assert!(split_path("///").is_empty());
        assert_eq!(split_path("//a//b/"), ["a", "b"]);
        assert_eq!(split_path("a/b"), ["a", "b"]);
    }

    #[test]
    fn join_below_root() {
        assert_eq!(join_child("/", "a"), "/a");
        assert_eq!(join_child("/a", "b"), "/a/b");
        assert_eq!(join_child("/a/b", "c.txt"), "/a/b/c.txt");
    }
}
