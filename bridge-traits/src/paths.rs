//! Lexical path helpers shared by the registries and the crawler.
//!
//! Paths are stored as normalized absolute strings: no `.` or `..` segments,
//! no repeated separators and no trailing slash (except for `/` itself).
//! Nothing here touches the filesystem.

use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            Component::Normal(segment) => out.push(segment),
        }
    }

    let normalized = out.to_string_lossy().into_owned();
    if normalized.is_empty() {
        ".".to_string()
    } else {
        normalized
    }
}

/// True when `path` equals `root` or lies below it, comparing whole components.
pub fn is_within(path: impl AsRef<Path>, root: impl AsRef<Path>) -> bool {
    let path = normalize_path(path);
    let root = normalize_path(root);
    Path::new(&path).starts_with(Path::new(&root))
}

/// Parent directory of a normalized path, if any.
pub fn parent_dir(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
}

/// Final component of a path, or the path itself for roots.
pub fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Lower-cased extension without the dot.
pub fn extension_of(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/data/photos/"), "/data/photos");
        assert_eq!(normalize_path("/data//photos/./2023"), "/data/photos/2023");
        assert_eq!(normalize_path("/data/photos/../videos"), "/data/videos");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("relative/../x"), "x");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/data/photos/2023/a.jpg", "/data/photos"));
        assert!(is_within("/data/photos", "/data/photos/"));
        assert!(!is_within("/data/photos-old/a.jpg", "/data/photos"));
        assert!(!is_within("/data", "/data/photos"));
    }

    #[test]
    fn test_parent_and_base_name() {
        assert_eq!(parent_dir("/data/photos/a.jpg").as_deref(), Some("/data/photos"));
        assert_eq!(parent_dir("/"), None);
        assert_eq!(base_name("/data/photos/2023"), "2023");
        assert_eq!(base_name("/"), "/");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("/a/B.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("/a/README"), None);
    }
}
