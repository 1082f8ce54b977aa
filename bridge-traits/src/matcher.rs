//! Glob matching for exclusion patterns and supported media extensions.
//!
//! The same compiled globs back both in-process matching and the regular
//! expressions handed to the database, so a path is excluded by exactly the
//! same rules wherever the check runs.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{BridgeError, Result};
use crate::paths::extension_of;

/// Compiled library exclusion patterns.
#[derive(Debug, Clone)]
pub struct ExclusionMatcher {
    patterns: Vec<String>,
    globs: Vec<Glob>,
    set: GlobSet,
}

impl ExclusionMatcher {
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();

        let globs = patterns
            .iter()
            .map(|pattern| {
                GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| BridgeError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let set = globs
            .iter()
            .cloned()
            .fold(&mut GlobSetBuilder::new(), |builder, glob| builder.add(glob))
            .build()
            .map_err(|e| BridgeError::InvalidPattern {
                pattern: patterns.join(","),
                message: e.to_string(),
            })?;

        Ok(Self {
            patterns,
            globs,
            set,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            globs: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    /// True when a file path matches any pattern.
    pub fn is_match(&self, path: impl AsRef<Path>) -> bool {
        self.set.is_match(path.as_ref())
    }

    /// True when a directory, or anything below it, is covered by a pattern
    /// such as `**/@eaDir/**`.
    pub fn is_dir_excluded(&self, dir: &str) -> bool {
        if self.set.is_match(dir) {
            return true;
        }
        let with_slash = format!("{}/", dir.trim_end_matches('/'));
        self.set.is_match(with_slash.as_str())
    }

    /// Regular expressions equivalent to the compiled globs, in the syntax of
    /// the `regex` crate that backs SQLite's `REGEXP` operator.
    pub fn sql_regexes(&self) -> Vec<String> {
        self.globs
            .iter()
            .map(|glob| glob.regex().trim_start_matches("(?-u)").to_string())
            .collect()
    }
}

/// Accepts files whose extension is in the supported set.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new(extensions: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Empty filters accept everything.
    pub fn accepts(&self, path: impl AsRef<Path>) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        extension_of(path)
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }
}

/// Combined filter used by the watcher: supported media file and not excluded.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    extensions: ExtensionFilter,
    exclusions: ExclusionMatcher,
}

impl PathMatcher {
    pub fn new(extensions: ExtensionFilter, exclusions: ExclusionMatcher) -> Self {
        Self {
            extensions,
            exclusions,
        }
    }

    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.extensions.accepts(path) && !self.exclusions.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_exclusions() -> ExclusionMatcher {
        ExclusionMatcher::new(["**/@eaDir/**", "**/._*", "**/#recycle/**", "**/#snapshot/**"])
            .unwrap()
    }

    #[test]
    fn test_exclusion_matches_files() {
        let matcher = default_exclusions();
        assert!(matcher.is_match("/data/photos/@eaDir/thumb.jpg"));
        assert!(matcher.is_match("/data/photos/._a.jpg"));
        assert!(matcher.is_match("/data/#recycle/old/a.jpg"));
        assert!(!matcher.is_match("/data/photos/a.jpg"));
        assert!(!matcher.is_match("/data/photos/x._a.jpg"));
    }

    #[test]
    fn test_exclusion_matches_directories() {
        let matcher = default_exclusions();
        assert!(matcher.is_dir_excluded("/data/photos/@eaDir"));
        assert!(matcher.is_dir_excluded("/data/#snapshot"));
        assert!(!matcher.is_dir_excluded("/data/photos/2023"));
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let matcher = ExclusionMatcher::new(["/data/*.jpg"]).unwrap();
        assert!(matcher.is_match("/data/a.jpg"));
        assert!(!matcher.is_match("/data/sub/a.jpg"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ExclusionMatcher::new(["[unclosed"]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPattern { .. }));
    }

    #[test]
    fn test_sql_regexes_strip_byte_mode() {
        let matcher = default_exclusions();
        let regexes = matcher.sql_regexes();
        assert_eq!(regexes.len(), 4);
        assert!(regexes.iter().all(|r| !r.starts_with("(?-u)")));
        assert!(regexes[0].contains("@eaDir"));
    }

    #[test]
    fn test_extension_filter_is_case_insensitive() {
        let filter = ExtensionFilter::new(["jpg", ".HEIC"]);
        assert!(filter.accepts("/a/b.JPG"));
        assert!(filter.accepts("/a/b.heic"));
        assert!(!filter.accepts("/a/b.txt"));
        assert!(!filter.accepts("/a/noext"));
        assert!(ExtensionFilter::default().accepts("/a/b.txt"));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathMatcher::new(ExtensionFilter::new(["jpg"]), default_exclusions());
        assert!(matcher.matches("/data/a.jpg"));
        assert!(!matcher.matches("/data/@eaDir/a.jpg"));
        assert!(!matcher.matches("/data/a.txt"));
    }
}
