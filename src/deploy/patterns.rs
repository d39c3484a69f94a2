//! Exclusion patterns read from a deployment's own `.gitignore`.
//!
//! Matching uses the `ignore` crate's gitignore engine. The metadata
//! directory and the ignore file itself are always excluded, whether or not
//! a pattern file exists.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use thiserror::Error;

/// Version-control metadata directory.
pub const METADATA_DIR: &str = ".git";

/// Name of the ignore file patterns are loaded from.
pub const IGNORE_FILE: &str = ".gitignore";

/// Maximum ignore file size (1MB)
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Errors raised while loading patterns.
#[derive(Error, Debug)]
pub enum PatternError {
    /// The ignore file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The ignore file is larger than we are willing to parse.
    #[error("{path} is {size} bytes, limit is {limit}")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
}

/// True for anything inside a `.git` directory, or a `.git` file.
pub fn is_metadata_path(rel_path: &Path) -> bool {
    rel_path
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name == METADATA_DIR))
}

/// True for paths that are never captured or restored: version-control
/// metadata and any `.gitignore`.
pub fn is_implicitly_excluded(rel_path: &Path) -> bool {
    is_metadata_path(rel_path) || rel_path.file_name().is_some_and(|name| name == IGNORE_FILE)
}

/// Check a single gitignore-style pattern against a relative path.
///
/// Blank lines and `#` comments are not patterns and never match, and
/// absolute paths are never matched. A pattern without a slash matches any path component; a directory match excludes
/// everything below it.
pub fn matches(pattern: &str, rel_path: &Path, is_dir: bool) -> bool {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || rel_path.has_root() {
        return false;
    }
    let mut builder = GitignoreBuilder::new("");
    if builder.add_line(None, pattern).is_err() {
        return false;
    }
    match builder.build() {
        Ok(matcher) => matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore(),
        Err(_) => false,
    }
}

/// Ordered patterns loaded from a directory's ignore file.
#[derive(Debug, Clone)]
pub struct ExclusionPatternSet {
    patterns: Vec<String>,
    matcher: Gitignore,
}

impl Default for ExclusionPatternSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl ExclusionPatternSet {
    /// A set with no patterns. Implicit exclusions still apply.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: Gitignore::empty(),
        }
    }

    /// Load patterns from `<dir>/.gitignore`.
    ///
    /// A missing file (or missing directory) yields an empty set. Lines the
    /// glob engine rejects are skipped with a warning.
    pub fn load(dir: &Path) -> Result<Self, PatternError> {
        let path = dir.join(IGNORE_FILE);

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty()),
            Err(source) => return Err(PatternError::Read { path, source }),
        };
        if !metadata.is_file() {
            return Ok(Self::empty());
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(PatternError::TooLarge {
                path,
                size: metadata.len(),
                limit: MAX_FILE_SIZE,
            });
        }

        // git does not require UTF-8 here; undecodable bytes become U+FFFD.
        let bytes = fs::read(&path).map_err(|source| PatternError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self::from_content(dir, &String::from_utf8_lossy(&bytes)))
    }

    /// Parse patterns from ignore file content.
    pub fn from_content(root: &Path, content: &str) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut patterns = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match builder.add_line(None, line) {
                Ok(_) => patterns.push(trimmed.to_string()),
                Err(e) => log::warn!(
                    "skipping invalid exclusion pattern on line {}: '{}' ({})",
                    line_num + 1,
                    line,
                    e
                ),
            }
        }

        match builder.build() {
            Ok(matcher) => Self { patterns, matcher },
            Err(e) => {
                log::warn!("failed to build exclusion matcher, using none: {}", e);
                Self::empty()
            }
        }
    }

    /// Patterns in file order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `rel_path` is excluded, implicitly or by a loaded pattern.
    /// `rel_path` must be relative to the directory the set was loaded from.
    pub fn is_excluded(&self, rel_path: &Path, is_dir: bool) -> bool {
        if is_implicitly_excluded(rel_path) {
            return true;
        }
        if rel_path.has_root() || self.patterns.is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }
}
