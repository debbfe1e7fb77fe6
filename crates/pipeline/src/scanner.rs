use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Finds candidate source files below a project root
pub struct SourceScanner {
    root: PathBuf,
    include: GlobSet,
    excluded_dirs: HashSet<String>,
    max_files: Option<usize>,
}

impl SourceScanner {
    pub fn new(
        root: impl AsRef<Path>,
        include_patterns: &[String],
        excluded_dirs: &[String],
        max_files: Option<usize>,
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include_patterns.iter().filter(|p| !p.trim().is_empty()) {
            builder.add(Glob::new(pattern.trim())?);
        }

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            include: builder.build()?,
            excluded_dirs: excluded_dirs.iter().cloned().collect(),
            max_files,
        })
    }

    /// Walk the tree (.gitignore aware, hidden entries skipped) in name order.
    ///
    /// Stops once `max_files` candidates were found. Unreadable entries are
    /// logged and skipped.
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let excluded = self.excluded_dirs.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        builder.filter_entry(move |entry| !is_excluded(entry.path(), &root, &excluded));

        for result in builder.build() {
            if self.max_files.is_some_and(|max| files.len() >= max) {
                log::debug!("Reached max_files limit of {}", files.len());
                break;
            }
            match result {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|t| t.is_file()) {
                        continue;
                    }
                    let path = entry.path();
                    let matches = path
                        .file_name()
                        .is_some_and(|name| self.include.is_match(Path::new(name)));
                    if matches {
                        files.push(path.to_path_buf());
                    }
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        log::info!("Found {} source files", files.len());
        files
    }

    /// Path relative to the root with `/` separators
    #[must_use]
    pub fn relative_path(&self, path: &Path) -> String {
        normalize_path(&self.root, path)
    }
}

/// `scan(root, include_patterns, excluded_dirs, max_files)`
pub fn scan(
    root: &Path,
    include_patterns: &[String],
    excluded_dirs: &[String],
    max_files: Option<usize>,
) -> Result<Vec<PathBuf>> {
    Ok(SourceScanner::new(root, include_patterns, excluded_dirs, max_files)?.scan())
}

pub(crate) fn normalize_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut normalized = relative.to_string_lossy().to_string();
    if normalized.contains('\\') {
        normalized = normalized.replace('\\', "/");
    }
    normalized
}

fn is_excluded(path: &Path, root: &Path, excluded: &HashSet<String>) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|component| match component {
        Component::Normal(name) => excluded.contains(name.to_string_lossy().as_ref()),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn patterns(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files.iter().map(|p| normalize_path(root, p)).collect()
    }

    #[test]
    fn matches_include_globs_and_skips_excluded_dirs() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        fs::create_dir_all(root.join("venv/lib")).unwrap();
        fs::write(root.join("a.py"), "def a(): pass\n").unwrap();
        fs::write(root.join("pkg/sub/b.py"), "def b(): pass\n").unwrap();
        fs::write(root.join("pkg/readme.md"), "# docs\n").unwrap();
        fs::write(root.join("venv/lib/c.py"), "def c(): pass\n").unwrap();

        let files = scan(root, &patterns(&["*.py"]), &patterns(&["venv"]), None).unwrap();
        assert_eq!(relative(root, &files), vec!["a.py", "pkg/sub/b.py"]);
    }

    #[test]
    fn stops_at_max_files() {
        let temp = tempdir().unwrap();
        for name in ["a.py", "b.py", "c.py", "d.py"] {
            fs::write(temp.path().join(name), "x = 1\n").unwrap();
        }

        let files = scan(temp.path(), &patterns(&["*.py"]), &[], Some(2)).unwrap();
        assert_eq!(relative(temp.path(), &files), vec!["a.py", "b.py"]);
    }

    #[test]
    fn honors_gitignore_and_hidden_entries() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();
        fs::write(root.join("generated/g.py"), "x = 1\n").unwrap();
        fs::write(root.join(".cache/h.py"), "x = 1\n").unwrap();
        fs::write(root.join("main.py"), "x = 1\n").unwrap();

        let files = scan(root, &patterns(&["*.py"]), &[], None).unwrap();
        assert_eq!(relative(root, &files), vec!["main.py"]);
    }

    #[test]
    fn multiple_patterns_and_invalid_glob() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.py"), "").unwrap();
        fs::write(temp.path().join("b.pyi"), "").unwrap();
        fs::write(temp.path().join("c.txt"), "").unwrap();

        let files = scan(temp.path(), &patterns(&["*.py", "*.pyi"]), &[], None).unwrap();
        assert_eq!(files.len(), 2);

        assert!(scan(temp.path(), &patterns(&["[unclosed"]), &[], None).is_err());
    }
}
