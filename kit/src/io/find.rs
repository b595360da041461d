//! Breadth-first file discovery.
//!
//! Traversal uses an explicit queue rather than recursion so very deep trees
//! cannot exhaust the stack. Entries within a directory are visited in name
//! order, making results stable across runs. A symlink to a file is reported
//! under the link's path; symlinked directories are not followed, so link
//! cycles cannot loop the walk.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Limits and filters for [`find_files`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FindOptions {
    /// Extensions to keep (with or without a leading dot); empty keeps everything.
    pub extensions: Vec<String>,
    pub max_files: usize,
    /// Directory names skipped wherever they appear.
    pub exclude_dirs: Vec<String>,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            max_files: 100,
            exclude_dirs: [
                "node_modules",
                ".git",
                "target",
                "dist",
                "build",
                ".gemini-kit",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl FindOptions {
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    fn wants_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    fn excludes_dir(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|d| d == name)
    }
}

/// What to do with one directory entry.
enum Visit {
    Descend(PathBuf),
    Keep(PathBuf),
    Ignore,
}

fn classify(options: &FindOptions, path: PathBuf, is_dir: bool, is_file: bool, len: u64) -> Visit {
    if is_dir {
        let excluded = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| options.excludes_dir(n));
        if excluded {
            return Visit::Ignore;
        }
        return Visit::Descend(path);
    }
    if is_file && options.wants_extension(&path) {
        if len > options.max_file_bytes {
            debug!(path = %path.display(), len, "skipping oversized file");
            return Visit::Ignore;
        }
        return Visit::Keep(path);
    }
    Visit::Ignore
}

/// `(is_dir, is_file, len)` for an entry. Symlinks resolve only to files;
/// dangling links and links to directories yield `None`.
fn entry_kind(entry: &fs::DirEntry) -> Option<(bool, bool, u64)> {
    let file_type = entry.file_type().ok()?;
    if file_type.is_symlink() {
        let meta = fs::metadata(entry.path()).ok()?;
        return meta.is_file().then(|| (false, true, meta.len()));
    }
    let len = if file_type.is_file() {
        entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX)
    } else {
        0
    };
    Some((file_type.is_dir(), file_type.is_file(), len))
}

/// Collect up to `options.max_files` matching files beneath `dir`, breadth-first.
pub fn find_files(dir: &Path, options: &FindOptions) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if options.max_files == 0 {
        return Ok(found);
    }
    fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;

    let mut queue = VecDeque::from([dir.to_path_buf()]);
    while let Some(current) = queue.pop_front() {
        let mut entries = match fs::read_dir(&current) {
            Ok(rd) => rd.filter_map(|e| e.ok()).collect::<Vec<_>>(),
            Err(err) => {
                warn!(dir = %current.display(), err = %err, "skipping unreadable directory");
                continue;
            }
        };
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let Some((is_dir, is_file, len)) = entry_kind(&entry) else {
                continue;
            };
            match classify(options, entry.path(), is_dir, is_file, len) {
                Visit::Descend(path) => queue.push_back(path),
                Visit::Keep(path) => {
                    found.push(path);
                    if found.len() >= options.max_files {
                        debug!(max_files = options.max_files, "file limit reached");
                        return Ok(found);
                    }
                }
                Visit::Ignore => {}
            }
        }
    }
    Ok(found)
}

/// Async variant of [`find_files`] built on `tokio::fs`; same ordering and limits.
pub async fn find_files_async(dir: &Path, options: &FindOptions) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if options.max_files == 0 {
        return Ok(found);
    }
    tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("read directory {}", dir.display()))?;

    let mut queue = VecDeque::from([dir.to_path_buf()]);
    while let Some(current) = queue.pop_front() {
        let mut reader = match tokio::fs::read_dir(&current).await {
            Ok(rd) => rd,
            Err(err) => {
                warn!(dir = %current.display(), err = %err, "skipping unreadable directory");
                continue;
            }
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            let (is_dir, is_file, len) = if file_type.is_symlink() {
                match tokio::fs::metadata(entry.path()).await {
                    Ok(meta) if meta.is_file() => (false, true, meta.len()),
                    _ => continue,
                }
            } else if file_type.is_file() {
                let len = entry.metadata().await.map(|m| m.len()).unwrap_or(u64::MAX);
                (false, true, len)
            } else {
                (file_type.is_dir(), false, 0)
            };
            match classify(options, entry.path(), is_dir, is_file, len) {
                Visit::Descend(path) => queue.push_back(path),
                Visit::Keep(path) => {
                    found.push(path);
                    if found.len() >= options.max_files {
                        return Ok(found);
                    }
                }
                Visit::Ignore => {}
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }

    /// 50 files at the root, 100 in `pkg/`, plus noise in excluded directories.
    fn fixture() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        for i in 0..50 {
            touch(&root.join(format!("root_{i:03}.rs")), b"fn main() {}");
        }
        for i in 0..100 {
            touch(&root.join("pkg").join(format!("mod_{i:03}.rs")), b"// mod");
        }
        for i in 0..10 {
            touch(&root.join("node_modules").join(format!("dep_{i}.rs")), b"x");
            touch(&root.join("a/target").join(format!("gen_{i}.rs")), b"x");
        }
        touch(&root.join("README.md"), b"# readme");
        temp
    }

    #[test]
    fn stops_at_max_files_breadth_first() {
        let temp = fixture();
        let options = FindOptions::default().with_extensions(&["rs"]);
        let found = find_files(temp.path(), &options).expect("find");

        assert_eq!(found.len(), 100);
        // Root level is exhausted before descending.
        for (i, path) in found.iter().take(50).enumerate() {
            assert_eq!(path, &temp.path().join(format!("root_{i:03}.rs")));
        }
        assert!(found[50..].iter().all(|p| p.starts_with(temp.path().join("pkg"))));
        assert!(found.iter().all(|p| {
            !p.components().any(|c| {
                let c = c.as_os_str();
                c == "node_modules" || c == "target"
            })
        }));
    }

    #[test]
    fn filters_extensions_and_oversized_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(&temp.path().join("small.md"), b"ok");
        touch(&temp.path().join("big.md"), &vec![b'x'; 4096]);
        touch(&temp.path().join("code.rs"), b"fn x() {}");

        let options = FindOptions {
            extensions: vec![".MD".to_string()],
            max_file_bytes: 1024,
            ..FindOptions::default()
        };
        let found = find_files(temp.path(), &options).expect("find");
        assert_eq!(found, vec![temp.path().join("small.md")]);
    }

    #[test]
    fn survives_deep_trees() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut deep = temp.path().to_path_buf();
        for i in 0..200 {
            deep.push(format!("d{i}"));
        }
        touch(&deep.join("leaf.txt"), b"leaf");
        let found = find_files(temp.path(), &FindOptions::default()).expect("find");
        assert_eq!(found, vec![deep.join("leaf.txt")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(find_files(&temp.path().join("nope"), &FindOptions::default()).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_files_are_found_but_linked_dirs_are_not_walked() {
        use std::os::unix::fs::symlink;

        let temp = tempfile::tempdir().expect("tempdir");
        let outside = temp.path().join("outside");
        touch(&outside.join("target.rs"), b"fn t() {}");
        touch(&outside.join("sub/inner.rs"), b"fn i() {}");
        let root = temp.path().join("root");
        touch(&root.join("real.rs"), b"fn r() {}");
        symlink(outside.join("target.rs"), root.join("link.rs")).expect("file link");
        symlink(outside.join("sub"), root.join("linkdir")).expect("dir link");
        symlink(outside.join("gone.rs"), root.join("dangling.rs")).expect("dangling link");

        let options = FindOptions::default().with_extensions(&["rs"]);
        let expected = vec![root.join("link.rs"), root.join("real.rs")];
        assert_eq!(find_files(&root, &options).expect("sync"), expected);
        assert_eq!(find_files_async(&root, &options).await.expect("async"), expected);
    }

    #[tokio::test]
    async fn async_variant_matches_sync_results() {
        let temp = fixture();
        let options = FindOptions::default().with_extensions(&["rs"]).with_max_files(75);
        let sync_found = find_files(temp.path(), &options).expect("sync");
        let async_found = find_files_async(temp.path(), &options).await.expect("async");
        assert_eq!(async_found.len(), 75);
        assert_eq!(async_found, sync_found);
    }
}
