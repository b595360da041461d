//! Path validation against a permitted base directory.

use std::env;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::error::KitError;

/// Resolve `path` against `base_dir` and require the result to stay inside it.
///
/// Relative paths are joined onto `base_dir`; absolute paths are taken as-is.
/// Both sides are normalized lexically (`.` and `..` folded) without touching
/// the filesystem, so the target need not exist. Containment is checked per
/// path component: `/tmp/app` accepts `/tmp/app` and `/tmp/app/x` but never
/// `/tmp/app-secret`.
pub fn validate_path(path: impl AsRef<Path>, base_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let base = absolutize(base_dir.as_ref())?;
    let resolved = normalize(&base.join(path));

    if resolved.starts_with(&base) {
        return Ok(resolved);
    }
    warn!(path = %path.display(), base = %base.display(), "rejected path outside base");
    Err(KitError::PathTraversal {
        path: path.to_path_buf(),
        base,
    }
    .into())
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = env::current_dir().context("resolve current directory")?;
    Ok(normalize(&cwd.join(path)))
}

/// Fold `.` and `..` components without consulting the filesystem.
///
/// `..` at the root stays at the root, matching how the OS resolves it.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_traversal(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<KitError>(),
            Some(KitError::PathTraversal { .. })
        )
    }

    #[cfg(unix)]
    #[test]
    fn accepts_paths_inside_base() {
        let base = Path::new("/tmp/app");
        let cases = [
            ("src/main.rs", "/tmp/app/src/main.rs"),
            ("./a/../b", "/tmp/app/b"),
            ("/tmp/app", "/tmp/app"),
            (".", "/tmp/app"),
            ("/tmp/app/x", "/tmp/app/x"),
        ];
        for (candidate, expected) in cases {
            let resolved = validate_path(candidate, base).expect(candidate);
            assert_eq!(resolved, Path::new(expected));
        }
        let resolved = validate_path("x", "/tmp/app/").expect("trailing separator");
        assert_eq!(resolved, Path::new("/tmp/app/x"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_sibling_with_shared_prefix() {
        let err = validate_path("/tmp/app-secret", "/tmp/app").expect_err("sibling");
        assert!(is_traversal(&err));
        let err = validate_path("../app-secret/key", "/tmp/app").expect_err("relative sibling");
        assert!(is_traversal(&err));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_parent_escapes_and_absolute_overrides() {
        let candidates = ["..", "../..", "a/../../etc", "/etc/passwd", "/tmp", "sub/../../app2"];
        for candidate in candidates {
            let err = validate_path(candidate, "/tmp/app").expect_err(candidate);
            assert!(is_traversal(&err), "{candidate}: {err:#}");
        }
    }

    #[test]
    fn relative_base_is_resolved_against_cwd() {
        let cwd = env::current_dir().expect("cwd");
        let resolved = validate_path("file.txt", ".").expect("inside cwd");
        assert_eq!(resolved, normalize(&cwd.join("file.txt")));
    }
}
