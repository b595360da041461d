//! Read-only git queries for a working directory.
//!
//! Every call goes through [`run_git`], so the timeout and stderr capture
//! rules of the execution layer apply.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::exec::{ExecOptions, run_git};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Git queries scoped to one working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if `workdir` is inside a git work tree.
    pub fn is_repo(&self) -> bool {
        self.capture(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.capture(&["status", "--porcelain=v1", "-uall"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// One-line description of HEAD: `branch @ sha`, plus the number of
    /// changed paths when the tree is dirty. A detached HEAD shows as `HEAD`.
    pub fn head_summary(&self) -> Result<String> {
        let branch = self
            .current_branch()
            .unwrap_or_else(|_| "HEAD".to_string());
        let sha = self.head_short_sha(7)?;
        let changed = self.status_porcelain()?.len();
        Ok(match changed {
            0 => format!("{branch} @ {sha}"),
            n => format!("{branch} @ {sha} ({n} changed)"),
        })
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        run_git(args, &ExecOptions::in_dir(&self.workdir))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(root: &Path) {
        let opts = ExecOptions::in_dir(root);
        run_git(&["init", "-q", "-b", "main"], &opts).expect("git init");
        run_git(&["config", "user.email", "test@example.com"], &opts).expect("email");
        run_git(&["config", "user.name", "test"], &opts).expect("name");
        fs::write(root.join("README.md"), "hi\n").expect("write");
        run_git(&["add", "README.md"], &opts).expect("add");
        run_git(&["commit", "-q", "-m", "chore: init"], &opts).expect("commit");
    }

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.code, "R ");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn reads_branch_sha_and_status_from_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_repo(temp.path());
        fs::write(temp.path().join("new.txt"), "x").expect("write");

        let git = Git::new(temp.path());
        assert!(git.is_repo());
        assert_eq!(git.current_branch().expect("branch"), "main");
        assert_eq!(git.head_short_sha(7).expect("sha").len(), 7);
        let status = git.status_porcelain().expect("status");
        assert_eq!(
            status,
            vec![StatusEntry {
                code: "??".to_string(),
                path: "new.txt".to_string()
            }]
        );
    }

    #[test]
    fn head_summary_counts_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_repo(temp.path());
        let git = Git::new(temp.path());
        let sha = git.head_short_sha(7).expect("sha");
        assert_eq!(git.head_summary().expect("summary"), format!("main @ {sha}"));

        fs::write(temp.path().join("README.md"), "changed\n").expect("write");
        fs::write(temp.path().join("new.txt"), "x").expect("write");
        assert_eq!(
            git.head_summary().expect("summary"),
            format!("main @ {sha} (2 changed)")
        );

        run_git(&["checkout", "-q", "--detach"], &ExecOptions::in_dir(temp.path()))
            .expect("detach");
        assert!(git.head_summary().expect("summary").starts_with("HEAD @ "));
    }

    #[test]
    fn non_repo_is_detected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!Git::new(temp.path()).is_repo());
    }
}
