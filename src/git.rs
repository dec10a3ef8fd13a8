// src/git.rs

//! Version control operations on the layer holding the recipe
//!
//! The recovery engine only needs a handful of git operations, expressed by
//! [`VersionControl`]. [`Git`] shells out to the `git` binary.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Version control operations used while upgrading a recipe
pub trait VersionControl {
    /// Move a tracked path (`git mv -f`)
    fn move_path(&self, src: &Path, dest: &Path) -> Result<()>;

    /// Commit all tracked changes, signed off
    fn commit(&self, message: &str, author: Option<&str>) -> Result<()>;

    fn checkout_branch(&self, name: &str) -> Result<()>;

    /// Create a branch from HEAD and switch to it
    fn create_branch(&self, name: &str) -> Result<()>;

    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Discard working tree changes and the last `n` commits
    fn reset_hard(&self, n: u32) -> Result<()>;

    /// Undo the last `n` commits, keeping their changes in the working tree
    fn reset_soft(&self, n: u32) -> Result<()>;

    /// Porcelain status of the working tree
    fn status(&self) -> Result<String>;

    /// Remove untracked files and directories
    fn clean_untracked(&self) -> Result<()>;

    /// Export the last commit as a patch into `out_dir`
    fn create_patch(&self, out_dir: &Path) -> Result<PathBuf>;

    /// List remote references of `url`
    fn ls_remote(&self, url: &str, options: &[&str]) -> Result<String>;
}

/// Git command runner for one repository
#[derive(Debug, Clone)]
pub struct Git {
    repo_dir: PathBuf,
    program: PathBuf,
}

impl Git {
    /// Use the `git` found on PATH for the repository at `repo_dir`
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        let program = which::which("git").unwrap_or_else(|_| PathBuf::from("git"));
        Self {
            repo_dir: repo_dir.into(),
            program,
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!("git {}", args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo_dir)
            .output()?;

        if !output.status.success() {
            return Err(Error::Command {
                command: args.join(" "),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `HEAD` or `HEAD~n`
fn head_ref(n: u32) -> String {
    if n == 0 {
        "HEAD".to_string()
    } else {
        format!("HEAD~{}", n)
    }
}

impl VersionControl for Git {
    fn move_path(&self, src: &Path, dest: &Path) -> Result<()> {
        let src = src.to_string_lossy();
        let dest = dest.to_string_lossy();
        self.run(&["mv", "-f", &src, &dest]).map(drop)
    }

    fn commit(&self, message: &str, author: Option<&str>) -> Result<()> {
        match author {
            Some(author) => {
                let author = format!("--author={}", author);
                self.run(&["commit", "-a", "-s", &author, "-m", message])
            }
            None => self.run(&["commit", "-a", "-s", "-m", message]),
        }
        .map(drop)
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        self.run(&["checkout", name]).map(drop)
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.run(&["checkout", "-b", name]).map(drop)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", "-D", name]).map(drop)
    }

    fn reset_hard(&self, n: u32) -> Result<()> {
        self.run(&["reset", "--hard", &head_ref(n)]).map(drop)
    }

    fn reset_soft(&self, n: u32) -> Result<()> {
        self.run(&["reset", "--soft", &head_ref(n)]).map(drop)
    }

    fn status(&self) -> Result<String> {
        self.run(&["status", "--porcelain"])
    }

    fn clean_untracked(&self) -> Result<()> {
        self.run(&["clean", "-fd"]).map(drop)
    }

    fn create_patch(&self, out_dir: &Path) -> Result<PathBuf> {
        let out_dir = out_dir.to_string_lossy();
        let output = self.run(&["format-patch", "-M10", "-1", "-o", &out_dir])?;
        let patch = output.lines().last().unwrap_or_default().trim();
        if patch.is_empty() {
            return Err(Error::Command {
                command: "format-patch".to_string(),
                stdout: output.clone(),
                stderr: "no patch produced".to_string(),
            });
        }
        Ok(PathBuf::from(patch))
    }

    fn ls_remote(&self, url: &str, options: &[&str]) -> Result<String> {
        let mut args = vec!["ls-remote"];
        args.extend_from_slice(options);
        args.push(url);
        self.run(&args)
    }
}
