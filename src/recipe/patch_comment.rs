// src/recipe/patch_comment.rs

//! Commenting non-applying patches out of `SRC_URI`
//!
//! The source list is usually a quoted, backslash-continued block. One
//! `file://` entry is removed from it and re-emitted as a comment once the
//! block has been closed, leaving every other entry untouched.

use super::mutator::{modify_recipe_files, LineEditor};
use crate::environment::Environment;
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;

static DOES_NOT_APPLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Patch ([^ ]*) does not apply.*").unwrap());
static REVERSE_APPLIED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Patch ([^ ]*) can be reverse-applied").unwrap());
static UPSTREAM_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*Upstream-Status:(.*)").unwrap());

/// Removes one `file://` entry from `SRC_URI` and re-adds it as a comment
pub struct PatchCommentEditor {
    whole_line: Regex,
    first_entry: Regex,
    middle_entry: Regex,
    last_entry: Regex,
    /// Inside the block that held the entry
    start: bool,
    /// The matched entry closed the block
    end: bool,
    commented: bool,
    pending: Vec<String>,
}

impl PatchCommentEditor {
    pub fn new(uri: &str) -> Result<Self> {
        let uri = regex::escape(uri);
        Ok(Self {
            whole_line: Regex::new(&format!(r#"^SRC_URI *\+*= *" *{uri} *""#))?,
            first_entry: Regex::new(&format!(r#"^(SRC_URI *\+*= *" *){uri} *\\"#))?,
            middle_entry: Regex::new(&format!(r"^[\t ]*{uri} *\\"))?,
            last_entry: Regex::new(&format!(r#"^([\t ]*){uri} *""#))?,
            start: false,
            end: false,
            commented: false,
            pending: Vec::new(),
        })
    }

    /// Whether the entry was found in any of the visited lines
    pub fn commented(&self) -> bool {
        self.commented
    }

    fn flush(&mut self, out: &mut dyn Write) -> io::Result<()> {
        for line in self.pending.drain(..) {
            let line = line.trim_end();
            let line = line.strip_suffix('\\').unwrap_or(line);
            writeln!(out, "#{}", line)?;
        }
        self.start = false;
        self.end = false;
        Ok(())
    }
}

impl LineEditor for PatchCommentEditor {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let matched = if self.whole_line.is_match(line) {
            self.end = true;
            true
        } else if let Some(caps) = self.first_entry.captures(line) {
            writeln!(out, "{}\\", &caps[1])?;
            true
        } else if self.middle_entry.is_match(line) {
            true
        } else if let Some(caps) = self.last_entry.captures(line) {
            self.end = true;
            writeln!(out, "{}\"", &caps[1])?;
            true
        } else {
            false
        };

        if matched {
            self.commented = true;
            self.start = true;
            self.pending.push(line.to_string());
            return Ok(());
        }

        out.write_all(line.as_bytes())?;
        if self.start && (self.end || line.trim().starts_with('"')) {
            self.flush(out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.pending.is_empty() {
            self.start = false;
            self.end = false;
            return Ok(());
        }
        self.flush(out)
    }
}

/// Comment `uri` out of the recipe files in `recipe_dir`
///
/// Returns whether a matching entry was found.
pub fn comment_patch_uri(recipe_dir: &Path, env: &Environment, uri: &str) -> Result<bool> {
    let mut editor = PatchCommentEditor::new(uri)?;
    modify_recipe_files(
        recipe_dir,
        env.package_name(),
        env.current_version(),
        &mut editor,
    )?;
    Ok(editor.commented())
}

/// Patch named by a patch-apply failure log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultyPatch {
    pub file: String,
    pub reverse_applied: bool,
}

impl FaultyPatch {
    /// First patch reported as not applying in a do_patch log
    pub fn from_log(patch_log: &str) -> Option<Self> {
        patch_log.lines().find_map(|line| {
            if let Some(caps) = REVERSE_APPLIED_RE.captures(line) {
                return Some(Self {
                    file: caps[1].to_string(),
                    reverse_applied: true,
                });
            }
            DOES_NOT_APPLY_RE.captures(line).map(|caps| Self {
                file: caps[1].to_string(),
                reverse_applied: false,
            })
        })
    }

    /// Find the patch file next to the recipe
    ///
    /// Searched in order: `<PN>-<PKGV>/`, `<PN>/`, `files/`.
    pub fn locate(&self, recipe_dir: &Path, env: &Environment) -> Option<PathBuf> {
        let pn = env.package_name();
        let dirs = [
            format!("{}-{}", pn, env.current_version()),
            pn.to_string(),
            "files".to_string(),
        ];
        dirs.iter()
            .map(|dir| recipe_dir.join(dir).join(&self.file))
            .find(|path| path.exists())
    }

    /// Comment this patch out of the recipe
    pub fn comment_out(&self, recipe_dir: &Path, env: &Environment) -> Result<CommentedPatch> {
        let path = self.locate(recipe_dir, env).ok_or_else(|| {
            Error::Patch(format!("patch {} not found next to the recipe", self.file))
        })?;
        let upstream_status = upstream_status(&fs::read_to_string(&path)?);

        info!("{}: Commenting patch {} ...", env.package_name(), self.file);
        if !comment_patch_uri(recipe_dir, env, &format!("file://{}", self.file))? {
            return Err(Error::Patch(format!(
                "patch {} is not listed in SRC_URI",
                self.file
            )));
        }

        Ok(CommentedPatch {
            file: self.file.clone(),
            upstream_status,
            reverse_applied: self.reverse_applied,
        })
    }
}

/// First word of a patch's `Upstream-Status:` header, lowercased
pub fn upstream_status(patch: &str) -> Option<String> {
    patch.lines().find_map(|line| {
        let caps = UPSTREAM_STATUS_RE.captures(line)?;
        caps[1].split_whitespace().next().map(str::to_lowercase)
    })
}

/// A patch removed from the recipe while recovering a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentedPatch {
    pub file: String,
    pub upstream_status: Option<String>,
    pub reverse_applied: bool,
}

impl CommentedPatch {
    /// Commit message line describing this patch
    pub fn note(&self) -> String {
        let mut note = format!(" * {}", self.file);
        if let Some(status) = &self.upstream_status {
            note.push_str(&format!(" ({})", status));
        }
        if self.reverse_applied {
            note.push_str(" + reverse-applied");
        }
        note.push('\n');
        note
    }
}
