// src/recipe/license.rs

//! License checksum repair
//!
//! When a license file changes upstream, do_configure reports the stale
//! `LIC_FILES_CHKSUM` md5 together with the new one. The recipe is updated
//! in place and a diff of the license file is left in the working directory
//! for review.

use super::mutator::{modify_recipe_files, LineEditor};
use crate::environment::Environment;
use crate::error::Result;
use regex::Regex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Summary of every checksum change, written next to the diffs
pub const CHECKSUM_SUMMARY_FILE: &str = "license_checksums.txt";

/// A license file whose checksum no longer matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseIssue {
    /// Path relative to the source root
    pub file: String,
    pub old_md5: String,
    pub new_md5: Option<String>,
}

/// Parses license checksum errors attributed to one recipe
struct LicensePatterns {
    old: [Regex; 4],
    new: Regex,
}

impl LicensePatterns {
    fn new(package: &str) -> Result<Self> {
        let prefix = format!(
            "^ERROR: {}[^:]*: md5 data is not matching for file://([^;]*)",
            regex::escape(package)
        );
        Ok(Self {
            old: [
                Regex::new(&format!("{prefix};md5=(.*)$"))?,
                Regex::new(&format!("{prefix};beginline=[0-9]*;endline=[0-9]*;md5=(.*)$"))?,
                Regex::new(&format!("{prefix};endline=[0-9]*;md5=(.*)$"))?,
                Regex::new(&format!("{prefix};beginline=[0-9]*;md5=(.*)$"))?,
            ],
            new: Regex::new(&format!(
                "^ERROR: {}[^:]*: The new md5 checksum is (.*)",
                regex::escape(package)
            ))?,
        })
    }
}

/// License checksum issues reported in a configure log
///
/// Each new checksum line is paired with the most recent mismatch line.
pub fn find_license_issues(config_log: &str, package: &str) -> Result<Vec<LicenseIssue>> {
    let patterns = LicensePatterns::new(package)?;
    let mut issues: Vec<LicenseIssue> = Vec::new();

    for line in config_log.lines() {
        if !line.starts_with("ERROR:") {
            continue;
        }
        if let Some(caps) = patterns.old.iter().find_map(|re| re.captures(line)) {
            issues.push(LicenseIssue {
                file: caps[1].to_string(),
                old_md5: caps[2].trim().to_string(),
                new_md5: None,
            });
        } else if let Some(caps) = patterns.new.captures(line) {
            if let Some(issue) = issues.last_mut() {
                if issue.new_md5.is_none() {
                    issue.new_md5 = Some(caps[1].trim().to_string());
                }
            }
        }
    }

    Ok(issues)
}

/// Replaces every occurrence of the old checksum with the new one
pub struct LicenseChecksumEditor<'a> {
    old_md5: &'a str,
    new_md5: &'a str,
}

impl<'a> LicenseChecksumEditor<'a> {
    pub fn new(old_md5: &'a str, new_md5: &'a str) -> Self {
        Self { old_md5, new_md5 }
    }
}

impl LineEditor for LicenseChecksumEditor<'_> {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        if self.old_md5.is_empty() {
            return out.write_all(line.as_bytes());
        }
        out.write_all(line.replace(self.old_md5, self.new_md5).as_bytes())
    }
}

/// Outcome of a successful license checksum repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseFix {
    pub issues: Vec<LicenseIssue>,
    pub diff_files: Vec<PathBuf>,
}

impl LicenseFix {
    /// Commit message lines describing the change
    pub fn commit_note(&self) -> String {
        self.issues
            .iter()
            .map(|issue| format!("License checksum changed for file {}\n", issue.file))
            .collect()
    }
}

/// Unified diff between two versions of a license file
pub fn license_diff(old_file: &Path, new_file: &Path) -> Result<String> {
    let old = fs::read_to_string(old_file)?;
    let new = fs::read_to_string(new_file)?;
    if old == new {
        return Ok(String::new());
    }

    let patch = diffy::create_patch(&old, &new).to_string();
    let hunks = patch
        .splitn(3, '\n')
        .nth(2)
        .unwrap_or_default();
    Ok(format!(
        "--- {}\n+++ {}\n{}",
        old_file.display(),
        new_file.display(),
        hunks
    ))
}

/// Repair license checksums reported in `config_log`
///
/// `old_env` is the snapshot from before the version bump, used to locate
/// the previous license text; without it the current source root is used
/// for both sides. Returns `None` when the log holds no repairable issue.
pub fn repair_license_checksums(
    config_log: &str,
    recipe_dir: &Path,
    env: &Environment,
    old_env: Option<&Environment>,
    workdir: &Path,
) -> Result<Option<LicenseFix>> {
    let pn = env.package_name();
    let (fixable, unfixable): (Vec<_>, Vec<_>) = find_license_issues(config_log, pn)?
        .into_iter()
        .partition(|issue| issue.new_md5.is_some());

    for issue in &unfixable {
        warn!("{}: no new checksum reported for {}", pn, issue.file);
    }
    if fixable.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(workdir)?;
    let old_root = old_env.unwrap_or(env).source_dir();
    let new_root = env.source_dir();
    let mut summary = String::new();
    let mut diff_files = Vec::new();

    for issue in &fixable {
        let new_md5 = issue.new_md5.as_deref().unwrap_or_default();
        let mut editor = LicenseChecksumEditor::new(&issue.old_md5, new_md5);
        modify_recipe_files(recipe_dir, pn, env.current_version(), &mut editor)?;

        let base_name = Path::new(&issue.file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| issue.file.clone());
        let diff_path = workdir.join(format!("{}.diff", base_name));
        fs::write(
            &diff_path,
            license_diff(&old_root.join(&issue.file), &new_root.join(&issue.file))?,
        )?;
        info!(
            "{}: license checksum changed for file {}, diff at {}",
            pn,
            issue.file,
            diff_path.display()
        );
        diff_files.push(diff_path);

        summary.push_str(&format!(
            "file = {}\nold checksum = {}\nnew checksum = {}\n",
            issue.file, issue.old_md5, new_md5
        ));
    }

    fs::write(workdir.join(CHECKSUM_SUMMARY_FILE), summary)?;
    Ok(Some(LicenseFix {
        issues: fixable,
        diff_files,
    }))
}
