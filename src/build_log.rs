// src/build_log.rs

//! Build log classification
//!
//! Turns bitbake output into a [`FailureReport`] naming the recipes whose
//! tasks failed, and recognizes the error signatures the recovery engine
//! knows how to repair.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static MACHINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^MACHINE[\t ]+= *"(.*)"$"#).unwrap());
static TASK_LOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ERROR: Logfile of failure stored in: (.*/([^/]*)/[^/]*/temp/log\.(.*)\.[0-9]*)")
        .unwrap()
});
// do_package failures have no task log of their own
static NOT_SHIPPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ERROR: (?:[^:]*: )?QA Issue: ([^ :]*): (.*) not shipped").unwrap()
});

/// Build task that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Fetch,
    Unpack,
    Patch,
    Configure,
    PopulateLic,
    Compile,
    Install,
    Package,
    Other(String),
}

impl TaskKind {
    pub fn from_task_name(name: &str) -> Self {
        match name {
            "do_fetch" => Self::Fetch,
            "do_unpack" => Self::Unpack,
            "do_patch" => Self::Patch,
            "do_configure" => Self::Configure,
            "do_populate_lic" => Self::PopulateLic,
            "do_compile" => Self::Compile,
            "do_install" => Self::Install,
            "do_package" => Self::Package,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Fetch => "do_fetch",
            Self::Unpack => "do_unpack",
            Self::Patch => "do_patch",
            Self::Configure => "do_configure",
            Self::PopulateLic => "do_populate_lic",
            Self::Compile => "do_compile",
            Self::Install => "do_install",
            Self::Package => "do_package",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed task and the log describing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub task: TaskKind,
    pub log: PathBuf,
}

impl FailedTask {
    pub fn read_log(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.log)?)
    }
}

/// Recipes whose tasks failed in one build attempt
///
/// Never empty: output without any failed task is a classification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub machine: Option<String>,
    failed: BTreeMap<String, FailedTask>,
}

impl FailureReport {
    pub fn get(&self, recipe: &str) -> Option<&FailedTask> {
        self.failed.get(recipe)
    }

    pub fn contains(&self, recipe: &str) -> bool {
        self.failed.contains_key(recipe)
    }

    /// Names of the failed recipes, sorted
    pub fn recipes(&self) -> Vec<String> {
        self.failed.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FailedTask)> {
        self.failed.iter().map(|(name, task)| (name.as_str(), task))
    }
}

/// Classify the failed tasks in build output
///
/// `stdout_log` is the captured bitbake stdout, used as the log of
/// packaging QA failures.
pub fn detect_failed_tasks(output: &str, stdout_log: Option<&Path>) -> Result<FailureReport> {
    let mut machine = None;
    let mut failed = BTreeMap::new();

    for line in output.lines() {
        if let Some(caps) = TASK_LOG_RE.captures(line) {
            failed.insert(
                caps[2].to_string(),
                FailedTask {
                    task: TaskKind::from_task_name(&caps[3]),
                    log: PathBuf::from(&caps[1]),
                },
            );
        } else if let Some(caps) = NOT_SHIPPED_RE.captures(line) {
            failed.insert(
                caps[1].to_string(),
                FailedTask {
                    task: TaskKind::Package,
                    log: stdout_log.map(Path::to_path_buf).unwrap_or_default(),
                },
            );
        } else if let Some(caps) = MACHINE_RE.captures(line) {
            machine = Some(caps[1].to_string());
        }
    }

    if failed.is_empty() {
        return Err(Error::Classification {
            stdout: output.to_string(),
        });
    }

    Ok(FailureReport { machine, failed })
}

/// Whether `package` was skipped because it does not support the host
pub fn is_incompatible_host(output: &str, package: &str) -> Result<bool> {
    let re = Regex::new(&format!(
        r"^ERROR: {} was skipped: incompatible with host (.*) \(.*$",
        regex::escape(package)
    ))?;
    Ok(output.lines().any(|line| re.is_match(line)))
}

/// Whether a fetch failed because the source URL could not be retrieved
///
/// Checksum mismatches are also reported as fetcher failures but mean the
/// URL itself worked.
pub fn is_uri_failure(fetch_log: &str) -> bool {
    let fetcher_failure = fetch_log
        .lines()
        .any(|line| line.contains("Fetcher failure for URL"));
    let checksum_mismatch = fetch_log
        .lines()
        .any(|line| line.contains("Checksum mismatch"));
    fetcher_failure && !checksum_mismatch
}

/// Whether a configure log reports a license checksum mismatch for `package`
pub fn is_license_issue(config_log: &str, package: &str) -> Result<bool> {
    let re = Regex::new(&format!(
        "^ERROR: {}[^:]*: md5 data is not matching for file",
        regex::escape(package)
    ))?;
    Ok(config_log.lines().any(|line| re.is_match(line)))
}
