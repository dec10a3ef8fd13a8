// src/bitbake.rs

//! Build tool invocations
//!
//! [`BuildTool`] is the narrow interface the recovery engine drives;
//! [`Bitbake`] runs the real `bitbake` from the build directory.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Name of the stdout capture kept for the last failed invocation
pub const STDOUT_LOG: &str = "bitbake_log.txt";

/// Build tool operations used while upgrading a recipe
///
/// Failing invocations return [`Error::Execution`] with the captured
/// stdout and stderr.
pub trait BuildTool {
    /// Directory that receives the stdout of failed invocations
    fn set_log_dir(&mut self, dir: &Path);

    /// Path of the captured stdout of the last failed invocation
    fn stdout_log(&self) -> Option<PathBuf>;

    /// Recipe environment (`bitbake -e`)
    fn env(&self, recipe: &str) -> Result<String>;

    fn fetch(&self, recipe: &str) -> Result<String>;

    fn unpack(&self, recipe: &str) -> Result<String>;

    /// Full build of `recipe` for `machine`
    fn complete(&self, recipe: &str, machine: &str) -> Result<String>;

    fn cleanall(&self, recipe: &str) -> Result<String>;

    /// Drop the shared state of every recipe in `recipes`
    fn cleansstate(&self, recipes: &[String]) -> Result<String>;

    /// Upstream version check for `recipes`
    fn checkpkg(&self, recipes: &[String]) -> Result<String>;

    /// `buildhistory-diff` against the state `revisions` builds back
    fn buildhistory_diff(&self, revisions: usize) -> Result<String>;
}

/// `bitbake` runner for one build directory
#[derive(Debug, Clone)]
pub struct Bitbake {
    build_dir: PathBuf,
    program: PathBuf,
    log_dir: Option<PathBuf>,
}

impl Bitbake {
    /// Locate `bitbake` on PATH
    pub fn new(build_dir: impl Into<PathBuf>) -> Result<Self> {
        let program = which::which("bitbake").map_err(|e| {
            Error::Config(format!(
                "bitbake not found on PATH ({}); source the build environment first",
                e
            ))
        })?;
        Ok(Self::with_program(build_dir, program))
    }

    pub fn with_program(build_dir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            program: program.into(),
            log_dir: None,
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    fn run(&self, args: &[&str], machine: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.build_dir);
        if let Some(machine) = machine {
            cmd.env("MACHINE", machine);
        }

        let rendered = match machine {
            Some(machine) => format!("MACHINE={} bitbake {}", machine, args.join(" ")),
            None => format!("bitbake {}", args.join(" ")),
        };
        debug!("Running {}", rendered);

        let output = cmd.output()?;
        if !output.status.success() {
            if let Some(dir) = self.log_dir.as_deref().filter(|d| d.exists()) {
                fs::write(dir.join(STDOUT_LOG), &output.stdout)?;
            }
            return Err(Error::execution(
                format!("'{}' failed", rendered),
                &output.stdout,
                &output.stderr,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn task(&self, task: &str, recipes: &[&str]) -> Result<String> {
        let mut args = vec!["-c", task];
        args.extend_from_slice(recipes);
        self.run(&args, None)
    }
}

impl BuildTool for Bitbake {
    fn set_log_dir(&mut self, dir: &Path) {
        self.log_dir = Some(dir.to_path_buf());
    }

    fn stdout_log(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(STDOUT_LOG))
    }

    fn env(&self, recipe: &str) -> Result<String> {
        self.run(&["-e", recipe], None)
    }

    fn fetch(&self, recipe: &str) -> Result<String> {
        self.task("fetch", &[recipe])
    }

    fn unpack(&self, recipe: &str) -> Result<String> {
        self.task("unpack", &[recipe])
    }

    fn complete(&self, recipe: &str, machine: &str) -> Result<String> {
        self.run(&[recipe], Some(machine))
    }

    fn cleanall(&self, recipe: &str) -> Result<String> {
        self.task("cleanall", &[recipe])
    }

    fn cleansstate(&self, recipes: &[String]) -> Result<String> {
        let recipes: Vec<&str> = recipes.iter().map(String::as_str).collect();
        self.task("cleansstate", &recipes)
    }

    fn checkpkg(&self, recipes: &[String]) -> Result<String> {
        let recipes: Vec<&str> = recipes.iter().map(String::as_str).collect();
        self.task("checkpkg", &recipes)
    }

    fn buildhistory_diff(&self, revisions: usize) -> Result<String> {
        let program = which::which("buildhistory-diff")
            .unwrap_or_else(|_| PathBuf::from("buildhistory-diff"));
        let revision = format!("HEAD~{}", revisions);
        debug!("Running buildhistory-diff {}", revision);

        let output = Command::new(program)
            .arg(&revision)
            .current_dir(&self.build_dir)
            .output()?;
        if !output.status.success() {
            return Err(Error::execution(
                format!("'buildhistory-diff {}' failed", revision),
                &output.stdout,
                &output.stderr,
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
