// src/buildhistory.rs

//! Buildhistory comparison
//!
//! With `buildhistory` enabled the original recipe is built once per machine
//! before the upgrade, so `buildhistory-diff` can show what the upgraded
//! builds changed in the produced packages. The diff is kept as
//! `buildhistory.txt` in the recipe's working directory.

use crate::bitbake::BuildTool;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Diff output kept in the working directory
pub const BUILDHISTORY_FILE: &str = "buildhistory.txt";

const MISSING_BUILDHISTORY: &str = "Buildhistory directory \"buildhistory/\" does not exist";

/// Baseline and upgraded builds of one recipe
pub struct BuildHistory<'a> {
    build: &'a dyn BuildTool,
    recipe: String,
    workdir: PathBuf,
    builds: usize,
}

impl<'a> BuildHistory<'a> {
    pub fn new(build: &'a dyn BuildTool, recipe: &str, workdir: &Path) -> Self {
        Self {
            build,
            recipe: recipe.to_string(),
            workdir: workdir.to_path_buf(),
            builds: 0,
        }
    }

    /// Build the current version for every machine
    ///
    /// A machine the original does not build for only lacks a baseline.
    pub fn init(&self, machines: &[String]) {
        info!("{}: Initial buildhistory for {} ...", self.recipe, machines.join(" "));
        for machine in machines {
            if let Err(err) = self.build.complete(&self.recipe, machine) {
                warn!("{}: no buildhistory baseline for {}: {}", self.recipe, machine, err);
            }
        }
    }

    /// Count one upgraded build
    pub fn add(&mut self) {
        self.builds += 1;
    }

    /// Save the diff of the upgraded builds, if there is one
    pub fn diff(&self) -> Result<Option<PathBuf>> {
        if self.builds == 0 {
            return Ok(None);
        }

        info!("{}: Checking buildhistory ...", self.recipe);
        let output = match self.build.buildhistory_diff(self.builds) {
            Ok(output) => output,
            Err(err) => {
                let missing = err
                    .stdout()
                    .is_some_and(|out| out.lines().any(|l| l.starts_with(MISSING_BUILDHISTORY)));
                if missing {
                    return Err(Error::Config(
                        "buildhistory is not enabled; add INHERIT += \"buildhistory\" and \
                         BUILDHISTORY_COMMIT = \"1\" to local.conf"
                            .to_string(),
                    ));
                }
                warn!("{}: buildhistory-diff failed: {}", self.recipe, err);
                return Ok(None);
            }
        };
        if output.trim().is_empty() {
            return Ok(None);
        }

        let path = self.workdir.join(BUILDHISTORY_FILE);
        fs::write(&path, output)?;
        info!("{}: buildhistory changes saved in {}", self.recipe, path.display());
        Ok(Some(path))
    }
}
