// src/recovery.rs

//! Build failure recovery
//!
//! The [`RecoveryEngine`] drives the build tool for one recipe and repairs
//! the recipe between attempts:
//!
//! - **fetch**: checksum updates, then alternate archive suffixes
//! - **do_patch**: commenting out patches that no longer apply, inside a
//!   [`PatchSuppression`] transaction
//! - **do_configure**: license checksum updates
//! - **other recipes**: one forced clean per recipe, then give up
//!
//! Retries run in a loop; each repair either asks for another attempt or
//! ends the cycle with a terminal error. An open patch suppression is
//! always folded or discarded before control returns to the caller.

use crate::bitbake::BuildTool;
use crate::build_log::{
    detect_failed_tasks, is_incompatible_host, is_license_issue, is_uri_failure, FailedTask,
    FailureReport, TaskKind,
};
use crate::error::{Error, Result};
use crate::git::VersionControl;
use crate::prompt::Prompter;
use crate::recipe::license::find_license_issues;
use crate::recipe::{
    add_not_shipped, modify_recipe_files, repair_license_checksums, FaultyPatch, SourceChecksums,
    SourceSuffixEditor, SourceSuffixList,
};
use crate::state::{RecipeState, RetriedSet};
use crate::transaction::PatchSuppression;
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info, warn};

/// Tunables of the recovery engine
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Archive suffixes tried when the source URL cannot be fetched
    pub suffixes: SourceSuffixList,
    /// Try adding unshipped files to FILES on do_package failures
    pub package_repair: bool,
    /// An operator reviews license changes, so they stay out of the commit
    /// message
    pub interactive: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            suffixes: SourceSuffixList::default(),
            package_repair: false,
            interactive: false,
        }
    }
}

/// Successful end of a compile cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    /// The recipe built
    Built,
    /// The recipe does not support the machine; nothing was built
    IncompatibleHost,
}

/// What the compile loop does after a repair
enum Step {
    Retry,
    Stop(CompileOutcome),
}

/// State carried across the attempts of one compile cycle
struct CompileCycle {
    machine: String,
    suppression: Option<PatchSuppression>,
}

/// Recovery state machine for one recipe upgrade
pub struct RecoveryEngine<'a> {
    build: &'a dyn BuildTool,
    vcs: &'a dyn VersionControl,
    prompter: &'a dyn Prompter,
    options: RecoveryOptions,
    retried: RetriedSet,
    license_fixes: BTreeSet<(String, String)>,
    package_repaired: bool,
}

impl<'a> RecoveryEngine<'a> {
    pub fn new(
        build: &'a dyn BuildTool,
        vcs: &'a dyn VersionControl,
        prompter: &'a dyn Prompter,
        options: RecoveryOptions,
    ) -> Self {
        Self {
            build,
            vcs,
            prompter,
            options,
            retried: RetriedSet::new(),
            license_fixes: BTreeSet::new(),
            package_repaired: false,
        }
    }

    /// Recipes force-cleaned so far
    pub fn retried(&self) -> &RetriedSet {
        &self.retried
    }

    /// Classify a failed build invocation
    fn classify(&self, err: Error) -> Result<FailureReport> {
        let stdout = match err {
            Error::Execution { stdout, .. } => stdout,
            other => return Err(other),
        };
        detect_failed_tasks(&stdout, self.build.stdout_log().as_deref())
    }

    /// Fetch the new sources, repairing checksums and archive suffix
    pub fn fetch(&self, state: &mut RecipeState) -> Result<()> {
        if !state.kind().pins_checksums() {
            debug!("{}: checkout sources are fetched during the build", state.package_name());
            return Ok(());
        }

        info!("{}: Fetching sources ...", state.package_name());
        if self.fetch_with_checksum_repair(state)? {
            return self.fetch_succeeded(state);
        }

        if state.kind().has_alternate_archives() {
            for suffix in self.options.suffixes.iter() {
                info!("{}: Trying archive suffix {} ...", state.package_name(), suffix);
                modify_recipe_files(
                    state.recipe_dir(),
                    state.package_name(),
                    state.env().current_version(),
                    &mut SourceSuffixEditor::new(suffix),
                )?;
                if self.fetch_with_checksum_repair(state)? {
                    return self.fetch_succeeded(state);
                }
            }
        }

        Err(Error::Fetch("could not build a valid SRC_URI".to_string()))
    }

    /// One fetch; `Ok(None)` on success, otherwise the fetch task log
    fn attempt_fetch(&self, state: &RecipeState) -> Result<Option<String>> {
        let pn = state.package_name();
        let err = match self.build.fetch(pn) {
            Ok(_) => return Ok(None),
            Err(err) => err,
        };

        let report = self.classify(err)?;
        let failed = report.get(pn).ok_or_else(|| {
            Error::Fetch(format!(
                "fetch failed in other recipes: {}",
                report.recipes().join(" ")
            ))
        })?;
        Ok(Some(failed.read_log()?))
    }

    /// Fetch, updating the checksums once if the archive itself was found
    ///
    /// Returns whether the fetch succeeded. A fetch that still fails after
    /// the checksum update is terminal.
    fn fetch_with_checksum_repair(&self, state: &mut RecipeState) -> Result<bool> {
        let Some(log) = self.attempt_fetch(state)? else {
            return Ok(true);
        };
        if is_uri_failure(&log) || state.checksums_changed() {
            debug!("{}: fetch failed, source URL not usable", state.package_name());
            return Ok(false);
        }

        let sums = SourceChecksums::extract(&log)?;
        info!("{}: Update recipe checksums ...", state.package_name());
        modify_recipe_files(
            state.recipe_dir(),
            state.package_name(),
            state.env().current_version(),
            &mut sums.editor(),
        )?;
        state.mark_checksums_changed();

        match self.attempt_fetch(state)? {
            None => Ok(true),
            Some(_) => Err(Error::Fetch(
                "fetch still fails after updating checksums".to_string(),
            )),
        }
    }

    fn fetch_succeeded(&self, state: &RecipeState) -> Result<()> {
        if state.renamed() && !state.checksums_changed() {
            return Err(Error::Fetch(
                "fetch succeeded without changing checksums".to_string(),
            ));
        }
        info!("{}: Fetch succeeded", state.package_name());
        Ok(())
    }

    /// Build the recipe for `machine`, repairing failures between attempts
    pub fn compile(&mut self, state: &mut RecipeState, machine: &str) -> Result<CompileOutcome> {
        info!("{}: Compiling for {} ...", state.package_name(), machine);
        let mut cycle = CompileCycle {
            machine: machine.to_string(),
            suppression: None,
        };

        let outcome = self.compile_loop(state, &mut cycle);
        let Some(suppression) = cycle.suppression.take() else {
            return outcome;
        };

        match outcome {
            Ok(CompileOutcome::Built) => {
                let commentary = suppression.fold(self.vcs)?;
                state.append_commit_message(&commentary);
                Ok(CompileOutcome::Built)
            }
            other => {
                if let Err(err) = suppression.discard(self.vcs) {
                    warn!("{}: could not restore commented patches: {}", state.package_name(), err);
                    if other.is_ok() {
                        return Err(err);
                    }
                }
                other
            }
        }
    }

    fn compile_loop(&mut self, state: &mut RecipeState, cycle: &mut CompileCycle) -> Result<CompileOutcome> {
        loop {
            let pn = state.package_name().to_string();
            let err = match self.build.complete(&pn, &cycle.machine) {
                Ok(_) => return Ok(CompileOutcome::Built),
                Err(err) => err,
            };

            match self.recover(state, cycle, err)? {
                Step::Retry => info!("{}: Recompiling ...", pn),
                Step::Stop(outcome) => return Ok(outcome),
            }
        }
    }

    fn recover(&mut self, state: &mut RecipeState, cycle: &mut CompileCycle, err: Error) -> Result<Step> {
        let pn = state.package_name().to_string();
        if let Some(stdout) = err.stdout() {
            if is_incompatible_host(stdout, &pn)? {
                warn!("{}: incompatible with the host of {}, skipping", pn, cycle.machine);
                return Ok(Step::Stop(CompileOutcome::IncompatibleHost));
            }
        }

        let report = self.classify(err)?;
        if let Some(machine) = &report.machine {
            cycle.machine = machine.clone();
        }

        let Some(failed) = report.get(&pn) else {
            return self.clean_side_effects(&report);
        };
        debug!("{}: {} failed, log at {}", pn, failed.task, failed.log.display());

        match &failed.task {
            TaskKind::Patch => self.suppress_patch(state, cycle, failed),
            TaskKind::Configure | TaskKind::PopulateLic => {
                if let Some(suppression) = cycle.suppression.take() {
                    suppression.discard(self.vcs)?;
                }
                self.repair_license(state, failed)
            }
            TaskKind::Fetch => Err(Error::Fetch(format!("{} failed during build", failed.task))),
            TaskKind::Package => self.repair_package(state, failed),
            other => Err(Error::Compilation(format!("{} failed", other))),
        }
    }

    /// Force a clean of recipes that failed as a side effect
    fn clean_side_effects(&mut self, report: &FailureReport) -> Result<Step> {
        let recipes = report.recipes();
        if !self.retried.admit(&recipes) {
            return Err(Error::Compilation(format!(
                "{} failed again after a forced clean",
                recipes.join(" ")
            )));
        }

        warn!("Other recipes failed: {}; cleaning their state", recipes.join(" "));
        self.build.cleansstate(&recipes)?;
        Ok(Step::Retry)
    }

    fn suppress_patch(
        &self,
        state: &RecipeState,
        cycle: &mut CompileCycle,
        failed: &FailedTask,
    ) -> Result<Step> {
        if cycle.suppression.is_none() {
            cycle.suppression = Some(PatchSuppression::open(self.vcs)?);
        }

        let log = failed.read_log()?;
        let faulty = FaultyPatch::from_log(&log).ok_or_else(|| {
            Error::Patch("no failing patch named in the do_patch log".to_string())
        })?;

        let question = format!(
            "{}: patch {} does not apply. Comment it out and retry?",
            state.package_name(),
            faulty.file
        );
        if !self.prompter.confirm(&question, true)? {
            return Err(Error::Patch(format!("kept non-applying patch {}", faulty.file)));
        }

        let commented = faulty.comment_out(state.recipe_dir(), state.env())?;
        if let Some(suppression) = cycle.suppression.as_mut() {
            suppression.record(commented);
        }
        Ok(Step::Retry)
    }

    fn repair_license(&mut self, state: &mut RecipeState, failed: &FailedTask) -> Result<Step> {
        let pn = state.package_name().to_string();
        let log = failed.read_log()?;
        if !is_license_issue(&log, &pn)? {
            return Err(Error::Configure(format!("{} failed", failed.task)));
        }

        let repeated = find_license_issues(&log, &pn)?
            .into_iter()
            .find(|issue| {
                self.license_fixes
                    .contains(&(issue.file.clone(), issue.old_md5.clone()))
            });
        if let Some(issue) = repeated {
            return Err(Error::License(format!(
                "checksum of {} still mismatched after update",
                issue.file
            )));
        }

        let fix = repair_license_checksums(
            &log,
            state.recipe_dir(),
            state.env(),
            state.old_env(),
            state.workdir(),
        )?
        .ok_or_else(|| {
            Error::Configure(format!(
                "{} failed: license checksum mismatch without a new checksum",
                failed.task
            ))
        })?;

        for issue in &fix.issues {
            self.license_fixes
                .insert((issue.file.clone(), issue.old_md5.clone()));
        }
        if let Some(diff) = fix.diff_files.first() {
            state.set_license_diff(diff.clone());
        }

        let files: Vec<&str> = fix.issues.iter().map(|i| i.file.as_str()).collect();
        warn!(
            "{}: license checksum failed for {}; the recipe has been updated",
            pn,
            files.join(", ")
        );
        if self.prompter.confirm("View the license diff?", true)? {
            for diff in &fix.diff_files {
                self.prompter.show("License file diff", &fs::read_to_string(diff)?)?;
            }
        }
        if !self.prompter.confirm("Retry compilation?", true)? {
            return Err(Error::License(format!(
                "license of {} changed, retry declined",
                files.join(", ")
            )));
        }

        if !self.options.interactive {
            state.append_commit_message(&fix.commit_note());
        }
        Ok(Step::Retry)
    }

    fn repair_package(&mut self, state: &RecipeState, failed: &FailedTask) -> Result<Step> {
        if !self.options.package_repair || self.package_repaired {
            return Err(Error::Package(format!("{} failed", failed.task)));
        }
        self.package_repaired = true;

        let log = failed.read_log()?;
        if add_not_shipped(&log, state.recipe_dir(), state.env())? {
            Ok(Step::Retry)
        } else {
            Err(Error::Package("no unshipped files found".to_string()))
        }
    }
}
