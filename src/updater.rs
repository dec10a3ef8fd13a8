// src/updater.rs

//! Upgrade workflow
//!
//! The [`Updater`] takes each requested recipe through the upgrade steps:
//! clean repository, rename, fetch, compile for every configured machine,
//! then commits the result and exports it as a patch into the recipe's
//! working directory. Outcomes are collected in the run [`Statistics`].
//!
//! A universe run (`upgrade-helper all`) checks every recipe upstream and
//! attempts the ones allowed by the blacklist, the maintainer whitelist and
//! the attempt [`History`], without asking the operator anything.

use crate::bitbake::BuildTool;
use crate::buildhistory::BuildHistory;
use crate::config::{UpgradeConfig, UH_DIR};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::git::VersionControl;
use crate::history::History;
use crate::prompt::Prompter;
use crate::recipe::rename_recipe;
use crate::recovery::{CompileOutcome, RecoveryEngine};
use crate::state::RecipeState;
use crate::statistics::{Statistics, SUCCEEDED};
use crate::transaction::{BASE_BRANCH, SCRATCH_BRANCH};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

static CHECKPKG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^ \t]*)[ \t]+([^ \t]*)[ \t]+([^ \t]*).*<(.*)@(.*)>[ \t]+.*").unwrap()
});

/// Location of the checkpkg report under the build directory
pub const CHECKPKG_CSV: &str = "tmp/log/checkpkg.csv";

const MISSING_CHECKPKG: &str = "ERROR: Task do_checkpkg does not exist";

/// Maintainer recorded when the upstream report was not consulted
const UNKNOWN_MAINTAINER: &str = "unknown";

/// Recipe argument selecting a universe run
pub const UNIVERSE: &str = "all";

/// Commit author of universe upgrades when none is configured
pub const UNIVERSE_AUTHOR: &str = "Upgrade Helper <uh@not.set>";

/// Build directories a universe run may remove beforehand
const SSTATE_DIR: &str = "sstate-cache";
const TMP_DIR: &str = "tmp";

/// One recipe to upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub recipe: String,
    pub version: String,
    pub maintainer: String,
}

impl From<CheckpkgEntry> for UpgradeRequest {
    fn from(entry: CheckpkgEntry) -> Self {
        Self {
            recipe: entry.recipe,
            version: entry.next,
            maintainer: entry.maintainer,
        }
    }
}

/// Line of the checkpkg report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpkgEntry {
    pub recipe: String,
    pub current: String,
    pub next: String,
    pub maintainer: String,
}

impl CheckpkgEntry {
    /// Whether upstream has a usable newer version
    pub fn has_update(&self) -> bool {
        self.current != self.next && self.next != "N/A" && self.next != "INVALID"
    }
}

pub fn parse_checkpkg_line(line: &str) -> Option<CheckpkgEntry> {
    let caps = CHECKPKG_RE.captures(line)?;
    Some(CheckpkgEntry {
        recipe: caps[1].to_string(),
        current: caps[2].to_string(),
        next: caps[3].to_string(),
        maintainer: format!("{}@{}", &caps[4], &caps[5]),
    })
}

/// Opens the version control repository holding a recipe directory
pub type VcsFactory<'a> = Box<dyn Fn(&Path) -> Box<dyn VersionControl> + 'a>;

/// Drives recipe upgrades for one run
pub struct Updater<'a> {
    build: Box<dyn BuildTool + 'a>,
    open_vcs: VcsFactory<'a>,
    vcs: Option<Box<dyn VersionControl>>,
    prompter: &'a dyn Prompter,
    config: UpgradeConfig,
    build_dir: PathBuf,
    statistics: Statistics,
    history: Option<History>,
    today: NaiveDate,
}

impl<'a> Updater<'a> {
    pub fn new(
        build: Box<dyn BuildTool + 'a>,
        open_vcs: VcsFactory<'a>,
        prompter: &'a dyn Prompter,
        config: UpgradeConfig,
        build_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build,
            open_vcs,
            vcs: None,
            prompter,
            config,
            build_dir: build_dir.into(),
            statistics: Statistics::new(),
            history: None,
            today: Utc::now().date_naive(),
        }
    }

    /// Date recorded in the attempt history
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Directory holding working directories and the run summary
    pub fn uh_dir(&self) -> PathBuf {
        self.build_dir.join(UH_DIR)
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Decide which recipes to upgrade and to which versions
    ///
    /// An explicit version applies to a single recipe. Without one, the
    /// build tool's upstream check picks the versions.
    pub fn plan(&self, recipes: &[String], to_version: Option<&str>) -> Result<Vec<UpgradeRequest>> {
        if let Some(version) = to_version {
            let [recipe] = recipes else {
                return Err(Error::Config(
                    "--to-version needs exactly one recipe".to_string(),
                ));
            };
            return Ok(vec![UpgradeRequest {
                recipe: recipe.clone(),
                version: version.to_string(),
                maintainer: UNKNOWN_MAINTAINER.to_string(),
            }]);
        }

        let requests = self
            .check_upstream(recipes)?
            .into_iter()
            .filter(|entry| {
                let blacklisted = self.config.is_blacklisted(&entry.recipe);
                if blacklisted {
                    info!("Skip blacklisted recipe {}", entry.recipe);
                }
                !blacklisted
            })
            .map(UpgradeRequest::from)
            .collect();
        Ok(requests)
    }

    /// Recipes of a universe run, in checkpkg report order
    ///
    /// Native and cross recipes are left to the upgrade of their target
    /// recipe.
    pub fn plan_universe(&self, history: &History) -> Result<Vec<UpgradeRequest>> {
        let requests = self
            .check_upstream(&["universe".to_string()])?
            .into_iter()
            .filter(|entry| {
                if self.config.is_blacklisted(&entry.recipe)
                    || !self.config.is_whitelisted(&entry.maintainer)
                    || entry.recipe.contains("cross")
                    || entry.recipe.contains("native")
                {
                    debug!("Skip recipe {}", entry.recipe);
                    return false;
                }
                if !history.should_attempt(&entry.recipe, &entry.next, self.today) {
                    debug!("Skip recipe {}, {} already attempted", entry.recipe, entry.next);
                    return false;
                }
                true
            })
            .map(UpgradeRequest::from)
            .collect();
        Ok(requests)
    }

    /// Run checkpkg for `targets` and read back the recipes with updates
    fn check_upstream(&self, targets: &[String]) -> Result<Vec<CheckpkgEntry>> {
        info!("Fetching upstream version(s) ...");
        if let Err(err) = self.build.checkpkg(targets) {
            let missing = err
                .stdout()
                .is_some_and(|out| out.lines().any(|l| l.starts_with(MISSING_CHECKPKG)));
            if missing {
                return Err(Error::Config(
                    "do_checkpkg is not available; add INHERIT += \"distrodata\" to local.conf"
                        .to_string(),
                ));
            }
            warn!("checkpkg reported errors: {}", err);
        }

        let csv = fs::read_to_string(self.build_dir.join(CHECKPKG_CSV))?;
        let mut entries = Vec::new();
        for entry in csv.lines().filter_map(parse_checkpkg_line) {
            if !entry.has_update() {
                warn!(
                    "Skip recipe {} (current version = {}, next version = {})",
                    entry.recipe, entry.current, entry.next
                );
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Remove the build directories configured for cleaning
    pub fn prepare_build_dir(&self) -> Result<()> {
        let settings = &self.config.settings;
        for (enabled, name) in [(settings.clean_sstate, SSTATE_DIR), (settings.clean_tmp, TMP_DIR)] {
            let dir = self.build_dir.join(name);
            if enabled && dir.exists() {
                info!("Removing {} directory ...", name);
                fs::remove_dir_all(&dir)?;
            }
        }
        Ok(())
    }

    /// Attempt every upgradable recipe without operator interaction
    pub fn run_universe(&mut self) -> Result<()> {
        self.config.settings.interactive = false;
        if self.config.settings.author.is_none() {
            self.config.settings.author = Some(UNIVERSE_AUTHOR.to_string());
        }

        fs::create_dir_all(self.uh_dir())?;
        self.prepare_build_dir()?;
        let history = History::load(&self.uh_dir())?;
        let requests = self.plan_universe(&history)?;

        info!("{} recipe(s) to upgrade", requests.len());
        for request in &requests {
            info!("{},{},{}", request.recipe, request.version, request.maintainer);
        }

        self.history = Some(history);
        self.run(&requests)
    }

    /// Upgrade every request, recording the outcomes
    pub fn run(&mut self, requests: &[UpgradeRequest]) -> Result<()> {
        fs::create_dir_all(self.uh_dir())?;

        for (index, request) in requests.iter().enumerate() {
            info!("ATTEMPT RECIPE {}/{}", index + 1, requests.len());
            let outcome = self.upgrade(request);
            match &outcome {
                Ok(()) => info!("{}: upgrade SUCCESSFUL! Please test!", request.recipe),
                Err(Error::UpgradeNotNeeded) => {
                    info!("{}: {}", request.recipe, Error::UpgradeNotNeeded)
                }
                Err(err) => {
                    error!("{}: {}", request.recipe, err);
                    error!(
                        "{}: upgrade FAILED! Logs and/or file diffs are available in {}",
                        request.recipe,
                        self.workdir(&request.recipe).display()
                    );
                }
            }

            let maintainer = self.config.maintainer(&request.maintainer).to_string();
            self.statistics.update(
                &request.recipe,
                &request.version,
                &maintainer,
                outcome.as_ref().err(),
            );
            if let Some(history) = self.history.as_mut() {
                let status = outcome.as_ref().err().map_or(SUCCEEDED, Error::status);
                history.record(&request.recipe, &request.version, &maintainer, status, self.today);
                history.save(&self.build_dir.join(UH_DIR))?;
            }

            let remaining = index + 1 < requests.len();
            if self.config.settings.interactive
                && remaining
                && !self.prompter.confirm("Proceed to the next recipe?", true)?
            {
                info!("Aborted by user");
                break;
            }
        }

        if self.statistics.attempted() > 1 {
            println!("{}", self.statistics.summary());
        }
        let saved = self.statistics.save(&self.uh_dir())?;
        debug!("Run summary written to {}", saved.display());
        Ok(())
    }

    fn workdir(&self, recipe: &str) -> PathBuf {
        self.uh_dir().join(recipe)
    }

    /// Upgrade one recipe, committing whatever the steps produced
    pub fn upgrade(&mut self, request: &UpgradeRequest) -> Result<()> {
        info!("{}: upgrading to {}", request.recipe, request.version);
        let workdir = self.create_workdir(&request.recipe)?;
        self.build.set_log_dir(&workdir);

        let mut state = None;
        let outcome = self.run_steps(request, &workdir, &mut state);
        let Some(state) = state else {
            return outcome;
        };

        let patch = match self.commit_changes(&state, &workdir) {
            Ok(patch) => patch,
            Err(err) => return outcome.and(Err(err)),
        };
        match (&outcome, patch) {
            (Err(_), Some(_)) => self.drop_failed_commit(&request.recipe)?,
            (Ok(()), Some(_)) if self.config.settings.drop_previous_commits => {
                info!("{}: Dropping upgrade commit, patch kept ...", request.recipe);
                let vcs = self.vcs()?;
                vcs.reset_hard(1)?;
                vcs.clean_untracked()?;
            }
            _ => {}
        }
        outcome
    }

    fn run_steps(
        &mut self,
        request: &UpgradeRequest,
        workdir: &Path,
        slot: &mut Option<RecipeState>,
    ) -> Result<()> {
        let pn = request.recipe.as_str();
        let env = self.prepare_repository(pn)?;

        let state = slot.insert(RecipeState::new(env, &request.version, workdir)?);
        if state.env().package_version() == Some(request.version.as_str()) {
            return Err(Error::UpgradeNotNeeded);
        }
        let vcs = self.vcs()?;

        let settings = &self.config.settings;
        let mut history = (settings.buildhistory && !settings.skip_compilation)
            .then(|| BuildHistory::new(self.build.as_ref(), pn, workdir));
        if let Some(history) = &history {
            history.init(&settings.machines);
        }

        info!("{}: Fetch & unpack original sources ...", pn);
        self.build.unpack(pn)?;

        info!("{}: Renaming recipes, reset PR (if exists) ...", pn);
        rename_recipe(state, vcs)?;
        state.replace_env(self.load_env(pn)?)?;

        info!("{}: Clean all ...", pn);
        self.build.cleanall(pn)?;

        let mut engine = RecoveryEngine::new(
            self.build.as_ref(),
            vcs,
            self.prompter,
            self.config.recovery_options(),
        );
        engine.fetch(state)?;

        if self.config.settings.skip_compilation {
            warn!("{}: Compilation was skipped by user choice!", pn);
            return Ok(());
        }
        for machine in &self.config.settings.machines {
            match engine.compile(state, machine)? {
                CompileOutcome::Built => {
                    info!("{}: built for {}", pn, machine);
                    if let Some(history) = history.as_mut() {
                        history.add();
                    }
                }
                CompileOutcome::IncompatibleHost => {
                    warn!("{}: not built for {}, incompatible host", pn, machine)
                }
            }
        }
        if let Some(history) = &history {
            history.diff()?;
        }
        Ok(())
    }

    fn vcs(&self) -> Result<&dyn VersionControl> {
        self.vcs
            .as_deref()
            .ok_or_else(|| Error::Config("recipe repository not opened".to_string()))
    }

    fn create_workdir(&self, recipe: &str) -> Result<PathBuf> {
        let workdir = self.workdir(recipe);
        if workdir.exists() {
            for entry in fs::read_dir(&workdir)? {
                let path = entry?.path();
                if path.is_file() {
                    fs::remove_file(&path)?;
                }
            }
        } else {
            fs::create_dir_all(&workdir)?;
        }
        Ok(workdir)
    }

    fn load_env(&self, recipe: &str) -> Result<Environment> {
        let env = Environment::parse(&self.build.env(recipe)?);
        env.validate()?;
        Ok(env)
    }

    /// Load the environment and leave the recipe repository clean on the
    /// upgrade branch
    fn prepare_repository(&mut self, recipe: &str) -> Result<Environment> {
        let mut env = self.load_env(recipe)?;
        if self.vcs.is_none() {
            self.vcs = Some((self.open_vcs)(&env.recipe_dir()?));
        }
        let vcs = self.vcs()?;

        if !vcs.status()?.trim().is_empty() {
            if self.config.settings.interactive
                && !self.prompter.confirm(
                    &format!("{}: repository has uncommitted work which will be dropped! Proceed?", recipe),
                    false,
                )?
            {
                return Err(Error::Aborted("uncommitted work kept".to_string()));
            }
            warn!("{}: Dropping uncommitted work!", recipe);
            vcs.reset_hard(0)?;
            vcs.clean_untracked()?;
            env = self.load_env(recipe)?;
        }

        if vcs.checkout_branch(BASE_BRANCH).is_err() {
            vcs.create_branch(BASE_BRANCH)?;
        }
        if let Err(err) = vcs.delete_branch(SCRATCH_BRANCH) {
            debug!("no stale {} branch: {}", SCRATCH_BRANCH, err);
        }
        Ok(env)
    }

    /// Commit the upgrade and export it; `None` when nothing changed
    fn commit_changes(&self, state: &RecipeState, workdir: &Path) -> Result<Option<PathBuf>> {
        let pn = state.package_name();
        let vcs = self.vcs()?;

        info!("{}: Auto commit changes ...", pn);
        if let Err(err) = vcs.commit(state.commit_message(), self.config.settings.author.as_deref()) {
            let nothing = err
                .stdout()
                .is_some_and(|out| out.lines().any(|l| l.starts_with("nothing to commit")));
            if nothing {
                info!("{}: Nothing to commit!", pn);
                return Ok(None);
            }
            return Err(err);
        }

        let patch = vcs.create_patch(workdir)?;
        info!("{}: Save patch in {}", pn, patch.display());
        Ok(Some(patch))
    }

    fn drop_failed_commit(&self, recipe: &str) -> Result<()> {
        let vcs = self.vcs()?;
        if self
            .prompter
            .confirm(&format!("{}: Do you want to keep the changes?", recipe), false)?
        {
            return Ok(());
        }
        info!("{}: Dropping changes from git ...", recipe);
        vcs.reset_hard(1)?;
        vcs.clean_untracked()
    }
}
