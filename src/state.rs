// src/state.rs

//! Upgrade context shared by the recovery steps

use crate::environment::Environment;
use crate::error::Result;
use crate::recipe::RecipeKind;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Whether the recipe files have been moved to the new version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameState {
    Pristine,
    Renamed,
}

/// Whether the source checksums have been rewritten during fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumState {
    Original,
    Updated,
}

/// Aggregate context of one recipe upgrade
#[derive(Debug, Clone)]
pub struct RecipeState {
    env: Environment,
    old_env: Option<Environment>,
    new_version: String,
    kind: RecipeKind,
    workdir: PathBuf,
    recipe_dir: PathBuf,
    commit_message: String,
    rename: RenameState,
    checksums: ChecksumState,
    license_diff: Option<PathBuf>,
}

impl RecipeState {
    pub fn new(env: Environment, new_version: impl Into<String>, workdir: impl Into<PathBuf>) -> Result<Self> {
        env.validate()?;
        let recipe_dir = env.recipe_dir()?;
        let kind = RecipeKind::detect(&env)?;
        let new_version = new_version.into();
        let commit_message = format!("{}: upgrade to {}\n\n", env.package_name(), new_version);
        Ok(Self {
            env,
            old_env: None,
            new_version,
            kind,
            workdir: workdir.into(),
            recipe_dir,
            commit_message,
            rename: RenameState::Pristine,
            checksums: ChecksumState::Original,
            license_diff: None,
        })
    }

    /// Use an explicit recipe directory instead of the one derived from FILE
    pub fn with_recipe_dir(mut self, recipe_dir: impl Into<PathBuf>) -> Self {
        self.recipe_dir = recipe_dir.into();
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Environment from before the version bump, if one happened
    pub fn old_env(&self) -> Option<&Environment> {
        self.old_env.as_ref()
    }

    pub fn package_name(&self) -> &str {
        self.env.package_name()
    }

    pub fn new_version(&self) -> &str {
        &self.new_version
    }

    pub fn kind(&self) -> RecipeKind {
        self.kind
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn recipe_dir(&self) -> &Path {
        &self.recipe_dir
    }

    pub fn commit_message(&self) -> &str {
        &self.commit_message
    }

    pub fn append_commit_message(&mut self, text: &str) {
        self.commit_message.push_str(text);
    }

    pub fn renamed(&self) -> bool {
        self.rename == RenameState::Renamed
    }

    pub fn checksums_changed(&self) -> bool {
        self.checksums == ChecksumState::Updated
    }

    pub fn mark_checksums_changed(&mut self) {
        self.checksums = ChecksumState::Updated;
    }

    pub fn license_diff(&self) -> Option<&Path> {
        self.license_diff.as_deref()
    }

    pub fn set_license_diff(&mut self, path: PathBuf) {
        self.license_diff = Some(path);
    }

    /// Record a completed version bump
    ///
    /// The current environment becomes the old one; the caller reloads the
    /// environment for the new version with [`RecipeState::replace_env`].
    pub fn mark_renamed(&mut self, new_version: impl Into<String>) {
        self.old_env = Some(self.env.clone());
        self.new_version = new_version.into();
        self.rename = RenameState::Renamed;
    }

    /// Replace the environment after the recipe was re-parsed
    pub fn replace_env(&mut self, env: Environment) -> Result<()> {
        env.validate()?;
        self.env = env;
        Ok(())
    }
}

/// Recipes already force-cleaned during this run
#[derive(Debug, Clone, Default)]
pub struct RetriedSet {
    names: BTreeSet<String>,
}

impl RetriedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `recipes` for a forced clean
    ///
    /// Returns false, recording nothing, when any of them was already
    /// retried.
    pub fn admit(&mut self, recipes: &[String]) -> bool {
        if recipes.iter().any(|r| self.names.contains(r)) {
            return false;
        }
        self.names.extend(recipes.iter().cloned());
        true
    }

    pub fn contains(&self, recipe: &str) -> bool {
        self.names.contains(recipe)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
