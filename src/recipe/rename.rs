// src/recipe/rename.rs

//! Moving a recipe to the new upstream version

use super::mutator::{modify_recipe_files, rewrite_file, LineEditor};
use super::RecipeKind;
use crate::error::{Error, Result};
use crate::git::VersionControl;
use crate::state::RecipeState;
use regex::Regex;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static GIT_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\+.*\+.*").unwrap());
static SRCREV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^SRCREV *= *".*""#).unwrap());
static GIT_PV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^PV *= *"[^+]*(.*)""#).unwrap());
static GIT_REPO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*(git://[^ ;]*).*").unwrap());

/// Drops `PR` assignments so the revision restarts with the new version
struct PrCleaner;

impl LineEditor for PrCleaner {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        if line.starts_with("PR=") || line.starts_with("PR =") {
            return Ok(());
        }
        out.write_all(line.as_bytes())
    }
}

/// Points `SRCREV` and `PV` of a git recipe at a new tag
struct GitRevisionEditor<'a> {
    commit: &'a str,
    tag: &'a str,
}

impl LineEditor for GitRevisionEditor<'_> {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        if SRCREV_RE.is_match(line) {
            return writeln!(out, "SRCREV = \"{}\"", self.commit);
        }
        if let Some(caps) = GIT_PV_RE.captures(line) {
            return writeln!(out, "PV = \"{}{}\"", self.tag, &caps[1]);
        }
        out.write_all(line.as_bytes())
    }
}

/// Release tag embedded in a git recipe version such as `1.2+git1+abcdef`
pub fn tag_from_version(version: &str) -> &str {
    GIT_VERSION_RE
        .captures(version)
        .and_then(|caps| caps.get(1))
        .map_or(version, |m| m.as_str())
}

/// Commit a tag points at in `git ls-remote --tags` output
///
/// Peeled (`^{}`) entries win over the tag object itself.
pub fn find_tag_commit(ls_remote: &str, tag: &str) -> Option<String> {
    let peeled = format!("{}^{{}}", tag);
    let first_field = |line: &str| line.split_whitespace().next().map(str::to_string);

    ls_remote
        .lines()
        .find(|line| line.ends_with(&peeled))
        .or_else(|| ls_remote.lines().find(|line| line.ends_with(tag)))
        .and_then(first_field)
}

/// Move recipe files and the versioned patch directory to `new_version`
fn move_versioned_files(
    state: &RecipeState,
    vcs: &dyn VersionControl,
    old_version: &str,
    new_version: &str,
) -> Result<()> {
    let dir = state.recipe_dir();
    let pn = state.package_name();

    if !old_version.is_empty() {
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_file() && name.starts_with(pn) && name.contains(old_version) {
                names.push(name);
            }
        }
        names.sort();
        for name in names {
            let renamed = name.replace(old_version, new_version);
            vcs.move_path(&dir.join(&name), &dir.join(&renamed))?;
        }
    }

    let old_files = dir.join(format!("{}-{}", pn, old_version));
    if old_files.is_dir() {
        vcs.move_path(&old_files, &dir.join(format!("{}-{}", pn, new_version)))?;
    }
    Ok(())
}

fn rename_git_recipe(state: &RecipeState, vcs: &dyn VersionControl) -> Result<String> {
    let old_tag = tag_from_version(state.env().current_version()).to_string();
    let new_tag = tag_from_version(state.new_version()).to_string();
    if old_tag == new_tag {
        return Err(Error::UpgradeNotNeeded);
    }

    let repo = GIT_REPO_RE
        .captures(state.env().src_uri())
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| Error::UnsupportedProtocol(state.env().src_uri().to_string()))?;
    let tags = vcs.ls_remote(&repo, &["--tags"])?;
    let commit = find_tag_commit(&tags, &new_tag).ok_or_else(|| {
        Error::Fetch(format!("tag {} not found in {}", new_tag, repo))
    })?;
    info!("{}: tag {} is commit {}", state.package_name(), new_tag, commit);

    let pn = state.package_name().to_string();
    let mut editor = GitRevisionEditor {
        commit: &commit,
        tag: &new_tag,
    };
    let mut files: Vec<_> = fs::read_dir(state.recipe_dir())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| is_git_recipe_file(path, &pn, &old_tag))
        .collect();
    files.sort();
    for file in &files {
        rewrite_file(file, &mut editor)?;
    }

    Ok(old_tag)
}

fn is_git_recipe_file(path: &Path, pn: &str, tag: &str) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if !name.starts_with(pn) {
        return false;
    }
    ((name.contains(tag) || name.contains("git")) && name.contains(".bb")) || name.contains(".inc")
}

/// Bump the recipe to the state's target version
///
/// The caller reloads the recipe environment afterwards.
pub fn rename_recipe(state: &mut RecipeState, vcs: &dyn VersionControl) -> Result<()> {
    let (old_version, new_version) = match state.kind() {
        RecipeKind::Archive => (
            state.env().current_version().to_string(),
            state.new_version().to_string(),
        ),
        RecipeKind::Git => {
            let old_tag = rename_git_recipe(state, vcs)?;
            (old_tag, tag_from_version(state.new_version()).to_string())
        }
    };

    info!("{}: Renaming recipes to {} ...", state.package_name(), new_version);
    modify_recipe_files(
        state.recipe_dir(),
        state.package_name(),
        &old_version,
        &mut PrCleaner,
    )?;
    move_versioned_files(state, vcs, &old_version, &new_version)?;

    state.mark_renamed(new_version);
    Ok(())
}
