// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! The fakes record every call in one shared [`OpLog`] so tests can assert
//! the order in which build and version control operations happened.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use upgrade_helper::{BuildTool, Error, Prompter, Result, VersionControl};

/// Ordered record of every fake operation
#[derive(Debug, Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn push(&self, op: impl Into<String>) {
        self.0.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| o.as_str() == op).count()
    }

    /// Position of the first occurrence of `op`
    pub fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }
}

/// Scripted result of one build invocation
#[derive(Debug, Clone)]
pub enum Scripted {
    Ok,
    Fail(String),
}

impl Scripted {
    fn into_result(self, what: &str) -> Result<String> {
        match self {
            Self::Ok => Ok(String::new()),
            Self::Fail(stdout) => Err(Error::execution(
                format!("'bitbake {}' failed", what),
                stdout.as_bytes(),
                b"",
            )),
        }
    }
}

type Queue = Arc<Mutex<VecDeque<Scripted>>>;

fn next(queue: &Queue, what: &str) -> Result<String> {
    let scripted = queue.lock().unwrap().pop_front().unwrap_or(Scripted::Ok);
    scripted.into_result(what)
}

/// In-memory build tool with scripted fetch and build results
#[derive(Debug, Clone, Default)]
pub struct FakeBuildTool {
    pub log: OpLog,
    fetches: Queue,
    builds: Queue,
    envs: Arc<Mutex<VecDeque<String>>>,
    checkpkg: Arc<Mutex<Option<String>>>,
    buildhistory: Arc<Mutex<Option<Scripted>>>,
    buildhistory_output: Arc<Mutex<String>>,
    log_dir: Option<PathBuf>,
}

impl FakeBuildTool {
    pub fn new(log: OpLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn script_fetch(&self, result: Scripted) {
        self.fetches.lock().unwrap().push_back(result);
    }

    pub fn script_build(&self, result: Scripted) {
        self.builds.lock().unwrap().push_back(result);
    }

    /// Queue `bitbake -e` output; the last one is repeated
    pub fn script_env(&self, output: String) {
        self.envs.lock().unwrap().push_back(output);
    }

    pub fn fail_checkpkg(&self, stdout: &str) {
        *self.checkpkg.lock().unwrap() = Some(stdout.to_string());
    }

    /// Output of a successful `buildhistory-diff`
    pub fn script_buildhistory(&self, output: &str) {
        *self.buildhistory_output.lock().unwrap() = output.to_string();
    }

    pub fn fail_buildhistory(&self, stdout: &str) {
        *self.buildhistory.lock().unwrap() = Some(Scripted::Fail(stdout.to_string()));
    }
}

impl BuildTool for FakeBuildTool {
    fn set_log_dir(&mut self, dir: &Path) {
        self.log_dir = Some(dir.to_path_buf());
    }

    fn stdout_log(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|d| d.join("bitbake_log.txt"))
    }

    fn env(&self, recipe: &str) -> Result<String> {
        self.log.push(format!("bitbake -e {}", recipe));
        let mut envs = self.envs.lock().unwrap();
        if envs.len() > 1 {
            return Ok(envs.pop_front().unwrap_or_default());
        }
        Ok(envs.front().cloned().unwrap_or_default())
    }

    fn fetch(&self, recipe: &str) -> Result<String> {
        self.log.push(format!("bitbake fetch {}", recipe));
        next(&self.fetches, "-c fetch")
    }

    fn unpack(&self, recipe: &str) -> Result<String> {
        self.log.push(format!("bitbake unpack {}", recipe));
        Ok(String::new())
    }

    fn complete(&self, recipe: &str, machine: &str) -> Result<String> {
        self.log.push(format!("bitbake {} MACHINE={}", recipe, machine));
        next(&self.builds, recipe)
    }

    fn cleanall(&self, recipe: &str) -> Result<String> {
        self.log.push(format!("bitbake cleanall {}", recipe));
        Ok(String::new())
    }

    fn cleansstate(&self, recipes: &[String]) -> Result<String> {
        self.log.push(format!("bitbake cleansstate {}", recipes.join(" ")));
        Ok(String::new())
    }

    fn checkpkg(&self, recipes: &[String]) -> Result<String> {
        self.log.push(format!("bitbake checkpkg {}", recipes.join(" ")));
        match self.checkpkg.lock().unwrap().clone() {
            Some(stdout) => Scripted::Fail(stdout).into_result("-c checkpkg"),
            None => Ok(String::new()),
        }
    }

    fn buildhistory_diff(&self, revisions: usize) -> Result<String> {
        self.log.push(format!("buildhistory-diff HEAD~{}", revisions));
        match self.buildhistory.lock().unwrap().clone() {
            Some(scripted) => scripted.into_result("buildhistory-diff"),
            None => Ok(self.buildhistory_output.lock().unwrap().clone()),
        }
    }
}

/// In-memory version control; `move_path` really moves files
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    pub log: OpLog,
    status: Arc<Mutex<String>>,
    branches: Arc<Mutex<BTreeSet<String>>>,
    nothing_to_commit: Arc<Mutex<bool>>,
    tags: Arc<Mutex<String>>,
}

impl FakeVcs {
    pub fn new(log: OpLog) -> Self {
        let vcs = Self {
            log,
            ..Default::default()
        };
        vcs.branches.lock().unwrap().insert("upgrades".to_string());
        vcs
    }

    pub fn set_status(&self, status: &str) {
        *self.status.lock().unwrap() = status.to_string();
    }

    pub fn remove_branch(&self, name: &str) {
        self.branches.lock().unwrap().remove(name);
    }

    pub fn set_nothing_to_commit(&self, value: bool) {
        *self.nothing_to_commit.lock().unwrap() = value;
    }

    pub fn set_tags(&self, tags: &str) {
        *self.tags.lock().unwrap() = tags.to_string();
    }

    fn command_error(command: &str, stdout: &str) -> Error {
        Error::Command {
            command: command.to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }
}

impl VersionControl for FakeVcs {
    fn move_path(&self, src: &Path, dest: &Path) -> Result<()> {
        self.log.push(format!(
            "git mv {} {}",
            src.file_name().unwrap().to_string_lossy(),
            dest.file_name().unwrap().to_string_lossy()
        ));
        fs::rename(src, dest)?;
        Ok(())
    }

    fn commit(&self, message: &str, _author: Option<&str>) -> Result<()> {
        let first_line = message.lines().next().unwrap_or_default().to_string();
        self.log.push(format!("git commit {}", first_line));
        if *self.nothing_to_commit.lock().unwrap() {
            return Err(Self::command_error(
                "commit",
                "On branch upgrades\nnothing to commit, working tree clean\n",
            ));
        }
        Ok(())
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        self.log.push(format!("git checkout {}", name));
        if !self.branches.lock().unwrap().contains(name) {
            return Err(Self::command_error("checkout", ""));
        }
        Ok(())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.log.push(format!("git checkout -b {}", name));
        self.branches.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.log.push(format!("git branch -D {}", name));
        if !self.branches.lock().unwrap().remove(name) {
            return Err(Self::command_error("branch", ""));
        }
        Ok(())
    }

    fn reset_hard(&self, n: u32) -> Result<()> {
        self.log.push(format!("git reset --hard {}", n));
        Ok(())
    }

    fn reset_soft(&self, n: u32) -> Result<()> {
        self.log.push(format!("git reset --soft {}", n));
        Ok(())
    }

    fn status(&self) -> Result<String> {
        self.log.push("git status");
        Ok(self.status.lock().unwrap().clone())
    }

    fn clean_untracked(&self) -> Result<()> {
        self.log.push("git clean");
        Ok(())
    }

    fn create_patch(&self, out_dir: &Path) -> Result<PathBuf> {
        self.log.push("git format-patch");
        let patch = out_dir.join("0001-upgrade.patch");
        fs::write(&patch, "")?;
        Ok(patch)
    }

    fn ls_remote(&self, url: &str, options: &[&str]) -> Result<String> {
        self.log.push(format!("git ls-remote {} {}", options.join(" "), url));
        Ok(self.tags.lock().unwrap().clone())
    }
}

/// Prompter answering from a queue, falling back to the default answer
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    pub questions: Mutex<Vec<String>>,
    pub shown: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(default))
    }

    fn show(&self, title: &str, _body: &str) -> Result<()> {
        self.shown.lock().unwrap().push(title.to_string());
        Ok(())
    }
}

/// A zlib recipe directory inside a temporary layer
pub struct RecipeFixture {
    pub root: TempDir,
    pub recipe_dir: PathBuf,
    pub workdir: PathBuf,
}

pub const ZLIB_RECIPE: &str = r#"SUMMARY = "Zlib Compression Library"
LICENSE = "Zlib"
LIC_FILES_CHKSUM = "file://zlib.h;beginline=6;endline=23;md5=5377232268e952e9ef63bc555f7aa6c0"

SRC_URI = "https://zlib.net/zlib-${PV}.tar.xz \
           file://ldflags-tests.patch \
           file://run-ptest \
           "

SRC_URI[md5sum] = "00000000000000000000000000000000"
SRC_URI[sha256sum] = "1111111111111111111111111111111111111111111111111111111111111111"

PR = "r1"

inherit ptest
"#;

pub const PATCH_CONTENT: &str = "\
From 1 Mon Sep 17 00:00:00 2001
Subject: Respect LDFLAGS in tests

Upstream-Status: Pending
";

impl RecipeFixture {
    /// zlib at 1.2.12 with one patch, upgrading to 1.3
    pub fn zlib() -> Self {
        let root = tempfile::tempdir().unwrap();
        let recipe_dir = root.path().join("meta/recipes-core/zlib");
        fs::create_dir_all(recipe_dir.join("zlib")).unwrap();
        fs::write(recipe_dir.join("zlib_1.2.12.bb"), ZLIB_RECIPE).unwrap();
        fs::write(recipe_dir.join("zlib/ldflags-tests.patch"), PATCH_CONTENT).unwrap();
        fs::write(recipe_dir.join("zlib/run-ptest"), "#!/bin/sh\n").unwrap();

        for (version, notice) in [("1.2.12", "(C) 1995-2022"), ("1.3", "(C) 1995-2023")] {
            let source = root
                .path()
                .join(format!("build/tmp/work/zlib/{}-r0/zlib-{}", version, version));
            fs::create_dir_all(&source).unwrap();
            fs::write(source.join("zlib.h"), format!("zlib {}\n{}\n", version, notice)).unwrap();
        }

        let workdir = root.path().join("build/upgrade-helper/zlib");
        fs::create_dir_all(&workdir).unwrap();
        Self {
            root,
            recipe_dir,
            workdir,
        }
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.path().join("build")
    }

    pub fn recipe_path(&self, version: &str) -> PathBuf {
        self.recipe_dir.join(format!("zlib_{}.bb", version))
    }

    pub fn recipe_text(&self, version: &str) -> String {
        fs::read_to_string(self.recipe_path(version)).unwrap()
    }

    /// `bitbake -e zlib` output for the recipe at `version`
    pub fn env_output(&self, version: &str) -> String {
        let source = self
            .root
            .path()
            .join(format!("build/tmp/work/zlib/{}-r0/zlib-{}", version, version));
        format!(
            "# $PN\nPN=\"zlib\"\nPV=\"{v}\"\nPKGV=\"{v}\"\nS=\"{s}\"\nFILE=\"{f}\"\n\
             SRC_URI=\"https://zlib.net/zlib-{v}.tar.xz file://ldflags-tests.patch file://run-ptest\"\n\
             MACHINE=\"qemux86\"\n",
            v = version,
            s = source.display(),
            f = self.recipe_path(version).display()
        )
    }

    /// Write a task log and return bitbake output pointing at it
    pub fn failed_task(&self, recipe: &str, task: &str, log: &str) -> String {
        let temp = self
            .root
            .path()
            .join(format!("build/tmp/work/{}/1.3-r0/temp", recipe));
        fs::create_dir_all(&temp).unwrap();
        let log_path = temp.join(format!("log.{}.4242", task));
        fs::write(&log_path, log).unwrap();
        format!(
            "NOTE: Executing Tasks\nMACHINE           = \"qemux86\"\n\
             ERROR: Logfile of failure stored in: {}\n\
             ERROR: Task ({}) failed with exit code '1'\n",
            log_path.display(),
            task
        )
    }
}

/// Fetch log reporting a checksum mismatch with the corrected values
pub const CHECKSUM_FETCH_LOG: &str = "\
ERROR: zlib-1.3-r0 do_fetch: Fetcher failure for URL: 'https://zlib.net/zlib-1.3.tar.xz'. Checksum mismatch!
File: '/downloads/zlib-1.3.tar.xz' has md5 checksum 60373b133d630f74f4a1f94c1185a53f when 00000000000000000000000000000000 was expected
If this change is expected (e.g. you have upgraded to a new version without updating the checksums) then you can use these lines within the recipe:
SRC_URI[md5sum] = \"60373b133d630f74f4a1f94c1185a53f\"
SRC_URI[sha256sum] = \"8a9ba2898e1d0d774eca6ba5b4627a11e5588ba85c8851336eb38de4683050a7\"
Otherwise you should retry the download and/or check with upstream to determine if the file has become corrupted or otherwise unexpectedly modified.
";

/// Fetch log of a URL that could not be downloaded
pub const MISSING_URL_FETCH_LOG: &str = "\
ERROR: zlib-1.3-r0 do_fetch: Fetcher failure: Unable to find file https://zlib.net/zlib-1.3.tar.xz
ERROR: zlib-1.3-r0 do_fetch: Fetcher failure for URL: 'https://zlib.net/zlib-1.3.tar.xz'. Unable to fetch URL from any source.
";
