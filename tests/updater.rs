// tests/updater.rs

//! End-to-end upgrade workflow tests with fake collaborators.

mod common;

use common::{FakeBuildTool, FakeVcs, OpLog, RecipeFixture, Scripted, ScriptedPrompter, CHECKSUM_FETCH_LOG};
use std::fs;
use std::path::Path;
use chrono::NaiveDate;
use upgrade_helper::updater::{UpgradeRequest, VcsFactory};
use upgrade_helper::{Error, History, UpgradeConfig, Updater, VersionControl};

fn config(machines: &[&str]) -> UpgradeConfig {
    let mut config = UpgradeConfig::default();
    config.settings.machines = machines.iter().map(|m| m.to_string()).collect();
    config.settings.interactive = false;
    config
}

fn factory(vcs: &FakeVcs) -> VcsFactory<'static> {
    let vcs = vcs.clone();
    Box::new(move |_dir: &Path| -> Box<dyn VersionControl> { Box::new(vcs.clone()) })
}

fn zlib_request() -> UpgradeRequest {
    UpgradeRequest {
        recipe: "zlib".to_string(),
        version: "1.3".to_string(),
        maintainer: "jane@example.com".to_string(),
    }
}

/// Assert that `ops` appear in this relative order
fn assert_in_order(log: &OpLog, ops: &[&str]) {
    let mut last = None;
    for op in ops {
        let pos = log
            .position(op)
            .unwrap_or_else(|| panic!("{} not run; ops: {:?}", op, log.ops()));
        if let Some(prev) = last {
            assert!(pos > prev, "{} ran out of order; ops: {:?}", op, log.ops());
        }
        last = Some(pos);
    }
}

#[test]
fn test_successful_upgrade() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));

    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(
        Box::new(build),
        factory(&vcs),
        &prompter,
        config(&["qemux86", "qemuarm"]),
        fixture.build_dir(),
    );
    updater.run(&[zlib_request()]).unwrap();

    assert_in_order(
        &log,
        &[
            "bitbake -e zlib",
            "git status",
            "git checkout upgrades",
            "bitbake unpack zlib",
            "git mv zlib_1.2.12.bb zlib_1.3.bb",
            "bitbake cleanall zlib",
            "bitbake fetch zlib",
            "bitbake zlib MACHINE=qemux86",
            "bitbake zlib MACHINE=qemuarm",
            "git commit zlib: upgrade to 1.3",
            "git format-patch",
        ],
    );
    assert_eq!(log.count("git reset --hard 1"), 0);

    let stats = updater.statistics();
    assert_eq!(stats.attempted(), 1);
    assert_eq!(stats.succeeded(), 1);
    assert!(updater.uh_dir().join("last_run.json").exists());
    assert!(fixture.workdir.join("0001-upgrade.patch").exists());
    assert!(fixture.recipe_text("1.3").contains("60373b133d630f74f4a1f94c1185a53f"));
}

#[test]
fn test_skip_compilation() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));

    let mut config = config(&["qemux86"]);
    config.settings.skip_compilation = true;
    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(Box::new(build), factory(&vcs), &prompter, config, fixture.build_dir());
    updater.run(&[zlib_request()]).unwrap();

    assert_eq!(log.count("bitbake zlib MACHINE=qemux86"), 0);
    assert_eq!(log.count("git commit zlib: upgrade to 1.3"), 1);
    assert_eq!(updater.statistics().succeeded(), 1);
}

#[test]
fn test_failed_upgrade_drops_commit() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    let failure = fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG);
    build.script_fetch(Scripted::Fail(failure.clone()));
    build.script_fetch(Scripted::Fail(failure));

    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(
        Box::new(build),
        factory(&vcs),
        &prompter,
        config(&["qemux86"]),
        fixture.build_dir(),
    );
    updater.run(&[zlib_request()]).unwrap();

    assert_in_order(&log, &["git commit zlib: upgrade to 1.3", "git format-patch", "git reset --hard 1"]);
    assert_eq!(log.count("bitbake zlib MACHINE=qemux86"), 0);

    let stats = updater.statistics();
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.records[0].status, "Failed(do_fetch)");
    assert_eq!(
        prompter.questions(),
        ["zlib: Do you want to keep the changes?"]
    );
}

#[test]
fn test_dirty_repository_is_reset_in_auto_mode() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    vcs.set_status(" M zlib_1.2.12.bb\n");
    vcs.remove_branch("upgrades");
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));

    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(
        Box::new(build),
        factory(&vcs),
        &prompter,
        config(&["qemux86"]),
        fixture.build_dir(),
    );
    updater.run(&[zlib_request()]).unwrap();

    assert_in_order(
        &log,
        &[
            "git status",
            "git reset --hard 0",
            "git clean",
            "git checkout upgrades",
            "git checkout -b upgrades",
            "bitbake unpack zlib",
        ],
    );
    assert_eq!(log.count("bitbake -e zlib"), 3);
    assert!(prompter.questions().is_empty());
    assert_eq!(updater.statistics().succeeded(), 1);
}

#[test]
fn test_dirty_repository_kept_on_request() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    vcs.set_status("?? notes.txt\n");
    build.script_env(fixture.env_output("1.2.12"));

    let mut config = config(&["qemux86"]);
    config.settings.interactive = true;
    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(Box::new(build), factory(&vcs), &prompter, config, fixture.build_dir());

    let err = updater.upgrade(&zlib_request()).unwrap_err();
    assert!(matches!(err, Error::Aborted(_)));
    assert_eq!(log.count("git reset --hard 0"), 0);
    assert_eq!(log.count("bitbake unpack zlib"), 0);
}

#[test]
fn test_upgrade_not_needed() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    vcs.set_nothing_to_commit(true);
    build.script_env(fixture.env_output("1.3"));

    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(
        Box::new(build),
        factory(&vcs),
        &prompter,
        config(&["qemux86"]),
        fixture.build_dir(),
    );
    updater.run(&[zlib_request()]).unwrap();

    assert_eq!(log.count("bitbake unpack zlib"), 0);
    assert_eq!(log.count("git format-patch"), 0);
    assert_eq!(log.count("git reset --hard 1"), 0);
    assert_eq!(updater.statistics().attempted(), 0);
}

#[test]
fn test_plan_with_explicit_version() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let prompter = ScriptedPrompter::default();
    let updater = Updater::new(
        Box::new(FakeBuildTool::new(log.clone())),
        factory(&FakeVcs::new(log.clone())),
        &prompter,
        config(&["qemux86"]),
        fixture.build_dir(),
    );

    let plan = updater.plan(&["zlib".to_string()], Some("1.3")).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].version, "1.3");

    let both = ["zlib".to_string(), "curl".to_string()];
    assert!(matches!(updater.plan(&both, Some("1.3")), Err(Error::Config(_))));
    assert!(log.ops().is_empty());
}

#[test]
fn test_plan_from_checkpkg() {
    let fixture = RecipeFixture::zlib();
    let csv_dir = fixture.build_dir().join("tmp/log");
    fs::create_dir_all(&csv_dir).unwrap();
    fs::write(
        csv_dir.join("checkpkg.csv"),
        "PackageName\tVersion\tUpver\tLicense\tMaintainer\n\
         zlib\t1.2.12\t1.3\tZlib\tJane Doe <jane@example.com>\tSUCCESS\n\
         curl\t8.0\t8.0\tMIT\tJoe Bloggs <joe@example.com>\tSUCCESS\n\
         gcc\t12.2\t13.1\tGPL\tJoe Bloggs <joe@example.com>\tSUCCESS\n\
         bash\t5.1\tN/A\tGPL\tJoe Bloggs <joe@example.com>\tSUCCESS\n",
    )
    .unwrap();

    let log = OpLog::default();
    let mut config = config(&["qemux86"]);
    config.settings.blacklist = vec!["gcc".to_string()];
    let prompter = ScriptedPrompter::default();
    let updater = Updater::new(
        Box::new(FakeBuildTool::new(log.clone())),
        factory(&FakeVcs::new(log.clone())),
        &prompter,
        config,
        fixture.build_dir(),
    );

    let recipes = ["zlib", "curl", "gcc", "bash"].map(String::from);
    let plan = updater.plan(&recipes, None).unwrap();
    assert_eq!(
        plan,
        [UpgradeRequest {
            recipe: "zlib".to_string(),
            version: "1.3".to_string(),
            maintainer: "jane@example.com".to_string(),
        }]
    );
    assert_eq!(log.ops(), ["bitbake checkpkg zlib curl gcc bash"]);
}

#[test]
fn test_plan_without_checkpkg_task() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    build.fail_checkpkg("ERROR: Task do_checkpkg does not exist for target zlib\n");

    let prompter = ScriptedPrompter::default();
    let updater = Updater::new(
        Box::new(build),
        factory(&FakeVcs::new(log.clone())),
        &prompter,
        config(&["qemux86"]),
        fixture.build_dir(),
    );
    let err = updater.plan(&["zlib".to_string()], None).unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("distrodata")));
}

const UNIVERSE_CSV: &str = "\
PackageName\tVersion\tUpver\tLicense\tMaintainer
zlib\t1.2.12\t1.3\tZlib\tJane Doe <jane@example.com>\tSUCCESS
curl\t8.0\t8.1\tMIT\tJoe Bloggs <joe@example.com>\tSUCCESS
gcc-cross-x86_64\t12.2\t13.1\tGPL\tJane Doe <jane@example.com>\tSUCCESS
zlib-native\t1.2.12\t1.3\tZlib\tJane Doe <jane@example.com>\tSUCCESS
libpng\t1.6.38\t1.6.39\tLibpng\tJane Doe <jane@example.com>\tSUCCESS
bash\t5.1\t5.2\tGPL\tJane Doe <jane@example.com>\tSUCCESS
";

fn write_checkpkg_report(fixture: &RecipeFixture, csv: &str) {
    let csv_dir = fixture.build_dir().join("tmp/log");
    fs::create_dir_all(&csv_dir).unwrap();
    fs::write(csv_dir.join("checkpkg.csv"), csv).unwrap();
}

fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

#[test]
fn test_universe_plan_filters_recipes() {
    let fixture = RecipeFixture::zlib();
    write_checkpkg_report(&fixture, UNIVERSE_CSV);

    let log = OpLog::default();
    let mut config = config(&["qemux86"]);
    config.settings.blacklist = vec!["bash".to_string()];
    config.settings.maintainers_whitelist = vec!["jane@example.com".to_string()];
    let prompter = ScriptedPrompter::default();
    let updater = Updater::new(
        Box::new(FakeBuildTool::new(log.clone())),
        factory(&FakeVcs::new(log.clone())),
        &prompter,
        config,
        fixture.build_dir(),
    )
    .with_today(march(10));

    let mut history = History::default();
    history.record("libpng", "1.6.39", "jane@example.com", "Failed(do_patch)", march(1));

    let plan = updater.plan_universe(&history).unwrap();
    let recipes: Vec<_> = plan.iter().map(|r| r.recipe.as_str()).collect();
    assert_eq!(recipes, ["zlib"]);
    assert_eq!(log.ops(), ["bitbake checkpkg universe"]);

    // A transient failure is attempted again once a week has passed
    history.record("libpng", "1.6.39", "jane@example.com", "Failed(do_fetch)", march(1));
    let plan = updater.plan_universe(&history).unwrap();
    let recipes: Vec<_> = plan.iter().map(|r| r.recipe.as_str()).collect();
    assert_eq!(recipes, ["zlib", "libpng"]);
}

#[test]
fn test_universe_run_records_history() {
    let fixture = RecipeFixture::zlib();
    write_checkpkg_report(&fixture, "zlib\t1.2.12\t1.3\tZlib\tJane Doe <jane@example.com>\tSUCCESS\n");
    let sstate = fixture.build_dir().join("sstate-cache");
    fs::create_dir_all(sstate.join("00")).unwrap();

    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));

    let mut config = config(&["qemux86"]);
    config.settings.clean_sstate = true;
    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(Box::new(build), factory(&vcs), &prompter, config, fixture.build_dir())
        .with_today(march(10));
    updater.run_universe().unwrap();

    assert!(!sstate.exists());
    assert_eq!(updater.statistics().succeeded(), 1);
    assert_in_order(&log, &["bitbake checkpkg universe", "bitbake fetch zlib"]);

    let history = History::load(&updater.uh_dir()).unwrap();
    let entry = history.get("zlib").unwrap();
    assert_eq!(entry.version, "1.3");
    assert_eq!(entry.status, "Succeeded");
    assert_eq!(entry.date, march(10));
}

#[test]
fn test_clean_tmp_removes_build_output() {
    let fixture = RecipeFixture::zlib();
    let tmp = fixture.build_dir().join("tmp");
    let sstate = fixture.build_dir().join("sstate-cache");
    fs::create_dir_all(&sstate).unwrap();
    assert!(tmp.exists());

    let log = OpLog::default();
    let mut config = config(&["qemux86"]);
    config.settings.clean_tmp = true;
    let prompter = ScriptedPrompter::default();
    let updater = Updater::new(
        Box::new(FakeBuildTool::new(log.clone())),
        factory(&FakeVcs::new(log.clone())),
        &prompter,
        config,
        fixture.build_dir(),
    );
    updater.prepare_build_dir().unwrap();

    assert!(!tmp.exists());
    assert!(sstate.exists());
}

#[test]
fn test_drop_previous_commits_keeps_patch() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));

    let mut config = config(&["qemux86"]);
    config.settings.drop_previous_commits = true;
    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(Box::new(build), factory(&vcs), &prompter, config, fixture.build_dir());
    updater.run(&[zlib_request()]).unwrap();

    assert_in_order(
        &log,
        &["git commit zlib: upgrade to 1.3", "git format-patch", "git reset --hard 1", "git clean"],
    );
    assert_eq!(updater.statistics().succeeded(), 1);
    assert!(fixture.workdir.join("0001-upgrade.patch").exists());
}

#[test]
fn test_buildhistory_diff_saved() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));
    build.script_buildhistory("packages/core2-64-poky-linux/zlib/zlib: PKGV changed from 1.2.12 to 1.3\n");

    let mut config = config(&["qemux86", "qemuarm"]);
    config.settings.buildhistory = true;
    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(Box::new(build), factory(&vcs), &prompter, config, fixture.build_dir());
    updater.run(&[zlib_request()]).unwrap();

    assert_in_order(
        &log,
        &[
            "bitbake zlib MACHINE=qemux86",
            "bitbake unpack zlib",
            "bitbake fetch zlib",
            "buildhistory-diff HEAD~2",
            "git commit zlib: upgrade to 1.3",
        ],
    );
    assert_eq!(log.count("bitbake zlib MACHINE=qemuarm"), 2);
    let diff = fs::read_to_string(fixture.workdir.join("buildhistory.txt")).unwrap();
    assert!(diff.contains("PKGV changed from 1.2.12 to 1.3"));
    assert_eq!(updater.statistics().succeeded(), 1);
}

#[test]
fn test_missing_buildhistory_fails_upgrade() {
    let fixture = RecipeFixture::zlib();
    let log = OpLog::default();
    let build = FakeBuildTool::new(log.clone());
    let vcs = FakeVcs::new(log.clone());
    build.script_env(fixture.env_output("1.2.12"));
    build.script_env(fixture.env_output("1.3"));
    build.script_fetch(Scripted::Fail(fixture.failed_task("zlib", "do_fetch", CHECKSUM_FETCH_LOG)));
    build.fail_buildhistory("Buildhistory directory \"buildhistory/\" does not exist\n");

    let mut config = config(&["qemux86"]);
    config.settings.buildhistory = true;
    let prompter = ScriptedPrompter::default();
    let mut updater = Updater::new(Box::new(build), factory(&vcs), &prompter, config, fixture.build_dir());
    updater.run(&[zlib_request()]).unwrap();

    let stats = updater.statistics();
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.records[0].status, "Failed(other errors)");
    assert!(!fixture.workdir.join("buildhistory.txt").exists());
    assert_in_order(&log, &["buildhistory-diff HEAD~1", "git commit zlib: upgrade to 1.3", "git reset --hard 1"]);
}
