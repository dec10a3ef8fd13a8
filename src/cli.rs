// src/cli.rs
//! CLI definitions for the upgrade helper
//!
//! Shared by the binary and by `build.rs`, which renders the man page from
//! the same definition.

use clap::Parser;
use clap_complete::Shell;
use std::path::PathBuf;

const USAGE_EXAMPLES: &str = "\
Usage examples:

* Upgrade xmodmap to the latest upstream version, interactively:
    $ upgrade-helper xmodmap

* Upgrade xmodmap to a given version, interactively:
    $ upgrade-helper xmodmap -t 1.2.3

* Upgrade a list of recipes in automatic mode:
    $ upgrade-helper -a xmodmap xf86-video-intel

* Attempt every recipe with a newer upstream version (no prompts):
    $ upgrade-helper all
";

#[derive(Parser, Debug)]
#[command(name = "upgrade-helper")]
#[command(author = "Upgrade Helper Contributors")]
#[command(version)]
#[command(about = "Upgrade bitbake recipes and repair the build", long_about = None)]
#[command(after_help = USAGE_EXAMPLES)]
pub struct Cli {
    /// Recipes to upgrade, or `all` for every recipe with a newer version
    #[arg(required_unless_present = "completions")]
    pub recipes: Vec<String>,

    /// Version to upgrade the recipe to
    #[arg(short, long)]
    pub to_version: Option<String>,

    /// Disable interactive mode
    #[arg(short, long)]
    pub auto: bool,

    /// Do not compile, just fix the checksums, remove PR and commit
    #[arg(short, long)]
    pub skip_compilation: bool,

    /// Configuration file (default: BUILDDIR/upgrade-helper/upgrade-helper.toml)
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,

    /// Debug level: CRITICAL=1, ERROR=2, WARNING=3, INFO=4, DEBUG=5
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub debug_level: u8,

    /// Build directory (default: $BUILDDIR)
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Print shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Cli {
    /// Log filter matching the requested debug level
    pub fn log_level(&self) -> &'static str {
        match self.debug_level {
            1 | 2 => "error",
            3 => "warn",
            4 => "info",
            _ => "debug",
        }
    }
}
