// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use tracing::info;
use upgrade_helper::bitbake::Bitbake;
use upgrade_helper::config::{load_config, resolve_config_path, UH_DIR};
use upgrade_helper::git::{Git, VersionControl};
use upgrade_helper::prompt::{AutoPrompter, Prompter, TerminalPrompter};
use upgrade_helper::updater::{Updater, VcsFactory, UNIVERSE};

mod cli;

use cli::Cli;

/// Build directory from the command line, `$BUILDDIR` or the working directory
fn build_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.build_dir {
        return Ok(dir.clone());
    }
    if let Some(dir) = std::env::var_os("BUILDDIR") {
        return Ok(PathBuf::from(dir));
    }
    std::env::current_dir().context("cannot determine the build directory")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "upgrade-helper", &mut std::io::stdout());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .init();

    let universe = matches!(cli.recipes.as_slice(), [recipe] if recipe == UNIVERSE);
    if universe && cli.to_version.is_some() {
        bail!("--to-version cannot be combined with all");
    }

    let build_dir = build_dir(&cli)?;
    let config_path = match &cli.config_file {
        Some(path) if path.exists() => path.clone(),
        Some(path) => build_dir.join(UH_DIR).join(path),
        None => resolve_config_path(&build_dir),
    };
    info!("Using configuration {}", config_path.display());

    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if cli.auto || universe {
        config.settings.interactive = false;
    }
    if cli.skip_compilation {
        config.settings.skip_compilation = true;
    }

    let prompter: Box<dyn Prompter> = if config.settings.interactive {
        Box::new(TerminalPrompter::new())
    } else {
        Box::new(AutoPrompter)
    };
    let bitbake = Bitbake::new(&build_dir)?;
    let open_vcs: VcsFactory<'_> =
        Box::new(|dir: &Path| -> Box<dyn VersionControl> { Box::new(Git::new(dir)) });

    let mut updater = Updater::new(Box::new(bitbake), open_vcs, prompter.as_ref(), config, &build_dir);
    if universe {
        updater.run_universe()?;
        return Ok(());
    }
    let requests = updater.plan(&cli.recipes, cli.to_version.as_deref())?;
    if requests.is_empty() {
        info!("Nothing to upgrade");
        return Ok(());
    }
    updater.run(&requests)?;
    Ok(())
}
