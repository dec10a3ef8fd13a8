// src/lib.rs

//! Upgrade Helper
//!
//! Upgrades bitbake recipes to new upstream versions and repairs the build
//! until it succeeds or a human has to step in.
//!
//! # Architecture
//!
//! - Capabilities: the build tool, version control and operator prompts sit
//!   behind traits so the recovery logic runs against fakes in tests
//! - Recovery engine: classifies build failures from the build output and
//!   applies one targeted recipe edit per retry
//! - Recipe edits: line-oriented rewrites replaced atomically on disk
//! - Patch suppression: speculative patch removals live on a scratch branch
//!   and are folded or discarded when the build cycle ends

pub mod bitbake;
pub mod build_log;
pub mod buildhistory;
pub mod config;
pub mod environment;
mod error;
pub mod git;
pub mod history;
pub mod prompt;
pub mod recipe;
pub mod recovery;
pub mod state;
pub mod statistics;
pub mod transaction;
pub mod updater;

pub use bitbake::{Bitbake, BuildTool};
pub use config::{load_config, UpgradeConfig};
pub use environment::Environment;
pub use error::{Error, Result};
pub use git::{Git, VersionControl};
pub use history::History;
pub use prompt::{AutoPrompter, Prompter, TerminalPrompter};
pub use recipe::RecipeKind;
pub use recovery::{CompileOutcome, RecoveryEngine, RecoveryOptions};
pub use state::{RecipeState, RetriedSet};
pub use statistics::Statistics;
pub use transaction::PatchSuppression;
pub use updater::{UpgradeRequest, Updater};
