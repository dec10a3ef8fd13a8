// src/config.rs

//! Upgrade helper configuration
//!
//! Read from `$BUILDDIR/upgrade-helper/upgrade-helper.toml`, falling back to
//! the per-user configuration directory:
//!
//! ```toml
//! [settings]
//! machines = ["qemux86", "qemuarm"]
//! author = "Jane Doe <jane@example.com>"
//! skip_compilation = false
//! interactive = true
//! experimental_package_repair = false
//! source_suffixes = ["tar.gz", "tar.xz"]
//! blacklist = ["gcc", "python3"]
//! maintainers_whitelist = ["jane@example.com"]
//! clean_sstate = false
//! clean_tmp = false
//! drop_previous_commits = false
//! buildhistory = false
//!
//! [maintainer_override]
//! "old@example.com" = "new@example.com"
//! ```

use crate::error::{Error, Result};
use crate::recipe::SourceSuffixList;
use crate::recovery::RecoveryOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory under the build directory owned by the upgrade helper
pub const UH_DIR: &str = "upgrade-helper";

/// Configuration file name inside [`UH_DIR`]
pub const CONFIG_FILE: &str = "upgrade-helper.toml";

fn default_machines() -> Vec<String> {
    ["qemux86", "qemux86-64", "qemuarm", "qemumips", "qemuppc"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

/// `[settings]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Machines every upgrade is built for
    #[serde(default = "default_machines")]
    pub machines: Vec<String>,

    /// Author of the upgrade commit
    #[serde(default)]
    pub author: Option<String>,

    /// Stop after a successful fetch
    #[serde(default)]
    pub skip_compilation: bool,

    /// Ask before license and patch repairs
    #[serde(default = "default_true")]
    pub interactive: bool,

    /// Add unshipped files to FILES on do_package failures
    #[serde(default)]
    pub experimental_package_repair: bool,

    /// Replacement archive suffix candidates
    #[serde(default)]
    pub source_suffixes: Option<Vec<String>>,

    /// Recipes never upgraded
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Maintainers whose recipes a universe run attempts; empty means all
    #[serde(default)]
    pub maintainers_whitelist: Vec<String>,

    /// Remove `sstate-cache` before a universe run
    #[serde(default)]
    pub clean_sstate: bool,

    /// Remove `tmp` before a universe run
    #[serde(default)]
    pub clean_tmp: bool,

    /// Drop each successful upgrade commit once its patch is saved
    #[serde(default)]
    pub drop_previous_commits: bool,

    /// Compare each upgraded build with the original through buildhistory
    #[serde(default)]
    pub buildhistory: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            machines: default_machines(),
            author: None,
            skip_compilation: false,
            interactive: true,
            experimental_package_repair: false,
            source_suffixes: None,
            blacklist: Vec::new(),
            maintainers_whitelist: Vec::new(),
            clean_sstate: false,
            clean_tmp: false,
            drop_previous_commits: false,
            buildhistory: false,
        }
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default)]
    pub settings: Settings,

    /// Maintainer e-mail replacements used in the run summary
    #[serde(default)]
    pub maintainer_override: BTreeMap<String, String>,
}

impl UpgradeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.settings.machines.is_empty() {
            return Err(Error::Config("settings.machines must not be empty".to_string()));
        }
        if let Some(machine) = self.settings.machines.iter().find(|m| m.trim().is_empty()) {
            return Err(Error::Config(format!("invalid machine name '{}'", machine)));
        }
        if let Some(suffixes) = &self.settings.source_suffixes {
            if suffixes.is_empty() {
                return Err(Error::Config(
                    "settings.source_suffixes must not be empty".to_string(),
                ));
            }
            if suffixes.iter().any(|s| s.trim().is_empty()) {
                return Err(Error::Config(
                    "settings.source_suffixes contains a blank entry".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Archive suffix candidates, configured or default
    pub fn suffixes(&self) -> SourceSuffixList {
        match &self.settings.source_suffixes {
            Some(list) => SourceSuffixList::new(list),
            None => SourceSuffixList::default(),
        }
    }

    pub fn recovery_options(&self) -> RecoveryOptions {
        RecoveryOptions {
            suffixes: self.suffixes(),
            package_repair: self.settings.experimental_package_repair,
            interactive: self.settings.interactive,
        }
    }

    /// Maintainer e-mail after applying `maintainer_override`
    pub fn maintainer<'a>(&'a self, email: &'a str) -> &'a str {
        self.maintainer_override
            .get(email)
            .map(String::as_str)
            .unwrap_or(email)
    }

    pub fn is_blacklisted(&self, recipe: &str) -> bool {
        self.settings.blacklist.iter().any(|r| r == recipe)
    }

    pub fn is_whitelisted(&self, maintainer: &str) -> bool {
        let whitelist = &self.settings.maintainers_whitelist;
        whitelist.is_empty() || whitelist.iter().any(|m| m == maintainer)
    }
}

/// Default configuration path for a build directory
pub fn default_config_path(build_dir: &Path) -> PathBuf {
    build_dir.join(UH_DIR).join(CONFIG_FILE)
}

/// Per-user configuration, used when the build directory has none
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(UH_DIR).join(CONFIG_FILE))
}

/// Configuration file to read for a build directory
pub fn resolve_config_path(build_dir: &Path) -> PathBuf {
    let local = default_config_path(build_dir);
    if local.exists() {
        return local;
    }
    user_config_path()
        .filter(|path| path.exists())
        .unwrap_or(local)
}

/// Parse configuration from a TOML string
pub fn parse_config_string(content: &str) -> Result<UpgradeConfig> {
    let config: UpgradeConfig =
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Parse a configuration file; a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<UpgradeConfig> {
    if !path.exists() {
        return Ok(UpgradeConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config_string(&content)
}
