// src/environment.rs
//! Recipe environment snapshot
//!
//! Variables come from `bitbake -e <recipe>`. A snapshot is read-only for
//! one upgrade attempt and is replaced wholesale after a rename.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^ \t=]*)=(.*)").unwrap());

/// Variables every snapshot must carry
const REQUIRED: [&str; 3] = ["PN", "PKGV", "S"];

/// Key/value snapshot of recipe variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Parse `bitbake -e` output
    ///
    /// The first assignment of a variable wins and surrounding double
    /// quotes are stripped from its value.
    pub fn parse(output: &str) -> Self {
        let mut vars = BTreeMap::new();
        for line in output.lines() {
            if let Some(caps) = ASSIGNMENT_RE.captures(line) {
                vars.entry(caps[1].to_string())
                    .or_insert_with(|| caps[2].trim_matches('"').to_string());
            }
        }
        Self { vars }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Check that the variables the recovery engine relies on are present
    pub fn validate(&self) -> Result<()> {
        for key in REQUIRED {
            if !self.vars.contains_key(key) {
                return Err(Error::MissingVariable(key.to_string()));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Look up a variable that must be present
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::MissingVariable(key.to_string()))
    }

    /// Override a single variable
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Recipe name (PN)
    pub fn package_name(&self) -> &str {
        self.get("PN").unwrap_or_default()
    }

    /// Packaged version (PKGV)
    pub fn current_version(&self) -> &str {
        self.get("PKGV").unwrap_or_default()
    }

    /// Declared version (PV)
    pub fn package_version(&self) -> Option<&str> {
        self.get("PV")
    }

    /// Unpacked source root (S)
    pub fn source_dir(&self) -> PathBuf {
        PathBuf::from(self.get("S").unwrap_or_default())
    }

    /// Path of the recipe file (FILE)
    pub fn recipe_file(&self) -> Option<&Path> {
        self.get("FILE").map(Path::new)
    }

    pub fn src_uri(&self) -> &str {
        self.get("SRC_URI").unwrap_or_default()
    }

    /// Directory holding the recipe file
    pub fn recipe_dir(&self) -> Result<PathBuf> {
        let file = self.require("FILE")?;
        Path::new(file)
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::MissingVariable("FILE".to_string()))
    }
}
