// src/history.rs

//! Upgrade attempt history
//!
//! Universe runs remember the last attempted version of every recipe in
//! `history.json` so an upgrade that already failed is not retried on each
//! run. Fetch failures and unclassified errors are retried once
//! [`RETRY_AFTER_DAYS`] have passed, since they tend to be transient.

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File name of the history inside the upgrade helper directory
pub const HISTORY_FILE: &str = "history.json";

/// Days before a transient failure is attempted again
pub const RETRY_AFTER_DAYS: i64 = 7;

const RETRYABLE: &[&str] = &["Failed(do_fetch)", "Failed(other errors)"];

/// Last attempt for one recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: String,
    pub maintainer: String,
    pub date: NaiveDate,
    pub status: String,
}

/// Last attempt of every recipe, keyed by recipe name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    entries: BTreeMap<String, HistoryEntry>,
}

impl History {
    /// Read `<dir>/history.json`; a missing file is an empty history
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn get(&self, recipe: &str) -> Option<&HistoryEntry> {
        self.entries.get(recipe)
    }

    /// Replace the entry of `recipe`
    pub fn record(&mut self, recipe: &str, version: &str, maintainer: &str, status: &str, date: NaiveDate) {
        self.entries.insert(
            recipe.to_string(),
            HistoryEntry {
                version: version.to_string(),
                maintainer: maintainer.to_string(),
                date,
                status: status.to_string(),
            },
        );
    }

    /// Whether upgrading `recipe` to `version` is worth an attempt on `today`
    pub fn should_attempt(&self, recipe: &str, version: &str, today: NaiveDate) -> bool {
        let Some(entry) = self.entries.get(recipe) else {
            return true;
        };
        if entry.version != version {
            return true;
        }
        RETRYABLE.contains(&entry.status.as_str())
            && (today - entry.date).num_days() > RETRY_AFTER_DAYS
    }

    /// Atomically write `<dir>/history.json`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(HISTORY_FILE);
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }
}
