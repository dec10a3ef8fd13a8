// src/statistics.rs

//! Run statistics
//!
//! Every attempted upgrade is recorded with its outcome. At the end of a run
//! the totals are printed and written to `last_run.json` in the upgrade
//! helper directory.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the serialized run summary
pub const LAST_RUN_FILE: &str = "last_run.json";

/// Status label of a successful upgrade
pub const SUCCEEDED: &str = "Succeeded";

/// Outcome of one recipe upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub recipe: String,
    pub version: String,
    pub maintainer: String,
    pub status: String,
}

impl UpgradeRecord {
    pub fn succeeded(&self) -> bool {
        self.status == SUCCEEDED
    }
}

/// Attempt counts for one maintainer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainerCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl MaintainerCounts {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Accumulated outcomes of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub started: DateTime<Utc>,
    pub records: Vec<UpgradeRecord>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
            records: Vec::new(),
        }
    }

    /// Record the outcome of an upgrade
    ///
    /// Recipes that needed no upgrade were not attempted and are skipped.
    pub fn update(&mut self, recipe: &str, version: &str, maintainer: &str, outcome: Option<&Error>) {
        let status = match outcome {
            Some(Error::UpgradeNotNeeded) => return,
            Some(err) => err.status(),
            None => SUCCEEDED,
        };
        self.records.push(UpgradeRecord {
            recipe: recipe.to_string(),
            version: version.to_string(),
            maintainer: maintainer.to_string(),
            status: status.to_string(),
        });
    }

    pub fn attempted(&self) -> usize {
        self.records.len()
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    /// Records grouped by status label
    pub fn by_status(&self) -> BTreeMap<&str, Vec<&UpgradeRecord>> {
        let mut groups: BTreeMap<&str, Vec<&UpgradeRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.status.as_str()).or_default().push(record);
        }
        groups
    }

    pub fn by_maintainer(&self) -> BTreeMap<&str, MaintainerCounts> {
        let mut counts: BTreeMap<&str, MaintainerCounts> = BTreeMap::new();
        for record in &self.records {
            let entry = counts.entry(record.maintainer.as_str()).or_default();
            if record.succeeded() {
                entry.succeeded += 1;
            } else {
                entry.failed += 1;
            }
        }
        counts
    }

    /// Human readable summary of the run
    pub fn summary(&self) -> String {
        let mut msg = String::from("\nUpgrade statistics:\n");
        msg.push_str("====================================================\n");
        for (status, records) in self.by_status() {
            msg.push_str(&format!("* {}: {}\n", status, records.len()));
            for record in records {
                msg.push_str(&format!(
                    "    {}, {}, {}\n",
                    record.recipe, record.version, record.maintainer
                ));
            }
        }

        let total = self.attempted();
        msg.push_str("++++++++++++++++++++++++++++++++++++++++++++++++++++\n");
        msg.push_str(&format!(
            "TOTAL: attempted={} succeeded={}({:.2}%) failed={}({:.2}%)\n\n",
            total,
            self.succeeded(),
            percent(self.succeeded(), total),
            self.failed(),
            percent(self.failed(), total)
        ));

        msg.push_str("* Statistics per maintainer:\n");
        for (maintainer, counts) in self.by_maintainer() {
            let name = maintainer.split('@').next().unwrap_or(maintainer);
            msg.push_str(&format!(
                "    {}: attempted={} succeeded={}({:.2}%) failed={}({:.2}%)\n",
                name,
                counts.attempted(),
                counts.succeeded,
                percent(counts.succeeded, counts.attempted()),
                counts.failed,
                percent(counts.failed, counts.attempted())
            ));
        }
        msg
    }

    /// Write the run to `<dir>/last_run.json`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LAST_RUN_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}
