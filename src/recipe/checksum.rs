// src/recipe/checksum.rs

//! Source checksum and archive suffix repair
//!
//! A checksum mismatch during fetch prints the corrected `SRC_URI[...]`
//! declarations, which are copied verbatim into the recipe. When the
//! archive itself cannot be fetched, the extension of the source archive is
//! swapped for the next candidate in a [`SourceSuffixList`].

use super::mutator::LineEditor;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::LazyLock;

static MD5_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SRC_URI\[(.*)md5sum\].*").unwrap());
static SHA256_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SRC_URI\[(.*)sha256sum\].*").unwrap());

// Archive name ending on the SRC_URI line itself
static SUFFIX_FIRST_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^SRC_URI.*\$\{PV\}\.(.*)[" \\].*"#).unwrap());
static SRC_URI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^SRC_URI.*").unwrap());
// Archive name on a continuation line
static SUFFIX_NEXT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#".*\$\{PV\}\.(.*)[" \\].*"#).unwrap());

/// Digest kinds pinned by a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChecksumKind {
    Md5,
    Sha256,
}

impl ChecksumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5sum",
            Self::Sha256 => "sha256sum",
        }
    }
}

/// Split a checksum declaration into its source identifier and digest kind
///
/// The identifier is whatever precedes the kind inside the brackets, for
/// example `foo.` for `SRC_URI[foo.md5sum]` and the empty string for
/// `SRC_URI[md5sum]`.
fn parse_declaration(line: &str) -> Option<(String, ChecksumKind, String)> {
    if let Some(caps) = MD5_RE.captures(line) {
        return Some((caps[1].to_string(), ChecksumKind::Md5, caps[0].to_string()));
    }
    SHA256_RE
        .captures(line)
        .map(|caps| (caps[1].to_string(), ChecksumKind::Sha256, caps[0].to_string()))
}

/// Corrected checksum declarations grouped by source identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceChecksums {
    sums: BTreeMap<String, BTreeMap<ChecksumKind, String>>,
}

impl SourceChecksums {
    /// Collect the checksum declarations printed in a fetch log
    ///
    /// Fails with a fetch error when the log holds none, since there is
    /// nothing to repair.
    pub fn extract(fetch_log: &str) -> Result<Self> {
        let mut sums: BTreeMap<String, BTreeMap<ChecksumKind, String>> = BTreeMap::new();
        for line in fetch_log.lines() {
            if let Some((id, kind, declaration)) = parse_declaration(line) {
                sums.entry(id).or_default().insert(kind, declaration);
            }
        }

        if sums.is_empty() {
            return Err(Error::Fetch(
                "fetch log does not contain any SRC_URI checksum".to_string(),
            ));
        }
        Ok(Self { sums })
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Corrected declaration for an identifier and kind
    pub fn declaration(&self, id: &str, kind: ChecksumKind) -> Option<&str> {
        self.sums.get(id)?.get(&kind).map(String::as_str)
    }

    /// Line editor that writes these checksums into a recipe
    pub fn editor(&self) -> ChecksumEditor<'_> {
        ChecksumEditor { sums: self }
    }
}

/// Replaces checksum declarations whose identifier and kind match
pub struct ChecksumEditor<'a> {
    sums: &'a SourceChecksums,
}

impl LineEditor for ChecksumEditor<'_> {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let replacement = parse_declaration(line)
            .and_then(|(id, kind, _)| self.sums.declaration(&id, kind));

        match replacement {
            Some(declaration) => writeln!(out, "{}", declaration),
            None => out.write_all(line.as_bytes()),
        }
    }
}

/// Swaps the extension of the source archive in `SRC_URI`
///
/// The archive name sits either on the `SRC_URI` line itself or on the line
/// right after it.
pub struct SourceSuffixEditor {
    new_suffix: String,
    source_found: bool,
}

impl SourceSuffixEditor {
    pub fn new(new_suffix: impl Into<String>) -> Self {
        Self {
            new_suffix: new_suffix.into(),
            source_found: false,
        }
    }

    fn substitute(&self, line: &str, old_suffix: &str) -> String {
        if old_suffix.is_empty() {
            return line.to_string();
        }
        line.replace(old_suffix, &format!("{} ", self.new_suffix))
    }
}

impl LineEditor for SourceSuffixEditor {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let first = SUFFIX_FIRST_LINE_RE
            .captures(line)
            .map(|caps| caps[1].to_string());
        let uri_start = SRC_URI_RE.is_match(line);
        let next = SUFFIX_NEXT_LINE_RE
            .captures(line)
            .map(|caps| caps[1].to_string());

        // Only the line right after a bare SRC_URI line may hold the archive
        let follows_source = std::mem::take(&mut self.source_found);

        let mut edited = line.to_string();
        if let Some(old) = &first {
            edited = self.substitute(&edited, old);
        } else if let Some(old) = next.as_ref().filter(|_| follows_source) {
            edited = self.substitute(&edited, old);
        }
        if uri_start && first.is_none() {
            self.source_found = true;
        }

        out.write_all(edited.as_bytes())
    }

    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> {
        self.source_found = false;
        Ok(())
    }
}

/// Archive extensions tried when the source URL cannot be fetched
const DEFAULT_SUFFIXES: &[&str] = &[
    "tar.gz",
    "tgz",
    "zip",
    "tar.bz2",
    "tar.xz",
    "tar.lz4",
    "bz2",
    "lz4",
    "orig.tar.gz",
    "src.tar.gz",
    "src.rpm",
    "src.tgz",
    "stable.tar.gz",
];

/// Ordered archive suffix candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSuffixList {
    suffixes: Vec<String>,
}

impl SourceSuffixList {
    /// Build a list from explicit candidates, dropping blanks and repeats
    pub fn new<S: AsRef<str>>(suffixes: impl IntoIterator<Item = S>) -> Self {
        let mut list: Vec<String> = Vec::new();
        for suffix in suffixes {
            let suffix = suffix.as_ref().trim();
            if !suffix.is_empty() && !list.iter().any(|s| s == suffix) {
                list.push(suffix.to_string());
            }
        }
        Self { suffixes: list }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.suffixes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

impl Default for SourceSuffixList {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIXES.iter().copied())
    }
}
