// src/recipe/not_shipped.rs

//! Experimental repair for "installed but not shipped" packaging failures
//!
//! Unshipped paths from the QA report are collapsed into globs, rewritten
//! with install-path variables and appended to the `FILES_${PN}` clause.
//! Only enabled through `experimental_package_repair`.

use super::mutator::{modify_recipe_files, LineEditor};
use crate::environment::Environment;
use crate::error::Result;
use regex::Regex;
use std::io::{self, Write};
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static NOT_SHIPPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*Files/directories were installed but not shipped.*").unwrap()
});
static FILES_CLAUSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FILES[_:]\$\{PN\}[ +=].*").unwrap());

/// Install path prefixes and the variables that name them
const INSTALL_PREFIXES: &[(&str, &str)] = &[
    ("/usr", "prefix"),
    ("/bin", "base_bindir"),
    ("/sbin", "base_sbindir"),
    ("/lib", "base_libdir"),
    ("/usr/share", "datadir"),
    ("/etc", "sysconfdir"),
    ("/var", "localstatedir"),
    ("/usr/share/info", "infodir"),
    ("/usr/share/man", "mandir"),
    ("/usr/share/doc", "docdir"),
    ("/srv", "servicedir"),
    ("/usr/bin", "bindir"),
    ("/usr/sbin", "sbindir"),
    ("/usr/libexec", "libexecdir"),
    ("/usr/lib", "libdir"),
    ("/usr/include", "includedir"),
    ("/usr/lib/opie", "palmqtdir"),
];

const DEFAULT_INDENT: &str = "        ";

/// Replace the longest matching install prefix with its variable
pub fn substitute_prefix(path: &str) -> String {
    let longest = INSTALL_PREFIXES
        .iter()
        .filter(|(prefix, _)| path.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len());

    match longest {
        Some((prefix, var)) => format!("${{{}}}{}", var, &path[prefix.len()..]),
        None => path.to_string(),
    }
}

/// FILES entries for the paths listed after the not-shipped QA message
pub fn not_shipped_entries(package_log: &str) -> Vec<String> {
    let mut found = false;
    let mut paths: Vec<(String, usize)> = Vec::new();

    for line in package_log.lines() {
        if NOT_SHIPPED_RE.is_match(line) {
            found = true;
        }
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        if !found || !token.starts_with('/') {
            continue;
        }
        match paths.iter_mut().find(|(path, _)| token.starts_with(path.as_str())) {
            Some((_, occurrences)) => *occurrences += 1,
            None => paths.push((token.to_string(), 1)),
        }
    }

    paths
        .into_iter()
        .map(|(path, occurrences)| {
            let path = if occurrences > 1 {
                format!("{}/*", path)
            } else {
                path
            };
            substitute_prefix(&path)
        })
        .collect()
}

/// Appends entries to the end of the package's FILES clause
pub struct FilesClauseEditor<'a> {
    entries: &'a [String],
    in_clause: bool,
}

impl<'a> FilesClauseEditor<'a> {
    pub fn new(entries: &'a [String]) -> Self {
        Self {
            entries,
            in_clause: false,
        }
    }

    fn close_clause(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        self.in_clause = false;

        let mut line = line.trim_end().to_string();
        if let Some(quote) = line.rfind('"') {
            line.remove(quote);
        }
        let line = line.trim_end();
        let indent: String = line
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();

        if !line.trim().is_empty() {
            writeln!(out, "{} \\", line)?;
        }
        let indent = if indent.is_empty() || FILES_CLAUSE_RE.is_match(line) {
            DEFAULT_INDENT.to_string()
        } else {
            indent
        };

        let Some((last, rest)) = self.entries.split_last() else {
            return Ok(());
        };
        for entry in rest {
            writeln!(out, "{}{} \\", indent, entry)?;
        }
        writeln!(out, "{}{}\"", indent, last)
    }
}

impl LineEditor for FilesClauseEditor<'_> {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        if FILES_CLAUSE_RE.is_match(line) {
            if line.matches('"').count() >= 2 {
                return self.close_clause(line, out);
            }
            self.in_clause = true;
            return out.write_all(line.as_bytes());
        }

        if self.in_clause && line.contains('"') {
            return self.close_clause(line, out);
        }
        out.write_all(line.as_bytes())
    }
}

/// Add unshipped files from `package_log` to the recipe
///
/// Returns whether any entries were added.
pub fn add_not_shipped(package_log: &str, recipe_dir: &Path, env: &Environment) -> Result<bool> {
    let entries = not_shipped_entries(package_log);
    if entries.is_empty() {
        return Ok(false);
    }

    info!("{}: Add new files in recipe ...", env.package_name());
    let mut editor = FilesClauseEditor::new(&entries);
    modify_recipe_files(
        recipe_dir,
        env.package_name(),
        env.current_version(),
        &mut editor,
    )?;
    Ok(true)
}
