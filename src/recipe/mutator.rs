// src/recipe/mutator.rs

//! Line-oriented rewriting of recipe and include files
//!
//! Every recipe edit is a [`LineEditor`] streamed over the files that belong
//! to the recipe being upgraded. Output goes to a temporary file in the same
//! directory, which replaces the original only once it is fully written.

use crate::error::Result;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Per-line transform with its own cross-line state
///
/// `edit_line` receives each raw line including its terminator. Writing the
/// line back unchanged is a pass-through.
pub trait LineEditor {
    fn edit_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()>;

    /// Called once after the last line of each file
    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

/// Whether `file_name` is a recipe or include file of `package`
///
/// Recipes must mention the version being upgraded and carry the `.bb`
/// extension; include files only need the `.inc` extension.
pub fn is_recipe_file(file_name: &str, package: &str, version: &str) -> bool {
    if package.is_empty() || !file_name.starts_with(package) {
        return false;
    }
    (file_name.contains(version) && file_name.contains(".bb")) || file_name.contains(".inc")
}

/// Recipe and include files of `package` in `dir`, sorted by name
pub fn recipe_files(dir: &Path, package: &str, version: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if is_recipe_file(&name.to_string_lossy(), package, version) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Stream one file through `editor` and atomically replace it
pub fn rewrite_file(path: &Path, editor: &mut dyn LineEditor) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut reader = BufReader::new(File::open(path)?);
    let temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            editor.edit_line(&line, &mut writer)?;
        }
        editor.finish(&mut writer)?;
        writer.flush()?;
    }

    let permissions = fs::metadata(path)?.permissions();
    fs::set_permissions(temp.path(), permissions)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Run `editor` over every recipe and include file of `package` in `dir`
///
/// Returns the files that were visited.
pub fn modify_recipe_files(
    dir: &Path,
    package: &str,
    version: &str,
    editor: &mut dyn LineEditor,
) -> Result<Vec<PathBuf>> {
    let files = recipe_files(dir, package, version)?;
    for file in &files {
        debug!("Rewriting {}", file.display());
        rewrite_file(file, editor)?;
    }
    Ok(files)
}
