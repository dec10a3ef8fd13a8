// src/recipe/mod.rs

//! Recipe text mutations
//!
//! Every change the upgrade helper makes to a recipe goes through the
//! line-oriented [`mutator`]:
//!
//! - **checksum**: `SRC_URI[...]` checksums and the source archive suffix
//! - **patch_comment**: commenting non-applying patches out of `SRC_URI`
//! - **license**: `LIC_FILES_CHKSUM` md5 updates and license diffs
//! - **not_shipped**: experimental `FILES_${PN}` additions
//! - **rename**: moving the recipe to the new version

pub mod checksum;
pub mod license;
pub mod mutator;
pub mod not_shipped;
pub mod patch_comment;
pub mod rename;

pub use checksum::{SourceChecksums, SourceSuffixEditor, SourceSuffixList};
pub use license::{repair_license_checksums, LicenseFix, LicenseIssue};
pub use mutator::{modify_recipe_files, LineEditor};
pub use not_shipped::add_not_shipped;
pub use patch_comment::{CommentedPatch, FaultyPatch};
pub use rename::rename_recipe;

use crate::environment::Environment;
use crate::error::{Error, Result};

/// How a recipe obtains its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    /// Release archive over http, https or ftp
    Archive,
    /// Tagged git checkout
    Git,
}

impl RecipeKind {
    /// Pick the recipe kind from `SRC_URI`
    pub fn detect(env: &Environment) -> Result<Self> {
        let src_uri = env.src_uri();
        if ["ftp://", "http://", "https://"]
            .iter()
            .any(|scheme| src_uri.contains(scheme))
        {
            Ok(Self::Archive)
        } else if src_uri.contains("git://") {
            Ok(Self::Git)
        } else {
            Err(Error::UnsupportedProtocol(src_uri.to_string()))
        }
    }

    /// Whether other archive suffixes can be tried when fetching fails
    pub fn has_alternate_archives(&self) -> bool {
        matches!(self, Self::Archive)
    }

    /// Whether `SRC_URI` carries checksums that change with the version
    pub fn pins_checksums(&self) -> bool {
        matches!(self, Self::Archive)
    }
}
