// src/transaction.rs

//! Patch suppression transaction
//!
//! Commenting out patches is speculative: if the build still cannot be
//! recovered, every patch removal must be undone. Before the first removal
//! the pending work is committed as a checkpoint and a scratch branch is
//! created. The transaction then ends exactly once:
//!
//! - **fold** on success: the scratch branch goes away and the checkpoint
//!   is soft-reset so all changes are back in the working tree.
//! - **discard** on failure: the scratch branch goes away, the tree is
//!   hard-reset to the checkpoint and the checkpoint is soft-reset.
//!
//! Both consume the transaction, so it cannot be closed twice.

use crate::error::Result;
use crate::git::VersionControl;
use crate::recipe::CommentedPatch;
use tracing::{debug, info};

/// Branch holding the upgrade work
pub const BASE_BRANCH: &str = "upgrades";

/// Scratch branch for speculative patch removals
pub const SCRATCH_BRANCH: &str = "comment_patches";

const CHECKPOINT_MESSAGE: &str = "temporary";

/// Open checkpoint of speculative patch removals
#[must_use = "a patch suppression must be folded or discarded"]
#[derive(Debug)]
pub struct PatchSuppression {
    patches: Vec<CommentedPatch>,
}

impl PatchSuppression {
    /// Commit pending work as a checkpoint and switch to the scratch branch
    pub fn open(vcs: &dyn VersionControl) -> Result<Self> {
        debug!("Opening patch suppression checkpoint");
        vcs.commit(CHECKPOINT_MESSAGE, None)?;
        vcs.create_branch(SCRATCH_BRANCH)?;
        vcs.checkout_branch(SCRATCH_BRANCH)?;
        Ok(Self {
            patches: Vec::new(),
        })
    }

    /// Record a patch removed while the transaction is open
    pub fn record(&mut self, patch: CommentedPatch) {
        self.patches.push(patch);
    }

    pub fn patches(&self) -> &[CommentedPatch] {
        &self.patches
    }

    /// Commit message section listing the removed patches
    pub fn commentary(&self) -> String {
        if self.patches.is_empty() {
            return String::new();
        }
        let mut text = String::from("\n\nCommented the following patch(es):\n");
        for patch in &self.patches {
            text.push_str(&patch.note());
        }
        text
    }

    /// Keep the removals and return their commit message section
    pub fn fold(self, vcs: &dyn VersionControl) -> Result<String> {
        info!("Keeping {} commented patch(es)", self.patches.len());
        vcs.checkout_branch(BASE_BRANCH)?;
        vcs.delete_branch(SCRATCH_BRANCH)?;
        vcs.reset_soft(1)?;
        Ok(self.commentary())
    }

    /// Undo the removals and restore the checkpoint as working tree changes
    pub fn discard(self, vcs: &dyn VersionControl) -> Result<()> {
        info!("Restoring {} commented patch(es)", self.patches.len());
        vcs.checkout_branch(BASE_BRANCH)?;
        vcs.delete_branch(SCRATCH_BRANCH)?;
        vcs.reset_hard(0)?;
        vcs.reset_soft(1)?;
        Ok(())
    }
}
