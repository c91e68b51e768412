//! Tree traversal: visitor trait and flags.

use crate::tree::{EntryRef, Tree};
use crate::ObjectError;

bitflags::bitflags! {
    /// Options controlling [`Tree::accept`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VisitFlags: u32 {
        /// Skip subtrees and leaves that are not modified.
        const MODIFIED_ONLY = 1 << 0;
        /// Do not hydrate unloaded subtrees; they are announced with an
        /// empty start/end pair instead.
        const LOADED_ONLY = 1 << 1;
        /// Iterate a snapshot of each subtree's children so the arena may
        /// be mutated between callbacks.
        const CONCURRENT_MODIFICATION = 1 << 2;
    }
}

/// Callbacks invoked by [`Tree::accept`] in depth-first order.
///
/// Subtrees get a pre-order `start_tree` and a post-order `end_tree`;
/// leaves get a single callback. Default implementations do nothing, so a
/// visitor only implements the callbacks it cares about.
pub trait TreeVisitor {
    fn start_tree(&mut self, tree: &Tree, entry: EntryRef) -> Result<(), ObjectError> {
        let _ = (tree, entry);
        Ok(())
    }

    fn end_tree(&mut self, tree: &Tree, entry: EntryRef) -> Result<(), ObjectError> {
        let _ = (tree, entry);
        Ok(())
    }

    fn file(&mut self, tree: &Tree, entry: EntryRef) -> Result<(), ObjectError> {
        let _ = (tree, entry);
        Ok(())
    }

    fn symlink(&mut self, tree: &Tree, entry: EntryRef) -> Result<(), ObjectError> {
        let _ = (tree, entry);
        Ok(())
    }
}
