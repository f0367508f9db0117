//! Pre-order traversal of a box tree.
//!
//! A parent is always visited immediately before the first box of its children block,
//! and children are visited in the order they are listed.

use crate::tree::{BoxRef, BoxTree, MdBox};

/// Pre-order walker yielding handles.
///
/// The walker does not borrow the tree between steps, so the caller may mutate the
/// box it was just handed (e.g. release a leaf's events) before asking for the next.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    stack: Vec<BoxRef>,
}

impl Traversal {
    #[must_use]
    pub fn new(root: Option<BoxRef>) -> Self {
        Self {
            stack: root.into_iter().collect(),
        }
    }

    /// Returns the next box, or `None` when the walk is complete.
    ///
    /// Unknown handles are skipped.
    pub fn next<E>(&mut self, tree: &BoxTree<E>) -> Option<BoxRef> {
        loop {
            let handle = self.stack.pop()?;
            if let Some(mdbox) = tree.get(handle) {
                self.stack.extend(mdbox.children().iter().rev());
                return Some(handle);
            }
        }
    }
}

/// Borrowing pre-order iterator.
pub struct Preorder<'a, E> {
    tree: &'a BoxTree<E>,
    walker: Traversal,
}

impl<'a, E> Preorder<'a, E> {
    pub(crate) fn new(tree: &'a BoxTree<E>) -> Self {
        Self {
            tree,
            walker: tree.traversal(),
        }
    }
}

impl<'a, E> Iterator for Preorder<'a, E> {
    type Item = &'a MdBox<E>;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.walker.next(self.tree)?;
        self.tree.get(handle)
    }
}
