use crate::lock::Mode;
use crate::node::{unref, Node};
use crate::Shared;
use log::trace;
use std::sync::Arc;

/// Scoped ownership of an acquired lock chain.
///
/// A `Handle` owns the ordered chain of nodes from the root to the
/// requested node: every ancestor is held in read mode, the last node in
/// the mode that was asked for. Dropping the handle releases the chain, so
/// the usual pattern is to bind it and let scope exit clean up:
///
/// ```
/// use hilok::HiLok;
///
/// let h = HiLok::new();
/// {
///     let _guard = h.write("/a/b");
///     assert!(h.try_write("/a/b").is_err());
/// } // released here
/// assert!(h.try_write("/a/b").is_ok());
/// ```
///
/// [`release`](Handle::release) is the explicit early form and is
/// idempotent. A handle can be moved to another thread, but it is a
/// single-owner token; there is nothing useful to share.
#[must_use = "if unused the locks are immediately released"]
pub struct Handle {
    shared: Arc<Shared>,
    chain: Vec<Arc<Node>>,
    mode: Mode,
    released: bool,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("mode", &self.mode)
            .field("released", &self.released)
            .field("depth", &self.chain.len())
            .finish()
    }
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>, chain: Vec<Arc<Node>>, mode: Mode) -> Self {
        debug_assert!(!chain.is_empty());
        Handle {
            shared,
            chain,
            mode,
            released: false,
        }
    }

    /// Release the chain now instead of at scope exit.
    ///
    /// Locks are dropped leaf to root, each node shedding this handle's
    /// reference as its lock is released; subtrees left empty and unheld
    /// are pruned on the way up. Calling this again (or dropping the
    /// handle afterwards) does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let shape = self.shared.shape.lock();
        let last = self.chain.len() - 1;
        for (i, node) in self.chain.iter().enumerate().rev() {
            let mode = if i == last { self.mode } else { Mode::Read };
            node.lock.release(mode);
            unref(node);
        }
        drop(shape);
        // Waiters whose condition spans several nodes re-check on any
        // release.
        self.shared.shape_cond.notify_all();
        trace!("released chain of {} nodes", self.chain.len());
    }

    /// Whether [`release`](Handle::release) has already run.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release();
    }
}
