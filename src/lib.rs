#![doc = include_str!("../README.md")]
mod error;
mod handle;
mod lock;
mod node;

pub use error::LockError;
pub use handle::Handle;

use lock::{Deadline, Mode};
use log::{debug, trace};
use node::{descendants_idle, prune, unref, Node};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};

/// How nested acquisitions are policed, fixed when the tree is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Tolerate nesting: chains compose through read-held ancestors, and a
    /// write cares only about the lock on its own node. This is the
    /// default.
    #[default]
    Recursive,
    /// Refuse to write over live descendants: acquiring a node in write
    /// mode additionally requires every node below it to be unlocked.
    /// Reads are unaffected.
    Strict,
}

/// Configuration for a [`HiLok`] tree.
///
/// ```
/// use hilok::{HiLok, Policy};
///
/// let h = HiLok::builder().separator(':').policy(Policy::Strict).build();
/// let _r = h.read("a:b");
/// assert!(h.try_write("a").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HiLokBuilder {
    pub separator: char,
    pub policy: Policy,
}

impl HiLokBuilder {
    pub fn new() -> Self {
        HiLokBuilder {
            separator: '/',
            policy: Policy::Recursive,
        }
    }

    /// Character that splits paths into segments.
    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> HiLok {
        HiLok {
            shared: Arc::new(Shared {
                root: Node::root(),
                sep: self.separator,
                policy: self.policy,
                shape: Mutex::new(()),
                shape_cond: Condvar::new(),
            }),
        }
    }
}

impl Default for HiLokBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A hierarchical reader/writer lock tree.
///
/// Nodes are addressed by path strings and created on first use; locking a
/// node read-locks every ancestor along the way, which is what makes a
/// write on `/a` exclude activity anywhere under `/a/...`. See the crate
/// docs for the full model.
///
/// ```
/// use hilok::HiLok;
///
/// let h = HiLok::new();
/// let guard = h.write("/a/b");
/// assert!(h.try_write("/a").is_err()); // ancestor is read-held
/// drop(guard);
/// assert!(h.try_write("/a").is_ok());
/// ```
///
/// Cloning is cheap and yields another handle on the *same* tree, which is
/// how a `HiLok` is shared across threads.
///
/// The per-node locks are not reentrant: a thread that blocks on a node it
/// already write-holds is waiting on itself. Nested *reads* are fine.
#[derive(Clone)]
pub struct HiLok {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) root: Arc<Node>,
    pub(crate) sep: char,
    pub(crate) policy: Policy,
    /// Serializes every structural mutation: lookup-or-create, refcount
    /// changes with pruning, and the rename splice. Never held across a
    /// blocking lock wait.
    pub(crate) shape: Mutex<()>,
    /// Paired with `shape`; woken on every release so that waiters whose
    /// condition spans several nodes (strict writes, occupied rename
    /// destinations) can re-check.
    pub(crate) shape_cond: Condvar,
}

impl HiLok {
    /// A tree with the `/` separator and [`Policy::Recursive`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HiLokBuilder {
        HiLokBuilder::new()
    }

    pub fn separator(&self) -> char {
        self.shared.sep
    }

    pub fn policy(&self) -> Policy {
        self.shared.policy
    }

    /// Acquire `path` for reading, waiting as long as it takes.
    pub fn read(&self, path: &str) -> Handle {
        self.acquire(path, Mode::Read, Deadline::Never)
            .expect("unbounded acquisitions do not fail")
    }

    /// Acquire `path` for writing, waiting as long as it takes.
    pub fn write(&self, path: &str) -> Handle {
        self.acquire(path, Mode::Write, Deadline::Never)
            .expect("unbounded acquisitions do not fail")
    }

    /// Acquire `path` for reading without blocking.
    pub fn try_read(&self, path: &str) -> Result<Handle, LockError> {
        self.acquire(path, Mode::Read, Deadline::Now)
    }

    /// Acquire `path` for writing without blocking.
    pub fn try_write(&self, path: &str) -> Result<Handle, LockError> {
        self.acquire(path, Mode::Write, Deadline::Now)
    }

    /// Acquire `path` for reading, waiting at most `timeout`.
    pub fn try_read_for(&self, path: &str, timeout: Duration) -> Result<Handle, LockError> {
        self.acquire(path, Mode::Read, Deadline::after(timeout))
    }

    /// Acquire `path` for writing, waiting at most `timeout`.
    pub fn try_write_for(&self, path: &str, timeout: Duration) -> Result<Handle, LockError> {
        self.acquire(path, Mode::Write, Deadline::after(timeout))
    }

    /// Move the node at `src` to `dst`, waiting as long as it takes.
    ///
    /// The destination parent chain is created as needed and the final
    /// segment of `dst` becomes the node's new name. Handles already held
    /// on the moved node (or anything under it) stay valid and keep their
    /// locks; once the rename returns, fresh acquisitions of the old path
    /// build a fresh node.
    ///
    /// Fails [`NotFound`](LockError::NotFound) if `src` does not resolve,
    /// and [`Busy`](LockError::Busy) if the destination name is taken, if
    /// the move would put a node underneath itself, or if a conflicting
    /// writer could not be waited out.
    ///
    /// ```
    /// use hilok::HiLok;
    ///
    /// let h = HiLok::new();
    /// let w = h.write("/docs/draft");
    /// h.rename("/docs/draft", "/docs/final").unwrap();
    /// assert!(h.try_write("/docs/final").is_err()); // still write-held
    /// assert!(h.try_write("/docs/draft").is_ok()); // old path is fresh
    /// drop(w);
    /// ```
    pub fn rename(&self, src: &str, dst: &str) -> Result<(), LockError> {
        self.rename_impl(src, dst, Deadline::Never)
    }

    /// Like [`rename`](HiLok::rename) but failing instead of waiting.
    pub fn try_rename(&self, src: &str, dst: &str) -> Result<(), LockError> {
        self.rename_impl(src, dst, Deadline::Now)
    }

    /// Like [`rename`](HiLok::rename) but waiting at most `timeout`.
    pub fn try_rename_for(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<(), LockError> {
        self.rename_impl(src, dst, Deadline::after(timeout))
    }

    /// Whether the node at `path` exists and is itself held in any mode.
    /// Ancestors and descendants are not consulted.
    pub fn is_locked(&self, path: &str) -> bool {
        let segs = self.split(path);
        let _shape = self.shared.shape.lock();
        self.lookup_locked(&segs)
            .is_some_and(|chain| chain.last().is_some_and(|node| !node.lock.is_idle()))
    }

    /// Number of live nodes, the root included. A quiet tree reports 1:
    /// nodes exist only while a handle or a descendant keeps them alive.
    pub fn node_count(&self) -> usize {
        let _shape = self.shared.shape.lock();
        let mut count = 0;
        let mut stack = vec![Arc::clone(&self.shared.root)];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.state.lock().children.values().cloned());
        }
        count
    }

    // vvv Internals vvv

    /// Segments of `path`: split on the separator, empties dropped. The
    /// empty sequence is the root.
    fn split<'a>(&self, path: &'a str) -> Vec<&'a str> {
        path.split(self.shared.sep).filter(|s| !s.is_empty()).collect()
    }

    /// Walk `segs` from the root, creating missing children, taking one
    /// reference on every node touched. Caller holds the shape mutex.
    fn resolve_locked(&self, segs: &[&str]) -> Vec<Arc<Node>> {
        let mut chain = Vec::with_capacity(segs.len() + 1);
        let mut cur = Arc::clone(&self.shared.root);
        cur.state.lock().refs += 1;
        chain.push(Arc::clone(&cur));
        for seg in segs {
            let next = {
                let mut state = cur.state.lock();
                match state.children.get(*seg) {
                    Some(child) => Arc::clone(child),
                    None => {
                        let child = Node::child(seg, &cur);
                        state.children.insert((*seg).to_owned(), Arc::clone(&child));
                        state.refs += 1;
                        child
                    }
                }
            };
            next.state.lock().refs += 1;
            chain.push(Arc::clone(&next));
            cur = next;
        }
        chain
    }

    /// Walk `segs` without creating or counting anything. Caller holds the
    /// shape mutex.
    fn lookup_locked(&self, segs: &[&str]) -> Option<Vec<Arc<Node>>> {
        let mut chain = Vec::with_capacity(segs.len() + 1);
        let mut cur = Arc::clone(&self.shared.root);
        chain.push(Arc::clone(&cur));
        for seg in segs {
            let next = {
                let state = cur.state.lock();
                Arc::clone(state.children.get(*seg)?)
            };
            chain.push(Arc::clone(&next));
            cur = next;
        }
        Some(chain)
    }

    /// The chain acquisition at the heart of every `read`/`write`: lock
    /// root to leaf, ancestors in read mode and the leaf in `mode`, all
    /// against one shared `deadline`. Contention anywhere unwinds
    /// completely before reporting busy.
    fn acquire(&self, path: &str, mode: Mode, deadline: Deadline) -> Result<Handle, LockError> {
        let segs = self.split(path);
        let chain = {
            let _shape = self.shared.shape.lock();
            self.resolve_locked(&segs)
        };
        let last = chain.len() - 1;
        for (i, node) in chain.iter().enumerate() {
            let ok = if i < last {
                node.lock.acquire(Mode::Read, deadline)
            } else if mode == Mode::Write && self.shared.policy == Policy::Strict {
                self.acquire_write_strict(node, deadline)
            } else {
                node.lock.acquire(mode, deadline)
            };
            if ok {
                continue;
            }
            // Unwind in reverse, restoring every count this call took.
            let shape = self.shared.shape.lock();
            for (j, held) in chain.iter().enumerate().rev() {
                if j < i {
                    held.lock.release(Mode::Read);
                }
                unref(held);
            }
            drop(shape);
            self.shared.shape_cond.notify_all();
            trace!("{mode:?} {path:?}: busy");
            return Err(LockError::busy(path));
        }
        trace!("{mode:?} {path:?}: {} node chain", chain.len());
        Ok(Handle::new(Arc::clone(&self.shared), chain, mode))
    }

    /// Write acquisition under [`Policy::Strict`]: the node must be free
    /// *and* its whole subtree idle, checked atomically under the shape
    /// mutex. Releases anywhere in the tree wake the wait.
    fn acquire_write_strict(&self, node: &Arc<Node>, deadline: Deadline) -> bool {
        let mut shape = self.shared.shape.lock();
        loop {
            if descendants_idle(node) && node.lock.acquire(Mode::Write, Deadline::Now) {
                return true;
            }
            match deadline {
                Deadline::Now => return false,
                Deadline::Never => self.shared.shape_cond.wait(&mut shape),
                Deadline::At(at) => {
                    if self.shared.shape_cond.wait_until(&mut shape, at).timed_out() {
                        // One last look; a release can land at the deadline.
                        return descendants_idle(node)
                            && node.lock.acquire(Mode::Write, Deadline::Now);
                    }
                }
            }
        }
    }

    fn rename_impl(&self, src: &str, dst: &str, deadline: Deadline) -> Result<(), LockError> {
        let src_segs = self.split(src);
        let dst_segs = self.split(dst);
        let Some((&src_name, _)) = src_segs.split_last() else {
            // The root has no parent to detach from.
            return Err(LockError::not_found(src));
        };
        let Some((&dst_name, dst_parent_segs)) = dst_segs.split_last() else {
            // And nothing can take its place.
            return Err(LockError::busy(dst));
        };

        loop {
            let mut shape = self.shared.shape.lock();

            let Some(src_chain) = self.lookup_locked(&src_segs) else {
                return Err(LockError::not_found(src));
            };
            let src_node = Arc::clone(&src_chain[src_chain.len() - 1]);
            let old_parent = Arc::clone(&src_chain[src_chain.len() - 2]);
            let src_parents = &src_chain[..src_chain.len() - 1];

            // Walk (and lazily build) the destination parent chain,
            // refusing to descend into the node being moved: the graph
            // must stay a tree.
            let mut dst_parents: Vec<Arc<Node>> = Vec::with_capacity(dst_parent_segs.len() + 1);
            let mut cur = Arc::clone(&self.shared.root);
            dst_parents.push(Arc::clone(&cur));
            let mut cycle = false;
            for seg in dst_parent_segs {
                let next = {
                    let mut state = cur.state.lock();
                    match state.children.get(*seg) {
                        Some(child) => Arc::clone(child),
                        None => {
                            let child = Node::child(seg, &cur);
                            state.children.insert((*seg).to_owned(), Arc::clone(&child));
                            state.refs += 1;
                            child
                        }
                    }
                };
                if Arc::ptr_eq(&next, &src_node) {
                    cycle = true;
                    break;
                }
                dst_parents.push(Arc::clone(&next));
                cur = next;
            }
            if cycle {
                // Nothing was created on the way here: the walk only
                // reaches src through nodes that already exist.
                return Err(LockError::busy(dst));
            }
            let dst_parent = Arc::clone(&cur);

            // Moving onto its own slot is a no-op.
            if Arc::ptr_eq(&dst_parent, &old_parent) && dst_name == src_name {
                return Ok(());
            }

            if dst_parent.state.lock().children.contains_key(dst_name) {
                // Occupied names only live under pre-existing parents, so
                // there is nothing freshly created to clean up before
                // waiting for the occupant to go away.
                match deadline {
                    Deadline::Now => return Err(LockError::busy(dst)),
                    Deadline::Never => {
                        self.shared.shape_cond.wait(&mut shape);
                        continue;
                    }
                    Deadline::At(at) => {
                        if self.shared.shape_cond.wait_until(&mut shape, at).timed_out() {
                            return Err(LockError::busy(dst));
                        }
                        continue;
                    }
                }
            }

            // Briefly read-lock both parent chains around the splice.
            // These are try-acquires: contention means an active writer,
            // which is waited out below without the shape mutex held.
            let mut held: Vec<Arc<Node>> = Vec::new();
            let mut contended: Option<Arc<Node>> = None;
            for n in src_parents.iter().chain(dst_parents.iter()) {
                if n.lock.acquire(Mode::Read, Deadline::Now) {
                    held.push(Arc::clone(n));
                } else {
                    contended = Some(Arc::clone(n));
                    break;
                }
            }
            if let Some(busy_node) = contended {
                for n in held.iter().rev() {
                    n.lock.release(Mode::Read);
                }
                // Parents created for this attempt are empty; drop them.
                prune(&dst_parent);
                drop(shape);
                self.shared.shape_cond.notify_all();
                if matches!(deadline, Deadline::Now) {
                    return Err(LockError::busy(dst));
                }
                if !busy_node.lock.acquire(Mode::Read, deadline) {
                    return Err(LockError::busy(dst));
                }
                busy_node.lock.release(Mode::Read);
                continue;
            }

            // The splice: sever, relabel, reattach.
            {
                let mut state = old_parent.state.lock();
                let removed = state.children.remove(src_name);
                debug_assert!(removed.is_some_and(|n| Arc::ptr_eq(&n, &src_node)));
                state.refs -= 1;
            }
            {
                let mut state = src_node.state.lock();
                state.parent = Arc::downgrade(&dst_parent);
                state.name = dst_name.to_owned();
            }
            {
                let mut state = dst_parent.state.lock();
                state.children.insert(dst_name.to_owned(), Arc::clone(&src_node));
                state.refs += 1;
            }
            // The source parent may have just lost its only reason to be.
            prune(&old_parent);
            for n in held.iter().rev() {
                n.lock.release(Mode::Read);
            }
            drop(shape);
            self.shared.shape_cond.notify_all();
            debug!("renamed {src:?} -> {dst:?}");
            return Ok(());
        }
    }
}

impl Default for HiLok {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for HiLok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let _shape = self.shared.shape.lock();
        f.debug_struct("HiLok")
            .field("separator", &self.shared.sep)
            .field("policy", &self.shared.policy)
            .field("root", &DebugNode(&self.shared.root))
            .finish()
    }
}

/// Renders the live shape of a subtree: names and reference counts, no
/// lock counters.
struct DebugNode<'a>(&'a Arc<Node>);

impl Debug for DebugNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        let children: Vec<DebugNode<'_>> = state.children.values().map(DebugNode).collect();
        f.debug_struct("Node")
            .field("name", &state.name)
            .field("refs", &state.refs)
            .field("children", &children)
            .finish()
    }
}
