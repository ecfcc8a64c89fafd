use crate::lock::NodeLock;
use log::trace;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

/// A tree vertex: its reader/writer lock plus the structural state that the
/// tree's shape mutex guards.
pub(crate) struct Node {
    pub(crate) lock: NodeLock,
    pub(crate) state: Mutex<NodeState>,
}

/// Name, links, and the reference count that keeps a node attached.
///
/// `refs` counts one per outstanding handle chain that traverses this node
/// and one per child present in `children`; the root carries one extra for
/// the tree that owns it. A node whose count reaches zero is detached from
/// its parent and dropped. Membership in a parent's `children` map does not
/// itself count: an empty, unheld node has nothing keeping it alive.
///
/// All fields are read and written only while the tree's shape mutex is
/// held; the per-node mutex just makes that access pattern safe to express.
pub(crate) struct NodeState {
    pub(crate) name: String,
    pub(crate) parent: Weak<Node>,
    pub(crate) children: HashMap<String, Arc<Node>>,
    pub(crate) refs: usize,
}

impl Node {
    /// The root: nameless, parentless, pinned by the tree with one ref.
    pub(crate) fn root() -> Arc<Node> {
        Arc::new(Node {
            lock: NodeLock::new(),
            state: Mutex::new(NodeState {
                name: String::new(),
                parent: Weak::new(),
                children: HashMap::new(),
                refs: 1,
            }),
        })
    }

    /// A fresh child. The caller inserts it into `parent`'s map and
    /// accounts for the new link; until then its count is zero.
    pub(crate) fn child(name: &str, parent: &Arc<Node>) -> Arc<Node> {
        Arc::new(Node {
            lock: NodeLock::new(),
            state: Mutex::new(NodeState {
                name: name.to_owned(),
                parent: Arc::downgrade(parent),
                children: HashMap::new(),
                refs: 0,
            }),
        })
    }
}

/// Every node strictly below `node` is unlocked. Caller holds the shape
/// mutex.
pub(crate) fn descendants_idle(node: &Arc<Node>) -> bool {
    let mut stack: Vec<Arc<Node>> = node.state.lock().children.values().cloned().collect();
    while let Some(n) = stack.pop() {
        if !n.lock.is_idle() {
            return false;
        }
        stack.extend(n.state.lock().children.values().cloned());
    }
    true
}

/// Drop one reference from `node` and prune upward. Caller holds the shape
/// mutex.
pub(crate) fn unref(node: &Arc<Node>) {
    {
        let mut state = node.state.lock();
        debug_assert!(state.refs > 0, "ref underflow on {:?}", state.name);
        state.refs -= 1;
    }
    prune(node);
}

/// Detach `node` from its parent if nothing references it any more, then
/// walk up: each severed child link costs the parent one reference, which
/// may empty the parent in turn. Caller holds the shape mutex.
///
/// The parent is taken from the node's current back-link, not from any
/// recorded chain: a rename may have moved the node since it was acquired.
pub(crate) fn prune(node: &Arc<Node>) {
    let mut cur = Arc::clone(node);
    loop {
        let (name, parent) = {
            let state = cur.state.lock();
            if state.refs > 0 {
                return;
            }
            match state.parent.upgrade() {
                Some(parent) => (state.name.clone(), parent),
                // The root is pinned and never reaches zero; a zero-count
                // node with no parent is already detached.
                None => return,
            }
        };
        {
            let mut pstate = parent.state.lock();
            if pstate
                .children
                .get(&name)
                .is_some_and(|child| Arc::ptr_eq(child, &cur))
            {
                pstate.children.remove(&name);
                debug_assert!(pstate.refs > 0, "child link underflow");
                pstate.refs -= 1;
                trace!("pruned empty node {name:?}");
            } else {
                // Renamed away while the count dropped; nothing to sever.
                return;
            }
        }
        cur = parent;
    }
}
