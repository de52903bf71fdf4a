use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::foundation::core::lock_unpoisoned;
use crate::sched::request::RequestId;

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one execution pass. Dependency bookkeeping on a request is
/// always scoped by the pass that owns it, so the same request can belong to
/// unrelated dependency graphs across passes without interference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PassId(u64);

#[derive(Debug, Default)]
struct PassNode {
    /// Unresolved dependencies.
    deps: HashSet<RequestId>,
    /// Dependencies that reached a terminal status, kept until cleared.
    rendered: HashSet<RequestId>,
    /// Requests depending on this one within the pass.
    listeners: HashSet<RequestId>,
}

/// Per-pass dependency/listener adjacency over frame/view requests.
///
/// Counts only decrease within a pass once building is done. No cycle
/// detection is performed; callers must supply a DAG.
#[derive(Debug)]
pub struct ExecutionPass {
    id: PassId,
    nodes: Mutex<HashMap<RequestId, PassNode>>,
}

impl Default for ExecutionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPass {
    /// Fresh pass with a process-unique identity.
    pub fn new() -> Self {
        Self {
            id: PassId(NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed)),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// This pass's identity.
    pub fn id(&self) -> PassId {
        self.id
    }

    /// Ensure `request` has a node in this pass, dependencies or not.
    pub fn register(&self, request: RequestId) {
        lock_unpoisoned(&self.nodes).entry(request).or_default();
    }

    /// Record that `parent` depends on `dep`: `dep` joins `parent`'s
    /// dependency set and `parent` joins `dep`'s listener set.
    pub fn add_dependency(&self, parent: RequestId, dep: RequestId) {
        let mut nodes = lock_unpoisoned(&self.nodes);
        nodes.entry(parent).or_default().deps.insert(dep);
        nodes.entry(dep).or_default().listeners.insert(parent);
    }

    /// Resolve `dep` inside `parent`'s dependency set and return the
    /// post-decrement count. A request becomes schedulable exactly when this
    /// reaches zero. Marking a dependency that is not (or no longer) in the
    /// active set leaves the count untouched.
    pub fn mark_dependency_as_rendered(&self, parent: RequestId, dep: RequestId) -> usize {
        let mut nodes = lock_unpoisoned(&self.nodes);
        let node = nodes.entry(parent).or_default();
        if node.deps.remove(&dep) {
            node.rendered.insert(dep);
        } else if !node.rendered.contains(&dep) {
            warn!(?parent, ?dep, "marking a dependency that was never added");
        }
        node.deps.len()
    }

    /// Unresolved dependency count for `request` in this pass.
    pub fn num_dependencies(&self, request: RequestId) -> usize {
        lock_unpoisoned(&self.nodes).get(&request).map(|n| n.deps.len()).unwrap_or(0)
    }

    /// Snapshot of `request`'s unresolved dependencies.
    pub fn dependencies(&self, request: RequestId) -> Vec<RequestId> {
        let nodes = lock_unpoisoned(&self.nodes);
        let mut out: Vec<RequestId> =
            nodes.get(&request).map(|n| n.deps.iter().copied().collect()).unwrap_or_default();
        out.sort();
        out
    }

    /// Snapshot of every dependency `request` ever had in this pass,
    /// resolved or not.
    pub fn all_dependencies(&self, request: RequestId) -> Vec<RequestId> {
        let nodes = lock_unpoisoned(&self.nodes);
        let mut out: Vec<RequestId> = nodes
            .get(&request)
            .map(|n| n.deps.iter().chain(n.rendered.iter()).copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Drop the rendered-dependency set for `request`. Idempotent.
    pub fn clear_rendered_dependencies(&self, request: RequestId) {
        if let Some(node) = lock_unpoisoned(&self.nodes).get_mut(&request) {
            node.rendered.clear();
        }
    }

    /// Snapshot of `request`'s listeners in this pass.
    pub fn listeners(&self, request: RequestId) -> Vec<RequestId> {
        let nodes = lock_unpoisoned(&self.nodes);
        let mut out: Vec<RequestId> =
            nodes.get(&request).map(|n| n.listeners.iter().copied().collect()).unwrap_or_default();
        out.sort();
        out
    }

    /// Every request registered in this pass.
    pub fn request_ids(&self) -> Vec<RequestId> {
        let mut out: Vec<RequestId> = lock_unpoisoned(&self.nodes).keys().copied().collect();
        out.sort();
        out
    }

    /// Requests whose dependency count is already zero.
    pub fn ready_requests(&self) -> Vec<RequestId> {
        let nodes = lock_unpoisoned(&self.nodes);
        let mut out: Vec<RequestId> = nodes
            .iter()
            .filter(|(_, n)| n.deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sched/pass.rs"]
mod tests;
