use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cache::store::ActionResultCache;
use crate::foundation::core::{
    ImagePlane, PlaneDesc, RectI, TimeValue, ViewIdx, lock_unpoisoned,
};
use crate::foundation::error::{ActionStatus, RavelError, RavelResult};
use crate::graph::effect::Effect;
use crate::sched::build::{RequestTreeBuilder, cached_components};
use crate::sched::drive::{PassExecution, SubRenderFlags, drive_pass};
use crate::sched::pass::ExecutionPass;
use crate::sched::pool::WorkerPool;
use crate::sched::provider::ProviderHooks;
use crate::sched::render::{RenderTree, RenderTreeId};

/// Configuration for a [`QueueManager`].
#[derive(Clone, Copy, Debug)]
pub struct QueueManagerConfig {
    /// Worker-pool admission limit.
    pub pool_size: usize,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }
}

/// Opaque handle of one registered provider, scoping launch/wait bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

struct ProviderEntry {
    hooks: Option<Arc<dyn ProviderHooks>>,
    playback: bool,
    draining: bool,
    /// Renders launched through this provider and not yet fully drained.
    live: usize,
    /// Renders that reached a terminal status, awaiting their drain.
    finished: VecDeque<RenderTreeId>,
}

struct RenderEntry {
    render: Arc<RenderTree>,
    provider: Option<ProviderId>,
    finished: bool,
}

struct ManagerState {
    pending: VecDeque<RenderTreeId>,
    renders: HashMap<RenderTreeId, RenderEntry>,
    providers: HashMap<ProviderId, ProviderEntry>,
    next_provider: u64,
}

struct Shared {
    pool: WorkerPool,
    cache: Arc<ActionResultCache>,
    state: Mutex<ManagerState>,
    /// Wakes the manager thread.
    work_cond: Condvar,
    /// Wakes completion waiters.
    done_cond: Condvar,
    shutdown: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// The process-wide render scheduler.
///
/// One manager owns the render queue, pool admission control and per-provider
/// completion bookkeeping; any number of caller threads act as providers.
/// Built as an explicitly owned, injected service: construct with
/// [`QueueManager::new`], tear down with [`QueueManager::shutdown`]. Handles
/// are cheap clones of the same service.
///
/// Whenever a worker would block inside a manager-level wait, its pool slot
/// is handed back to the scheduler for the duration, so other ready work
/// runs instead of idling; this is what keeps recursive sub-renders safe
/// even with a pool of size one.
#[derive(Clone)]
pub struct QueueManager {
    shared: Arc<Shared>,
}

impl QueueManager {
    /// Start a manager with a private, unbacked action cache.
    pub fn new(config: QueueManagerConfig) -> Self {
        Self::with_cache(config, Arc::new(ActionResultCache::new()))
    }

    /// Start a manager over an explicit action cache (shared or backed by
    /// persistent storage).
    pub fn with_cache(config: QueueManagerConfig, cache: Arc<ActionResultCache>) -> Self {
        let shared = Arc::new(Shared {
            pool: WorkerPool::new(config.pool_size),
            cache,
            state: Mutex::new(ManagerState {
                pending: VecDeque::new(),
                renders: HashMap::new(),
                providers: HashMap::new(),
                next_provider: 1,
            }),
            work_cond: Condvar::new(),
            done_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("ravel-queue".to_string())
            .spawn(move || manager_loop(thread_shared));
        match handle {
            Ok(h) => *lock_unpoisoned(&shared.thread) = Some(h),
            Err(e) => {
                // No dispatcher exists; resolve every launch immediately
                // instead of queueing work nobody will ever run.
                warn!(error = %e, "failed to start queue manager thread");
                shared.shutdown.store(true, Ordering::Release);
            }
        }
        Self { shared }
    }

    /// The worker pool this manager schedules onto.
    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    /// The action-result cache consulted by every render.
    pub fn cache(&self) -> &Arc<ActionResultCache> {
        &self.shared.cache
    }

    /// Register a provider. Hooks, when given, are invoked by the manager:
    /// `request_more_renders` on under-utilization (playback providers
    /// only), `on_render_finished` on every completion.
    pub fn register_provider(
        &self,
        hooks: Option<Arc<dyn ProviderHooks>>,
        playback: bool,
    ) -> ProviderId {
        let mut state = lock_unpoisoned(&self.shared.state);
        let id = ProviderId(state.next_provider);
        state.next_provider += 1;
        state.providers.insert(
            id,
            ProviderEntry { hooks, playback, draining: false, live: 0, finished: VecDeque::new() },
        );
        id
    }

    /// Drop a provider's bookkeeping. Renders it launched keep running.
    pub fn unregister_provider(&self, provider: ProviderId) {
        lock_unpoisoned(&self.shared.state).providers.remove(&provider);
        self.shared.done_cond.notify_all();
    }

    /// Enqueue a top-level render and return immediately. Execution order
    /// across unrelated renders is unspecified.
    pub fn launch_render(&self, render: Arc<RenderTree>, provider: Option<ProviderId>) {
        let id = render.id();
        trace!(render = ?id, "render launched");
        let mut state = lock_unpoisoned(&self.shared.state);
        if self.shared.shutdown.load(Ordering::Acquire) {
            render.set_terminal(ActionStatus::Aborted);
            state.renders.insert(id, RenderEntry { render, provider, finished: true });
        } else {
            state.renders.insert(id, RenderEntry { render, provider, finished: false });
            state.pending.push_back(id);
        }
        if let Some(p) = provider {
            if let Some(entry) = state.providers.get_mut(&p) {
                entry.live += 1;
                if self.shared.shutdown.load(Ordering::Acquire) {
                    entry.finished.push_back(id);
                }
            }
        }
        drop(state);
        self.shared.work_cond.notify_one();
        self.shared.done_cond.notify_all();
    }

    /// Synchronously drive one execution pass for `effect` inside an
    /// already-launched render. Used when an effect re-enters the scheduler
    /// from within its own computation, e.g. to fetch an input image.
    ///
    /// Blocks the caller until the sub-root resolves; whenever the pass must
    /// wait, the caller's pool slot is handed back to the scheduler.
    pub fn launch_sub_render(
        &self,
        effect: &Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        plane: Option<PlaneDesc>,
        roi: Option<RectI>,
        render: &Arc<RenderTree>,
        flags: SubRenderFlags,
    ) -> RavelResult<(ActionStatus, Option<ImagePlane>)> {
        if render.is_aborted() {
            return Ok((ActionStatus::Aborted, None));
        }
        let plane = match plane {
            Some(p) => p,
            None => {
                let comps = cached_components(
                    self.cache(),
                    effect,
                    time,
                    view,
                    render.proxy_scale(),
                    render.mip_level(),
                )?;
                comps.produced.first().cloned().unwrap_or_else(PlaneDesc::rgba)
            }
        };
        let pass = Arc::new(ExecutionPass::new());
        let root = {
            let mut builder = RequestTreeBuilder::new(self.cache(), render, &pass);
            builder.build(effect, time, view, plane, roi, flags.create_new_if_unrendered)?
        };
        if flags.bypass_cache {
            root.set_bypass_cache();
        }
        debug!(render = ?render.id(), root = ?root.id(), "sub-render pass");
        let exec = PassExecution::new(self.clone(), render.clone(), pass);
        let status = drive_pass(&exec, root.id());
        let image = root.lock().image();
        Ok((status, image))
    }

    /// Block until `render`'s root request is fully resolved and drain the
    /// manager's bookkeeping for it. Idempotent: waiting on an
    /// already-drained render returns its stored terminal status.
    pub fn wait_for_render_finished(&self, render: &Arc<RenderTree>) -> ActionStatus {
        let _released = self.shared.pool.blocking_section();
        let id = render.id();
        let mut state = lock_unpoisoned(&self.shared.state);
        loop {
            match state.renders.get(&id) {
                None => {
                    // Already drained by a previous wait.
                    return render.terminal().unwrap_or(ActionStatus::Aborted);
                }
                Some(entry) if entry.finished => break,
                Some(_) => {
                    let (guard, _timeout) = self
                        .shared
                        .done_cond
                        .wait_timeout(state, Duration::from_millis(50))
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    state = guard;
                }
            }
        }
        if let Some(entry) = state.renders.remove(&id) {
            if let Some(p) = entry.provider {
                if let Some(prov) = state.providers.get_mut(&p) {
                    prov.live = prov.live.saturating_sub(1);
                    prov.finished.retain(|f| *f != id);
                }
            }
        }
        drop(state);
        self.shared.done_cond.notify_all();
        render.terminal().unwrap_or(ActionStatus::Failed)
    }

    /// Whether `provider` has launched renders that are not yet drained.
    pub fn has_renders_launched(&self, provider: ProviderId) -> bool {
        lock_unpoisoned(&self.shared.state)
            .providers
            .get(&provider)
            .map(|p| p.live > 0)
            .unwrap_or(false)
    }

    /// Whether `provider` has finished renders awaiting their drain.
    pub fn has_renders_finished(&self, provider: ProviderId) -> bool {
        lock_unpoisoned(&self.shared.state)
            .providers
            .get(&provider)
            .map(|p| !p.finished.is_empty())
            .unwrap_or(false)
    }

    /// Block until one of `provider`'s renders reaches a terminal status and
    /// return it, or `None` once the provider has nothing in flight. The
    /// caller must still drain the render with
    /// [`QueueManager::wait_for_render_finished`].
    pub fn wait_for_any_finished(&self, provider: ProviderId) -> Option<Arc<RenderTree>> {
        let _released = self.shared.pool.blocking_section();
        let mut state = lock_unpoisoned(&self.shared.state);
        loop {
            let entry = state.providers.get_mut(&provider)?;
            if let Some(id) = entry.finished.pop_front() {
                if let Some(render) = state.renders.get(&id).map(|e| e.render.clone()) {
                    return Some(render);
                }
                continue;
            }
            if entry.live == 0 || self.shared.shutdown.load(Ordering::Acquire) {
                return None;
            }
            let (guard, _timeout) = self
                .shared
                .done_cond
                .wait_timeout(state, Duration::from_millis(50))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = guard;
        }
    }

    /// Suppress or restore the provider's read-ahead hook, used while its
    /// owner drains all renders.
    pub(crate) fn set_draining(&self, provider: ProviderId, draining: bool) {
        if let Some(entry) =
            lock_unpoisoned(&self.shared.state).providers.get_mut(&provider)
        {
            entry.draining = draining;
        }
    }

    /// Hand the caller's pool slot back ahead of a known long wait outside
    /// the manager's own suspension points.
    pub fn release_task(&self) {
        self.shared.pool.release_task();
    }

    /// Re-acquire a slot released with [`QueueManager::release_task`].
    pub fn reserve_task(&self) {
        self.shared.pool.reserve_task();
    }

    /// Record a render's completion, surface it to its provider and fire the
    /// provider hooks.
    pub(crate) fn finish_render(&self, id: RenderTreeId, status: ActionStatus) {
        debug!(render = ?id, ?status, "render finished");
        let mut on_finished: Option<(Arc<dyn ProviderHooks>, Arc<RenderTree>)> = None;
        let mut read_ahead: Vec<Arc<dyn ProviderHooks>> = Vec::new();
        {
            let mut state = lock_unpoisoned(&self.shared.state);
            let mut resolved: Option<(Arc<RenderTree>, Option<ProviderId>)> = None;
            if let Some(entry) = state.renders.get_mut(&id) {
                entry.finished = true;
                resolved = Some((entry.render.clone(), entry.provider));
            }
            if let Some((render, Some(p))) = resolved {
                if let Some(prov) = state.providers.get_mut(&p) {
                    prov.finished.push_back(id);
                    if let Some(hooks) = prov.hooks.clone() {
                        on_finished = Some((hooks, render));
                    }
                }
            }
            let pool_limit = self.shared.pool.limit();
            for prov in state.providers.values() {
                let running = prov.live.saturating_sub(prov.finished.len());
                if prov.playback && !prov.draining && running < pool_limit {
                    if let Some(hooks) = prov.hooks.clone() {
                        read_ahead.push(hooks);
                    }
                }
            }
        }
        if let Some((hooks, render)) = on_finished {
            hooks.on_render_finished(&render);
        }
        for hooks in read_ahead {
            hooks.request_more_renders();
        }
        self.shared.done_cond.notify_all();
    }

    /// Stop the manager thread. Pending, not-yet-dispatched renders resolve
    /// as Aborted; renders already executing run to completion. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.work_cond.notify_all();
        self.shared.done_cond.notify_all();
        let handle = lock_unpoisoned(&self.shared.thread).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("queue manager thread panicked during shutdown");
            }
        }
    }
}

fn manager_loop(shared: Arc<Shared>) {
    let queue = QueueManager { shared: shared.clone() };
    loop {
        let next = {
            let mut state = lock_unpoisoned(&shared.state);
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                if let Some(id) = state.pending.pop_front() {
                    break Some(id);
                }
                let (guard, _timeout) = shared
                    .work_cond
                    .wait_timeout(state, Duration::from_millis(100))
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                state = guard;
            }
        };
        let Some(id) = next else { break };
        let render = lock_unpoisoned(&shared.state).renders.get(&id).map(|e| e.render.clone());
        let Some(render) = render else { continue };
        debug!(render = ?id, "dispatching render");
        let task_queue = queue.clone();
        let task_render = render.clone();
        let spawned = shared.pool.spawn("ravel-render", move || {
            let status =
                match catch_unwind(AssertUnwindSafe(|| run_render(&task_queue, &task_render))) {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(render = ?task_render.id(), "render worker panicked");
                        task_render.set_terminal(ActionStatus::Failed);
                        ActionStatus::Failed
                    }
                };
            task_queue.finish_render(task_render.id(), status);
        });
        if let Err(e) = spawned {
            warn!(render = ?id, error = %e, "failed to dispatch render");
            render.set_terminal(ActionStatus::Failed);
            queue.finish_render(id, ActionStatus::Failed);
        }
    }
    // Resolve anything never dispatched as Aborted so waiters unblock.
    let leftover: Vec<Arc<RenderTree>> = {
        let mut state = lock_unpoisoned(&shared.state);
        let ids: Vec<RenderTreeId> = state.pending.drain(..).collect();
        ids.iter().filter_map(|id| state.renders.get(id).map(|e| e.render.clone())).collect()
    };
    for render in leftover {
        render.set_terminal(ActionStatus::Aborted);
        queue.finish_render(render.id(), ActionStatus::Aborted);
    }
}

/// Build and drive the root execution pass of one top-level render on the
/// calling pool worker.
fn run_render(queue: &QueueManager, render: &Arc<RenderTree>) -> ActionStatus {
    if render.is_aborted() {
        render.set_terminal(ActionStatus::Aborted);
        return ActionStatus::Aborted;
    }
    let pass = Arc::new(ExecutionPass::new());
    let built = {
        let mut builder = RequestTreeBuilder::new(queue.cache(), render, &pass);
        builder.build_root()
    };
    let status = match built {
        Ok(root) => {
            render.set_root_request(root.id());
            let exec = PassExecution::new(queue.clone(), render.clone(), pass);
            drive_pass(&exec, root.id())
        }
        Err(RavelError::Aborted) => ActionStatus::Aborted,
        Err(e) => {
            warn!(render = ?render.id(), error = %e, "request graph construction failed");
            ActionStatus::Failed
        }
    };
    render.set_terminal(status);
    status
}

#[cfg(test)]
#[path = "../../tests/unit/sched/queue.rs"]
mod tests;
