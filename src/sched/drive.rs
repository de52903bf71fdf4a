use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cache::key::{ActionCacheKey, ActionKind};
use crate::cache::store::{CachePolicy, CachedAction};
use crate::foundation::core::{
    ImagePlane, PlaneDesc, RectI, TimeValue, ViewIdx, lock_unpoisoned,
};
use crate::foundation::error::{ActionStatus, RavelError, RavelResult};
use crate::graph::effect::{Effect, RenderWindow};
use crate::sched::pass::ExecutionPass;
use crate::sched::queue::QueueManager;
use crate::sched::render::RenderTree;
use crate::sched::request::{FrameViewRequest, RequestId, RequestStatus};

/// Per-call context handed to [`Effect::render`].
///
/// Carries the cancellation token and the re-entry point back into the
/// scheduler for effects that must fetch an input image mid-render.
pub struct RenderContext {
    pub(crate) queue: QueueManager,
    pub(crate) render: Arc<RenderTree>,
    pub(crate) effect: Arc<dyn Effect>,
}

impl RenderContext {
    /// The render this call belongs to.
    pub fn render(&self) -> &Arc<RenderTree> {
        &self.render
    }

    /// Poll cancellation at a safe point.
    pub fn is_cancelled(&self) -> bool {
        self.render.is_aborted()
    }

    /// Fetch an upstream input image, re-entering the scheduler.
    ///
    /// This launches a sub-render for the input inside the owning render and
    /// blocks until it resolves; the caller's pool slot is handed back to the
    /// scheduler whenever the sub-render must wait, so other ready work runs
    /// instead of idling.
    pub fn fetch_input(
        &self,
        input: usize,
        time: TimeValue,
        view: ViewIdx,
        plane: Option<PlaneDesc>,
        roi: Option<RectI>,
    ) -> RavelResult<ImagePlane> {
        let inputs = self.effect.inputs();
        let input_effect = inputs.get(input).ok_or_else(|| {
            RavelError::validation(format!(
                "input {input} out of range on '{}'",
                self.effect.label()
            ))
        })?;
        let (status, image) = self.queue.launch_sub_render(
            input_effect,
            time,
            view,
            plane,
            roi,
            &self.render,
            SubRenderFlags::default(),
        )?;
        match status {
            ActionStatus::Ok => image.ok_or_else(|| {
                RavelError::scheduler("sub-render finished without an image plane")
            }),
            ActionStatus::Aborted => Err(RavelError::Aborted),
            ActionStatus::Failed => Err(RavelError::effect(format!(
                "input '{}' failed to render",
                input_effect.label()
            ))),
        }
    }
}

/// Behavior flags for a sub-render launch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubRenderFlags {
    /// Arm the consume-once bypass-cache flag on the sub-root request,
    /// forcing exactly one recompute that skips the cache read.
    pub bypass_cache: bool,
    /// Replace an already-rendered request with a fresh one instead of
    /// reusing its stored result.
    pub create_new_if_unrendered: bool,
}

struct Progress {
    /// Requests not yet terminal in this pass.
    remaining: usize,
    /// Requests currently claimed by a worker.
    in_flight: usize,
    /// Schedulable requests.
    ready: VecDeque<RequestId>,
}

enum Step {
    Run(RequestId),
    Wait,
    Done,
}

/// Execution state for one pass of one render, shared between the driving
/// worker and any helpers it farms work out to.
pub(crate) struct PassExecution {
    pub(crate) queue: QueueManager,
    pub(crate) render: Arc<RenderTree>,
    pub(crate) pass: Arc<ExecutionPass>,
    progress: Mutex<Progress>,
    cond: Condvar,
    helpers: AtomicUsize,
}

impl PassExecution {
    pub(crate) fn new(
        queue: QueueManager,
        render: Arc<RenderTree>,
        pass: Arc<ExecutionPass>,
    ) -> Arc<Self> {
        let roster = pass.request_ids();
        let ready: VecDeque<RequestId> = pass.ready_requests().into();
        Arc::new(Self {
            queue,
            render,
            pass,
            progress: Mutex::new(Progress { remaining: roster.len(), in_flight: 0, ready }),
            cond: Condvar::new(),
            helpers: AtomicUsize::new(0),
        })
    }
}

/// Drive one execution pass to completion on the calling pool worker,
/// farming independent ready requests out to additional workers when the
/// pool has capacity. Returns the terminal status of `root`.
#[tracing::instrument(skip(exec, root), fields(render = ?exec.render.id(), pass = ?exec.pass.id()))]
pub(crate) fn drive_pass(exec: &Arc<PassExecution>, root: RequestId) -> ActionStatus {
    loop {
        let step = {
            let mut progress = lock_unpoisoned(&exec.progress);
            if let Some(id) = progress.ready.pop_front() {
                progress.in_flight += 1;
                Step::Run(id)
            } else if progress.remaining == 0 {
                Step::Done
            } else if progress.in_flight == 0 {
                // Nothing ready, nothing running, work remaining: the
                // declared dependency set was not a DAG. Fail the pass
                // rather than deadlocking silently.
                warn!("pass stalled with unresolved dependencies; failing remaining requests");
                fail_stalled_requests(exec, &mut progress);
                Step::Done
            } else {
                Step::Wait
            }
        };
        match step {
            Step::Run(id) => {
                maybe_spawn_helper(exec);
                process_request(exec, id);
            }
            Step::Wait => wait_for_progress(exec),
            Step::Done => break,
        }
    }

    exec.render
        .request(root)
        .and_then(|r| r.terminal_status())
        .unwrap_or(ActionStatus::Failed)
}

/// Park until a helper resolves something, with the caller's pool slot
/// handed back for the duration. The slot is re-acquired only after the
/// progress lock is dropped, so a helper can never be wedged behind us.
fn wait_for_progress(exec: &Arc<PassExecution>) {
    let released = exec.queue.pool().blocking_section();
    {
        let mut progress = lock_unpoisoned(&exec.progress);
        while progress.ready.is_empty() && progress.remaining > 0 && progress.in_flight > 0 {
            let (guard, _timeout) = exec
                .cond
                .wait_timeout(progress, Duration::from_millis(50))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            progress = guard;
            // Checked only after parking: an aborted driver with kernels
            // still in flight must wait out the timeout instead of spinning
            // through its pool slot.
            if exec.render.is_aborted() {
                break;
            }
        }
    }
    drop(released);
}

/// Worker body for a farmed helper: drain ready requests until none remain.
fn helper_loop(exec: &Arc<PassExecution>) {
    loop {
        let next = {
            let mut progress = lock_unpoisoned(&exec.progress);
            let next = progress.ready.pop_front();
            if next.is_some() {
                progress.in_flight += 1;
            }
            next
        };
        let Some(id) = next else { break };
        maybe_spawn_helper(exec);
        process_request(exec, id);
    }
    exec.helpers.fetch_sub(1, Ordering::AcqRel);
}

fn maybe_spawn_helper(exec: &Arc<PassExecution>) {
    let pool = exec.queue.pool().clone();
    if lock_unpoisoned(&exec.progress).ready.is_empty() {
        return;
    }
    if exec.helpers.load(Ordering::Acquire) >= pool.limit() || !pool.has_idle_capacity() {
        return;
    }
    exec.helpers.fetch_add(1, Ordering::AcqRel);
    let exec2 = exec.clone();
    if pool.spawn("ravel-worker", move || helper_loop(&exec2)).is_err() {
        exec.helpers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Compute one request and propagate its completion to its listeners,
/// scheduling any that become ready.
fn process_request(exec: &Arc<PassExecution>, id: RequestId) {
    let status = match exec.render.request(id) {
        Some(request) => {
            match catch_unwind(AssertUnwindSafe(|| compute_request(exec, &request))) {
                Ok(status) => status,
                Err(_) => {
                    // An unwinding kernel must still resolve its request,
                    // or waiters hang and the pass accounting never settles.
                    warn!(request = ?id, "render kernel panicked");
                    if request.terminal_status().is_none() {
                        request.notify_render_finished(ActionStatus::Failed);
                    }
                    ActionStatus::Failed
                }
            }
        }
        None => {
            warn!(request = ?id, "request vanished from its owning render");
            ActionStatus::Failed
        }
    };
    trace!(request = ?id, ?status, "request resolved");

    let mut newly_ready: Vec<RequestId> = Vec::new();
    for listener in exec.pass.listeners(id) {
        if exec.pass.mark_dependency_as_rendered(listener, id) == 0 {
            newly_ready.push(listener);
        }
    }

    let mut progress = lock_unpoisoned(&exec.progress);
    progress.in_flight -= 1;
    progress.remaining = progress.remaining.saturating_sub(1);
    progress.ready.extend(newly_ready);
    drop(progress);
    exec.cond.notify_all();
}

fn fail_stalled_requests(exec: &Arc<PassExecution>, progress: &mut Progress) {
    for id in exec.pass.request_ids() {
        let Some(request) = exec.render.request(id) else { continue };
        if request.status() == RequestStatus::Rendered {
            continue;
        }
        match request.notify_render_started() {
            RequestStatus::NotRendered => request.notify_render_finished(ActionStatus::Failed),
            // Pass-through units need a stored terminal status too, or a
            // cross-pass waiter could only escape via its cancel token.
            RequestStatus::PassThrough => request.adopt_pass_through(ActionStatus::Failed, None),
            RequestStatus::Pending | RequestStatus::Rendered => {}
        }
    }
    progress.remaining = 0;
}

/// Resolve one request on the calling worker: become the computer, adopt a
/// pass-through target, or wait for the thread that is already computing.
pub(crate) fn compute_request(
    exec: &Arc<PassExecution>,
    request: &Arc<FrameViewRequest>,
) -> ActionStatus {
    match request.notify_render_started() {
        RequestStatus::Rendered => request.terminal_status().unwrap_or(ActionStatus::Failed),
        RequestStatus::Pending => {
            // Another thread is the computer; wait with our slot released.
            let _released = exec.queue.pool().blocking_section();
            request.wait_render_finished(exec.render.token())
        }
        RequestStatus::PassThrough => adopt_pass_through(exec, request),
        RequestStatus::NotRendered => render_as_computer(exec, request),
    }
}

fn adopt_pass_through(
    exec: &Arc<PassExecution>,
    request: &Arc<FrameViewRequest>,
) -> ActionStatus {
    let target = request
        .lock()
        .pass_through()
        .and_then(|id| exec.render.request(id));
    let Some(target) = target else {
        request.adopt_pass_through(ActionStatus::Failed, None);
        return ActionStatus::Failed;
    };
    // The target is a dependency of this request, so it normally holds a
    // terminal status already; a concurrent pass may still be computing it.
    let status = match target.terminal_status() {
        Some(status) => status,
        None => {
            let _released = exec.queue.pool().blocking_section();
            target.wait_render_finished(exec.render.token())
        }
    };
    let image = target.lock().image();
    request.adopt_pass_through(status, image);
    status
}

/// The calling worker is the computer for `request`: consult the memoized
/// render results, invoke the effect kernel on a miss, publish, and store
/// the terminal status for every waiter.
fn render_as_computer(
    exec: &Arc<PassExecution>,
    request: &Arc<FrameViewRequest>,
) -> ActionStatus {
    if exec.render.is_aborted() {
        request.notify_render_finished(ActionStatus::Aborted);
        return ActionStatus::Aborted;
    }

    // A failed or aborted dependency short-circuits this unit; independent
    // siblings elsewhere in the render are untouched.
    for dep_id in exec.pass.all_dependencies(request.id()) {
        let failed = exec
            .render
            .request(dep_id)
            .and_then(|dep| dep.terminal_status())
            .filter(|s| s.is_failed());
        if let Some(status) = failed {
            debug!(request = ?request.id(), dep = ?dep_id, ?status, "dependency short-circuit");
            request.notify_render_finished(status);
            return status;
        }
    }

    let (roi, policy) = {
        let guard = request.lock();
        let rod = guard.rod().unwrap_or_default();
        let roi = guard.roi();
        (if roi.is_empty() { rod } else { roi }, guard.cache_policy())
    };

    let key = render_plane_key(request, roi);
    let bypass = request.take_bypass_cache();
    if !bypass && policy == CachePolicy::ReadWrite {
        if let Some(CachedAction::RenderedPlane(image)) = exec.queue.cache().lookup(&key) {
            trace!(request = ?request.id(), "rendered plane cache hit");
            request.lock().set_image(image);
            request.notify_render_finished(ActionStatus::Ok);
            return ActionStatus::Ok;
        }
    }

    let ctx = RenderContext {
        queue: exec.queue.clone(),
        render: exec.render.clone(),
        effect: request.effect().clone(),
    };
    let args = RenderWindow {
        time: request.time(),
        view: request.view(),
        plane: request.plane().clone(),
        roi,
        mip: request.mip(),
        proxy_scale: request.proxy_scale(),
    };
    let status = match request.effect().render(&ctx, &args) {
        Ok(image) => {
            if exec.render.is_aborted() {
                ActionStatus::Aborted
            } else {
                if policy != CachePolicy::Skip {
                    exec.queue.cache().insert(key, CachedAction::RenderedPlane(image.clone()));
                }
                request.lock().set_image(image);
                ActionStatus::Ok
            }
        }
        Err(RavelError::Aborted) => ActionStatus::Aborted,
        Err(e) => {
            debug!(request = ?request.id(), error = %e, "effect render failed");
            ActionStatus::Failed
        }
    };
    request.notify_render_finished(status);
    status
}

fn render_plane_key(request: &FrameViewRequest, roi: RectI) -> ActionCacheKey {
    ActionCacheKey::new(
        ActionKind::RenderedPlane,
        request.effect().as_ref(),
        request.time(),
        request.view(),
        request.proxy_scale(),
        request.mip(),
    )
    .at(request.time(), request.view())
    .with_plane(request.plane())
    .with_rect(roi)
}
