use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::cache::store::CachePolicy;
use crate::foundation::core::{
    CancelToken, ImagePlane, MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx,
};
use crate::foundation::error::ActionStatus;
use crate::graph::effect::{Distortion2D, Effect};
use crate::sched::pass::ExecutionPass;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one frame/view request, used as the opaque
/// handle in dependency sets and owning maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

/// Lifecycle of a [`FrameViewRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Nobody has claimed the unit yet.
    NotRendered,
    /// The unit forwards the output of its identity target.
    PassThrough,
    /// Another thread is computing; callers wait.
    Pending,
    /// Terminal status stored; the result is visible to all waiters.
    Rendered,
}

/// Compute backend chosen for one request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderBackend {
    /// CPU kernel.
    #[default]
    Cpu,
    /// GPU kernel.
    Gpu,
}

#[derive(Debug)]
struct RequestState {
    status: RequestStatus,
    retcode: Option<ActionStatus>,
    cache_policy: CachePolicy,
    backend: RenderBackend,
    rod: Option<RectI>,
    roi: RectI,
    image: Option<ImagePlane>,
    pass_through: Option<RequestId>,
    distortion: Option<Distortion2D>,
}

/// The schedulable unit: one (effect, plane, mip level, proxy scale) inside
/// one top-level render, at one (time, view).
///
/// Identity fields are immutable. Everything else lives behind the request
/// lock ([`FrameViewRequest::lock`] / [`FrameViewRequest::try_lock`]) once
/// the request is reachable from more than one thread; status transitions
/// happen only on the thread that becomes, or waits for, the computer.
pub struct FrameViewRequest {
    id: RequestId,
    effect: Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    plane: PlaneDesc,
    mip: MipLevel,
    proxy_scale: RenderScale,
    /// Consume-once: reading it clears it and forces exactly one recompute
    /// that skips the cache read.
    bypass_cache: AtomicBool,
    state: Mutex<RequestState>,
    done: Condvar,
}

impl std::fmt::Debug for FrameViewRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameViewRequest")
            .field("id", &self.id)
            .field("effect", &self.effect.label())
            .field("time", &self.time)
            .field("view", &self.view)
            .field("plane", &self.plane.name)
            .field("mip", &self.mip)
            .finish()
    }
}

impl FrameViewRequest {
    /// Fresh request in the NotRendered state.
    pub fn new(
        effect: Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        plane: PlaneDesc,
        mip: MipLevel,
        proxy_scale: RenderScale,
    ) -> Self {
        Self {
            id: RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)),
            effect,
            time,
            view,
            plane,
            mip,
            proxy_scale,
            bypass_cache: AtomicBool::new(false),
            state: Mutex::new(RequestState {
                status: RequestStatus::NotRendered,
                retcode: None,
                cache_policy: CachePolicy::default(),
                backend: RenderBackend::default(),
                rod: None,
                roi: RectI::default(),
                image: None,
                pass_through: None,
                distortion: None,
            }),
            done: Condvar::new(),
        }
    }

    /// Opaque handle for dependency sets and owning maps.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The effect instance this request renders.
    pub fn effect(&self) -> &Arc<dyn Effect> {
        &self.effect
    }

    /// Time of the request.
    pub fn time(&self) -> TimeValue {
        self.time
    }

    /// View of the request.
    pub fn view(&self) -> ViewIdx {
        self.view
    }

    /// Plane the request produces.
    pub fn plane(&self) -> &PlaneDesc {
        &self.plane
    }

    /// Resolution tier of the request.
    pub fn mip(&self) -> MipLevel {
        self.mip
    }

    /// Proxy scale of the request.
    pub fn proxy_scale(&self) -> RenderScale {
        self.proxy_scale
    }

    /// Blocking acquire of the request lock.
    pub fn lock(&self) -> RequestGuard<'_> {
        RequestGuard {
            state: self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        }
    }

    /// Non-blocking acquire of the request lock.
    pub fn try_lock(&self) -> Option<RequestGuard<'_>> {
        match self.state.try_lock() {
            Ok(state) => Some(RequestGuard { state }),
            Err(std::sync::TryLockError::Poisoned(p)) => {
                Some(RequestGuard { state: p.into_inner() })
            }
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Atomically decide, for this caller, how the unit will be produced.
    /// This is the sole exit from NotRendered:
    ///
    /// - returns `NotRendered`: the caller became the computer and must
    ///   render, then call [`FrameViewRequest::notify_render_finished`];
    /// - returns `PassThrough`: the unit forwards its identity target;
    /// - returns `Pending`: another thread is computing; the caller waits
    ///   via [`FrameViewRequest::wait_render_finished`];
    /// - returns `Rendered`: the terminal status is already stored.
    pub fn notify_render_started(&self) -> RequestStatus {
        let mut st = self.lock();
        match st.state.status {
            RequestStatus::NotRendered => {
                if st.state.pass_through.is_some() {
                    st.state.status = RequestStatus::PassThrough;
                    RequestStatus::PassThrough
                } else {
                    // The caller is now the computer; everyone else observes
                    // Pending until notify_render_finished.
                    st.state.status = RequestStatus::Pending;
                    RequestStatus::NotRendered
                }
            }
            RequestStatus::PassThrough => RequestStatus::PassThrough,
            RequestStatus::Pending => RequestStatus::Pending,
            RequestStatus::Rendered => RequestStatus::Rendered,
        }
    }

    /// Store the terminal status. Called exactly once, by the computer.
    pub fn notify_render_finished(&self, status: ActionStatus) {
        let mut st = self.lock();
        debug_assert!(
            st.state.status == RequestStatus::Pending
                || st.state.status == RequestStatus::PassThrough,
            "notify_render_finished without a computer"
        );
        st.state.status = RequestStatus::Rendered;
        st.state.retcode = Some(status);
        drop(st);
        debug!(request = ?self.id, ?status, "request finished");
        self.done.notify_all();
    }

    /// Resolve a pass-through unit with its target's outcome. Idempotent:
    /// concurrent adopters agree on the target's stored result.
    pub fn adopt_pass_through(&self, status: ActionStatus, image: Option<ImagePlane>) {
        let mut st = self.lock();
        if st.state.status == RequestStatus::Rendered {
            return;
        }
        st.state.status = RequestStatus::Rendered;
        st.state.retcode = Some(status);
        if st.state.image.is_none() {
            st.state.image = image;
        }
        drop(st);
        self.done.notify_all();
    }

    /// Block until the computer stores a terminal status, returning it.
    /// Polls `token` at safe points and unwinds to Aborted when cancelled.
    pub fn wait_render_finished(&self, token: &CancelToken) -> ActionStatus {
        let mut st = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if st.status == RequestStatus::Rendered {
                return st.retcode.unwrap_or(ActionStatus::Failed);
            }
            if token.is_cancelled() {
                return ActionStatus::Aborted;
            }
            let (guard, _timeout) = self
                .done
                .wait_timeout(st, Duration::from_millis(50))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            st = guard;
        }
    }

    /// Terminal status, if one is stored.
    pub fn terminal_status(&self) -> Option<ActionStatus> {
        self.lock().state.retcode
    }

    /// Current lifecycle status.
    pub fn status(&self) -> RequestStatus {
        self.lock().state.status
    }

    /// Arm the consume-once bypass-cache flag.
    pub fn set_bypass_cache(&self) {
        self.bypass_cache.store(true, Ordering::Release);
    }

    /// Read and clear the bypass-cache flag. At most one caller observes
    /// `true` per arming; that caller must skip the cache read once.
    pub fn take_bypass_cache(&self) -> bool {
        self.bypass_cache.swap(false, Ordering::AcqRel)
    }

    /// Union `roi` into the accumulated region of interest.
    pub fn accumulate_roi(&self, roi: RectI) {
        let mut st = self.lock();
        st.state.roi = st.state.roi.union(roi);
    }

    // Dependency operations, all parameterized by the owning execution pass.

    /// Declare that this request depends on `dep` within `pass`.
    pub fn add_dependency(&self, pass: &ExecutionPass, dep: &FrameViewRequest) {
        pass.add_dependency(self.id, dep.id());
    }

    /// Resolve `dep` and return the post-decrement dependency count for
    /// `pass`. This request becomes schedulable exactly when it reaches zero.
    pub fn mark_dependency_as_rendered(&self, pass: &ExecutionPass, dep: RequestId) -> usize {
        pass.mark_dependency_as_rendered(self.id, dep)
    }

    /// Unresolved dependency count within `pass`.
    pub fn num_dependencies(&self, pass: &ExecutionPass) -> usize {
        pass.num_dependencies(self.id)
    }

    /// Drop resolved dependencies within `pass`. Idempotent.
    pub fn clear_rendered_dependencies(&self, pass: &ExecutionPass) {
        pass.clear_rendered_dependencies(self.id)
    }

    /// Snapshot of this request's listeners within `pass`.
    pub fn listeners(&self, pass: &ExecutionPass) -> Vec<RequestId> {
        pass.listeners(self.id)
    }
}

/// Scoped guard over a request's mutable state, released on every exit path.
pub struct RequestGuard<'a> {
    state: MutexGuard<'a, RequestState>,
}

impl RequestGuard<'_> {
    /// Current lifecycle status.
    pub fn status(&self) -> RequestStatus {
        self.state.status
    }

    /// Stored terminal status, if any.
    pub fn terminal_status(&self) -> Option<ActionStatus> {
        self.state.retcode
    }

    /// Cache policy for this request.
    pub fn cache_policy(&self) -> CachePolicy {
        self.state.cache_policy
    }

    /// Set the cache policy.
    pub fn set_cache_policy(&mut self, policy: CachePolicy) {
        self.state.cache_policy = policy;
    }

    /// Chosen compute backend.
    pub fn backend(&self) -> RenderBackend {
        self.state.backend
    }

    /// Choose the compute backend.
    pub fn set_backend(&mut self, backend: RenderBackend) {
        self.state.backend = backend;
    }

    /// Cached region of definition, if resolved.
    pub fn rod(&self) -> Option<RectI> {
        self.state.rod
    }

    /// Store the resolved region of definition.
    pub fn set_rod(&mut self, rod: RectI) {
        self.state.rod = Some(rod);
    }

    /// Accumulated region of interest.
    pub fn roi(&self) -> RectI {
        self.state.roi
    }

    /// Union `roi` into the accumulated region of interest.
    pub fn accumulate_roi(&mut self, roi: RectI) {
        self.state.roi = self.state.roi.union(roi);
    }

    /// Produced image plane, if stored.
    pub fn image(&self) -> Option<ImagePlane> {
        self.state.image.clone()
    }

    /// Store the produced image plane.
    pub fn set_image(&mut self, image: ImagePlane) {
        self.state.image = Some(image);
    }

    /// Identity target this request forwards, if any.
    pub fn pass_through(&self) -> Option<RequestId> {
        self.state.pass_through
    }

    /// Mark this request as forwarding `target`'s output.
    pub fn set_pass_through(&mut self, target: RequestId) {
        self.state.pass_through = Some(target);
    }

    /// Distortion this request's effect applies, resolved while the request
    /// graph was built.
    pub fn distortion(&self) -> Option<Distortion2D> {
        self.state.distortion.clone()
    }

    /// Store the resolved distortion.
    pub fn set_distortion(&mut self, distortion: Distortion2D) {
        self.state.distortion = Some(distortion);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sched/request.rs"]
mod tests;
