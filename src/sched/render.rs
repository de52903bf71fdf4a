use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::foundation::core::{
    CancelToken, MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx, lock_unpoisoned,
};
use crate::foundation::error::ActionStatus;
use crate::graph::effect::Effect;
use crate::sched::request::{FrameViewRequest, RequestId, RequestStatus};

static NEXT_RENDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one top-level render, used as the scheduler map key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderTreeId(u64);

/// Arguments to create a top-level render.
#[derive(Clone)]
pub struct RenderTreeArgs {
    /// Root effect of the tree to render.
    pub root: Arc<dyn Effect>,
    /// Time to render.
    pub time: TimeValue,
    /// View to render.
    pub view: ViewIdx,
    /// Proxy scale for the whole render.
    pub proxy_scale: RenderScale,
    /// Resolution tier for the whole render.
    pub mip_level: MipLevel,
    /// Optional plane override; defaults to the root's first produced plane.
    pub plane: Option<PlaneDesc>,
    /// Optional region override; defaults to the root's region of definition.
    pub roi: Option<RectI>,
    /// Whether this render belongs to a playback stream (enables the
    /// read-ahead hook on its provider).
    pub is_playback: bool,
}

impl RenderTreeArgs {
    /// Minimal arguments: full-resolution render of `root` at (time, view).
    pub fn new(root: Arc<dyn Effect>, time: TimeValue, view: ViewIdx) -> Self {
        Self {
            root,
            time,
            view,
            proxy_scale: RenderScale::identity(),
            mip_level: MipLevel(0),
            plane: None,
            roi: None,
            is_playback: false,
        }
    }
}

/// Key of one request slot inside a render: which (effect, time, view, plane,
/// mip, scale) the request produces.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SlotKey {
    effect: usize,
    time_bits: u64,
    view: ViewIdx,
    plane: String,
    mip: MipLevel,
    scale_bits: (u64, u64),
}

#[derive(Default)]
struct RenderTreeState {
    by_slot: HashMap<SlotKey, RequestId>,
    by_id: HashMap<RequestId, Arc<FrameViewRequest>>,
    root_request: Option<RequestId>,
    terminal: Option<ActionStatus>,
}

/// One top-level render: a root effect at one (time, view, scale), plus the
/// owning maps for every frame/view request created while rendering it.
///
/// Requests are created lazily the first time an effect is asked to produce a
/// given (plane, scale) and live as long as the render; dependency sets hold
/// opaque [`RequestId`] handles resolved through these maps, never direct
/// back-references.
pub struct RenderTree {
    id: RenderTreeId,
    args: RenderTreeArgs,
    token: CancelToken,
    state: Mutex<RenderTreeState>,
}

impl std::fmt::Debug for RenderTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTree")
            .field("id", &self.id)
            .field("root", &self.args.root.label())
            .field("time", &self.args.time)
            .field("view", &self.args.view)
            .field("playback", &self.args.is_playback)
            .finish()
    }
}

impl RenderTree {
    /// Create a top-level render. It does nothing until launched on a
    /// [`crate::QueueManager`].
    pub fn new(args: RenderTreeArgs) -> Arc<Self> {
        Arc::new(Self {
            id: RenderTreeId(NEXT_RENDER_ID.fetch_add(1, Ordering::Relaxed)),
            args,
            token: CancelToken::new(),
            state: Mutex::new(RenderTreeState::default()),
        })
    }

    /// Scheduler map key for this render.
    pub fn id(&self) -> RenderTreeId {
        self.id
    }

    /// Root effect of the tree.
    pub fn root_effect(&self) -> &Arc<dyn Effect> {
        &self.args.root
    }

    /// Time being rendered.
    pub fn time(&self) -> TimeValue {
        self.args.time
    }

    /// View being rendered.
    pub fn view(&self) -> ViewIdx {
        self.args.view
    }

    /// Proxy scale of the render.
    pub fn proxy_scale(&self) -> RenderScale {
        self.args.proxy_scale
    }

    /// Resolution tier of the render.
    pub fn mip_level(&self) -> MipLevel {
        self.args.mip_level
    }

    /// Plane override, if any.
    pub fn plane_override(&self) -> Option<&PlaneDesc> {
        self.args.plane.as_ref()
    }

    /// Region override, if any.
    pub fn roi_override(&self) -> Option<RectI> {
        self.args.roi
    }

    /// Whether this render belongs to a playback stream.
    pub fn is_playback(&self) -> bool {
        self.args.is_playback
    }

    /// Cancellation token threaded through every long-running call made on
    /// behalf of this render.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Request cooperative cancellation. Sticky; safe from any thread.
    pub fn abort(&self) {
        trace!(render = ?self.id, "abort requested");
        self.token.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fetch or lazily create the request for `effect` producing `plane` at
    /// (time, view, mip, scale). Returns the request and whether it was
    /// created by this call.
    ///
    /// With `create_new_if_unrendered` set, an existing request that already
    /// holds a terminal status is replaced by a fresh one, forcing a
    /// recompute; re-entrant callers otherwise reuse the existing request.
    pub fn get_or_create_request(
        &self,
        effect: &Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        plane: PlaneDesc,
        mip: MipLevel,
        proxy_scale: RenderScale,
        create_new_if_unrendered: bool,
    ) -> (Arc<FrameViewRequest>, bool) {
        let key = SlotKey {
            effect: effect_key(effect),
            time_bits: time.key_bits(),
            view,
            plane: plane.name.clone(),
            mip,
            scale_bits: proxy_scale.key_bits(),
        };
        let mut state = lock_unpoisoned(&self.state);
        if let Some(&id) = state.by_slot.get(&key) {
            if let Some(existing) = state.by_id.get(&id).cloned() {
                let replace = create_new_if_unrendered
                    && existing.status() == RequestStatus::Rendered;
                if !replace {
                    return (existing, false);
                }
            }
        }
        let request = Arc::new(FrameViewRequest::new(
            effect.clone(),
            time,
            view,
            plane,
            mip,
            proxy_scale,
        ));
        state.by_slot.insert(key, request.id());
        state.by_id.insert(request.id(), request.clone());
        trace!(render = ?self.id, request = ?request.id(), effect = effect.label(), "request created");
        (request, true)
    }

    /// Resolve an opaque request handle through the owning map.
    pub fn request(&self, id: RequestId) -> Option<Arc<FrameViewRequest>> {
        lock_unpoisoned(&self.state).by_id.get(&id).cloned()
    }

    /// Record the root request of the render.
    pub(crate) fn set_root_request(&self, id: RequestId) {
        lock_unpoisoned(&self.state).root_request = Some(id);
    }

    /// The root request, once the request graph has been built.
    pub fn root_request(&self) -> Option<Arc<FrameViewRequest>> {
        let state = lock_unpoisoned(&self.state);
        state.root_request.and_then(|id| state.by_id.get(&id).cloned())
    }

    /// Store the render's terminal status.
    pub(crate) fn set_terminal(&self, status: ActionStatus) {
        lock_unpoisoned(&self.state).terminal = Some(status);
    }

    /// Terminal status of the whole render, once resolved.
    pub fn terminal(&self) -> Option<ActionStatus> {
        lock_unpoisoned(&self.state).terminal
    }

    /// Number of requests owned by this render.
    pub fn num_requests(&self) -> usize {
        lock_unpoisoned(&self.state).by_id.len()
    }
}

/// Stable per-instance key for an effect within one render. The render holds
/// a strong reference to every effect through its requests, so the address
/// stays valid for the render's lifetime.
fn effect_key(effect: &Arc<dyn Effect>) -> usize {
    Arc::as_ptr(effect) as *const () as usize
}
