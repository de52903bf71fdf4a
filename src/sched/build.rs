use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::cache::key::{ActionCacheKey, ActionKind};
use crate::cache::store::{ActionResultCache, CachedAction};
use crate::foundation::core::{MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx};
use crate::foundation::error::{RavelError, RavelResult};
use crate::graph::effect::{
    ComponentsNeeded, Distortion2D, Effect, FramesNeeded, IdentityTarget,
};
use crate::sched::pass::ExecutionPass;
use crate::sched::render::RenderTree;
use crate::sched::request::{FrameViewRequest, RequestStatus};

/// Memoized region-of-definition query.
pub(crate) fn cached_rod(
    cache: &ActionResultCache,
    effect: &Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    scale: RenderScale,
    mip: MipLevel,
) -> RavelResult<RectI> {
    let key = ActionCacheKey::new(ActionKind::RegionOfDefinition, effect.as_ref(), time, view, scale, mip);
    let cached = cache.get_or_compute(&key, || {
        effect.region_of_definition(time, view, scale, mip).map(CachedAction::RegionOfDefinition)
    })?;
    match cached {
        CachedAction::RegionOfDefinition(rod) => Ok(rod),
        _ => Err(RavelError::scheduler("mismatched cache entry for region of definition")),
    }
}

/// Memoized frames-needed query, re-keyed by the concrete (time, view).
pub(crate) fn cached_frames_needed(
    cache: &ActionResultCache,
    effect: &Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    scale: RenderScale,
    mip: MipLevel,
) -> RavelResult<FramesNeeded> {
    let key = ActionCacheKey::new(ActionKind::FramesNeeded, effect.as_ref(), time, view, scale, mip)
        .at(time, view);
    let cached = cache
        .get_or_compute(&key, || effect.frames_needed(time, view).map(CachedAction::FramesNeeded))?;
    match cached {
        CachedAction::FramesNeeded(frames) => Ok(frames),
        _ => Err(RavelError::scheduler("mismatched cache entry for frames needed")),
    }
}

/// Memoized identity query, re-keyed by the concrete (time, plane).
pub(crate) fn cached_identity(
    cache: &ActionResultCache,
    effect: &Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    scale: RenderScale,
    mip: MipLevel,
    plane: &PlaneDesc,
) -> RavelResult<Option<IdentityTarget>> {
    let key = ActionCacheKey::new(ActionKind::Identity, effect.as_ref(), time, view, scale, mip)
        .at(time, view)
        .with_plane(plane);
    let cached = cache
        .get_or_compute(&key, || effect.identity(time, view, mip, plane).map(CachedAction::Identity))?;
    match cached {
        CachedAction::Identity(identity) => Ok(identity),
        _ => Err(RavelError::scheduler("mismatched cache entry for identity")),
    }
}

/// Memoized distortion query. Answers stay in process memory only; the
/// store never persists them.
pub(crate) fn cached_distortion(
    cache: &ActionResultCache,
    effect: &Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    scale: RenderScale,
    mip: MipLevel,
) -> RavelResult<Option<Distortion2D>> {
    let key = ActionCacheKey::new(ActionKind::Distortion, effect.as_ref(), time, view, scale, mip)
        .at(time, view);
    let cached = cache.get_or_compute(&key, || {
        effect.distortion(time, view, scale, mip).map(CachedAction::Distortion)
    })?;
    match cached {
        CachedAction::Distortion(distortion) => Ok(distortion),
        _ => Err(RavelError::scheduler("mismatched cache entry for distortion")),
    }
}

/// Memoized components query.
pub(crate) fn cached_components(
    cache: &ActionResultCache,
    effect: &Arc<dyn Effect>,
    time: TimeValue,
    view: ViewIdx,
    scale: RenderScale,
    mip: MipLevel,
) -> RavelResult<ComponentsNeeded> {
    let key = ActionCacheKey::new(ActionKind::Components, effect.as_ref(), time, view, scale, mip);
    let cached = cache
        .get_or_compute(&key, || effect.components_needed(time, view).map(CachedAction::Components))?;
    match cached {
        CachedAction::Components(comps) => Ok(comps),
        _ => Err(RavelError::scheduler("mismatched cache entry for components")),
    }
}

/// Builds the per-pass request dependency graph for one render by walking
/// the effect tree through the memoized query actions.
pub(crate) struct RequestTreeBuilder<'a> {
    cache: &'a ActionResultCache,
    render: &'a Arc<RenderTree>,
    pass: &'a ExecutionPass,
    /// Requests already wired in this pass; stops diamond re-recursion.
    visited: HashSet<crate::sched::request::RequestId>,
}

impl<'a> RequestTreeBuilder<'a> {
    pub(crate) fn new(
        cache: &'a ActionResultCache,
        render: &'a Arc<RenderTree>,
        pass: &'a ExecutionPass,
    ) -> Self {
        Self { cache, render, pass, visited: HashSet::new() }
    }

    /// Build the graph for the render's root effect, honoring its plane and
    /// region overrides.
    pub(crate) fn build_root(&mut self) -> RavelResult<Arc<FrameViewRequest>> {
        let render = self.render.clone();
        let root = render.root_effect().clone();
        let plane = match render.plane_override() {
            Some(p) => p.clone(),
            None => {
                let comps = cached_components(
                    self.cache,
                    &root,
                    render.time(),
                    render.view(),
                    render.proxy_scale(),
                    render.mip_level(),
                )?;
                comps.produced.first().cloned().unwrap_or_else(PlaneDesc::rgba)
            }
        };
        self.build(&root, render.time(), render.view(), plane, render.roi_override(), false)
    }

    /// Build (or re-wire) the request for `effect` producing `plane` at
    /// (time, view), recursing into its declared upstream samples.
    ///
    /// No cycle detection is performed beyond rejecting direct
    /// self-dependencies; callers must supply a DAG.
    pub(crate) fn build(
        &mut self,
        effect: &Arc<dyn Effect>,
        time: TimeValue,
        view: ViewIdx,
        plane: PlaneDesc,
        roi: Option<RectI>,
        create_new_if_unrendered: bool,
    ) -> RavelResult<Arc<FrameViewRequest>> {
        let render = self.render;
        let scale = render.proxy_scale();
        let mip = render.mip_level();

        let (request, created) = render.get_or_create_request(
            effect,
            time,
            view,
            plane.clone(),
            mip,
            scale,
            create_new_if_unrendered,
        );
        self.pass.register(request.id());

        let rod = cached_rod(self.cache, effect, time, view, scale, mip)?;
        let distortion = cached_distortion(self.cache, effect, time, view, scale, mip)?;
        {
            let mut guard = request.lock();
            guard.set_rod(rod);
            if let Some(distortion) = distortion {
                guard.set_distortion(distortion);
            }
            let wanted = roi.map(|r| r.intersect(rod)).unwrap_or(rod);
            guard.accumulate_roi(wanted);
        }

        if !created && !self.visited.insert(request.id()) {
            // Diamond: already wired in this pass.
            return Ok(request);
        }
        if created {
            self.visited.insert(request.id());
        }
        if request.status() == RequestStatus::Rendered {
            // Reused across re-entrant launches; nothing upstream to do.
            return Ok(request);
        }

        if let Some(identity) =
            cached_identity(self.cache, effect, time, view, scale, mip, &plane)?
        {
            let inputs = effect.inputs();
            let target = inputs.get(identity.input).ok_or_else(|| {
                RavelError::validation(format!(
                    "identity target input {} out of range on '{}'",
                    identity.input,
                    effect.label()
                ))
            })?;
            let child =
                self.build(target, identity.time, identity.view, plane.clone(), roi, false)?;
            request.add_dependency(self.pass, &child);
            request.lock().set_pass_through(child.id());
            trace!(request = ?request.id(), target = ?child.id(), "identity pass-through");
            return Ok(request);
        }

        let comps = cached_components(self.cache, effect, time, view, scale, mip)?;
        let frames = cached_frames_needed(self.cache, effect, time, view, scale, mip)?;
        let inputs = effect.inputs();
        for sample in &frames.samples {
            let Some(input_effect) = inputs.get(sample.input) else {
                return Err(RavelError::validation(format!(
                    "frames-needed input {} out of range on '{}'",
                    sample.input,
                    effect.label()
                )));
            };
            let child_plane = comps.plane_for_input(sample.input);
            let child =
                self.build(input_effect, sample.time, sample.view, child_plane, None, false)?;
            if child.id() == request.id() {
                return Err(RavelError::validation(format!(
                    "effect '{}' declared a dependency on itself",
                    effect.label()
                )));
            }
            request.add_dependency(self.pass, &child);
        }
        Ok(request)
    }
}
