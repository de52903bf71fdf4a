use std::sync::Arc;

use crate::foundation::core::{
    Affine, ImagePlane, MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx,
};
use crate::foundation::error::RavelResult;
use crate::sched::drive::RenderContext;

/// One concrete upstream sample an effect needs: input index plus the
/// (time, view) at which that input must be rendered.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputSample {
    /// Index into [`Effect::inputs`].
    pub input: usize,
    /// Upstream time to sample.
    pub time: TimeValue,
    /// Upstream view to sample.
    pub view: ViewIdx,
}

/// Answer to the frames-needed query for one (time, view): the full set of
/// upstream samples the effect will consume while rendering.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FramesNeeded {
    /// Upstream samples, one entry per required input fetch.
    pub samples: Vec<InputSample>,
}

impl FramesNeeded {
    /// The common case: every connected input sampled at the same (time, view).
    pub fn all_inputs_at(num_inputs: usize, time: TimeValue, view: ViewIdx) -> Self {
        Self {
            samples: (0..num_inputs).map(|input| InputSample { input, time, view }).collect(),
        }
    }
}

/// Answer to the identity query: the effect is a no-op at this (time, view)
/// and its output is exactly one upstream sample.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IdentityTarget {
    /// Index of the forwarded input.
    pub input: usize,
    /// Time at which the input stands in for this effect.
    pub time: TimeValue,
    /// View at which the input stands in for this effect.
    pub view: ViewIdx,
}

/// Answer to the components query: which planes the effect produces and which
/// plane each input fetch should carry.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComponentsNeeded {
    /// Planes this effect can produce at the queried (time, view).
    pub produced: Vec<PlaneDesc>,
    /// Per-input plane requirements as (input index, plane) pairs. Inputs
    /// absent from the list default to the produced plane.
    pub needed: Vec<(usize, PlaneDesc)>,
}

impl ComponentsNeeded {
    /// RGBA in, RGBA out, for `num_inputs` connected inputs.
    pub fn rgba_through(num_inputs: usize) -> Self {
        Self {
            produced: vec![PlaneDesc::rgba()],
            needed: (0..num_inputs).map(|i| (i, PlaneDesc::rgba())).collect(),
        }
    }

    /// Plane one input fetch should carry, falling back to the first
    /// produced plane, then RGBA.
    pub fn plane_for_input(&self, input: usize) -> PlaneDesc {
        self.needed
            .iter()
            .find(|(i, _)| *i == input)
            .map(|(_, p)| p.clone())
            .unwrap_or_else(|| self.produced.first().cloned().unwrap_or_else(PlaneDesc::rgba))
    }
}

/// Answer to the distortion query.
///
/// A distortion may embed an externally-owned callable stage; results holding
/// one are memoized in process memory only and never reach persistent cache
/// storage.
#[derive(Clone, Default)]
pub struct Distortion2D {
    /// Affine part of the distortion, when expressible as one.
    pub transform: Option<Affine>,
    /// Opaque per-pixel warp stage, `(x, y) -> (x', y')` in canonical
    /// coordinates.
    pub stage: Option<Arc<dyn Fn(f64, f64) -> (f64, f64) + Send + Sync>>,
}

impl std::fmt::Debug for Distortion2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distortion2D")
            .field("transform", &self.transform)
            .field("has_stage", &self.stage.is_some())
            .finish()
    }
}

/// Arguments for one render call: what the effect must produce.
#[derive(Clone, Debug)]
pub struct RenderWindow {
    /// Time to render.
    pub time: TimeValue,
    /// View to render.
    pub view: ViewIdx,
    /// Plane to produce.
    pub plane: PlaneDesc,
    /// Region of interest to fill, already clipped to the region of
    /// definition.
    pub roi: RectI,
    /// Resolution tier.
    pub mip: MipLevel,
    /// Proxy scale.
    pub proxy_scale: RenderScale,
}

/// A node in the effect graph: the opaque seam between the scheduler and the
/// effect layer.
///
/// Implementations may block, are safe to invoke from any pool worker, and
/// may re-enter the scheduler through [`RenderContext::fetch_input`] while
/// rendering. The scheduler never inspects node parameters; all it consumes
/// is the dependency shape reported by the query operations below.
pub trait Effect: Send + Sync {
    /// Human-readable node label, used in logs only.
    fn label(&self) -> &str;

    /// Stable plugin identifier, part of every action cache key.
    fn plugin_id(&self) -> &str;

    /// Hash of the node/parameter/variant state relevant at one (time, view).
    /// Two calls with equal hashes must be interchangeable for caching.
    fn state_hash(&self, time: TimeValue, view: ViewIdx) -> u64;

    /// Connected upstream effects, by input index.
    fn inputs(&self) -> Vec<Arc<dyn Effect>>;

    /// Region of definition: the full pixel area this effect can produce.
    fn region_of_definition(
        &self,
        time: TimeValue,
        view: ViewIdx,
        proxy_scale: RenderScale,
        mip: MipLevel,
    ) -> RavelResult<RectI>;

    /// Upstream samples required to render at (time, view). The default
    /// samples every connected input at the same (time, view).
    fn frames_needed(&self, time: TimeValue, view: ViewIdx) -> RavelResult<FramesNeeded> {
        Ok(FramesNeeded::all_inputs_at(self.inputs().len(), time, view))
    }

    /// Identity query; `None` means the effect really renders.
    fn identity(
        &self,
        time: TimeValue,
        view: ViewIdx,
        mip: MipLevel,
        plane: &PlaneDesc,
    ) -> RavelResult<Option<IdentityTarget>> {
        let _ = (time, view, mip, plane);
        Ok(None)
    }

    /// Components query. The default is RGBA through every input.
    fn components_needed(
        &self,
        time: TimeValue,
        view: ViewIdx,
    ) -> RavelResult<ComponentsNeeded> {
        let _ = (time, view);
        Ok(ComponentsNeeded::rgba_through(self.inputs().len()))
    }

    /// Distortion query; `None` means the effect applies no distortion.
    fn distortion(
        &self,
        time: TimeValue,
        view: ViewIdx,
        proxy_scale: RenderScale,
        mip: MipLevel,
    ) -> RavelResult<Option<Distortion2D>> {
        let _ = (time, view, proxy_scale, mip);
        Ok(None)
    }

    /// Produce pixels for `args.roi`. Called at most once per request unless
    /// the bypass-cache flag forces a recompute. Long-running kernels must
    /// poll `ctx.is_cancelled()` at safe points and return
    /// [`crate::RavelError::Aborted`] when set.
    fn render(&self, ctx: &RenderContext, args: &RenderWindow) -> RavelResult<ImagePlane>;
}
