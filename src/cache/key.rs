use crate::foundation::core::{MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx};
use crate::foundation::math::Fnv1a64;
use crate::graph::effect::Effect;

/// Which query action a cache entry answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ActionKind {
    /// Region-of-definition query.
    RegionOfDefinition,
    /// Frames-needed query.
    FramesNeeded,
    /// Identity query.
    Identity,
    /// Components query.
    Components,
    /// Distortion query. Never persisted.
    Distortion,
    /// A rendered image plane. Never persisted.
    RenderedPlane,
}

impl ActionKind {
    fn seed(self) -> u64 {
        match self {
            ActionKind::RegionOfDefinition => 1,
            ActionKind::FramesNeeded => 2,
            ActionKind::Identity => 3,
            ActionKind::Components => 4,
            ActionKind::Distortion => 5,
            ActionKind::RenderedPlane => 6,
        }
    }
}

/// Composite key identifying one memoized action answer.
///
/// The base key is the node/time/view/variant state hash, the render scale
/// and the plugin id. Identity, frames-needed and rendered-plane entries are
/// additionally keyed by their concrete time/plane arguments, and rendered
/// planes by the produced region.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionCacheKey {
    /// Action this key belongs to.
    pub action: ActionKind,
    /// Hash of node/parameter/variant state at the queried (time, view).
    pub node_hash: u64,
    /// Plugin identifier of the node.
    pub plugin_id: String,
    /// Proxy scale, as stable bit patterns.
    pub proxy_scale_bits: (u64, u64),
    /// Resolution tier.
    pub mip: MipLevel,
    /// Concrete time argument, for actions re-keyed per time.
    pub time_bits: Option<u64>,
    /// Concrete view argument, for actions re-keyed per view.
    pub view: Option<ViewIdx>,
    /// Plane name, for per-plane actions.
    pub plane: Option<String>,
    /// Produced region, for rendered planes.
    pub rect: Option<RectI>,
}

impl ActionCacheKey {
    /// Base key for `action` on `effect` at one (time, view, scale, mip).
    pub fn new(
        action: ActionKind,
        effect: &dyn Effect,
        time: TimeValue,
        view: ViewIdx,
        proxy_scale: RenderScale,
        mip: MipLevel,
    ) -> Self {
        Self {
            action,
            node_hash: effect.state_hash(time, view),
            plugin_id: effect.plugin_id().to_string(),
            proxy_scale_bits: proxy_scale.key_bits(),
            mip,
            time_bits: None,
            view: None,
            plane: None,
            rect: None,
        }
    }

    /// Re-key by the concrete (time, view) arguments.
    pub fn at(mut self, time: TimeValue, view: ViewIdx) -> Self {
        self.time_bits = Some(time.key_bits());
        self.view = Some(view);
        self
    }

    /// Re-key by a plane.
    pub fn with_plane(mut self, plane: &PlaneDesc) -> Self {
        self.plane = Some(plane.name.clone());
        self
    }

    /// Re-key by a produced region.
    pub fn with_rect(mut self, rect: RectI) -> Self {
        self.rect = Some(rect);
        self
    }

    /// Stable 64-bit digest used as the persistent-storage key.
    pub fn digest(&self) -> u64 {
        let mut h = Fnv1a64::new(Fnv1a64::OFFSET_BASIS ^ self.action.seed());
        h.write_u64(self.node_hash);
        h.write_str(&self.plugin_id);
        h.write_u64(self.proxy_scale_bits.0);
        h.write_u64(self.proxy_scale_bits.1);
        h.write_u32(self.mip.0);
        h.write_u64(self.time_bits.unwrap_or(0));
        h.write_u32(self.view.map(|v| v.0).unwrap_or(u32::MAX));
        if let Some(plane) = &self.plane {
            h.write_str(plane);
        }
        if let Some(r) = self.rect {
            h.write_i32(r.x1);
            h.write_i32(r.y1);
            h.write_i32(r.x2);
            h.write_i32(r.y2);
        }
        h.finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/key.rs"]
mod tests;
