use super::*;

use crate::foundation::core::ImagePlane;
use crate::foundation::error::{RavelError, RavelResult};
use crate::graph::effect::RenderWindow;
use crate::sched::drive::RenderContext;

struct KeyFx;

impl Effect for KeyFx {
    fn label(&self) -> &str {
        "key-fx"
    }

    fn plugin_id(&self) -> &str {
        "ravel.test.key"
    }

    fn state_hash(&self, time: TimeValue, view: ViewIdx) -> u64 {
        time.0.to_bits() ^ u64::from(view.0)
    }

    fn inputs(&self) -> Vec<std::sync::Arc<dyn Effect>> {
        Vec::new()
    }

    fn region_of_definition(
        &self,
        _time: TimeValue,
        _view: ViewIdx,
        _proxy_scale: RenderScale,
        _mip: MipLevel,
    ) -> RavelResult<RectI> {
        Ok(RectI::default())
    }

    fn render(&self, _ctx: &RenderContext, _args: &RenderWindow) -> RavelResult<ImagePlane> {
        Err(RavelError::effect("never rendered in key tests"))
    }
}

fn base(action: ActionKind) -> ActionCacheKey {
    ActionCacheKey::new(
        action,
        &KeyFx,
        TimeValue(3.0),
        ViewIdx(0),
        RenderScale::identity(),
        MipLevel(0),
    )
}

#[test]
fn new_pulls_identity_from_the_effect() {
    let key = base(ActionKind::RegionOfDefinition);
    assert_eq!(key.plugin_id, "ravel.test.key");
    assert_eq!(key.node_hash, KeyFx.state_hash(TimeValue(3.0), ViewIdx(0)));
    assert_eq!(key.time_bits, None);
    assert_eq!(key.plane, None);
}

#[test]
fn identical_keys_digest_identically() {
    assert_eq!(base(ActionKind::Identity), base(ActionKind::Identity));
    assert_eq!(base(ActionKind::Identity).digest(), base(ActionKind::Identity).digest());
}

#[test]
fn action_kind_separates_digests() {
    assert_ne!(
        base(ActionKind::RegionOfDefinition).digest(),
        base(ActionKind::FramesNeeded).digest()
    );
}

#[test]
fn rekeying_by_time_changes_the_key() {
    let plain = base(ActionKind::FramesNeeded);
    let keyed = base(ActionKind::FramesNeeded).at(TimeValue(3.0), ViewIdx(0));
    assert_ne!(plain, keyed);
    assert_ne!(plain.digest(), keyed.digest());
    let other_time = base(ActionKind::FramesNeeded).at(TimeValue(4.0), ViewIdx(0));
    assert_ne!(keyed.digest(), other_time.digest());
}

#[test]
fn plane_and_rect_participate_in_the_digest() {
    let rgba = base(ActionKind::RenderedPlane)
        .at(TimeValue(3.0), ViewIdx(0))
        .with_plane(&PlaneDesc::rgba())
        .with_rect(RectI::new(0, 0, 8, 8));
    let alpha = base(ActionKind::RenderedPlane)
        .at(TimeValue(3.0), ViewIdx(0))
        .with_plane(&PlaneDesc::alpha())
        .with_rect(RectI::new(0, 0, 8, 8));
    let other_rect = base(ActionKind::RenderedPlane)
        .at(TimeValue(3.0), ViewIdx(0))
        .with_plane(&PlaneDesc::rgba())
        .with_rect(RectI::new(0, 0, 4, 4));
    assert_ne!(rgba.digest(), alpha.digest());
    assert_ne!(rgba.digest(), other_rect.digest());
}

#[test]
fn mip_and_scale_separate_digests() {
    let full = base(ActionKind::RegionOfDefinition);
    let mut mip1 = base(ActionKind::RegionOfDefinition);
    mip1.mip = MipLevel(1);
    let mut half = base(ActionKind::RegionOfDefinition);
    half.proxy_scale_bits = (0.5f64.to_bits(), 0.5f64.to_bits());
    assert_ne!(full.digest(), mip1.digest());
    assert_ne!(full.digest(), half.digest());
}
