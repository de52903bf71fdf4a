use super::*;

#[path = "stubs.rs"]
mod stubs;

use crate::foundation::core::{MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx};
use crate::sched::request::FrameViewRequest;

fn rid(label: &str) -> RequestId {
    FrameViewRequest::new(
        stubs::SourceFx::new(label, RectI::new(0, 0, 4, 4)),
        TimeValue(1.0),
        ViewIdx(0),
        PlaneDesc::rgba(),
        MipLevel(0),
        RenderScale::identity(),
    )
    .id()
}

#[test]
fn registered_requests_start_ready() {
    let pass = ExecutionPass::new();
    let a = rid("reg-a");
    pass.register(a);
    assert_eq!(pass.num_dependencies(a), 0);
    assert_eq!(pass.ready_requests(), vec![a]);
}

#[test]
fn add_dependency_wires_both_directions() {
    let pass = ExecutionPass::new();
    let (parent, dep) = (rid("sym-p"), rid("sym-d"));
    pass.add_dependency(parent, dep);
    assert_eq!(pass.dependencies(parent), vec![dep]);
    assert_eq!(pass.listeners(dep), vec![parent]);
    assert_eq!(pass.num_dependencies(parent), 1);
    assert_eq!(pass.num_dependencies(dep), 0);
}

#[test]
fn marking_returns_the_post_decrement_count() {
    let pass = ExecutionPass::new();
    let (parent, d1, d2) = (rid("cnt-p"), rid("cnt-1"), rid("cnt-2"));
    pass.add_dependency(parent, d1);
    pass.add_dependency(parent, d2);
    assert_eq!(pass.mark_dependency_as_rendered(parent, d1), 1);
    assert_eq!(pass.mark_dependency_as_rendered(parent, d2), 0);
    assert!(pass.ready_requests().contains(&parent));
}

#[test]
fn marking_an_unknown_dependency_never_underflows() {
    let pass = ExecutionPass::new();
    let (parent, dep, stranger) = (rid("uf-p"), rid("uf-d"), rid("uf-s"));
    pass.add_dependency(parent, dep);
    assert_eq!(pass.mark_dependency_as_rendered(parent, stranger), 1);
    // Re-marking an already-resolved dependency is also count-neutral.
    assert_eq!(pass.mark_dependency_as_rendered(parent, dep), 0);
    assert_eq!(pass.mark_dependency_as_rendered(parent, dep), 0);
}

#[test]
fn all_dependencies_keeps_resolved_entries_until_cleared() {
    let pass = ExecutionPass::new();
    let (parent, d1, d2) = (rid("all-p"), rid("all-1"), rid("all-2"));
    pass.add_dependency(parent, d1);
    pass.add_dependency(parent, d2);
    pass.mark_dependency_as_rendered(parent, d1);

    let mut expected = vec![d1, d2];
    expected.sort();
    assert_eq!(pass.all_dependencies(parent), expected);
    assert_eq!(pass.dependencies(parent), vec![d2]);

    pass.clear_rendered_dependencies(parent);
    assert_eq!(pass.all_dependencies(parent), vec![d2]);
    // Idempotent.
    pass.clear_rendered_dependencies(parent);
    assert_eq!(pass.all_dependencies(parent), vec![d2]);
}

#[test]
fn ready_requests_excludes_blocked_ones() {
    let pass = ExecutionPass::new();
    let (parent, dep) = (rid("rdy-p"), rid("rdy-d"));
    pass.register(parent);
    pass.register(dep);
    pass.add_dependency(parent, dep);
    assert_eq!(pass.ready_requests(), vec![dep]);
    assert_eq!(pass.request_ids().len(), 2);
}
