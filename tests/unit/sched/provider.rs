use super::*;

#[path = "stubs.rs"]
mod stubs;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::foundation::core::{RectI, TimeValue, ViewIdx};
use crate::sched::queue::{QueueManager, QueueManagerConfig};

use stubs::SourceFx;

fn manager() -> QueueManager {
    QueueManager::new(QueueManagerConfig { pool_size: 2 })
}

#[test]
fn launch_and_wait_bookkeeping() {
    let queue = manager();
    let provider = QueueProvider::new(&queue);
    assert!(!provider.has_renders_launched());
    assert!(!provider.has_renders_finished());

    let src = SourceFx::new("p-src", RectI::new(0, 0, 4, 4));
    let render = provider.launch_render(RenderTreeArgs::new(src, TimeValue(1.0), ViewIdx(0)));
    assert!(provider.has_renders_launched());

    assert_eq!(provider.wait_for_render_finished(&render), ActionStatus::Ok);
    assert!(!provider.has_renders_launched());
    assert!(!provider.has_renders_finished());
    queue.shutdown();
}

#[test]
fn waiting_twice_returns_the_stored_status() {
    let queue = manager();
    let provider = QueueProvider::new(&queue);
    let src = SourceFx::new("p-twice", RectI::new(0, 0, 4, 4));
    let render = provider.launch_render(RenderTreeArgs::new(src, TimeValue(1.0), ViewIdx(0)));
    assert_eq!(provider.wait_for_render_finished(&render), ActionStatus::Ok);
    // Idempotent: the render was already drained.
    assert_eq!(provider.wait_for_render_finished(&render), ActionStatus::Ok);
    queue.shutdown();
}

#[test]
fn wait_for_any_returns_none_when_idle() {
    let queue = manager();
    let provider = QueueProvider::new(&queue);
    assert!(provider.wait_for_any_finished().is_none());
    queue.shutdown();
}

#[test]
fn wait_for_any_surfaces_a_finished_render() {
    let queue = manager();
    let provider = QueueProvider::new(&queue);
    let src = SourceFx::new("p-any", RectI::new(0, 0, 4, 4));
    let launched =
        provider.launch_render(RenderTreeArgs::new(src, TimeValue(2.0), ViewIdx(0)));

    let finished = provider.wait_for_any_finished().expect("one render in flight");
    assert_eq!(finished.id(), launched.id());
    assert_eq!(provider.wait_for_render_finished(&finished), ActionStatus::Ok);
    assert!(provider.wait_for_any_finished().is_none());
    queue.shutdown();
}

#[test]
fn wait_for_all_drains_every_launch() {
    let queue = manager();
    let provider = QueueProvider::new(&queue);
    for frame in 0..3 {
        let src = SourceFx::new(&format!("p-all-{frame}"), RectI::new(0, 0, 4, 4));
        provider.launch_render(RenderTreeArgs::new(src, TimeValue(f64::from(frame)), ViewIdx(0)));
    }
    provider.wait_for_all_renders();
    assert!(!provider.has_renders_launched());
    assert!(!provider.has_renders_finished());
    queue.shutdown();
}

struct DrainHooks {
    more: AtomicUsize,
    finished: AtomicUsize,
}

impl ProviderHooks for DrainHooks {
    fn request_more_renders(&self) {
        self.more.fetch_add(1, Ordering::SeqCst);
    }

    fn on_render_finished(&self, _render: &Arc<RenderTree>) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn draining_suppresses_the_read_ahead_hook() {
    let queue = manager();
    let hooks = Arc::new(DrainHooks { more: AtomicUsize::new(0), finished: AtomicUsize::new(0) });
    let provider = QueueProvider::with_hooks(&queue, Some(hooks.clone()), true);

    // The kernels outlast the launch loop, so every completion lands while
    // the provider drains.
    for frame in 0..3 {
        let src = SourceFx::slow(&format!("p-drain-{frame}"), RectI::new(0, 0, 4, 4), 100);
        provider.launch_render(RenderTreeArgs::new(src, TimeValue(f64::from(frame)), ViewIdx(0)));
    }
    provider.wait_for_all_renders();

    assert_eq!(hooks.finished.load(Ordering::SeqCst), 3);
    assert_eq!(hooks.more.load(Ordering::SeqCst), 0, "read-ahead fired while draining");
    assert!(!provider.has_renders_launched());
    queue.shutdown();
}
