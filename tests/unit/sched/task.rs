use super::*;

#[path = "stubs.rs"]
mod stubs;

use std::time::Duration;

use crate::foundation::core::RectI;

use stubs::{BlurFx, SourceFx};

fn manager(pool_size: usize) -> QueueManager {
    QueueManager::new(crate::sched::queue::QueueManagerConfig { pool_size })
}

#[test]
fn renders_every_view_in_order() {
    let queue = manager(2);
    let src = SourceFx::new("t-src", RectI::new(0, 0, 8, 8));
    let blur = BlurFx::new("t-blur", src.clone(), 1);
    let task = RenderTask::new(
        &queue,
        blur.clone(),
        TimeValue(1.0),
        vec![ViewIdx(0), ViewIdx(1)],
    );

    let outcomes = task.run().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].view, ViewIdx(0));
    assert_eq!(outcomes[1].view, ViewIdx(1));
    for outcome in &outcomes {
        assert_eq!(outcome.status, ActionStatus::Ok);
        assert!(outcome.image.is_some());
    }
    // Views are cached independently; each ran the kernels once.
    assert_eq!(src.render_count(), 2);
    assert_eq!(blur.render_count(), 2);
    queue.shutdown();
}

#[test]
fn a_task_runs_at_most_once() {
    let queue = manager(1);
    let src = SourceFx::new("t-once", RectI::new(0, 0, 4, 4));
    let task = RenderTask::new(&queue, src, TimeValue(1.0), vec![ViewIdx(0)]);
    task.run().unwrap();
    assert!(task.run().is_err());
    queue.shutdown();
}

#[test]
fn abort_cancels_all_view_renders() {
    let queue = manager(2);
    let src = SourceFx::slow("t-abort", RectI::new(0, 0, 4, 4), 2_000);
    let task = Arc::new(RenderTask::new(
        &queue,
        src.clone(),
        TimeValue(1.0),
        vec![ViewIdx(0), ViewIdx(1)],
    ));

    let runner = {
        let task = task.clone();
        std::thread::spawn(move || task.run().unwrap())
    };
    std::thread::sleep(Duration::from_millis(100));
    task.abort_render();

    let outcomes = runner.join().unwrap();
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert_eq!(outcome.status, ActionStatus::Aborted);
        assert!(outcome.image.is_none());
    }
    assert_eq!(src.render_count(), 0);
    queue.shutdown();
}
