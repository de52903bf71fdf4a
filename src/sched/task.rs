use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::foundation::core::{
    ImagePlane, MipLevel, RenderScale, TimeValue, ViewIdx, lock_unpoisoned,
};
use crate::foundation::error::{ActionStatus, RavelError, RavelResult};
use crate::graph::effect::Effect;
use crate::sched::provider::QueueProvider;
use crate::sched::queue::QueueManager;
use crate::sched::render::{RenderTree, RenderTreeArgs};

/// Result of rendering one view of a frame task.
#[derive(Clone, Debug)]
pub struct FrameRenderOutcome {
    /// The view rendered.
    pub view: ViewIdx,
    /// Terminal status of that view's render.
    pub status: ActionStatus,
    /// Root image, when the render succeeded.
    pub image: Option<ImagePlane>,
}

/// A single-shot frame render spanning one or more views.
///
/// Launches one [`RenderTree`] per view through a private provider, then
/// waits for all of them. Launched renders are tracked so the whole task can
/// be aborted from another thread while it runs.
pub struct RenderTask {
    provider: QueueProvider,
    root: Arc<dyn Effect>,
    time: TimeValue,
    views: Vec<ViewIdx>,
    proxy_scale: RenderScale,
    mip_level: MipLevel,
    launched: Mutex<Vec<Arc<RenderTree>>>,
    ran: AtomicBool,
}

impl RenderTask {
    /// A full-resolution task rendering `root` at `time` for `views`.
    pub fn new(
        queue: &QueueManager,
        root: Arc<dyn Effect>,
        time: TimeValue,
        views: Vec<ViewIdx>,
    ) -> Self {
        Self {
            provider: QueueProvider::new(queue),
            root,
            time,
            views,
            proxy_scale: RenderScale::identity(),
            mip_level: MipLevel(0),
            launched: Mutex::new(Vec::new()),
            ran: AtomicBool::new(false),
        }
    }

    /// Render at a proxy scale.
    pub fn with_proxy_scale(mut self, scale: RenderScale) -> Self {
        self.proxy_scale = scale;
        self
    }

    /// Render at a coarser resolution tier.
    pub fn with_mip_level(mut self, mip: MipLevel) -> Self {
        self.mip_level = mip;
        self
    }

    /// Launch every view's render, wait for all of them and return the
    /// per-view outcomes in the order the views were given.
    ///
    /// A task runs at most once; a second call is an error.
    pub fn run(&self) -> RavelResult<Vec<FrameRenderOutcome>> {
        if self.ran.swap(true, Ordering::AcqRel) {
            return Err(RavelError::scheduler("render task already ran"));
        }
        let mut renders = Vec::with_capacity(self.views.len());
        for &view in &self.views {
            let mut args = RenderTreeArgs::new(self.root.clone(), self.time, view);
            args.proxy_scale = self.proxy_scale;
            args.mip_level = self.mip_level;
            let render = self.provider.launch_render(args);
            lock_unpoisoned(&self.launched).push(render.clone());
            renders.push((view, render));
        }
        let mut outcomes = Vec::with_capacity(renders.len());
        for (view, render) in renders {
            let status = self.provider.wait_for_render_finished(&render);
            let image = match status {
                ActionStatus::Ok => {
                    render.root_request().and_then(|root| root.lock().image())
                }
                _ => None,
            };
            debug!(render = ?render.id(), ?view, ?status, "frame view resolved");
            outcomes.push(FrameRenderOutcome { view, status, image });
        }
        Ok(outcomes)
    }

    /// Request cooperative cancellation of every render this task launched.
    /// Safe from any thread, including while [`RenderTask::run`] is blocked.
    pub fn abort_render(&self) {
        for render in lock_unpoisoned(&self.launched).iter() {
            render.abort();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sched/task.rs"]
mod tests;
