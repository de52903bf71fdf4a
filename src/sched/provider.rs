use std::sync::Arc;

use tracing::debug;

use crate::foundation::error::ActionStatus;
use crate::sched::queue::{ProviderId, QueueManager};
use crate::sched::render::{RenderTree, RenderTreeArgs};

/// Callbacks a render owner registers alongside its provider.
///
/// Both hooks are invoked by the scheduler with no manager locks held; they
/// may launch further renders or wait on finished ones.
pub trait ProviderHooks: Send + Sync {
    /// The scheduler has spare capacity for this playback provider; the
    /// owner may launch its next frame now to keep the pool saturated.
    fn request_more_renders(&self) {}

    /// One of this provider's renders reached a terminal status.
    fn on_render_finished(&self, render: &Arc<RenderTree>) {
        let _ = render;
    }
}

/// A caller-side handle scoping launched renders to one owner.
///
/// Every render launched through a provider is tracked under it until the
/// owner drains it with [`QueueProvider::wait_for_render_finished`]; the
/// provider unregisters itself on drop.
pub struct QueueProvider {
    queue: QueueManager,
    id: ProviderId,
}

impl QueueProvider {
    /// Register a hookless provider.
    pub fn new(queue: &QueueManager) -> Self {
        Self::with_hooks(queue, None, false)
    }

    /// Register a provider with hooks. `playback` marks it as a playback
    /// stream owner, enabling the read-ahead hook.
    pub fn with_hooks(
        queue: &QueueManager,
        hooks: Option<Arc<dyn ProviderHooks>>,
        playback: bool,
    ) -> Self {
        let id = queue.register_provider(hooks, playback);
        Self { queue: queue.clone(), id }
    }

    /// Scheduler-side identity of this provider.
    pub fn id(&self) -> ProviderId {
        self.id
    }

    /// Create and enqueue a top-level render, returning its handle
    /// immediately.
    pub fn launch_render(&self, args: RenderTreeArgs) -> Arc<RenderTree> {
        let render = RenderTree::new(args);
        self.queue.launch_render(render.clone(), Some(self.id));
        render
    }

    /// Block until `render` resolves and drain it from this provider.
    pub fn wait_for_render_finished(&self, render: &Arc<RenderTree>) -> ActionStatus {
        self.queue.wait_for_render_finished(render)
    }

    /// Block until any of this provider's renders resolves, or `None` once
    /// nothing is in flight.
    pub fn wait_for_any_finished(&self) -> Option<Arc<RenderTree>> {
        self.queue.wait_for_any_finished(self.id)
    }

    /// Whether this provider has renders launched and not yet drained.
    pub fn has_renders_launched(&self) -> bool {
        self.queue.has_renders_launched(self.id)
    }

    /// Whether this provider has finished renders awaiting their drain.
    pub fn has_renders_finished(&self) -> bool {
        self.queue.has_renders_finished(self.id)
    }

    /// Drain every render this provider has launched, in completion order.
    /// The read-ahead hook is suppressed for the duration so draining
    /// terminates even for playback providers.
    pub fn wait_for_all_renders(&self) {
        self.queue.set_draining(self.id, true);
        while let Some(render) = self.wait_for_any_finished() {
            let status = self.wait_for_render_finished(&render);
            debug!(render = ?render.id(), ?status, "drained");
        }
        self.queue.set_draining(self.id, false);
    }
}

impl Drop for QueueProvider {
    fn drop(&mut self) {
        self.queue.unregister_provider(self.id);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sched/provider.rs"]
mod tests;
