//! Ravel is the render-scheduling core of a node-based compositing engine.
//!
//! Ravel turns an effect tree (a DAG of [`Effect`] nodes) into rendered
//! image planes, deciding what to compute, in what order, on which worker,
//! and what can be reused from cache.
//!
//! # Pipeline overview
//!
//! 1. **Describe**: effects answer memoized query actions (region of
//!    definition, frames needed, identity, components) through the
//!    [`Effect`] trait.
//! 2. **Build**: a launched [`RenderTree`] is expanded into a graph of
//!    [`FrameViewRequest`]s, one per (effect, time, view, plane, scale),
//!    wired with per-pass dependency counts.
//! 3. **Drive**: an execution pass runs ready requests on the
//!    [`QueueManager`]'s bounded worker pool, unlocking listeners as their
//!    dependencies resolve; identical concurrent requests share one
//!    computation.
//! 4. **Resolve**: the root request's image and terminal status surface
//!    through [`QueueProvider`] waits or a one-shot [`RenderTask`].
//!
//! The key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **At most one computer per request**: concurrent demands for the same
//!   frame/view wait on the first; nothing renders twice within a render.
//! - **Reentrancy-safe admission**: workers that block on sub-renders hand
//!   their pool slot back, so even a pool of size one cannot deadlock.
//! - **Cooperative cancellation**: aborts are sticky flags polled at every
//!   suspension point, never thread kills.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cache;
mod foundation;
mod graph;
mod sched;

pub use cache::key::{ActionCacheKey, ActionKind};
pub use cache::store::{
    ActionResultCache, CachePolicy, CacheStorage, CachedAction, MemoryCacheStorage,
};
pub use foundation::core::{
    Affine, CancelToken, ImagePlane, MipLevel, PlaneDesc, RectI, RenderScale, TimeValue, ViewIdx,
};
pub use foundation::error::{ActionStatus, RavelError, RavelResult};
pub use graph::effect::{
    ComponentsNeeded, Distortion2D, Effect, FramesNeeded, IdentityTarget, InputSample,
    RenderWindow,
};
pub use sched::drive::{RenderContext, SubRenderFlags};
pub use sched::pass::{ExecutionPass, PassId};
pub use sched::pool::{SlotRelease, WorkerPool};
pub use sched::provider::{ProviderHooks, QueueProvider};
pub use sched::queue::{ProviderId, QueueManager, QueueManagerConfig};
pub use sched::render::{RenderTree, RenderTreeArgs, RenderTreeId};
pub use sched::request::{FrameViewRequest, RenderBackend, RequestGuard, RequestId, RequestStatus};
pub use sched::task::{FrameRenderOutcome, RenderTask};
