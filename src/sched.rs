//! Render scheduling: request graphs, execution passes, the worker pool and
//! the queue manager that drives them.

pub(crate) mod build;
pub mod drive;
pub mod pass;
pub mod pool;
pub mod provider;
pub mod queue;
pub mod render;
pub mod request;
pub mod task;
