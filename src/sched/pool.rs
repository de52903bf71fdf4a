use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::foundation::error::{RavelError, RavelResult};

thread_local! {
    static IN_POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug)]
struct PoolState {
    /// Admission limit: how many tasks may run concurrently.
    limit: usize,
    /// Currently admitted tasks. Signed: release_task around a long wait can
    /// briefly drive it below zero, exactly like temporarily raising the
    /// limit.
    active: isize,
}

#[derive(Debug)]
struct PoolInner {
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Bounded admission control for render workers.
///
/// Admission is decoupled from thread identity: each task runs on its own
/// thread but only `limit` tasks hold a slot at once. A worker that must
/// block on work that can only run on this same pool hands its slot back
/// (see [`WorkerPool::blocking_section`]) so the pool never idles while
/// runnable work is queued behind it. This is what makes a pool of size one
/// safe against recursive sub-renders.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Pool admitting at most `limit` concurrent tasks (minimum one).
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState { limit: limit.max(1), active: 0 }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Admission limit.
    pub fn limit(&self) -> usize {
        lock(&self.inner).limit
    }

    /// Currently admitted task count. May be negative while slots are
    /// explicitly released around a long wait.
    pub fn active(&self) -> isize {
        lock(&self.inner).active
    }

    /// True when at least one slot is free.
    pub fn has_idle_capacity(&self) -> bool {
        let st = lock(&self.inner);
        st.active < st.limit as isize
    }

    /// Whether the calling thread is a pool worker.
    pub fn current_thread_is_worker() -> bool {
        IN_POOL_WORKER.with(Cell::get)
    }

    /// Start `f` as a pool task on its own thread. The task blocks in
    /// admission until a slot frees, runs, then returns its slot.
    pub fn spawn(
        &self,
        name: &str,
        f: impl FnOnce() + Send + 'static,
    ) -> RavelResult<()> {
        let inner = self.inner.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                IN_POOL_WORKER.with(|c| c.set(true));
                acquire(&inner);
                trace!("pool task admitted");
                let _slot = HeldSlot { inner };
                f();
            })
            .map_err(|e| RavelError::scheduler(format!("failed to spawn pool task: {e}")))?;
        Ok(())
    }

    /// Hand the caller's slot back to the pool ahead of a known long wait.
    /// Must be paired with [`WorkerPool::reserve_task`].
    pub fn release_task(&self) {
        release(&self.inner);
    }

    /// Re-acquire a slot after [`WorkerPool::release_task`], blocking until
    /// one frees.
    pub fn reserve_task(&self) {
        acquire(&self.inner);
    }

    /// Scoped release/reserve around a suspension point: releases the
    /// caller's slot now and reserves one again on drop, on every exit path.
    /// A no-op when the calling thread is not a pool worker.
    pub fn blocking_section(&self) -> SlotRelease {
        let armed = Self::current_thread_is_worker();
        if armed {
            release(&self.inner);
        }
        SlotRelease { pool: self.clone(), armed }
    }
}

/// Slot held by a running pool task. Returned on drop, so a panicking task
/// cannot retire its slot with it.
struct HeldSlot {
    inner: Arc<PoolInner>,
}

impl Drop for HeldSlot {
    fn drop(&mut self) {
        release(&self.inner);
    }
}

/// Guard produced by [`WorkerPool::blocking_section`].
pub struct SlotRelease {
    pool: WorkerPool,
    armed: bool,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        if self.armed {
            acquire(&self.pool.inner);
        }
    }
}

fn lock(inner: &PoolInner) -> std::sync::MutexGuard<'_, PoolState> {
    inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn acquire(inner: &PoolInner) {
    let mut st = lock(inner);
    let mut waited = 0u32;
    while st.active >= st.limit as isize {
        let (guard, timeout) = inner
            .cond
            .wait_timeout(st, Duration::from_millis(100))
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        st = guard;
        if timeout.timed_out() {
            waited += 1;
            // Pool exhaustion despite the release/reserve protocol is a
            // logic error in the caller; surface it rather than dying mute.
            if waited == 600 {
                warn!("pool admission stalled for 60s; possible release/reserve misuse");
            }
        }
    }
    st.active += 1;
}

fn release(inner: &PoolInner) {
    let mut st = lock(inner);
    st.active -= 1;
    drop(st);
    inner.cond.notify_all();
}

#[cfg(test)]
#[path = "../../tests/unit/sched/pool.rs"]
mod tests;
