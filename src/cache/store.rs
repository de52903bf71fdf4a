use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::key::{ActionCacheKey, ActionKind};
use crate::foundation::core::{ImagePlane, RectI, lock_unpoisoned};
use crate::foundation::error::{RavelError, RavelResult};
use crate::graph::effect::{ComponentsNeeded, Distortion2D, FramesNeeded, IdentityTarget};

/// How one request interacts with the shared caches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Consult the cache before computing and publish the result after.
    #[default]
    ReadWrite,
    /// Never consult the cache, but publish the result after computing.
    WriteOnly,
    /// Do not touch the cache at all.
    Skip,
}

/// One immutable memoized action answer.
#[derive(Clone, Debug)]
pub enum CachedAction {
    /// Region-of-definition answer.
    RegionOfDefinition(RectI),
    /// Frames-needed answer.
    FramesNeeded(FramesNeeded),
    /// Identity answer.
    Identity(Option<IdentityTarget>),
    /// Components answer.
    Components(ComponentsNeeded),
    /// Distortion answer. Excluded from persistent storage: it may embed
    /// externally-owned transient data.
    Distortion(Option<Distortion2D>),
    /// A rendered plane. Excluded from persistent storage.
    RenderedPlane(ImagePlane),
}

impl CachedAction {
    /// Whether this entry kind may round-trip through [`CacheStorage`].
    pub fn is_persistent(&self) -> bool {
        !matches!(self, CachedAction::Distortion(_) | CachedAction::RenderedPlane(_))
    }

    fn to_persist_bytes(&self) -> Option<Vec<u8>> {
        let res = match self {
            CachedAction::RegionOfDefinition(v) => serde_json::to_vec(v),
            CachedAction::FramesNeeded(v) => serde_json::to_vec(v),
            CachedAction::Identity(v) => serde_json::to_vec(v),
            CachedAction::Components(v) => serde_json::to_vec(v),
            CachedAction::Distortion(_) | CachedAction::RenderedPlane(_) => return None,
        };
        res.ok()
    }

    fn from_persist_bytes(kind: ActionKind, bytes: &[u8]) -> Option<CachedAction> {
        match kind {
            ActionKind::RegionOfDefinition => {
                serde_json::from_slice(bytes).ok().map(CachedAction::RegionOfDefinition)
            }
            ActionKind::FramesNeeded => {
                serde_json::from_slice(bytes).ok().map(CachedAction::FramesNeeded)
            }
            ActionKind::Identity => serde_json::from_slice(bytes).ok().map(CachedAction::Identity),
            ActionKind::Components => {
                serde_json::from_slice(bytes).ok().map(CachedAction::Components)
            }
            ActionKind::Distortion | ActionKind::RenderedPlane => None,
        }
    }
}

/// Abstract key/value persistence behind the action cache. Implementations
/// must be safe to call from any pool worker.
pub trait CacheStorage: Send + Sync {
    /// Fetch previously written bytes for `key`, if any.
    fn read(&self, key: u64) -> Option<Vec<u8>>;
    /// Store bytes under `key`, replacing any previous value.
    fn write(&self, key: u64, bytes: Vec<u8>);
}

/// In-memory [`CacheStorage`], mainly for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    map: Mutex<HashMap<u64, Vec<u8>>>,
}

impl MemoryCacheStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.map).len()
    }

    /// True when nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn read(&self, key: u64) -> Option<Vec<u8>> {
        lock_unpoisoned(&self.map).get(&key).cloned()
    }

    fn write(&self, key: u64, bytes: Vec<u8>) {
        lock_unpoisoned(&self.map).insert(key, bytes);
    }
}

enum Slot {
    /// One computer owns the key; everyone else waits.
    Computing,
    /// Published, immutable answer.
    Ready(CachedAction),
}

/// Keyed, single-writer/many-reader memoized answers to per-node query
/// operations.
///
/// At most one computation per key is ever in flight: the first caller of
/// [`ActionResultCache::get_or_compute`] becomes the computer, holds the key
/// exclusively until it publishes, and every concurrent caller observes the
/// identical published answer.
pub struct ActionResultCache {
    state: Mutex<HashMap<ActionCacheKey, Slot>>,
    cond: Condvar,
    storage: Option<Arc<dyn CacheStorage>>,
}

impl Default for ActionResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionResultCache {
    /// Cache with no persistent backing.
    pub fn new() -> Self {
        Self { state: Mutex::new(HashMap::new()), cond: Condvar::new(), storage: None }
    }

    /// Cache backed by an abstract key/value storage. Only persistent entry
    /// kinds round-trip through it.
    pub fn with_storage(storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
            storage: Some(storage),
        }
    }

    /// Memoized lookup: returns the published answer for `key`, computing it
    /// with `compute` if absent. Concurrent callers for the same key trigger
    /// exactly one computation. A failed computation vacates the key and the
    /// error propagates to the caller that computed; waiters retry.
    pub fn get_or_compute(
        &self,
        key: &ActionCacheKey,
        compute: impl FnOnce() -> RavelResult<CachedAction>,
    ) -> RavelResult<CachedAction> {
        {
            let mut state = lock_unpoisoned(&self.state);
            loop {
                match state.get(key) {
                    Some(Slot::Ready(v)) => return Ok(v.clone()),
                    Some(Slot::Computing) => {
                        let (guard, _timeout) = self
                            .cond
                            .wait_timeout(state, Duration::from_millis(50))
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        state = guard;
                    }
                    None => {
                        if let Some(v) = self.read_storage(key) {
                            state.insert(key.clone(), Slot::Ready(v.clone()));
                            return Ok(v);
                        }
                        state.insert(key.clone(), Slot::Computing);
                        break;
                    }
                }
            }
        }

        let result = compute();
        let mut state = lock_unpoisoned(&self.state);
        match result {
            Ok(v) => {
                debug!(action = ?key.action, "action result published");
                state.insert(key.clone(), Slot::Ready(v.clone()));
                drop(state);
                self.write_storage(key, &v);
                self.cond.notify_all();
                Ok(v)
            }
            Err(e) => {
                warn!(action = ?key.action, error = %e, "action computation failed");
                state.remove(key);
                drop(state);
                self.cond.notify_all();
                Err(e)
            }
        }
    }

    /// Non-blocking peek: the published answer, or `None` when absent or
    /// still being computed.
    pub fn lookup(&self, key: &ActionCacheKey) -> Option<CachedAction> {
        match lock_unpoisoned(&self.state).get(key) {
            Some(Slot::Ready(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Publish an answer directly, replacing any previous value. Used for
    /// results produced outside [`ActionResultCache::get_or_compute`], e.g.
    /// rendered planes under a write-only policy or after a forced bypass
    /// recompute.
    pub fn insert(&self, key: ActionCacheKey, action: CachedAction) {
        self.write_storage(&key, &action);
        lock_unpoisoned(&self.state).insert(key, Slot::Ready(action));
        self.cond.notify_all();
    }

    fn read_storage(&self, key: &ActionCacheKey) -> Option<CachedAction> {
        let storage = self.storage.as_ref()?;
        let bytes = storage.read(key.digest())?;
        CachedAction::from_persist_bytes(key.action, &bytes)
    }

    fn write_storage(&self, key: &ActionCacheKey, action: &CachedAction) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if let Some(bytes) = action.to_persist_bytes() {
            storage.write(key.digest(), bytes);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/store.rs"]
mod tests;
