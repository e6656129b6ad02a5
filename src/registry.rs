use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{RankError, Result};
use crate::model::Collection;
use crate::selection::SelectionPolicy;

type Handle = Arc<RwLock<Engine>>;

fn poisoned(key: &str) -> RankError {
    RankError::InvariantViolation(format!("engine for '{key}' poisoned"))
}

/// One engine per collection key. A mutation holds the engine's write lock for
/// the whole operation. An engine that reports an invariant violation is
/// dropped and reloaded from storage on next use.
pub struct Registry {
    engines: Mutex<HashMap<String, Handle>>,
    policy: SelectionPolicy,
}

impl Registry {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            policy,
        }
    }

    fn handle(&self, key: &str, load: impl FnOnce() -> Result<Collection>) -> Result<Handle> {
        let mut engines = self
            .engines
            .lock()
            .map_err(|_| RankError::InvariantViolation("engine registry poisoned".into()))?;
        if let Some(handle) = engines.get(key) {
            return Ok(handle.clone());
        }
        let engine = Engine::new(load()?, self.policy)?;
        debug!(key, items = engine.collection().items.len(), "loaded collection");
        let handle = Arc::new(RwLock::new(engine));
        engines.insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    /// Run `f` with shared access to the engine for `key`, loading it with
    /// `load` if it is not open yet.
    pub fn read<T>(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<Collection>,
        f: impl FnOnce(&Engine) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(key, load)?;
        let result = {
            let engine = handle.read().map_err(|_| poisoned(key))?;
            f(&*engine)
        };
        self.evict_on_fatal(key, result)
    }

    /// Run `f` with exclusive access to the engine for `key`.
    pub fn write<T>(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<Collection>,
        f: impl FnOnce(&mut Engine) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(key, load)?;
        let result = {
            let mut engine = handle.write().map_err(|_| poisoned(key))?;
            f(&mut *engine)
        };
        self.evict_on_fatal(key, result)
    }

    fn evict_on_fatal<T>(&self, key: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(key, error = %e, "dropping engine after invariant violation");
                self.evict(key)?;
            }
        }
        result
    }

    /// Forget the engine for `key`. Returns whether one was open.
    pub fn evict(&self, key: &str) -> Result<bool> {
        let mut engines = self
            .engines
            .lock()
            .map_err(|_| RankError::InvariantViolation("engine registry poisoned".into()))?;
        Ok(engines.remove(key).is_some())
    }

    #[cfg(test)]
    fn is_open(&self, key: &str) -> bool {
        self.engines
            .lock()
            .map(|engines| engines.contains_key(key))
            .unwrap_or(false)
    }
}
