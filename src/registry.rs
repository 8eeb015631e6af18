//! Process-wide directory of named pools.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

use crate::pool::ConnectionPool;

static GLOBAL: Lazy<PoolRegistry> = Lazy::new(PoolRegistry::new);

/// Maps pool names to pools.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<String, ConnectionPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static PoolRegistry {
        &GLOBAL
    }

    /// Publish `pool` under `name`, returning the pool it replaced.
    pub fn register(&self, name: &str, pool: ConnectionPool) -> Option<ConnectionPool> {
        let replaced = self.pools.lock().insert(name.to_string(), pool);
        if replaced.is_some() {
            warn!(name, "replacing registered connection pool");
        }
        replaced
    }

    pub fn lookup(&self, name: &str) -> Option<ConnectionPool> {
        self.pools.lock().get(name).cloned()
    }

    /// Unpublish `name` if it still refers to `pool`.
    pub fn remove(&self, name: &str, pool: &ConnectionPool) -> bool {
        let mut pools = self.pools.lock();
        if pools.get(name) == Some(pool) {
            pools.remove(name);
            true
        } else {
            false
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }
}
