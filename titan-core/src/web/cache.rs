// File: titan-core/src/web/cache.rs

use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};
use titan_common::traits::WebCache;

use crate::persistence::files::{read_json_value, write_json_atomic};
use crate::Error;

/// Key/value cache stored as one JSON object on disk.
///
/// Readers get the current map without waiting on writers; `set` swaps in
/// a new map.
pub struct FileWebCache {
    path: PathBuf,
    entries: RwLock<Arc<Map<String, Value>>>,
}

impl FileWebCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Arc::new(Map::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl WebCache for FileWebCache {
    async fn load(&self) -> Result<(), Error> {
        let map = match read_json_value(&self.path).await? {
            None => {
                info!("No web cache at {}; starting empty.", self.path.display());
                Map::new()
            }
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(Error::Parse(format!(
                    "web cache {} is not a JSON object", self.path.display()
                )));
            }
        };
        debug!("Web cache loaded with {} key(s).", map.len());
        *self.entries.write() = Arc::new(map);
        Ok(())
    }

    async fn save(&self) -> Result<(), Error> {
        let snapshot = Arc::clone(&*self.entries.read());
        write_json_atomic(&self.path, &*snapshot).await
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut guard = self.entries.write();
        let mut next = Map::clone(&guard);
        next.insert(key.to_string(), value);
        *guard = Arc::new(next);
    }
}
