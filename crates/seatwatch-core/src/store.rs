//! Persistence port for the registries.
//!
//! The default implementation keeps the original storage semantics: one
//! flat JSON list per registry, rewritten in full on every mutation. The
//! trait exists so a real transactional store can be swapped in later
//! without touching registry logic.

use std::{fs, marker::PhantomData, path::PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::Result;

pub trait RecordStore<T>: Send + Sync {
    fn load(&self) -> Result<Vec<T>>;
    fn save_all(&self, records: &[T]) -> Result<()>;
}

/// Full-rewrite JSON file store.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> RecordStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn load(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        // A corrupt file resets the registry instead of wedging startup.
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    fn save_all(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-memory store used by registry tests.
#[cfg(test)]
pub struct MemoryStore<T> {
    records: std::sync::Mutex<Vec<T>>,
}

#[cfg(test)]
impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl<T: Clone + Send + Sync> RecordStore<T> for MemoryStore<T> {
    fn load(&self) -> Result<Vec<T>> {
        Ok(self.records.lock().unwrap().clone())
    }

    fn save_all(&self, records: &[T]) -> Result<()> {
        *self.records.lock().unwrap() = records.to_vec();
        Ok(())
    }
}
