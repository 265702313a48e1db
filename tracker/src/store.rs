use std::{
    collections::HashMap,
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Mutex,
};

use tokio::fs;

use crate::models::GeoPoint;

pub const LAST_KNOWN_FIX_KEY: &str = "lastDriverLocation";

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access location store: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt location store: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("location store lock poisoned")]
    Poisoned,
}

/// Small key-value store for positions that must survive restarts.
pub trait LocationStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<GeoPoint>>;
    fn set<'a>(&'a self, key: &'a str, point: GeoPoint) -> StoreFuture<'a, ()>;
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, GeoPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, GeoPoint>) -> T,
    ) -> Result<T, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut entries))
    }
}

impl LocationStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<GeoPoint>> {
        let result = self.with_entries(|entries| entries.get(key).copied());
        Box::pin(async move { result })
    }

    fn set<'a>(&'a self, key: &'a str, point: GeoPoint) -> StoreFuture<'a, ()> {
        let result = self.with_entries(|entries| {
            entries.insert(key.to_string(), point);
        });
        Box::pin(async move { result })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        let result = self.with_entries(|entries| {
            entries.remove(key);
        });
        Box::pin(async move { result })
    }
}

/// JSON file holding a `key -> GeoPoint` map. The whole file is rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    guard: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<HashMap<String, GeoPoint>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_entries(&self, entries: &HashMap<String, GeoPoint>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(entries)?;
        // atomic replace
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl LocationStore for JsonFileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<GeoPoint>> {
        Box::pin(async move {
            let _lock = self.guard.lock().await;
            Ok(self.read_entries().await?.get(key).copied())
        })
    }

    fn set<'a>(&'a self, key: &'a str, point: GeoPoint) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _lock = self.guard.lock().await;
            let mut entries = self.read_entries().await?;
            entries.insert(key.to_string(), point);
            self.write_entries(&entries).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _lock = self.guard.lock().await;
            let mut entries = self.read_entries().await?;
            if entries.remove(key).is_some() {
                self.write_entries(&entries).await?;
            }
            Ok(())
        })
    }
}
