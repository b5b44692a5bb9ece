use super::{RemoteStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    offline: bool,
    failing_writes: HashSet<String>,
}

/// In-process [`RemoteStore`]
///
/// Clones share the same objects. Failures can be injected to exercise the
/// checkpoint and recovery paths: [`MemoryStore::set_offline`] fails every
/// call, [`MemoryStore::fail_writes_to`] fails puts to one key.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an object without going through the failure checks
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.write().objects.insert(key.into(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.read().objects.get(key).cloned()
    }

    /// Object body as UTF-8 text, if present
    pub fn text(&self, key: &str) -> Option<String> {
        self.object(key)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// All keys in lexicographic order
    pub fn keys(&self) -> Vec<String> {
        self.read().objects.keys().cloned().collect()
    }

    pub fn set_offline(&self, offline: bool) {
        self.write().offline = offline;
    }

    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.write().failing_writes.insert(key.into());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.write();
        inner.offline = false;
        inner.failing_writes.clear();
    }

    fn check_online(inner: &Inner, operation: &'static str, key: &str) -> StoreResult<()> {
        if inner.offline {
            return Err(StoreError::unavailable(operation, key, "store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let inner = self.read();
        Self::check_online(&inner, "list", prefix)?;
        Ok(inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let inner = self.read();
        Self::check_online(&inner, "get", key)?;
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        let mut inner = self.write();
        Self::check_online(&inner, "put", key)?;
        if inner.failing_writes.contains(key) {
            return Err(StoreError::unavailable("put", key, "injected write failure"));
        }
        inner.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.write();
        Self::check_online(&inner, "delete", key)?;
        inner.objects.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let store = MemoryStore::new();
        store.put("a.txt", b"one".to_vec()).await.unwrap();
        store.put("a.txt", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("a.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryStore::new();
        store.insert("Davar/1957/a-METS.xml", "x");
        store.insert("Davar/1957/a.pdf", "x");
        store.insert("Davar2/b-METS.xml", "x");
        store.insert("Haaretz/c-METS.xml", "x");

        let keys = store.list("Davar/").await.unwrap();
        assert_eq!(keys, vec!["Davar/1957/a-METS.xml", "Davar/1957/a.pdf"]);
        assert_eq!(store.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_clones_share_objects() {
        let store = MemoryStore::new();
        let other = store.clone();
        other.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.text("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_writes_to("processed.manifest.txt");
        assert!(store.put("processed.manifest.txt", vec![]).await.is_err());
        assert!(store.put("other", vec![]).await.is_ok());

        store.set_offline(true);
        assert!(!store.get("other").await.unwrap_err().is_not_found());

        store.clear_failures();
        assert!(store.put("processed.manifest.txt", vec![]).await.is_ok());
        assert!(store.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemoryStore::new();
        store.delete("nothing").await.unwrap();
    }
}
