//! Keyed async locks for per-document and per-session write serialization.
//!
//! Writers to the same key (filename, session id) must be mutually exclusive
//! while unrelated keys proceed concurrently. The registry hands out one
//! `Arc<Mutex<()>>` per key; entries are never removed, which is fine for the
//! bounded key population here (filenames, session ids).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for `key`, creating it on first use.
    pub async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_returns_same_lock() {
        let locks = KeyedLocks::new();
        let a = locks.lock_for("doc.pdf").await;
        let b = locks.lock_for("doc.pdf").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_keys_are_independent() {
        let locks = KeyedLocks::new();
        let a = locks.lock_for("a.pdf").await;
        let b = locks.lock_for("b.pdf").await;
        let _guard_a = a.lock().await;
        // Must not deadlock: b is a distinct lock.
        let _guard_b = b.lock().await;
    }
}
