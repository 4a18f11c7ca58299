use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::frame::Frame;

/// The Store keeps the key-value pairs shared by every connection of a server. Entries never
/// expire; they live until overwritten or removed.
///
/// The store is cloned cheaply through reference counting. All access goes through `lock`, so a
/// command sees and mutates the map without other connections interleaving.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let inner = Arc::new(InnerStore {
            state: Mutex::new(State {
                keys: HashMap::new(),
            }),
        });

        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InnerStore {
    state: Mutex<State>,
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
}

impl<'a> InnerStoreLocked<'a> {
    pub fn set(&mut self, key: String, value: Frame) {
        self.state.keys.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Frame> {
        self.state.keys.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Frame> {
        self.state.keys.remove(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.state.keys.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.state.keys.len()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // A panic while holding the lock can't leave the map half written: every mutation is a
        // single `HashMap` call.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked { state }
    }
}

type Key = String;

struct State {
    keys: HashMap<Key, Frame>,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn set_overwrites() {
        let store = Store::new();

        {
            let mut store = store.lock();
            store.set("key1".to_string(), Frame::Bulk(Bytes::from("value1")));
            store.set("key1".to_string(), Frame::Bulk(Bytes::from("value2")));
        }

        assert_eq!(
            store.lock().get("key1"),
            Some(&Frame::Bulk(Bytes::from("value2")))
        );
        assert_eq!(store.lock().size(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = Store::new();
        store
            .lock()
            .set("key1".to_string(), Frame::Bulk(Bytes::from("value1")));

        assert!(store.lock().remove("key1").is_some());
        assert!(store.lock().remove("key1").is_none());
        assert!(!store.lock().exists("key1"));
        assert_eq!(store.lock().size(), 0);
    }

    #[test]
    fn clones_share_state() {
        let store = Store::new();
        let other = store.clone();

        other
            .lock()
            .set("shared".to_string(), Frame::Bulk(Bytes::from("yes")));

        assert!(store.lock().exists("shared"));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let store = Store::new();
        store
            .lock()
            .set("key".to_string(), Frame::Bulk(Bytes::from("value")));

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the store");
        })
        .join();

        assert!(store.lock().exists("key"));
    }
}
