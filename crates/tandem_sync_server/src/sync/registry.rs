use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

/// Identifier of one open connection.
pub type ConnectionId = Uuid;

#[derive(Default)]
struct Watches {
    by_document: HashMap<String, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

/// Which connections watch which documents.
///
/// Used only to target broadcasts; whether a client may watch a document is
/// decided before [`SubscriptionRegistry::watch`] is called. The registry has
/// its own lock and never touches document state.
#[derive(Default)]
pub struct SubscriptionRegistry {
    watches: RwLock<Watches>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch. Returns false if it already existed.
    pub fn watch(&self, connection: ConnectionId, document_id: &str) -> bool {
        let mut watches = self.watches.write().unwrap();
        watches
            .by_connection
            .entry(connection)
            .or_default()
            .insert(document_id.to_string());
        watches
            .by_document
            .entry(document_id.to_string())
            .or_default()
            .insert(connection)
    }

    /// Remove a watch. Returns false if there was none.
    pub fn unwatch(&self, connection: ConnectionId, document_id: &str) -> bool {
        let mut watches = self.watches.write().unwrap();
        let removed = remove_entry(&mut watches.by_document, document_id, &connection);
        remove_entry(&mut watches.by_connection, &connection, document_id);
        removed
    }

    /// Remove every watch of a connection, returning the documents it watched.
    pub fn disconnect(&self, connection: ConnectionId) -> Vec<String> {
        let mut watches = self.watches.write().unwrap();
        let documents: Vec<String> = watches
            .by_connection
            .remove(&connection)
            .map(|docs| docs.into_iter().collect())
            .unwrap_or_default();

        for document_id in &documents {
            remove_entry(&mut watches.by_document, document_id.as_str(), &connection);
        }
        documents
    }

    /// Connections watching a document.
    pub fn subscribers(&self, document_id: &str) -> Vec<ConnectionId> {
        let watches = self.watches.read().unwrap();
        watches
            .by_document
            .get(document_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_watched(&self, document_id: &str) -> bool {
        self.watches
            .read()
            .unwrap()
            .by_document
            .contains_key(document_id)
    }

    pub fn is_watching(&self, connection: ConnectionId, document_id: &str) -> bool {
        self.watches
            .read()
            .unwrap()
            .by_connection
            .get(&connection)
            .is_some_and(|docs| docs.contains(document_id))
    }

    /// Number of documents with at least one watcher.
    pub fn watched_count(&self) -> usize {
        self.watches.read().unwrap().by_document.len()
    }
}

/// Remove `value` from the set under `key`, dropping the set once empty.
fn remove_entry<K, Q, V, W>(map: &mut HashMap<K, HashSet<V>>, key: &Q, value: &W) -> bool
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
    V: std::borrow::Borrow<W> + std::hash::Hash + Eq,
    W: std::hash::Hash + Eq + ?Sized,
{
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_and_subscribers() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(registry.watch(a, "doc"));
        assert!(!registry.watch(a, "doc"));
        assert!(registry.watch(b, "doc"));
        assert!(registry.watch(b, "other"));

        let mut subs = registry.subscribers("doc");
        subs.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(subs, expected);
        assert!(registry.is_watching(b, "other"));
        assert_eq!(registry.watched_count(), 2);
    }

    #[test]
    fn test_unwatch_removes_empty_entries() {
        let registry = SubscriptionRegistry::new();
        let a = Uuid::new_v4();
        registry.watch(a, "doc");

        assert!(registry.unwatch(a, "doc"));
        assert!(!registry.unwatch(a, "doc"));
        assert!(!registry.is_watched("doc"));
        assert!(registry.subscribers("doc").is_empty());
        assert_eq!(registry.watched_count(), 0);
    }

    #[test]
    fn test_disconnect_drops_all_watches() {
        let registry = SubscriptionRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        registry.watch(a, "one");
        registry.watch(a, "two");
        registry.watch(b, "two");

        let mut left = registry.disconnect(a);
        left.sort();
        assert_eq!(left, vec!["one", "two"]);
        assert!(!registry.is_watched("one"));
        assert_eq!(registry.subscribers("two"), vec![b]);
        assert!(registry.disconnect(a).is_empty());
    }
}
