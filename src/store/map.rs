use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use super::iter::Iter;
use super::node::{self, Node, Removal};
use super::StoreError;

/// Immutable hash map with structural sharing.
///
/// `insert` and `remove` return a new version and leave the receiver intact;
/// the two versions share every subtree the update did not touch. Cloning is
/// a reference-count bump, which makes a snapshot O(1) regardless of size.
///
/// # Examples
///
/// ```
/// use taskvars::PersistentMap;
///
/// let empty: PersistentMap<&str, i32> = PersistentMap::new();
/// let one = empty.insert("a", 1);
///
/// assert_eq!(one.get(&"a"), Some(&1));
/// assert!(empty.get(&"a").is_none());
/// ```
pub struct PersistentMap<K, V> {
    root: Option<Arc<Node<K, V>>>,
    len: usize,
}

impl<K, V> PersistentMap<K, V> {
    /// Creates an empty map. Does not allocate.
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None, len: 0 }
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the map holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.root.as_deref(), self.len)
    }

    /// Returns true if both maps are the same version (share their root).
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Depth of the trie; 0 for an empty map.
    #[must_use]
    pub fn height(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.height())
    }
}

impl<K: Hash + Eq, V> PersistentMap<K, V> {
    /// Looks up a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let root = self.root.as_deref()?;
        node::lookup(root, node::hash_key(key), key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> PersistentMap<K, V> {
    /// Returns a new version with `key` bound to `value`.
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = node::hash_key(&key);
        match &self.root {
            None => Self {
                root: Some(Arc::new(Node::singleton(hash, key, value))),
                len: 1,
            },
            Some(root) => {
                let (new_root, added) = node::insert(root, 0, hash, key, value);
                Self {
                    root: Some(Arc::new(new_root)),
                    len: if added { self.len + 1 } else { self.len },
                }
            }
        }
    }

    /// Returns a new version without `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyNotFound`] if the key is absent.
    pub fn remove(&self, key: &K) -> Result<Self, StoreError> {
        let root = self.root.as_deref().ok_or(StoreError::KeyNotFound)?;
        match node::remove(root, 0, node::hash_key(key), key) {
            Removal::NotFound => Err(StoreError::KeyNotFound),
            Removal::Empty => Ok(Self::new()),
            Removal::Updated(new_root) => Ok(Self {
                root: Some(Arc::new(new_root)),
                len: self.len - 1,
            }),
        }
    }
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |map, (key, value)| map.insert(key, value))
    }
}
