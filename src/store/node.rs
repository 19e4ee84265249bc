use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Bits consumed per trie level.
const BITS_PER_LEVEL: u32 = 5;
const LEVEL_MASK: u64 = 0x1F;
/// Maximum depth (64-bit hash / 5 bits per level = 12.8, round up).
const MAX_DEPTH: u32 = 13;

pub(super) fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Extract the 5-bit slot index at a given depth from the hash.
fn slot_at_depth(hash: u64, depth: u32) -> u32 {
    debug_assert!(depth < MAX_DEPTH);
    #[allow(clippy::cast_possible_truncation)]
    let slot = ((hash >> (depth * BITS_PER_LEVEL)) & LEVEL_MASK) as u32;
    slot
}

/// Count the number of set bits below a given position in the bitmap.
fn compressed_index(bitmap: u32, slot: u32) -> usize {
    (bitmap & ((1u32 << slot) - 1)).count_ones() as usize
}

/// Trie node. Never mutated once shared behind an `Arc`.
#[derive(Debug, Clone)]
pub(super) enum Node<K, V> {
    /// Bitmap-compressed branch: bit `i` set means `children` holds slot `i`.
    Branch {
        bitmap: u32,
        children: Vec<Entry<K, V>>,
    },
    /// Keys whose full 64-bit hashes are equal.
    Collision {
        hash: u64,
        entries: Vec<(K, V)>,
    },
}

/// Entry in a branch's compressed child array.
#[derive(Debug, Clone)]
pub(super) enum Entry<K, V> {
    Leaf { hash: u64, key: K, value: V },
    Node(Arc<Node<K, V>>),
}

impl<K, V> Entry<K, V> {
    /// Leaves and collision nodes do not depend on their depth and may move
    /// up the trie when their parent shrinks to a single child.
    fn is_liftable(&self) -> bool {
        match self {
            Self::Leaf { .. } => true,
            Self::Node(node) => matches!(**node, Node::Collision { .. }),
        }
    }
}

/// Outcome of removing a key below some node.
pub(super) enum Removal<K, V> {
    NotFound,
    Empty,
    Updated(Node<K, V>),
}

impl<K, V> Node<K, V> {
    /// A root holding exactly one leaf.
    pub(super) fn singleton(hash: u64, key: K, value: V) -> Self {
        let slot = slot_at_depth(hash, 0);
        Self::Branch {
            bitmap: 1u32 << slot,
            children: vec![Entry::Leaf { hash, key, value }],
        }
    }

    /// Number of levels below and including this node.
    pub(super) fn height(&self) -> usize {
        match self {
            Self::Branch { children, .. } => {
                1 + children
                    .iter()
                    .map(|entry| match entry {
                        Entry::Leaf { .. } => 0,
                        Entry::Node(child) => child.height(),
                    })
                    .max()
                    .unwrap_or(0)
            }
            Self::Collision { .. } => 1,
        }
    }

    /// Collapses a freshly rebuilt child into the entry its parent should hold.
    fn into_entry(self) -> Entry<K, V> {
        match self {
            Self::Branch { bitmap, mut children } => {
                if children.len() == 1 && children[0].is_liftable() {
                    if let Some(entry) = children.pop() {
                        return entry;
                    }
                }
                Entry::Node(Arc::new(Self::Branch { bitmap, children }))
            }
            Self::Collision { hash, mut entries } => {
                if entries.len() == 1 {
                    if let Some((key, value)) = entries.pop() {
                        return Entry::Leaf { hash, key, value };
                    }
                }
                Entry::Node(Arc::new(Self::Collision { hash, entries }))
            }
        }
    }
}

/// Looks up `key` starting at the root.
pub(super) fn lookup<'a, K: Eq, V>(root: &'a Node<K, V>, hash: u64, key: &K) -> Option<&'a V> {
    let mut node = root;
    let mut depth = 0u32;

    loop {
        match node {
            Node::Branch { bitmap, children } => {
                let slot = slot_at_depth(hash, depth);
                if bitmap & (1u32 << slot) == 0 {
                    return None;
                }

                match &children[compressed_index(*bitmap, slot)] {
                    Entry::Leaf {
                        hash: leaf_hash,
                        key: leaf_key,
                        value,
                    } => {
                        return (*leaf_hash == hash && leaf_key == key).then_some(value);
                    }
                    Entry::Node(child) => {
                        node = child.as_ref();
                        depth += 1;
                    }
                }
            }
            Node::Collision {
                hash: col_hash,
                entries,
            } => {
                if *col_hash != hash {
                    return None;
                }
                return entries.iter().find(|(k, _)| k == key).map(|(_, v)| v);
            }
        }
    }
}

/// Builds the smallest subtree at `depth` holding two entries with distinct hashes.
fn join<K, V>(depth: u32, h1: u64, e1: Entry<K, V>, h2: u64, e2: Entry<K, V>) -> Node<K, V> {
    debug_assert_ne!(h1, h2, "equal hashes belong in a collision node");

    let s1 = slot_at_depth(h1, depth);
    let s2 = slot_at_depth(h2, depth);

    if s1 == s2 {
        let child = join(depth + 1, h1, e1, h2, e2);
        Node::Branch {
            bitmap: 1u32 << s1,
            children: vec![Entry::Node(Arc::new(child))],
        }
    } else {
        let children = if s1 < s2 { vec![e1, e2] } else { vec![e2, e1] };
        Node::Branch {
            bitmap: (1u32 << s1) | (1u32 << s2),
            children,
        }
    }
}

/// Inserts below `node`, returning the rebuilt node and whether the entry
/// count grew. `node` itself is left untouched.
pub(super) fn insert<K: Eq + Clone, V: Clone>(
    node: &Arc<Node<K, V>>,
    depth: u32,
    hash: u64,
    key: K,
    value: V,
) -> (Node<K, V>, bool) {
    match &**node {
        Node::Branch { bitmap, children } => {
            let slot = slot_at_depth(hash, depth);
            let bit = 1u32 << slot;
            let idx = compressed_index(*bitmap, slot);

            if bitmap & bit == 0 {
                let mut new_children = Vec::with_capacity(children.len() + 1);
                new_children.extend_from_slice(&children[..idx]);
                new_children.push(Entry::Leaf { hash, key, value });
                new_children.extend_from_slice(&children[idx..]);
                return (
                    Node::Branch {
                        bitmap: bitmap | bit,
                        children: new_children,
                    },
                    true,
                );
            }

            let (replacement, added) = match &children[idx] {
                Entry::Leaf {
                    hash: leaf_hash,
                    key: leaf_key,
                    value: leaf_value,
                } => {
                    if *leaf_hash == hash && *leaf_key == key {
                        (Entry::Leaf { hash, key, value }, false)
                    } else if *leaf_hash == hash {
                        let col = Node::Collision {
                            hash,
                            entries: vec![(leaf_key.clone(), leaf_value.clone()), (key, value)],
                        };
                        (Entry::Node(Arc::new(col)), true)
                    } else {
                        let existing = Entry::Leaf {
                            hash: *leaf_hash,
                            key: leaf_key.clone(),
                            value: leaf_value.clone(),
                        };
                        let sub = join(
                            depth + 1,
                            *leaf_hash,
                            existing,
                            hash,
                            Entry::Leaf { hash, key, value },
                        );
                        (Entry::Node(Arc::new(sub)), true)
                    }
                }
                Entry::Node(child) => {
                    let (new_child, added) = insert(child, depth + 1, hash, key, value);
                    (Entry::Node(Arc::new(new_child)), added)
                }
            };

            let mut new_children = children.clone();
            new_children[idx] = replacement;
            (
                Node::Branch {
                    bitmap: *bitmap,
                    children: new_children,
                },
                added,
            )
        }
        Node::Collision {
            hash: col_hash,
            entries,
        } => {
            if *col_hash != hash {
                // The collision node moves one level down next to the new leaf.
                let sub = join(
                    depth,
                    *col_hash,
                    Entry::Node(Arc::clone(node)),
                    hash,
                    Entry::Leaf { hash, key, value },
                );
                return (sub, true);
            }

            let mut entries = entries.clone();
            let added = if let Some(pos) = entries.iter().position(|(k, _)| *k == key) {
                entries[pos] = (key, value);
                false
            } else {
                entries.push((key, value));
                true
            };
            (
                Node::Collision {
                    hash: *col_hash,
                    entries,
                },
                added,
            )
        }
    }
}

/// Removes `key` below `node`. `node` itself is left untouched.
pub(super) fn remove<K: Eq + Clone, V: Clone>(
    node: &Node<K, V>,
    depth: u32,
    hash: u64,
    key: &K,
) -> Removal<K, V> {
    match node {
        Node::Branch { bitmap, children } => {
            let slot = slot_at_depth(hash, depth);
            let bit = 1u32 << slot;
            if bitmap & bit == 0 {
                return Removal::NotFound;
            }
            let idx = compressed_index(*bitmap, slot);

            let replacement = match &children[idx] {
                Entry::Leaf {
                    hash: leaf_hash,
                    key: leaf_key,
                    ..
                } => {
                    if *leaf_hash != hash || leaf_key != key {
                        return Removal::NotFound;
                    }
                    None
                }
                Entry::Node(child) => match remove(child, depth + 1, hash, key) {
                    Removal::NotFound => return Removal::NotFound,
                    Removal::Empty => None,
                    Removal::Updated(new_child) => Some(new_child.into_entry()),
                },
            };

            let mut new_children = children.clone();
            match replacement {
                Some(entry) => {
                    new_children[idx] = entry;
                    Removal::Updated(Node::Branch {
                        bitmap: *bitmap,
                        children: new_children,
                    })
                }
                None => {
                    new_children.remove(idx);
                    if new_children.is_empty() {
                        Removal::Empty
                    } else {
                        Removal::Updated(Node::Branch {
                            bitmap: bitmap & !bit,
                            children: new_children,
                        })
                    }
                }
            }
        }
        Node::Collision {
            hash: col_hash,
            entries,
        } => {
            if *col_hash != hash {
                return Removal::NotFound;
            }
            let Some(pos) = entries.iter().position(|(k, _)| k == key) else {
                return Removal::NotFound;
            };

            let mut entries = entries.clone();
            entries.remove(pos);
            if entries.is_empty() {
                Removal::Empty
            } else {
                Removal::Updated(Node::Collision {
                    hash: *col_hash,
                    entries,
                })
            }
        }
    }
}
