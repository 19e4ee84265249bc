use std::iter::FusedIterator;
use std::slice;

use super::node::{Entry, Node};

enum Frame<'a, K, V> {
    Branch(slice::Iter<'a, Entry<K, V>>),
    Collision(slice::Iter<'a, (K, V)>),
}

impl<'a, K, V> Frame<'a, K, V> {
    fn of(node: &'a Node<K, V>) -> Self {
        match node {
            Node::Branch { children, .. } => Self::Branch(children.iter()),
            Node::Collision { entries, .. } => Self::Collision(entries.iter()),
        }
    }
}

/// Depth-first iterator over the entries of a [`PersistentMap`](super::PersistentMap).
///
/// Order follows the hash layout of the trie and is stable for a given
/// version, but carries no meaning otherwise.
pub struct Iter<'a, K, V> {
    stack: Vec<Frame<'a, K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(super) fn new(root: Option<&'a Node<K, V>>, len: usize) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = root {
            stack.push(Frame::of(root));
        }
        Self {
            stack,
            remaining: len,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            match frame {
                Frame::Branch(children) => match children.next() {
                    Some(Entry::Leaf { key, value, .. }) => {
                        self.remaining = self.remaining.saturating_sub(1);
                        return Some((key, value));
                    }
                    Some(Entry::Node(child)) => self.stack.push(Frame::of(child.as_ref())),
                    None => {
                        self.stack.pop();
                    }
                },
                Frame::Collision(entries) => match entries.next() {
                    Some((key, value)) => {
                        self.remaining = self.remaining.saturating_sub(1);
                        return Some((key, value));
                    }
                    None => {
                        self.stack.pop();
                    }
                },
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}
