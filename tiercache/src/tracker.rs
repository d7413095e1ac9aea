//! Recency ordering over arbitrary values.
//!
//! [`UseTracker`] keeps values ordered from least- to most-recently used.
//! Marking a value as used, removing it, and popping either end are all
//! O(1): nodes live in a slab (`Vec` + free list) linked by index, and a
//! `HashMap` maps each value to its slot.
//!
//! The tracker owns every value it tracks; removal and popping are the only
//! ways ownership is given back. It never blocks, so it is safe to use while
//! holding another lock.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

const NIL: usize = usize::MAX;

struct Node<T> {
    value: T,
    /// Neighbour towards the least-recently-used end.
    older: usize,
    /// Neighbour towards the most-recently-used end.
    newer: usize,
}

/// Least/most-recently-used ordering of distinct values.
///
/// # Example
///
/// ```
/// use tiercache::UseTracker;
///
/// let mut tracker = UseTracker::new();
/// tracker.used_object("a");
/// tracker.used_object("b");
/// tracker.used_object("a");
///
/// assert_eq!(tracker.least_recently_used_object(), Some(&"b"));
/// assert_eq!(tracker.most_recently_used_object(), Some(&"a"));
/// ```
pub struct UseTracker<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    positions: HashMap<T, usize>,
    least_recent: usize,
    most_recent: usize,
}

impl<T: Eq + Hash + Clone> UseTracker<T> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            positions: HashMap::new(),
            least_recent: NIL,
            most_recent: NIL,
        }
    }

    /// Number of tracked values.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether `value` is tracked.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.contains_key(value)
    }

    /// Mark `value` as the most recently used, inserting it if absent.
    pub fn used_object(&mut self, value: T) {
        if let Some(&slot) = self.positions.get(&value) {
            if slot != self.most_recent {
                self.unlink(slot);
                self.link_most_recent(slot);
            }
            return;
        }

        let node = Node {
            value: value.clone(),
            older: NIL,
            newer: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.positions.insert(value, slot);
        self.link_most_recent(slot);
    }

    /// Stop tracking `value`, returning it if it was tracked.
    pub fn remove_object<Q>(&mut self, value: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.positions.remove(value)?;
        Some(self.release_slot(slot))
    }

    /// The most recently used value, without changing the order.
    pub fn most_recently_used_object(&self) -> Option<&T> {
        self.node(self.most_recent).map(|node| &node.value)
    }

    /// The least recently used value, without changing the order.
    pub fn least_recently_used_object(&self) -> Option<&T> {
        self.node(self.least_recent).map(|node| &node.value)
    }

    /// Remove and return the most recently used value.
    pub fn pop_most_recently_used_object(&mut self) -> Option<T> {
        self.pop_slot(self.most_recent)
    }

    /// Remove and return the least recently used value.
    pub fn pop_least_recently_used_object(&mut self) -> Option<T> {
        self.pop_slot(self.least_recent)
    }

    /// Values from most to least recently used.
    ///
    /// The iterator borrows the tracker, so the order cannot change while
    /// it is alive; request a fresh one for a second traversal.
    pub fn most_recently_used_objects(&self) -> Iter<'_, T> {
        Iter {
            tracker: self,
            cursor: self.most_recent,
            towards_older: true,
            remaining: self.len(),
        }
    }

    /// Values from least to most recently used.
    pub fn least_recently_used_objects(&self) -> Iter<'_, T> {
        Iter {
            tracker: self,
            cursor: self.least_recent,
            towards_older: false,
            remaining: self.len(),
        }
    }

    /// Drop every tracked value.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.positions.clear();
        self.least_recent = NIL;
        self.most_recent = NIL;
    }

    fn node(&self, slot: usize) -> Option<&Node<T>> {
        if slot == NIL {
            return None;
        }
        self.slots[slot].as_ref()
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<T> {
        self.slots[slot]
            .as_mut()
            .expect("linked slot must be occupied")
    }

    fn pop_slot(&mut self, slot: usize) -> Option<T> {
        if slot == NIL {
            return None;
        }
        let value = self.release_slot(slot);
        self.positions.remove(&value);
        Some(value)
    }

    /// Unlink `slot`, free it, and return its value.
    fn release_slot(&mut self, slot: usize) -> T {
        self.unlink(slot);
        let node = self.slots[slot]
            .take()
            .expect("released slot must be occupied");
        self.free.push(slot);
        node.value
    }

    fn unlink(&mut self, slot: usize) {
        let (older, newer) = {
            let node = self.node_mut(slot);
            (node.older, node.newer)
        };

        if older == NIL {
            self.least_recent = newer;
        } else {
            self.node_mut(older).newer = newer;
        }

        if newer == NIL {
            self.most_recent = older;
        } else {
            self.node_mut(newer).older = older;
        }

        let node = self.node_mut(slot);
        node.older = NIL;
        node.newer = NIL;
    }

    fn link_most_recent(&mut self, slot: usize) {
        let previous = self.most_recent;
        {
            let node = self.node_mut(slot);
            node.older = previous;
            node.newer = NIL;
        }

        if previous == NIL {
            self.least_recent = slot;
        } else {
            self.node_mut(previous).newer = slot;
        }
        self.most_recent = slot;
    }
}

impl<T: Eq + Hash + Clone> Default for UseTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for UseTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.least_recently_used_objects())
            .finish()
    }
}

/// Ordered walk over a [`UseTracker`], from one end towards the other.
pub struct Iter<'a, T> {
    tracker: &'a UseTracker<T>,
    cursor: usize,
    towards_older: bool,
    remaining: usize,
}

impl<'a, T: Eq + Hash + Clone> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.tracker.node(self.cursor)?;
        self.cursor = if self.towards_older {
            node.older
        } else {
            node.newer
        };
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Eq + Hash + Clone> ExactSizeIterator for Iter<'_, T> {}
