use std::hash::Hash;

use ahash::{HashMap, HashMapExt};
use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K> {
  key: K,
  entry_id: u64,
  cost: u64,
  next: Option<Index>,
  prev: Option<Index>,
}

/// Recency order and cost accounting for softly held entries.
///
/// The list only tracks keys; the entries themselves live in the retention map.
/// Head is the most recently used key, tail the next demotion candidate.
#[derive(Debug)]
pub(crate) struct SoftList<K> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
  current_cost: u64,
}

impl<K: Eq + Hash + Clone> SoftList<K> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      head: None,
      tail: None,
      current_cost: 0,
    }
  }

  fn unlink(&mut self, index: Index) {
    let (prev, next) = match self.nodes.get(index) {
      Some(node) => (node.prev, node.next),
      None => return,
    };

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }
    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  fn push_front_node(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }
    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  #[inline]
  pub fn current_cost(&self) -> u64 {
    self.current_cost
  }

  #[cfg(test)]
  pub fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  /// Tracks `key` as the most recently used soft entry. A key that is already
  /// tracked takes over the new entry id and cost.
  pub fn push_front(&mut self, key: K, entry_id: u64, cost: u64) {
    if let Some(&index) = self.lookup.get(&key) {
      let node = &mut self.nodes[index];
      self.current_cost = self.current_cost.saturating_sub(node.cost) + cost;
      node.cost = cost;
      node.entry_id = entry_id;
      self.move_to_front(&key);
      return;
    }

    let index = self.nodes.insert(Node {
      key: key.clone(),
      entry_id,
      cost,
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.current_cost += cost;
    self.push_front_node(index);
  }

  pub fn move_to_front(&mut self, key: &K) {
    if let Some(&index) = self.lookup.get(key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.push_front_node(index);
      }
    }
  }

  /// Removes the least recently used key, returning `(key, entry_id, cost)`.
  pub fn pop_back(&mut self) -> Option<(K, u64, u64)> {
    let tail = self.tail?;
    let key = self.nodes.get(tail)?.key.clone();
    let node = self.remove_node(&key)?;
    Some((node.key, node.entry_id, node.cost))
  }

  #[cfg(test)]
  pub fn remove(&mut self, key: &K) -> Option<u64> {
    self.remove_node(key).map(|node| node.cost)
  }

  fn remove_node(&mut self, key: &K) -> Option<Node<K>> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    let node = self.nodes.remove(index)?;
    self.current_cost = self.current_cost.saturating_sub(node.cost);
    Some(node)
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
    self.current_cost = 0;
  }

  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}
