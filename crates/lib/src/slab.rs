//! Chunked slab allocator for graph records.
//!
//! Targets, dependencies, scopes and inference rules are created in large
//! numbers and referenced from each other by identifier. A [`Slab`] stores
//! records in fixed-size chunks that are allocated in bulk, hands out typed
//! [`Key`]s that stay valid until the record is removed, and recycles freed
//! slots.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::consts::SLAB_CHUNK_SIZE;

/// Typed index into a [`Slab`].
pub struct Key<T> {
  index: u32,
  _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
  fn new(index: usize) -> Self {
    Self {
      index: index as u32,
      _marker: PhantomData,
    }
  }

  /// Raw slot number, useful for diagnostics.
  pub fn index(self) -> usize {
    self.index as usize
  }
}

impl<T> Clone for Key<T> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
  fn eq(&self, other: &Self) -> bool {
    self.index == other.index
  }
}

impl<T> Eq for Key<T> {}

impl<T> PartialOrd for Key<T> {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl<T> Ord for Key<T> {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.index.cmp(&other.index)
  }
}

impl<T> Hash for Key<T> {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.index.hash(state);
  }
}

impl<T> fmt::Debug for Key<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.index)
  }
}

/// Pool of `T` records addressed by [`Key<T>`].
pub struct Slab<T> {
  chunks: Vec<Vec<Option<T>>>,
  free: Vec<usize>,
  len: usize,
}

impl<T> Default for Slab<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Slab<T> {
  pub fn new() -> Self {
    Self {
      chunks: Vec::new(),
      free: Vec::new(),
      len: 0,
    }
  }

  /// Number of live records.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Total slots handed out so far, live or free.
  fn capacity_used(&self) -> usize {
    match self.chunks.last() {
      Some(last) => (self.chunks.len() - 1) * SLAB_CHUNK_SIZE + last.len(),
      None => 0,
    }
  }

  /// Store a record and return its key.
  pub fn insert(&mut self, value: T) -> Key<T> {
    self.len += 1;

    if let Some(index) = self.free.pop() {
      let (chunk, offset) = split(index);
      self.chunks[chunk][offset] = Some(value);
      return Key::new(index);
    }

    let needs_chunk = self.chunks.last().is_none_or(|c| c.len() == SLAB_CHUNK_SIZE);
    if needs_chunk {
      self.chunks.push(Vec::with_capacity(SLAB_CHUNK_SIZE));
    }

    let index = self.capacity_used();
    if let Some(chunk) = self.chunks.last_mut() {
      chunk.push(Some(value));
    }
    Key::new(index)
  }

  /// Remove a record, returning it. The slot is reused by later inserts.
  pub fn remove(&mut self, key: Key<T>) -> Option<T> {
    let (chunk, offset) = split(key.index());
    let value = self.chunks.get_mut(chunk)?.get_mut(offset)?.take()?;
    self.len -= 1;
    self.free.push(key.index());
    Some(value)
  }

  pub fn get(&self, key: Key<T>) -> Option<&T> {
    let (chunk, offset) = split(key.index());
    self.chunks.get(chunk)?.get(offset)?.as_ref()
  }

  pub fn get_mut(&mut self, key: Key<T>) -> Option<&mut T> {
    let (chunk, offset) = split(key.index());
    self.chunks.get_mut(chunk)?.get_mut(offset)?.as_mut()
  }

  pub fn contains(&self, key: Key<T>) -> bool {
    self.get(key).is_some()
  }

  /// Keys of all live records, in slot order.
  pub fn keys(&self) -> Vec<Key<T>> {
    self.iter().map(|(k, _)| k).collect()
  }

  /// Iterate over live records in slot order.
  pub fn iter(&self) -> impl Iterator<Item = (Key<T>, &T)> {
    self.chunks.iter().enumerate().flat_map(|(c, chunk)| {
      chunk
        .iter()
        .enumerate()
        .filter_map(move |(o, slot)| slot.as_ref().map(|v| (Key::new(c * SLAB_CHUNK_SIZE + o), v)))
    })
  }
}

impl<T> std::ops::Index<Key<T>> for Slab<T> {
  type Output = T;

  fn index(&self, key: Key<T>) -> &T {
    match self.get(key) {
      Some(v) => v,
      None => panic!("stale slab key {:?}", key),
    }
  }
}

impl<T> std::ops::IndexMut<Key<T>> for Slab<T> {
  fn index_mut(&mut self, key: Key<T>) -> &mut T {
    match self.get_mut(key) {
      Some(v) => v,
      None => panic!("stale slab key {:?}", key),
    }
  }
}

fn split(index: usize) -> (usize, usize) {
  (index / SLAB_CHUNK_SIZE, index % SLAB_CHUNK_SIZE)
}
