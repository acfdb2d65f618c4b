//! Typed arena for compilation-scoped data.
//!
//! Objects are bump-allocated into fixed-size segments so that growing the
//! arena never moves earlier objects between segments. Handles are plain
//! indices; there is no per-object free, only [`Arena::reset`] which
//! reclaims everything at once.

use crate::error::ArenaError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Handle to an object allocated in an [`Arena`]
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    fn new(index: usize) -> Self {
        Self {
            index: index as u32,
            _marker: PhantomData,
        }
    }

    /// Allocation order of the object
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Segmented bump arena
///
/// Uses fixed-capacity segments; a new segment is opened when the current
/// one is full.
#[derive(Debug)]
pub struct Arena<T> {
    /// Allocated segments, each holding at most `segment_capacity` objects
    segments: Vec<Vec<T>>,
    /// Objects per segment
    segment_capacity: usize,
    /// Total objects allocated
    len: usize,
    /// Maximum number of objects
    limit: usize,
}

impl<T> Arena<T> {
    /// Default number of objects per segment
    pub const DEFAULT_SEGMENT_CAPACITY: usize = 64;

    /// Creates an unbounded arena
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Creates an arena that refuses allocations past `limit` objects
    pub fn with_limit(limit: usize) -> Self {
        Self::with_segment_capacity(limit, Self::DEFAULT_SEGMENT_CAPACITY)
    }

    /// Creates an arena with explicit limit and segment size
    pub fn with_segment_capacity(limit: usize, segment_capacity: usize) -> Self {
        Self {
            segments: Vec::new(),
            segment_capacity: segment_capacity.max(1),
            len: 0,
            limit,
        }
    }

    /// Allocates `value` and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::Exhausted`] once `limit` objects are live.
    pub fn alloc(&mut self, value: T) -> Result<Id<T>, ArenaError> {
        if self.len >= self.limit {
            return Err(ArenaError::Exhausted { limit: self.limit });
        }

        let needs_segment = self
            .segments
            .last()
            .map_or(true, |segment| segment.len() == self.segment_capacity);
        if needs_segment {
            self.segments.push(Vec::with_capacity(self.segment_capacity));
        }

        if let Some(segment) = self.segments.last_mut() {
            segment.push(value);
        }
        self.len += 1;
        Ok(Id::new(self.len - 1))
    }

    /// Returns the object behind `id`, if it belongs to this arena
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        let (segment, offset) = self.locate(id);
        self.segments.get(segment).and_then(|s| s.get(offset))
    }

    /// Mutable access to the object behind `id`
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        let (segment, offset) = self.locate(id);
        self.segments.get_mut(segment).and_then(|s| s.get_mut(offset))
    }

    /// Number of allocated objects
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing has been allocated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocation limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of segments currently held
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Iterates objects in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.segments
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, value)| (Id::new(i), value))
    }

    /// Reclaims every object at once, invalidating all handles
    pub fn reset(&mut self) {
        self.segments.clear();
        self.len = 0;
    }

    fn locate(&self, id: Id<T>) -> (usize, usize) {
        let index = id.index();
        (index / self.segment_capacity, index % self.segment_capacity)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    fn index(&self, id: Id<T>) -> &T {
        let (segment, offset) = self.locate(id);
        &self.segments[segment][offset]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    fn index_mut(&mut self, id: Id<T>) -> &mut T {
        let (segment, offset) = self.locate(id);
        &mut self.segments[segment][offset]
    }
}
