use std::collections::linked_list::{self, LinkedList};
use std::fmt;
use std::slice;

/// The number of elements in a chunk unless a different capacity is requested.
pub const DEFAULT_CHUNK_CAPACITY: usize = 256;

/// An append-only list of fixed-capacity chunks.
///
/// Every conversion task collects its output into its own `ChunkList`. Pushing never moves
/// existing elements, and [`append`](Self::append) splices another list onto the end without
/// copying a single element, which makes merging task outputs independent of their size.
///
/// Element order is push order, and appended lists follow the elements of `self`.
pub struct ChunkList<T> {
    chunks: LinkedList<Vec<T>>,
    chunk_capacity: usize,
    len: usize,
}

impl<T> ChunkList<T> {
    /// Creates an empty list with the default chunk capacity.
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Creates an empty list whose chunks hold `chunk_capacity` elements each.
    pub fn with_chunk_capacity(chunk_capacity: usize) -> Self {
        Self {
            chunks: LinkedList::new(),
            chunk_capacity: chunk_capacity.max(1),
            len: 0,
        }
    }

    /// The total number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no element was pushed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of chunks currently linked into this list.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Appends an element and returns its index.
    pub fn push(&mut self, value: T) -> usize {
        let needs_chunk = match self.chunks.back() {
            Some(chunk) => chunk.len() == chunk.capacity(),
            None => true,
        };

        if needs_chunk {
            self.chunks.push_back(Vec::with_capacity(self.chunk_capacity));
        }

        if let Some(chunk) = self.chunks.back_mut() {
            chunk.push(value);
        }

        self.len += 1;
        self.len - 1
    }

    /// Moves all chunks of `other` to the end of this list, leaving `other` empty.
    ///
    /// The last chunk of `self` may stay partially filled.
    pub fn append(&mut self, other: &mut Self) {
        self.len += other.len;
        other.len = 0;
        self.chunks.append(&mut other.chunks);
    }

    /// Returns the element at the given position.
    pub fn get(&self, mut index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }

        for chunk in &self.chunks {
            match chunk.get(index) {
                Some(value) => return Some(value),
                None => index -= chunk.len(),
            }
        }

        None
    }

    /// Returns the element at the given position mutably.
    ///
    /// Chunks are searched from the back, so recently pushed elements are found quickly.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }

        let mut start = self.len;
        for chunk in self.chunks.iter_mut().rev() {
            start -= chunk.len();
            if index >= start {
                return chunk.get_mut(index - start);
            }
        }

        None
    }

    /// Iterates all elements in order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            chunks: self.chunks.iter(),
            current: [].iter(),
            remaining: self.len,
        }
    }

    /// Iterates all elements in order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.chunks.iter_mut().flat_map(|chunk| chunk.iter_mut())
    }

    /// Flattens the list into a contiguous vector.
    pub fn into_vec(self) -> Vec<T> {
        let mut vec = Vec::with_capacity(self.len);
        for mut chunk in self.chunks {
            vec.append(&mut chunk);
        }
        vec
    }
}

impl<T> Default for ChunkList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for ChunkList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Extend<T> for ChunkList<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<T> FromIterator<T> for ChunkList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

/// Iterator over the elements of a [`ChunkList`].
pub struct Iter<'a, T> {
    chunks: linked_list::Iter<'a, Vec<T>>,
    current: slice::Iter<'a, T>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(next) = self.current.next() {
                self.remaining -= 1;
                return Some(next);
            }
            self.current = self.chunks.next()?.iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a ChunkList<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
