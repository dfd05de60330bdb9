//! Fixed-capacity ring buffer
//!
//! Overwriting circular buffer used by the windowed filters. Indexing is
//! newest-first: `ring[0]` is the most recently pushed element.

/// A fixed-capacity circular buffer that overwrites its oldest element when
/// full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    /// Next write slot
    head: usize,
    count: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        Self {
            buffer: vec![T::default(); capacity],
            head: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.buffer.len()
    }

    /// Append an element, overwriting the oldest when at capacity
    pub fn push(&mut self, value: T) {
        self.buffer[self.head] = value;
        self.head = (self.head + 1) % self.buffer.len();
        if self.count < self.buffer.len() {
            self.count += 1;
        }
    }

    /// Most recently pushed element
    pub fn head(&self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let cap = self.buffer.len();
        Some(self.buffer[(self.head + cap - 1) % cap])
    }

    /// Oldest retained element
    pub fn tail(&self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let cap = self.buffer.len();
        Some(self.buffer[(self.head + cap - self.count) % cap])
    }

    /// Remove and return the newest element
    pub fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let cap = self.buffer.len();
        self.head = (self.head + cap - 1) % cap;
        self.count -= 1;
        Some(self.buffer[self.head])
    }

    /// Remove and return the oldest element
    pub fn pop_back(&mut self) -> Option<T> {
        let value = self.tail()?;
        self.count -= 1;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Element `index` positions back from the newest (`get(0)` == newest)
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.count {
            return None;
        }
        let cap = self.buffer.len();
        Some(self.buffer[(self.head + cap - 1 - index) % cap])
    }
}

impl<T: Copy + Default> std::ops::Index<usize> for RingBuffer<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        assert!(index < self.count, "ring buffer index out of bounds");
        let cap = self.buffer.len();
        &self.buffer[(self.head + cap - 1 - index) % cap]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_and_newest_first_indexing() {
        let mut ring = RingBuffer::with_capacity(3);
        ring.push(1);
        ring.push(2);
        ring.push(3);

        assert_eq!(ring[0], 3);
        assert_eq!(ring[1], 2);
        assert_eq!(ring[2], 1);
        assert_eq!(ring.head(), Some(3));
        assert_eq!(ring.tail(), Some(1));
    }

    #[test]
    fn test_overwrite_when_full() {
        let mut ring = RingBuffer::with_capacity(3);
        for v in 1..=5 {
            ring.push(v);
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.head(), Some(5));
        assert_eq!(ring.tail(), Some(3));
    }

    #[test]
    fn test_pop_from_both_ends() {
        let mut ring = RingBuffer::with_capacity(4);
        for v in 1..=4 {
            ring.push(v);
        }

        assert_eq!(ring.pop(), Some(4));
        assert_eq!(ring.pop_back(), Some(1));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.head(), Some(3));
        assert_eq!(ring.tail(), Some(2));
    }

    #[test]
    fn test_empty_accessors() {
        let mut ring: RingBuffer<f32> = RingBuffer::with_capacity(2);
        assert!(ring.is_empty());
        assert_eq!(ring.head(), None);
        assert_eq!(ring.tail(), None);
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.pop_back(), None);
    }

    proptest! {
        #[test]
        fn prop_matches_vecdeque(ops in prop::collection::vec(0i32..100, 1..200)) {
            let cap = 8;
            let mut ring = RingBuffer::with_capacity(cap);
            let mut model: std::collections::VecDeque<i32> = Default::default();

            for v in ops {
                ring.push(v);
                model.push_back(v);
                if model.len() > cap {
                    model.pop_front();
                }

                prop_assert_eq!(ring.len(), model.len());
                prop_assert_eq!(ring.head(), model.back().copied());
                prop_assert_eq!(ring.tail(), model.front().copied());
                for i in 0..model.len() {
                    prop_assert_eq!(ring[i], model[model.len() - 1 - i]);
                }
            }
        }
    }
}
