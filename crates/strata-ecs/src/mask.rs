//! Fixed-width bit sets used to describe archetype signatures.
//!
//! A [`BitMask`] covers indices `[0, CAPACITY)` with no heap allocation, so
//! [`Definition`](crate::definition::Definition)s stay cheap `Copy` values
//! that can be used directly as hash-map keys.

use serde::{Deserialize, Serialize};

/// Number of distinct indices a [`BitMask`] can hold per namespace.
pub const CAPACITY: usize = 256;

const WORDS: usize = CAPACITY / 64;

// ---------------------------------------------------------------------------
// BitMask
// ---------------------------------------------------------------------------

/// A fixed 256-bit set over small indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BitMask {
    words: [u64; WORDS],
}

impl BitMask {
    /// The empty set.
    pub const EMPTY: BitMask = BitMask { words: [0; WORDS] };

    /// Create an empty mask.
    #[inline]
    pub fn new() -> Self {
        Self::EMPTY
    }

    /// Set the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= CAPACITY`.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < CAPACITY, "bit index {index} out of capacity");
        self.words[index / 64] |= 1 << (index % 64);
    }

    /// Clear the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= CAPACITY`.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        assert!(index < CAPACITY, "bit index {index} out of capacity");
        self.words[index / 64] &= !(1 << (index % 64));
    }

    /// Whether the bit at `index` is set.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        debug_assert!(index < CAPACITY);
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Whether no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place union (`|=`).
    #[inline]
    pub fn union_with(&mut self, other: &BitMask) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// In-place intersection (`&=`).
    #[inline]
    pub fn intersect_with(&mut self, other: &BitMask) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= b;
        }
    }

    /// The intersection of `self` and `other` as a new mask.
    #[inline]
    pub fn intersection(&self, other: &BitMask) -> BitMask {
        let mut out = *self;
        out.intersect_with(other);
        out
    }

    /// Whether every bit set in `other` is also set in `self`.
    #[inline]
    pub fn is_superset(&self, other: &BitMask) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & b == *b)
    }

    /// Whether `self` and `other` share no set bit.
    #[inline]
    pub fn is_disjoint(&self, other: &BitMask) -> bool {
        self.words.iter().zip(&other.words).all(|(a, b)| a & b == 0)
    }

    /// Iterate set bits in ascending order.
    #[inline]
    pub fn iter(&self) -> Ones {
        Ones {
            words: self.words,
            word_index: 0,
        }
    }
}

impl std::fmt::Debug for BitMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Ones -- set-bit iterator
// ---------------------------------------------------------------------------

/// Iterator over the set bits of a [`BitMask`], ascending.
pub struct Ones {
    words: [u64; WORDS],
    word_index: usize,
}

impl Iterator for Ones {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.word_index < WORDS {
            let word = self.words[self.word_index];
            if word != 0 {
                let bit = word.trailing_zeros() as usize;
                self.words[self.word_index] &= word - 1;
                return Some(self.word_index * 64 + bit);
            }
            self.word_index += 1;
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    #[test]
    fn set_clear_contains() {
        let mut m = BitMask::new();
        assert!(!m.contains(0));
        m.set(0);
        m.set(63);
        m.set(64);
        m.set(255);
        assert!(m.contains(0));
        assert!(m.contains(63));
        assert!(m.contains(64));
        assert!(m.contains(255));
        assert_eq!(m.len(), 4);

        m.clear(63);
        assert!(!m.contains(63));
        assert_eq!(m.len(), 3);
    }

    #[test]
    #[should_panic(expected = "out of capacity")]
    fn set_past_capacity_panics() {
        let mut m = BitMask::new();
        m.set(CAPACITY);
    }

    #[test]
    fn union_and_intersection() {
        let mut a = BitMask::new();
        a.set(1);
        a.set(100);
        let mut b = BitMask::new();
        b.set(100);
        b.set(200);

        let mut u = a;
        u.union_with(&b);
        assert_eq!(u.iter().collect::<Vec<_>>(), vec![1, 100, 200]);

        let i = a.intersection(&b);
        assert_eq!(i.iter().collect::<Vec<_>>(), vec![100]);
    }

    #[test]
    fn superset_and_disjoint() {
        let mut a = BitMask::new();
        a.set(3);
        a.set(7);
        let mut b = BitMask::new();
        b.set(3);

        assert!(a.is_superset(&b));
        assert!(!b.is_superset(&a));
        assert!(a.is_superset(&BitMask::EMPTY));

        let mut c = BitMask::new();
        c.set(9);
        assert!(a.is_disjoint(&c));
        assert!(!a.is_disjoint(&b));
    }

    #[test]
    fn iteration_is_ascending() {
        let mut m = BitMask::new();
        for i in [200, 5, 64, 0, 199] {
            m.set(i);
        }
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![0, 5, 64, 199, 200]);
    }

    #[test]
    fn equality_and_hash_by_content() {
        let mut a = BitMask::new();
        let mut b = BitMask::new();
        a.set(42);
        b.set(42);
        assert_eq!(a, b);

        let hash = |m: &BitMask| {
            let mut h = DefaultHasher::new();
            m.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }
}
