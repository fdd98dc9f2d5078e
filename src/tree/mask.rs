/// Fixed-size bit set recording the active state of every voxel in a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeMask<const WORDS: usize> {
    words: [u64; WORDS],
}

pub type LeafMask = NodeMask<8>;

impl<const WORDS: usize> Default for NodeMask<WORDS> {
    fn default() -> Self {
        Self { words: [0; WORDS] }
    }
}

impl<const WORDS: usize> NodeMask<WORDS> {
    pub const SIZE: usize = WORDS * 64;

    pub fn new(on: bool) -> Self {
        Self {
            words: [if on { u64::MAX } else { 0 }; WORDS],
        }
    }
    pub fn from_words(words: [u64; WORDS]) -> Self {
        Self { words }
    }
    pub fn words(&self) -> &[u64; WORDS] {
        &self.words
    }
    pub fn is_on(&self, n: usize) -> bool {
        self.words[n >> 6] & (1 << (n & 63)) != 0
    }
    pub fn set_on(&mut self, n: usize) {
        self.words[n >> 6] |= 1 << (n & 63);
    }
    pub fn set_off(&mut self, n: usize) {
        self.words[n >> 6] &= !(1 << (n & 63));
    }
    pub fn set(&mut self, n: usize, on: bool) {
        if on { self.set_on(n) } else { self.set_off(n) }
    }
    pub fn set_all(&mut self, on: bool) {
        self.words = [if on { u64::MAX } else { 0 }; WORDS];
    }
    pub fn count_on(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
    pub fn is_off(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }
    pub fn is_full(&self) -> bool {
        self.words.iter().all(|w| *w == u64::MAX)
    }
    pub fn union_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
    }
    pub fn intersect_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= *b;
        }
    }
    /// First set bit at or after `start`.
    pub fn find_next_on(&self, start: usize) -> Option<usize> {
        let mut w = start >> 6;
        if w >= WORDS {
            return None;
        }
        let mut bits = self.words[w] & (u64::MAX << (start & 63));
        loop {
            if bits != 0 {
                return Some((w << 6) + bits.trailing_zeros() as usize);
            }
            w += 1;
            if w == WORDS {
                return None;
            }
            bits = self.words[w];
        }
    }
    /// First clear bit at or after `start`.
    pub fn find_next_off(&self, start: usize) -> Option<usize> {
        let mut w = start >> 6;
        if w >= WORDS {
            return None;
        }
        let mut bits = !self.words[w] & (u64::MAX << (start & 63));
        loop {
            if bits != 0 {
                return Some((w << 6) + bits.trailing_zeros() as usize);
            }
            w += 1;
            if w == WORDS {
                return None;
            }
            bits = !self.words[w];
        }
    }
    pub fn iter_on(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = 0;
        std::iter::from_fn(move || {
            let n = self.find_next_on(next)?;
            next = n + 1;
            Some(n)
        })
    }
    pub fn iter_off(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = 0;
        std::iter::from_fn(move || {
            let n = self.find_next_off(next)?;
            next = n + 1;
            Some(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_count_and_scan() {
        let mut m = LeafMask::default();
        assert!(m.is_off());
        m.set_on(0);
        m.set_on(63);
        m.set_on(64);
        m.set_on(511);
        assert_eq!(m.count_on(), 4);
        assert_eq!(m.iter_on().collect::<Vec<_>>(), vec![0, 63, 64, 511]);
        assert_eq!(m.find_next_on(65), Some(511));
        m.set_off(511);
        assert_eq!(m.find_next_on(65), None);
        assert_eq!(m.iter_off().count(), 509);
    }

    #[test]
    fn full_mask_and_set_ops() {
        let mut a = LeafMask::new(true);
        assert!(a.is_full());
        assert_eq!(a.find_next_off(0), None);
        let mut b = LeafMask::default();
        b.set_on(7);
        a.intersect_with(&b);
        assert_eq!(a.count_on(), 1);
        b.set_on(300);
        a.union_with(&b);
        assert_eq!(a.iter_on().collect::<Vec<_>>(), vec![7, 300]);
    }
}
