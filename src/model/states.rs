//! # Diplotype State Sets
//!
//! A sample's hidden state is an ordered pair of conditioning slots, one per
//! chromosome copy: `(hap0, hap1)` with both in `[0, 8)`, labelled
//! `hap0 * 8 + hap1`. A segment's compatible states are a [`StateSet`], a 64-bit mask
//! hidden behind named set operations.

use std::fmt;

/// Conditioning slots per chromosome copy
pub const N_SLOTS: usize = 8;

/// Diplotype states (slot pairs)
pub const N_STATES: usize = N_SLOTS * N_SLOTS;

/// Ordered pair of conditioning slots
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Diplotype(u8);

impl Diplotype {
    #[inline]
    pub fn new(hap0: usize, hap1: usize) -> Self {
        debug_assert!(hap0 < N_SLOTS && hap1 < N_SLOTS);
        Self(((hap0 << 3) | hap1) as u8)
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < N_STATES);
        Self(index as u8)
    }

    /// State label in `[0, 64)`
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Slot backing chromosome copy 0
    #[inline]
    pub fn hap0(self) -> usize {
        (self.0 >> 3) as usize
    }

    /// Slot backing chromosome copy 1
    #[inline]
    pub fn hap1(self) -> usize {
        (self.0 & 7) as usize
    }

    /// Slot backing chromosome copy `copy`
    #[inline]
    pub fn hap(self, copy: usize) -> usize {
        if copy == 0 {
            self.hap0()
        } else {
            self.hap1()
        }
    }
}

impl fmt::Debug for Diplotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.hap0(), self.hap1())
    }
}

/// Set of at most 64 diplotype states
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateSet(u64);

impl StateSet {
    pub const EMPTY: StateSet = StateSet(0);
    pub const FULL: StateSet = StateSet(u64::MAX);

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// States whose slots are both below the available slot counts
    pub fn valid(n_slots0: usize, n_slots1: usize) -> Self {
        let row = Self::slot_mask(n_slots1) as u64;
        let mut bits = 0u64;
        for h0 in 0..n_slots0.min(N_SLOTS) {
            bits |= row << (h0 * N_SLOTS);
        }
        Self(bits)
    }

    /// Pairs `(h0, h1)` with `h0` in `rows` and `h1` in `cols` (8-bit slot masks)
    #[inline]
    pub fn product(rows: u8, cols: u8) -> Self {
        let mut bits = 0u64;
        let mut r = rows;
        while r != 0 {
            let h0 = r.trailing_zeros() as usize;
            bits |= (cols as u64) << (h0 * N_SLOTS);
            r &= r - 1;
        }
        Self(bits)
    }

    /// 8-bit mask of the first `n` slots
    #[inline]
    pub fn slot_mask(n: usize) -> u8 {
        if n >= N_SLOTS {
            u8::MAX
        } else {
            ((1u16 << n) - 1) as u8
        }
    }

    #[inline]
    pub fn single(dip: Diplotype) -> Self {
        Self(1u64 << dip.index())
    }

    #[inline]
    pub fn contains(self, dip: Diplotype) -> bool {
        (self.0 >> dip.index()) & 1 == 1
    }

    /// Whether `dip` is still compatible with every call folded into this set
    #[inline]
    pub fn is_compatible(self, dip: Diplotype) -> bool {
        self.contains(dip)
    }

    #[inline]
    pub fn insert(&mut self, dip: Diplotype) {
        self.0 |= 1u64 << dip.index();
    }

    #[inline]
    pub fn remove(&mut self, dip: Diplotype) {
        self.0 &= !(1u64 << dip.index());
    }

    #[inline]
    pub fn intersect(self, other: StateSet) -> StateSet {
        Self(self.0 & other.0)
    }

    #[inline]
    pub fn union(self, other: StateSet) -> StateSet {
        Self(self.0 | other.0)
    }

    #[inline]
    pub fn is_subset(self, other: StateSet) -> bool {
        self.0 & !other.0 == 0
    }

    #[inline]
    pub fn popcount(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lowest-labelled state, if any
    #[inline]
    pub fn first(self) -> Option<Diplotype> {
        (self.0 != 0).then(|| Diplotype(self.0.trailing_zeros() as u8))
    }

    /// States in increasing label order
    pub fn iter(self) -> StateIter {
        StateIter(self.0)
    }

    /// Inline listing of the states (the segment's "current diplotype codes")
    pub fn codes(self) -> DipCodes {
        let mut codes = DipCodes::new();
        for dip in self.iter() {
            codes.push(dip);
        }
        codes
    }
}

impl fmt::Debug for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl std::ops::BitAnd for StateSet {
    type Output = StateSet;

    fn bitand(self, rhs: StateSet) -> StateSet {
        self.intersect(rhs)
    }
}

impl std::ops::BitAndAssign for StateSet {
    fn bitand_assign(&mut self, rhs: StateSet) {
        self.0 &= rhs.0;
    }
}

impl std::ops::BitOr for StateSet {
    type Output = StateSet;

    fn bitor(self, rhs: StateSet) -> StateSet {
        self.union(rhs)
    }
}

impl FromIterator<Diplotype> for StateSet {
    fn from_iter<I: IntoIterator<Item = Diplotype>>(iter: I) -> Self {
        let mut set = StateSet::EMPTY;
        for dip in iter {
            set.insert(dip);
        }
        set
    }
}

/// Iterator over the states of a [`StateSet`]
#[derive(Clone, Debug)]
pub struct StateIter(u64);

impl Iterator for StateIter {
    type Item = Diplotype;

    #[inline]
    fn next(&mut self) -> Option<Diplotype> {
        if self.0 == 0 {
            return None;
        }
        let idx = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1;
        Some(Diplotype(idx))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for StateIter {}

/// Fixed-capacity inline list of up to 64 diplotypes
#[derive(Clone, Copy)]
pub struct DipCodes {
    codes: [u8; N_STATES],
    len: u8,
}

impl DipCodes {
    pub fn new() -> Self {
        Self {
            codes: [0; N_STATES],
            len: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, dip: Diplotype) {
        debug_assert!((self.len as usize) < N_STATES);
        self.codes[self.len as usize] = dip.0;
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> Diplotype {
        Diplotype(self.codes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = Diplotype> + '_ {
        self.codes[..self.len as usize].iter().map(|&c| Diplotype(c))
    }
}

impl Default for DipCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DipCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diplotype_packing() {
        let d = Diplotype::new(5, 2);
        assert_eq!(d.index(), 42);
        assert_eq!(d.hap0(), 5);
        assert_eq!(d.hap1(), 2);
        assert_eq!(d.hap(1), 2);
        assert_eq!(Diplotype::from_index(63), Diplotype::new(7, 7));
    }

    #[test]
    fn test_valid_states() {
        assert_eq!(StateSet::valid(8, 8), StateSet::FULL);
        assert_eq!(StateSet::valid(0, 8), StateSet::EMPTY);
        let s = StateSet::valid(2, 3);
        assert_eq!(s.popcount(), 6);
        assert!(s.contains(Diplotype::new(1, 2)));
        assert!(!s.contains(Diplotype::new(2, 0)));
        assert!(!s.contains(Diplotype::new(0, 3)));
    }

    #[test]
    fn test_product() {
        let s = StateSet::product(0b101, 0b10);
        let dips: Vec<Diplotype> = s.iter().collect();
        assert_eq!(dips, vec![Diplotype::new(0, 1), Diplotype::new(2, 1)]);
        assert_eq!(StateSet::product(0, 0xFF), StateSet::EMPTY);
        assert_eq!(StateSet::product(0xFF, 0xFF), StateSet::FULL);
    }

    #[test]
    fn test_set_operations() {
        let a: StateSet = [Diplotype::new(0, 0), Diplotype::new(1, 1)].into_iter().collect();
        let b: StateSet = [Diplotype::new(1, 1), Diplotype::new(2, 2)].into_iter().collect();
        assert_eq!((a & b).popcount(), 1);
        assert_eq!((a | b).popcount(), 3);
        assert!((a & b).is_subset(a));
        assert!(!a.is_subset(b));
        assert_eq!(a.first(), Some(Diplotype::new(0, 0)));
        assert_eq!(StateSet::EMPTY.first(), None);

        let mut c = a;
        c.remove(Diplotype::new(0, 0));
        assert!(!c.is_compatible(Diplotype::new(0, 0)));
        assert_eq!(c.iter().len(), 1);
    }

    #[test]
    fn test_codes_listing() {
        let set = StateSet::valid(8, 8);
        let codes = set.codes();
        assert_eq!(codes.len(), 64);
        assert_eq!(codes.get(9), Diplotype::new(1, 1));
        assert!(StateSet::EMPTY.codes().is_empty());
    }
}
