//!
//! Fixed-size bit vector with cached popcount
//!
//! The representation of (possibly ambiguous) discrete character states.
//! A DNA `M` is the bitset `{A, C}`, an amino-acid polymorphism sets
//! several of 20 bits, and so on. Supports the boolean algebra needed for
//! ambiguity handling plus a total order so bitsets can key maps.
//!
use crate::error::{PhyloError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const BLOCK_BITS: usize = 64;

///
/// Mutable fixed-length bit vector backed by `u64` blocks.
///
/// Invariant: `number_set_bits()` always equals the true count of set bits.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BitSet {
    blocks: Vec<u64>,
    len: usize,
    n_set: usize,
}

impl BitSet {
    ///
    /// All-zero bitset of fixed length `len`.
    ///
    pub fn new(len: usize) -> BitSet {
        let n_blocks = (len + BLOCK_BITS - 1) / BLOCK_BITS;
        BitSet {
            blocks: vec![0; n_blocks],
            len,
            n_set: 0,
        }
    }
    ///
    /// Bitset with exactly one bit set.
    ///
    pub fn singleton(len: usize, index: usize) -> Result<BitSet> {
        let mut bs = BitSet::new(len);
        bs.set(index)?;
        Ok(bs)
    }
    ///
    /// Fixed length of the bitset (not the number of set bits).
    ///
    pub fn size(&self) -> usize {
        self.len
    }
    ///
    /// Cached count of set bits.
    ///
    pub fn number_set_bits(&self) -> usize {
        self.n_set
    }
    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            Err(PhyloError::Index {
                index,
                len: self.len,
            })
        } else {
            Ok(())
        }
    }
    pub fn set(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let (block, bit) = (index / BLOCK_BITS, index % BLOCK_BITS);
        if self.blocks[block] & (1 << bit) == 0 {
            self.blocks[block] |= 1 << bit;
            self.n_set += 1;
        }
        Ok(())
    }
    pub fn unset(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let (block, bit) = (index / BLOCK_BITS, index % BLOCK_BITS);
        if self.blocks[block] & (1 << bit) != 0 {
            self.blocks[block] &= !(1 << bit);
            self.n_set -= 1;
        }
        Ok(())
    }
    pub fn flip(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let (block, bit) = (index / BLOCK_BITS, index % BLOCK_BITS);
        self.blocks[block] ^= 1 << bit;
        if self.blocks[block] & (1 << bit) != 0 {
            self.n_set += 1;
        } else {
            self.n_set -= 1;
        }
        Ok(())
    }
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (block, bit) = (index / BLOCK_BITS, index % BLOCK_BITS);
        self.blocks[block] & (1 << bit) != 0
    }
    ///
    /// Unset every bit.
    ///
    pub fn clear(&mut self) {
        for b in self.blocks.iter_mut() {
            *b = 0;
        }
        self.n_set = 0;
    }
    ///
    /// Index of the lowest set bit, if any.
    ///
    pub fn first_set_bit(&self) -> Option<usize> {
        for (i, &b) in self.blocks.iter().enumerate() {
            if b != 0 {
                return Some(i * BLOCK_BITS + b.trailing_zeros() as usize);
            }
        }
        None
    }
    ///
    /// Iterator over the indices of set bits, ascending.
    ///
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.is_set(i))
    }

    fn check_same_size(&self, other: &BitSet) -> Result<()> {
        if self.len != other.len {
            Err(PhyloError::ModelConstraint(format!(
                "bitset length mismatch: {} vs {}",
                self.len, other.len
            )))
        } else {
            Ok(())
        }
    }
    fn recount(&mut self) {
        self.n_set = self.blocks.iter().map(|b| b.count_ones() as usize).sum();
    }
    // zero out the unused tail bits of the last block
    fn mask_tail(&mut self) {
        let tail = self.len % BLOCK_BITS;
        if tail != 0 {
            if let Some(last) = self.blocks.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
    ///
    /// `self | other`; fails on length mismatch.
    ///
    pub fn union(&self, other: &BitSet) -> Result<BitSet> {
        self.check_same_size(other)?;
        let mut out = self.clone();
        for (a, b) in out.blocks.iter_mut().zip(other.blocks.iter()) {
            *a |= b;
        }
        out.recount();
        Ok(out)
    }
    ///
    /// `self & other`; fails on length mismatch.
    ///
    pub fn intersection(&self, other: &BitSet) -> Result<BitSet> {
        self.check_same_size(other)?;
        let mut out = self.clone();
        for (a, b) in out.blocks.iter_mut().zip(other.blocks.iter()) {
            *a &= b;
        }
        out.recount();
        Ok(out)
    }
    ///
    /// `self ^ other`; fails on length mismatch.
    ///
    pub fn symmetric_difference(&self, other: &BitSet) -> Result<BitSet> {
        self.check_same_size(other)?;
        let mut out = self.clone();
        for (a, b) in out.blocks.iter_mut().zip(other.blocks.iter()) {
            *a ^= b;
        }
        out.recount();
        Ok(out)
    }
    ///
    /// `!self` within the fixed length.
    ///
    pub fn complement(&self) -> BitSet {
        let mut out = self.clone();
        for a in out.blocks.iter_mut() {
            *a = !*a;
        }
        out.mask_tail();
        out.recount();
        out
    }
}

// Operator forms of the checked algebra. Length mismatch between operands
// is a programming error at this level, hence the panic; parsing layers use
// the checked methods.
impl std::ops::BitOr for &BitSet {
    type Output = BitSet;
    fn bitor(self, rhs: &BitSet) -> BitSet {
        self.union(rhs).unwrap()
    }
}
impl std::ops::BitAnd for &BitSet {
    type Output = BitSet;
    fn bitand(self, rhs: &BitSet) -> BitSet {
        self.intersection(rhs).unwrap()
    }
}
impl std::ops::BitXor for &BitSet {
    type Output = BitSet;
    fn bitxor(self, rhs: &BitSet) -> BitSet {
        self.symmetric_difference(rhs).unwrap()
    }
}
impl std::ops::Not for &BitSet {
    type Output = BitSet;
    fn not(self) -> BitSet {
        self.complement()
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.blocks == other.blocks
    }
}
impl Eq for BitSet {}

impl std::hash::Hash for BitSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        self.blocks.hash(state);
    }
}

/// Lexicographic over the underlying boolean array (bit 0 first), so a
/// bitset is usable as an ordered map key.
impl Ord for BitSet {
    fn cmp(&self, other: &Self) -> Ordering {
        let n = self.len.min(other.len);
        for i in 0..n {
            match self.is_set(i).cmp(&other.is_set(i)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.len.cmp(&other.len)
    }
}
impl PartialOrd for BitSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for i in 0..self.len {
            write!(f, "{}", if self.is_set(i) { '1' } else { '0' })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_bits(len: usize, bits: &[usize]) -> BitSet {
        let mut bs = BitSet::new(len);
        for &b in bits {
            bs.set(b).unwrap();
        }
        bs
    }

    #[test]
    fn set_unset_flip() {
        let mut bs = BitSet::new(20);
        assert_eq!(bs.size(), 20);
        assert_eq!(bs.number_set_bits(), 0);
        bs.set(3).unwrap();
        bs.set(3).unwrap(); // idempotent
        bs.set(19).unwrap();
        assert_eq!(bs.number_set_bits(), 2);
        assert!(bs.is_set(3));
        assert!(!bs.is_set(4));
        bs.unset(3).unwrap();
        assert_eq!(bs.number_set_bits(), 1);
        bs.flip(0).unwrap();
        bs.flip(19).unwrap();
        assert_eq!(bs.number_set_bits(), 1);
        assert!(bs.is_set(0));
        bs.clear();
        assert_eq!(bs.number_set_bits(), 0);
    }

    #[test]
    fn out_of_range() {
        let mut bs = BitSet::new(4);
        assert_eq!(
            bs.set(4),
            Err(PhyloError::Index { index: 4, len: 4 })
        );
        assert!(!bs.is_set(100));
    }

    #[test]
    fn algebra_truth_table() {
        // per-bit truth table over all four bit combinations
        let a = from_bits(4, &[0, 1]); // 1100
        let b = from_bits(4, &[0, 2]); // 1010
        let and = &a & &b;
        let or = &a | &b;
        let xor = &a ^ &b;
        assert_eq!(and, from_bits(4, &[0]));
        assert_eq!(or, from_bits(4, &[0, 1, 2]));
        assert_eq!(xor, from_bits(4, &[1, 2]));
        // (A & B) | (A ^ B) == A | B
        assert_eq!(&and | &xor, or);
        assert_eq!(and.number_set_bits(), 1);
        assert_eq!(or.number_set_bits(), 3);
        assert_eq!(xor.number_set_bits(), 2);
    }

    #[test]
    fn double_complement() {
        let a = from_bits(70, &[0, 5, 64, 69]);
        let c = a.complement();
        assert_eq!(c.number_set_bits(), 70 - 4);
        assert_eq!(c.complement(), a);
    }

    #[test]
    fn complement_masks_tail() {
        let a = BitSet::new(5);
        let c = a.complement();
        assert_eq!(c.number_set_bits(), 5);
        assert_eq!(c.first_set_bit(), Some(0));
        assert!(!c.is_set(5));
    }

    #[test]
    fn mismatched_sizes_fail() {
        let a = BitSet::new(4);
        let b = BitSet::new(5);
        assert!(a.union(&b).is_err());
        assert!(a.intersection(&b).is_err());
        assert!(a.symmetric_difference(&b).is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        // bit 0 compares first
        let a = from_bits(4, &[0]);
        let b = from_bits(4, &[1, 2, 3]);
        assert!(a > b);
        let c = from_bits(4, &[0, 1]);
        assert!(c > a);
        let mut m = std::collections::BTreeMap::new();
        m.insert(a.clone(), "a");
        m.insert(b.clone(), "b");
        assert_eq!(m.get(&a), Some(&"a"));
    }

    #[test]
    fn iter_and_first() {
        let a = from_bits(130, &[1, 64, 129]);
        assert_eq!(a.first_set_bit(), Some(1));
        let collected: Vec<usize> = a.iter_set().collect();
        assert_eq!(collected, vec![1, 64, 129]);
        assert_eq!(BitSet::new(8).first_set_bit(), None);
    }
}
