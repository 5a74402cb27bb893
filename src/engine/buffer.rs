//!
//! Two-slot partial-likelihood arena
//!
//! One flat `f64` allocation indexed by (slot, node, mixture, pattern,
//! state) through explicit strides, plus a parallel (slot, node, pattern)
//! arena of log scale factors. Slot 0/1 give every node an active and a
//! retained buffer so a rejected proposal rolls back by flipping the active
//! slot, without copying.
//!
use serde::{Deserialize, Serialize};

///
/// Element offsets of the flattened likelihood array. The state stride
/// is 1.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strides {
    pub slot: usize,
    pub node: usize,
    pub mixture: usize,
    pub pattern: usize,
}

///
/// Partial likelihoods and scale factors for a whole tree.
///
#[derive(Clone, Debug)]
pub struct LikelihoodArena {
    values: Vec<f64>,
    /// log scale factor per (slot, node, pattern)
    scale: Vec<f64>,
    strides: Strides,
    num_nodes: usize,
    num_states: usize,
    num_patterns: usize,
}

impl LikelihoodArena {
    pub fn new(
        num_nodes: usize,
        num_mixtures: usize,
        num_patterns: usize,
        num_states: usize,
    ) -> LikelihoodArena {
        let strides = Strides {
            pattern: num_states,
            mixture: num_patterns * num_states,
            node: num_mixtures * num_patterns * num_states,
            slot: num_nodes * num_mixtures * num_patterns * num_states,
        };
        LikelihoodArena {
            values: vec![0.0; 2 * strides.slot],
            scale: vec![0.0; 2 * num_nodes * num_patterns],
            strides,
            num_nodes,
            num_states,
            num_patterns,
        }
    }
    pub fn strides(&self) -> Strides {
        self.strides
    }
    #[inline]
    fn offset(&self, slot: usize, node: usize, mixture: usize, pattern: usize) -> usize {
        slot * self.strides.slot
            + node * self.strides.node
            + mixture * self.strides.mixture
            + pattern * self.strides.pattern
    }
    ///
    /// The per-state likelihood row of one (slot, node, mixture, pattern).
    ///
    #[inline]
    pub fn partials(&self, slot: usize, node: usize, mixture: usize, pattern: usize) -> &[f64] {
        let o = self.offset(slot, node, mixture, pattern);
        &self.values[o..o + self.num_states]
    }
    #[inline]
    pub fn partials_mut(
        &mut self,
        slot: usize,
        node: usize,
        mixture: usize,
        pattern: usize,
    ) -> &mut [f64] {
        let o = self.offset(slot, node, mixture, pattern);
        &mut self.values[o..o + self.num_states]
    }
    #[inline]
    fn scale_offset(&self, slot: usize, node: usize, pattern: usize) -> usize {
        (slot * self.num_nodes + node) * self.num_patterns + pattern
    }
    #[inline]
    pub fn scale(&self, slot: usize, node: usize, pattern: usize) -> f64 {
        self.scale[self.scale_offset(slot, node, pattern)]
    }
    #[inline]
    pub fn set_scale(&mut self, slot: usize, node: usize, pattern: usize, value: f64) {
        let o = self.scale_offset(slot, node, pattern);
        self.scale[o] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_disjoint() {
        let mut a = LikelihoodArena::new(3, 2, 5, 4);
        for slot in 0..2 {
            for node in 0..3 {
                for mixture in 0..2 {
                    for pattern in 0..5 {
                        let v = (slot * 1000 + node * 100 + mixture * 10 + pattern) as f64;
                        a.partials_mut(slot, node, mixture, pattern).fill(v);
                    }
                }
            }
        }
        assert_eq!(a.partials(0, 0, 0, 0), &[0.0; 4]);
        assert_eq!(a.partials(1, 2, 1, 4), &[1214.0; 4]);
        assert_eq!(a.partials(0, 1, 1, 3), &[113.0; 4]);
    }

    #[test]
    fn strides_match_layout() {
        let a = LikelihoodArena::new(3, 2, 5, 4);
        let s = a.strides();
        assert_eq!(s.pattern, 4);
        assert_eq!(s.mixture, 20);
        assert_eq!(s.node, 40);
        assert_eq!(s.slot, 120);
    }

    #[test]
    fn scale_slots_independent() {
        let mut a = LikelihoodArena::new(2, 1, 3, 4);
        a.set_scale(0, 1, 2, -3.5);
        a.set_scale(1, 1, 2, 7.0);
        assert_eq!(a.scale(0, 1, 2), -3.5);
        assert_eq!(a.scale(1, 1, 2), 7.0);
        assert_eq!(a.scale(0, 0, 0), 0.0);
    }
}
