//!
//! Transition probability matrices and the substitution-model contract
//!
//! Rate-matrix construction and exponentiation live outside this crate; the
//! engine only consumes finished per-branch transition matrices through the
//! `SubstitutionModel` trait.
//!
use crate::error::{PhyloError, Result};
use serde::{Deserialize, Serialize};

///
/// Dense row-major stochastic matrix. `get(i, j)` is the probability of
/// ending in state `j` given a start in state `i`.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    n: usize,
    values: Vec<f64>,
}

impl TransitionMatrix {
    pub fn new(n: usize) -> TransitionMatrix {
        TransitionMatrix {
            n,
            values: vec![0.0; n * n],
        }
    }
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<TransitionMatrix> {
        let n = rows.len();
        let mut values = Vec::with_capacity(n * n);
        for row in &rows {
            if row.len() != n {
                return Err(PhyloError::ModelConstraint(format!(
                    "transition matrix row has {} entries, expected {}",
                    row.len(),
                    n
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(TransitionMatrix { n, values })
    }
    pub fn identity(n: usize) -> TransitionMatrix {
        let mut m = TransitionMatrix::new(n);
        for i in 0..n {
            m.values[i * n + i] = 1.0;
        }
        m
    }
    pub fn num_states(&self) -> usize {
        self.n
    }
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.n + j] = value;
    }
    ///
    /// Row `i` as a slice, the hot access path of the pruning recursion.
    ///
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n..(i + 1) * self.n]
    }
}

///
/// External collaborator contract: a substitution process able to produce
/// the transition probabilities along a branch, scaled by a mixture rate.
///
pub trait SubstitutionModel {
    fn num_states(&self) -> usize;
    ///
    /// Equilibrium state frequencies, summing to 1.
    ///
    fn stationary_frequencies(&self) -> Vec<f64>;
    fn transition_probabilities(&self, branch_length: f64, rate: f64) -> TransitionMatrix;
}
