//!
//! Discrete character states and their alphabets
//!
//! A character state is a bitset over the alphabet's state space plus
//! gap/missing flags; multi-bit states encode ambiguity (IUPAC codes,
//! amino-acid polymorphisms, Pomo frequency-bin spreads). The alphabet is a
//! closed sum type so the innermost likelihood loops never pay for dynamic
//! dispatch and matches can be exhaustive.
//!
use crate::bitset::BitSet;
use crate::error::{PhyloError, Result};
use serde::{Deserialize, Serialize};

pub mod amino;
pub mod codon;
pub mod dna;
pub mod pomo;
pub mod standard;

pub use codon::CodonState;
pub use pomo::{CountsFile, PomoAlphabet};

///
/// One observed (or sampled) character: a bitset over the alphabet's
/// states, gap/missing flags and optional per-state weights for averaged
/// encodings (Pomo).
///
/// Invariant: exactly one of {gap, missing, >=1 bits set} describes an
/// observed entry.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    bits: BitSet,
    gap: bool,
    missing: bool,
    weights: Option<Vec<f64>>,
}

impl CharacterState {
    ///
    /// Unambiguous state with a single set bit.
    ///
    pub fn from_index(num_states: usize, index: usize) -> Result<CharacterState> {
        Ok(CharacterState {
            bits: BitSet::singleton(num_states, index)?,
            gap: false,
            missing: false,
            weights: None,
        })
    }
    ///
    /// Possibly ambiguous state from an explicit bitset.
    ///
    pub fn from_bits(bits: BitSet) -> CharacterState {
        CharacterState {
            bits,
            gap: false,
            missing: false,
            weights: None,
        }
    }
    pub fn with_weights(mut self, weights: Vec<f64>) -> CharacterState {
        self.weights = Some(weights);
        self
    }
    pub fn gap(num_states: usize) -> CharacterState {
        CharacterState {
            bits: BitSet::new(num_states),
            gap: true,
            missing: false,
            weights: None,
        }
    }
    pub fn missing(num_states: usize) -> CharacterState {
        CharacterState {
            bits: BitSet::new(num_states),
            gap: false,
            missing: true,
            weights: None,
        }
    }
    pub fn bits(&self) -> &BitSet {
        &self.bits
    }
    pub fn set_bits(&mut self, bits: BitSet) {
        self.bits = bits;
        self.gap = false;
        self.missing = false;
    }
    pub fn num_states(&self) -> usize {
        self.bits.size()
    }
    pub fn is_gap(&self) -> bool {
        self.gap
    }
    pub fn is_missing(&self) -> bool {
        self.missing
    }
    pub fn set_gap(&mut self, tf: bool) {
        self.gap = tf;
        if tf {
            self.bits.clear();
            self.missing = false;
        }
    }
    pub fn set_missing(&mut self, tf: bool) {
        self.missing = tf;
        if tf {
            self.bits.clear();
            self.gap = false;
        }
    }
    ///
    /// Missing, gap, or more than one bit set.
    ///
    pub fn is_ambiguous(&self) -> bool {
        self.missing || self.gap || self.bits.number_set_bits() > 1
    }
    ///
    /// Per-state weights for averaged/polymorphic encodings, if any.
    ///
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }
    ///
    /// Index of the single observed state. Fails for gaps, missing data
    /// and multi-bit ambiguity.
    ///
    pub fn state_index(&self) -> Result<usize> {
        if self.gap || self.missing || self.bits.number_set_bits() != 1 {
            return Err(PhyloError::ModelConstraint(
                "state_index on an ambiguous, gap or missing state".to_string(),
            ));
        }
        Ok(self.bits.first_set_bit().unwrap())
    }
}

///
/// The closed set of supported state spaces.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Alphabet {
    Dna,
    Rna,
    AminoAcid,
    /// 64 codon states ordered AAA..TTT (base order ACGT).
    Codon,
    /// Two states written `0` / `1`.
    Binary,
    /// Caller-supplied single-character labels.
    Standard { labels: Vec<char> },
    /// `0..max` written as decimal numbers.
    NaturalNumbers { max: usize },
    /// Allele-frequency states on a virtual population grid.
    Pomo(PomoAlphabet),
}

impl Alphabet {
    pub fn standard(labels: &str) -> Alphabet {
        Alphabet::Standard {
            labels: labels.chars().collect(),
        }
    }
    ///
    /// Size of the state space the pruning engine runs over.
    ///
    pub fn num_states(&self) -> usize {
        match self {
            Alphabet::Dna | Alphabet::Rna => 4,
            Alphabet::AminoAcid => 20,
            Alphabet::Codon => 64,
            Alphabet::Binary => 2,
            Alphabet::Standard { labels } => labels.len(),
            Alphabet::NaturalNumbers { max } => *max,
            Alphabet::Pomo(p) => p.num_states(),
        }
    }
    ///
    /// Parse a single symbol (one alignment column entry for one taxon).
    ///
    /// `-` is a gap and `?` missing data for every alphabet; the rest of
    /// the symbol table is variant specific.
    ///
    pub fn parse_symbol(&self, symbol: &str) -> Result<CharacterState> {
        let n = self.num_states();
        if symbol == "-" {
            return Ok(CharacterState::gap(n));
        }
        if symbol == "?" {
            return Ok(CharacterState::missing(n));
        }
        match self {
            Alphabet::Dna => dna::parse(symbol, false),
            Alphabet::Rna => dna::parse(symbol, true),
            Alphabet::AminoAcid => amino::parse(symbol),
            Alphabet::Codon => codon::parse(symbol),
            Alphabet::Binary => standard::parse_labeled(symbol, &['0', '1']),
            Alphabet::Standard { labels } => standard::parse_labeled(symbol, labels),
            Alphabet::NaturalNumbers { max } => standard::parse_natural(symbol, *max),
            Alphabet::Pomo(p) => p.parse_counts(symbol),
        }
    }
    ///
    /// Canonical symbol of a state, used to build the per-site pattern key
    /// during compression and when writing simulated data.
    ///
    pub fn symbol(&self, state: &CharacterState) -> String {
        if state.is_missing() {
            return "?".to_string();
        }
        if state.is_gap() {
            return "-".to_string();
        }
        match self {
            Alphabet::Dna => dna::symbol(state.bits(), false),
            Alphabet::Rna => dna::symbol(state.bits(), true),
            Alphabet::AminoAcid => amino::symbol(state.bits()),
            Alphabet::Codon => codon::symbol(state.bits()),
            Alphabet::Binary => standard::symbol_labeled(state.bits(), &['0', '1']),
            Alphabet::Standard { labels } => standard::symbol_labeled(state.bits(), labels),
            Alphabet::NaturalNumbers { .. } => standard::symbol_natural(state.bits()),
            Alphabet::Pomo(p) => p.symbol(state),
        }
    }
}
