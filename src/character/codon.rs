//!
//! Codon states: a 12-bit (3 x 4-bit) triplet encoding plus the expansion
//! to the 64-state space the pruning engine runs over
//!
//! Codon indices are `16*b1 + 4*b2 + b3` with base order A, C, G, T, i.e.
//! AAA=0 .. TTT=63. Translation implements the standard genetic code,
//! including stop-codon detection.
//!
use super::{dna, CharacterState};
use crate::bitset::BitSet;
use crate::error::{PhyloError, Result};

const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

///
/// Standard genetic code indexed by codon index; `*` marks a stop codon.
/// Rows are AAx..ATx, CAx..CTx, GAx..GTx, TAx..TTx.
///
const GENETIC_CODE: &[u8; 64] =
    b"KNKNTTTTRSRSIIMIQHQHPPPPRRRRLLLLEDEDAAAAGGGGVVVV*Y*YSSSS*CWCLFLF";

///
/// The translation target of a codon.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Translation {
    AminoAcid(char),
    Stop,
}

///
/// A codon observation as three 4-bit nucleotide groups. Each group may be
/// IUPAC-ambiguous; the cartesian product of the groups is the set of
/// compatible codons.
///
#[derive(Clone, Debug, PartialEq)]
pub struct CodonState {
    /// 12 bits: positions 0..4, 4..8, 8..12 are the first, second and
    /// third codon position.
    triplet: BitSet,
}

impl CodonState {
    ///
    /// Parse a three-letter string such as `ATG` (IUPAC codes allowed).
    ///
    pub fn from_str(symbol: &str) -> Result<CodonState> {
        let chars: Vec<char> = symbol.chars().collect();
        if chars.len() != 3 {
            return Err(PhyloError::DataFormat(format!(
                "a codon needs exactly 3 nucleotide symbols, got '{}'",
                symbol
            )));
        }
        let mut triplet = BitSet::new(12);
        for (pos, &c) in chars.iter().enumerate() {
            let nuc = dna::parse(&c.to_string(), false)?;
            for bit in nuc.bits().iter_set() {
                triplet.set(pos * 4 + bit).unwrap();
            }
        }
        Ok(CodonState { triplet })
    }
    pub fn from_codon_index(index: usize) -> Result<CodonState> {
        if index >= 64 {
            return Err(PhyloError::Index { index, len: 64 });
        }
        let mut triplet = BitSet::new(12);
        triplet.set(index / 16).unwrap();
        triplet.set(4 + (index / 4) % 4).unwrap();
        triplet.set(8 + index % 4).unwrap();
        Ok(CodonState { triplet })
    }
    pub fn bits(&self) -> &BitSet {
        &self.triplet
    }
    fn position_bits(&self, pos: usize) -> Vec<usize> {
        (0..4)
            .filter(|&b| self.triplet.is_set(pos * 4 + b))
            .collect()
    }
    pub fn is_ambiguous(&self) -> bool {
        self.triplet.number_set_bits() != 3
    }
    ///
    /// Codon index 0..63; requires an unambiguous triplet.
    ///
    pub fn codon_index(&self) -> Result<usize> {
        let (p1, p2, p3) = (
            self.position_bits(0),
            self.position_bits(1),
            self.position_bits(2),
        );
        if p1.len() != 1 || p2.len() != 1 || p3.len() != 1 {
            return Err(PhyloError::ModelConstraint(
                "codon_index on an ambiguous codon".to_string(),
            ));
        }
        Ok(p1[0] * 16 + p2[0] * 4 + p3[0])
    }
    ///
    /// Translate via the standard genetic code.
    ///
    pub fn translate(&self) -> Result<Translation> {
        let index = self.codon_index()?;
        Ok(translate_index(index))
    }
    pub fn is_stop_codon(&self) -> Result<bool> {
        Ok(self.translate()? == Translation::Stop)
    }
    ///
    /// Expand the triplet to the 64-state bitset consumed by the engine
    /// (cartesian product over the three positions).
    ///
    pub fn expand(&self) -> BitSet {
        let mut bits = BitSet::new(64);
        for &b1 in &self.position_bits(0) {
            for &b2 in &self.position_bits(1) {
                for &b3 in &self.position_bits(2) {
                    bits.set(b1 * 16 + b2 * 4 + b3).unwrap();
                }
            }
        }
        bits
    }
    ///
    /// Three-letter string, `?` for ambiguous positions without an exact
    /// IUPAC code (never happens for states built by `from_str`).
    ///
    pub fn to_triplet_string(&self) -> String {
        (0..3)
            .map(|pos| {
                let mut nuc = BitSet::new(4);
                for b in self.position_bits(pos) {
                    nuc.set(b).unwrap();
                }
                dna::symbol(&nuc, false)
            })
            .collect()
    }
}

pub fn translate_index(index: usize) -> Translation {
    match GENETIC_CODE[index] {
        b'*' => Translation::Stop,
        aa => Translation::AminoAcid(aa as char),
    }
}

///
/// Symbol of a codon index, e.g. 14 -> `ATG`.
///
pub fn codon_string(index: usize) -> String {
    [
        BASES[index / 16],
        BASES[(index / 4) % 4],
        BASES[index % 4],
    ]
    .iter()
    .collect()
}

pub fn parse(symbol: &str) -> Result<CharacterState> {
    let codon = CodonState::from_str(symbol)?;
    Ok(CharacterState::from_bits(codon.expand()))
}

pub fn symbol(bits: &BitSet) -> String {
    if bits.number_set_bits() == 1 {
        codon_string(bits.first_set_bit().unwrap())
    } else {
        "???".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("AAA", Translation::AminoAcid('K'); "lysine")]
    #[test_case("ATG", Translation::AminoAcid('M'); "methionine start")]
    #[test_case("TGG", Translation::AminoAcid('W'); "tryptophan")]
    #[test_case("TAA", Translation::Stop; "ochre")]
    #[test_case("TAG", Translation::Stop; "amber")]
    #[test_case("TGA", Translation::Stop; "opal")]
    fn spot_checks(codon: &str, expected: Translation) {
        let c = CodonState::from_str(codon).unwrap();
        assert_eq!(c.translate().unwrap(), expected);
    }

    #[test]
    fn all_64_codons_map_into_code() {
        // every codon translates to one of the 20 amino acids or a stop
        let mut stops = 0;
        let mut seen = std::collections::HashSet::new();
        for index in 0..64 {
            match translate_index(index) {
                Translation::Stop => stops += 1,
                Translation::AminoAcid(aa) => {
                    assert!(
                        super::super::amino::index_of(aa).is_some(),
                        "codon {} translated to unknown '{}'",
                        codon_string(index),
                        aa
                    );
                    seen.insert(aa);
                }
            }
        }
        assert_eq!(stops, 3);
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn codon_index_round_trip() {
        for index in 0..64 {
            let c = CodonState::from_codon_index(index).unwrap();
            assert_eq!(c.codon_index().unwrap(), index);
            assert_eq!(c.to_triplet_string(), codon_string(index));
            let again = CodonState::from_str(&codon_string(index)).unwrap();
            assert_eq!(again.codon_index().unwrap(), index);
        }
    }

    #[test]
    fn ambiguous_expansion() {
        // ATR = {ATA, ATG}
        let c = CodonState::from_str("ATR").unwrap();
        assert!(c.is_ambiguous());
        let expanded = c.expand();
        assert_eq!(expanded.number_set_bits(), 2);
        let ata = CodonState::from_str("ATA").unwrap().codon_index().unwrap();
        let atg = CodonState::from_str("ATG").unwrap().codon_index().unwrap();
        assert!(expanded.is_set(ata));
        assert!(expanded.is_set(atg));
        assert!(c.codon_index().is_err());
    }

    #[test]
    fn bad_input() {
        assert!(CodonState::from_str("AT").is_err());
        assert!(CodonState::from_str("ATGA").is_err());
        assert!(CodonState::from_str("AJG").is_err());
    }

    #[test]
    fn engine_facing_parse() {
        let s = parse("ATG").unwrap();
        assert_eq!(s.num_states(), 64);
        assert_eq!(s.state_index().unwrap(), 14);
        assert_eq!(symbol(s.bits()), "ATG");
    }
}
