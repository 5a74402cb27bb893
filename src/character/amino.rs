//!
//! Amino-acid 20-bit encoding
//!
//! One-letter codes in the order `ARNDCQEGHILKMFPSTWYV`; `B`, `Z` and `X`
//! are the usual polymorphism codes.
//!
use super::CharacterState;
use crate::bitset::BitSet;
use crate::error::{PhyloError, Result};

pub const AMINO_ACIDS: &str = "ARNDCQEGHILKMFPSTWYV";

pub fn index_of(symbol: char) -> Option<usize> {
    AMINO_ACIDS.find(symbol.to_ascii_uppercase())
}

pub fn parse(symbol: &str) -> Result<CharacterState> {
    let mut chars = symbol.chars();
    let (first, rest) = (chars.next(), chars.next());
    let c = match (first, rest) {
        (Some(c), None) => c.to_ascii_uppercase(),
        _ => {
            return Err(PhyloError::DataFormat(format!(
                "expected a single amino-acid symbol, got '{}'",
                symbol
            )))
        }
    };
    let mut bits = BitSet::new(20);
    match c {
        // Asn or Asp
        'B' => {
            bits.set(index_of('N').unwrap()).unwrap();
            bits.set(index_of('D').unwrap()).unwrap();
        }
        // Gln or Glu
        'Z' => {
            bits.set(index_of('Q').unwrap()).unwrap();
            bits.set(index_of('E').unwrap()).unwrap();
        }
        'X' => {
            for i in 0..20 {
                bits.set(i).unwrap();
            }
        }
        _ => {
            let i = index_of(c).ok_or_else(|| {
                PhyloError::DataFormat(format!("unknown amino-acid symbol '{}'", c))
            })?;
            bits.set(i).unwrap();
        }
    }
    Ok(CharacterState::from_bits(bits))
}

pub fn symbol(bits: &BitSet) -> String {
    match bits.number_set_bits() {
        1 => {
            let i = bits.first_set_bit().unwrap();
            AMINO_ACIDS.chars().nth(i).unwrap().to_string()
        }
        20 => "X".to_string(),
        2 => {
            let set: Vec<usize> = bits.iter_set().collect();
            let pair: Vec<char> = set
                .iter()
                .map(|&i| AMINO_ACIDS.chars().nth(i).unwrap())
                .collect();
            match (pair[0], pair[1]) {
                ('N', 'D') | ('D', 'N') => "B".to_string(),
                ('Q', 'E') | ('E', 'Q') => "Z".to_string(),
                _ => "X".to_string(),
            }
        }
        _ => "X".to_string(),
    }
}
