//!
//! DNA/RNA 4-bit encoding with the IUPAC ambiguity codes
//!
//! Bit order is A, C, G, T (U replaces T for RNA). Multi-bit combinations
//! are the IUPAC codes, e.g. bits {A, C} is `M`.
//!
use super::CharacterState;
use crate::bitset::BitSet;
use crate::error::{PhyloError, Result};

const A: u8 = 0b0001;
const C: u8 = 0b0010;
const G: u8 = 0b0100;
const T: u8 = 0b1000;

fn code_of(symbol: char, rna: bool) -> Option<u8> {
    let c = symbol.to_ascii_uppercase();
    // T and U are interchangeable on input; output is alphabet specific
    let code = match c {
        'A' => A,
        'C' => C,
        'G' => G,
        'T' if !rna => T,
        'U' if rna => T,
        'M' => A | C,
        'R' => A | G,
        'W' => A | T,
        'S' => C | G,
        'Y' => C | T,
        'K' => G | T,
        'V' => A | C | G,
        'H' => A | C | T,
        'D' => A | G | T,
        'B' => C | G | T,
        'N' => A | C | G | T,
        _ => return None,
    };
    Some(code)
}

fn char_of(code: u8, rna: bool) -> char {
    match code {
        x if x == A => 'A',
        x if x == C => 'C',
        x if x == G => 'G',
        x if x == T => {
            if rna {
                'U'
            } else {
                'T'
            }
        }
        x if x == A | C => 'M',
        x if x == A | G => 'R',
        x if x == A | T => 'W',
        x if x == C | G => 'S',
        x if x == C | T => 'Y',
        x if x == G | T => 'K',
        x if x == A | C | G => 'V',
        x if x == A | C | T => 'H',
        x if x == A | G | T => 'D',
        x if x == C | G | T => 'B',
        x if x == A | C | G | T => 'N',
        _ => '?',
    }
}

pub(super) fn bits_from_code(code: u8) -> BitSet {
    let mut bits = BitSet::new(4);
    for i in 0..4 {
        if code & (1 << i) != 0 {
            bits.set(i).unwrap();
        }
    }
    bits
}

pub fn parse(symbol: &str, rna: bool) -> Result<CharacterState> {
    let mut chars = symbol.chars();
    let (first, rest) = (chars.next(), chars.next());
    let c = match (first, rest) {
        (Some(c), None) => c,
        _ => {
            return Err(PhyloError::DataFormat(format!(
                "expected a single nucleotide symbol, got '{}'",
                symbol
            )))
        }
    };
    let code = code_of(c, rna).ok_or_else(|| {
        PhyloError::DataFormat(format!(
            "unknown {} symbol '{}'",
            if rna { "RNA" } else { "DNA" },
            c
        ))
    })?;
    Ok(CharacterState::from_bits(bits_from_code(code)))
}

pub fn symbol(bits: &BitSet, rna: bool) -> String {
    let mut code = 0u8;
    for i in 0..4 {
        if bits.is_set(i) {
            code |= 1 << i;
        }
    }
    char_of(code, rna).to_string()
}
