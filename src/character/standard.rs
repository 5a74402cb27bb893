//!
//! Caller-labeled and natural-number state spaces
//!
//! Covers the binary alphabet (labels `0`/`1`), arbitrary single-character
//! label sets and decimal natural-number states. Ambiguity is written as a
//! parenthesized label group, e.g. `(01)`.
//!
use super::CharacterState;
use crate::bitset::BitSet;
use crate::error::{PhyloError, Result};

fn label_index(labels: &[char], c: char) -> Result<usize> {
    labels.iter().position(|&l| l == c).ok_or_else(|| {
        PhyloError::DataFormat(format!(
            "unknown state symbol '{}' (labels are {:?})",
            c, labels
        ))
    })
}

///
/// Parse one entry of a labeled alphabet. A bare label is an unambiguous
/// state; `(ab...)` is the ambiguity set of the enclosed labels.
///
pub fn parse_labeled(symbol: &str, labels: &[char]) -> Result<CharacterState> {
    let chars: Vec<char> = symbol.chars().collect();
    let mut bits = BitSet::new(labels.len());
    match chars.as_slice() {
        [c] => {
            bits.set(label_index(labels, *c)?)?;
        }
        [open, inner @ .., close] if *open == '(' && *close == ')' && !inner.is_empty() => {
            for &c in inner {
                bits.set(label_index(labels, c)?)?;
            }
        }
        _ => {
            return Err(PhyloError::DataFormat(format!(
                "malformed state symbol '{}'",
                symbol
            )))
        }
    }
    Ok(CharacterState::from_bits(bits))
}

pub fn symbol_labeled(bits: &BitSet, labels: &[char]) -> String {
    let set: Vec<char> = bits.iter_set().map(|i| labels[i]).collect();
    match set.as_slice() {
        [c] => c.to_string(),
        _ => {
            let inner: String = set.iter().collect();
            format!("({})", inner)
        }
    }
}

///
/// Parse a decimal natural-number state in `0..max`. Ambiguity is a
/// comma-separated parenthesized group, `(2,7)`, mirroring what
/// `symbol_natural` writes.
///
pub fn parse_natural(symbol: &str, max: usize) -> Result<CharacterState> {
    if let Some(inner) = symbol
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .filter(|s| !s.is_empty())
    {
        let mut bits = BitSet::new(max);
        for field in inner.split(',') {
            bits.set(natural_index(field, max)?)?;
        }
        return Ok(CharacterState::from_bits(bits));
    }
    CharacterState::from_index(max, natural_index(symbol, max)?)
}

fn natural_index(symbol: &str, max: usize) -> Result<usize> {
    let value: usize = symbol.trim().parse().map_err(|_| {
        PhyloError::DataFormat(format!("expected a natural number, got '{}'", symbol))
    })?;
    if value >= max {
        return Err(PhyloError::DataFormat(format!(
            "state {} outside 0..{}",
            value, max
        )));
    }
    Ok(value)
}

pub fn symbol_natural(bits: &BitSet) -> String {
    match bits.number_set_bits() {
        1 => bits.first_set_bit().unwrap().to_string(),
        _ => {
            let inner: Vec<String> = bits.iter_set().map(|i| i.to_string()).collect();
            format!("({})", inner.join(","))
        }
    }
}
