//!
//! Character matrices and site-pattern compression
//!
//! An alignment usually repeats the same column many times; the pruning
//! recursion only needs each distinct column once, weighted by its count.
//! Compression interns the canonical per-site key (every tip's symbol in
//! topology order) and emits the pattern table the engine consumes.
//!
use crate::character::{Alphabet, CharacterState};
use crate::error::{PhyloError, Result};
use crate::tree::Tree;
use fnv::FnvHashMap;
use itertools::Itertools;
use log::debug;
use std::collections::HashSet;

///
/// One taxon's named character sequence.
///
#[derive(Clone, Debug, PartialEq)]
pub struct TaxonData {
    pub name: String,
    pub states: Vec<CharacterState>,
}

impl TaxonData {
    pub fn new(name: &str, states: Vec<CharacterState>) -> TaxonData {
        TaxonData {
            name: name.to_string(),
            states,
        }
    }
    ///
    /// Parse a sequence where every character is one symbol, e.g. `ACGT-?`.
    ///
    pub fn from_symbols(name: &str, alphabet: &Alphabet, sequence: &str) -> Result<TaxonData> {
        let states = sequence
            .chars()
            .map(|c| alphabet.parse_symbol(&c.to_string()))
            .collect::<Result<Vec<CharacterState>>>()?;
        Ok(TaxonData::new(name, states))
    }
    pub fn len(&self) -> usize {
        self.states.len()
    }
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

///
/// Aligned sequences for a set of taxa plus the excluded-site set.
///
#[derive(Clone, Debug)]
pub struct CharacterMatrix {
    alphabet: Alphabet,
    taxa: Vec<TaxonData>,
    excluded: HashSet<usize>,
}

impl CharacterMatrix {
    pub fn new(alphabet: Alphabet, taxa: Vec<TaxonData>) -> Result<CharacterMatrix> {
        let n_sites = match taxa.first() {
            Some(t) => t.len(),
            None => {
                return Err(PhyloError::DataFormat(
                    "a character matrix needs at least one taxon".to_string(),
                ))
            }
        };
        for t in &taxa {
            if t.len() != n_sites {
                return Err(PhyloError::DataFormat(format!(
                    "taxon '{}' has {} sites, expected {}",
                    t.name,
                    t.len(),
                    n_sites
                )));
            }
            if t.states.iter().any(|s| s.num_states() != alphabet.num_states()) {
                return Err(PhyloError::ModelConstraint(format!(
                    "taxon '{}' carries states outside the {}-state alphabet",
                    t.name,
                    alphabet.num_states()
                )));
            }
        }
        Ok(CharacterMatrix {
            alphabet,
            taxa,
            excluded: HashSet::new(),
        })
    }
    pub fn from_symbols(alphabet: Alphabet, rows: &[(&str, &str)]) -> Result<CharacterMatrix> {
        let taxa = rows
            .iter()
            .map(|(name, seq)| TaxonData::from_symbols(name, &alphabet, seq))
            .collect::<Result<Vec<TaxonData>>>()?;
        CharacterMatrix::new(alphabet, taxa)
    }
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }
    pub fn num_sites(&self) -> usize {
        self.taxa[0].len()
    }
    pub fn num_included_sites(&self) -> usize {
        self.num_sites() - self.excluded.len()
    }
    pub fn num_taxa(&self) -> usize {
        self.taxa.len()
    }
    pub fn exclude_site(&mut self, site: usize) -> Result<()> {
        if site >= self.num_sites() {
            return Err(PhyloError::Index {
                index: site,
                len: self.num_sites(),
            });
        }
        self.excluded.insert(site);
        Ok(())
    }
    pub fn is_excluded(&self, site: usize) -> bool {
        self.excluded.contains(&site)
    }
    pub fn taxon(&self, name: &str) -> Option<&TaxonData> {
        self.taxa.iter().find(|t| t.name == name)
    }
    pub fn taxa(&self) -> &[TaxonData] {
        &self.taxa
    }
}

///
/// Column normalization applied before pattern interning.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressionPolicy {
    /// Treat `?` entries as gaps.
    pub treat_unknown_as_gap: bool,
    /// Collapse any ambiguous entry (multi-bit, `?`, `-`) to a gap.
    pub treat_ambiguous_as_gap: bool,
    /// When set, compression fails unless exactly this many sites survive
    /// the exclusion filter.
    pub expected_included_sites: Option<usize>,
}

///
/// One compressed alignment column: the per-tip states in topology order,
/// its multiplicity, and the shared state index if the column is invariant
/// (every tip unambiguous and identical).
///
#[derive(Clone, Debug)]
pub struct SitePattern {
    pub states: Vec<CharacterState>,
    pub count: usize,
    pub invariant_state: Option<usize>,
}

impl SitePattern {
    pub fn is_invariant(&self) -> bool {
        self.invariant_state.is_some()
    }
}

///
/// Deduplicated site patterns plus the site → pattern mapping.
///
#[derive(Clone, Debug)]
pub struct PatternTable {
    /// Tip names in topology (post-order) order; pattern states align with
    /// this ordering.
    pub tip_order: Vec<String>,
    pub patterns: Vec<SitePattern>,
    /// `None` marks an excluded site.
    pub site_to_pattern: Vec<Option<usize>>,
    num_included_sites: usize,
}

impl PatternTable {
    ///
    /// Compress an alignment against a tree's tip set.
    ///
    pub fn compress(
        matrix: &CharacterMatrix,
        tree: &Tree,
        policy: &CompressionPolicy,
    ) -> Result<PatternTable> {
        let tip_order = tree.tip_names();
        let sequences: Vec<&TaxonData> = tip_order
            .iter()
            .map(|name| {
                matrix.taxon(name).ok_or_else(|| {
                    PhyloError::DataFormat(format!("no sequence for tree tip '{}'", name))
                })
            })
            .collect::<Result<Vec<&TaxonData>>>()?;

        let included = matrix.num_included_sites();
        if let Some(expected) = policy.expected_included_sites {
            if included != expected {
                return Err(PhyloError::DataFormat(format!(
                    "alignment has {} included sites, caller expected {}",
                    included, expected
                )));
            }
        }

        let alphabet = matrix.alphabet();
        let mut intern: FnvHashMap<String, usize> = FnvHashMap::default();
        let mut patterns: Vec<SitePattern> = Vec::new();
        let mut site_to_pattern = Vec::with_capacity(matrix.num_sites());

        for site in 0..matrix.num_sites() {
            if matrix.is_excluded(site) {
                site_to_pattern.push(None);
                continue;
            }
            let column: Vec<CharacterState> = sequences
                .iter()
                .map(|t| normalize(&t.states[site], policy))
                .collect();
            let key = column.iter().map(|s| alphabet.symbol(s)).join("|");
            let index = match intern.get(&key) {
                Some(&i) => {
                    patterns[i].count += 1;
                    i
                }
                None => {
                    let i = patterns.len();
                    intern.insert(key, i);
                    patterns.push(SitePattern {
                        invariant_state: invariant_state(&column),
                        states: column,
                        count: 1,
                    });
                    i
                }
            };
            site_to_pattern.push(Some(index));
        }
        debug!(
            "compressed {} sites into {} patterns",
            included,
            patterns.len()
        );
        Ok(PatternTable {
            tip_order,
            patterns,
            site_to_pattern,
            num_included_sites: included,
        })
    }

    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }
    ///
    /// Total included sites; always equals the sum of pattern counts.
    ///
    pub fn num_sites(&self) -> usize {
        self.num_included_sites
    }
    ///
    /// Position of a taxon within the pattern states, by name.
    ///
    pub fn tip_position(&self, name: &str) -> Option<usize> {
        self.tip_order.iter().position(|n| n == name)
    }
    ///
    /// Re-expand to per-site columns (excluded sites omitted); inverse of
    /// compression up to site exclusion.
    ///
    pub fn expand(&self) -> Vec<&SitePattern> {
        self.site_to_pattern
            .iter()
            .filter_map(|p| p.map(|i| &self.patterns[i]))
            .collect()
    }
    ///
    /// The table restricted to one worker's block. Pattern indices are
    /// rebased to the block; sites owned by other blocks map to `None`.
    ///
    pub fn subset(&self, block: PatternBlock) -> PatternTable {
        let patterns = self.patterns[block.start..block.end].to_vec();
        let num_included_sites = patterns.iter().map(|p| p.count).sum();
        let site_to_pattern = self
            .site_to_pattern
            .iter()
            .map(|p| match p {
                Some(i) if (block.start..block.end).contains(i) => Some(i - block.start),
                _ => None,
            })
            .collect();
        PatternTable {
            tip_order: self.tip_order.clone(),
            patterns,
            site_to_pattern,
            num_included_sites,
        }
    }
    ///
    /// Partition the pattern range into `n_blocks` contiguous blocks for
    /// worker processes. Blocks differ in size by at most one pattern.
    ///
    pub fn blocks(&self, n_blocks: usize) -> Vec<PatternBlock> {
        let n = self.num_patterns();
        let n_blocks = n_blocks.max(1).min(n.max(1));
        let base = n / n_blocks;
        let extra = n % n_blocks;
        let mut out = Vec::with_capacity(n_blocks);
        let mut start = 0;
        for b in 0..n_blocks {
            let len = base + if b < extra { 1 } else { 0 };
            out.push(PatternBlock {
                start,
                end: start + len,
            });
            start += len;
        }
        out
    }
}

///
/// Contiguous half-open pattern range `[start, end)` owned by one worker.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternBlock {
    pub start: usize,
    pub end: usize,
}

impl PatternBlock {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

fn normalize(state: &CharacterState, policy: &CompressionPolicy) -> CharacterState {
    let n = state.num_states();
    if state.is_gap() {
        return state.clone();
    }
    if state.is_missing() {
        return if policy.treat_unknown_as_gap || policy.treat_ambiguous_as_gap {
            CharacterState::gap(n)
        } else {
            state.clone()
        };
    }
    if policy.treat_ambiguous_as_gap && state.is_ambiguous() {
        return CharacterState::gap(n);
    }
    state.clone()
}

// a column is invariant when every tip observes the same single state
fn invariant_state(column: &[CharacterState]) -> Option<usize> {
    let first = column.first()?.state_index().ok()?;
    for s in column.iter().skip(1) {
        if s.state_index().ok()? != first {
            return None;
        }
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;

    fn three_tip_tree() -> Tree {
        let mut t = Tree::new();
        let ab = t.add_child(t.root(), None, 0.05);
        t.add_child(ab, Some("A"), 0.1);
        t.add_child(ab, Some("B"), 0.2);
        t.add_child(t.root(), Some("C"), 0.3);
        t
    }

    fn dna_matrix(rows: &[(&str, &str)]) -> CharacterMatrix {
        CharacterMatrix::from_symbols(Alphabet::Dna, rows).unwrap()
    }

    #[test]
    fn counts_conserve_sites() {
        let m = dna_matrix(&[
            ("A", "ACGTAC"),
            ("B", "ACGAAC"),
            ("C", "ACGTAC"),
        ]);
        let table = PatternTable::compress(&m, &three_tip_tree(), &Default::default()).unwrap();
        assert_eq!(table.num_sites(), 6);
        let total: usize = table.patterns.iter().map(|p| p.count).sum();
        assert_eq!(total, 6);
        assert_eq!(table.num_patterns(), 4);
        // sites 0 and 4 share a pattern, as do 1 and 5
        assert_eq!(table.site_to_pattern[0], table.site_to_pattern[4]);
        assert_eq!(table.site_to_pattern[1], table.site_to_pattern[5]);
        assert_ne!(table.site_to_pattern[2], table.site_to_pattern[3]);
    }

    #[test]
    fn reexpansion_reproduces_per_site_sum() {
        use crate::engine::PruningEngine;
        use crate::mocks::JukesCantor;
        use approx::assert_abs_diff_eq;

        // duplicated and excluded columns; the compressed evaluation must
        // equal the sum of per-site terms re-expanded through
        // site_to_pattern
        let mut m = dna_matrix(&[
            ("A", "ACAGAC"),
            ("B", "ACAGAC"),
            ("C", "AGAGCG"),
        ]);
        m.exclude_site(3).unwrap();
        let t = three_tip_tree();
        let table = PatternTable::compress(&m, &t, &Default::default()).unwrap();
        assert!(table.num_patterns() < table.num_sites());

        let mut engine = PruningEngine::new(
            t.clone(),
            JukesCantor::dna(),
            table.clone(),
            Default::default(),
        )
        .unwrap();
        let total = engine.compute_ln_likelihood().unwrap();

        // one single-column engine per pattern gives the per-site term
        let per_pattern: Vec<f64> = table
            .patterns
            .iter()
            .map(|pattern| {
                let taxa: Vec<TaxonData> = table
                    .tip_order
                    .iter()
                    .zip(&pattern.states)
                    .map(|(name, s)| TaxonData::new(name, vec![s.clone()]))
                    .collect();
                let column = CharacterMatrix::new(Alphabet::Dna, taxa).unwrap();
                let single = PatternTable::compress(&column, &t, &Default::default()).unwrap();
                PruningEngine::new(t.clone(), JukesCantor::dna(), single, Default::default())
                    .unwrap()
                    .compute_ln_likelihood()
                    .unwrap()
            })
            .collect();

        let expanded: f64 = table
            .site_to_pattern
            .iter()
            .flatten()
            .map(|&i| per_pattern[i])
            .sum();
        assert_abs_diff_eq!(expanded, total, epsilon = 1e-12);
    }

    #[test]
    fn invariant_detection() {
        let m = dna_matrix(&[("A", "AAC-"), ("B", "AGC-"), ("C", "AGCA")]);
        let t = three_tip_tree();
        let table = PatternTable::compress(&m, &t, &Default::default()).unwrap();
        let pat = |site: usize| &table.patterns[table.site_to_pattern[site].unwrap()];
        assert_eq!(pat(0).invariant_state, Some(0));
        assert!(!pat(1).is_invariant());
        assert_eq!(pat(2).invariant_state, Some(1));
        // gaps disqualify a column
        assert!(!pat(3).is_invariant());
    }

    #[test]
    fn exclusion_and_expectations() {
        let mut m = dna_matrix(&[("A", "ACGT"), ("B", "ACGT"), ("C", "ACGT")]);
        m.exclude_site(1).unwrap();
        assert_eq!(m.num_included_sites(), 3);
        let t = three_tip_tree();
        let table = PatternTable::compress(&m, &t, &Default::default()).unwrap();
        assert_eq!(table.num_sites(), 3);
        assert_eq!(table.site_to_pattern[1], None);
        assert_eq!(table.expand().len(), 3);

        let strict = CompressionPolicy {
            expected_included_sites: Some(4),
            ..Default::default()
        };
        assert!(PatternTable::compress(&m, &t, &strict).is_err());
        assert!(m.exclude_site(10).is_err());
    }

    #[test]
    fn normalization_policies() {
        let m = dna_matrix(&[("A", "R?"), ("B", "AA"), ("C", "AA")]);
        let t = three_tip_tree();
        let loose = PatternTable::compress(&m, &t, &Default::default()).unwrap();
        let a = loose.tip_position("A").unwrap();
        assert!(loose.patterns[0].states[a].is_ambiguous());
        assert!(!loose.patterns[0].states[a].is_gap());
        assert!(loose.patterns[1].states[a].is_missing());

        let strict = CompressionPolicy {
            treat_ambiguous_as_gap: true,
            ..Default::default()
        };
        let collapsed = PatternTable::compress(&m, &t, &strict).unwrap();
        // both columns collapse to (gap, A, A) and merge
        assert_eq!(collapsed.num_patterns(), 1);
        assert_eq!(collapsed.patterns[0].count, 2);
        assert!(collapsed.patterns[0].states[a].is_gap());
    }

    #[test]
    fn missing_taxon_rejected() {
        let m = dna_matrix(&[("A", "AC"), ("B", "AC")]);
        let t = three_tip_tree();
        assert!(matches!(
            PatternTable::compress(&m, &t, &Default::default()),
            Err(PhyloError::DataFormat(_))
        ));
    }

    #[test]
    fn ragged_matrix_rejected() {
        assert!(CharacterMatrix::from_symbols(
            Alphabet::Dna,
            &[("A", "ACG"), ("B", "AC")]
        )
        .is_err());
    }

    #[test]
    fn block_partitioning() {
        let m = dna_matrix(&[("A", "ACGTACG"), ("B", "ACGTACG"), ("C", "ACGTTTT")]);
        let table = PatternTable::compress(&m, &three_tip_tree(), &Default::default()).unwrap();
        let n = table.num_patterns();
        for n_blocks in 1..=n {
            let blocks = table.blocks(n_blocks);
            assert_eq!(blocks.len(), n_blocks);
            assert_eq!(blocks[0].start, 0);
            assert_eq!(blocks.last().unwrap().end, n);
            for w in blocks.windows(2) {
                assert_eq!(w[0].end, w[1].start);
            }
            let sizes: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
            let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
            assert!(max - min <= 1);
        }
        // more blocks than patterns collapses to one block per pattern
        assert_eq!(table.blocks(100).len(), n);
    }
}
