//!
//! Pomo allele-frequency states and the counts-file format
//!
//! A Pomo state space over `k` alleles and virtual population size `N` has
//! `k + C(k,2)*(N-1)` states: the `k` monomorphic states followed by, for
//! every ordered allele pair `(i, j)` with `i < j`, the `N-1` biallelic
//! frequency bins. Bin offset `o` within a pair block holds `o+1` virtual
//! copies of allele `i` and `N-1-o` of allele `j`.
//!
//! Observed allele counts rarely land exactly on the virtual grid, so
//! parsing spreads probability mass across the compatible bins with a
//! binomial sampling kernel and records it in the state's weight vector.
//!
use super::CharacterState;
use crate::bitset::BitSet;
use crate::error::{PhyloError, Result};
use log::trace;
use serde::{Deserialize, Serialize};

/// Weights below this are clamped up so a near-zero bin cannot zero out a
/// weighted tip sum.
const MIN_WEIGHT: f64 = 1e-8;

///
/// Pomo state space: `k` alleles on a virtual population grid of size `N`.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PomoAlphabet {
    alleles: Vec<char>,
    virtual_population_size: usize,
}

impl PomoAlphabet {
    pub fn new(alleles: &str, virtual_population_size: usize) -> Result<PomoAlphabet> {
        if alleles.chars().count() < 2 || virtual_population_size < 2 {
            return Err(PhyloError::ModelConstraint(format!(
                "Pomo needs >=2 alleles and virtual population size >=2, got {} and {}",
                alleles.chars().count(),
                virtual_population_size
            )));
        }
        Ok(PomoAlphabet {
            alleles: alleles.chars().collect(),
            virtual_population_size,
        })
    }
    ///
    /// The usual nucleotide instantiation (alleles ACGT).
    ///
    pub fn dna(virtual_population_size: usize) -> Result<PomoAlphabet> {
        PomoAlphabet::new("ACGT", virtual_population_size)
    }
    pub fn num_alleles(&self) -> usize {
        self.alleles.len()
    }
    pub fn virtual_population_size(&self) -> usize {
        self.virtual_population_size
    }
    ///
    /// `k + C(k,2)*(N-1)` states.
    ///
    pub fn num_states(&self) -> usize {
        let k = self.alleles.len();
        let n = self.virtual_population_size;
        k + k * (k - 1) / 2 * (n - 1)
    }
    // rank of the pair (i, j), i < j, in lexicographic pair order
    fn pair_rank(&self, i: usize, j: usize) -> usize {
        let k = self.alleles.len();
        i * k - i * (i + 1) / 2 + (j - i - 1)
    }
    ///
    /// First state index of the biallelic block for allele pair `(i, j)`.
    ///
    pub fn block_start(&self, i: usize, j: usize) -> usize {
        self.alleles.len() + self.pair_rank(i, j) * (self.virtual_population_size - 1)
    }
    ///
    /// State index holding `m` virtual copies of allele `i` and `N-m` of
    /// allele `j` (`i < j`). `m == N` is monomorphic `i`, `m == 0`
    /// monomorphic `j`.
    ///
    pub fn frequency_bin(&self, i: usize, j: usize, m: usize) -> Result<usize> {
        let n = self.virtual_population_size;
        if i >= j || j >= self.alleles.len() || m > n {
            return Err(PhyloError::Index {
                index: m,
                len: n + 1,
            });
        }
        Ok(match m {
            0 => j,
            m if m == n => i,
            m => self.block_start(i, j) + (m - 1),
        })
    }
    ///
    /// Human-readable label of a state index, e.g. `A` or `A30C70`
    /// (percentages of the virtual population).
    ///
    pub fn label(&self, index: usize) -> Result<String> {
        let k = self.alleles.len();
        let n = self.virtual_population_size;
        if index < k {
            return Ok(self.alleles[index].to_string());
        }
        if index >= self.num_states() {
            return Err(PhyloError::Index {
                index,
                len: self.num_states(),
            });
        }
        let rank = (index - k) / (n - 1);
        let offset = (index - k) % (n - 1);
        // invert pair_rank
        let mut i = 0;
        let mut rank_left = rank;
        while rank_left >= k - i - 1 {
            rank_left -= k - i - 1;
            i += 1;
        }
        let j = i + rank_left + 1;
        let m = offset + 1;
        Ok(format!(
            "{}{}{}{}",
            self.alleles[i],
            m * 100 / n,
            self.alleles[j],
            (n - m) * 100 / n
        ))
    }

    ///
    /// Parse one counts cell, e.g. `0,1,4,0` meaning 0 A, 1 C, 4 G, 0 T
    /// sampled at this site. All-zero counts are a gap; more than two
    /// non-zero entries violate the biallelic model.
    ///
    pub fn parse_counts(&self, symbol: &str) -> Result<CharacterState> {
        let k = self.alleles.len();
        let fields: Vec<&str> = symbol.split(',').collect();
        if fields.len() != k {
            return Err(PhyloError::DataFormat(format!(
                "Pomo counts '{}' has {} fields, expected one integer per allele ({}), e.g. 0,1,4,0",
                symbol,
                fields.len(),
                k
            )));
        }
        let mut counts = Vec::with_capacity(k);
        for f in &fields {
            let c: usize = f.trim().parse().map_err(|_| {
                PhyloError::DataFormat(format!(
                    "Pomo counts '{}': '{}' is not a non-negative integer",
                    symbol, f
                ))
            })?;
            counts.push(c);
        }
        let observed: Vec<usize> = (0..k).filter(|&i| counts[i] > 0).collect();
        match observed.as_slice() {
            [] => Ok(CharacterState::gap(self.num_states())),
            [a] => Ok(self.monoallelic_state(*a, counts[*a])),
            [i, j] => self.biallelic_state(*i, *j, counts[*i], counts[*j]),
            _ => Err(PhyloError::ModelConstraint(format!(
                "Pomo counts '{}' observe {} alleles; only biallelic sites are supported",
                symbol,
                observed.len()
            ))),
        }
    }

    // A monoallelic sample of `sum` copies of allele `a`. The monomorphic
    // state carries weight 1; every biallelic bin involving `a` carries the
    // probability of drawing `sum` copies of `a` from that bin's frequency.
    fn monoallelic_state(&self, a: usize, sum: usize) -> CharacterState {
        let n = self.virtual_population_size;
        let mut bits = BitSet::new(self.num_states());
        let mut weights = vec![0.0; self.num_states()];
        bits.set(a).unwrap();
        weights[a] = 1.0;
        for b in 0..self.alleles.len() {
            if b == a {
                continue;
            }
            let (i, j) = if a < b { (a, b) } else { (b, a) };
            let start = self.block_start(i, j);
            for o in 0..n - 1 {
                // share of allele `a` in bin `o` of the (i, j) block
                let prop = if a == i {
                    (o + 1) as f64 / n as f64
                } else {
                    (n - 1 - o) as f64 / n as f64
                };
                bits.set(start + o).unwrap();
                weights[start + o] = prop.powi(sum as i32);
            }
        }
        clamp_weights(&mut weights, &bits);
        CharacterState::from_bits(bits).with_weights(weights)
    }

    // A biallelic sample: `num_i` copies of allele `i`, `num_j` of `j`
    // (`i < j`). Mass over the pair's frequency bins follows the binomial
    // kernel; bins of unrelated pairs stay at exactly zero.
    fn biallelic_state(
        &self,
        i: usize,
        j: usize,
        num_i: usize,
        num_j: usize,
    ) -> Result<CharacterState> {
        let n = self.virtual_population_size;
        let sum = num_i + num_j;
        let start = self.block_start(i, j);

        // Nearest grid bin to the observed proportion, keeping at least one
        // virtual copy of the minor allele.
        let m = corrected_count(num_i, sum, n);
        let chosen = start + (m - 1);
        trace!(
            "pomo biallelic {}{}: counts {}/{} -> bin {} (state {})",
            self.alleles[i],
            self.alleles[j],
            num_i,
            num_j,
            m,
            chosen
        );

        let mut bits = BitSet::new(self.num_states());
        let mut weights = vec![0.0; self.num_states()];
        let binom = choose(sum, num_i);
        for o in 0..n - 1 {
            let p = (o + 1) as f64 / n as f64;
            bits.set(start + o)?;
            weights[start + o] = binom * p.powi(num_i as i32) * (1.0 - p).powi(num_j as i32);
        }
        clamp_weights(&mut weights, &bits);
        Ok(CharacterState::from_bits(bits).with_weights(weights))
    }

    ///
    /// Canonical symbol of a Pomo state. Single states print their label;
    /// weighted states print the support and weights so distinct
    /// observations never collide in a pattern key.
    ///
    pub fn symbol(&self, state: &CharacterState) -> String {
        if state.bits().number_set_bits() == 1 && state.weights().is_none() {
            return self
                .label(state.bits().first_set_bit().unwrap())
                .unwrap_or_else(|_| "?".to_string());
        }
        match state.weights() {
            Some(w) => {
                let parts: Vec<String> = state
                    .bits()
                    .iter_set()
                    .map(|s| format!("{}:{:.6e}", s, w[s]))
                    .collect();
                format!("w[{}]", parts.join(" "))
            }
            None => format!("b[{}]", state.bits()),
        }
    }
}

// Round the observed proportion of the first allele onto the virtual grid,
// with a floor of one virtual copy for the minor allele so neither allele
// disappears from a site where it was observed.
fn corrected_count(num_i: usize, sum: usize, n: usize) -> usize {
    let m = if sum == n {
        num_i
    } else {
        (num_i as f64 / sum as f64 * n as f64).round() as usize
    };
    m.clamp(1, n - 1)
}

fn choose(n: usize, k: usize) -> f64 {
    let k = k.min(n - k);
    let mut c = 1.0;
    for i in 0..k {
        c = c * (n - i) as f64 / (i + 1) as f64;
    }
    c
}

fn clamp_weights(weights: &mut [f64], support: &BitSet) {
    for s in support.iter_set() {
        if weights[s] < MIN_WEIGHT {
            weights[s] = MIN_WEIGHT;
        }
    }
}

///
/// One row of a counts file: a genomic coordinate plus one counts cell per
/// population.
///
#[derive(Clone, Debug, PartialEq)]
pub struct CountsSite {
    pub chromosome: String,
    pub position: u64,
    pub states: Vec<CharacterState>,
}

///
/// Parsed allele-count data:
///
/// ```text
/// COUNTSFILE NPOP 2 NSITES 3
/// CHROM POS popA popB
/// chr1 101 0,1,4,0 5,0,0,0
/// ...
/// ```
///
#[derive(Clone, Debug, PartialEq)]
pub struct CountsFile {
    pub populations: Vec<String>,
    pub sites: Vec<CountsSite>,
}

impl CountsFile {
    pub fn parse(text: &str, alphabet: &PomoAlphabet) -> Result<CountsFile> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let header = lines.next().ok_or_else(|| {
            PhyloError::DataFormat("empty counts file, expected a COUNTSFILE header".to_string())
        })?;
        let (n_pop, n_sites) = parse_header(header)?;

        let columns = lines.next().ok_or_else(|| {
            PhyloError::DataFormat("counts file ends before the CHROM POS column line".to_string())
        })?;
        let populations = parse_columns(columns, n_pop)?;

        let mut sites = Vec::with_capacity(n_sites);
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 + n_pop {
                return Err(PhyloError::DataFormat(format!(
                    "counts row '{}' has {} fields, expected CHROM POS plus {} count cells",
                    line,
                    fields.len(),
                    n_pop
                )));
            }
            let position: u64 = fields[1].parse().map_err(|_| {
                PhyloError::DataFormat(format!(
                    "counts row '{}': position '{}' is not an integer",
                    line, fields[1]
                ))
            })?;
            let states = fields[2..]
                .iter()
                .map(|cell| alphabet.parse_counts(cell))
                .collect::<Result<Vec<CharacterState>>>()?;
            sites.push(CountsSite {
                chromosome: fields[0].to_string(),
                position,
                states,
            });
        }
        if sites.len() != n_sites {
            return Err(PhyloError::DataFormat(format!(
                "counts file declares NSITES {} but contains {} rows",
                n_sites,
                sites.len()
            )));
        }
        trace!(
            "parsed counts file: {} populations, {} sites",
            n_pop,
            n_sites
        );
        Ok(CountsFile { populations, sites })
    }

    ///
    /// The per-population character sequences, site-major to taxon-major.
    ///
    pub fn population_sequences(&self) -> Vec<(String, Vec<CharacterState>)> {
        self.populations
            .iter()
            .enumerate()
            .map(|(p, name)| {
                let seq = self.sites.iter().map(|s| s.states[p].clone()).collect();
                (name.clone(), seq)
            })
            .collect()
    }
}

fn parse_header(line: &str) -> Result<(usize, usize)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let err = || {
        PhyloError::DataFormat(format!(
            "bad counts header '{}', expected 'COUNTSFILE NPOP <p> NSITES <n>'",
            line
        ))
    };
    match fields.as_slice() {
        ["COUNTSFILE", "NPOP", p, "NSITES", n] => {
            let n_pop = p.parse().map_err(|_| err())?;
            let n_sites = n.parse().map_err(|_| err())?;
            Ok((n_pop, n_sites))
        }
        _ => Err(err()),
    }
}

fn parse_columns(line: &str, n_pop: usize) -> Result<Vec<String>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 2 + n_pop || fields[0] != "CHROM" || fields[1] != "POS" {
        return Err(PhyloError::DataFormat(format!(
            "bad counts column line '{}', expected 'CHROM POS' plus {} population names",
            line, n_pop
        )));
    }
    Ok(fields[2..].iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn state_space_size() {
        // 4 + 6*(N-1)
        let p = PomoAlphabet::dna(10).unwrap();
        assert_eq!(p.num_states(), 58);
        assert_eq!(PomoAlphabet::dna(2).unwrap().num_states(), 10);
        assert_eq!(PomoAlphabet::new("01", 5).unwrap().num_states(), 6);
    }

    #[test]
    fn block_layout() {
        let p = PomoAlphabet::dna(10).unwrap();
        // pair blocks in order AC AG AT CG CT GT, 9 bins each
        assert_eq!(p.block_start(0, 1), 4);
        assert_eq!(p.block_start(0, 2), 13);
        assert_eq!(p.block_start(0, 3), 22);
        assert_eq!(p.block_start(1, 2), 31);
        assert_eq!(p.block_start(1, 3), 40);
        assert_eq!(p.block_start(2, 3), 49);
        assert_eq!(p.frequency_bin(2, 3, 10).unwrap(), 2);
        assert_eq!(p.frequency_bin(2, 3, 0).unwrap(), 3);
        assert_eq!(p.frequency_bin(2, 3, 1).unwrap(), 49);
        assert_eq!(p.frequency_bin(2, 3, 9).unwrap(), 57);
    }

    #[test]
    fn labels() {
        let p = PomoAlphabet::dna(10).unwrap();
        assert_eq!(p.label(0).unwrap(), "A");
        assert_eq!(p.label(3).unwrap(), "T");
        assert_eq!(p.label(4).unwrap(), "A10C90");
        assert_eq!(p.label(12).unwrap(), "A90C10");
        assert_eq!(p.label(31).unwrap(), "C10G90");
        assert_eq!(p.label(57).unwrap(), "G90T10");
        assert!(p.label(58).is_err());
    }

    #[test]
    fn biallelic_counts_weight_layout() {
        // 0 A, 1 C, 4 G, 0 T: mass lives on the CG block only
        let p = PomoAlphabet::dna(10).unwrap();
        let s = p.parse_counts("0,1,4,0").unwrap();
        let w = s.weights().unwrap();
        let start = p.block_start(1, 2);
        for idx in 0..p.num_states() {
            let in_block = (start..start + 9).contains(&idx);
            assert_eq!(s.bits().is_set(idx), in_block, "state {}", idx);
            if !in_block {
                assert_eq!(w[idx], 0.0, "state {} carries stray weight", idx);
            } else {
                assert!(w[idx] >= MIN_WEIGHT);
            }
        }
        // binomial kernel at bin o: C(5,1) * p^1 * (1-p)^4, p = (o+1)/10
        let expect = |o: usize| {
            let prob = (o + 1) as f64 / 10.0;
            5.0 * prob * (1.0 - prob).powi(4)
        };
        for o in 0..9 {
            assert_abs_diff_eq!(w[start + o], expect(o).max(MIN_WEIGHT), epsilon = 1e-12);
        }
        // mode of the kernel sits at the bin nearest 1/5 of the population
        assert_eq!(corrected_count(1, 5, 10), 2);
    }

    #[test]
    fn monoallelic_counts() {
        let p = PomoAlphabet::dna(10).unwrap();
        let s = p.parse_counts("0,3,0,0").unwrap();
        let w = s.weights().unwrap();
        assert_eq!(w[1], 1.0);
        assert!(s.bits().is_set(1));
        assert!(!s.bits().is_set(0));
        // C share of bin A90C10 is 0.1; weight 0.1^3 = 1e-3
        let ac = p.block_start(0, 1);
        assert_abs_diff_eq!(w[ac + 8], 0.001, epsilon = 1e-12);
        // C share of bin C90G10 is 0.9
        let cg = p.block_start(1, 2);
        assert_abs_diff_eq!(w[cg + 8], 0.9f64.powi(3), epsilon = 1e-12);
        // bins not involving C stay clamped at the floor, not populated
        let gt = p.block_start(2, 3);
        assert_eq!(w[gt], 0.0);
        assert!(!s.bits().is_set(gt));
    }

    #[test]
    fn degenerate_counts() {
        let p = PomoAlphabet::dna(10).unwrap();
        assert!(p.parse_counts("0,0,0,0").unwrap().is_gap());
        assert!(matches!(
            p.parse_counts("1,1,1,0"),
            Err(PhyloError::ModelConstraint(_))
        ));
        assert!(matches!(
            p.parse_counts("0,1,4"),
            Err(PhyloError::DataFormat(_))
        ));
        assert!(matches!(
            p.parse_counts("0,x,4,0"),
            Err(PhyloError::DataFormat(_))
        ));
    }

    #[test]
    fn minor_allele_floor() {
        // one G among 99 A: rounding alone would drop G off the grid
        assert_eq!(corrected_count(99, 100, 10), 9);
        assert_eq!(corrected_count(1, 100, 10), 1);
        assert_eq!(corrected_count(5, 10, 10), 5);
    }

    #[test]
    fn counts_file_round_trip() {
        let text = "\
COUNTSFILE NPOP 2 NSITES 3
CHROM POS popA popB
chr1 101 5,0,0,0 0,1,4,0
chr1 102 0,0,0,0 0,0,2,0
chr2 7 0,3,0,0 0,0,0,4
";
        let p = PomoAlphabet::dna(10).unwrap();
        let f = CountsFile::parse(text, &p).unwrap();
        assert_eq!(f.populations, vec!["popA", "popB"]);
        assert_eq!(f.sites.len(), 3);
        assert_eq!(f.sites[0].chromosome, "chr1");
        assert_eq!(f.sites[2].position, 7);
        assert!(f.sites[1].states[0].is_gap());

        let seqs = f.population_sequences();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].0, "popA");
        assert_eq!(seqs[0].1.len(), 3);
        assert_eq!(seqs[1].1[0], p.parse_counts("0,1,4,0").unwrap());
    }

    #[test]
    fn counts_file_malformed() {
        let p = PomoAlphabet::dna(10).unwrap();
        assert!(matches!(
            CountsFile::parse("", &p),
            Err(PhyloError::DataFormat(_))
        ));
        assert!(CountsFile::parse("COUNTSFILE NPOP x NSITES 1", &p).is_err());
        let missing_rows = "\
COUNTSFILE NPOP 1 NSITES 2
CHROM POS popA
chr1 1 5,0,0,0
";
        assert!(CountsFile::parse(missing_rows, &p).is_err());
        let bad_columns = "\
COUNTSFILE NPOP 1 NSITES 1
CHROMOSOME POS popA
chr1 1 5,0,0,0
";
        assert!(CountsFile::parse(bad_columns, &p).is_err());
    }
}
