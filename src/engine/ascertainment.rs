//!
//! Ascertainment-bias correction
//!
//! When the data-collection process cannot observe some site patterns
//! (an assay keeping only variable sites), the likelihood must be
//! conditioned on a site being observable. The correction evaluates the
//! probability mass of the excluded class through proxy columns run
//! through the same pruning kernels and transition matrices as the real
//! data, and subtracts `ln(1 - P(excluded))` once per site.
//!
use crate::character::CharacterState;
use crate::error::Result;
use crate::matrix::SubstitutionModel;
use crate::prob::Prob;
use log::warn;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::PruningEngine;

/// Below this log-probability the excluded mass is indistinguishable from
/// zero in double precision; the correction degenerates to exactly 0
/// instead of risking catastrophic cancellation in `ln(1 - eps)`.
const LN_PROBABILITY_FLOOR: f64 = -40.0;

///
/// Which site patterns the data-collection process could not observe.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AscertainmentPolicy {
    /// No correction.
    None,
    /// Constant sites were excluded; the proxies are the C possible
    /// constant columns. Assumes no missing data.
    VariableOnly,
    /// Constant sites were excluded and the data contains gaps: one proxy
    /// per (state, observed pattern) so per-taxon missingness is
    /// marginalized correctly.
    VariableOnlyMissingAware,
}

///
/// Total `Σ_patterns count · ln(1 - P(excluded))` under the engine's
/// current model state. The engine subtracts this from the raw
/// log-likelihood.
///
pub(crate) fn correction<M: SubstitutionModel + Clone>(
    engine: &PruningEngine<M>,
) -> Result<f64> {
    match engine.settings().ascertainment {
        AscertainmentPolicy::None => Ok(0.0),
        AscertainmentPolicy::VariableOnly => {
            let n_tips = engine.patterns().tip_order.len();
            let excluded: Prob = (0..engine.num_states())
                .map(|c| engine.column_ln_probability(&constant_column(engine, n_tips, c)))
                .sum();
            Ok(engine.patterns().num_sites() as f64 * correction_term(excluded))
        }
        AscertainmentPolicy::VariableOnlyMissingAware => {
            let mut total = 0.0;
            for pattern in &engine.patterns().patterns {
                let excluded: Prob = (0..engine.num_states())
                    .map(|c| engine.column_ln_probability(&masked_column(&pattern.states, c)))
                    .sum();
                total += pattern.count as f64 * correction_term(excluded);
            }
            Ok(total)
        }
    }
}

// every tip observes state c
fn constant_column<M: SubstitutionModel + Clone>(
    engine: &PruningEngine<M>,
    n_tips: usize,
    c: usize,
) -> Vec<CharacterState> {
    let state =
        CharacterState::from_index(engine.num_states(), c).expect("state index within alphabet");
    vec![state; n_tips]
}

// state c wherever the observed pattern has data, gaps preserved
fn masked_column(observed: &[CharacterState], c: usize) -> Vec<CharacterState> {
    observed
        .iter()
        .map(|s| {
            if s.is_gap() || s.is_missing() {
                CharacterState::gap(s.num_states())
            } else {
                CharacterState::from_index(s.num_states(), c).expect("state index within alphabet")
            }
        })
        .collect()
}

// ln(1 - P(excluded)), clamped to exactly 0 when the excluded mass is
// numerically negligible or degenerate
fn correction_term(excluded: Prob) -> f64 {
    if excluded.is_zero() || excluded.to_log_value() < LN_PROBABILITY_FLOOR {
        return 0.0;
    }
    let term = (-excluded.to_value()).ln_1p();
    if term.is_finite() {
        term
    } else {
        warn!(
            "excluded-pattern mass {} leaves no observable mass; skipping correction",
            excluded.to_value()
        );
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{CharacterMatrix, PatternTable};
    use crate::character::Alphabet;
    use crate::engine::EngineSettings;
    use crate::mocks::{self, JukesCantor};
    use crate::prob::{lp, p};
    use approx::assert_abs_diff_eq;

    fn engine_with(
        rows: &[(&str, &str)],
        ascertainment: AscertainmentPolicy,
    ) -> PruningEngine<JukesCantor> {
        let tree = mocks::three_taxon_tree();
        let matrix = CharacterMatrix::from_symbols(Alphabet::Dna, rows).unwrap();
        let patterns = PatternTable::compress(&matrix, &tree, &Default::default()).unwrap();
        let settings = EngineSettings {
            ascertainment,
            ..Default::default()
        };
        PruningEngine::new(tree, JukesCantor::dna(), patterns, settings).unwrap()
    }

    #[test]
    fn threshold_and_clamping() {
        assert_eq!(correction_term(Prob::zero()), 0.0);
        assert_eq!(correction_term(lp(-41.0)), 0.0);
        assert_abs_diff_eq!(correction_term(p(0.25)), 0.75f64.ln(), epsilon = 1e-15);
        // degenerate: everything excluded
        assert_eq!(correction_term(p(1.0)), 0.0);
    }

    #[test]
    fn correction_raises_the_likelihood() {
        let rows = [("A", "ACGT"), ("B", "AGGT"), ("C", "ACTT")];
        let raw = engine_with(&rows, AscertainmentPolicy::None)
            .compute_ln_likelihood()
            .unwrap();
        let corrected = engine_with(&rows, AscertainmentPolicy::VariableOnly)
            .compute_ln_likelihood()
            .unwrap();
        assert!(corrected > raw);
    }

    #[test]
    fn variable_only_magnitude_matches_manual_conditioning() {
        let rows = [("A", "ACGT"), ("B", "AGGT"), ("C", "ACTT")];
        let mut engine = engine_with(&rows, AscertainmentPolicy::VariableOnly);
        let corrected = engine.compute_ln_likelihood().unwrap();
        let raw = engine_with(&rows, AscertainmentPolicy::None)
            .compute_ln_likelihood()
            .unwrap();

        // P(constant) assembled by hand from the four constant columns
        let excluded: Prob = (0..4)
            .map(|c| {
                let col: Vec<CharacterState> =
                    vec![CharacterState::from_index(4, c).unwrap(); 3];
                engine.column_ln_probability(&col)
            })
            .sum();
        let expected = raw - 4.0 * (-excluded.to_value()).ln_1p();
        assert_abs_diff_eq!(corrected, expected, epsilon = 1e-10);
    }

    #[test]
    fn missing_aware_equals_variable_only_without_gaps() {
        let rows = [("A", "ACGT"), ("B", "AGGT"), ("C", "ACTT")];
        let plain = engine_with(&rows, AscertainmentPolicy::VariableOnly)
            .compute_ln_likelihood()
            .unwrap();
        let aware = engine_with(&rows, AscertainmentPolicy::VariableOnlyMissingAware)
            .compute_ln_likelihood()
            .unwrap();
        assert_abs_diff_eq!(plain, aware, epsilon = 1e-12);
    }

    #[test]
    fn missing_aware_marginalizes_gaps() {
        // with a gapped taxon the missing-aware proxies exclude more mass
        // per affected pattern than the no-gap proxies
        let rows = [("A", "AC-T"), ("B", "AGGT"), ("C", "ACTT")];
        let aware = engine_with(&rows, AscertainmentPolicy::VariableOnlyMissingAware)
            .compute_ln_likelihood()
            .unwrap();
        let blind = engine_with(&rows, AscertainmentPolicy::VariableOnly)
            .compute_ln_likelihood()
            .unwrap();
        assert!(aware.is_finite() && blind.is_finite());
        assert_ne!(aware, blind);
    }
}
