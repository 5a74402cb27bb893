//!
//! Test fixtures: a Jukes-Cantor model, small reference topologies, and a
//! brute-force likelihood that enumerates every joint state assignment.
//!
use crate::alignment::PatternTable;
use crate::engine::EngineSettings;
use crate::matrix::{SubstitutionModel, TransitionMatrix};
use crate::tree::Tree;
use petgraph::graph::NodeIndex;

///
/// Equal-rates substitution model with uniform stationary frequencies.
/// Its transition probabilities have the closed form
/// `P_ii = 1/k + (1-1/k) e^{-kt/(k-1)}` so no eigen machinery is needed.
///
#[derive(Clone, Debug)]
pub struct JukesCantor {
    num_states: usize,
}

impl JukesCantor {
    pub fn new(num_states: usize) -> JukesCantor {
        assert!(num_states >= 2);
        JukesCantor { num_states }
    }
    pub fn dna() -> JukesCantor {
        JukesCantor::new(4)
    }
}

impl SubstitutionModel for JukesCantor {
    fn num_states(&self) -> usize {
        self.num_states
    }
    fn stationary_frequencies(&self) -> Vec<f64> {
        vec![1.0 / self.num_states as f64; self.num_states]
    }
    fn transition_probabilities(&self, branch_length: f64, rate: f64) -> TransitionMatrix {
        let k = self.num_states as f64;
        let t = branch_length * rate;
        let e = (-k * t / (k - 1.0)).exp();
        let same = 1.0 / k + (1.0 - 1.0 / k) * e;
        let diff = 1.0 / k - e / k;
        let mut m = TransitionMatrix::new(self.num_states);
        for i in 0..self.num_states {
            for j in 0..self.num_states {
                m.set(i, j, if i == j { same } else { diff });
            }
        }
        m
    }
}

/// ((A:0.1,B:0.2):0.05,C:0.3);
pub fn three_taxon_tree() -> Tree {
    let mut t = Tree::new();
    let ab = t.add_child(t.root(), None, 0.05);
    t.add_child(ab, Some("A"), 0.1);
    t.add_child(ab, Some("B"), 0.2);
    t.add_child(t.root(), Some("C"), 0.3);
    t
}

/// (((A:0.1,B:0.2):0.05,C:0.3):0.07,D:0.25);
pub fn four_taxon_tree() -> Tree {
    let mut t = Tree::new();
    let abc = t.add_child(t.root(), None, 0.07);
    let ab = t.add_child(abc, None, 0.05);
    t.add_child(ab, Some("A"), 0.1);
    t.add_child(ab, Some("B"), 0.2);
    t.add_child(abc, Some("C"), 0.3);
    t.add_child(t.root(), Some("D"), 0.25);
    t
}

///
/// Reference log-likelihood by exhaustive enumeration.
///
/// Sums over every assignment of a state to every node: the root state is
/// weighted by its stationary frequency, every branch contributes a
/// transition probability, and each tip contributes its observation factor
/// (1 for a gap, the state weight for a matching set bit, 0 otherwise).
/// Mixtures and the invariant-site fraction are folded in exactly as the
/// pruning engine defines them. Exponential in tree size; tests only.
///
pub fn brute_force_ln_likelihood(
    tree: &Tree,
    model: &impl SubstitutionModel,
    patterns: &PatternTable,
    settings: &EngineSettings,
) -> f64 {
    let n = model.num_states();
    let frequencies = model.stationary_frequencies();
    let nodes = tree.post_order();
    let tip_column: Vec<Option<usize>> = nodes
        .iter()
        .map(|&node| {
            tree.name(node)
                .and_then(|name| patterns.tip_position(name))
        })
        .collect();

    let mut ln_likelihood = 0.0;
    for pattern in &patterns.patterns {
        let mut average = 0.0;
        for (&rate, &mixture_weight) in settings
            .mixture_rates
            .iter()
            .zip(settings.mixture_weights.iter())
        {
            let matrices: Vec<Option<TransitionMatrix>> = nodes
                .iter()
                .map(|&node| {
                    tree.branch_length(node)
                        .map(|length| model.transition_probabilities(length, rate))
                })
                .collect();

            let mut total = 0.0;
            let assignments = n.pow(nodes.len() as u32);
            for code in 0..assignments {
                let mut weight = 1.0;
                let mut rest = code;
                for (position, &node) in nodes.iter().enumerate() {
                    let state = rest % n;
                    rest /= n;
                    weight *= match &matrices[position] {
                        Some(matrix) => {
                            let parent = parent_state(tree, &nodes, node, code, n);
                            matrix.get(parent, state)
                        }
                        None => frequencies[state],
                    };
                    if let Some(column) = tip_column[position] {
                        weight *= tip_factor(&pattern.states[column], state);
                    }
                    if weight == 0.0 {
                        break;
                    }
                }
                total += weight;
            }
            average += mixture_weight * total;
        }

        let invariant = pattern
            .invariant_state
            .map_or(0.0, |state| frequencies[state]);
        let site = (1.0 - settings.p_inv) * average + settings.p_inv * invariant;
        ln_likelihood += pattern.count as f64 * site.ln();
    }
    ln_likelihood
}

fn parent_state(tree: &Tree, nodes: &[NodeIndex], node: NodeIndex, code: usize, n: usize) -> usize {
    let parent = tree.parent(node).expect("branch implies a parent");
    let position = nodes.iter().position(|&x| x == parent).unwrap();
    (code / n.pow(position as u32)) % n
}

fn tip_factor(state: &crate::character::CharacterState, assigned: usize) -> f64 {
    if state.is_gap() || state.is_missing() {
        return 1.0;
    }
    if !state.bits().is_set(assigned) {
        return 0.0;
    }
    match state.weights() {
        Some(weights) => weights[assigned],
        None => 1.0,
    }
}
