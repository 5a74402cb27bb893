//!
//! Marginal downpass and ancestral-state sampling
//!
//! After the upward pruning pass, a root-to-tip sweep combines every
//! node's partials with everything outside its subtree. The resulting
//! marginal arrays support two reconstruction modes: independent per-node
//! draws from the marginals, and a joint draw that samples the root over
//! (state, mixture) and propagates conditionally down the tree, copying
//! clamped tip data as-is.
//!
use crate::character::CharacterState;
use crate::error::{PhyloError, Result};
use crate::matrix::SubstitutionModel;
use petgraph::graph::NodeIndex;
use rand::Rng;

use super::PruningEngine;

///
/// Single-slot (node, mixture, pattern, state) array for the downpass.
///
#[derive(Clone, Debug)]
pub(crate) struct MarginalArena {
    values: Vec<f64>,
    node_stride: usize,
    mixture_stride: usize,
    num_states: usize,
}

impl MarginalArena {
    fn new(
        num_nodes: usize,
        num_mixtures: usize,
        num_patterns: usize,
        num_states: usize,
    ) -> MarginalArena {
        let mixture_stride = num_patterns * num_states;
        let node_stride = num_mixtures * mixture_stride;
        MarginalArena {
            values: vec![0.0; num_nodes * node_stride],
            node_stride,
            mixture_stride,
            num_states,
        }
    }
    #[inline]
    fn offset(&self, node: usize, mixture: usize, pattern: usize) -> usize {
        node * self.node_stride + mixture * self.mixture_stride + pattern * self.num_states
    }
    #[inline]
    fn row(&self, node: usize, mixture: usize, pattern: usize) -> &[f64] {
        let o = self.offset(node, mixture, pattern);
        &self.values[o..o + self.num_states]
    }
    #[inline]
    fn row_mut(&mut self, node: usize, mixture: usize, pattern: usize) -> &mut [f64] {
        let o = self.offset(node, mixture, pattern);
        &mut self.values[o..o + self.num_states]
    }
}

impl<M: SubstitutionModel + Clone> PruningEngine<M> {
    ///
    /// Root-to-tip downpass. At the root the marginal is the partial
    /// weighted by the stationary frequencies; below, each node combines
    /// its own partial with the parent's marginal through its branch
    /// matrix. Runs the pruning pass first if anything is dirty.
    ///
    pub fn compute_marginal_likelihoods(&mut self) -> Result<()> {
        self.compute_ln_likelihood()?;
        self.refresh_stale_matrices()?;

        let n_mix = self.num_mixtures();
        let n_pat = self.patterns.num_patterns();
        let n = self.num_states;
        let mut marginals =
            MarginalArena::new(self.tree.num_nodes(), n_mix, n_pat, n);

        let arena = self.arena.as_ref().expect("arena materialized by the pruning pass");
        // pre-order: reversed post-order visits parents before children
        for node in self.tree.post_order().into_iter().rev() {
            let idx = node.index();
            let slot = self.active[idx];
            for m in 0..n_mix {
                for p in 0..n_pat {
                    let partials = arena.partials(slot, idx, m, p);
                    let row = if self.tree.is_root(node) {
                        let f = &self.root_frequencies;
                        partials
                            .iter()
                            .zip(f)
                            .map(|(v, freq)| v * freq)
                            .collect::<Vec<f64>>()
                    } else {
                        let parent = self.tree.parent(node).unwrap().index();
                        let parent_row = marginals.row(parent, m, p).to_vec();
                        let tp = &self.matrices[idx][m];
                        (0..n)
                            .map(|j| {
                                let outer: f64 =
                                    (0..n).map(|k| parent_row[k] * tp.get(k, j)).sum();
                                partials[j] * outer
                            })
                            .collect::<Vec<f64>>()
                    };
                    marginals.row_mut(idx, m, p).copy_from_slice(&row);
                }
            }
        }
        self.marginals = Some(marginals);
        Ok(())
    }

    // mixture-weighted marginal over states of one (node, pattern)
    fn site_marginal(&self, idx: usize, pattern: usize) -> Vec<f64> {
        let marginals = self.marginals.as_ref().expect("downpass ran");
        let mut out = vec![0.0; self.num_states];
        for (m, &w) in self.settings.mixture_weights.iter().enumerate() {
            for (o, v) in out.iter_mut().zip(marginals.row(idx, m, pattern)) {
                *o += w * v;
            }
        }
        out
    }

    ///
    /// Draw one state per included site at `node`, independently from the
    /// node's marginal distribution. Sites sharing a pattern are drawn
    /// separately.
    ///
    pub fn draw_ancestral_states(
        &mut self,
        node: NodeIndex,
        rng: &mut impl Rng,
    ) -> Result<Vec<CharacterState>> {
        if node.index() >= self.tree.num_nodes() {
            return Err(PhyloError::Index {
                index: node.index(),
                len: self.tree.num_nodes(),
            });
        }
        self.compute_marginal_likelihoods()?;
        let idx = node.index();
        let mut out = Vec::with_capacity(self.patterns.num_sites());
        for pattern in self.patterns.site_to_pattern.iter().flatten() {
            let weights = self.site_marginal(idx, *pattern);
            let s = sample_index(&weights, rng);
            out.push(CharacterState::from_index(self.num_states, s)?);
        }
        Ok(out)
    }

    ///
    /// Joint ancestral reconstruction: a categorical draw over
    /// (state, mixture) at the root, then top-down conditional sampling of
    /// every node given its parent's state under the sampled mixture
    /// category. Clamped (unambiguous) tip observations are copied, not
    /// resampled. Returns one state sequence per node, indexed by the
    /// node's dense id, over included sites in site order.
    ///
    pub fn draw_joint_conditional_ancestral_states(
        &mut self,
        rng: &mut impl Rng,
    ) -> Result<Vec<Vec<CharacterState>>> {
        self.compute_ln_likelihood()?;
        self.refresh_stale_matrices()?;

        let n = self.num_states;
        let n_mix = self.num_mixtures();
        let root = self.tree.root();
        let arena = self.arena.as_ref().expect("arena materialized by the pruning pass");

        let included: Vec<usize> = self.patterns.site_to_pattern.iter().flatten().copied().collect();
        let mut states: Vec<Vec<usize>> = vec![vec![0; included.len()]; self.tree.num_nodes()];
        let mut mixtures: Vec<usize> = vec![0; included.len()];

        // root draw over (mixture, state)
        let root_idx = root.index();
        let root_slot = self.active[root_idx];
        for (site, &p) in included.iter().enumerate() {
            let mut weights = vec![0.0; n_mix * n];
            for (m, &w) in self.settings.mixture_weights.iter().enumerate() {
                let partials = arena.partials(root_slot, root_idx, m, p);
                for s in 0..n {
                    weights[m * n + s] = w * self.root_frequencies[s] * partials[s];
                }
            }
            let k = sample_index(&weights, rng);
            mixtures[site] = k / n;
            states[root_idx][site] = k % n;
        }

        // pre-order conditional draws
        for node in self.tree.post_order().into_iter().rev() {
            if self.tree.is_root(node) {
                continue;
            }
            let idx = node.index();
            let parent = self.tree.parent(node).unwrap().index();
            let children = self.tree.children(node);
            for (site, &p) in included.iter().enumerate() {
                let m = mixtures[site];
                let parent_state = states[parent][site];
                let tp = &self.matrices[idx][m];

                if self.tree.is_tip(node) {
                    let pos = self.tip_position[idx].expect("tips always carry data");
                    let obs = &self.patterns.patterns[p].states[pos];
                    if !obs.is_ambiguous() {
                        states[idx][site] = obs.state_index()?;
                        continue;
                    }
                    let weights: Vec<f64> = (0..n)
                        .map(|j| tp.get(parent_state, j) * tip_weight(obs, j))
                        .collect();
                    states[idx][site] = sample_index(&weights, rng);
                } else {
                    let weights: Vec<f64> = (0..n)
                        .map(|j| {
                            let below: f64 = children
                                .iter()
                                .map(|&c| {
                                    let ci = c.index();
                                    arena.partials(self.active[ci], ci, m, p)[j]
                                })
                                .product();
                            tp.get(parent_state, j) * below
                        })
                        .collect();
                    states[idx][site] = sample_index(&weights, rng);
                }
            }
        }

        states
            .into_iter()
            .map(|seq| {
                seq.into_iter()
                    .map(|s| CharacterState::from_index(n, s))
                    .collect()
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn marginal_row(&self, node: NodeIndex, mixture: usize, pattern: usize) -> &[f64] {
        self.marginals
            .as_ref()
            .expect("downpass ran")
            .row(node.index(), mixture, pattern)
    }
}

fn tip_weight(obs: &CharacterState, state: usize) -> f64 {
    if obs.is_gap() || obs.is_missing() {
        return 1.0;
    }
    if !obs.bits().is_set(state) {
        return 0.0;
    }
    match obs.weights() {
        Some(w) => w[state],
        None => 1.0,
    }
}

// cumulative categorical draw; a zero or degenerate total falls back to a
// uniform draw over the states
fn sample_index(weights: &[f64], rng: &mut impl Rng) -> usize {
    let sum: f64 = weights.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return rng.gen_range(0..weights.len());
    }
    let mut u = rng.gen::<f64>() * sum;
    for (i, w) in weights.iter().enumerate() {
        u -= w;
        if u <= 0.0 {
            return i;
        }
    }
    weights.len() - 1
}
