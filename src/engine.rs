//!
//! Felsenstein pruning engine
//!
//! Post-order dynamic program over the tree: every node holds, per mixture
//! category and site pattern, the probability of the data at or below it
//! conditional on the state at its parent-facing branch end. Evaluation is
//! incremental: tree or parameter changes flag the affected path to the
//! root dirty, and only dirty subtrees are rescored. Two buffer slots per
//! node give O(1) rollback of a rejected proposal.
//!
//! The intended proposal lifecycle, driven by an outer sampler:
//!
//! ```text
//! engine.set_branch_length(node, proposed)?;   // touches the path to the root
//! let ln_proposed = engine.compute_ln_likelihood()?;
//! if accept { engine.keep(); } else { engine.restore(); /* revert the tree */ }
//! ```
//!
use crate::alignment::PatternTable;
use crate::character::CharacterState;
use crate::error::{PhyloError, Result};
use crate::matrix::{SubstitutionModel, TransitionMatrix};
use crate::prob::{lp, Prob};
use crate::tree::Tree;
use log::{debug, trace};
use petgraph::graph::NodeIndex;

pub mod ascertainment;
pub mod buffer;
pub mod marginal;

pub use ascertainment::AscertainmentPolicy;
pub use buffer::{LikelihoodArena, Strides};

///
/// Mixture and numerical settings of an engine.
///
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Rate multiplier of each mixture category.
    pub mixture_rates: Vec<f64>,
    /// Prior weight of each category; must sum to 1.
    pub mixture_weights: Vec<f64>,
    /// Proportion of invariant sites, in `[0, 1)`.
    pub p_inv: f64,
    /// Rescale partials at every n-th internal node; `None` disables
    /// underflow protection.
    pub scaling_density: Option<usize>,
    pub ascertainment: AscertainmentPolicy,
}

impl Default for EngineSettings {
    fn default() -> EngineSettings {
        EngineSettings {
            mixture_rates: vec![1.0],
            mixture_weights: vec![1.0],
            p_inv: 0.0,
            scaling_density: None,
            ascertainment: AscertainmentPolicy::None,
        }
    }
}

///
/// The pruning likelihood engine. Owns the tree, the compressed data and
/// the partial-likelihood buffers; consumes transition matrices from the
/// substitution-model collaborator.
///
#[derive(Clone)]
pub struct PruningEngine<M: SubstitutionModel + Clone> {
    tree: Tree,
    model: M,
    patterns: PatternTable,
    settings: EngineSettings,
    root_frequencies: Vec<f64>,
    num_states: usize,
    /// pattern-column position of each tip node, by dense node id
    tip_position: Vec<Option<usize>>,
    /// internal nodes at which rescaling triggers (stable per topology)
    scaling_nodes: Vec<bool>,
    active: Vec<usize>,
    dirty: Vec<bool>,
    changed: Vec<bool>,
    /// per-node per-mixture transition matrices, refreshed when dirty
    matrices: Vec<Vec<TransitionMatrix>>,
    /// a touched node's cached matrices may disagree with the tree after a
    /// rejected proposal is reverted; stale ones are refreshed before any
    /// whole-tree pass (ascertainment proxies, marginals)
    matrix_stale: Vec<bool>,
    arena: Option<LikelihoodArena>,
    marginals: Option<marginal::MarginalArena>,
    ln_likelihood: f64,
    stored_ln_likelihood: f64,
}

impl<M: SubstitutionModel + Clone> PruningEngine<M> {
    pub fn new(
        tree: Tree,
        model: M,
        patterns: PatternTable,
        settings: EngineSettings,
    ) -> Result<PruningEngine<M>> {
        let num_states = model.num_states();
        match tree.root_degree() {
            2 | 3 => {}
            d => {
                return Err(PhyloError::ModelConstraint(format!(
                    "the root must have 2 (rooted) or 3 (unrooted) children, found {}",
                    d
                )))
            }
        }
        if let Some(pattern) = patterns.patterns.first() {
            if let Some(state) = pattern.states.first() {
                if state.num_states() != num_states {
                    return Err(PhyloError::ModelConstraint(format!(
                        "substitution model has {} states but the data has {}",
                        num_states,
                        state.num_states()
                    )));
                }
            }
        }
        if settings.mixture_rates.is_empty()
            || settings.mixture_rates.len() != settings.mixture_weights.len()
        {
            return Err(PhyloError::ModelConstraint(
                "mixture rates and weights must be non-empty and equal length".to_string(),
            ));
        }
        let weight_sum: f64 = settings.mixture_weights.iter().sum();
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(PhyloError::ModelConstraint(format!(
                "mixture weights sum to {}, expected 1",
                weight_sum
            )));
        }
        if !(0.0..1.0).contains(&settings.p_inv) {
            return Err(PhyloError::ModelConstraint(format!(
                "p_inv must lie in [0, 1), got {}",
                settings.p_inv
            )));
        }
        if settings.scaling_density == Some(0) {
            return Err(PhyloError::ModelConstraint(
                "scaling density must be at least 1".to_string(),
            ));
        }
        let root_frequencies = model.stationary_frequencies();
        if root_frequencies.len() != num_states {
            return Err(PhyloError::ModelConstraint(format!(
                "model reports {} states but {} stationary frequencies",
                num_states,
                root_frequencies.len()
            )));
        }

        let n_nodes = tree.num_nodes();
        let mut tip_position = vec![None; n_nodes];
        for tip in tree.tips() {
            let name = tree.name(tip).unwrap_or_default();
            let pos = patterns.tip_position(name).ok_or_else(|| {
                PhyloError::DataFormat(format!("pattern table lacks tree tip '{}'", name))
            })?;
            tip_position[tip.index()] = Some(pos);
        }

        let mut scaling_nodes = vec![false; n_nodes];
        if let Some(density) = settings.scaling_density {
            let mut ordinal = 0;
            for node in tree.post_order() {
                if !tree.is_tip(node) {
                    scaling_nodes[node.index()] = ordinal % density == 0;
                    ordinal += 1;
                }
            }
        }

        let n_mix = settings.mixture_rates.len();
        Ok(PruningEngine {
            matrices: vec![vec![TransitionMatrix::identity(num_states); n_mix]; n_nodes],
            matrix_stale: vec![true; n_nodes],
            active: vec![0; n_nodes],
            dirty: vec![true; n_nodes],
            changed: vec![false; n_nodes],
            arena: None,
            marginals: None,
            ln_likelihood: f64::NEG_INFINITY,
            stored_ln_likelihood: f64::NEG_INFINITY,
            tree,
            model,
            patterns,
            settings,
            root_frequencies,
            num_states,
            tip_position,
            scaling_nodes,
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }
    ///
    /// Mutable access to the owned tree. The caller must follow any edit
    /// with `fire_tree_change_event` on the affected nodes -- except when
    /// reverting a rejected proposal after `restore`, where the buffers
    /// already hold the pre-proposal values.
    ///
    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }
    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }
    pub fn model(&self) -> &M {
        &self.model
    }
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
    pub fn num_mixtures(&self) -> usize {
        self.settings.mixture_rates.len()
    }

    ///
    /// Change a branch length and flag the affected path dirty.
    ///
    pub fn set_branch_length(&mut self, node: NodeIndex, length: f64) -> Result<()> {
        self.tree.set_branch_length(node, length)?;
        self.fire_tree_change_event(node);
        Ok(())
    }

    ///
    /// Tree-change notification: recursively marks `node` and its ancestors
    /// dirty. Idempotent. The first time a node is touched since the last
    /// `keep`, its active buffer slot flips so the retained slot keeps the
    /// last-accepted partials.
    ///
    pub fn fire_tree_change_event(&mut self, node: NodeIndex) {
        let idx = node.index();
        self.matrix_stale[idx] = true;
        if self.dirty[idx] {
            return;
        }
        self.dirty[idx] = true;
        if !self.changed[idx] {
            self.changed[idx] = true;
            self.active[idx] = 1 - self.active[idx];
        }
        if let Some(parent) = self.tree.parent(node) {
            self.fire_tree_change_event(parent);
        }
    }

    ///
    /// Alias for `fire_tree_change_event`, the vocabulary used by
    /// parameter-change notifications.
    ///
    pub fn touch(&mut self, node: NodeIndex) {
        self.fire_tree_change_event(node);
    }

    ///
    /// Flag the entire tree dirty, e.g. after a substitution-model or
    /// mixture parameter change.
    ///
    pub fn touch_all(&mut self) {
        for node in self.tree.post_order() {
            let idx = node.index();
            self.matrix_stale[idx] = true;
            if !self.dirty[idx] {
                self.dirty[idx] = true;
                if !self.changed[idx] {
                    self.changed[idx] = true;
                    self.active[idx] = 1 - self.active[idx];
                }
            }
        }
    }

    ///
    /// Replace the substitution model and flag everything dirty.
    ///
    pub fn set_model(&mut self, model: M) -> Result<()> {
        if model.num_states() != self.num_states {
            return Err(PhyloError::ModelConstraint(format!(
                "replacement model has {} states, engine was built for {}",
                model.num_states(),
                self.num_states
            )));
        }
        self.root_frequencies = model.stationary_frequencies();
        self.model = model;
        self.touch_all();
        Ok(())
    }

    ///
    /// Accept the current proposal: clear all flags and commit the current
    /// log-likelihood as the rollback target.
    ///
    pub fn keep(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = false);
        self.changed.iter_mut().for_each(|c| *c = false);
        self.stored_ln_likelihood = self.ln_likelihood;
    }

    ///
    /// Reject the current proposal: flip every touched node's active slot
    /// back to the retained buffer and revert the log-likelihood. Correct
    /// even though slots flipped eagerly at touch time, because the
    /// retained slot was never written since the last `keep`.
    ///
    pub fn restore(&mut self) {
        for idx in 0..self.changed.len() {
            if self.changed[idx] {
                self.active[idx] = 1 - self.active[idx];
                self.changed[idx] = false;
            }
            self.dirty[idx] = false;
        }
        self.ln_likelihood = self.stored_ln_likelihood;
    }

    ///
    /// The pruning pass: rescore dirty subtrees bottom-up, reduce at the
    /// root, and apply the ascertainment-bias correction.
    ///
    pub fn compute_ln_likelihood(&mut self) -> Result<f64> {
        if self.arena.is_none() {
            self.arena = Some(LikelihoodArena::new(
                self.tree.num_nodes(),
                self.num_mixtures(),
                self.patterns.num_patterns(),
                self.num_states,
            ));
            self.dirty.iter_mut().for_each(|d| *d = true);
            debug!(
                "materialized likelihood arena: {} nodes x {} mixtures x {} patterns x {} states",
                self.tree.num_nodes(),
                self.num_mixtures(),
                self.patterns.num_patterns(),
                self.num_states
            );
        }
        if !self.dirty.iter().any(|&d| d) {
            return Ok(self.ln_likelihood);
        }

        for node in self.tree.post_order() {
            let idx = node.index();
            if !self.dirty[idx] {
                continue;
            }
            if self.tree.is_root(node) {
                self.fill_root(node);
            } else {
                self.refresh_matrices(node)?;
                if self.tree.is_tip(node) {
                    self.fill_tip(node);
                } else {
                    self.fill_internal(node);
                }
            }
            self.dirty[idx] = false;
        }

        let raw = self.reduce_root();
        if self.settings.ascertainment != AscertainmentPolicy::None {
            self.refresh_stale_matrices()?;
        }
        let correction = ascertainment::correction(self)?;
        self.ln_likelihood = raw - correction;
        trace!(
            "ln likelihood {} (raw {}, ascertainment correction {})",
            self.ln_likelihood,
            raw,
            correction
        );
        Ok(self.ln_likelihood)
    }

    // recompute this node's per-mixture matrices from the current branch
    // length
    fn refresh_matrices(&mut self, node: NodeIndex) -> Result<()> {
        let length = self.tree.branch_length(node).ok_or_else(|| {
            PhyloError::ModelConstraint("cannot refresh matrices for the root".to_string())
        })?;
        let idx = node.index();
        for (m, &rate) in self.settings.mixture_rates.iter().enumerate() {
            let tp = self.model.transition_probabilities(length, rate);
            if tp.num_states() != self.num_states {
                return Err(PhyloError::ModelConstraint(format!(
                    "model produced a {}-state matrix for a {}-state engine",
                    tp.num_states(),
                    self.num_states
                )));
            }
            self.matrices[idx][m] = tp;
        }
        self.matrix_stale[idx] = false;
        Ok(())
    }

    // bring every cached matrix back in line with the current tree
    pub(crate) fn refresh_stale_matrices(&mut self) -> Result<()> {
        for node in self.tree.post_order() {
            if !self.tree.is_root(node) && self.matrix_stale[node.index()] {
                self.refresh_matrices(node)?;
            }
        }
        Ok(())
    }

    // likelihood of one tip's observation conditional on each parent state
    fn fill_tip(&mut self, node: NodeIndex) {
        let idx = node.index();
        let slot = self.active[idx];
        let pos = self.tip_position[idx].expect("tips always carry data");
        let n = self.num_states;
        for m in 0..self.num_mixtures() {
            for p in 0..self.patterns.num_patterns() {
                let obs = &self.patterns.patterns[p].states[pos];
                let mut row = vec![0.0; n];
                let tp = &self.matrices[idx][m];
                if obs.is_gap() || obs.is_missing() {
                    row.fill(1.0);
                } else if let Some(weights) = obs.weights() {
                    for (c, r) in row.iter_mut().enumerate() {
                        *r = obs.bits().iter_set().map(|s| tp.get(c, s) * weights[s]).sum();
                    }
                } else if obs.bits().number_set_bits() == 1 {
                    let s = obs.bits().first_set_bit().unwrap();
                    for (c, r) in row.iter_mut().enumerate() {
                        *r = tp.get(c, s);
                    }
                } else {
                    for (c, r) in row.iter_mut().enumerate() {
                        *r = obs.bits().iter_set().map(|s| tp.get(c, s)).sum();
                    }
                }
                let arena = self.arena.as_mut().unwrap();
                arena.partials_mut(slot, idx, m, p).copy_from_slice(&row);
            }
        }
        let arena = self.arena.as_mut().unwrap();
        for p in 0..self.patterns.num_patterns() {
            arena.set_scale(slot, idx, p, 0.0);
        }
    }

    // combine the children below this node through its own branch matrix
    fn fill_internal(&mut self, node: NodeIndex) {
        let idx = node.index();
        let slot = self.active[idx];
        let children = self.tree.children(node);
        let n = self.num_states;
        for m in 0..self.num_mixtures() {
            for p in 0..self.patterns.num_patterns() {
                let below = self.product_of_children(&children, m, p);
                let tp = &self.matrices[idx][m];
                let mut row = vec![0.0; n];
                for (i, r) in row.iter_mut().enumerate() {
                    let tp_row = tp.row(i);
                    *r = (0..n).map(|j| tp_row[j] * below[j]).sum();
                }
                let arena = self.arena.as_mut().unwrap();
                arena.partials_mut(slot, idx, m, p).copy_from_slice(&row);
            }
        }
        self.accumulate_scale(node, &children);
    }

    // the root has no branch; its buffer holds the plain product of its
    // children's partials (two rooted, three unrooted)
    fn fill_root(&mut self, node: NodeIndex) {
        let idx = node.index();
        let slot = self.active[idx];
        let children = self.tree.children(node);
        for m in 0..self.num_mixtures() {
            for p in 0..self.patterns.num_patterns() {
                let below = self.product_of_children(&children, m, p);
                let arena = self.arena.as_mut().unwrap();
                arena.partials_mut(slot, idx, m, p).copy_from_slice(&below);
            }
        }
        self.accumulate_scale(node, &children);
    }

    fn product_of_children(&self, children: &[NodeIndex], m: usize, p: usize) -> Vec<f64> {
        let arena = self.arena.as_ref().unwrap();
        let mut below = vec![1.0; self.num_states];
        for &child in children {
            let c = child.index();
            let vals = arena.partials(self.active[c], c, m, p);
            for (b, v) in below.iter_mut().zip(vals) {
                *b *= v;
            }
        }
        below
    }

    // scale bookkeeping: a node's log factor is the sum of its children's,
    // plus ln(max) when rescaling triggers here; the buffer then stores the
    // true value divided by e^factor
    fn accumulate_scale(&mut self, node: NodeIndex, children: &[NodeIndex]) {
        let idx = node.index();
        let slot = self.active[idx];
        let rescale_here = self.scaling_nodes[idx];
        let n_mix = self.num_mixtures();
        let child_slots: Vec<(usize, usize)> = children
            .iter()
            .map(|&c| (self.active[c.index()], c.index()))
            .collect();
        let arena = self.arena.as_mut().unwrap();
        for p in 0..self.patterns.num_patterns() {
            let mut factor: f64 = child_slots
                .iter()
                .map(|&(s, c)| arena.scale(s, c, p))
                .sum();
            if rescale_here {
                let mut max = 0.0f64;
                for m in 0..n_mix {
                    for &v in arena.partials(slot, idx, m, p) {
                        if v > max {
                            max = v;
                        }
                    }
                }
                if max > 0.0 && max.is_finite() {
                    for m in 0..n_mix {
                        for v in arena.partials_mut(slot, idx, m, p) {
                            *v /= max;
                        }
                    }
                    factor += max.ln();
                }
            }
            arena.set_scale(slot, idx, p, factor);
        }
    }

    // root reduction over mixture weights, root frequencies and the
    // invariant-sites component, weighted by pattern counts
    fn reduce_root(&self) -> f64 {
        let root = self.tree.root().index();
        let slot = self.active[root];
        let arena = self.arena.as_ref().unwrap();
        let f = &self.root_frequencies;
        let p_inv = self.settings.p_inv;
        let mut total = 0.0;
        for (p, pattern) in self.patterns.patterns.iter().enumerate() {
            let mut stored_avg = 0.0;
            for (m, &w) in self.settings.mixture_weights.iter().enumerate() {
                let vals = arena.partials(slot, root, m, p);
                let per: f64 = vals.iter().zip(f).map(|(v, freq)| v * freq).sum();
                stored_avg += w * per;
            }
            // stored values are true * e^-factor
            let factor = arena.scale(slot, root, p);
            let mut site = lp((1.0 - p_inv).ln() + stored_avg.ln() + factor);
            if p_inv > 0.0 {
                if let Some(inv) = pattern.invariant_state {
                    site = site + lp(p_inv.ln() + f[inv].ln());
                }
            }
            total += (site * pattern.count).to_log_value();
        }
        total
    }

    ///
    /// Log-probability of one whole column under the current model state,
    /// mixture-averaged with the invariant-sites component. Used by the
    /// ascertainment proxies; `column` follows the pattern-table tip order.
    ///
    pub(crate) fn column_ln_probability(&self, column: &[CharacterState]) -> Prob {
        let f = &self.root_frequencies;
        let p_inv = self.settings.p_inv;
        let mut avg = 0.0;
        for (m, &w) in self.settings.mixture_weights.iter().enumerate() {
            let below = self.column_partials(self.tree.root(), m, column);
            let per: f64 = below.iter().zip(f).map(|(v, freq)| v * freq).sum();
            avg += w * per;
        }
        let mut site = lp((1.0 - p_inv).ln() + avg.ln());
        if p_inv > 0.0 {
            if let Some(inv) = column_invariant_state(column) {
                site = site + lp(p_inv.ln() + f[inv].ln());
            }
        }
        site
    }

    // the same pruning kernels as the buffered pass, evaluated recursively
    // on an ad-hoc column (no arena, no rescaling)
    fn column_partials(&self, node: NodeIndex, m: usize, column: &[CharacterState]) -> Vec<f64> {
        let idx = node.index();
        let n = self.num_states;
        if self.tree.is_root(node) {
            let mut below = vec![1.0; n];
            for child in self.tree.children(node) {
                let vals = self.column_partials(child, m, column);
                for (b, v) in below.iter_mut().zip(vals) {
                    *b *= v;
                }
            }
            return below;
        }
        let tp = &self.matrices[idx][m];
        if self.tree.is_tip(node) {
            let obs = &column[self.tip_position[idx].expect("tips always carry data")];
            let mut row = vec![0.0; n];
            if obs.is_gap() || obs.is_missing() {
                row.fill(1.0);
            } else if let Some(weights) = obs.weights() {
                for (c, r) in row.iter_mut().enumerate() {
                    *r = obs.bits().iter_set().map(|s| tp.get(c, s) * weights[s]).sum();
                }
            } else {
                for (c, r) in row.iter_mut().enumerate() {
                    *r = obs.bits().iter_set().map(|s| tp.get(c, s)).sum();
                }
            }
            return row;
        }
        let mut below = vec![1.0; n];
        for child in self.tree.children(node) {
            let vals = self.column_partials(child, m, column);
            for (b, v) in below.iter_mut().zip(vals) {
                *b *= v;
            }
        }
        let mut row = vec![0.0; n];
        for (i, r) in row.iter_mut().enumerate() {
            let tp_row = tp.row(i);
            *r = (0..n).map(|j| tp_row[j] * below[j]).sum();
        }
        row
    }

    pub(crate) fn num_states(&self) -> usize {
        self.num_states
    }
    pub(crate) fn root_frequencies(&self) -> &[f64] {
        &self.root_frequencies
    }
    pub(crate) fn arena(&self) -> Option<&LikelihoodArena> {
        self.arena.as_ref()
    }
    pub(crate) fn active_slot(&self, idx: usize) -> usize {
        self.active[idx]
    }
    pub(crate) fn transition_matrix(&self, idx: usize, mixture: usize) -> &TransitionMatrix {
        &self.matrices[idx][mixture]
    }
    pub(crate) fn tip_pattern_position(&self, idx: usize) -> Option<usize> {
        self.tip_position[idx]
    }
}

fn column_invariant_state(column: &[CharacterState]) -> Option<usize> {
    let mut shared = None;
    for state in column {
        if state.is_gap() || state.is_missing() {
            continue;
        }
        let s = state.state_index().ok()?;
        match shared {
            None => shared = Some(s),
            Some(prev) if prev == s => {}
            Some(_) => return None,
        }
    }
    shared
}
