//!
//! Block-parallel likelihood evaluation
//!
//! Each worker owns a full engine over a contiguous block of patterns.
//! After the workers score their blocks, the partial log-likelihood sums
//! are reduced to one scalar and that scalar is handed back to every
//! worker (a reduce-then-broadcast barrier). `LocalCluster` runs the
//! workers in-process, optionally on a rayon pool; an MPI-style backend
//! would implement the same trait.
//!
use crate::alignment::PatternTable;
use crate::engine::{EngineSettings, PruningEngine};
use crate::error::{PhyloError, Result};
use crate::matrix::SubstitutionModel;
use crate::tree::Tree;
use log::debug;
use petgraph::graph::NodeIndex;
use rayon::prelude::*;

///
/// The coordination contract between likelihood workers: combine each
/// worker's partial sum, then give every worker the combined scalar. A
/// call acts as a barrier; no worker proceeds with a partial view.
///
pub trait ReduceBroadcast {
    fn reduce_broadcast(&self, partial_sums: &[f64]) -> Vec<f64>;
}

///
/// Plain summation, the reduction used for log-likelihoods.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct SumReduce;

impl ReduceBroadcast for SumReduce {
    fn reduce_broadcast(&self, partial_sums: &[f64]) -> Vec<f64> {
        let total: f64 = partial_sums.iter().sum();
        vec![total; partial_sums.len()]
    }
}

///
/// In-process worker pool over contiguous pattern blocks.
///
pub struct LocalCluster<M: SubstitutionModel + Clone, R: ReduceBroadcast = SumReduce> {
    workers: Vec<PruningEngine<M>>,
    reducer: R,
    parallel: bool,
}

impl<M, R> LocalCluster<M, R>
where
    M: SubstitutionModel + Clone + Send + Sync,
    R: ReduceBroadcast,
{
    pub fn new(
        tree: Tree,
        model: M,
        patterns: PatternTable,
        settings: EngineSettings,
        n_workers: usize,
        reducer: R,
    ) -> Result<LocalCluster<M, R>> {
        if n_workers == 0 {
            return Err(PhyloError::ModelConstraint(
                "a cluster needs at least one worker".to_string(),
            ));
        }
        let blocks = patterns.blocks(n_workers);
        let workers = blocks
            .iter()
            .map(|&block| {
                PruningEngine::new(
                    tree.clone(),
                    model.clone(),
                    patterns.subset(block),
                    settings.clone(),
                )
            })
            .collect::<Result<Vec<PruningEngine<M>>>>()?;
        debug!(
            "local cluster: {} workers over {} patterns",
            workers.len(),
            patterns.num_patterns()
        );
        Ok(LocalCluster {
            workers,
            reducer,
            parallel: false,
        })
    }

    ///
    /// Score the blocks on the rayon pool instead of sequentially.
    ///
    pub fn parallel(mut self) -> LocalCluster<M, R> {
        self.parallel = true;
        self
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    ///
    /// Evaluate every block, reduce, broadcast, and return the combined
    /// log-likelihood.
    ///
    pub fn compute_ln_likelihood(&mut self) -> Result<f64> {
        let partials: Vec<f64> = if self.parallel {
            self.workers
                .par_iter_mut()
                .map(|w| w.compute_ln_likelihood())
                .collect::<Result<Vec<f64>>>()?
        } else {
            self.workers
                .iter_mut()
                .map(|w| w.compute_ln_likelihood())
                .collect::<Result<Vec<f64>>>()?
        };
        let broadcast = self.reducer.reduce_broadcast(&partials);
        debug_assert!(broadcast.windows(2).all(|w| w[0] == w[1]));
        Ok(broadcast[0])
    }

    pub fn fire_tree_change_event(&mut self, node: NodeIndex) {
        for w in &mut self.workers {
            w.fire_tree_change_event(node);
        }
    }
    pub fn set_branch_length(&mut self, node: NodeIndex, length: f64) -> Result<()> {
        for w in &mut self.workers {
            w.set_branch_length(node, length)?;
        }
        Ok(())
    }
    pub fn touch_all(&mut self) {
        for w in &mut self.workers {
            w.touch_all();
        }
    }
    pub fn keep(&mut self) {
        for w in &mut self.workers {
            w.keep();
        }
    }
    pub fn restore(&mut self) {
        for w in &mut self.workers {
            w.restore();
        }
    }
    ///
    /// Revert the workers' trees after a rejected branch proposal.
    ///
    pub fn revert_branch_length(&mut self, node: NodeIndex, length: f64) -> Result<()> {
        for w in &mut self.workers {
            w.tree_mut().set_branch_length(node, length)?;
        }
        Ok(())
    }
}
