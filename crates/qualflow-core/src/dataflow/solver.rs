//! Worklist-based fixpoint solver for forward analyses

use super::cfg::{BasicBlock, BlockId, Cfg, Terminator};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// What a block's transfer produced: one fact, or one per branch of its terminator
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutput<F> {
    Regular(F),
    Conditional { then_fact: F, else_fact: F },
}

/// Generic trait for forward dataflow analyses
pub trait DataflowAnalysis {
    /// The type of facts being propagated
    type Fact: Clone;
    type Error;

    /// Fact at the entry block
    fn initial_fact(&self) -> Self::Fact;

    /// Merge facts arriving over two edges
    fn join(&self, a: &Self::Fact, b: &Self::Fact) -> Self::Fact;

    /// True when `current` already accounts for `incoming`, so propagating it changes nothing
    fn covers(&self, current: &Self::Fact, incoming: &Self::Fact) -> bool;

    fn transfer(&mut self, block: &BasicBlock, input: &Self::Fact) -> Result<BlockOutput<Self::Fact>, Self::Error>;
}

#[derive(Debug)]
pub struct FixpointResult<F> {
    /// Facts at entry of each reachable block
    pub in_facts: HashMap<BlockId, F>,
    /// Number of block visits
    pub iterations: usize,
    /// False if the visit limit was hit first
    pub converged: bool,
}

/// Worklist-based fixpoint solver
#[derive(Debug, Clone, Copy)]
pub struct FixpointSolver {
    max_visits: usize,
}

impl FixpointSolver {
    pub fn new(max_visits: usize) -> Self {
        Self { max_visits }
    }

    pub fn solve<A: DataflowAnalysis>(
        &self,
        analysis: &mut A,
        cfg: &Cfg,
    ) -> Result<FixpointResult<A::Fact>, A::Error> {
        let mut in_facts: HashMap<BlockId, A::Fact> = HashMap::new();
        in_facts.insert(cfg.entry, analysis.initial_fact());

        // Initialize worklist with blocks in reverse postorder
        let order = cfg.reverse_postorder();
        let priority: HashMap<BlockId, usize> = order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let mut worklist: VecDeque<BlockId> = VecDeque::from([cfg.entry]);
        let mut in_worklist: HashSet<BlockId> = HashSet::from([cfg.entry]);

        let mut iterations = 0;
        let mut converged = true;

        while let Some(block_id) = worklist.pop_front() {
            in_worklist.remove(&block_id);
            iterations += 1;
            if iterations > self.max_visits {
                converged = false;
                break;
            }

            let Some(block) = cfg.blocks.get(&block_id) else {
                continue;
            };
            let Some(input) = in_facts.get(&block_id).cloned() else {
                continue;
            };

            trace!(block = block_id.0, "transfer");
            let output = analysis.transfer(block, &input)?;

            let edges: Vec<(BlockId, A::Fact)> = match (&block.terminator, output) {
                (
                    Some(Terminator::Branch {
                        then_block,
                        else_block,
                        ..
                    }),
                    BlockOutput::Conditional { then_fact, else_fact },
                ) => vec![(*then_block, then_fact), (*else_block, else_fact)],
                (_, BlockOutput::Regular(fact)) => {
                    block.successors.iter().map(|s| (*s, fact.clone())).collect()
                }
                (_, BlockOutput::Conditional { then_fact, else_fact }) => {
                    let fact = analysis.join(&then_fact, &else_fact);
                    block.successors.iter().map(|s| (*s, fact.clone())).collect()
                }
            };

            for (succ, fact) in edges {
                let changed = match in_facts.get(&succ) {
                    None => {
                        in_facts.insert(succ, fact);
                        true
                    }
                    Some(current) if analysis.covers(current, &fact) => false,
                    Some(current) => {
                        let merged = analysis.join(current, &fact);
                        in_facts.insert(succ, merged);
                        true
                    }
                };
                if changed && in_worklist.insert(succ) {
                    // Keep reverse postorder among pending blocks
                    let rank = priority.get(&succ).copied().unwrap_or(usize::MAX);
                    let pos = worklist
                        .iter()
                        .position(|b| priority.get(b).copied().unwrap_or(usize::MAX) > rank)
                        .unwrap_or(worklist.len());
                    worklist.insert(pos, succ);
                }
            }
        }

        debug!(iterations, converged, blocks = in_facts.len(), "fixpoint");
        Ok(FixpointResult {
            in_facts,
            iterations,
            converged,
        })
    }
}
