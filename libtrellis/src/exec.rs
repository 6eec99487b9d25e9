// Copyright 2018-2019 Joe Neeman.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// See the LICENSE-APACHE or LICENSE-MIT files at the top-level directory
// of this distribution.

use log::debug;
use trellis_idlist::SortedIdList;

use crate::pipeline::Pipeline;
use crate::plan::{JoinPlan, Stage};
use crate::store::{Direction, GraphStore};
use crate::{Error, VertexId};

// How many prefixes accumulate before the executor recurses into the next stage. Purely a
// memory/locality knob; it is not observable in the output.
const BATCH_SIZE: usize = 64;

/// Counters the executor keeps while running a join.
///
/// `intersection_work` grows by one for every element copied out of the smallest neighbor
/// list of an intersection and for every membership probe against the other lists, so it
/// tracks the cost of the multiway intersections rather than the size of their inputs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecStats {
    /// Total intersection effort, in list elements touched.
    pub intersection_work: u64,
    /// Completed tuples handed to the operator pipeline.
    pub tuples: u64,
}

// Evaluates one join plan against the store, streaming completed tuples into a pipeline.
//
// This is the worst-case-optimal generic join: prefixes are extended one variable at a time,
// and each extension set is the intersection of the neighbor lists the stage's rules select.
// Always starting from the smallest of those lists and probing the others keeps the running
// intersection no larger than the smallest input, which is what makes skewed graphs cheap.
pub(crate) struct GenericJoinExecutor<'a> {
    store: &'a GraphStore,
    plan: &'a JoinPlan,
    stats: ExecStats,
}

impl<'a> GenericJoinExecutor<'a> {
    pub fn new(store: &'a GraphStore, plan: &'a JoinPlan) -> GenericJoinExecutor<'a> {
        GenericJoinExecutor {
            store,
            plan,
            stats: ExecStats::default(),
        }
    }

    // Runs the plan to completion. Tuples reach the pipeline in depth-first enumeration
    // order, ascending within each extension set, modulo the batch boundaries.
    pub fn run(&mut self, out: &mut Pipeline<'_>) -> Result<ExecStats, Error> {
        let store = self.store;
        let plan = self.plan;
        let stage0 = &plan.stages[0];
        let mut batch: Vec<Vec<VertexId>> = Vec::with_capacity(BATCH_SIZE);

        if self.plan.vars.len() == 1 {
            // A single-variable pattern is all self-loops; seed from the first one.
            let seed = stage0.loops[0];
            for (a, b) in store.all_edges(Direction::Forward, seed.version, seed.ty) {
                if a != b {
                    continue;
                }
                if !self.seed_filters(stage0, a, a, None, Some(0)) {
                    continue;
                }
                batch.push(vec![a]);
                if batch.len() == BATCH_SIZE {
                    self.extend(1, &batch, out)?;
                    batch.clear();
                }
            }
        } else {
            let seed = stage0.rules[0];
            for (a, b) in store.all_edges(seed.direction, seed.version, seed.ty) {
                if !self.seed_filters(stage0, a, b, Some(0), None) {
                    continue;
                }
                batch.push(vec![a, b]);
                if batch.len() == BATCH_SIZE {
                    self.extend(1, &batch, out)?;
                    batch.clear();
                }
            }
        }
        if !batch.is_empty() {
            self.extend(1, &batch, out)?;
        }
        debug!(
            "join over {:?} finished: {} tuples, {} intersection work",
            self.plan.vars, self.stats.tuples, self.stats.intersection_work
        );
        Ok(self.stats)
    }

    // Checks the seed stage's remaining constraints over the pair (a, b) bound to the first
    // two positions.
    fn seed_filters(
        &mut self,
        stage: &Stage,
        a: VertexId,
        b: VertexId,
        skip_rule: Option<usize>,
        skip_loop: Option<usize>,
    ) -> bool {
        let prefix = [a, b];
        for (i, r) in stage.rules.iter().enumerate() {
            if Some(i) == skip_rule {
                continue;
            }
            let src = prefix[r.prefix_index];
            self.stats.intersection_work += 1;
            if !self
                .store
                .adjacency(src, r.direction, r.version, r.ty)
                .contains(b)
            {
                return false;
            }
        }
        for (i, l) in stage.loops.iter().enumerate() {
            if Some(i) == skip_loop {
                continue;
            }
            let v = prefix[l.position];
            self.stats.intersection_work += 1;
            if !self
                .store
                .adjacency(v, Direction::Forward, l.version, l.ty)
                .contains(v)
            {
                return false;
            }
        }
        true
    }

    // Extends every prefix in `batch` through stage `stage_idx` and onward. Completed
    // prefixes go to the pipeline; partial batches recurse as soon as they fill.
    fn extend(
        &mut self,
        stage_idx: usize,
        batch: &[Vec<VertexId>],
        out: &mut Pipeline<'_>,
    ) -> Result<(), Error> {
        if stage_idx == self.plan.stages.len() {
            self.stats.tuples += batch.len() as u64;
            return out.push_prefixes(batch);
        }
        let plan = self.plan;
        let stage = &plan.stages[stage_idx];
        let mut next: Vec<Vec<VertexId>> = Vec::with_capacity(BATCH_SIZE);
        for prefix in batch {
            let candidates = self.extension_set(stage, prefix);
            for x in candidates.iter() {
                let mut ext = Vec::with_capacity(prefix.len() + 1);
                ext.extend_from_slice(prefix);
                ext.push(x);
                next.push(ext);
                if next.len() == BATCH_SIZE {
                    self.extend(stage_idx + 1, &next, out)?;
                    next.clear();
                }
            }
        }
        if !next.is_empty() {
            self.extend(stage_idx + 1, &next, out)?;
        }
        Ok(())
    }

    // The intersection of the neighbor lists this stage's rules select for one prefix.
    fn extension_set(&mut self, stage: &Stage, prefix: &[VertexId]) -> SortedIdList {
        let store = self.store;
        let views: Vec<_> = stage
            .rules
            .iter()
            .map(|r| store.adjacency(prefix[r.prefix_index], r.direction, r.version, r.ty))
            .collect();
        let counts: Vec<usize> = views.iter().map(|v| v.count()).collect();
        let min_idx = counts
            .iter()
            .enumerate()
            .min_by_key(|&(_, &c)| c)
            .map(|(i, _)| i)
            .expect("every extension stage has at least one rule");
        if counts[min_idx] == 0 {
            return SortedIdList::new();
        }

        let mut candidates = views[min_idx].to_id_list();
        self.stats.intersection_work += candidates.len() as u64;
        for (i, view) in views.iter().enumerate() {
            if i == min_idx || candidates.is_empty() {
                continue;
            }
            let stats = &mut self.stats;
            candidates.retain(|x| {
                stats.intersection_work += 1;
                view.contains(x)
            });
        }
        for l in &stage.loops {
            let stats = &mut self.stats;
            candidates.retain(|x| {
                stats.intersection_work += 1;
                store
                    .adjacency(x, Direction::Forward, l.version, l.ty)
                    .contains(x)
            });
        }
        candidates
    }
}
