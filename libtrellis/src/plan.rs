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

use std::fmt;

use crate::pipeline::{self, Operator};
use crate::query::{QueryGraph, StructuredQuery};
use crate::registry::{TypeFilter, TypeRegistry};
use crate::store::{Direction, Version};
use crate::Error;

/// How a tuple written to a sink came about.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResultTag {
    /// Produced by a one-time match against the permanent graph.
    Matched,
    /// A motif that appears once the staged changes are committed.
    Emerged,
    /// A motif that disappears once the staged changes are committed.
    Deleted,
}

impl ResultTag {
    /// The canonical upper-case name of the tag.
    pub fn name(self) -> &'static str {
        match self {
            ResultTag::Matched => "MATCHED",
            ResultTag::Emerged => "EMERGED",
            ResultTag::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ResultTag {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

// One intersection constraint: the vertex being bound must be a neighbor (under `direction`,
// `version` and `ty`) of the already-bound vertex at `prefix_index`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct IntersectionRule {
    pub prefix_index: usize,
    pub direction: Direction,
    pub version: Version,
    pub ty: TypeFilter,
}

// A self-loop constraint: the vertex bound at `position` must have an edge to itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct LoopRule {
    pub position: usize,
    pub version: Version,
    pub ty: TypeFilter,
}

// The constraints that bind one more variable. Stage 0 is the seed stage: its first rule is
// enumerated as whole edges (binding two variables at once) and the remaining rules act as
// filters over the pair.
#[derive(Clone, Debug, Default)]
pub(crate) struct Stage {
    pub rules: Vec<IntersectionRule>,
    pub loops: Vec<LoopRule>,
}

// A pattern edge re-expressed over prefix positions, for edge-id resolution and property
// lookups after the join.
#[derive(Clone, Debug)]
pub(crate) struct PlanEdge {
    pub from_pos: usize,
    pub to_pos: usize,
    pub ty: TypeFilter,
    pub var: Option<String>,
}

// One executable join: a variable order, the stages that bind it, and the tag its tuples
// carry. Plans are plain data; executing one does not mutate it.
#[derive(Clone, Debug)]
pub(crate) struct JoinPlan {
    pub vars: Vec<String>,
    pub stages: Vec<Stage>,
    pub edges: Vec<PlanEdge>,
    pub tag: ResultTag,
}

/// A compiled one-time match: a single join over the permanent graph, plus the operator
/// chain its tuples flow through. Stateless after construction; may be cached and re-run.
#[derive(Clone, Debug)]
pub struct OneTimeMatchPlan {
    pub(crate) join: JoinPlan,
    pub(crate) ops: Vec<Operator>,
}

/// A compiled continuous match: one pair of delta joins per pattern edge, the first of each
/// pair reporting motifs that emerge with the staged additions, the second motifs that
/// disappear with the staged deletions.
#[derive(Clone, Debug)]
pub struct ContinuousMatchPlan {
    pub(crate) deltas: Vec<(JoinPlan, Vec<Operator>)>,
}

/// Compiles a one-time match plan. All validation happens here; on error no partial plan
/// escapes.
pub fn plan_one_time(
    query: &StructuredQuery,
    registry: &TypeRegistry,
) -> Result<OneTimeMatchPlan, Error> {
    let g = QueryGraph::build(query, registry)?;
    let ordered = order_vars(&g, None);
    let stages = build_stages(&g, &ordered, |_| Version::Permanent, None);
    let join = make_join(query, &g, &ordered, stages, ResultTag::Matched);
    let ops = pipeline::compile(query, &join, registry)?;
    Ok(OneTimeMatchPlan { join, ops })
}

/// Compiles a continuous match plan: for a pattern with `n` edges, `2n` delta joins.
///
/// Delta `i` designates pattern edge `i` as the diff relation. Edges before it read the
/// merged view, edge `i` reads a diff view, and edges after it read the permanent view, so
/// every changed motif is reported exactly once — by the delta whose diff relation is the
/// first changed edge it contains.
pub fn plan_continuous(
    query: &StructuredQuery,
    registry: &TypeRegistry,
) -> Result<ContinuousMatchPlan, Error> {
    if !query.aggregations.is_empty() {
        return Err(Error::ContinuousAggregation);
    }
    let g = QueryGraph::build(query, registry)?;
    let mut deltas = Vec::with_capacity(2 * g.edges.len());
    for (i, diff_edge) in g.edges.iter().enumerate() {
        let ordered = order_vars(&g, Some((diff_edge.from, diff_edge.to)));
        for (diff_version, tag) in [
            (Version::DiffPlus, ResultTag::Emerged),
            (Version::DiffMinus, ResultTag::Deleted),
        ] {
            let version_of = |j: usize| {
                if j < i {
                    Version::Merged
                } else if j == i {
                    diff_version
                } else {
                    Version::Permanent
                }
            };
            let stages = build_stages(&g, &ordered, version_of, Some(i));
            let join = make_join(query, &g, &ordered, stages, tag);
            let ops = pipeline::compile(query, &join, registry)?;
            deltas.push((join, ops));
        }
    }
    Ok(ContinuousMatchPlan { deltas })
}

// Picks the variable binding order.
//
// With no seed, start from the variable of maximum degree (ties to the lexicographically
// smallest name). With a seed — the endpoints of a delta's diff relation — start from those.
// Either way, the remaining variables are appended greedily: most pattern edges into the
// covered set first, then degree, then smallest name. The whole thing is deterministic.
fn order_vars(g: &QueryGraph, seed: Option<(usize, usize)>) -> Vec<usize> {
    let n = g.vars.len();
    let mut covered = vec![false; n];
    let mut ordered = Vec::with_capacity(n);

    match seed {
        Some((from, to)) => {
            ordered.push(from);
            covered[from] = true;
            if to != from {
                ordered.push(to);
                covered[to] = true;
            }
        }
        None => {
            let v0 = (0..n)
                .max_by(|&a, &b| {
                    g.degree(a)
                        .cmp(&g.degree(b))
                        .then_with(|| g.vars[b].cmp(&g.vars[a]))
                })
                .expect("patterns have at least one variable");
            ordered.push(v0);
            covered[v0] = true;
        }
    }

    while ordered.len() < n {
        let connections = |v: usize| {
            g.incident[v]
                .iter()
                .filter(|&&ei| {
                    let e = &g.edges[ei];
                    !e.is_loop() && covered[e.other(v)]
                })
                .count()
        };
        let next = (0..n)
            .filter(|&v| !covered[v])
            .max_by(|&a, &b| {
                connections(a)
                    .cmp(&connections(b))
                    .then_with(|| g.degree(a).cmp(&g.degree(b)))
                    .then_with(|| g.vars[b].cmp(&g.vars[a]))
            })
            .expect("the loop condition guarantees an uncovered variable");
        ordered.push(next);
        covered[next] = true;
    }
    ordered
}

// Assigns every pattern edge to the stage where its later endpoint is bound. `seed_edge`
// (the diff relation of a delta join) is moved to the front of stage 0 so that the executor
// enumerates the diff relation rather than probing it.
fn build_stages(
    g: &QueryGraph,
    ordered: &[usize],
    version_of: impl Fn(usize) -> Version,
    seed_edge: Option<usize>,
) -> Vec<Stage> {
    let mut pos = vec![0; g.vars.len()];
    for (p, &v) in ordered.iter().enumerate() {
        pos[v] = p;
    }

    let num_stages = if ordered.len() == 1 { 1 } else { ordered.len() - 1 };
    let mut stages: Vec<Stage> = vec![Stage::default(); num_stages];
    // Remember which pattern edge each stage-0 rule came from, to put the seed first.
    let mut stage0_sources: Vec<usize> = Vec::new();

    for (ei, e) in g.edges.iter().enumerate() {
        let version = version_of(ei);
        if e.is_loop() {
            let p = pos[e.from];
            let stage = if p <= 1 { 0 } else { p - 1 };
            stages[stage].loops.push(LoopRule {
                position: p,
                version,
                ty: e.ty,
            });
            if seed_edge == Some(ei) && ordered.len() == 1 {
                // A single-variable pattern seeds from its diff loop; keep it first.
                let last = stages[0].loops.len() - 1;
                stages[0].loops.swap(0, last);
            }
        } else {
            let (pf, pt) = (pos[e.from], pos[e.to]);
            let (earlier, later) = if pf < pt { (pf, pt) } else { (pt, pf) };
            let stage = if later == 1 { 0 } else { later - 1 };
            let direction = if pf == earlier {
                Direction::Forward
            } else {
                Direction::Backward
            };
            stages[stage].rules.push(IntersectionRule {
                prefix_index: earlier,
                direction,
                version,
                ty: e.ty,
            });
            if stage == 0 {
                stage0_sources.push(ei);
            }
        }
    }

    if let Some(seed) = seed_edge {
        if let Some(idx) = stage0_sources.iter().position(|&ei| ei == seed) {
            stages[0].rules.swap(0, idx);
        }
    }

    debug_assert!(
        stages
            .iter()
            .skip(1)
            .all(|s| !s.rules.is_empty()),
        "a connected pattern leaves no stage without rules"
    );
    stages
}

fn make_join(
    query: &StructuredQuery,
    g: &QueryGraph,
    ordered: &[usize],
    stages: Vec<Stage>,
    tag: ResultTag,
) -> JoinPlan {
    let mut pos = vec![0; g.vars.len()];
    for (p, &v) in ordered.iter().enumerate() {
        pos[v] = p;
    }
    let edges = g
        .edges
        .iter()
        .zip(&query.edges)
        .map(|(e, qe)| PlanEdge {
            from_pos: pos[e.from],
            to_pos: pos[e.to],
            ty: e.ty,
            var: qe.var.clone(),
        })
        .collect();
    JoinPlan {
        vars: ordered.iter().map(|&v| g.vars[v].clone()).collect(),
        stages,
        edges,
        tag,
    }
}
