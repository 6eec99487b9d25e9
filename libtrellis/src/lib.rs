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

#![deny(missing_docs)]

//! An in-memory property-graph database with incremental pattern matching.
//!
//! `trellis` stores a labeled directed multigraph and evaluates fixed-shape edge patterns
//! against it with a worst-case-optimal generic join. A pattern can be matched once against
//! the committed graph, or registered as a continuous query: then every commit reports which
//! motifs emerged and which disappeared with that batch of changes, computed incrementally
//! from the staged diff rather than by re-matching the whole graph.
//!
//! The main entry point is [`GraphDb`], which owns the [`GraphStore`], the [`TypeRegistry`]
//! and the registered continuous queries. Parsing query text is deliberately not this
//! crate's business: callers hand over [`StructuredQuery`] values.

use log::debug;

mod error;
mod exec;
mod pipeline;
mod plan;
mod query;
mod registry;
mod sink;
mod store;
mod value;

pub use crate::{
    error::Error,
    exec::ExecStats,
    plan::{ContinuousMatchPlan, OneTimeMatchPlan, ResultTag, plan_continuous, plan_one_time},
    query::{AggOp, Aggregation, Cmp, PatternEdge, Predicate, ProjectionItem, StructuredQuery},
    registry::{KeyId, TypeFilter, TypeId, TypeRegistry},
    sink::{FileSink, MemorySink, OutputSink},
    store::{AdjView, Direction, GraphStore, Version},
    value::{Value, ValueKind},
};

use crate::exec::GenericJoinExecutor;
use crate::pipeline::Pipeline;

/// A dense vertex id, assigned on first mention and never reclaimed.
pub type VertexId = u32;

/// An edge id, assigned on insertion and stable until the edge is deleted.
pub type EdgeId = u32;

// Edges created without a declared type intern this name.
const UNTYPED_EDGE: &str = "";

/// One endpoint of an edge being created: its id, and optionally a type and properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexSpec {
    /// The vertex id.
    pub id: VertexId,
    /// The vertex type, if declared.
    pub ty: Option<String>,
    /// Properties to set on the vertex.
    pub props: Vec<(String, Value)>,
}

impl VertexSpec {
    /// A bare vertex with no type and no properties.
    pub fn bare(id: VertexId) -> VertexSpec {
        VertexSpec {
            id,
            ..VertexSpec::default()
        }
    }
}

/// An edge being created, with both endpoints and optional type and properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeSpec {
    /// The source endpoint.
    pub from: VertexSpec,
    /// The destination endpoint.
    pub to: VertexSpec,
    /// The edge type, if declared.
    pub ty: Option<String>,
    /// Properties to set on the edge.
    pub props: Vec<(String, Value)>,
}

impl EdgeSpec {
    /// A bare untyped edge between two bare vertices.
    pub fn bare(from: VertexId, to: VertexId) -> EdgeSpec {
        EdgeSpec {
            from: VertexSpec::bare(from),
            to: VertexSpec::bare(to),
            ..EdgeSpec::default()
        }
    }

    /// A typed edge between two bare vertices.
    pub fn typed(from: VertexId, to: VertexId, ty: &str) -> EdgeSpec {
        EdgeSpec {
            ty: Some(ty.to_owned()),
            ..EdgeSpec::bare(from, to)
        }
    }
}

struct ContinuousQuery {
    plan: ContinuousMatchPlan,
    sink: Box<dyn OutputSink>,
}

/// This is the main interface to a trellis database.
///
/// All mutation flows through `&mut self` methods and all matching through `&self` methods,
/// so writers and readers are serialized by ownership: no query can observe a half-applied
/// commit, and adjacency views cannot outlive the next mutation.
///
/// Changes accumulate as a staged diff until [`GraphDb::commit`], which first lets every
/// registered continuous query report against the diff and then folds the diff into the
/// permanent graph.
#[derive(Default)]
pub struct GraphDb {
    registry: TypeRegistry,
    store: GraphStore,
    continuous: Vec<ContinuousQuery>,
}

impl GraphDb {
    /// Creates an empty database.
    pub fn new() -> GraphDb {
        GraphDb::default()
    }

    /// The type and property-key registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The underlying store.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Stages the creation of an edge, interning types and keys on demand and setting any
    /// vertex and edge properties. Returns the edge's id.
    pub fn create_edge(&mut self, spec: &EdgeSpec) -> Result<EdgeId, Error> {
        self.apply_vertex(&spec.from)?;
        self.apply_vertex(&spec.to)?;
        let ty = self
            .registry
            .intern_type(spec.ty.as_deref().unwrap_or(UNTYPED_EDGE));
        let id = self.store.add_edge(spec.from.id, spec.to.id, ty)?;
        for (k, v) in &spec.props {
            let key = self.registry.intern_key(k);
            self.store.set_edge_prop(id, key, v.clone());
        }
        Ok(id)
    }

    fn apply_vertex(&mut self, v: &VertexSpec) -> Result<(), Error> {
        self.store.ensure_vertex(v.id)?;
        if let Some(ty) = &v.ty {
            let ty = self.registry.intern_type(ty);
            self.store.set_vertex_type(v.id, ty)?;
        }
        for (k, val) in &v.props {
            let key = self.registry.intern_key(k);
            self.store.set_vertex_prop(v.id, key, val.clone())?;
        }
        Ok(())
    }

    /// Stages the deletion of the edges from `src` to `dst`: all of them, or only those of
    /// the named type. Returns how many deletions were staged. Unknown types and missing
    /// edges are a no-op, not an error.
    pub fn delete_edges(&mut self, src: VertexId, dst: VertexId, ty: Option<&str>) -> usize {
        let targets: Vec<TypeId> = match ty {
            None => self.store.edge_types_between(src, dst),
            Some(name) => match self.registry.lookup_type(Some(name)) {
                Ok(TypeFilter::Only(t)) => self
                    .store
                    .edge_types_between(src, dst)
                    .into_iter()
                    .filter(|&e| e == t)
                    .collect(),
                _ => Vec::new(),
            },
        };
        for &t in &targets {
            self.store.delete_edge(src, dst, t);
        }
        targets.len()
    }

    /// Commits the staged diff.
    ///
    /// Every registered continuous query runs its delta plans against the diff first,
    /// appending `EMERGED` and `DELETED` tuples to its sink; then the diff is folded into
    /// the permanent graph and both diff views become empty.
    pub fn commit(&mut self) -> Result<(), Error> {
        if self.store.has_staged_changes() {
            for cq in &mut self.continuous {
                for (join, ops) in &cq.plan.deltas {
                    let mut pipeline =
                        Pipeline::new(&self.store, ops.clone(), join.tag, &mut *cq.sink);
                    let mut exec = GenericJoinExecutor::new(&self.store, join);
                    exec.run(&mut pipeline)?;
                    pipeline.finish()?;
                }
            }
        }
        self.store.commit();
        Ok(())
    }

    /// Plans and runs a one-time match against the permanent graph, streaming `MATCHED`
    /// tuples into `sink`. Returns the executor's counters.
    pub fn one_time_match(
        &self,
        query: &StructuredQuery,
        sink: &mut dyn OutputSink,
    ) -> Result<ExecStats, Error> {
        let plan = plan_one_time(query, &self.registry)?;
        self.run_one_time(&plan, sink)
    }

    /// Runs an already-compiled one-time plan. Plans are stateless, so the same plan can be
    /// re-run as the graph changes.
    pub fn run_one_time(
        &self,
        plan: &OneTimeMatchPlan,
        sink: &mut dyn OutputSink,
    ) -> Result<ExecStats, Error> {
        let mut pipeline = Pipeline::new(&self.store, plan.ops.clone(), plan.join.tag, sink);
        let mut exec = GenericJoinExecutor::new(&self.store, &plan.join);
        let stats = exec.run(&mut pipeline)?;
        pipeline.finish()?;
        Ok(stats)
    }

    /// Registers a continuous match. From now on every [`GraphDb::commit`] reports the
    /// motifs that emerged or disappeared with that batch of changes into `sink`.
    pub fn continuous_match(
        &mut self,
        query: &StructuredQuery,
        sink: Box<dyn OutputSink>,
    ) -> Result<(), Error> {
        let plan = plan_continuous(query, &self.registry)?;
        debug!(
            "registered a continuous query with {} delta plans",
            plan.deltas.len()
        );
        self.continuous.push(ContinuousQuery { plan, sink });
        Ok(())
    }

    /// How many continuous queries are registered?
    pub fn continuous_query_count(&self) -> usize {
        self.continuous.len()
    }
}
