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

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::registry::{TypeFilter, TypeRegistry};
use crate::value::Value;
use crate::Error;

/// One directed edge of a pattern: `(from)-[var:ty]->(to)`.
///
/// The edge variable and the type are both optional; a missing type means "any".
#[derive(Clone, Debug, PartialEq)]
pub struct PatternEdge {
    /// The variable bound to the source vertex.
    pub from: String,
    /// The variable bound to the destination vertex.
    pub to: String,
    /// The declared edge type, if any.
    pub ty: Option<String>,
    /// The edge variable, if the query wants to refer to the matched edge.
    pub var: Option<String>,
}

/// A comparison operator in a predicate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cmp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Cmp {
    /// Does an ordering outcome satisfy this operator?
    pub fn accepts(self, ord: Ordering) -> bool {
        match self {
            Cmp::Eq => ord == Ordering::Equal,
            Cmp::Ne => ord != Ordering::Equal,
            Cmp::Lt => ord == Ordering::Less,
            Cmp::Le => ord != Ordering::Greater,
            Cmp::Gt => ord == Ordering::Greater,
            Cmp::Ge => ord != Ordering::Less,
        }
    }
}

/// A property predicate: `var.key CMP literal`.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    /// The vertex or edge variable whose property is tested.
    pub var: String,
    /// The property key name.
    pub key: String,
    /// The comparison operator.
    pub cmp: Cmp,
    /// The literal to compare against.
    pub value: Value,
}

/// One item of a projection: a variable, or a `var.key` property access.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProjectionItem {
    /// Project the id bound to a variable.
    Var(String),
    /// Project a property of the vertex or edge bound to a variable.
    Prop(String, String),
}

/// An aggregation operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggOp {
    /// `COUNT(*)`
    CountStar,
    /// `SUM(x)`
    Sum,
    /// `MIN(x)`
    Min,
    /// `MAX(x)`
    Max,
    /// `AVG(x)`
    Avg,
}

/// An aggregation over a projection item. `COUNT(*)` has no item.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    /// The operator.
    pub op: AggOp,
    /// What is aggregated; `None` only for `COUNT(*)`.
    pub over: Option<ProjectionItem>,
}

/// A parsed pattern-matching query, independent of any concrete syntax.
///
/// This is what the front-end hands to the planner: the pattern edges, the property
/// predicates, the projection and the aggregations. An empty projection with no aggregations
/// means "return every vertex variable, in order of first mention".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredQuery {
    /// The pattern, as an ordered list of directed edges.
    pub edges: Vec<PatternEdge>,
    /// Conjunctive property predicates.
    pub predicates: Vec<Predicate>,
    /// The projection list.
    pub projection: Vec<ProjectionItem>,
    /// Aggregations over the projection.
    pub aggregations: Vec<Aggregation>,
}

impl StructuredQuery {
    /// A query that is just a pattern, returning all its variables.
    pub fn from_pattern(edges: Vec<PatternEdge>) -> StructuredQuery {
        StructuredQuery {
            edges,
            ..StructuredQuery::default()
        }
    }

    /// The vertex variables of the pattern, in order of first mention.
    pub fn mention_order(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for e in &self.edges {
            for var in [&e.from, &e.to] {
                if !seen.contains(&var.as_str()) {
                    seen.push(var.as_str());
                }
            }
        }
        seen
    }
}

// A pattern edge with its endpoints turned into variable indices and its type resolved
// against the registry.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedEdge {
    pub from: usize,
    pub to: usize,
    pub ty: TypeFilter,
}

impl ResolvedEdge {
    pub fn is_loop(&self) -> bool {
        self.from == self.to
    }

    // The endpoint that isn't `var`. For a self-loop this is `var` itself.
    pub fn other(&self, var: usize) -> usize {
        if self.from == var { self.to } else { self.from }
    }

    pub fn touches(&self, var: usize) -> bool {
        self.from == var || self.to == var
    }
}

// The undirected view of a pattern that the planner works on: variables, resolved edges, and
// which edges touch which variable. Building it is also where the pattern is validated, so no
// partial plan can be constructed from a bad query.
#[derive(Clone, Debug)]
pub(crate) struct QueryGraph {
    pub vars: Vec<String>,
    pub edges: Vec<ResolvedEdge>,
    pub incident: Vec<Vec<usize>>,
}

impl QueryGraph {
    pub fn build(query: &StructuredQuery, registry: &TypeRegistry) -> Result<QueryGraph, Error> {
        if query.edges.is_empty() {
            return Err(Error::EmptyPattern);
        }

        let mut vars: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut var_of = |vars: &mut Vec<String>, name: &str| -> usize {
            if let Some(&i) = index.get(name) {
                return i;
            }
            let i = vars.len();
            vars.push(name.to_owned());
            index.insert(name.to_owned(), i);
            i
        };

        let mut edges = Vec::with_capacity(query.edges.len());
        for e in &query.edges {
            let from = var_of(&mut vars, &e.from);
            let to = var_of(&mut vars, &e.to);
            let ty = registry.lookup_type(e.ty.as_deref())?;
            edges.push(ResolvedEdge { from, to, ty });
        }

        let mut incident = vec![Vec::new(); vars.len()];
        for (i, e) in edges.iter().enumerate() {
            incident[e.from].push(i);
            if !e.is_loop() {
                incident[e.to].push(i);
            }
        }

        let g = QueryGraph {
            vars,
            edges,
            incident,
        };
        g.check_connected()?;
        Ok(g)
    }

    /// The number of pattern edges touching a variable. A self-loop counts once.
    pub fn degree(&self, var: usize) -> usize {
        self.incident[var].len()
    }

    // Every pair of variables must be joined by some chain of pattern edges; the stage
    // machinery has no way to seed a cross product.
    fn check_connected(&self) -> Result<(), Error> {
        let mut visited = vec![false; self.vars.len()];
        let mut stack = vec![0];
        visited[0] = true;
        while let Some(v) = stack.pop() {
            for &ei in &self.incident[v] {
                let u = self.edges[ei].other(v);
                if !visited[u] {
                    visited[u] = true;
                    stack.push(u);
                }
            }
        }
        if visited.iter().all(|&b| b) {
            Ok(())
        } else {
            Err(Error::DisconnectedPattern)
        }
    }
}
