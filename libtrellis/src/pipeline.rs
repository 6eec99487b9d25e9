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

use std::collections::HashMap;

use crate::plan::{JoinPlan, ResultTag};
use crate::query::{AggOp, Cmp, ProjectionItem, StructuredQuery};
use crate::registry::{KeyId, TypeFilter, TypeRegistry};
use crate::sink::OutputSink;
use crate::store::GraphStore;
use crate::value::Value;
use crate::{Error, VertexId};

// Whether a column holds vertex ids or edge ids, which decides where property lookups go.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ColKind {
    Vertex,
    Edge,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct EdgeSlot {
    from_pos: usize,
    to_pos: usize,
    ty: TypeFilter,
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledPredicate {
    col: usize,
    kind: ColKind,
    key: KeyId,
    cmp: Cmp,
    value: Value,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PropSlot {
    col: usize,
    kind: ColKind,
    key: KeyId,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CompiledAgg {
    op: AggOp,
    col: Option<usize>,
}

#[derive(Clone, Debug)]
pub(crate) enum AggState {
    Count(i64),
    Sum { int: i64, dbl: f64, saw_any: bool, saw_double: bool },
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: i64 },
}

impl AggState {
    fn fresh(op: AggOp) -> AggState {
        match op {
            AggOp::CountStar => AggState::Count(0),
            AggOp::Sum => AggState::Sum {
                int: 0,
                dbl: 0.0,
                saw_any: false,
                saw_double: false,
            },
            AggOp::Min => AggState::Min(None),
            AggOp::Max => AggState::Max(None),
            AggOp::Avg => AggState::Avg { sum: 0.0, count: 0 },
        }
    }

    fn update(&mut self, input: Option<&Value>) {
        match self {
            AggState::Count(n) => *n += 1,
            AggState::Sum {
                int,
                dbl,
                saw_any,
                saw_double,
            } => match input {
                Some(Value::Int(i)) => {
                    *int += i64::from(*i);
                    *saw_any = true;
                }
                Some(Value::Double(d)) => {
                    *dbl += d;
                    *saw_any = true;
                    *saw_double = true;
                }
                _ => {}
            },
            AggState::Min(cur) => {
                if let Some(v) = input {
                    let replace = match cur {
                        None => true,
                        Some(c) => v.compare(c) == Some(std::cmp::Ordering::Less),
                    };
                    if replace {
                        *cur = Some(v.clone());
                    }
                }
            }
            AggState::Max(cur) => {
                if let Some(v) = input {
                    let replace = match cur {
                        None => true,
                        Some(c) => v.compare(c) == Some(std::cmp::Ordering::Greater),
                    };
                    if replace {
                        *cur = Some(v.clone());
                    }
                }
            }
            AggState::Avg { sum, count } => match input {
                Some(Value::Int(i)) => {
                    *sum += f64::from(*i);
                    *count += 1;
                }
                Some(Value::Double(d)) => {
                    *sum += d;
                    *count += 1;
                }
                _ => {}
            },
        }
    }

    fn finish(&self) -> Option<Value> {
        match self {
            AggState::Count(n) => Some(Value::Int(*n as i32)),
            AggState::Sum {
                int,
                dbl,
                saw_any,
                saw_double,
            } => {
                if !saw_any {
                    None
                } else if *saw_double {
                    Some(Value::Double(dbl + *int as f64))
                } else {
                    Some(Value::Int(*int as i32))
                }
            }
            AggState::Min(v) | AggState::Max(v) => v.clone(),
            AggState::Avg { sum, count } => {
                if *count == 0 {
                    None
                } else {
                    Some(Value::Double(sum / *count as f64))
                }
            }
        }
    }
}

// One link of the operator chain. Every variant takes a batch of rows and produces a batch;
// the aggregate is the only stateful one and emits from `finish` at end-of-stream.
#[derive(Clone, Debug)]
pub(crate) enum Operator {
    EdgeIdResolver {
        slots: Vec<EdgeSlot>,
    },
    Filter {
        predicates: Vec<CompiledPredicate>,
    },
    Projection {
        cols: Vec<usize>,
    },
    PropertyResolver {
        props: Vec<PropSlot>,
    },
    GroupByAndAggregate {
        group: usize,
        aggs: Vec<CompiledAgg>,
        groups: HashMap<Vec<u8>, (Vec<Value>, Vec<AggState>)>,
        order: Vec<Vec<u8>>,
    },
}

// Rows carry vertex and edge ids as `Value::Int`; this recovers the id.
fn id_at(row: &[Value], col: usize) -> VertexId {
    match row[col] {
        Value::Int(i) => i as VertexId,
        // Compilation only points id-consuming operators at id columns.
        ref v => panic!("column {} holds {:?}, not an id", col, v),
    }
}

fn lookup_prop<'a>(
    store: &'a GraphStore,
    kind: ColKind,
    id: VertexId,
    key: KeyId,
) -> Option<&'a Value> {
    match kind {
        ColKind::Vertex => store.vertex_prop(id, key),
        ColKind::Edge => store.edge_prop(id, key),
    }
}

impl Operator {
    fn process(
        &mut self,
        store: &GraphStore,
        mut rows: Vec<Vec<Value>>,
    ) -> Result<Vec<Vec<Value>>, Error> {
        match self {
            Operator::EdgeIdResolver { slots } => {
                for row in &mut rows {
                    for slot in slots.iter() {
                        let src = id_at(row, slot.from_pos);
                        let dst = id_at(row, slot.to_pos);
                        // The tuple matched this pattern edge, so the edge is present in
                        // some version and has an id.
                        let id = store
                            .resolve_edge_id(src, dst, slot.ty)
                            .expect("matched edge has no id");
                        row.push(Value::Int(id as i32));
                    }
                }
                Ok(rows)
            }
            Operator::Filter { predicates } => {
                rows.retain(|row| {
                    predicates.iter().all(|p| {
                        let id = id_at(row, p.col);
                        match lookup_prop(store, p.kind, id, p.key) {
                            None => false,
                            Some(v) => v
                                .compare(&p.value)
                                .is_some_and(|ord| p.cmp.accepts(ord)),
                        }
                    })
                });
                Ok(rows)
            }
            Operator::Projection { cols } => Ok(rows
                .into_iter()
                .map(|row| cols.iter().map(|&c| row[c].clone()).collect())
                .collect()),
            Operator::PropertyResolver { props } => {
                let mut out = Vec::with_capacity(rows.len());
                'rows: for mut row in rows {
                    for p in props.iter() {
                        let id = id_at(&row, p.col);
                        match lookup_prop(store, p.kind, id, p.key) {
                            // A row whose projected property is absent is dropped, as if an
                            // existence predicate had been written.
                            None => continue 'rows,
                            Some(v) => row[p.col] = v.clone(),
                        }
                    }
                    out.push(row);
                }
                Ok(out)
            }
            Operator::GroupByAndAggregate {
                group,
                aggs,
                groups,
                order,
            } => {
                for row in rows {
                    let (key_row, inputs) = row.split_at(*group);
                    let mut key = Vec::new();
                    for v in key_row {
                        // A kind byte keeps differently-typed keys from colliding.
                        key.push(match v.kind() {
                            crate::value::ValueKind::Int => 0,
                            crate::value::ValueKind::Double => 1,
                            crate::value::ValueKind::Bool => 2,
                            crate::value::ValueKind::Str => 3,
                        });
                        v.encode(&mut key);
                    }
                    let entry = groups.entry(key.clone()).or_insert_with(|| {
                        order.push(key);
                        (
                            key_row.to_vec(),
                            aggs.iter().map(|a| AggState::fresh(a.op)).collect(),
                        )
                    });
                    for (agg, state) in aggs.iter().zip(&mut entry.1) {
                        state.update(agg.col.map(|c| &inputs[c - *group]));
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self) -> Vec<Vec<Value>> {
        match self {
            Operator::GroupByAndAggregate {
                group,
                aggs,
                groups,
                order,
            } => {
                let mut out = Vec::new();
                if groups.is_empty() && *group == 0 && !aggs.is_empty() {
                    // An ungrouped aggregate over an empty stream still reports, provided
                    // every aggregate has a value (COUNT(*) of nothing is 0).
                    let states: Vec<_> = aggs.iter().map(|a| AggState::fresh(a.op)).collect();
                    if let Some(row) = finish_states(&[], &states) {
                        out.push(row);
                    }
                    return out;
                }
                for key in order.iter() {
                    let (key_row, states) = &groups[key];
                    if let Some(row) = finish_states(key_row, states) {
                        out.push(row);
                    }
                }
                out
            }
            _ => Vec::new(),
        }
    }
}

fn finish_states(key_row: &[Value], states: &[AggState]) -> Option<Vec<Value>> {
    let mut row = key_row.to_vec();
    for s in states {
        row.push(s.finish()?);
    }
    Some(row)
}

/// The operator chain a join's tuples flow through on their way to a sink.
pub(crate) struct Pipeline<'a> {
    store: &'a GraphStore,
    ops: Vec<Operator>,
    tag: ResultTag,
    sink: &'a mut dyn OutputSink,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a GraphStore,
        ops: Vec<Operator>,
        tag: ResultTag,
        sink: &'a mut dyn OutputSink,
    ) -> Pipeline<'a> {
        Pipeline {
            store,
            ops,
            tag,
            sink,
        }
    }

    // Feeds one batch of completed join prefixes through the chain.
    pub fn push_prefixes(&mut self, batch: &[Vec<VertexId>]) -> Result<(), Error> {
        let mut rows: Vec<Vec<Value>> = batch
            .iter()
            .map(|p| p.iter().map(|&v| Value::Int(v as i32)).collect())
            .collect();
        for op in &mut self.ops {
            if rows.is_empty() {
                break;
            }
            rows = op.process(self.store, rows)?;
        }
        for row in rows {
            self.sink.append(self.tag, &row)?;
        }
        Ok(())
    }

    // Ends the stream: the aggregate (if any) reports, and the sink is flushed.
    pub fn finish(&mut self) -> Result<(), Error> {
        let mut tail = Vec::new();
        for op in &mut self.ops {
            tail.extend(op.finish());
        }
        for row in tail {
            self.sink.append(self.tag, &row)?;
        }
        self.sink.flush()
    }
}

/// Compiles the operator sub-chain a query needs around the given join. This is also where
/// predicates, projections and aggregations are validated against the pattern's variables and
/// the registry; nothing invalid survives to execution.
pub(crate) fn compile(
    query: &StructuredQuery,
    join: &JoinPlan,
    registry: &TypeRegistry,
) -> Result<Vec<Operator>, Error> {
    let var_col: HashMap<&str, usize> = join
        .vars
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i))
        .collect();
    let edge_slot_of: HashMap<&str, usize> = join
        .edges
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.var.as_deref().map(|v| (v, i)))
        .collect();

    let default_projection: Vec<ProjectionItem>;
    let projection: &[ProjectionItem] =
        if query.projection.is_empty() && query.aggregations.is_empty() {
            default_projection = query
                .mention_order()
                .into_iter()
                .map(|v| ProjectionItem::Var(v.to_owned()))
                .collect();
            &default_projection
        } else {
            &query.projection
        };

    fn item_var(item: &ProjectionItem) -> &str {
        match item {
            ProjectionItem::Var(v) => v.as_str(),
            ProjectionItem::Prop(v, _) => v.as_str(),
        }
    }

    // Every name referenced outside the pattern itself.
    let mut referenced: Vec<&str> = Vec::new();
    let names = query
        .predicates
        .iter()
        .map(|p| p.var.as_str())
        .chain(projection.iter().map(item_var))
        .chain(query.aggregations.iter().filter_map(|a| a.over.as_ref()).map(item_var));
    for name in names {
        if !referenced.contains(&name) {
            referenced.push(name);
        }
    }

    // Edge-variable columns are appended after the vertex columns, in pattern order.
    let mut resolve_slots: Vec<usize> = Vec::new();
    for name in &referenced {
        if var_col.contains_key(name) {
            continue;
        }
        match edge_slot_of.get(name) {
            Some(&slot) => {
                if !resolve_slots.contains(&slot) {
                    resolve_slots.push(slot);
                }
            }
            None => return Err(Error::UnboundVariable((*name).to_owned())),
        }
    }
    resolve_slots.sort_unstable();
    let width = join.vars.len() + resolve_slots.len();
    let col_of = |name: &str| -> (usize, ColKind) {
        if let Some(&c) = var_col.get(name) {
            (c, ColKind::Vertex)
        } else {
            // Every non-vertex name was checked into resolve_slots above.
            let slot = edge_slot_of[name];
            let idx = resolve_slots.iter().position(|&s| s == slot).unwrap();
            (join.vars.len() + idx, ColKind::Edge)
        }
    };

    let mut ops = Vec::new();
    if !resolve_slots.is_empty() {
        ops.push(Operator::EdgeIdResolver {
            slots: resolve_slots
                .iter()
                .map(|&s| EdgeSlot {
                    from_pos: join.edges[s].from_pos,
                    to_pos: join.edges[s].to_pos,
                    ty: join.edges[s].ty,
                })
                .collect(),
        });
    }

    if !query.predicates.is_empty() {
        let mut predicates = Vec::with_capacity(query.predicates.len());
        for p in &query.predicates {
            let (col, kind) = col_of(&p.var);
            predicates.push(CompiledPredicate {
                col,
                kind,
                key: registry.lookup_key(&p.key)?,
                cmp: p.cmp,
                value: p.value.clone(),
            });
        }
        ops.push(Operator::Filter { predicates });
    }

    // The output columns: the projection, then the aggregation inputs.
    let mut out_items: Vec<&ProjectionItem> = projection.iter().collect();
    let group = out_items.len();
    for agg in &query.aggregations {
        if let Some(item) = &agg.over {
            out_items.push(item);
        }
    }
    let cols: Vec<usize> = out_items
        .iter()
        .map(|item| match item {
            ProjectionItem::Var(v) => col_of(v).0,
            ProjectionItem::Prop(v, _) => col_of(v).0,
        })
        .collect();
    if cols.len() != width || cols.iter().enumerate().any(|(i, &c)| i != c) {
        ops.push(Operator::Projection { cols });
    }

    let mut props = Vec::new();
    for (out_col, item) in out_items.iter().enumerate() {
        if let ProjectionItem::Prop(v, k) = item {
            props.push(PropSlot {
                col: out_col,
                kind: col_of(v).1,
                key: registry.lookup_key(k)?,
            });
        }
    }
    if !props.is_empty() {
        ops.push(Operator::PropertyResolver { props });
    }

    if !query.aggregations.is_empty() {
        let mut aggs = Vec::with_capacity(query.aggregations.len());
        let mut next_input = group;
        for agg in &query.aggregations {
            let col = agg.over.as_ref().map(|_| {
                let c = next_input;
                next_input += 1;
                c
            });
            aggs.push(CompiledAgg { op: agg.op, col });
        }
        ops.push(Operator::GroupByAndAggregate {
            group,
            aggs,
            groups: HashMap::new(),
            order: Vec::new(),
        });
    }

    Ok(ops)
}
