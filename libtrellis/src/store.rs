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

use itertools::Itertools;
use log::debug;
use trellis_idlist::SortedIdList;

use crate::registry::{KeyId, TypeFilter, TypeId};
use crate::value::Value;
use crate::{EdgeId, Error, VertexId};

/// Which of the two mirrored adjacency indices to read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    /// Out-neighbors: `v` is in `Forward(u)` iff there is an edge from `u` to `v`.
    Forward,
    /// In-neighbors: `u` is in `Backward(v)` iff there is an edge from `u` to `v`.
    Backward,
}

/// The logical graph views a read can range over.
///
/// `Permanent` is the graph as of the last commit; edges staged for deletion are still
/// logically present in it. `DiffPlus` and `DiffMinus` are the staged additions and deletions.
/// `Merged` is the permanent graph with the staged additions applied and the staged deletions
/// filtered out, served by in-line filtering rather than by materializing a copy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Version {
    /// Edges committed before the in-flight delta.
    Permanent,
    /// `Permanent` plus staged additions, minus staged deletions.
    Merged,
    /// Only the staged additions.
    DiffPlus,
    /// Only the staged deletions.
    DiffMinus,
}

// Staging state of one adjacency entry. The order of the match arms below is the whole
// versioning story: a Permanent entry is visible in Permanent and Merged, an Added entry in
// DiffPlus and Merged, a Removed entry in Permanent and DiffMinus.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EdgeState {
    Permanent,
    Added,
    Removed,
}

impl EdgeState {
    fn visible_in(self, version: Version) -> bool {
        match version {
            Version::Permanent => matches!(self, EdgeState::Permanent | EdgeState::Removed),
            Version::Merged => matches!(self, EdgeState::Permanent | EdgeState::Added),
            Version::DiffPlus => self == EdgeState::Added,
            Version::DiffMinus => self == EdgeState::Removed,
        }
    }
}

// One adjacency slot. Entries are keyed by (neighbor, ty): the graph is a multigraph, and
// parallel edges between the same ordered pair are distinguished by their type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct AdjEntry {
    neighbor: VertexId,
    ty: TypeId,
    state: EdgeState,
}

// The adjacency of a single vertex in a single direction, sorted by (neighbor, ty) so that
// every filtered view iterates in ascending neighbor order.
#[derive(Clone, Debug, Default)]
struct AdjList {
    entries: Vec<AdjEntry>,
}

impl AdjList {
    fn index_of(&self, neighbor: VertexId, ty: TypeId) -> Option<usize> {
        self.entries
            .binary_search_by_key(&(neighbor, ty), |e| (e.neighbor, e.ty))
            .ok()
    }

    fn insert(&mut self, neighbor: VertexId, ty: TypeId, state: EdgeState) {
        match self
            .entries
            .binary_search_by_key(&(neighbor, ty), |e| (e.neighbor, e.ty))
        {
            Ok(_) => panic!("edge to {} of type {} is already present", neighbor, ty),
            Err(idx) => self.entries.insert(idx, AdjEntry { neighbor, ty, state }),
        }
    }

    fn remove(&mut self, neighbor: VertexId, ty: TypeId) {
        if let Some(idx) = self.index_of(neighbor, ty) {
            self.entries.remove(idx);
        }
    }

    fn set_state(&mut self, neighbor: VertexId, ty: TypeId, state: EdgeState) {
        let idx = self
            .index_of(neighbor, ty)
            .expect("tried to restate a missing edge");
        self.entries[idx].state = state;
    }
}

/// A read-only view of one vertex's neighbors in one direction, filtered down to a graph
/// version and an edge-type constraint.
///
/// Views are cheap to copy and borrow the store; they are valid until the next mutation.
/// Iteration yields distinct neighbor ids in ascending order, so a view can feed a sorted
/// intersection directly.
#[derive(Clone, Copy, Debug)]
pub struct AdjView<'a> {
    entries: &'a [AdjEntry],
    version: Version,
    ty: TypeFilter,
}

impl<'a> AdjView<'a> {
    fn visible(self, e: &AdjEntry) -> bool {
        e.state.visible_in(self.version) && self.ty.matches(e.ty)
    }

    /// Iterates over the visible neighbors, ascending and duplicate-free.
    pub fn iter(self) -> impl Iterator<Item = VertexId> + 'a {
        self.entries
            .iter()
            .filter(move |e| self.visible(e))
            .map(|e| e.neighbor)
            .dedup()
    }

    /// How many distinct neighbors are visible?
    pub fn count(self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if no neighbor is visible.
    pub fn is_empty(self) -> bool {
        self.iter().next().is_none()
    }

    /// Is `v` a visible neighbor? This is a binary search, not a scan.
    pub fn contains(self, v: VertexId) -> bool {
        let start = self.entries.partition_point(|e| e.neighbor < v);
        self.entries[start..]
            .iter()
            .take_while(|e| e.neighbor == v)
            .any(|e| self.visible(e))
    }

    /// Copies the visible neighbors into a freshly owned [`SortedIdList`].
    pub fn to_id_list(self) -> SortedIdList {
        let mut out = SortedIdList::new();
        for v in self.iter() {
            out.push(v);
        }
        out
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StagedOp {
    Add,
    Delete,
}

/// The versioned adjacency store.
///
/// For every vertex the store keeps two mirrored sorted adjacency lists (out-neighbors and
/// in-neighbors), each entry tagged with its edge type and its staging state. Mutations stage
/// additions and deletions without touching the committed graph; [`GraphStore::commit`] folds
/// the staged diff in atomically. Reads pick one of the four [`Version`]s and see a consistent
/// filtered view.
#[derive(Clone, Debug, Default)]
pub struct GraphStore {
    forward: Vec<AdjList>,
    backward: Vec<AdjList>,
    vertex_types: Vec<Option<TypeId>>,
    vertex_props: Vec<HashMap<KeyId, Value>>,
    edge_ids: HashMap<(VertexId, VertexId, TypeId), EdgeId>,
    edge_props: HashMap<EdgeId, HashMap<KeyId, Value>>,
    // Every staged-but-uncommitted edge key, so commit only touches the lists it must.
    staged: HashMap<(VertexId, VertexId, TypeId), StagedOp>,
    next_edge_id: EdgeId,
}

impl GraphStore {
    /// Creates an empty store.
    pub fn new() -> GraphStore {
        GraphStore::default()
    }

    /// Registers a vertex id, growing the tables. Ids are dense: mentioning vertex `v` makes
    /// every id up to `v` valid. Ids are never reclaimed.
    pub fn ensure_vertex(&mut self, v: VertexId) -> Result<(), Error> {
        if v == VertexId::MAX {
            return Err(Error::VertexIdOverflow);
        }
        let needed = v as usize + 1;
        if self.forward.len() < needed {
            self.forward.resize_with(needed, AdjList::default);
            self.backward.resize_with(needed, AdjList::default);
            self.vertex_types.resize(needed, None);
            self.vertex_props.resize_with(needed, HashMap::new);
        }
        Ok(())
    }

    /// How many vertex ids have been mentioned?
    pub fn vertex_count(&self) -> usize {
        self.forward.len()
    }

    /// Returns `true` if any addition or deletion is staged and uncommitted.
    pub fn has_staged_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Stages the addition of an edge and returns its id.
    ///
    /// If the same `(src, dst, ty)` key is staged for deletion, the deletion is cancelled and
    /// the permanent edge keeps its original id. Re-adding a key that is already present is a
    /// no-op that returns the existing id.
    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, ty: TypeId) -> Result<EdgeId, Error> {
        self.ensure_vertex(src)?;
        self.ensure_vertex(dst)?;
        let key = (src, dst, ty);
        match self.forward[src as usize].index_of(dst, ty) {
            Some(idx) => {
                if self.forward[src as usize].entries[idx].state == EdgeState::Removed {
                    debug!("cancelling staged deletion of {}-[{}]->{}", src, ty, dst);
                    self.set_state(src, dst, ty, EdgeState::Permanent);
                    self.staged.remove(&key);
                }
                // The entry exists in some state, so it has an id.
                Ok(self.edge_ids[&key])
            }
            None => {
                let id = self.next_edge_id;
                self.next_edge_id = self
                    .next_edge_id
                    .checked_add(1)
                    .ok_or(Error::EdgeIdOverflow)?;
                debug!("staging addition of {}-[{}]->{} as edge {}", src, ty, dst, id);
                self.forward[src as usize].insert(dst, ty, EdgeState::Added);
                self.backward[dst as usize].insert(src, ty, EdgeState::Added);
                self.edge_ids.insert(key, id);
                self.staged.insert(key, StagedOp::Add);
                Ok(id)
            }
        }
    }

    /// Stages the deletion of an edge.
    ///
    /// A permanent edge is staged for deletion but stays visible in the permanent view until
    /// commit; a staged addition is cancelled outright. Deleting a missing edge is a no-op.
    pub fn delete_edge(&mut self, src: VertexId, dst: VertexId, ty: TypeId) {
        if src as usize >= self.forward.len() || dst as usize >= self.backward.len() {
            return;
        }
        let key = (src, dst, ty);
        let Some(idx) = self.forward[src as usize].index_of(dst, ty) else {
            return;
        };
        match self.forward[src as usize].entries[idx].state {
            EdgeState::Added => {
                debug!("cancelling staged addition of {}-[{}]->{}", src, ty, dst);
                self.forward[src as usize].remove(dst, ty);
                self.backward[dst as usize].remove(src, ty);
                self.staged.remove(&key);
                if let Some(id) = self.edge_ids.remove(&key) {
                    self.edge_props.remove(&id);
                }
            }
            EdgeState::Permanent => {
                debug!("staging deletion of {}-[{}]->{}", src, ty, dst);
                self.set_state(src, dst, ty, EdgeState::Removed);
                self.staged.insert(key, StagedOp::Delete);
            }
            EdgeState::Removed => {}
        }
    }

    /// Folds the staged diff into the permanent graph.
    ///
    /// Staged additions become permanent and staged deletions disappear, along with their ids
    /// and properties. Afterwards both diff views are empty. Committing an empty diff is a
    /// no-op.
    pub fn commit(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        debug!("committing {} staged changes", staged.len());
        for ((src, dst, ty), op) in staged {
            match op {
                StagedOp::Add => self.set_state(src, dst, ty, EdgeState::Permanent),
                StagedOp::Delete => {
                    self.forward[src as usize].remove(dst, ty);
                    self.backward[dst as usize].remove(src, ty);
                    if let Some(id) = self.edge_ids.remove(&(src, dst, ty)) {
                        self.edge_props.remove(&id);
                    }
                }
            }
        }
    }

    // Restates the entry under both mirrored lists.
    fn set_state(&mut self, src: VertexId, dst: VertexId, ty: TypeId, state: EdgeState) {
        self.forward[src as usize].set_state(dst, ty, state);
        self.backward[dst as usize].set_state(src, ty, state);
    }

    /// The neighbors of `v` in the given direction, as seen under `version` and filtered by
    /// `ty`. A never-mentioned vertex has an empty view.
    pub fn adjacency(
        &self,
        v: VertexId,
        direction: Direction,
        version: Version,
        ty: TypeFilter,
    ) -> AdjView<'_> {
        let lists = match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        };
        let entries = lists
            .get(v as usize)
            .map(|l| &l.entries[..])
            .unwrap_or(&[]);
        AdjView {
            entries,
            version,
            ty,
        }
    }

    /// Enumerates every edge visible under `version` whose type passes `ty`, as `(a, b)`
    /// pairs oriented by `direction`: `Forward` yields `(src, dst)`, `Backward` yields
    /// `(dst, src)`. Parallel edges of different types collapse to one pair.
    pub fn all_edges(
        &self,
        direction: Direction,
        version: Version,
        ty: TypeFilter,
    ) -> impl Iterator<Item = (VertexId, VertexId)> + '_ {
        self.forward.iter().enumerate().flat_map(move |(src, list)| {
            let src = src as VertexId;
            let view = AdjView {
                entries: &list.entries,
                version,
                ty,
            };
            view.iter().map(move |dst| match direction {
                Direction::Forward => (src, dst),
                Direction::Backward => (dst, src),
            })
        })
    }

    /// The distinct types of the edges currently present (permanent or staged for addition)
    /// from `src` to `dst`.
    pub fn edge_types_between(&self, src: VertexId, dst: VertexId) -> Vec<TypeId> {
        let Some(list) = self.forward.get(src as usize) else {
            return Vec::new();
        };
        let start = list.entries.partition_point(|e| e.neighbor < dst);
        list.entries[start..]
            .iter()
            .take_while(|e| e.neighbor == dst)
            .filter(|e| e.state != EdgeState::Removed)
            .map(|e| e.ty)
            .collect()
    }

    /// Resolves the id of an edge from `src` to `dst` whose type passes `ty`, regardless of
    /// staging state. With `TypeFilter::Any` and parallel edges, the smallest type wins.
    pub fn resolve_edge_id(&self, src: VertexId, dst: VertexId, ty: TypeFilter) -> Option<EdgeId> {
        let list = self.forward.get(src as usize)?;
        let start = list.entries.partition_point(|e| e.neighbor < dst);
        list.entries[start..]
            .iter()
            .take_while(|e| e.neighbor == dst)
            .find(|e| ty.matches(e.ty))
            .map(|e| self.edge_ids[&(src, dst, e.ty)])
    }

    /// Sets the type of a vertex. The last mention wins.
    pub fn set_vertex_type(&mut self, v: VertexId, ty: TypeId) -> Result<(), Error> {
        self.ensure_vertex(v)?;
        self.vertex_types[v as usize] = Some(ty);
        Ok(())
    }

    /// The type of a vertex, if one was ever set.
    pub fn vertex_type(&self, v: VertexId) -> Option<TypeId> {
        self.vertex_types.get(v as usize).copied().flatten()
    }

    /// Sets a vertex property.
    pub fn set_vertex_prop(&mut self, v: VertexId, key: KeyId, value: Value) -> Result<(), Error> {
        self.ensure_vertex(v)?;
        self.vertex_props[v as usize].insert(key, value);
        Ok(())
    }

    /// Reads a vertex property.
    pub fn vertex_prop(&self, v: VertexId, key: KeyId) -> Option<&Value> {
        self.vertex_props.get(v as usize)?.get(&key)
    }

    /// Sets an edge property.
    pub fn set_edge_prop(&mut self, edge: EdgeId, key: KeyId, value: Value) {
        self.edge_props.entry(edge).or_default().insert(key, value);
    }

    /// Reads an edge property.
    pub fn edge_prop(&self, edge: EdgeId, key: KeyId) -> Option<&Value> {
        self.edge_props.get(&edge)?.get(&key)
    }

    /// Audits the structural invariants: every adjacency list is sorted and duplicate-free,
    /// the forward and backward indices mirror each other entry for entry (state included),
    /// the staging bookkeeping matches the entry states, and every entry has an id.
    ///
    /// # Panics
    ///
    /// Panics on the first violation. A failure here means a mutation broke the store.
    pub fn check_consistent(&self) {
        use std::collections::HashSet;

        for list in self.forward.iter().chain(self.backward.iter()) {
            for w in list.entries.windows(2) {
                assert!(
                    (w[0].neighbor, w[0].ty) < (w[1].neighbor, w[1].ty),
                    "adjacency entries out of order"
                );
            }
        }

        let mut seen_back = HashSet::new();
        for (src, list) in self.forward.iter().enumerate() {
            let src = src as VertexId;
            for e in &list.entries {
                let mirror = self.backward[e.neighbor as usize]
                    .index_of(src, e.ty)
                    .map(|i| self.backward[e.neighbor as usize].entries[i]);
                assert_eq!(
                    mirror,
                    Some(AdjEntry {
                        neighbor: src,
                        ty: e.ty,
                        state: e.state
                    }),
                    "forward edge {}-[{}]->{} has no matching backward entry",
                    src,
                    e.ty,
                    e.neighbor
                );
                seen_back.insert((e.neighbor, src, e.ty));

                let key = (src, e.neighbor, e.ty);
                match e.state {
                    EdgeState::Added => assert_eq!(self.staged.get(&key), Some(&StagedOp::Add)),
                    EdgeState::Removed => {
                        assert_eq!(self.staged.get(&key), Some(&StagedOp::Delete))
                    }
                    EdgeState::Permanent => assert!(!self.staged.contains_key(&key)),
                }
                assert!(self.edge_ids.contains_key(&key), "edge without an id");
            }
        }
        for (dst, list) in self.backward.iter().enumerate() {
            for e in &list.entries {
                assert!(
                    seen_back.contains(&(dst as VertexId, e.neighbor, e.ty)),
                    "backward edge without a forward mirror"
                );
            }
        }
        for &(src, dst, ty) in self.edge_ids.keys() {
            assert!(
                self.forward[src as usize].index_of(dst, ty).is_some(),
                "id without an edge"
            );
        }
    }
}

#[cfg(test)]
mod tests;
