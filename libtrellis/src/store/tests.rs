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

use super::*;

use pretty_assertions::assert_eq;
use proptest::collection::hash_set;
use proptest::prelude::*;

// Builds a store with the given untyped edges, committed.
macro_rules! store {
    ( $( $src:literal - $dst:literal ),* ) => {{
        let mut s = GraphStore::new();
        $( s.add_edge($src, $dst, 0).unwrap(); )*
        s.commit();
        s
    }}
}

fn neighbors(s: &GraphStore, v: VertexId, direction: Direction, version: Version) -> Vec<VertexId> {
    s.adjacency(v, direction, version, TypeFilter::Any)
        .iter()
        .collect()
}

fn edges(s: &GraphStore, version: Version) -> Vec<(VertexId, VertexId)> {
    s.all_edges(Direction::Forward, version, TypeFilter::Any)
        .collect()
}

#[test]
fn staged_addition_is_only_in_diff_plus_and_merged() {
    let mut s = store!(0 - 1);
    s.add_edge(1, 2, 0).unwrap();

    assert_eq!(neighbors(&s, 1, Direction::Forward, Version::Permanent), vec![]);
    assert_eq!(neighbors(&s, 1, Direction::Forward, Version::DiffPlus), vec![2]);
    assert_eq!(neighbors(&s, 1, Direction::Forward, Version::Merged), vec![2]);
    assert_eq!(neighbors(&s, 2, Direction::Backward, Version::DiffPlus), vec![1]);
    s.check_consistent();

    s.commit();
    assert_eq!(neighbors(&s, 1, Direction::Forward, Version::Permanent), vec![2]);
    assert_eq!(neighbors(&s, 1, Direction::Forward, Version::DiffPlus), vec![]);
    assert!(!s.has_staged_changes());
    s.check_consistent();
}

#[test]
fn staged_deletion_stays_permanent_until_commit() {
    let mut s = store!(0 - 1, 0 - 2);
    s.delete_edge(0, 1, 0);

    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::Permanent), vec![1, 2]);
    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::DiffMinus), vec![1]);
    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::Merged), vec![2]);
    s.check_consistent();

    s.commit();
    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::Permanent), vec![2]);
    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::DiffMinus), vec![]);
    s.check_consistent();
}

#[test]
fn add_then_delete_before_commit_is_a_no_op() {
    let mut s = store!(0 - 1);
    let before = edges(&s, Version::Merged);

    s.add_edge(1, 2, 0).unwrap();
    s.delete_edge(1, 2, 0);

    assert!(!s.has_staged_changes());
    assert_eq!(edges(&s, Version::Merged), before);
    assert_eq!(edges(&s, Version::DiffPlus), vec![]);
    assert_eq!(edges(&s, Version::DiffMinus), vec![]);
    s.check_consistent();
}

#[test]
fn delete_then_add_cancels_the_deletion() {
    let mut s = store!(0 - 1);
    let id = s.resolve_edge_id(0, 1, TypeFilter::Any).unwrap();

    s.delete_edge(0, 1, 0);
    let id_again = s.add_edge(0, 1, 0).unwrap();

    // The permanent edge survives with its original id, and no diff entry remains.
    assert_eq!(id, id_again);
    assert!(!s.has_staged_changes());
    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::Permanent), vec![1]);
    s.check_consistent();
}

#[test]
fn deleting_a_missing_edge_is_a_no_op() {
    let mut s = store!(0 - 1);
    s.delete_edge(0, 2, 0);
    s.delete_edge(7, 8, 0);
    assert!(!s.has_staged_changes());
    s.check_consistent();
}

#[test]
fn readding_an_existing_edge_keeps_its_id() {
    let mut s = GraphStore::new();
    let a = s.add_edge(0, 1, 0).unwrap();
    let b = s.add_edge(0, 1, 0).unwrap();
    assert_eq!(a, b);
    s.commit();
    let c = s.add_edge(0, 1, 0).unwrap();
    assert_eq!(a, c);
    s.check_consistent();
}

#[test]
fn parallel_typed_edges_collapse_to_one_neighbor() {
    let mut s = GraphStore::new();
    s.add_edge(0, 1, 3).unwrap();
    s.add_edge(0, 1, 5).unwrap();
    s.commit();

    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::Permanent), vec![1]);
    assert_eq!(
        s.adjacency(0, Direction::Forward, Version::Permanent, TypeFilter::Only(3))
            .iter()
            .collect::<Vec<_>>(),
        vec![1]
    );
    assert!(
        s.adjacency(0, Direction::Forward, Version::Permanent, TypeFilter::Only(4))
            .is_empty()
    );
    assert_eq!(edges(&s, Version::Permanent), vec![(0, 1)]);
}

#[test]
fn type_filtered_deletion_leaves_the_other_type() {
    let mut s = GraphStore::new();
    s.add_edge(0, 1, 3).unwrap();
    s.add_edge(0, 1, 5).unwrap();
    s.commit();
    s.delete_edge(0, 1, 3);
    s.commit();

    let view = s.adjacency(0, Direction::Forward, Version::Permanent, TypeFilter::Only(3));
    assert!(view.is_empty());
    assert_eq!(neighbors(&s, 0, Direction::Forward, Version::Permanent), vec![1]);
    assert_eq!(s.edge_types_between(0, 1), vec![5]);
}

#[test]
fn views_are_sorted() {
    let mut s = store!(5 - 0, 5 - 9, 5 - 3, 5 - 7, 5 - 1);
    assert_eq!(
        neighbors(&s, 5, Direction::Forward, Version::Permanent),
        vec![0, 1, 3, 7, 9]
    );
    s.add_edge(5, 4, 0).unwrap();
    assert_eq!(
        neighbors(&s, 5, Direction::Forward, Version::Merged),
        vec![0, 1, 3, 4, 7, 9]
    );
}

#[test]
fn never_mentioned_vertex_has_empty_adjacency() {
    let s = store!(0 - 1);
    assert!(neighbors(&s, 100, Direction::Forward, Version::Merged).is_empty());
    assert!(neighbors(&s, 100, Direction::Backward, Version::Permanent).is_empty());
}

#[test]
fn commit_is_idempotent_on_empty_diffs() {
    let mut s = store!(0 - 1, 1 - 2);
    let before = edges(&s, Version::Permanent);
    s.commit();
    s.commit();
    assert_eq!(edges(&s, Version::Permanent), before);
    s.check_consistent();
}

#[test]
fn self_loops_are_stored_and_mirrored() {
    let mut s = store!(3 - 3, 3 - 4);
    assert_eq!(neighbors(&s, 3, Direction::Forward, Version::Permanent), vec![3, 4]);
    assert_eq!(neighbors(&s, 3, Direction::Backward, Version::Permanent), vec![3]);
    assert!(edges(&s, Version::Permanent).contains(&(3, 3)));
    s.delete_edge(3, 3, 0);
    s.commit();
    assert_eq!(neighbors(&s, 3, Direction::Forward, Version::Permanent), vec![4]);
    s.check_consistent();
}

#[test]
fn properties_follow_their_edge() {
    let mut s = GraphStore::new();
    let id = s.add_edge(0, 1, 0).unwrap();
    s.set_edge_prop(id, 0, Value::Int(7));
    s.set_vertex_prop(0, 1, Value::Str("root".to_owned())).unwrap();
    s.commit();

    assert_eq!(s.edge_prop(id, 0), Some(&Value::Int(7)));
    assert_eq!(s.vertex_prop(0, 1), Some(&Value::Str("root".to_owned())));

    s.delete_edge(0, 1, 0);
    s.commit();
    assert_eq!(s.edge_prop(id, 0), None);
}

// When generating graphs we could put in as many as n^2 edges, but a realistic average degree
// is small, so we cap the edge count at a multiple of the vertex count.
const MAX_AVG_DEGREE: usize = 5;

prop_compose! {
    // An arbitrary committed store over `max_vertices` vertices, untyped edges only.
    fn arb_store(max_vertices: usize)
                (num in 2..max_vertices)
                (edges in hash_set((0..num, 0..num), 0..(num * MAX_AVG_DEGREE)))
                -> GraphStore
    {
        let mut s = GraphStore::new();
        for (u, v) in edges {
            s.add_edge(u as VertexId, v as VertexId, 0).unwrap();
        }
        s.commit();
        s
    }
}

// A batch of changes against a store: a set of edges to add and a set to delete.
fn arb_changes(
    max_vertices: usize,
) -> impl Strategy<Value = (Vec<(VertexId, VertexId)>, Vec<(VertexId, VertexId)>)> {
    let edge = (0..max_vertices, 0..max_vertices);
    (
        hash_set(edge.clone(), 0..20),
        hash_set(edge, 0..20),
    )
        .prop_map(|(add, del)| {
            let add = add.into_iter().map(|(u, v)| (u as VertexId, v as VertexId)).collect();
            let del = del.into_iter().map(|(u, v)| (u as VertexId, v as VertexId)).collect();
            (add, del)
        })
}

proptest! {
    #[test]
    fn random_stores_are_consistent(s in arb_store(20)) {
        s.check_consistent();
    }

    #[test]
    fn staging_preserves_consistency_and_commit_folds(
        s in arb_store(20),
        changes in arb_changes(20),
    ) {
        let (add, del) = changes;
        let mut s = s;
        for &(u, v) in &add {
            s.add_edge(u, v, 0).unwrap();
        }
        for &(u, v) in &del {
            s.delete_edge(u, v, 0);
        }
        s.check_consistent();

        // The merged view before commit must equal the permanent view after.
        let merged = edges(&s, Version::Merged);
        s.commit();
        s.check_consistent();
        prop_assert_eq!(edges(&s, Version::Permanent), merged);
        prop_assert!(!s.has_staged_changes());
    }

    #[test]
    fn undoing_staged_changes_restores_the_store(
        s in arb_store(20),
        adds in hash_set((0u32..20, 0u32..20), 0..20),
    ) {
        let mut s = s;
        let before_merged = edges(&s, Version::Merged);
        let before_perm = edges(&s, Version::Permanent);

        // Only consider additions of edges that don't exist yet, then delete exactly those.
        let fresh: Vec<_> = adds
            .into_iter()
            .filter(|&(u, v)| {
                !s.adjacency(u, Direction::Forward, Version::Merged, TypeFilter::Any).contains(v)
            })
            .collect();
        for &(u, v) in &fresh {
            s.add_edge(u, v, 0).unwrap();
        }
        for &(u, v) in &fresh {
            s.delete_edge(u, v, 0);
        }

        s.check_consistent();
        prop_assert!(!s.has_staged_changes());
        prop_assert_eq!(edges(&s, Version::Merged), before_merged);
        prop_assert_eq!(edges(&s, Version::Permanent), before_perm);
    }

    #[test]
    fn mirror_invariant_holds_in_every_version(
        s in arb_store(15),
        changes in arb_changes(15),
    ) {
        let (add, del) = changes;
        let mut s = s;
        for &(u, v) in &add {
            s.add_edge(u, v, 0).unwrap();
        }
        for &(u, v) in &del {
            s.delete_edge(u, v, 0);
        }

        for version in [Version::Permanent, Version::Merged, Version::DiffPlus, Version::DiffMinus] {
            for u in 0..s.vertex_count() as VertexId {
                for v in neighbors(&s, u, Direction::Forward, version) {
                    prop_assert!(
                        s.adjacency(v, Direction::Backward, version, TypeFilter::Any).contains(u),
                        "forward {}->{} missing from backward view in {:?}", u, v, version,
                    );
                }
                for v in neighbors(&s, u, Direction::Backward, version) {
                    prop_assert!(
                        s.adjacency(v, Direction::Forward, version, TypeFilter::Any).contains(u),
                        "backward {}<-{} missing from forward view in {:?}", u, v, version,
                    );
                }
            }
        }
    }
}
