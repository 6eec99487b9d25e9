use std::cell::RefCell;
use std::rc::Rc;

use libtrellis::{
    AggOp, Aggregation, Cmp, EdgeSpec, Error, FileSink, GraphDb, MemorySink, PatternEdge,
    Predicate, ProjectionItem, StructuredQuery, Value, VertexSpec,
};
use pretty_assertions::assert_eq;

fn edge(from: &str, to: &str) -> PatternEdge {
    PatternEdge {
        from: from.to_owned(),
        to: to.to_owned(),
        ty: None,
        var: None,
    }
}

fn knows(from: &str, e: Option<&str>, to: &str) -> PatternEdge {
    PatternEdge {
        from: from.to_owned(),
        to: to.to_owned(),
        ty: Some("KNOWS".to_owned()),
        var: e.map(str::to_owned),
    }
}

// Three people: 0 knows 1 (weight 1), 1 knows 2 (weight 5).
fn people_db() -> GraphDb {
    let mut db = GraphDb::new();
    let person = |id, age: i32, name: &str| VertexSpec {
        id,
        ty: Some("Person".to_owned()),
        props: vec![
            ("age".to_owned(), Value::Int(age)),
            ("name".to_owned(), Value::Str(name.to_owned())),
        ],
    };
    db.create_edge(&EdgeSpec {
        from: person(0, 25, "ada"),
        to: person(1, 40, "bea"),
        ty: Some("KNOWS".to_owned()),
        props: vec![("weight".to_owned(), Value::Int(1))],
    })
    .unwrap();
    db.create_edge(&EdgeSpec {
        from: person(1, 40, "bea"),
        to: person(2, 33, "cal"),
        ty: Some("KNOWS".to_owned()),
        props: vec![("weight".to_owned(), Value::Int(5))],
    })
    .unwrap();
    db.commit().unwrap();
    db
}

fn run(db: &GraphDb, query: &StructuredQuery) -> Vec<Vec<Value>> {
    let mut sink = MemorySink::new();
    db.one_time_match(query, &mut sink).unwrap();
    sink.rows().iter().map(|(_, row)| row.clone()).collect()
}

#[test]
fn vertex_predicates_filter_rows() {
    let db = people_db();
    let query = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        predicates: vec![Predicate {
            var: "a".to_owned(),
            key: "age".to_owned(),
            cmp: Cmp::Gt,
            value: Value::Int(30),
        }],
        ..StructuredQuery::default()
    };
    assert_eq!(run(&db, &query), vec![vec![Value::Int(1), Value::Int(2)]]);
}

#[test]
fn projection_reorders_and_resolves_properties() {
    let db = people_db();
    let query = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        projection: vec![
            ProjectionItem::Prop("b".to_owned(), "name".to_owned()),
            ProjectionItem::Var("a".to_owned()),
        ],
        ..StructuredQuery::default()
    };
    assert_eq!(
        run(&db, &query),
        vec![
            vec![Value::Str("bea".to_owned()), Value::Int(0)],
            vec![Value::Str("cal".to_owned()), Value::Int(1)],
        ]
    );
}

#[test]
fn rows_with_a_missing_projected_property_are_dropped() {
    let mut db = people_db();
    // Vertex 9 has no properties at all.
    db.create_edge(&EdgeSpec {
        from: VertexSpec::bare(9),
        to: VertexSpec::bare(2),
        ty: Some("KNOWS".to_owned()),
        props: vec![],
    })
    .unwrap();
    db.commit().unwrap();

    let query = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        projection: vec![
            ProjectionItem::Var("a".to_owned()),
            ProjectionItem::Prop("a".to_owned(), "age".to_owned()),
        ],
        ..StructuredQuery::default()
    };
    assert_eq!(
        run(&db, &query),
        vec![
            vec![Value::Int(0), Value::Int(25)],
            vec![Value::Int(1), Value::Int(40)],
        ]
    );
}

#[test]
fn edge_variables_resolve_to_edge_ids() {
    let db = people_db();
    let query = StructuredQuery {
        edges: vec![knows("a", Some("e"), "b")],
        projection: vec![ProjectionItem::Var("e".to_owned())],
        ..StructuredQuery::default()
    };
    assert_eq!(
        run(&db, &query),
        vec![vec![Value::Int(0)], vec![Value::Int(1)]]
    );
}

#[test]
fn edge_predicates_read_edge_properties() {
    let db = people_db();
    let query = StructuredQuery {
        edges: vec![knows("a", Some("e"), "b")],
        predicates: vec![Predicate {
            var: "e".to_owned(),
            key: "weight".to_owned(),
            cmp: Cmp::Ge,
            value: Value::Int(2),
        }],
        ..StructuredQuery::default()
    };
    assert_eq!(run(&db, &query), vec![vec![Value::Int(1), Value::Int(2)]]);
}

#[test]
fn count_star_over_an_empty_stream_is_zero() {
    let db = GraphDb::new();
    let query = StructuredQuery {
        edges: vec![edge("a", "b")],
        aggregations: vec![Aggregation {
            op: AggOp::CountStar,
            over: None,
        }],
        ..StructuredQuery::default()
    };
    assert_eq!(run(&db, &query), vec![vec![Value::Int(0)]]);
}

#[test]
fn grouped_count() {
    let db = {
        let mut db = GraphDb::new();
        for (u, v) in [(0, 1), (0, 2), (1, 2)] {
            db.create_edge(&EdgeSpec::bare(u, v)).unwrap();
        }
        db.commit().unwrap();
        db
    };
    let query = StructuredQuery {
        edges: vec![edge("a", "b")],
        projection: vec![ProjectionItem::Var("a".to_owned())],
        aggregations: vec![Aggregation {
            op: AggOp::CountStar,
            over: None,
        }],
        ..StructuredQuery::default()
    };
    assert_eq!(
        run(&db, &query),
        vec![
            vec![Value::Int(0), Value::Int(2)],
            vec![Value::Int(1), Value::Int(1)],
        ]
    );
}

#[test]
fn sum_min_max_avg_over_properties() {
    let db = people_db();
    let over = |name: &str| {
        Some(ProjectionItem::Prop("b".to_owned(), name.to_owned()))
    };
    let query = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        aggregations: vec![
            Aggregation { op: AggOp::Sum, over: over("age") },
            Aggregation { op: AggOp::Min, over: over("age") },
            Aggregation { op: AggOp::Max, over: over("age") },
            Aggregation { op: AggOp::Avg, over: over("age") },
        ],
        ..StructuredQuery::default()
    };
    assert_eq!(
        run(&db, &query),
        vec![vec![
            Value::Int(73),
            Value::Int(33),
            Value::Int(40),
            Value::Double(36.5),
        ]]
    );
}

#[test]
fn unknown_names_fail_at_plan_time() {
    let db = people_db();
    let mut sink = MemorySink::new();

    let bad_type = StructuredQuery::from_pattern(vec![PatternEdge {
        from: "a".to_owned(),
        to: "b".to_owned(),
        ty: Some("ADMIRES".to_owned()),
        var: None,
    }]);
    assert!(matches!(
        db.one_time_match(&bad_type, &mut sink),
        Err(Error::UnknownType(_))
    ));

    let bad_key = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        predicates: vec![Predicate {
            var: "a".to_owned(),
            key: "salary".to_owned(),
            cmp: Cmp::Eq,
            value: Value::Int(0),
        }],
        ..StructuredQuery::default()
    };
    assert!(matches!(
        db.one_time_match(&bad_key, &mut sink),
        Err(Error::UnknownProperty(_))
    ));

    let bad_var = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        projection: vec![ProjectionItem::Var("z".to_owned())],
        ..StructuredQuery::default()
    };
    assert!(matches!(
        db.one_time_match(&bad_var, &mut sink),
        Err(Error::UnboundVariable(_))
    ));

    // Nothing reached the sink from any of the failed plans.
    assert!(sink.is_empty());
}

#[test]
fn continuous_queries_reject_aggregations() {
    let mut db = people_db();
    let query = StructuredQuery {
        edges: vec![knows("a", None, "b")],
        aggregations: vec![Aggregation {
            op: AggOp::CountStar,
            over: None,
        }],
        ..StructuredQuery::default()
    };
    let sink = Rc::new(RefCell::new(MemorySink::new()));
    assert!(matches!(
        db.continuous_match(&query, Box::new(sink)),
        Err(Error::ContinuousAggregation)
    ));
}

#[test]
fn continuous_match_writes_through_a_file_sink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deltas.txt");

    let mut db = GraphDb::new();
    for (u, v) in [(0, 1), (1, 2)] {
        db.create_edge(&EdgeSpec::bare(u, v)).unwrap();
    }
    db.commit().unwrap();

    let sink = FileSink::create(&path).unwrap();
    let triangle = StructuredQuery::from_pattern(vec![
        edge("a", "b"),
        edge("b", "c"),
        edge("c", "a"),
    ]);
    db.continuous_match(&triangle, Box::new(sink)).unwrap();

    db.create_edge(&EdgeSpec::bare(2, 0)).unwrap();
    db.commit().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.sort();
    assert_eq!(
        lines,
        vec!["0 1 2 EMERGED", "1 2 0 EMERGED", "2 0 1 EMERGED"]
    );
}
