//! Statement dispatch: owns the database and turns parsed statements into calls on it.

use anyhow::{Context, Result};
use colored::Colorize;
use itertools::Itertools;
use libtrellis::{FileSink, GraphDb, MemorySink, ResultTag};
use log::info;

use crate::parser::{Statement, parse_statement};

/// What the caller should do after a statement ran.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Keep reading statements.
    Continue,
    /// The user asked to leave.
    Exit,
}

/// An interactive session: one database plus the statement loop's state.
pub struct Session {
    db: GraphDb,
}

impl Session {
    pub fn new() -> Session {
        Session { db: GraphDb::new() }
    }

    /// Parses and runs one statement, printing any results to stdout.
    pub fn execute(&mut self, text: &str) -> Result<Outcome> {
        let statement = parse_statement(text).context("Failed to parse the statement")?;
        match statement {
            Statement::Exit => return Ok(Outcome::Exit),
            Statement::Create(edges) => {
                let count = edges.len();
                for spec in &edges {
                    self.db.create_edge(spec)?;
                }
                // Each statement is one change batch; continuous queries see it now.
                self.db.commit()?;
                info!("created {} edges", count);
            }
            Statement::Delete { from, to, ty } => {
                let count = self.db.delete_edges(from, to, ty.as_deref());
                self.db.commit()?;
                info!("deleted {} edges", count);
            }
            Statement::Match(query) => {
                let mut sink = MemorySink::new();
                let stats = self.db.one_time_match(&query, &mut sink)?;
                for (tag, row) in sink.rows() {
                    if row.is_empty() {
                        println!("{}", paint(*tag));
                    } else {
                        println!("{} {}", row.iter().join(" "), paint(*tag));
                    }
                }
                info!(
                    "match produced {} tuples with {} intersection work",
                    stats.tuples, stats.intersection_work
                );
            }
            Statement::ContinuousMatch { query, path } => {
                let sink = FileSink::create(&path)?;
                self.db.continuous_match(&query, Box::new(sink))?;
                println!("Continuous match registered; changes will be appended to {path}");
            }
        }
        Ok(Outcome::Continue)
    }
}

fn paint(tag: ResultTag) -> colored::ColoredString {
    match tag {
        ResultTag::Matched => tag.name().normal(),
        ResultTag::Emerged => tag.name().green(),
        ResultTag::Deleted => tag.name().red(),
    }
}
