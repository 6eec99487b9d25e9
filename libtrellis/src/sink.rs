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

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

use crate::plan::ResultTag;
use crate::value::Value;
use crate::{Error, VertexId};

/// Where result tuples go.
///
/// The executor and the operator pipeline only ever append; a sink decides what retention
/// means. Implementations must not reorder rows, but callers get no ordering promise beyond
/// the executor's own enumeration order.
pub trait OutputSink {
    /// Appends one result row.
    fn append(&mut self, tag: ResultTag, row: &[Value]) -> Result<(), Error>;

    /// Flushes buffered output. The default does nothing.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

// A sink can be shared: register one half with a continuous query and keep the other half
// to read what arrived.
impl<S: OutputSink> OutputSink for std::rc::Rc<std::cell::RefCell<S>> {
    fn append(&mut self, tag: ResultTag, row: &[Value]) -> Result<(), Error> {
        self.borrow_mut().append(tag, row)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.borrow_mut().flush()
    }
}

/// A sink that retains every appended row in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    rows: Vec<(ResultTag, Vec<Value>)>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// Every row appended so far, in arrival order.
    pub fn rows(&self) -> &[(ResultTag, Vec<Value>)] {
        &self.rows
    }

    /// How many rows have been appended?
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows carrying `tag` that consist entirely of ids, sorted. Two result sets are
    /// equal as multisets exactly when this canonical form is equal.
    ///
    /// # Panics
    ///
    /// Panics if such a row contains a non-integer value.
    pub fn id_tuples(&self, tag: ResultTag) -> Vec<Vec<VertexId>> {
        let mut out: Vec<Vec<VertexId>> = self
            .rows
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, row)| {
                row.iter()
                    .map(|v| match v {
                        Value::Int(i) => *i as VertexId,
                        other => panic!("expected an id column, found {:?}", other),
                    })
                    .collect()
            })
            .collect();
        out.sort();
        out
    }
}

impl OutputSink for MemorySink {
    fn append(&mut self, tag: ResultTag, row: &[Value]) -> Result<(), Error> {
        self.rows.push((tag, row.to_vec()));
        Ok(())
    }
}

/// A sink that writes one line per tuple: the values separated by spaces, then the tag name.
#[derive(Debug)]
pub struct FileSink {
    out: BufWriter<fs::File>,
}

impl FileSink {
    /// Creates (or truncates) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<FileSink, Error> {
        let file = fs::File::create(path.as_ref())
            .map_err(|e| (e, "Failed to create the output file"))?;
        Ok(FileSink {
            out: BufWriter::new(file),
        })
    }
}

impl OutputSink for FileSink {
    fn append(&mut self, tag: ResultTag, row: &[Value]) -> Result<(), Error> {
        if row.is_empty() {
            writeln!(self.out, "{}", tag.name())?;
        } else {
            writeln!(self.out, "{} {}", row.iter().join(" "), tag.name())?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_canonicalizes_multisets() {
        let mut sink = MemorySink::new();
        sink.append(ResultTag::Matched, &[Value::Int(3), Value::Int(0)])
            .unwrap();
        sink.append(ResultTag::Matched, &[Value::Int(1), Value::Int(2)])
            .unwrap();
        sink.append(ResultTag::Emerged, &[Value::Int(9), Value::Int(9)])
            .unwrap();

        assert_eq!(
            sink.id_tuples(ResultTag::Matched),
            vec![vec![1, 2], vec![3, 0]]
        );
        assert_eq!(sink.id_tuples(ResultTag::Emerged), vec![vec![9, 9]]);
        assert_eq!(sink.id_tuples(ResultTag::Deleted), Vec::<Vec<u32>>::new());
    }

    #[test]
    fn file_sink_writes_one_line_per_tuple() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut sink = FileSink::create(&path).unwrap();
        sink.append(ResultTag::Emerged, &[Value::Int(0), Value::Int(1), Value::Int(3)])
            .unwrap();
        sink.append(
            ResultTag::Deleted,
            &[Value::Int(4), Value::Str("x".to_owned())],
        )
        .unwrap();
        sink.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "0 1 3 EMERGED\n4 x DELETED\n");
    }
}
