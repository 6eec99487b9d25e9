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

// Allow missing docs in this module, for now, because we need to think more about the types of
// errors we're exposing.
#![allow(missing_docs)]

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("There is no edge type named {0:?}")]
    UnknownType(String),
    #[error("There is no property key named {0:?}")]
    UnknownProperty(String),
    #[error("The variable {0:?} is not bound by the pattern")]
    UnboundVariable(String),
    #[error("The pattern has no edges")]
    EmptyPattern,
    #[error("The pattern is not connected")]
    DisconnectedPattern,
    #[error("Aggregations are not supported in continuous queries")]
    ContinuousAggregation,
    #[error("Ran out of vertex ids")]
    VertexIdOverflow,
    #[error("Ran out of edge ids")]
    EdgeIdOverflow,
    #[error("The value bytes are truncated or malformed")]
    MalformedValue,
    #[error("This text isn't valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("I/O error: {}. Details: {}", .0, .1)]
    Io(io::Error, String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e, "".to_owned())
    }
}

impl From<(io::Error, &'static str)> for Error {
    fn from((e, msg): (io::Error, &'static str)) -> Error {
        Error::Io(e, msg.to_owned())
    }
}
