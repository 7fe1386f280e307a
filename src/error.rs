// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Arbalest error types

use std::error;
use std::fmt::{Display, Formatter};
use std::io;
use std::result;

use arrow::error::ArrowError;

/// Result type for operations that could result in an [ArbalestError]
pub type Result<T> = result::Result<T, ArbalestError>;

/// Arbalest error
#[derive(Debug)]
pub enum ArbalestError {
    /// Error returned by arrow.
    ArrowError(ArrowError),
    /// Error associated to I/O operations and associated traits.
    IoError(io::Error),
    /// Error returned when an identifier string is malformed.
    /// The input is rejected at the call boundary, never silently defaulted.
    Format(String),
    /// Error returned when a control-message envelope carries a codec tag
    /// outside the known set. Fatal for that message, no fallback decoding.
    UnsupportedCodec(u8),
    /// Error returned when a control-message payload is truncated or
    /// structurally invalid. Fatal for that message.
    Deserialization(String),
    /// Error returned when growing an accumulator buffer would exceed its
    /// configured maximum. Fatal for the owning operator; the surrounding
    /// engine aborts the enclosing fragment.
    ResourcesExhausted(String),
    /// Error returned on a branch that we know it is possible
    /// but to which we still have no implementation for.
    NotImplemented(String),
    /// Error raised when an internal invariant is violated during execution,
    /// e.g. an accumulator drain over out-of-range offsets. This indicates a
    /// defect rather than a recoverable runtime condition.
    Internal(String),
}

impl From<ArrowError> for ArbalestError {
    fn from(e: ArrowError) -> Self {
        ArbalestError::ArrowError(e)
    }
}

impl From<io::Error> for ArbalestError {
    fn from(e: io::Error) -> Self {
        ArbalestError::IoError(e)
    }
}

impl From<serde_json::Error> for ArbalestError {
    fn from(e: serde_json::Error) -> Self {
        ArbalestError::Deserialization(format!("json control payload: {}", e))
    }
}

impl Display for ArbalestError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match *self {
            ArbalestError::ArrowError(ref desc) => write!(f, "Arrow error: {}", desc),
            ArbalestError::IoError(ref desc) => write!(f, "IO error: {}", desc),
            ArbalestError::Format(ref desc) => {
                write!(f, "Format error: {}", desc)
            }
            ArbalestError::UnsupportedCodec(tag) => {
                write!(f, "Unsupported control codec tag: {}", tag)
            }
            ArbalestError::Deserialization(ref desc) => {
                write!(f, "Deserialization error: {}", desc)
            }
            ArbalestError::ResourcesExhausted(ref desc) => {
                write!(f, "Resources exhausted: {}", desc)
            }
            ArbalestError::NotImplemented(ref desc) => {
                write!(f, "This feature is not implemented: {}", desc)
            }
            ArbalestError::Internal(ref desc) => {
                write!(
                    f,
                    "Internal error: {}. This was likely caused by a bug in \
                     Arbalest's code and we would welcome that you file a bug report",
                    desc
                )
            }
        }
    }
}

impl error::Error for ArbalestError {}
