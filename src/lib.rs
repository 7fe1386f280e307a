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

//! Arbalest is the execution core of a distributed, vectorized query
//! engine: globally unique execution identifiers addressing every unit of
//! distributed work, the compact binary protocol for control payloads
//! exchanged between execution stages, and the per-group aggregation
//! engine that accumulates values into group-keyed lists.
//!
//! Planning, cataloging, storage and transport live in the surrounding
//! system; this crate is the part they all lean on.

pub mod array_agg;
pub mod control;
pub mod error;
pub mod execution_id;

pub use error::{ArbalestError, Result};

pub const ARBALEST_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn print_version() {
    println!("Arbalest version: {}", ARBALEST_VERSION)
}
