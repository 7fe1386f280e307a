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

//! Execution identifiers: every unit of distributed work is addressed by a
//! 128-bit query identifier plus a hierarchical fragment address. The string
//! forms produced here are used system-wide for logging, thread naming and
//! cross-process addressing, so they are canonical and round-trip exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ArbalestError, Result};

/// Globally unique identifier of one query, stored as the two 64-bit halves
/// of a UUID. The canonical text form is the standard lowercase hyphenated
/// UUID representation, and `parse(format(id)) == id` for all values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId {
    /// Most significant 64 bits of the identifier
    pub part1: u64,
    /// Least significant 64 bits of the identifier
    pub part2: u64,
}

impl QueryId {
    /// Create a query id from its two halves
    pub fn new(part1: u64, part2: u64) -> Self {
        Self { part1, part2 }
    }

    /// Assign a fresh, random query id
    pub fn new_unique() -> Self {
        let (part1, part2) = Uuid::new_v4().as_u64_pair();
        Self { part1, part2 }
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u64_pair(self.part1, self.part2))
    }
}

impl FromStr for QueryId {
    type Err = ArbalestError;

    fn from_str(s: &str) -> Result<Self> {
        // Only the 36-character hyphenated form is canonical; the uuid crate
        // would also accept simple/braced/urn forms.
        if s.len() != 36 {
            return Err(ArbalestError::Format(format!(
                "invalid query id '{}': expected 36-character hyphenated UUID",
                s
            )));
        }
        let uuid = Uuid::parse_str(s).map_err(|e| {
            ArbalestError::Format(format!("invalid query id '{}': {}", s, e))
        })?;
        let (part1, part2) = uuid.as_u64_pair();
        Ok(Self { part1, part2 })
    }
}

/// Address of one fragment instance: the query it belongs to, the stage
/// within the plan (major) and the parallel instance within the stage
/// (minor). Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentHandle {
    pub query_id: QueryId,
    pub major_fragment_id: u32,
    pub minor_fragment_id: u32,
}

impl FragmentHandle {
    pub fn new(query_id: QueryId, major_fragment_id: u32, minor_fragment_id: u32) -> Self {
        Self {
            query_id,
            major_fragment_id,
            minor_fragment_id,
        }
    }
}

impl fmt::Display for FragmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.query_id, self.major_fragment_id, self.minor_fragment_id
        )
    }
}

/// Render the address of one or more minor fragments of a stage. A single
/// minor fragment renders as a bare index, multiple render as a list in
/// input order: `"<queryId>:2:5"` vs `"<queryId>:2:[1, 2, 3]"`.
pub fn fragment_identifiers(query_id: QueryId, major_fragment_id: u32, minor_fragment_ids: &[u32]) -> String {
    let minors = if minor_fragment_ids.len() == 1 {
        minor_fragment_ids[0].to_string()
    } else {
        format!("{:?}", minor_fragment_ids)
    };
    format!("{}:{}:{}", query_id, major_fragment_id, minors)
}

/// Name for the thread (or task) driving a fragment's pipeline, e.g.
/// `"e0a1…:frag:2:5"`. Single-minor form only.
pub fn executor_thread_name(handle: &FragmentHandle) -> String {
    format!(
        "{}:frag:{}:{}",
        handle.query_id, handle.major_fragment_id, handle.minor_fragment_id
    )
}

/// Short `"<major>:<minor>"` form, used where the query id is already
/// established by context.
pub fn fragment_id(handle: &FragmentHandle) -> String {
    format!("{}:{}", handle.major_fragment_id, handle.minor_fragment_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_id_round_trip() {
        for _ in 0..256 {
            let id = QueryId::new(rand::random(), rand::random());
            let formatted = id.to_string();
            assert_eq!(formatted.len(), 36);
            let parsed: QueryId = formatted.parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn query_id_canonical_form() {
        let id = QueryId::new(0x123e4567e89b12d3, 0xa456426614174000);
        assert_eq!(id.to_string(), "123e4567-e89b-12d3-a456-426614174000");
    }

    #[test]
    fn query_id_zero() {
        let id = QueryId::new(0, 0);
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
        assert_eq!(id.to_string().parse::<QueryId>().unwrap(), id);
    }

    #[test]
    fn query_id_rejects_malformed() {
        assert!(matches!(
            "not-a-uuid".parse::<QueryId>(),
            Err(ArbalestError::Format(_))
        ));
        // simple (unhyphenated) form is not canonical
        assert!(matches!(
            "123e4567e89b12d3a456426614174000".parse::<QueryId>(),
            Err(ArbalestError::Format(_))
        ));
        // braced form is not canonical
        assert!(matches!(
            "{123e4567-e89b-12d3-a456-426614174000}".parse::<QueryId>(),
            Err(ArbalestError::Format(_))
        ));
        assert!(matches!(
            "123e4567-e89b-12d3-a456-42661417400g".parse::<QueryId>(),
            Err(ArbalestError::Format(_))
        ));
    }

    #[test]
    fn fragment_handle_display() {
        let id = QueryId::new(0x123e4567e89b12d3, 0xa456426614174000);
        let handle = FragmentHandle::new(id, 2, 5);
        assert_eq!(
            handle.to_string(),
            "123e4567-e89b-12d3-a456-426614174000:2:5"
        );
    }

    #[test]
    fn fragment_identifiers_single_minor() {
        let id = QueryId::new(0x123e4567e89b12d3, 0xa456426614174000);
        assert_eq!(
            fragment_identifiers(id, 2, &[5]),
            "123e4567-e89b-12d3-a456-426614174000:2:5"
        );
    }

    #[test]
    fn fragment_identifiers_multiple_minors() {
        let id = QueryId::new(0x123e4567e89b12d3, 0xa456426614174000);
        assert_eq!(
            fragment_identifiers(id, 2, &[1, 2, 3]),
            "123e4567-e89b-12d3-a456-426614174000:2:[1, 2, 3]"
        );
    }

    #[test]
    fn fragment_identifiers_preserve_order() {
        let id = QueryId::new_unique();
        let rendered = fragment_identifiers(id, 7, &[9, 3, 6]);
        assert!(rendered.ends_with(":7:[9, 3, 6]"));
    }

    #[test]
    fn thread_name() {
        let id = QueryId::new(0x123e4567e89b12d3, 0xa456426614174000);
        let handle = FragmentHandle::new(id, 2, 5);
        assert_eq!(
            executor_thread_name(&handle),
            "123e4567-e89b-12d3-a456-426614174000:frag:2:5"
        );
    }

    #[test]
    fn short_fragment_id() {
        let handle = FragmentHandle::new(QueryId::new_unique(), 4, 11);
        assert_eq!(fragment_id(&handle), "4:11");
    }
}
