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

//! The allocation primitive for the aggregation engine: one contiguous,
//! growable byte arena holding fixed-width elements, addressed by checked
//! element offsets rather than raw pointers.

use arrow::buffer::MutableBuffer;
use log::{debug, warn};

use crate::error::{ArbalestError, Result};

/// Owns and grows the backing byte buffer for one fixed-width element
/// column. Capacity only grows while the holder is live, growth preserves
/// previously written bytes at their original offsets, and all access is
/// bounds-checked against the buffer length.
///
/// Exclusively owned by one operator instance; release happens through
/// [AccumulatorHolder::close] with `Drop` as the backstop on error paths.
#[derive(Debug)]
pub struct AccumulatorHolder {
    buffer: MutableBuffer,
    element_width: usize,
    capacity_elements: usize,
    max_buffer_bytes: usize,
    closed: bool,
}

impl AccumulatorHolder {
    /// Create a holder for `element_width`-byte elements with room for
    /// `initial_capacity_elements`, bounded by `max_buffer_bytes`.
    pub fn try_new(
        element_width: usize,
        initial_capacity_elements: usize,
        max_buffer_bytes: usize,
    ) -> Result<Self> {
        if element_width == 0 {
            return Err(ArbalestError::Internal(
                "accumulator element width must be positive".to_string(),
            ));
        }
        let initial_bytes = initial_capacity_elements
            .checked_mul(element_width)
            .ok_or_else(|| {
                ArbalestError::Internal(format!(
                    "accumulator initial capacity overflows: {} elements of {} bytes",
                    initial_capacity_elements, element_width
                ))
            })?;
        if initial_bytes > max_buffer_bytes {
            return Err(ArbalestError::ResourcesExhausted(format!(
                "accumulator buffer needs {} bytes but is limited to {}",
                initial_bytes, max_buffer_bytes
            )));
        }
        let mut buffer = MutableBuffer::new(initial_bytes);
        buffer.resize(initial_bytes, 0);
        Ok(Self {
            buffer,
            element_width,
            capacity_elements: initial_capacity_elements,
            max_buffer_bytes,
            closed: false,
        })
    }

    pub fn element_width(&self) -> usize {
        self.element_width
    }

    pub fn capacity_elements(&self) -> usize {
        self.capacity_elements
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Make sure the buffer can hold `elements` elements, doubling until
    /// sufficient. Fails with [ArbalestError::ResourcesExhausted] when the
    /// configured maximum cannot satisfy the request, leaving the buffer
    /// untouched.
    pub fn ensure_capacity(&mut self, elements: usize) -> Result<()> {
        if self.closed {
            return Err(ArbalestError::Internal(
                "ensure_capacity on a closed accumulator holder".to_string(),
            ));
        }
        if elements <= self.capacity_elements {
            return Ok(());
        }
        let required_bytes = elements.checked_mul(self.element_width).ok_or_else(|| {
            ArbalestError::Internal(format!(
                "accumulator capacity request overflows: {} elements of {} bytes",
                elements, self.element_width
            ))
        })?;
        if required_bytes > self.max_buffer_bytes {
            return Err(ArbalestError::ResourcesExhausted(format!(
                "accumulator buffer needs {} bytes but is limited to {}",
                required_bytes, self.max_buffer_bytes
            )));
        }
        let mut new_bytes = self.buffer.len().max(self.element_width);
        while new_bytes < required_bytes {
            new_bytes = new_bytes.saturating_mul(2).min(self.max_buffer_bytes);
        }
        debug!(
            "growing accumulator holder from {} to {} bytes",
            self.buffer.len(),
            new_bytes
        );
        // resize zero-fills the new tail and keeps existing bytes in place
        self.buffer.resize(new_bytes, 0);
        self.capacity_elements = new_bytes / self.element_width;
        Ok(())
    }

    /// Read access to `elements` elements starting at `element_offset`
    pub fn slice(&self, element_offset: usize, elements: usize) -> Result<&[u8]> {
        let (start, end) = self.byte_range(element_offset, elements)?;
        Ok(&self.buffer.as_slice()[start..end])
    }

    /// Write access to `elements` elements starting at `element_offset`
    pub fn slice_mut(&mut self, element_offset: usize, elements: usize) -> Result<&mut [u8]> {
        let (start, end) = self.byte_range(element_offset, elements)?;
        Ok(&mut self.buffer.as_slice_mut()[start..end])
    }

    fn byte_range(&self, element_offset: usize, elements: usize) -> Result<(usize, usize)> {
        if self.closed {
            return Err(ArbalestError::Internal(
                "access to a closed accumulator holder".to_string(),
            ));
        }
        let start = element_offset
            .checked_mul(self.element_width)
            .ok_or_else(|| range_error(element_offset, elements, self.capacity_elements))?;
        let end = elements
            .checked_mul(self.element_width)
            .and_then(|len| start.checked_add(len))
            .ok_or_else(|| range_error(element_offset, elements, self.capacity_elements))?;
        if end > self.buffer.len() {
            return Err(range_error(element_offset, elements, self.capacity_elements));
        }
        Ok((start, end))
    }

    /// Release the buffer. Safe to call once per lifecycle; a second call is
    /// a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.capacity_elements = 0;
        self.buffer = MutableBuffer::new(0);
    }
}

impl Drop for AccumulatorHolder {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "accumulator holder dropped without close, releasing {} bytes",
                self.buffer.len()
            );
            self.close();
        }
    }
}

fn range_error(element_offset: usize, elements: usize, capacity: usize) -> ArbalestError {
    ArbalestError::Internal(format!(
        "accumulator access out of range: elements {}..{} of {}",
        element_offset,
        element_offset.saturating_add(elements),
        capacity
    ))
}
