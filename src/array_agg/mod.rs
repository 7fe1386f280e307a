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

//! Vectorized per-group array aggregation: accumulates, per group key, an
//! ordered list of fixed-width values observed across incoming columnar
//! batches, bounded by a configured maximum items per group, and
//! materializes the result into a list-typed output column.
//!
//! The accumulation algorithm is written once against the
//! [FixedWidthElement] capability; the element kind is chosen at
//! construction (see [create_group_array_accumulator]), never by inspecting
//! value types at runtime.

mod holder;

pub use holder::AccumulatorHolder;

use std::marker::PhantomData;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, ListBuilder, PrimitiveArray, PrimitiveBuilder,
};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Date64Type, Float32Type, Float64Type,
    Int32Type, Int64Type, TimeUnit, TimestampMillisecondType, UInt32Type, UInt64Type,
};

use crate::error::{ArbalestError, Result};

/// Fixed-width encode/decode capability of one element kind. Implemented
/// once per supported native type; the generic accumulation algorithm never
/// needs anything else.
pub trait FixedWidthElement: Copy + std::fmt::Debug + PartialEq + Send + Sync {
    /// Encoded width in bytes
    const WIDTH: usize;
    /// Write the element into a `WIDTH`-byte buffer
    fn encode(self, buf: &mut [u8]);
    /// Read the element back from a `WIDTH`-byte buffer
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! fixed_width_native {
    ($($native:ty),*) => {
        $(
            impl FixedWidthElement for $native {
                const WIDTH: usize = std::mem::size_of::<$native>();

                fn encode(self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$native>()];
                    raw.copy_from_slice(buf);
                    Self::from_le_bytes(raw)
                }
            }
        )*
    };
}

fixed_width_native!(i32, i64, u32, u64, f32, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupPhase {
    Accumulating,
    Capped,
    Drained,
}

#[derive(Debug, Clone, Copy)]
struct GroupState {
    start_offset: usize,
    count: usize,
    phase: GroupPhase,
}

/// Accumulates an ordered list of values per group key over one or more
/// input batches. Values land in a single byte arena; each group owns a
/// contiguous extent of `max_array_agg_size` elements assigned on first
/// sight, so group regions stay disjoint under arbitrary interleaving.
///
/// Per-group lifecycle: empty, accumulating, then capped (further values
/// silently dropped once `max_array_agg_size` is reached) or drained.
/// Exclusively owned by one operator instance for its lifetime.
#[derive(Debug)]
pub struct GroupArrayAccumulator<A: ArrowPrimitiveType>
where
    A::Native: FixedWidthElement,
{
    holder: AccumulatorHolder,
    groups: Vec<Option<GroupState>>,
    allocated_extents: usize,
    max_array_agg_size: usize,
    phantom: PhantomData<A>,
}

impl<A: ArrowPrimitiveType> GroupArrayAccumulator<A>
where
    A::Native: FixedWidthElement,
{
    pub fn try_new(
        max_array_agg_size: usize,
        initial_capacity_elements: usize,
        max_buffer_bytes: usize,
    ) -> Result<Self> {
        if max_array_agg_size == 0 {
            return Err(ArbalestError::Internal(
                "max_array_agg_size must be positive".to_string(),
            ));
        }
        let holder = AccumulatorHolder::try_new(
            <A::Native as FixedWidthElement>::WIDTH,
            initial_capacity_elements,
            max_buffer_bytes,
        )?;
        Ok(Self {
            holder,
            groups: Vec::new(),
            allocated_extents: 0,
            max_array_agg_size,
            phantom: PhantomData,
        })
    }

    /// Accumulate one value for `group`. Never fails for capping: once the
    /// group holds `max_array_agg_size` items the value is silently
    /// discarded, as are values arriving after the group was drained. The
    /// only error paths are buffer growth beyond the configured maximum
    /// and internal invariant violations.
    pub fn add(&mut self, group: usize, value: A::Native) -> Result<()> {
        if group >= self.groups.len() {
            self.groups.resize(group + 1, None);
        }
        let mut state = match self.groups[group] {
            Some(state) => state,
            None => {
                let start_offset = self
                    .allocated_extents
                    .checked_mul(self.max_array_agg_size)
                    .ok_or_else(|| {
                        ArbalestError::Internal(format!(
                            "group extent offset overflows for group {}",
                            group
                        ))
                    })?;
                self.holder
                    .ensure_capacity(start_offset + self.max_array_agg_size)?;
                self.allocated_extents += 1;
                GroupState {
                    start_offset,
                    count: 0,
                    phase: GroupPhase::Accumulating,
                }
            }
        };
        match state.phase {
            GroupPhase::Capped | GroupPhase::Drained => {
                self.groups[group] = Some(state);
                return Ok(());
            }
            GroupPhase::Accumulating => {}
        }
        if state.count == self.max_array_agg_size {
            state.phase = GroupPhase::Capped;
            self.groups[group] = Some(state);
            return Ok(());
        }
        let slot = self.holder.slice_mut(state.start_offset + state.count, 1)?;
        value.encode(slot);
        state.count += 1;
        self.groups[group] = Some(state);
        Ok(())
    }

    /// Vectorized entry point: one [GroupArrayAccumulator::add] per non-null
    /// input slot. Null values are skipped and do not consume cap budget.
    pub fn update_batch(
        &mut self,
        values: &PrimitiveArray<A>,
        group_indices: &[usize],
    ) -> Result<()> {
        if values.len() != group_indices.len() {
            return Err(ArbalestError::Internal(format!(
                "array_agg batch length mismatch: {} values for {} group indices",
                values.len(),
                group_indices.len()
            )));
        }
        for (row, &group) in group_indices.iter().enumerate() {
            if values.is_null(row) {
                continue;
            }
            self.add(group, values.value(row))?;
        }
        Ok(())
    }

    /// Whether `group` has received at least one [GroupArrayAccumulator::add]
    pub fn is_group_seen(&self, group: usize) -> bool {
        matches!(self.groups.get(group), Some(Some(_)))
    }

    /// Decode the accumulated items of `group` in insertion order and
    /// transition it to drained. Draining an unseen group yields an empty
    /// sequence; draining twice is an invariant violation.
    pub fn drain(&mut self, group: usize) -> Result<Vec<A::Native>> {
        let mut state = match self.groups.get(group).copied().flatten() {
            Some(state) => state,
            None => return Ok(Vec::new()),
        };
        if state.phase == GroupPhase::Drained {
            return Err(ArbalestError::Internal(format!(
                "group {} drained twice",
                group
            )));
        }
        let width = <A::Native as FixedWidthElement>::WIDTH;
        let bytes = self.holder.slice(state.start_offset, state.count)?;
        let mut items = Vec::with_capacity(state.count);
        for i in 0..state.count {
            items.push(A::Native::decode(&bytes[i * width..(i + 1) * width]));
        }
        state.phase = GroupPhase::Drained;
        self.groups[group] = Some(state);
        Ok(items)
    }

    /// Drain `group` into a list builder: seen groups append their items as
    /// one list entry, unseen groups append a null entry.
    pub fn drain_into(
        &mut self,
        group: usize,
        builder: &mut ListBuilder<PrimitiveBuilder<A>>,
    ) -> Result<()> {
        if !self.is_group_seen(group) {
            builder.append(false);
            return Ok(());
        }
        for item in self.drain(group)? {
            builder.values().append_value(item);
        }
        builder.append(true);
        Ok(())
    }

    /// Transfer out: drain groups `0..num_groups` in order into a
    /// list-typed output column.
    pub fn evaluate(&mut self, num_groups: usize) -> Result<ArrayRef> {
        let mut builder = ListBuilder::new(PrimitiveBuilder::<A>::new());
        for group in 0..num_groups {
            self.drain_into(group, &mut builder)?;
        }
        Ok(Arc::new(builder.finish()))
    }

    /// Release the backing buffer. `Drop` covers error paths that skip this.
    pub fn close(&mut self) {
        self.holder.close();
    }

    pub fn is_closed(&self) -> bool {
        self.holder.is_closed()
    }
}

/// Group array accumulator over any supported element kind, selected once
/// at construction from the input data type. The mapping is explicit and
/// exhaustive; unsupported types fail construction, never fall through to a
/// default behavior.
#[derive(Debug)]
pub enum DynGroupArrayAccumulator {
    Int32(GroupArrayAccumulator<Int32Type>),
    Int64(GroupArrayAccumulator<Int64Type>),
    UInt32(GroupArrayAccumulator<UInt32Type>),
    UInt64(GroupArrayAccumulator<UInt64Type>),
    Float32(GroupArrayAccumulator<Float32Type>),
    Float64(GroupArrayAccumulator<Float64Type>),
    Date32(GroupArrayAccumulator<Date32Type>),
    Date64(GroupArrayAccumulator<Date64Type>),
    TimestampMillisecond(GroupArrayAccumulator<TimestampMillisecondType>),
}

fn as_primitive<A: ArrowPrimitiveType>(values: &ArrayRef) -> Result<&PrimitiveArray<A>> {
    values
        .as_any()
        .downcast_ref::<PrimitiveArray<A>>()
        .ok_or_else(|| {
            ArbalestError::Internal(format!(
                "array_agg input of type {:?} does not match the accumulator",
                values.data_type()
            ))
        })
}

impl DynGroupArrayAccumulator {
    pub fn update_batch(&mut self, values: &ArrayRef, group_indices: &[usize]) -> Result<()> {
        match self {
            Self::Int32(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::Int64(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::UInt32(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::UInt64(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::Float32(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::Float64(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::Date32(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::Date64(acc) => acc.update_batch(as_primitive(values)?, group_indices),
            Self::TimestampMillisecond(acc) => {
                acc.update_batch(as_primitive(values)?, group_indices)
            }
        }
    }

    pub fn evaluate(&mut self, num_groups: usize) -> Result<ArrayRef> {
        match self {
            Self::Int32(acc) => acc.evaluate(num_groups),
            Self::Int64(acc) => acc.evaluate(num_groups),
            Self::UInt32(acc) => acc.evaluate(num_groups),
            Self::UInt64(acc) => acc.evaluate(num_groups),
            Self::Float32(acc) => acc.evaluate(num_groups),
            Self::Float64(acc) => acc.evaluate(num_groups),
            Self::Date32(acc) => acc.evaluate(num_groups),
            Self::Date64(acc) => acc.evaluate(num_groups),
            Self::TimestampMillisecond(acc) => acc.evaluate(num_groups),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Int32(acc) => acc.close(),
            Self::Int64(acc) => acc.close(),
            Self::UInt32(acc) => acc.close(),
            Self::UInt64(acc) => acc.close(),
            Self::Float32(acc) => acc.close(),
            Self::Float64(acc) => acc.close(),
            Self::Date32(acc) => acc.close(),
            Self::Date64(acc) => acc.close(),
            Self::TimestampMillisecond(acc) => acc.close(),
        }
    }
}

/// Build the accumulator variant matching `data_type`
pub fn create_group_array_accumulator(
    data_type: &DataType,
    max_array_agg_size: usize,
    initial_capacity_elements: usize,
    max_buffer_bytes: usize,
) -> Result<DynGroupArrayAccumulator> {
    macro_rules! variant {
        ($variant:ident) => {
            Ok(DynGroupArrayAccumulator::$variant(
                GroupArrayAccumulator::try_new(
                    max_array_agg_size,
                    initial_capacity_elements,
                    max_buffer_bytes,
                )?,
            ))
        };
    }
    match data_type {
        DataType::Int32 => variant!(Int32),
        DataType::Int64 => variant!(Int64),
        DataType::UInt32 => variant!(UInt32),
        DataType::UInt64 => variant!(UInt64),
        DataType::Float32 => variant!(Float32),
        DataType::Float64 => variant!(Float64),
        DataType::Date32 => variant!(Date32),
        DataType::Date64 => variant!(Date64),
        DataType::Timestamp(TimeUnit::Millisecond, None) => variant!(TimestampMillisecond),
        other => Err(ArbalestError::NotImplemented(format!(
            "ARRAY_AGG over data type {:?}",
            other
        ))),
    }
}
