// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Update tree nodes.
//!
//! Applying a batch turns the record into a tree of update fields.
//! Untouched regions stay `Nop` and keep referencing the old record's
//! bytes; only touched ancestors materialize into array/map nodes, and
//! a lone deep write stays a `Bar` until a second operation forces a
//! branch. After all operations are applied, a two-pass flush computes
//! the exact output size and stores the tree into one buffer.

use bytes::{BufMut, BytesMut};

use crate::array::{self, ArrayUpdate};
use crate::bar::{self, BarUpdate};
use crate::error::Result;
use crate::map::{self, MapUpdate};
use crate::op::{self, UpdateCtx};
use crate::route;

/// One field of the record under update: its original encoded span
/// plus what, if anything, happened to it.
#[derive(Debug)]
pub(crate) struct UpdateField<'a> {
    /// The field's full encoded span in the old record. For fields
    /// inserted by `!`, the span lives in the operation batch instead.
    pub data: &'a [u8],
    pub kind: FieldKind<'a>,
}

#[derive(Debug)]
pub(crate) enum FieldKind<'a> {
    /// Untouched: stored by copying `data`.
    Nop,
    /// A leaf whose single operation has been applied.
    Scalar { op: usize },
    /// Materialized array with a rope of child runs.
    Array(ArrayUpdate<'a>),
    /// Materialized map with pending mutations over the unchanged base.
    Map(MapUpdate<'a>),
    /// A single point-update deep inside an unparsed subtree.
    Bar(BarUpdate<'a>),
    /// Common path prefix of every operation in this subtree, with a
    /// single next hop.
    Route(RouteUpdate<'a>),
}

#[derive(Debug)]
pub(crate) struct RouteUpdate<'a> {
    /// Source-path prefix shared by all operations that descended here.
    pub path: &'a str,
    pub next_hop: Box<UpdateField<'a>>,
}

impl<'a> UpdateField<'a> {
    pub fn nop(data: &'a [u8]) -> Self {
        Self {
            data,
            kind: FieldKind::Nop,
        }
    }
}

/// Byte offset of `part` within `base`; both must view the same
/// allocation, which holds for every span the tree stores.
pub(crate) fn offset_of(base: &[u8], part: &[u8]) -> usize {
    let delta = part.as_ptr() as usize - base.as_ptr() as usize;
    debug_assert!(delta + part.len() <= base.len());
    delta
}

/// Apply one operation to a field, dispatching on the field's current
/// state.
pub(crate) fn do_field_op<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &mut UpdateField<'a>,
) -> Result<()> {
    match &field.kind {
        FieldKind::Array(_) => array::do_array_op(ctx, op_i, field),
        FieldKind::Map(_) => map::do_map_op(ctx, op_i, field),
        FieldKind::Nop => bar::do_nop_op(ctx, op_i, field),
        FieldKind::Bar(_) | FieldKind::Route(_) => route::do_route_op(ctx, op_i, field),
        FieldKind::Scalar { .. } => Err(op::err_double(&ctx.ops[op_i])),
    }
}

/// Exact serialized size of a field.
pub(crate) fn field_sizeof(ctx: &UpdateCtx<'_>, field: &UpdateField<'_>) -> Result<usize> {
    match &field.kind {
        FieldKind::Nop => Ok(field.data.len()),
        FieldKind::Scalar { op } => Ok(ctx.ops[*op].new_field_len as usize),
        FieldKind::Array(arr) => array::sizeof(ctx, arr),
        FieldKind::Map(map) => map::sizeof(ctx, map),
        FieldKind::Bar(bar) => bar::sizeof(ctx, field, bar),
        FieldKind::Route(route) => {
            let hop_size = field_sizeof(ctx, &route.next_hop)?;
            Ok(field.data.len() - route.next_hop.data.len() + hop_size)
        }
    }
}

/// Store a field into `out`. Appends exactly [`field_sizeof`] bytes.
pub(crate) fn field_store(
    ctx: &UpdateCtx<'_>,
    field: &UpdateField<'_>,
    out: &mut BytesMut,
) -> Result<()> {
    match &field.kind {
        FieldKind::Nop => {
            out.put_slice(field.data);
            Ok(())
        }
        FieldKind::Scalar { op } => {
            op::store_op(&ctx.ops[*op], field.data, out);
            Ok(())
        }
        FieldKind::Array(arr) => array::store(ctx, arr, out),
        FieldKind::Map(map) => map::store(ctx, map, out),
        FieldKind::Bar(bar) => bar::store(ctx, field, bar, out),
        FieldKind::Route(route) => {
            let before = offset_of(field.data, route.next_hop.data);
            out.put_slice(&field.data[..before]);
            field_store(ctx, &route.next_hop, out)?;
            let after = before + route.next_hop.data.len();
            out.put_slice(&field.data[after..]);
            Ok(())
        }
    }
}
