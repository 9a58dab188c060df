// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Weft Update - Structured-record update engine
//!
//! Applies a batch of typed mutation operations to an immutable
//! MessagePack record, producing a new record without re-encoding
//! unchanged regions.
//!
//! A batch is an array of operations `[opcode, selector, args...]`
//! with single-character opcodes:
//!
//! | Opcode | Operation | Arguments |
//! |--------|-----------|-----------|
//! | `=`    | assign (insert when one past the end / a new key) | value |
//! | `!`    | insert | value |
//! | `#`    | delete | field count |
//! | `+` `-` | arithmetic | number (int, float, double, decimal) |
//! | `&` `\|` `^` | bitwise | unsigned 64-bit integer |
//! | `:`    | splice | offset, cut length, paste string |
//!
//! The selector is a field number (with a configurable [`IndexBase`],
//! negative counts from the tail) or a JSON-like path such as
//! `"f.c.f[1]"` whose head resolves through a [`Dictionary`].
//!
//! # Cost model
//!
//! Operations build a transient tree over the old record: untouched
//! subtrees stay references to the old bytes, a lone deep write stays a
//! single "bar" node, and arrays materialize into a rope so inserts
//! and deletes never copy their siblings. A two-pass flush then
//! computes the exact output size and writes once. Total cost is
//! O(record length) + O(ops · log ops), and old-record bytes are
//! copied exactly once.
//!
//! # Quick Start
//!
//! ```ignore
//! use weft_fiber::Region;
//! use weft_update::{apply, Dictionary, IndexBase};
//!
//! let region = Region::new(512 * 1024, 64 * 1024);
//! let result = apply(&region, &ops, &tuple, &Dictionary::new(), IndexBase::One)?;
//! store.replace(result.tuple, result.column_mask);
//! ```
//!
//! All output buffers come from the caller's [`Region`]; they stay
//! valid independently of later region resets.

mod arith;
mod array;
mod bar;
mod dict;
mod error;
mod field;
mod map;
pub mod mp;
mod op;
mod path;
mod rope;
mod route;

use bytes::{BufMut, Bytes, BytesMut};
use weft_fiber::Region;

use crate::array::ArrayUpdate;
use crate::field::{FieldKind, UpdateField};
use crate::mp::Cursor;
use crate::op::{OpArg, UpdateCtx};

pub use crate::dict::Dictionary;
pub use crate::error::{Result, UpdateError};
pub use crate::mp::DECIMAL_EXT_TYPE;
pub use crate::op::{IndexBase, MAX_UPDATE_OPS};

/// Output of a successful [`apply`].
#[derive(Debug, Clone)]
pub struct UpdateResult {
    /// The new record, allocated from the caller's region.
    pub tuple: Bytes,
    /// Bitmap of potentially affected top-level columns. Bits 0-62
    /// stand for their columns; bit 63 stands for every column from
    /// 63 on.
    pub column_mask: u64,
}

/// Apply an operation batch to a record.
///
/// Decode-time failures (malformed batch, unknown opcode, bad path)
/// and apply-time failures (type mismatch, missing field, overflow)
/// both abort the whole batch; the record is never partially updated.
pub fn apply(
    region: &Region,
    expr: &[u8],
    tuple: &[u8],
    dict: &Dictionary,
    index_base: IndexBase,
) -> Result<UpdateResult> {
    let field_count = {
        let mut cur = Cursor::new(tuple);
        mp::read_array_header(&mut cur)
            .map_err(|_| UpdateError::IllegalParams("update target must be an array".to_string()))?
    };
    let mut ctx = op::read_ops(expr, dict, index_base, field_count as i64)?;
    let mut root = UpdateField {
        data: tuple,
        kind: FieldKind::Array(ArrayUpdate::create(tuple)?),
    };
    for i in 0..ctx.ops.len() {
        field::do_field_op(&mut ctx, i, &mut root)?;
    }
    finish(region, &ctx, &root)
}

/// Validate an operation batch without a record at hand. Returns the
/// column mask computed with an unknown field count.
pub fn check(expr: &[u8], dict: &Dictionary, index_base: IndexBase) -> Result<u64> {
    Ok(op::read_ops(expr, dict, index_base, 0)?.column_mask)
}

/// Apply a batch in upsert mode: apply-time failures skip the
/// offending operation (logged unless `suppress_error`) instead of
/// aborting. Decode-time failures are still fatal.
pub fn upsert_apply(
    region: &Region,
    expr: &[u8],
    tuple: &[u8],
    dict: &Dictionary,
    index_base: IndexBase,
    suppress_error: bool,
) -> Result<UpdateResult> {
    let field_count = {
        let mut cur = Cursor::new(tuple);
        mp::read_array_header(&mut cur)
            .map_err(|_| UpdateError::IllegalParams("update target must be an array".to_string()))?
    };
    let mut ctx = op::read_ops(expr, dict, index_base, field_count as i64)?;
    let mut root = UpdateField {
        data: tuple,
        kind: FieldKind::Array(ArrayUpdate::create(tuple)?),
    };
    for i in 0..ctx.ops.len() {
        if let Err(err) = field::do_field_op(&mut ctx, i, &mut root) {
            if err.is_decode_error() {
                return Err(err);
            }
            if !suppress_error {
                tracing::error!(error = %err, "UPSERT operation failed");
            }
        }
    }
    finish(region, &ctx, &root)
}

fn finish(region: &Region, ctx: &UpdateCtx<'_>, root: &UpdateField<'_>) -> Result<UpdateResult> {
    let size = field::field_sizeof(ctx, root)?;
    let mut out = region.alloc(size);
    field::field_store(ctx, root, &mut out)?;
    debug_assert_eq!(out.len(), size, "two-pass size/store disagreement");
    Ok(UpdateResult {
        tuple: out.freeze(),
        column_mask: ctx.column_mask,
    })
}

/// Squash two upsert batches into one equivalent batch.
///
/// Squashable batches contain only `=`, `+`, and `-` on strictly
/// increasing plain field numbers (no paths). `Ok(None)` means the
/// batches cannot be squashed and must be applied sequentially; the
/// result is re-encoded with the caller's index base.
pub fn upsert_squash(
    region: &Region,
    expr1: &[u8],
    expr2: &[u8],
    dict: &Dictionary,
    index_base: IndexBase,
) -> Result<Option<Bytes>> {
    let ctx1 = op::read_ops(expr1, dict, index_base, 0)?;
    let ctx2 = op::read_ops(expr2, dict, index_base, 0)?;
    for ctx in [&ctx1, &ctx2] {
        let mut prev_field_no = index_base.as_i64() - 1;
        for one_op in &ctx.ops {
            if !matches!(one_op.opcode, b'=' | b'+' | b'-') {
                return Ok(None);
            }
            if !one_op.lexer.src().is_empty() {
                return Ok(None);
            }
            if one_op.field_no <= prev_field_no {
                return Ok(None);
            }
            prev_field_no = one_op.field_no;
        }
    }

    let mut ops1 = ctx1.ops;
    let ops2 = ctx2.ops;
    let mut body = BytesMut::new();
    let mut count: u32 = 0;
    let (mut i, mut j) = (0usize, 0usize);
    while i < ops1.len() || j < ops2.len() {
        count += 1;
        let mut from = if i < ops1.len() && j < ops2.len() {
            match ops1[i].field_no.cmp(&ops2[j].field_no) {
                std::cmp::Ordering::Less => 0,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => 2,
            }
        } else if i < ops1.len() {
            0
        } else {
            1
        };
        if from == 2 && ops2[j].opcode == b'=' {
            // A second-batch assignment overwrites whatever the first
            // batch did to the field.
            i += 1;
            from = 1;
        }
        match from {
            0 => {
                let (start, end) = ops1[i].span;
                body.put_slice(&expr1[start..end]);
                i += 1;
            }
            1 => {
                let (start, end) = ops2[j].span;
                body.put_slice(&expr2[start..end]);
                j += 1;
            }
            _ => {
                // Fold the second arithmetic onto the first operation.
                if ops1[i].opcode == b'-' {
                    ops1[i].opcode = b'+';
                    if let OpArg::Arith(arg) = ops1[i].arg {
                        ops1[i].arg = OpArg::Arith(arg.invert());
                    }
                }
                let left = match ops1[i].arg {
                    OpArg::Arith(arg) => arg,
                    OpArg::Set { value } => {
                        // First batch assigned a value; fold into it if
                        // it is numeric.
                        let mut cur = Cursor::new(value);
                        match arith::read_arith(&mut cur) {
                            Ok(Some(arg)) => arg,
                            _ => return Ok(None),
                        }
                    }
                    _ => return Ok(None),
                };
                let OpArg::Arith(right) = ops2[j].arg else {
                    unreachable!("squashable second op is arithmetic");
                };
                let Ok(merged) = arith::make_arith(ops2[j].opcode, left, right) else {
                    // Overflow while folding: apply sequentially.
                    return Ok(None);
                };
                mp::write_array_header(&mut body, 3);
                mp::write_str(&mut body, &[ops1[i].opcode]);
                mp::write_uint(
                    &mut body,
                    (ops1[i].field_no + index_base.as_i64()) as u64,
                );
                arith::store_arith(&merged, &mut body);
                i += 1;
                j += 1;
            }
        }
    }
    let mut out = region.alloc(mp::sizeof_array(count) + body.len());
    mp::write_array_header(&mut out, count);
    out.put_slice(&body);
    Ok(Some(out.freeze()))
}
