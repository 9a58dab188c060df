// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Array update nodes.
//!
//! An array node wraps the original encoded array in a rope of field
//! runs. Terminal operations land on extracted runs; non-terminal ones
//! descend into the run's first field. Insertions splice a new
//! single-field run whose bytes live in the operation batch, deletions
//! drop units from the rope, and everything untouched is stored by
//! copying run tails verbatim.

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::field::{self, FieldKind, UpdateField};
use crate::mp::{self, Cursor};
use crate::op::{self, OpArg, UpdateCtx};
use crate::path::PathToken;
use crate::rope::Rope;

/// A run of consecutive fields: the first field as a full update node
/// and the untouched rest of the run as raw bytes.
#[derive(Debug)]
pub(crate) struct ArrayItem<'a> {
    pub field: UpdateField<'a>,
    pub tail: &'a [u8],
}

impl<'a> ArrayItem<'a> {
    fn nop(value: &'a [u8]) -> Self {
        Self {
            field: UpdateField::nop(value),
            tail: &[],
        }
    }
}

/// Split a run before its `at`-th field.
fn split_item<'a>(item: &mut ArrayItem<'a>, at: u32) -> Result<ArrayItem<'a>> {
    debug_assert!(at >= 1);
    let tail: &'a [u8] = item.tail;
    let mut cur = Cursor::new(tail);
    for _ in 1..at {
        mp::next(&mut cur)?;
    }
    let head = &tail[..cur.pos()];
    let new_field = mp::value_span(&mut cur)?;
    let new_tail = &tail[cur.pos()..];
    item.tail = head;
    Ok(ArrayItem {
        field: UpdateField::nop(new_field),
        tail: new_tail,
    })
}

#[derive(Debug)]
pub(crate) struct ArrayUpdate<'a> {
    pub rope: Rope<ArrayItem<'a>>,
}

impl<'a> ArrayUpdate<'a> {
    /// Build an array node over a full encoded array span.
    pub fn create(data: &'a [u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let count = mp::read_array_header(&mut cur)?;
        let mut rope = Rope::new();
        if count > 0 {
            let first = mp::value_span(&mut cur)?;
            let tail = cur.tail();
            rope.append(
                ArrayItem {
                    field: UpdateField::nop(first),
                    tail,
                },
                count,
            );
        }
        Ok(Self { rope })
    }

    /// Build an array node over `data` whose element `index` is an
    /// already-updated subtree. The child's span is rebased onto the
    /// element it now occupies.
    pub fn create_with_child(
        data: &'a [u8],
        mut child: UpdateField<'a>,
        index: u32,
    ) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let count = mp::read_array_header(&mut cur)?;
        debug_assert!(index < count);
        let mut rope = Rope::new();
        if index > 0 {
            let first = mp::value_span(&mut cur)?;
            let run_start = cur.pos();
            for _ in 1..index {
                mp::next(&mut cur)?;
            }
            let tail = &data[run_start..cur.pos()];
            rope.append(
                ArrayItem {
                    field: UpdateField::nop(first),
                    tail,
                },
                index,
            );
        }
        let element = mp::value_span(&mut cur)?;
        child.data = element;
        rope.append(
            ArrayItem {
                field: child,
                tail: &[],
            },
            1,
        );
        if index + 1 < count {
            let first = mp::value_span(&mut cur)?;
            let tail = cur.tail();
            rope.append(
                ArrayItem {
                    field: UpdateField::nop(first),
                    tail,
                },
                count - index - 1,
            );
        }
        Ok(Self { rope })
    }

    fn extract(&mut self, at: u32) -> Result<u32> {
        self.rope.extract(at, &mut split_item)
    }
}

/// Apply one operation at an array level.
pub(crate) fn do_array_op<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &mut UpdateField<'a>,
) -> Result<()> {
    if ctx.ops[op_i].token_consumed {
        let token = ctx.ops[op_i].consume_token()?;
        if matches!(token, PathToken::Str(_)) {
            return Err(op::err(
                &ctx.ops[op_i],
                "can not update array by non-integer index",
            ));
        }
    }
    let term = ctx.ops[op_i].is_term();
    let opcode = ctx.ops[op_i].opcode;
    let FieldKind::Array(arr) = &mut field.kind else {
        unreachable!("array dispatch on a non-array field");
    };
    let size = arr.rope.size() as i64;

    if !term {
        ctx.ops[op_i].adjust_field_no(size)?;
        let idx = arr.extract(ctx.ops[op_i].field_no as u32)?;
        ctx.ops[op_i].token_consumed = true;
        let item = arr.rope.item_mut(idx);
        return field::do_field_op(ctx, op_i, &mut item.field);
    }

    match opcode {
        b'!' => {
            ctx.ops[op_i].adjust_field_no(size + 1)?;
            let OpArg::Set { value } = ctx.ops[op_i].arg else {
                unreachable!("insert carries a set arg");
            };
            ctx.ops[op_i].new_field_len = value.len() as u32;
            let at = ctx.ops[op_i].field_no as u32;
            arr.rope.insert(at, ArrayItem::nop(value), 1, &mut split_item)
        }
        b'#' => {
            ctx.ops[op_i].adjust_field_no(size)?;
            let OpArg::Del { count } = ctx.ops[op_i].arg else {
                unreachable!("delete carries a count arg");
            };
            let at = ctx.ops[op_i].field_no;
            let count = (count as i64).min(size - at) as u32;
            for _ in 0..count {
                arr.rope.erase(at as u32, &mut split_item)?;
            }
            Ok(())
        }
        b'=' if ctx.ops[op_i].field_no == size => {
            // Assignment one past the end appends.
            let OpArg::Set { value } = ctx.ops[op_i].arg else {
                unreachable!("set carries a set arg");
            };
            ctx.ops[op_i].new_field_len = value.len() as u32;
            arr.rope
                .insert(size as u32, ArrayItem::nop(value), 1, &mut split_item)
        }
        _ => {
            ctx.ops[op_i].adjust_field_no(size)?;
            let idx = arr.extract(ctx.ops[op_i].field_no as u32)?;
            let item = arr.rope.item_mut(idx);
            match &item.field.kind {
                FieldKind::Nop => {}
                FieldKind::Bar(_) | FieldKind::Route(_) => {
                    return Err(crate::error::UpdateError::Unsupported(
                        "intersected JSON paths",
                    ));
                }
                _ => return Err(op::err_double(&ctx.ops[op_i])),
            }
            let old = item.field.data;
            match opcode {
                b'=' => {
                    let OpArg::Set { value } = ctx.ops[op_i].arg else {
                        unreachable!("set carries a set arg");
                    };
                    ctx.ops[op_i].new_field_len = value.len() as u32;
                }
                b'+' | b'-' => op::do_op_arith(&mut ctx.ops[op_i], old)?,
                b'&' | b'|' | b'^' => op::do_op_bit(&mut ctx.ops[op_i], old)?,
                b':' => op::do_op_splice(&mut ctx.ops[op_i], old)?,
                _ => unreachable!("insert and delete handled above"),
            }
            item.field.kind = FieldKind::Scalar { op: op_i };
            Ok(())
        }
    }
}

pub(crate) fn sizeof(ctx: &UpdateCtx<'_>, arr: &ArrayUpdate<'_>) -> Result<usize> {
    let mut size = mp::sizeof_array(arr.rope.size());
    for (item, _) in arr.rope.iter() {
        size += field::field_sizeof(ctx, &item.field)? + item.tail.len();
    }
    Ok(size)
}

pub(crate) fn store(ctx: &UpdateCtx<'_>, arr: &ArrayUpdate<'_>, out: &mut BytesMut) -> Result<()> {
    mp::write_array_header(out, arr.rope.size());
    for (item, _) in arr.rope.iter() {
        field::field_store(ctx, &item.field, out)?;
        out.put_slice(item.tail);
    }
    Ok(())
}
