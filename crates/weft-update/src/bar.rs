// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bar update nodes.
//!
//! A bar is a single point-update deep inside an unparsed subtree: the
//! residual path is remembered, the addressed point located by walking
//! the raw encoding, and nothing in between is materialized. Sizing
//! and storing splice the new point (and, for `!`/`#`, a rewritten
//! parent container header) between verbatim copies of the old bytes.
//! A second operation entering the same subtree branches the bar into
//! a route (see the route module).

use bytes::{BufMut, BytesMut};

use crate::error::{Result, UpdateError};
use crate::field::{offset_of, FieldKind, UpdateField};
use crate::mp::{self, Cursor, Descent, MpType};
use crate::op::{self, OpArg, UpdateCtx, UpdateOp};
use crate::path::PathToken;

/// A located single point-update.
#[derive(Debug)]
pub(crate) struct BarUpdate<'a> {
    /// Index of the operation stored in this bar.
    pub op: usize,
    /// Residual path from this field down to the point.
    pub path: &'a str,
    /// Exact span of the addressed value. For a not-found array append
    /// position this is an empty span at the parent's end; for `#` on
    /// a map it covers the key and the value.
    pub point: &'a [u8],
    /// The container holding the point, as a slice starting at the
    /// container and running to the end of the field.
    pub parent: &'a [u8],
    /// Key to insert for `!`/`=` into a map position that does not
    /// exist yet.
    pub new_key: Option<&'a str>,
}

/// Find a map entry by key, returning the encoded key span and the
/// slice positioned at the value.
fn find_entry<'a>(container: &'a [u8], key: &str) -> Result<Option<(&'a [u8], &'a [u8])>> {
    let mut cur = Cursor::new(container);
    if mp::type_of(&cur)? != MpType::Map {
        return Ok(None);
    }
    let count = mp::read_map_header(&mut cur)?;
    for _ in 0..count {
        let key_start = cur.pos();
        let matches = if mp::type_of(&cur)? == MpType::Str {
            mp::read_str(&mut cur)? == key.as_bytes()
        } else {
            mp::next(&mut cur)?;
            false
        };
        if matches {
            let key_raw = &container[key_start..cur.pos()];
            return Ok(Some((key_raw, &container[cur.pos()..])));
        }
        mp::next(&mut cur)?;
    }
    Ok(None)
}

/// The last path step taken before the walk ended or failed.
enum LastStep<'a> {
    Index(i64),
    Key(&'a str),
}

/// Walk the whole residual path; every step must resolve. Used by the
/// scalar operators, which require an existing source field.
fn locate<'a>(ctx: &mut UpdateCtx<'a>, op_i: usize, field: &UpdateField<'a>) -> Result<BarUpdate<'a>> {
    let path = ctx.ops[op_i].lexer.remainder();
    let mut pos: &'a [u8] = field.data;
    let mut parent: &'a [u8] = field.data;
    loop {
        match ctx.ops[op_i].lexer.next_token()? {
            PathToken::End => break,
            PathToken::Num(n) => {
                parent = pos;
                let descent = if (0..=u32::MAX as i64).contains(&n) {
                    mp::go_to_index(pos, n as u32)?
                } else {
                    Descent::Missing
                };
                match descent {
                    Descent::Found(rest) => pos = rest,
                    _ => return Err(op::err_no_such_field(&ctx.ops[op_i])),
                }
            }
            PathToken::Str(key) => {
                parent = pos;
                match mp::go_to_key(pos, key)? {
                    Descent::Found(rest) => pos = rest,
                    _ => return Err(op::err_no_such_field(&ctx.ops[op_i])),
                }
            }
            PathToken::Any => return Err(UpdateError::Unsupported("wildcard in JSON path")),
        }
    }
    let mut cur = Cursor::new(pos);
    let point = mp::value_span(&mut cur)?;
    Ok(BarUpdate {
        op: op_i,
        path,
        point,
        parent,
        new_key: None,
    })
}

/// Walk the residual path tolerating one missing final step. Returns
/// the bar and whether the point exists.
fn locate_opt<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &UpdateField<'a>,
) -> Result<(BarUpdate<'a>, bool)> {
    let path = ctx.ops[op_i].lexer.remainder();
    let mut pos: &'a [u8] = field.data;
    let mut parent: &'a [u8] = field.data;
    let last = loop {
        match ctx.ops[op_i].lexer.next_token()? {
            PathToken::End => {
                let mut cur = Cursor::new(pos);
                let point = mp::value_span(&mut cur)?;
                let bar = BarUpdate {
                    op: op_i,
                    path,
                    point,
                    parent,
                    new_key: None,
                };
                return Ok((bar, true));
            }
            PathToken::Num(n) => {
                parent = pos;
                let descent = if (0..=u32::MAX as i64).contains(&n) {
                    mp::go_to_index(pos, n as u32)?
                } else {
                    Descent::Missing
                };
                match descent {
                    Descent::Found(rest) => pos = rest,
                    _ => break LastStep::Index(n),
                }
            }
            PathToken::Str(key) => {
                parent = pos;
                match mp::go_to_key(pos, key)? {
                    Descent::Found(rest) => pos = rest,
                    _ => break LastStep::Key(key),
                }
            }
            PathToken::Any => return Err(UpdateError::Unsupported("wildcard in JSON path")),
        }
    };
    // Only the final path step may be missing.
    if ctx.ops[op_i].lexer.next_token()? != PathToken::End {
        return Err(op::err_no_such_field(&ctx.ops[op_i]));
    }
    let mut bar = BarUpdate {
        op: op_i,
        path,
        point: &parent[..0],
        parent,
        new_key: None,
    };
    match last {
        LastStep::Index(n) => {
            let mut cur = Cursor::new(parent);
            if mp::type_of(&cur)? != MpType::Array {
                return Err(op::err(
                    &ctx.ops[op_i],
                    "can not access by index a non-array field",
                ));
            }
            let count = mp::read_array_header(&mut cur)?;
            if n < 0 || n > count as i64 {
                return Err(op::err_no_such_field(&ctx.ops[op_i]));
            }
            // The only way to miss an array index is to use the size
            // as the index: the append position.
            debug_assert_eq!(n, count as i64);
            let container = {
                let mut span = Cursor::new(parent);
                mp::value_span(&mut span)?.len()
            };
            bar.point = &parent[container..container];
        }
        LastStep::Key(key) => {
            let cur = Cursor::new(parent);
            if mp::type_of(&cur)? != MpType::Map {
                return Err(op::err(
                    &ctx.ops[op_i],
                    "can not access by key a non-map field",
                ));
            }
            bar.new_key = Some(key);
        }
    }
    Ok((bar, false))
}

fn parent_kind(bar: &BarUpdate<'_>) -> Result<(MpType, u32, usize)> {
    let mut cur = Cursor::new(bar.parent);
    let kind = mp::type_of(&cur)?;
    let count = match kind {
        MpType::Array => mp::read_array_header(&mut cur)?,
        MpType::Map => mp::read_map_header(&mut cur)?,
        _ => {
            return Err(UpdateError::IllegalParams(
                "bar parent is not a container".to_string(),
            ));
        }
    };
    Ok((kind, count, cur.pos()))
}

/// Apply an operation to an untouched field, turning it into a bar or
/// a scalar-at-depth.
pub(crate) fn do_nop_op<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &mut UpdateField<'a>,
) -> Result<()> {
    debug_assert!(matches!(field.kind, FieldKind::Nop));
    debug_assert!(!ctx.ops[op_i].is_term());
    match ctx.ops[op_i].opcode {
        b'=' => nop_set(ctx, op_i, field),
        b'!' => nop_insert(ctx, op_i, field),
        b'#' => nop_delete(ctx, op_i, field),
        b'+' | b'-' => nop_scalar(ctx, op_i, field, op::do_op_arith),
        b'&' | b'|' | b'^' => nop_scalar(ctx, op_i, field, op::do_op_bit),
        b':' => nop_scalar(ctx, op_i, field, op::do_op_splice),
        _ => unreachable!("opcode validated at decode"),
    }
}

fn nop_scalar<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &mut UpdateField<'a>,
    apply: fn(&mut UpdateOp<'a>, &[u8]) -> Result<()>,
) -> Result<()> {
    let bar = locate(ctx, op_i, field)?;
    apply(&mut ctx.ops[op_i], bar.point)?;
    field.kind = FieldKind::Bar(bar);
    Ok(())
}

fn nop_set<'a>(ctx: &mut UpdateCtx<'a>, op_i: usize, field: &mut UpdateField<'a>) -> Result<()> {
    let (bar, found) = locate_opt(ctx, op_i, field)?;
    let OpArg::Set { value } = ctx.ops[op_i].arg else {
        unreachable!("set carries a set arg");
    };
    ctx.ops[op_i].new_field_len = value.len() as u32;
    if !found {
        // Assigning a missing last step is an insertion.
        ctx.ops[op_i].opcode = b'!';
        if let Some(key) = bar.new_key {
            ctx.ops[op_i].new_field_len += mp::sizeof_str(key.len()) as u32;
        }
    }
    field.kind = FieldKind::Bar(bar);
    Ok(())
}

fn nop_insert<'a>(ctx: &mut UpdateCtx<'a>, op_i: usize, field: &mut UpdateField<'a>) -> Result<()> {
    let (bar, found) = locate_opt(ctx, op_i, field)?;
    let OpArg::Set { value } = ctx.ops[op_i].arg else {
        unreachable!("insert carries a set arg");
    };
    ctx.ops[op_i].new_field_len = value.len() as u32;
    let cur = Cursor::new(bar.parent);
    if mp::type_of(&cur)? == MpType::Map {
        if found {
            // The key to insert exists already.
            let key = last_path_key(&ctx.ops[op_i]);
            return Err(UpdateError::Duplicate { key });
        }
        if let Some(key) = bar.new_key {
            ctx.ops[op_i].new_field_len += mp::sizeof_str(key.len()) as u32;
        }
    }
    field.kind = FieldKind::Bar(bar);
    Ok(())
}

fn nop_delete<'a>(ctx: &mut UpdateCtx<'a>, op_i: usize, field: &mut UpdateField<'a>) -> Result<()> {
    let (mut bar, found) = locate_opt(ctx, op_i, field)?;
    if !found {
        return Err(op::err_no_such_field(&ctx.ops[op_i]));
    }
    let (kind, count, _) = parent_kind(&bar)?;
    let OpArg::Del {
        count: delete_count,
    } = ctx.ops[op_i].arg
    else {
        unreachable!("delete carries a count arg");
    };
    if kind == MpType::Array {
        // The point starts at some element; clamp the count to the
        // rest of the array and extend the point over every deleted
        // element.
        let index = array_index_of(&bar)?;
        let delete_count = delete_count.min(count - index);
        ctx.ops[op_i].arg = OpArg::Del {
            count: delete_count,
        };
        let point_off = offset_of(bar.parent, bar.point);
        let mut cur = Cursor::new(&bar.parent[point_off..]);
        for _ in 0..delete_count {
            mp::next(&mut cur)?;
        }
        bar.point = &bar.parent[point_off..point_off + cur.pos()];
    } else {
        if delete_count != 1 {
            return Err(op::err(
                &ctx.ops[op_i],
                "can delete only 1 field from a map in the same operation",
            ));
        }
        // Extend the point over the key so the pair disappears.
        let key = last_path_key(&ctx.ops[op_i]);
        let Some((key_raw, _)) = find_entry(bar.parent, &key)? else {
            return Err(op::err_no_such_field(&ctx.ops[op_i]));
        };
        let key_off = offset_of(bar.parent, key_raw);
        let point_end = offset_of(bar.parent, bar.point) + bar.point.len();
        bar.point = &bar.parent[key_off..point_end];
    }
    field.kind = FieldKind::Bar(bar);
    Ok(())
}

/// The final string token of an operation's path, used for map keys in
/// error reporting and key-span lookups.
fn last_path_key(op: &UpdateOp<'_>) -> String {
    let src = op.lexer.src();
    let mut lexer = crate::path::PathLexer::new(src);
    let mut last = String::new();
    while let Ok(token) = lexer.next_token() {
        match token {
            PathToken::Str(s) => last = s.to_string(),
            PathToken::End => break,
            _ => {}
        }
    }
    last
}

/// Which element of its parent array the point is. Derived by walking
/// the parent payload up to the point.
fn array_index_of(bar: &BarUpdate<'_>) -> Result<u32> {
    let mut cur = Cursor::new(bar.parent);
    mp::read_array_header(&mut cur)?;
    let point_off = offset_of(bar.parent, bar.point);
    let mut index = 0;
    while cur.pos() < point_off {
        mp::next(&mut cur)?;
        index += 1;
    }
    Ok(index)
}

pub(crate) fn sizeof(
    ctx: &UpdateCtx<'_>,
    field: &UpdateField<'_>,
    bar: &BarUpdate<'_>,
) -> Result<usize> {
    let op = &ctx.ops[bar.op];
    match op.opcode {
        b'!' => {
            let (kind, count, _) = parent_kind(bar)?;
            let grow = match kind {
                MpType::Array => mp::sizeof_array(count + 1) - mp::sizeof_array(count),
                _ => mp::sizeof_map(count + 1) - mp::sizeof_map(count),
            };
            Ok(field.data.len() + op.new_field_len as usize + grow)
        }
        b'#' => {
            let (kind, count, _) = parent_kind(bar)?;
            let OpArg::Del {
                count: delete_count,
            } = op.arg
            else {
                unreachable!("delete carries a count arg");
            };
            let shrink = match kind {
                MpType::Array => mp::sizeof_array(count) - mp::sizeof_array(count - delete_count),
                _ => mp::sizeof_map(count) - mp::sizeof_map(count - 1),
            };
            Ok(field.data.len() - bar.point.len() - shrink)
        }
        _ => Ok(field.data.len() - bar.point.len() + op.new_field_len as usize),
    }
}

pub(crate) fn store(
    ctx: &UpdateCtx<'_>,
    field: &UpdateField<'_>,
    bar: &BarUpdate<'_>,
    out: &mut BytesMut,
) -> Result<()> {
    let op = &ctx.ops[bar.op];
    let data = field.data;
    match op.opcode {
        b'!' => {
            let OpArg::Set { value } = op.arg else {
                unreachable!("insert carries a set arg");
            };
            let (kind, count, header_len) = parent_kind(bar)?;
            let parent_off = offset_of(data, bar.parent);
            out.put_slice(&data[..parent_off]);
            let payload_off = parent_off + header_len;
            if kind == MpType::Array {
                mp::write_array_header(out, count + 1);
                let point_off = offset_of(data, bar.point);
                out.put_slice(&data[payload_off..point_off]);
                out.put_slice(value);
                out.put_slice(&data[point_off..]);
            } else {
                mp::write_map_header(out, count + 1);
                let key = bar.new_key.unwrap_or_default();
                mp::write_str(out, key.as_bytes());
                out.put_slice(value);
                out.put_slice(&data[payload_off..]);
            }
            Ok(())
        }
        b'#' => {
            let OpArg::Del {
                count: delete_count,
            } = op.arg
            else {
                unreachable!("delete carries a count arg");
            };
            let (kind, count, header_len) = parent_kind(bar)?;
            let parent_off = offset_of(data, bar.parent);
            out.put_slice(&data[..parent_off]);
            if kind == MpType::Array {
                mp::write_array_header(out, count - delete_count);
            } else {
                mp::write_map_header(out, count - 1);
            }
            let payload_off = parent_off + header_len;
            let point_off = offset_of(data, bar.point);
            out.put_slice(&data[payload_off..point_off]);
            out.put_slice(&data[point_off + bar.point.len()..]);
            Ok(())
        }
        _ => {
            let point_off = offset_of(data, bar.point);
            out.put_slice(&data[..point_off]);
            op::store_op(op, bar.point, out);
            out.put_slice(&data[point_off + bar.point.len()..]);
            Ok(())
        }
    }
}
