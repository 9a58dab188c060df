// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route update nodes and branch resolution.
//!
//! A route carries the path prefix shared by every operation that
//! descended into one subtree, with a single next hop. When a new
//! operation's path matches the prefix byte-for-byte, descent skips
//! straight to the next hop without re-lexing. When it diverges, the
//! container at the divergence point is materialized as an array/map
//! holding the existing subtree (rebased onto its element) and the new
//! operation's continuation; a divergence at the very first token
//! transforms the node in place instead of wrapping it in a route.

use crate::array::ArrayUpdate;
use crate::error::{Result, UpdateError};
use crate::field::{self, FieldKind, RouteUpdate, UpdateField};
use crate::map::MapUpdate;
use crate::mp::{self, Cursor, Descent, MpType};
use crate::op::{self, UpdateCtx};
use crate::path::{PathLexer, PathToken};

/// Apply an operation to a bar or route node.
pub(crate) fn do_route_op<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &mut UpdateField<'a>,
) -> Result<()> {
    if let FieldKind::Route(route) = &mut field.kind {
        let new_path = ctx.ops[op_i].lexer.remainder();
        if new_path.len() >= route.path.len() && new_path.as_bytes().starts_with(route.path.as_bytes())
        {
            // Several updates share this prefix: jump to the next hop
            // with no decoding.
            let skip = route.path.len();
            ctx.ops[op_i].lexer.advance(skip);
            return field::do_field_op(ctx, op_i, &mut route.next_hop);
        }
    }
    let next_hop = branch(ctx, op_i, field)?;
    field::do_field_op(ctx, op_i, next_hop)
}

/// Walk the stored path and the new operation's path in parallel and
/// split the subtree at the first divergence. Returns the field the
/// new operation must be applied to.
fn branch<'a, 'b>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &'b mut UpdateField<'a>,
) -> Result<&'b mut UpdateField<'a>> {
    let old_path: &'a str = match &field.kind {
        FieldKind::Bar(bar) => bar.path,
        FieldKind::Route(route) => route.path,
        _ => unreachable!("branching a non-bar, non-route field"),
    };
    let mut old_lexer = PathLexer::new(old_path);
    let mut parent: &'a [u8] = field.data;
    let (old_token, new_token, saved_old_offset) = loop {
        let saved = old_lexer.offset;
        // The old path was validated when its bar was located.
        let old_token = old_lexer.next_token()?;
        let new_token = ctx.ops[op_i].lexer.next_token()?;
        if old_token != new_token {
            break (old_token, new_token, saved);
        }
        match new_token {
            PathToken::Num(n) => {
                let descent = if (0..=u32::MAX as i64).contains(&n) {
                    mp::go_to_index(parent, n as u32)?
                } else {
                    Descent::Missing
                };
                match descent {
                    Descent::Found(rest) => parent = rest,
                    // The shared step exists only as the old bar's
                    // pending insertion; the new path digs through it.
                    _ => return Err(UpdateError::Unsupported("intersected JSON paths")),
                }
            }
            PathToken::Str(key) => match mp::go_to_key(parent, key)? {
                Descent::Found(rest) => parent = rest,
                _ => return Err(UpdateError::Unsupported("intersected JSON paths")),
            },
            PathToken::End => return Err(op::err_double(&ctx.ops[op_i])),
            PathToken::Any => return Err(UpdateError::Unsupported("wildcard in JSON path")),
        }
    };

    if old_token == PathToken::End {
        // The stored path is a strict prefix of the new one: the new
        // operation digs through an already-updated point.
        return Err(UpdateError::Unsupported("intersected JSON paths"));
    }

    let container = {
        let mut cur = Cursor::new(parent);
        mp::value_span(&mut cur)?
    };
    let container_kind = mp::type_of(&Cursor::new(container))?;
    let transform_root = saved_old_offset == 0;
    let path_offset = old_lexer.offset;

    // Detach the existing subtree and rebase its path past the common
    // prefix and the diverged token (the token becomes its position in
    // the materialized container).
    let data = field.data;
    let mut child = std::mem::replace(field, UpdateField::nop(data));
    match &mut child.kind {
        FieldKind::Bar(bar) => bar.path = &bar.path[path_offset..],
        FieldKind::Route(route) => route.path = &route.path[path_offset..],
        _ => unreachable!(),
    }
    if let FieldKind::Route(route) = &mut child.kind {
        if route.path.is_empty() {
            let next = std::mem::replace(&mut route.next_hop, Box::new(UpdateField::nop(&[])));
            child = *next;
        }
    }

    let next_hop_value = match container_kind {
        MpType::Array => {
            let PathToken::Num(new_no) = new_token else {
                return Err(op::err(
                    &ctx.ops[op_i],
                    "can not update array by non-integer index",
                ));
            };
            let PathToken::Num(old_no) = old_token else {
                unreachable!("the old path descended through this array");
            };
            ctx.ops[op_i].field_no = new_no;
            ctx.ops[op_i].token_consumed = false;
            branch_array(ctx, container, child, old_no as u32)?
        }
        MpType::Map => {
            let PathToken::Str(new_key) = new_token else {
                return Err(op::err(
                    &ctx.ops[op_i],
                    "can not update map by non-string key",
                ));
            };
            let PathToken::Str(old_key) = old_token else {
                unreachable!("the old path descended through this map");
            };
            ctx.ops[op_i].key = new_key;
            ctx.ops[op_i].token_consumed = false;
            branch_map(ctx, container, child, old_key)?
        }
        _ => return Err(op::err_no_such_field(&ctx.ops[op_i])),
    };

    if transform_root {
        *field = next_hop_value;
        Ok(field)
    } else {
        field.kind = FieldKind::Route(RouteUpdate {
            path: &old_path[..saved_old_offset],
            next_hop: Box::new(next_hop_value),
        });
        match &mut field.kind {
            FieldKind::Route(route) => Ok(&mut route.next_hop),
            _ => unreachable!(),
        }
    }
}

/// Whether a detached subtree can be moved into a materialized
/// container as-is. A bar whose whole path was consumed and whose
/// operation is `!` or `#` changes its parent's header and siblings,
/// so it must be re-applied instead of copied.
fn is_copyable(ctx: &UpdateCtx<'_>, child: &UpdateField<'_>) -> bool {
    match &child.kind {
        FieldKind::Bar(bar) => {
            !bar.path.is_empty() || {
                let opcode = ctx.ops[bar.op].opcode;
                opcode != b'!' && opcode != b'#'
            }
        }
        _ => true,
    }
}

fn branch_array<'a>(
    ctx: &mut UpdateCtx<'a>,
    container: &'a [u8],
    child: UpdateField<'a>,
    old_no: u32,
) -> Result<UpdateField<'a>> {
    if is_copyable(ctx, &child) {
        let arr = ArrayUpdate::create_with_child(container, child, old_no)?;
        return Ok(UpdateField {
            data: container,
            kind: FieldKind::Array(arr),
        });
    }
    // Re-apply the non-copyable operation against the materialized
    // array.
    let FieldKind::Bar(bar) = child.kind else {
        unreachable!("only bars are non-copyable");
    };
    ctx.ops[bar.op].field_no = old_no as i64;
    ctx.ops[bar.op].token_consumed = false;
    let mut next_hop = UpdateField {
        data: container,
        kind: FieldKind::Array(ArrayUpdate::create(container)?),
    };
    field::do_field_op(ctx, bar.op, &mut next_hop)?;
    Ok(next_hop)
}

fn branch_map<'a>(
    ctx: &mut UpdateCtx<'a>,
    container: &'a [u8],
    child: UpdateField<'a>,
    old_key: &'a str,
) -> Result<UpdateField<'a>> {
    if is_copyable(ctx, &child) {
        let map = MapUpdate::create_with_child(container, old_key, child)?;
        return Ok(UpdateField {
            data: container,
            kind: FieldKind::Map(map),
        });
    }
    let FieldKind::Bar(bar) = child.kind else {
        unreachable!("only bars are non-copyable");
    };
    ctx.ops[bar.op].key = old_key;
    ctx.ops[bar.op].token_consumed = false;
    let mut next_hop = UpdateField {
        data: container,
        kind: FieldKind::Map(MapUpdate::create(container)?),
    };
    field::do_field_op(ctx, bar.op, &mut next_hop)?;
    Ok(next_hop)
}
