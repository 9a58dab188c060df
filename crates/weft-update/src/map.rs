// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Map update nodes.
//!
//! A map node keeps the original encoded entries as an unchanged base
//! and tracks mutations as a list of touched entries plus byte ranges
//! cut out of the base. Touched entries are stored first, in update
//! order, followed by the surviving base bytes; MessagePack maps are
//! semantically unordered, so reordering entries is fair game.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, UpdateError};
use crate::field::{self, FieldKind, UpdateField};
use crate::mp::{self, Cursor, MpType};
use crate::op::{self, OpArg, UpdateCtx};
use crate::path::PathToken;

/// A touched entry: an extracted base entry or a pending insertion.
#[derive(Debug)]
pub(crate) struct MapEntry<'a> {
    pub key: &'a str,
    /// Encoded key bytes for extracted entries; pending insertions
    /// encode their key fresh at store time.
    pub key_raw: Option<&'a [u8]>,
    pub field: UpdateField<'a>,
}

#[derive(Debug)]
pub(crate) struct MapUpdate<'a> {
    /// Encoded base entries, header excluded.
    base: &'a [u8],
    /// Current entry count (base minus deletions plus insertions).
    count: u32,
    entries: Vec<MapEntry<'a>>,
    /// Byte ranges removed from `base`, sorted by start.
    cuts: Vec<(usize, usize)>,
}

impl<'a> MapUpdate<'a> {
    /// Build a map node over a full encoded map span.
    pub fn create(data: &'a [u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let count = mp::read_map_header(&mut cur)?;
        Ok(Self {
            base: cur.tail(),
            count,
            entries: Vec::new(),
            cuts: Vec::new(),
        })
    }

    /// Build a map node over `data` whose entry under `key` is an
    /// already-updated subtree. The child's span is rebased onto the
    /// value it now occupies.
    pub fn create_with_child(
        data: &'a [u8],
        key: &'a str,
        mut child: UpdateField<'a>,
    ) -> Result<Self> {
        let mut map = Self::create(data)?;
        let Some((key_raw, value)) = map.scan_from(map.base, 0, key)? else {
            return Err(UpdateError::NoSuchFieldName(key.to_string()));
        };
        child.data = value;
        map.cut(key_raw, value);
        map.entries.push(MapEntry {
            key,
            key_raw: Some(key_raw),
            field: child,
        });
        Ok(map)
    }

    fn cut(&mut self, key_raw: &'a [u8], value: &'a [u8]) {
        let start = field::offset_of(self.base, key_raw);
        let end = field::offset_of(self.base, value) + value.len();
        let at = self.cuts.partition_point(|&(s, _)| s < start);
        self.cuts.insert(at, (start, end));
    }

    /// Scan the base (cut entries excluded) for a string key starting
    /// at a byte offset. Returns the encoded key span and value span.
    fn scan_from(
        &self,
        base: &'a [u8],
        mut pos: usize,
        key: &str,
    ) -> Result<Option<(&'a [u8], &'a [u8])>> {
        while pos < base.len() {
            if let Some(&(_, end)) = self.cuts.iter().find(|&&(s, _)| s == pos) {
                pos = end;
                continue;
            }
            let mut cur = Cursor::new(&base[pos..]);
            let key_start = pos;
            let matches = if mp::type_of(&cur)? == MpType::Str {
                let entry_key = mp::read_str(&mut cur)?;
                entry_key == key.as_bytes()
            } else {
                mp::next(&mut cur)?;
                false
            };
            let key_raw = &base[key_start..pos + cur.pos()];
            let value_start = pos + cur.pos();
            mp::next(&mut cur)?;
            let value = &base[value_start..pos + cur.pos()];
            pos += cur.pos();
            if matches {
                return Ok(Some((key_raw, value)));
            }
        }
        Ok(None)
    }

    fn find_touched(&mut self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Extract an untouched base entry as a nop field, or find the
    /// already-touched one. `Ok(None)` when the key is absent.
    fn extract(&mut self, key: &'a str) -> Result<Option<usize>> {
        if let Some(at) = self.find_touched(key) {
            return Ok(Some(at));
        }
        let Some((key_raw, value)) = self.scan_from(self.base, 0, key)? else {
            return Ok(None);
        };
        self.cut(key_raw, value);
        self.entries.push(MapEntry {
            key,
            key_raw: Some(key_raw),
            field: UpdateField::nop(value),
        });
        Ok(Some(self.entries.len() - 1))
    }
}

/// Apply one operation at a map level.
pub(crate) fn do_map_op<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    field: &mut UpdateField<'a>,
) -> Result<()> {
    if ctx.ops[op_i].token_consumed {
        let token = ctx.ops[op_i].consume_token()?;
        if matches!(token, PathToken::Num(_)) {
            return Err(op::err(
                &ctx.ops[op_i],
                "can not update map by non-string key",
            ));
        }
    }
    let term = ctx.ops[op_i].is_term();
    let opcode = ctx.ops[op_i].opcode;
    let key = ctx.ops[op_i].key;
    let FieldKind::Map(map) = &mut field.kind else {
        unreachable!("map dispatch on a non-map field");
    };

    if !term {
        let Some(at) = map.extract(key)? else {
            return Err(op::err_no_such_field(&ctx.ops[op_i]));
        };
        ctx.ops[op_i].token_consumed = true;
        return field::do_field_op(ctx, op_i, &mut map.entries[at].field);
    }

    match opcode {
        b'=' => {
            if map.find_touched(key).is_some() {
                return Err(op::err_double(&ctx.ops[op_i]));
            }
            if let Some((key_raw, value)) = map.scan_from(map.base, 0, key)? {
                map.cut(key_raw, value);
                let OpArg::Set { value: new_value } = ctx.ops[op_i].arg else {
                    unreachable!("set carries a set arg");
                };
                ctx.ops[op_i].new_field_len = new_value.len() as u32;
                map.entries.push(MapEntry {
                    key,
                    key_raw: Some(key_raw),
                    field: UpdateField {
                        data: value,
                        kind: FieldKind::Scalar { op: op_i },
                    },
                });
            } else {
                insert_new(ctx, op_i, map, key)?;
            }
            Ok(())
        }
        b'!' => {
            if map.find_touched(key).is_some() || map.scan_from(map.base, 0, key)?.is_some() {
                return Err(UpdateError::Duplicate {
                    key: key.to_string(),
                });
            }
            insert_new(ctx, op_i, map, key)
        }
        b'#' => {
            let OpArg::Del { count } = ctx.ops[op_i].arg else {
                unreachable!("delete carries a count arg");
            };
            if count != 1 {
                return Err(op::err(
                    &ctx.ops[op_i],
                    "can delete only 1 field from a map in the same operation",
                ));
            }
            if map.find_touched(key).is_some() {
                return Err(op::err_double(&ctx.ops[op_i]));
            }
            let Some((key_raw, value)) = map.scan_from(map.base, 0, key)? else {
                return Err(op::err_no_such_field(&ctx.ops[op_i]));
            };
            map.cut(key_raw, value);
            map.count -= 1;
            Ok(())
        }
        _ => {
            let Some(at) = map.extract(key)? else {
                return Err(op::err_no_such_field(&ctx.ops[op_i]));
            };
            if !matches!(map.entries[at].field.kind, FieldKind::Nop) {
                return Err(op::err_double(&ctx.ops[op_i]));
            }
            let old = map.entries[at].field.data;
            match opcode {
                b'+' | b'-' => op::do_op_arith(&mut ctx.ops[op_i], old)?,
                b'&' | b'|' | b'^' => op::do_op_bit(&mut ctx.ops[op_i], old)?,
                b':' => op::do_op_splice(&mut ctx.ops[op_i], old)?,
                _ => unreachable!("set, insert and delete handled above"),
            }
            map.entries[at].field.kind = FieldKind::Scalar { op: op_i };
            Ok(())
        }
    }
}

fn insert_new<'a>(
    ctx: &mut UpdateCtx<'a>,
    op_i: usize,
    map: &mut MapUpdate<'a>,
    key: &'a str,
) -> Result<()> {
    let OpArg::Set { value } = ctx.ops[op_i].arg else {
        unreachable!("insert carries a set arg");
    };
    ctx.ops[op_i].new_field_len = value.len() as u32;
    map.entries.push(MapEntry {
        key,
        key_raw: None,
        field: UpdateField::nop(value),
    });
    map.count += 1;
    Ok(())
}

pub(crate) fn sizeof(ctx: &UpdateCtx<'_>, map: &MapUpdate<'_>) -> Result<usize> {
    let mut size = mp::sizeof_map(map.count);
    let cut_total: usize = map.cuts.iter().map(|&(s, e)| e - s).sum();
    size += map.base.len() - cut_total;
    for entry in &map.entries {
        size += match entry.key_raw {
            Some(raw) => raw.len(),
            None => mp::sizeof_str(entry.key.len()),
        };
        size += field::field_sizeof(ctx, &entry.field)?;
    }
    Ok(size)
}

pub(crate) fn store(ctx: &UpdateCtx<'_>, map: &MapUpdate<'_>, out: &mut BytesMut) -> Result<()> {
    mp::write_map_header(out, map.count);
    for entry in &map.entries {
        match entry.key_raw {
            Some(raw) => out.put_slice(raw),
            None => mp::write_str(out, entry.key.as_bytes()),
        }
        field::field_store(ctx, &entry.field, out)?;
    }
    // The surviving base: everything between the cut ranges.
    let mut pos = 0;
    for &(start, end) in &map.cuts {
        out.put_slice(&map.base[pos..start]);
        pos = end;
    }
    out.put_slice(&map.base[pos..]);
    Ok(())
}
