// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builders for encoded records and operation batches.
#![allow(dead_code)]

use bytes::BytesMut;
use weft_fiber::Region;
use weft_update::mp;

pub fn region() -> Region {
    Region::new(512 * 1024, 64 * 1024)
}

pub fn uint(v: u64) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_uint(&mut out, v);
    out.to_vec()
}

pub fn int(v: i64) -> Vec<u8> {
    let mut out = BytesMut::new();
    if v >= 0 {
        mp::write_uint(&mut out, v as u64);
    } else {
        mp::write_int(&mut out, v);
    }
    out.to_vec()
}

pub fn dbl(v: f64) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_f64(&mut out, v);
    out.to_vec()
}

pub fn s(v: &str) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_str(&mut out, v.as_bytes());
    out.to_vec()
}

pub fn arr(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_array_header(&mut out, items.len() as u32);
    for item in items {
        out.extend_from_slice(item);
    }
    out.to_vec()
}

pub fn map(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_map_header(&mut out, entries.len() as u32);
    for (key, value) in entries {
        mp::write_str(&mut out, key.as_bytes());
        out.extend_from_slice(value);
    }
    out.to_vec()
}

/// Operation selector: a field number or a path.
pub enum Sel<'a> {
    No(i64),
    Path(&'a str),
}

fn put_sel(out: &mut BytesMut, sel: &Sel<'_>) {
    match sel {
        Sel::No(n) if *n >= 0 => mp::write_uint(out, *n as u64),
        Sel::No(n) => mp::write_int(out, *n),
        Sel::Path(p) => mp::write_str(out, p.as_bytes()),
    }
}

/// A three-element operation `[opcode, selector, arg]`.
pub fn op3(opcode: &str, sel: Sel<'_>, arg: Vec<u8>) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_array_header(&mut out, 3);
    mp::write_str(&mut out, opcode.as_bytes());
    put_sel(&mut out, &sel);
    out.extend_from_slice(&arg);
    out.to_vec()
}

/// A splice operation `[':', selector, offset, cut, paste]`.
pub fn op_splice(sel: Sel<'_>, offset: i64, cut: i64, paste: &str) -> Vec<u8> {
    let mut out = BytesMut::new();
    mp::write_array_header(&mut out, 5);
    mp::write_str(&mut out, b":");
    put_sel(&mut out, &sel);
    for v in [offset, cut] {
        if v >= 0 {
            mp::write_uint(&mut out, v as u64);
        } else {
            mp::write_int(&mut out, v);
        }
    }
    mp::write_str(&mut out, paste.as_bytes());
    out.to_vec()
}

/// A batch from encoded operations.
pub fn batch(ops: &[Vec<u8>]) -> Vec<u8> {
    arr(ops)
}

/// Walk a record and assert it decodes as exactly one value.
pub fn assert_well_formed(tuple: &[u8]) {
    let mut cur = mp::Cursor::new(tuple);
    mp::next(&mut cur).expect("output record must decode");
    assert!(cur.at_end(), "output record has trailing bytes");
}
