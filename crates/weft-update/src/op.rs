// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation decoding and scalar application.
//!
//! A batch is an encoded array of per-operation arrays
//! `[opcode, selector, args...]`. Decoding validates shapes, normalizes
//! selectors to 0-based positions, initializes the residual path lexer,
//! and accumulates the column mask. Application of scalar operators
//! (arith, bit, splice) against old field bytes also lives here; the
//! tree modules decide *where* the result lands.

use bytes::{BufMut, BytesMut};

use crate::arith::{self, ArithArg, ArithError};
use crate::dict::Dictionary;
use crate::error::{Result, UpdateError};
use crate::mp::{self, Cursor, MpType};
use crate::path::{PathLexer, PathToken};

/// Hard cap on operations per batch.
pub const MAX_UPDATE_OPS: u32 = 4000;

/// Display base for field numbers in error messages.
pub(crate) const TUPLE_INDEX_BASE: i64 = 1;

/// Caller convention for the first field ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBase {
    /// Fields count from 0.
    #[default]
    Zero,
    /// Fields count from 1.
    One,
}

impl IndexBase {
    pub(crate) fn as_i64(self) -> i64 {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }
}

/// Decoded argument of one operation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OpArg<'a> {
    /// `=` and `!`: raw encoded value bytes.
    Set { value: &'a [u8] },
    /// `#`: consecutive field count.
    Del { count: u32 },
    /// `+`/`-`: argument, then the result after application.
    Arith(ArithArg),
    /// `&`/`|`/`^`: argument, then the result.
    Bit { value: u64 },
    /// `:`: splice triple plus the tail geometry filled at apply time.
    Splice {
        offset: i32,
        cut: i32,
        paste: &'a [u8],
        tail_offset: i32,
        tail_len: i32,
    },
}

/// One decoded update operation.
#[derive(Debug, Clone)]
pub(crate) struct UpdateOp<'a> {
    pub opcode: u8,
    /// 0-based position at the current descent level; negative counts
    /// from the tail until adjusted.
    pub field_no: i64,
    /// Current string key at the descent level (map levels).
    pub key: &'a str,
    /// The current token was used by a container level; the next level
    /// must lex a fresh one.
    pub token_consumed: bool,
    pub lexer: PathLexer<'a>,
    pub arg: OpArg<'a>,
    /// Encoded size of the operation result, filled at apply time.
    pub new_field_len: u32,
    /// Byte span of this operation within the batch expression.
    pub span: (usize, usize),
}

impl<'a> UpdateOp<'a> {
    /// No residual path remains: the operation addresses the current
    /// level directly.
    pub fn is_term(&self) -> bool {
        self.lexer.at_end()
    }

    /// Field identifier for error messages.
    pub fn field_str(&self) -> String {
        if !self.lexer.src().is_empty() {
            format!("'{}'", self.lexer.src())
        } else if self.field_no >= 0 {
            (self.field_no + TUPLE_INDEX_BASE).to_string()
        } else {
            self.field_no.to_string()
        }
    }

    /// Lex the next path token into `field_no`/`key`. Returns the
    /// token; `End` here means the path ran out one level early.
    pub fn consume_token(&mut self) -> Result<PathToken<'a>> {
        let token = self.lexer.next_token()?;
        match token {
            PathToken::Num(n) => self.field_no = n,
            PathToken::Str(s) => self.key = s,
            PathToken::End => return Err(err_no_such_field(self)),
            PathToken::Any => return Err(UpdateError::Unsupported("wildcard in JSON path")),
        }
        self.token_consumed = false;
        Ok(token)
    }

    /// Resolve a possibly negative position against `field_max`
    /// entries at the current level.
    pub fn adjust_field_no(&mut self, field_max: i64) -> Result<()> {
        if self.field_no >= 0 {
            if self.field_no < field_max {
                return Ok(());
            }
        } else if self.field_no + field_max >= 0 {
            self.field_no += field_max;
            return Ok(());
        }
        Err(err_no_such_field(self))
    }
}

/* error helpers */

pub(crate) fn err(op: &UpdateOp<'_>, reason: impl Into<String>) -> UpdateError {
    UpdateError::Field {
        field: op.field_str(),
        reason: reason.into(),
    }
}

pub(crate) fn err_double(op: &UpdateOp<'_>) -> UpdateError {
    err(op, "double update of the same field")
}

pub(crate) fn err_no_such_field(op: &UpdateOp<'_>) -> UpdateError {
    if !op.lexer.src().is_empty() {
        UpdateError::NoSuchFieldName(op.lexer.src().to_string())
    } else if op.field_no >= 0 {
        UpdateError::NoSuchFieldNo(op.field_no + TUPLE_INDEX_BASE)
    } else {
        UpdateError::NoSuchFieldNo(op.field_no)
    }
}

pub(crate) fn err_arg_type(op: &UpdateOp<'_>, expected: &'static str) -> UpdateError {
    UpdateError::ArgType {
        op: op.opcode as char,
        field: op.field_str(),
        expected,
    }
}

pub(crate) fn err_splice_bound(op: &UpdateOp<'_>) -> UpdateError {
    UpdateError::Splice {
        field: op.field_str(),
        reason: "offset is out of bound",
    }
}

fn err_arith(op: &UpdateOp<'_>, e: ArithError) -> UpdateError {
    match e {
        ArithError::IntOverflow => UpdateError::IntegerOverflow {
            op: op.opcode as char,
            field: op.field_str(),
        },
        ArithError::DecimalOverflow => UpdateError::DecimalOverflow {
            op: op.opcode as char,
            field: op.field_str(),
        },
        ArithError::BadDecimalConversion => {
            err_arg_type(op, "a number convertible to decimal")
        }
    }
}

/* decode */

fn arg_count(opcode: u8) -> Option<u32> {
    match opcode {
        b'=' | b'!' | b'#' | b'+' | b'-' | b'&' | b'|' | b'^' => Some(3),
        b':' => Some(5),
        _ => None,
    }
}

/// Read an i64 selector or argument; signed and unsigned accepted.
fn read_i64_arg(op: &UpdateOp<'_>, cur: &mut Cursor<'_>) -> Result<i64> {
    match mp::type_of(cur)? {
        MpType::Uint | MpType::Int => mp::read_int(cur).map_err(|_| err_arg_type(op, "an integer")),
        _ => Err(err_arg_type(op, "an integer")),
    }
}

fn read_arg<'a>(op: &mut UpdateOp<'a>, cur: &mut Cursor<'a>, index_base: i64) -> Result<()> {
    match op.opcode {
        b'=' | b'!' => {
            let value = mp::value_span(cur)?;
            op.arg = OpArg::Set { value };
        }
        b'#' => {
            if mp::type_of(cur)? != MpType::Uint {
                return Err(err_arg_type(op, "a positive integer"));
            }
            let count = mp::read_uint(cur)?;
            if count == 0 {
                return Err(err(&*op, "cannot delete 0 fields"));
            }
            op.arg = OpArg::Del {
                count: count.min(u32::MAX as u64) as u32,
            };
        }
        b'+' | b'-' => {
            let mut probe = cur.clone();
            match arith::read_arith(&mut probe)? {
                Some(value) => {
                    *cur = probe;
                    op.arg = OpArg::Arith(value);
                }
                None => return Err(err_arg_type(op, "a number")),
            }
        }
        b'&' | b'|' | b'^' => {
            if mp::type_of(cur)? != MpType::Uint {
                return Err(err_arg_type(op, "a positive integer"));
            }
            op.arg = OpArg::Bit {
                value: mp::read_uint(cur)?,
            };
        }
        b':' => {
            let offset64 = read_i64_arg(op, cur)?;
            let mut offset =
                i32::try_from(offset64).map_err(|_| err_arg_type(op, "an integer"))?;
            if offset >= 0 {
                if (offset as i64) < index_base {
                    return Err(err_splice_bound(op));
                }
                offset -= index_base as i32;
            }
            let cut64 = read_i64_arg(op, cur)?;
            let cut = i32::try_from(cut64).map_err(|_| err_arg_type(op, "an integer"))?;
            if mp::type_of(cur)? != MpType::Str {
                return Err(err_arg_type(op, "a string"));
            }
            let paste = mp::read_str(cur)?;
            op.arg = OpArg::Splice {
                offset,
                cut,
                paste,
                tail_offset: 0,
                tail_len: 0,
            };
        }
        _ => return Err(UpdateError::UnknownUpdateOp),
    }
    Ok(())
}

/// Decode one `[opcode, selector, args...]` entry.
fn decode_op<'a>(
    cur: &mut Cursor<'a>,
    dict: &Dictionary,
    index_base: i64,
) -> Result<UpdateOp<'a>> {
    if mp::type_of(cur)? != MpType::Array {
        return Err(UpdateError::IllegalParams(
            "update operation must be an array {op,..}".to_string(),
        ));
    }
    let args = mp::read_array_header(cur)?;
    if args < 1 {
        return Err(UpdateError::IllegalParams(
            "update operation must be an array {op,..}, got empty array".to_string(),
        ));
    }
    if mp::type_of(cur)? != MpType::Str {
        return Err(UpdateError::IllegalParams(
            "update operation name must be a string".to_string(),
        ));
    }
    let opcode_str = mp::read_str(cur)?;
    if opcode_str.len() != 1 {
        return Err(UpdateError::UnknownUpdateOp);
    }
    let opcode = opcode_str[0];
    let expected_args = arg_count(opcode).ok_or(UpdateError::UnknownUpdateOp)?;
    if args != expected_args {
        return Err(UpdateError::UnknownUpdateOp);
    }

    let mut op = UpdateOp {
        opcode,
        field_no: 0,
        key: "",
        token_consumed: false,
        lexer: PathLexer::empty(),
        arg: OpArg::Del { count: 0 },
        new_field_len: 0,
        span: (0, 0),
    };

    match mp::type_of(cur)? {
        MpType::Uint | MpType::Int => {
            let field_no = read_i64_arg(&op, cur)?;
            if i32::try_from(field_no).is_err() {
                return Err(err_arg_type(&op, "an integer"));
            }
            if field_no - index_base >= 0 {
                op.field_no = field_no - index_base;
            } else if field_no < 0 {
                op.field_no = field_no;
            } else {
                return Err(UpdateError::NoSuchFieldNo(field_no));
            }
        }
        MpType::Str => {
            let raw = mp::read_str(cur)?;
            let path = std::str::from_utf8(raw).map_err(|_| {
                UpdateError::IllegalParams("field path must be valid UTF-8".to_string())
            })?;
            op.lexer = PathLexer::new(path);
            if let Some(field_no) = dict.get(path) {
                // A plain column name: no residual path to walk.
                op.field_no = field_no as i64;
                op.lexer.consume_all();
            } else {
                match op.lexer.next_token()? {
                    PathToken::Num(n) => op.field_no = n,
                    PathToken::Str(name) => match dict.get(name) {
                        Some(field_no) => op.field_no = field_no as i64,
                        None => {
                            return Err(UpdateError::NoSuchFieldName(path.to_string()));
                        }
                    },
                    _ => return Err(UpdateError::NoSuchFieldName(path.to_string())),
                }
            }
        }
        _ => {
            return Err(UpdateError::IllegalParams(
                "field id must be a number or a string".to_string(),
            ));
        }
    }
    read_arg(&mut op, cur, index_base)?;
    Ok(op)
}

/* column mask */

const COLUMN_MASK_FULL: u64 = u64::MAX;

fn column_mask_set_fieldno(mask: &mut u64, fieldno: u32) {
    if fieldno >= 63 {
        // A sparse mask cannot track high columns individually; the
        // last bit stands for "any column from 63 on".
        *mask |= 1 << 63;
    } else {
        *mask |= 1 << fieldno;
    }
}

fn column_mask_set_range(mask: &mut u64, first_fieldno: u32) {
    if first_fieldno < 63 {
        *mask |= COLUMN_MASK_FULL << first_fieldno;
    } else {
        *mask |= 1 << 63;
    }
}

/// Decoded batch plus everything the tree walk needs.
#[derive(Debug)]
pub(crate) struct UpdateCtx<'a> {
    pub ops: Vec<UpdateOp<'a>>,
    pub column_mask: u64,
}

/// Read and validate an operation batch, computing the column mask.
///
/// `field_count_hint` resolves negative top-level selectors for the
/// mask; a hint of 0 (no tuple at hand, the upsert case) only costs
/// mask precision, never correctness of the decode.
pub(crate) fn read_ops<'a>(
    expr: &'a [u8],
    dict: &Dictionary,
    index_base: IndexBase,
    mut field_count_hint: i64,
) -> Result<UpdateCtx<'a>> {
    let mut cur = Cursor::new(expr);
    if mp::type_of(&cur)? != MpType::Array {
        return Err(UpdateError::IllegalParams(
            "update operations must be an array {{op,..}, {op,..}}".to_string(),
        ));
    }
    let op_count = mp::read_array_header(&mut cur)?;
    if op_count > MAX_UPDATE_OPS {
        return Err(UpdateError::IllegalParams(
            "too many operations for update".to_string(),
        ));
    }
    let mut ops = Vec::with_capacity(op_count as usize);
    let mut column_mask: u64 = 0;
    for _ in 0..op_count {
        let start = cur.pos();
        let mut op = decode_op(&mut cur, dict, index_base.as_i64())?;
        op.span = (start, cur.pos());

        if column_mask != COLUMN_MASK_FULL {
            let field_no = if op.field_no >= 0 {
                op.field_no
            } else if op.opcode != b'!' {
                field_count_hint + op.field_no
            } else {
                // '!' with a negative selector inserts after the
                // addressed position, so the new column is one right
                // of it.
                field_count_hint + op.field_no + 1
            };
            if field_no < 0 {
                // The negative selector underflows the hint; assume
                // the worst.
                column_mask_set_range(&mut column_mask, 0);
            } else {
                if op.opcode == b'!' {
                    field_count_hint += 1;
                } else if op.opcode == b'#' {
                    if let OpArg::Del { count } = op.arg {
                        field_count_hint -= count as i64;
                    }
                }
                if op.opcode == b'!' || op.opcode == b'#' {
                    // Insertion and deletion shift the columns to the
                    // right of the touched one.
                    column_mask_set_range(&mut column_mask, field_no as u32);
                } else {
                    column_mask_set_fieldno(&mut column_mask, field_no as u32);
                }
            }
        }
        ops.push(op);
    }
    if !cur.at_end() {
        return Err(UpdateError::IllegalParams(
            "can't unpack update operations".to_string(),
        ));
    }
    Ok(UpdateCtx { ops, column_mask })
}

/* scalar application against old field bytes */

/// Apply an arithmetic operation to the old value; the result replaces
/// the operation argument.
pub(crate) fn do_op_arith(op: &mut UpdateOp<'_>, old: &[u8]) -> Result<()> {
    let mut cur = Cursor::new(old);
    let left = match arith::read_arith(&mut cur) {
        Ok(Some(v)) => v,
        _ => return Err(err_arg_type(op, "a number")),
    };
    let OpArg::Arith(right) = op.arg else {
        unreachable!("arith op carries an arith arg");
    };
    let result = arith::make_arith(op.opcode, left, right).map_err(|e| err_arith(op, e))?;
    op.arg = OpArg::Arith(result);
    op.new_field_len = arith::sizeof_arith(&result) as u32;
    Ok(())
}

/// Apply a bitwise operation; the source must be an unsigned integer.
pub(crate) fn do_op_bit(op: &mut UpdateOp<'_>, old: &[u8]) -> Result<()> {
    let mut cur = Cursor::new(old);
    if mp::type_of(&cur)? != MpType::Uint {
        return Err(err_arg_type(op, "a positive integer"));
    }
    let old_value = mp::read_uint(&mut cur)?;
    let OpArg::Bit { value } = op.arg else {
        unreachable!("bit op carries a bit arg");
    };
    let result = match op.opcode {
        b'&' => old_value & value,
        b'|' => old_value | value,
        b'^' => old_value ^ value,
        _ => unreachable!(),
    };
    op.arg = OpArg::Bit { value: result };
    op.new_field_len = mp::sizeof_uint(result) as u32;
    Ok(())
}

/// Apply a splice; the source must be a string. Clamps offsets per the
/// splice rules and records the surviving tail geometry.
pub(crate) fn do_op_splice(op: &mut UpdateOp<'_>, old: &[u8]) -> Result<()> {
    let mut cur = Cursor::new(old);
    if mp::type_of(&cur)? != MpType::Str {
        return Err(err_arg_type(op, "a string"));
    }
    let str_len = mp::read_str(&mut cur)?.len() as i32;
    let OpArg::Splice {
        mut offset,
        mut cut,
        paste,
        ..
    } = op.arg
    else {
        unreachable!("splice op carries a splice arg");
    };
    if offset < 0 {
        if -offset > str_len + 1 {
            return Err(err_splice_bound(op));
        }
        offset += str_len + 1;
    } else if offset > str_len {
        offset = str_len;
    }
    if cut < 0 {
        // Negative cut length: leave -cut bytes of the tail uncut.
        if -cut > str_len - offset {
            cut = 0;
        } else {
            cut += str_len - offset;
        }
    } else if cut > str_len - offset {
        cut = str_len - offset;
    }
    let tail_offset = offset + cut;
    let tail_len = str_len - tail_offset;
    op.arg = OpArg::Splice {
        offset,
        cut,
        paste,
        tail_offset,
        tail_len,
    };
    op.new_field_len = mp::sizeof_str(offset as usize + paste.len() + tail_len as usize) as u32;
    Ok(())
}

/// Write an operation's result. `old` is the original field for the
/// operators that re-slice it (splice); set-like operators ignore it.
pub(crate) fn store_op(op: &UpdateOp<'_>, old: &[u8], out: &mut BytesMut) {
    match &op.arg {
        OpArg::Set { value } => out.put_slice(value),
        OpArg::Arith(arg) => arith::store_arith(arg, out),
        OpArg::Bit { value } => mp::write_uint(out, *value),
        OpArg::Splice {
            offset,
            paste,
            tail_offset,
            tail_len,
            ..
        } => {
            let mut cur = Cursor::new(old);
            let body = mp::read_str(&mut cur).expect("splice source re-read");
            let new_len = *offset as usize + paste.len() + *tail_len as usize;
            mp::write_str_header(out, new_len);
            out.put_slice(&body[..*offset as usize]);
            out.put_slice(paste);
            out.put_slice(&body[*tail_offset as usize..*tail_offset as usize + *tail_len as usize]);
        }
        OpArg::Del { .. } => unreachable!("delete has no stored value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp;

    fn encode_ops(ops: &[&[u8]]) -> Vec<u8> {
        let mut out = BytesMut::new();
        mp::write_array_header(&mut out, ops.len() as u32);
        for op in ops {
            out.put_slice(op);
        }
        out.to_vec()
    }

    fn op_assign(field: i64, value: u64) -> Vec<u8> {
        let mut out = BytesMut::new();
        mp::write_array_header(&mut out, 3);
        mp::write_str(&mut out, b"=");
        if field >= 0 {
            mp::write_uint(&mut out, field as u64);
        } else {
            mp::write_int(&mut out, field);
        }
        mp::write_uint(&mut out, value);
        out.to_vec()
    }

    #[test]
    fn decodes_integer_selectors_with_base() {
        let expr = encode_ops(&[&op_assign(1, 10)]);
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::One, 3).unwrap();
        assert_eq!(ctx.ops[0].field_no, 0);
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 3).unwrap();
        assert_eq!(ctx.ops[0].field_no, 1);
    }

    #[test]
    fn field_zero_with_base_one_fails() {
        let expr = encode_ops(&[&op_assign(0, 10)]);
        let err = read_ops(&expr, &Dictionary::new(), IndexBase::One, 3).unwrap_err();
        assert!(matches!(err, UpdateError::NoSuchFieldNo(0)));
    }

    #[test]
    fn scalar_ops_set_single_mask_bits() {
        let expr = encode_ops(&[&op_assign(1, 10), &op_assign(3, 10)]);
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 5).unwrap();
        assert_eq!(ctx.column_mask, (1 << 1) | (1 << 3));
    }

    #[test]
    fn insert_sets_a_range_mask() {
        let mut ins = BytesMut::new();
        mp::write_array_header(&mut ins, 3);
        mp::write_str(&mut ins, b"!");
        mp::write_uint(&mut ins, 2);
        mp::write_uint(&mut ins, 7);
        let expr = encode_ops(&[&ins]);
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 5).unwrap();
        assert_eq!(ctx.column_mask, COLUMN_MASK_FULL << 2);
    }

    #[test]
    fn high_columns_collapse_to_the_overflow_bit() {
        let expr = encode_ops(&[&op_assign(70, 10)]);
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 100).unwrap();
        assert_eq!(ctx.column_mask, 1 << 63);
    }

    #[test]
    fn negative_selector_resolves_against_the_hint() {
        let expr = encode_ops(&[&op_assign(-1, 10)]);
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 4).unwrap();
        assert_eq!(ctx.column_mask, 1 << 3);
        // Underflowing the hint degrades to "everything".
        let ctx = read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 0).unwrap();
        assert_eq!(ctx.column_mask, COLUMN_MASK_FULL);
    }

    #[test]
    fn unknown_opcode_and_wrong_arity_fail() {
        let mut bad = BytesMut::new();
        mp::write_array_header(&mut bad, 3);
        mp::write_str(&mut bad, b"?");
        mp::write_uint(&mut bad, 1);
        mp::write_uint(&mut bad, 1);
        let expr = encode_ops(&[&bad]);
        assert!(matches!(
            read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 1),
            Err(UpdateError::UnknownUpdateOp)
        ));

        let mut short = BytesMut::new();
        mp::write_array_header(&mut short, 2);
        mp::write_str(&mut short, b"=");
        mp::write_uint(&mut short, 1);
        let expr = encode_ops(&[&short]);
        assert!(matches!(
            read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 1),
            Err(UpdateError::UnknownUpdateOp)
        ));
    }

    #[test]
    fn delete_zero_fields_fails() {
        let mut del = BytesMut::new();
        mp::write_array_header(&mut del, 3);
        mp::write_str(&mut del, b"#");
        mp::write_uint(&mut del, 1);
        mp::write_uint(&mut del, 0);
        let expr = encode_ops(&[&del]);
        assert!(matches!(
            read_ops(&expr, &Dictionary::new(), IndexBase::Zero, 3),
            Err(UpdateError::Field { .. })
        ));
    }

    #[test]
    fn dictionary_resolves_whole_names_and_path_heads() {
        let dict: Dictionary = [("flags", 2u32)].into_iter().collect();
        let mut set = BytesMut::new();
        mp::write_array_header(&mut set, 3);
        mp::write_str(&mut set, b"=");
        mp::write_str(&mut set, b"flags");
        mp::write_uint(&mut set, 1);
        let expr = encode_ops(&[&set]);
        let ctx = read_ops(&expr, &dict, IndexBase::One, 4).unwrap();
        assert_eq!(ctx.ops[0].field_no, 2);
        assert!(ctx.ops[0].is_term());

        let mut deep = BytesMut::new();
        mp::write_array_header(&mut deep, 3);
        mp::write_str(&mut deep, b"=");
        mp::write_str(&mut deep, b"flags[1]");
        mp::write_uint(&mut deep, 1);
        let expr = encode_ops(&[&deep]);
        let ctx = read_ops(&expr, &dict, IndexBase::One, 4).unwrap();
        assert_eq!(ctx.ops[0].field_no, 2);
        assert!(!ctx.ops[0].is_term());
    }

    #[test]
    fn splice_application_clamps_and_sizes() {
        let mut old = BytesMut::new();
        mp::write_str(&mut old, b"hello");
        let mut op = UpdateOp {
            opcode: b':',
            field_no: 0,
            key: "",
            token_consumed: false,
            lexer: PathLexer::empty(),
            arg: OpArg::Splice {
                offset: 5,
                cut: 0,
                paste: b"!!",
                tail_offset: 0,
                tail_len: 0,
            },
            new_field_len: 0,
            span: (0, 0),
        };
        do_op_splice(&mut op, &old).unwrap();
        let mut out = BytesMut::new();
        store_op(&op, &old, &mut out);
        let mut cur = Cursor::new(&out);
        assert_eq!(mp::read_str(&mut cur).unwrap(), b"hello!!");
    }
}
