// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Arithmetic argument handling for `+` and `-` operations.
//!
//! Integers are carried through a 128-bit accumulator so the valid
//! MessagePack range (-2^63, 2^64) can overflow detectably. The result
//! type of a mixed operation is the "lowest" of the operand types in
//! the order decimal < double < float < int: once a decimal is
//! involved the result is decimal, then double, then float.

use bytes::BytesMut;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::mp::{self, Cursor, MpType};

/// Operand or result of an arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ArithArg {
    Decimal(Decimal),
    Double(f64),
    Float(f32),
    /// Holds the full unsigned-64 and negative-63 ranges.
    Int(i128),
}

/// Failure modes reported without field context; the operation layer
/// attaches the opcode and field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithError {
    IntOverflow,
    DecimalOverflow,
    /// A double/float operand cannot be represented as a decimal.
    BadDecimalConversion,
}

impl ArithArg {
    /// Promotion rank: lower wins when picking the result type.
    fn rank(&self) -> u8 {
        match self {
            ArithArg::Decimal(_) => 0,
            ArithArg::Double(_) => 1,
            ArithArg::Float(_) => 2,
            ArithArg::Int(_) => 3,
        }
    }

    fn to_double(self) -> f64 {
        match self {
            ArithArg::Double(v) => v,
            ArithArg::Float(v) => v as f64,
            ArithArg::Int(v) => v as f64,
            ArithArg::Decimal(_) => unreachable!("decimal handled before double folding"),
        }
    }

    fn to_decimal(self) -> Option<Decimal> {
        match self {
            ArithArg::Decimal(v) => Some(v),
            ArithArg::Double(v) => Decimal::from_f64(v),
            ArithArg::Float(v) => Decimal::from_f32(v),
            ArithArg::Int(v) => Decimal::from_i128(v),
        }
    }

    /// Negate the argument (used when squashing a `-` into a `+`).
    pub fn invert(self) -> Self {
        match self {
            ArithArg::Decimal(v) => ArithArg::Decimal(-v),
            ArithArg::Double(v) => ArithArg::Double(-v),
            ArithArg::Float(v) => ArithArg::Float(-v),
            ArithArg::Int(v) => ArithArg::Int(-v),
        }
    }
}

/// A 128-bit integer stays storable when it fits the unsigned-64 or
/// negative-63 MessagePack ranges.
fn int_in_range(v: i128) -> bool {
    v >= i64::MIN as i128 && v <= u64::MAX as i128
}

/// Read a numeric value. `Ok(None)` means the value is well-formed but
/// not a number.
pub(crate) fn read_arith(cur: &mut Cursor<'_>) -> Result<Option<ArithArg>> {
    Ok(match mp::type_of(cur)? {
        MpType::Uint => Some(ArithArg::Int(mp::read_uint(cur)? as i128)),
        MpType::Int => Some(ArithArg::Int(mp::read_int(cur)? as i128)),
        MpType::Double => Some(ArithArg::Double(mp::read_f64(cur)?)),
        MpType::Float => Some(ArithArg::Float(mp::read_f32(cur)?)),
        MpType::Ext => match mp::read_decimal(cur) {
            Ok(v) => Some(ArithArg::Decimal(v)),
            Err(_) => None,
        },
        _ => None,
    })
}

/// Apply `left op right` with type promotion and overflow checks.
/// `opcode` is `+` or `-`.
pub(crate) fn make_arith(
    opcode: u8,
    left: ArithArg,
    right: ArithArg,
) -> std::result::Result<ArithArg, ArithError> {
    debug_assert!(opcode == b'+' || opcode == b'-');
    let lowest = left.rank().min(right.rank());
    match lowest {
        3 => {
            let (ArithArg::Int(a), ArithArg::Int(b)) = (left, right) else {
                unreachable!();
            };
            let result = if opcode == b'+' { a + b } else { a - b };
            if !int_in_range(result) {
                return Err(ArithError::IntOverflow);
            }
            Ok(ArithArg::Int(result))
        }
        1 | 2 => {
            let a = left.to_double();
            let b = right.to_double();
            let c = if opcode == b'+' { a + b } else { a - b };
            if lowest == 1 {
                Ok(ArithArg::Double(c))
            } else {
                Ok(ArithArg::Float(c as f32))
            }
        }
        _ => {
            let a = left.to_decimal().ok_or(ArithError::BadDecimalConversion)?;
            let b = right.to_decimal().ok_or(ArithError::BadDecimalConversion)?;
            let c = if opcode == b'+' {
                a.checked_add(b)
            } else {
                a.checked_sub(b)
            };
            match c {
                Some(v) => Ok(ArithArg::Decimal(v)),
                None => Err(ArithError::DecimalOverflow),
            }
        }
    }
}

/// Encoded size of an argument.
pub(crate) fn sizeof_arith(arg: &ArithArg) -> usize {
    match arg {
        ArithArg::Int(v) => {
            if *v >= 0 {
                mp::sizeof_uint(*v as u64)
            } else {
                mp::sizeof_int(*v as i64)
            }
        }
        ArithArg::Double(_) => mp::sizeof_f64(),
        ArithArg::Float(_) => mp::sizeof_f32(),
        ArithArg::Decimal(_) => mp::sizeof_decimal(),
    }
}

pub(crate) fn store_arith(arg: &ArithArg, out: &mut BytesMut) {
    match arg {
        ArithArg::Int(v) => {
            if *v >= 0 {
                mp::write_uint(out, *v as u64);
            } else {
                mp::write_int(out, *v as i64);
            }
        }
        ArithArg::Double(v) => mp::write_f64(out, *v),
        ArithArg::Float(v) => mp::write_f32(out, *v),
        ArithArg::Decimal(v) => mp::write_decimal(out, v),
    }
}
