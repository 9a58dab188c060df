// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the update engine.

use thiserror::Error;

/// Result type using UpdateError
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors produced while decoding or applying an operation batch.
///
/// Decode-time errors ([`UpdateError::IllegalParams`],
/// [`UpdateError::UnknownUpdateOp`], [`UpdateError::BadJsonPath`]) abort
/// a batch even in upsert mode; everything else is an apply-time client
/// error that upsert mode downgrades to a log entry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// The batch or one of its operations is malformed.
    #[error("illegal parameters: {0}")]
    IllegalParams(String),

    /// Unknown opcode or wrong argument count for a known opcode.
    #[error("unknown UPDATE operation")]
    UnknownUpdateOp,

    /// A field number addresses nothing.
    #[error("field {0} was not found in the tuple")]
    NoSuchFieldNo(i64),

    /// A field name or path addresses nothing.
    #[error("field '{0}' was not found in the tuple")]
    NoSuchFieldName(String),

    /// An operation argument or source field has the wrong type.
    #[error("argument type in operation '{op}' on field {field} does not match field type: expected {expected}")]
    ArgType {
        op: char,
        field: String,
        expected: &'static str,
    },

    /// A field-level constraint was violated (double update, zero
    /// delete count, wrong container access, ...).
    #[error("field {field} UPDATE error: {reason}")]
    Field { field: String, reason: String },

    /// Integer arithmetic left the (-2^63, 2^64) range.
    #[error("integer overflow in operation '{op}' on field {field}")]
    IntegerOverflow { op: char, field: String },

    /// Decimal arithmetic overflowed.
    #[error("decimal overflow in operation '{op}' on field {field}")]
    DecimalOverflow { op: char, field: String },

    /// Splice bounds error.
    #[error("SPLICE error on field {field}: {reason}")]
    Splice { field: String, reason: &'static str },

    /// A requested behavior is recognized but not supported.
    #[error("update does not support {0}")]
    Unsupported(&'static str),

    /// The same key or field was addressed twice in one batch.
    #[error("duplicate key '{key}' in the updated map")]
    Duplicate { key: String },

    /// A JSON path failed to parse.
    #[error("invalid JSON path '{path}': error at position {offset}")]
    BadJsonPath { path: String, offset: usize },
}

impl UpdateError {
    /// Whether the error is fatal even under upsert error suppression.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            UpdateError::IllegalParams(_)
                | UpdateError::UnknownUpdateOp
                | UpdateError::BadJsonPath { .. }
        )
    }
}
