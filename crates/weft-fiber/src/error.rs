// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the fiber runtime.

use thiserror::Error;

/// Errors raised by the fiber runtime itself.
///
/// Application errors travel through the diagnostic slot as
/// [`anyhow::Error`]; a `FiberError` can be recovered from one with
/// `err.downcast_ref::<FiberError>()`.
#[derive(Debug, Error)]
pub enum FiberError {
    /// The fiber observed a pending cancellation request.
    #[error("fiber is cancelled")]
    Cancelled,

    /// A parameter failed validation (bad stack size, bad name, ...).
    #[error("illegal parameters: {0}")]
    IllegalParams(String),

    /// An OS-level operation failed (thread creation, thread join).
    #[error("system error: {0}")]
    System(String),

    /// A region reservation could not be satisfied.
    #[error("out of memory: failed to allocate {0} bytes")]
    OutOfMemory(usize),

    /// `join` was called on a fiber that is not joinable.
    #[error("the fiber is not joinable")]
    NotJoinable,

    /// A fiber tried to join itself.
    #[error("can not join self")]
    JoinSelf,

    /// A fiber operation was used on a thread that hosts no cord.
    #[error("no cord is running on this thread")]
    NoCord,
}
