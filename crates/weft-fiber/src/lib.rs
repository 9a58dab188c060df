// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Weft Fiber - Cooperative fiber runtime
//!
//! This crate multiplexes many user-level fibers over a single OS thread
//! driven by a non-blocking event loop. A thread hosting a scheduler is a
//! *cord*; fibers belong to exactly one cord and never migrate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Cord (OS thread)                    │
//! │                                                          │
//! │   event loop ──▶ drain posted wakeups                    │
//! │        │         drain ready queue (one FIFO batch)      │
//! │        │         resume each fiber to its next           │
//! │        ▼         suspension point                        │
//! │   ┌────────┐  ┌────────┐  ┌────────┐                     │
//! │   │ fiber  │  │ fiber  │  │ fiber  │   ... dead pool     │
//! │   │ region │  │ region │  │ region │       (recycled)    │
//! │   └────────┘  └────────┘  └────────┘                     │
//! └─────────────────────────────────────────────────────────┘
//!          ▲ cross-thread: posted wakeups, cord on-exit slot
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use weft_fiber::{fiber, Cord, Fiber};
//!
//! fn main() -> anyhow::Result<()> {
//!     let value = Cord::run("main", async {
//!         let worker = Fiber::new("worker", async {
//!             fiber::sleep(Duration::from_millis(50)).await;
//!             Ok(42)
//!         })?;
//!         worker.set_joinable(true);
//!         worker.start();
//!         worker.join().await
//!     })?;
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```
//!
//! # Suspension points
//!
//! A fiber transfers control only at explicit calls: `yield_now`,
//! `sleep`, `yield_timeout`, `join`, `reschedule`, and the cojoin wait.
//! Wakeups append to the tail of the ready queue, so fibers woken during
//! one loop iteration run in FIFO order during the next.
//!
//! # Errors
//!
//! Every fiber carries one diagnostic slot. A fiber's entry future fails
//! by returning an error, which lands in the slot; joining a failed
//! fiber transfers the slot to the joiner, while a non-joinable fiber
//! logs and discards it.

mod config;
mod cord;
mod error;
pub mod fiber;
mod region;
mod trigger;

pub use config::{ConfigError, FiberConfig, STACK_SIZE_DEFAULT, STACK_SIZE_MIN};
pub use cord::{start as cord_start, Cord, CordHandle};
pub use error::FiberError;
pub use fiber::{Fiber, FiberAttr, FIBER_ID_MAX_RESERVED, FIBER_ID_SCHED, FIBER_NAME_MAX};
pub use region::Region;
pub use trigger::{TriggerAction, TriggerId, TriggerList};

/// Result alias for fiber entry futures and join results.
pub type Result<T> = anyhow::Result<T>;
