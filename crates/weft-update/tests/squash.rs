// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upsert squash: merging two sorted `=`/`+`/`-` batches into one.

mod common;

use common::{arr, batch, op3, region, s, uint, Sel};
use weft_update::{apply, upsert_squash, Dictionary, IndexBase};

fn dict() -> Dictionary {
    Dictionary::new()
}

/// Applying the squashed batch must equal applying both in sequence.
fn assert_equivalent(ops1: &[u8], ops2: &[u8], tuple: &[u8], index_base: IndexBase) {
    let region = region();
    let squashed = upsert_squash(&region, ops1, ops2, &dict(), index_base)
        .unwrap()
        .expect("batches should squash");
    let sequential = {
        let step = apply(&region, ops1, tuple, &dict(), index_base).unwrap();
        apply(&region, ops2, &step.tuple, &dict(), index_base).unwrap()
    };
    let merged = apply(&region, &squashed, tuple, &dict(), index_base).unwrap();
    assert_eq!(merged.tuple, sequential.tuple);
}

#[test]
fn arithmetic_batches_fold() {
    let tuple = arr(&[uint(100), uint(200), uint(300), uint(400)]);
    let ops1 = batch(&[
        op3("+", Sel::No(0), uint(5)),
        op3("+", Sel::No(2), uint(7)),
    ]);
    let ops2 = batch(&[
        op3("+", Sel::No(0), uint(3)),
        op3("-", Sel::No(3), uint(1)),
    ]);
    assert_equivalent(&ops1, &ops2, &tuple, IndexBase::Zero);
}

#[test]
fn second_assignment_overrides_the_first_operation() {
    let tuple = arr(&[uint(10), uint(20)]);
    let ops1 = batch(&[op3("+", Sel::No(0), uint(5))]);
    let ops2 = batch(&[op3("=", Sel::No(0), uint(99))]);
    assert_equivalent(&ops1, &ops2, &tuple, IndexBase::Zero);
}

#[test]
fn subtraction_folds_through_inversion() {
    let tuple = arr(&[uint(50)]);
    let ops1 = batch(&[op3("-", Sel::No(0), uint(5))]);
    let ops2 = batch(&[op3("+", Sel::No(0), uint(3))]);
    let region = region();
    let squashed = upsert_squash(&region, &ops1, &ops2, &dict(), IndexBase::Zero)
        .unwrap()
        .unwrap();
    let result = apply(&region, &squashed, &tuple, &dict(), IndexBase::Zero).unwrap();
    assert_eq!(result.tuple.as_ref(), arr(&[uint(48)]).as_slice());
}

#[test]
fn assignment_folds_with_following_arithmetic() {
    let tuple = arr(&[uint(1)]);
    let ops1 = batch(&[op3("=", Sel::No(0), uint(10))]);
    let ops2 = batch(&[op3("+", Sel::No(0), uint(7))]);
    assert_equivalent(&ops1, &ops2, &tuple, IndexBase::Zero);
}

#[test]
fn squash_with_an_empty_batch_is_identity() {
    let tuple = arr(&[uint(1), uint(2)]);
    let ops = batch(&[
        op3("+", Sel::No(0), uint(5)),
        op3("=", Sel::No(1), uint(9)),
    ]);
    let empty = batch(&[]);
    let region = region();
    let squashed = upsert_squash(&region, &ops, &empty, &dict(), IndexBase::Zero)
        .unwrap()
        .unwrap();
    // Identical modulo the wire encoding of the array header.
    assert_eq!(squashed.as_ref(), ops.as_slice());
    let squashed = upsert_squash(&region, &empty, &ops, &dict(), IndexBase::Zero)
        .unwrap()
        .unwrap();
    assert_eq!(squashed.as_ref(), ops.as_slice());
}

#[test]
fn non_arithmetic_opcodes_are_not_squashable() {
    let region = region();
    let ops1 = batch(&[op3("!", Sel::No(0), s("x"))]);
    let ops2 = batch(&[op3("+", Sel::No(1), uint(1))]);
    assert!(upsert_squash(&region, &ops1, &ops2, &dict(), IndexBase::Zero)
        .unwrap()
        .is_none());
}

#[test]
fn unsorted_fields_are_not_squashable() {
    let region = region();
    let ops1 = batch(&[
        op3("+", Sel::No(2), uint(1)),
        op3("+", Sel::No(0), uint(1)),
    ]);
    let ops2 = batch(&[]);
    assert!(upsert_squash(&region, &ops1, &ops2, &dict(), IndexBase::Zero)
        .unwrap()
        .is_none());
}

#[test]
fn path_operations_are_not_squashable() {
    let region = region();
    let ops1 = batch(&[op3("=", Sel::Path("[1][2]"), uint(1))]);
    let ops2 = batch(&[]);
    assert!(upsert_squash(&region, &ops1, &ops2, &dict(), IndexBase::Zero)
        .unwrap()
        .is_none());
}

#[test]
fn one_based_batches_re_emit_with_their_base() {
    let tuple = arr(&[uint(1), uint(2), uint(3)]);
    let ops1 = batch(&[op3("+", Sel::No(2), uint(5))]);
    let ops2 = batch(&[op3("+", Sel::No(2), uint(7))]);
    assert_equivalent(&ops1, &ops2, &tuple, IndexBase::One);
}

#[test]
fn folding_overflow_falls_back_to_sequential() {
    let region = region();
    let ops1 = batch(&[op3("+", Sel::No(0), uint(u64::MAX))]);
    let ops2 = batch(&[op3("+", Sel::No(0), uint(u64::MAX))]);
    assert!(upsert_squash(&region, &ops1, &ops2, &dict(), IndexBase::Zero)
        .unwrap()
        .is_none());
}
