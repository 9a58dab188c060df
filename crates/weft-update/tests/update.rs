// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end update application: scalar operators, structural
//! operators, deep paths, bars and routes, failure modes.

mod common;

use common::{
    arr, assert_well_formed, batch, dbl, int, map, op3, op_splice, region, s, uint, Sel,
};
use weft_update::{apply, check, upsert_apply, Dictionary, IndexBase, UpdateError};

fn dict() -> Dictionary {
    Dictionary::new()
}

#[test]
fn push_with_negative_insert_appends() {
    let tuple = arr(&[uint(1), uint(2), uint(3)]);
    let ops = batch(&[op3("!", Sel::No(-1), s("push1"))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[uint(1), uint(2), uint(3), s("push1")]).as_slice()
    );
}

#[test]
fn deep_path_set_replaces_one_element() {
    // Top-level field "f" is a map {"c": {"f": [4,5,6,7,8]}}.
    let inner = arr(&[uint(4), uint(5), uint(6), uint(7), uint(8)]);
    let tuple = arr(&[
        uint(9),
        map(&[("c", map(&[("f", inner)]))]),
    ]);
    let mut dict = Dictionary::new();
    dict.insert("f", 1);
    let ops = batch(&[op3("=", Sel::Path("f.c.f[1]"), uint(100))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict, IndexBase::One).unwrap();
    let expected = arr(&[
        uint(9),
        map(&[(
            "c",
            map(&[("f", arr(&[uint(100), uint(5), uint(6), uint(7), uint(8)]))]),
        )]),
    ]);
    assert_eq!(result.tuple.as_ref(), expected.as_slice());
}

#[test]
fn double_update_of_the_same_field_fails() {
    let tuple = arr(&[uint(0), uint(0)]);
    let ops = batch(&[
        op3("+", Sel::No(2), uint(10)),
        op3("+", Sel::No(2), uint(5)),
    ]);
    let region = region();
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    match err {
        UpdateError::Field { reason, .. } => assert!(reason.contains("double update")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn integer_overflow_aborts_and_reports() {
    let tuple = arr(&[uint(0), uint(u64::MAX)]);
    let ops = batch(&[op3("+", Sel::No(2), uint(1))]);
    let region = region();
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::IntegerOverflow { op: '+', .. }));
}

#[test]
fn shared_prefix_paths_form_a_route_and_both_land() {
    // Both paths share the prefix [4][4]; the record nests arrays so
    // [4][4][5][3][2] and [4][4][8][3] address two distinct leaves.
    let d1 = arr(&[uint(0), uint(41), uint(0)]);
    let c1 = arr(&[uint(0), uint(0), d1]);
    let c2 = arr(&[uint(0), uint(0), uint(42)]);
    let l2 = arr(&[
        uint(0),
        uint(1),
        uint(2),
        uint(3),
        c1,
        uint(5),
        uint(6),
        c2,
    ]);
    let l1 = arr(&[uint(0), uint(0), uint(0), l2]);
    let tuple = arr(&[uint(0), uint(0), uint(0), l1]);

    let ops = batch(&[
        op3("=", Sel::Path("[4][4][5][3][2]"), uint(11000)),
        op3("=", Sel::Path("[4][4][8][3]"), uint(19000)),
    ]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();

    let d1 = arr(&[uint(0), uint(11000), uint(0)]);
    let c1 = arr(&[uint(0), uint(0), d1]);
    let c2 = arr(&[uint(0), uint(0), uint(19000)]);
    let l2 = arr(&[
        uint(0),
        uint(1),
        uint(2),
        uint(3),
        c1,
        uint(5),
        uint(6),
        c2,
    ]);
    let l1 = arr(&[uint(0), uint(0), uint(0), l2]);
    let expected = arr(&[uint(0), uint(0), uint(0), l1]);
    assert_eq!(result.tuple.as_ref(), expected.as_slice());
    assert_well_formed(&result.tuple);
}

#[test]
fn disjoint_path_updates_commute() {
    let tuple = arr(&[
        arr(&[uint(1), uint(2)]),
        arr(&[uint(3), uint(4)]),
    ]);
    let forward = batch(&[
        op3("=", Sel::Path("[1][1]"), uint(7)),
        op3("=", Sel::Path("[2][1]"), uint(8)),
    ]);
    let backward = batch(&[
        op3("=", Sel::Path("[2][1]"), uint(8)),
        op3("=", Sel::Path("[1][1]"), uint(7)),
    ]);
    let region = region();
    let a = apply(&region, &forward, &tuple, &dict(), IndexBase::One).unwrap();
    let b = apply(&region, &backward, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(a.tuple, b.tuple);
    let expected = arr(&[
        arr(&[uint(7), uint(2)]),
        arr(&[uint(8), uint(4)]),
    ]);
    assert_eq!(a.tuple.as_ref(), expected.as_slice());
}

#[test]
fn empty_batch_reproduces_the_record() {
    let tuple = arr(&[uint(1), s("two"), map(&[("k", uint(3))])]);
    let ops = batch(&[]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(result.tuple.as_ref(), tuple.as_slice());
    assert_eq!(result.column_mask, 0);
}

#[test]
fn field_zero_with_base_one_fails() {
    let tuple = arr(&[uint(1)]);
    let ops = batch(&[op3("=", Sel::No(0), uint(9))]);
    let region = region();
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::NoSuchFieldNo(0)));
}

#[test]
fn assignment_one_past_the_end_appends() {
    let tuple = arr(&[uint(1), uint(2)]);
    let ops = batch(&[op3("=", Sel::No(3), uint(3))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[uint(1), uint(2), uint(3)]).as_slice()
    );
}

#[test]
fn delete_then_insert_at_freed_position_keeps_length() {
    let tuple = arr(&[uint(1), uint(2), uint(3)]);
    let ops = batch(&[
        op3("#", Sel::No(3), uint(1)),
        op3("!", Sel::No(3), s("new")),
    ]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[uint(1), uint(2), s("new")]).as_slice()
    );
}

#[test]
fn delete_count_is_clamped_to_the_tail() {
    let tuple = arr(&[uint(1), uint(2), uint(3), uint(4)]);
    let ops = batch(&[op3("#", Sel::No(2), uint(100))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(result.tuple.as_ref(), arr(&[uint(1)]).as_slice());
}

#[test]
fn arithmetic_promotes_through_double() {
    let tuple = arr(&[uint(10), dbl(1.5)]);
    let ops = batch(&[
        op3("+", Sel::No(1), uint(5)),
        op3("-", Sel::No(2), uint(1)),
    ]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[uint(15), dbl(0.5)]).as_slice()
    );
}

#[test]
fn subtraction_can_go_negative() {
    let tuple = arr(&[uint(3)]);
    let ops = batch(&[op3("-", Sel::No(1), uint(10))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(result.tuple.as_ref(), arr(&[int(-7)]).as_slice());
}

#[test]
fn bitwise_ops_require_unsigned_sources() {
    let tuple = arr(&[uint(0b1100), int(-1)]);
    let ops = batch(&[op3("|", Sel::No(1), uint(0b0011))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[uint(0b1111), int(-1)]).as_slice()
    );

    let ops = batch(&[op3("&", Sel::No(2), uint(1))]);
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::ArgType { op: '&', .. }));
}

#[test]
fn splice_inserts_at_the_end_when_offset_equals_length() {
    let tuple = arr(&[s("hello")]);
    // 1-based offsets: 6 addresses the position right after "hello".
    let ops = batch(&[op_splice(Sel::No(1), 6, 0, "!!")]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(result.tuple.as_ref(), arr(&[s("hello!!")]).as_slice());
}

#[test]
fn splice_negative_offset_counts_from_the_tail() {
    let tuple = arr(&[s("abcdef")]);
    // Offset -3 lands before "ef"; the cut removes both.
    let ops = batch(&[op_splice(Sel::No(1), -3, 2, "XY")]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(result.tuple.as_ref(), arr(&[s("abcdXY")]).as_slice());
}

#[test]
fn splice_out_of_bound_offset_fails() {
    let tuple = arr(&[s("abc")]);
    let ops = batch(&[op_splice(Sel::No(1), -5, 0, "x")]);
    let region = region();
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::Splice { .. }));
}

#[test]
fn map_keys_can_be_assigned_inserted_and_deleted() {
    let tuple = arr(&[map(&[("a", uint(1)), ("b", uint(2))])]);
    let region = region();

    // Assigning a missing key inserts it; the new pair lands before
    // the untouched base entries.
    let ops = batch(&[op3("=", Sel::Path("[1].c"), uint(3))]);
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[map(&[("c", uint(3)), ("a", uint(1)), ("b", uint(2))])]).as_slice()
    );
    let reread = apply(
        &region,
        &batch(&[op3("#", Sel::Path("[1].c"), uint(1))]),
        &result.tuple,
        &dict(),
        IndexBase::One,
    )
    .unwrap();
    assert_eq!(reread.tuple.as_ref(), tuple.as_slice());

    // Deleting an existing key drops the pair.
    let ops = batch(&[op3("#", Sel::Path("[1].a"), uint(1))]);
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[map(&[("b", uint(2))])]).as_slice()
    );

    // Inserting an existing key is a duplicate.
    let ops = batch(&[op3("!", Sel::Path("[1].a"), uint(9))]);
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::Duplicate { .. }));
}

#[test]
fn deep_arithmetic_through_a_bar() {
    let tuple = arr(&[map(&[("counters", arr(&[uint(10), uint(20)]))])]);
    let ops = batch(&[op3("+", Sel::Path("[1].counters[2]"), uint(5))]);
    let region = region();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[map(&[("counters", arr(&[uint(10), uint(25)]))])]).as_slice()
    );
}

#[test]
fn intersected_paths_are_rejected() {
    let tuple = arr(&[arr(&[arr(&[uint(1)])])]);
    let region = region();

    // Same leaf twice.
    let ops = batch(&[
        op3("=", Sel::Path("[1][1]"), uint(5)),
        op3("=", Sel::Path("[1][1]"), uint(6)),
    ]);
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::Field { .. }));

    // One path is a strict prefix of the other.
    let ops = batch(&[
        op3("=", Sel::Path("[1][1]"), uint(5)),
        op3("=", Sel::Path("[1][1][1]"), uint(6)),
    ]);
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::Unsupported(_)));
}

#[test]
fn wildcard_paths_are_rejected() {
    let tuple = arr(&[arr(&[uint(1)])]);
    let ops = batch(&[op3("=", Sel::Path("[1][*]"), uint(5))]);
    let region = region();
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::Unsupported(_)));
}

#[test]
fn check_agrees_with_apply_on_the_mask() {
    let tuple = arr(&[uint(1), uint(2), uint(3)]);
    let ops = batch(&[
        op3("=", Sel::No(1), uint(9)),
        op3("+", Sel::No(3), uint(1)),
    ]);
    let region = region();
    let mask = check(&ops, &dict(), IndexBase::One).unwrap();
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(mask, result.column_mask);
    assert_eq!(mask, (1 << 0) | (1 << 2));
}

#[test]
fn upsert_skips_failing_operations() {
    let tuple = arr(&[s("text"), uint(5)]);
    let ops = batch(&[
        op3("+", Sel::No(1), uint(1)),
        op3("+", Sel::No(2), uint(10)),
    ]);
    let region = region();
    // Plain apply aborts on the type error.
    assert!(apply(&region, &ops, &tuple, &dict(), IndexBase::One).is_err());
    // Upsert skips the bad operation and applies the good one.
    let result = upsert_apply(&region, &ops, &tuple, &dict(), IndexBase::One, true).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[s("text"), uint(15)]).as_slice()
    );
}

#[test]
fn deep_insert_and_delete_through_bars() {
    let tuple = arr(&[arr(&[uint(1), uint(2), uint(3)])]);
    let region = region();

    let ops = batch(&[op3("!", Sel::Path("[1][2]"), s("mid"))]);
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(
        result.tuple.as_ref(),
        arr(&[arr(&[uint(1), s("mid"), uint(2), uint(3)])]).as_slice()
    );

    let ops = batch(&[op3("#", Sel::Path("[1][2]"), uint(2))]);
    let result = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap();
    assert_eq!(result.tuple.as_ref(), arr(&[arr(&[uint(1)])]).as_slice());
}

#[test]
fn update_runs_inside_a_fiber_on_its_region() {
    weft_fiber::Cord::run("test", async {
        let tuple = arr(&[uint(1), uint(2)]);
        let ops = batch(&[op3("+", Sel::No(2), uint(40))]);
        let region = weft_fiber::fiber::region();
        let result = apply(&region, &ops, &tuple, &Dictionary::new(), IndexBase::One)?;
        assert_eq!(result.tuple.as_ref(), arr(&[uint(1), uint(42)]).as_slice());
        // The output buffer came from this fiber's region.
        assert!(region.peak() >= result.tuple.len());
        Ok(0)
    })
    .unwrap();
}

#[test]
fn malformed_batches_fail_decode() {
    let tuple = arr(&[uint(1)]);
    let region = region();
    let err = apply(&region, &uint(5), &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::IllegalParams(_)));

    let ops = batch(&[arr(&[])]);
    let err = apply(&region, &ops, &tuple, &dict(), IndexBase::One).unwrap_err();
    assert!(matches!(err, UpdateError::IllegalParams(_)));
}
