// Property-based tests for resolver invariants.
//
// Three categories:
// 1. Constant folding: integer and mixed arithmetic agree with Rust's own,
//    and generated constant chains fold through the full pipeline
// 2. Size broadcasting: num_parallel_streams laws
// 3. Data-size reconciliation: sticky conflicts and neutral observations
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use strc::ast::{Literal, Operator};
use strc::connect::ConnectorTable;
use strc::const_fold::reduce_const_expression;
use strc::pass::PassId;
use strc::pipeline::compile;
use strc::registry::Registry;
use strc::size::{num_parallel_streams, reconcile_data_size, Size};

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn arb_size() -> impl Strategy<Value = Size> {
    prop_oneof![
        4 => (1u32..=64).prop_map(Size::Known),
        1 => Just(Size::Unresolved),
        1 => Just(Size::Deferred),
    ]
}

// ── Constant folding ────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn int_arithmetic_matches_native(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        use Literal::Int;
        prop_assert_eq!(reduce_const_expression(Operator::Add, &Int(a), Some(&Int(b))), Some(Int(a + b)));
        prop_assert_eq!(reduce_const_expression(Operator::Sub, &Int(a), Some(&Int(b))), Some(Int(a - b)));
        prop_assert_eq!(reduce_const_expression(Operator::Mul, &Int(a), Some(&Int(b))), Some(Int(a * b)));
        let div = reduce_const_expression(Operator::Div, &Int(a), Some(&Int(b)));
        if b == 0 {
            prop_assert_eq!(div, None);
        } else {
            prop_assert_eq!(div, Some(Int(a / b)));
        }
    }

    #[test]
    fn any_real_operand_promotes(a in -1000i64..1000, b in -1000.0f64..1000.0) {
        let result = reduce_const_expression(Operator::Add, &Literal::Int(a), Some(&Literal::Real(b)));
        prop_assert_eq!(result, Some(Literal::Real(a as f64 + b)));
        let result = reduce_const_expression(Operator::Mul, &Literal::Real(b), Some(&Literal::Int(a)));
        prop_assert_eq!(result, Some(Literal::Real(b * a as f64)));
    }

    #[test]
    fn bitwise_ops_are_integer_only(a in 0i64..1024, b in -100.0f64..100.0) {
        prop_assert_eq!(
            reduce_const_expression(Operator::And, &Literal::Int(a), Some(&Literal::Real(b))),
            None
        );
        prop_assert_eq!(
            reduce_const_expression(Operator::Not, &Literal::Int(a), None),
            Some(Literal::Int(!a))
        );
    }

    #[test]
    fn constant_chains_fold_through_pipeline(
        start in 0i64..100,
        steps in prop::collection::vec(1i64..10, 1..6),
    ) {
        let mut source = format!("constant C0 {{ value: {start} }}\n");
        let mut expected = start;
        for (i, step) in steps.iter().enumerate() {
            source.push_str(&format!("constant C{} {{ value: C{} + {} }}\n", i + 1, i, step));
            expected += step;
        }
        let state = compile(&source, Registry::new(), ConnectorTable::new(), PassId::Fold).unwrap();
        let tree = &state.tree;
        let last = format!("C{}", steps.len());
        let decl = tree.declarations().find(|&d| tree.decl_name(d) == Some(last.as_str())).unwrap();
        let value = tree.property(decl, "value").unwrap();
        prop_assert_eq!(tree.literal(value), Some(&Literal::Int(expected)));
    }
}

// ── Size broadcasting ───────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn parallel_streams_is_symmetric(a in arb_size(), b in arb_size()) {
        prop_assert_eq!(num_parallel_streams(a, b), num_parallel_streams(b, a));
    }

    #[test]
    fn one_broadcasts(n in 1u32..=256) {
        prop_assert_eq!(num_parallel_streams(Size::Known(1), Size::Known(n)), Size::Known(n));
        prop_assert_eq!(num_parallel_streams(Size::Known(n), Size::Known(1)), Size::Known(n));
    }

    #[test]
    fn divisible_sizes_give_quotient(n in 1u32..=32, k in 2u32..=8) {
        prop_assert_eq!(num_parallel_streams(Size::Known(n * k), Size::Known(n)), Size::Known(k));
    }

    #[test]
    fn non_known_sizes_never_resolve(a in arb_size()) {
        prop_assert_eq!(num_parallel_streams(a, Size::Unresolved), Size::Unresolved);
        prop_assert_eq!(num_parallel_streams(Size::Deferred, a), Size::Unresolved);
    }
}

// ── Data-size reconciliation ────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn unresolved_is_sticky(observations in prop::collection::vec(arb_size(), 0..8)) {
        let folded = observations.into_iter().fold(Size::Unresolved, reconcile_data_size);
        prop_assert_eq!(folded, Size::Unresolved);
    }

    #[test]
    fn ones_and_unknowns_are_neutral(current in arb_size()) {
        prop_assert_eq!(reconcile_data_size(current, Size::Known(1)), current);
        prop_assert_eq!(reconcile_data_size(current, Size::Deferred), current);
    }

    #[test]
    fn agreeing_observations_keep_size(n in 2u32..=64, repeats in 1usize..6) {
        let folded = std::iter::repeat(Size::Known(n))
            .take(repeats)
            .fold(Size::Known(1), reconcile_data_size);
        prop_assert_eq!(folded, Size::Known(n));
    }
}
