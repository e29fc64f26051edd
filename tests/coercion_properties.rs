use proptest::prelude::*;
use sbjit::names::NamePool;
use sbjit::value::{js_number_to_string, js_string_to_number, TypedValue};
use serde_json::json;

proptest! {
    #[test]
    fn finite_numbers_round_trip_through_surface_formatting(
        number in proptest::num::f64::POSITIVE
            | proptest::num::f64::NEGATIVE
            | proptest::num::f64::NORMAL
            | proptest::num::f64::SUBNORMAL
            | proptest::num::f64::ZERO
    ) {
        let formatted = js_number_to_string(number);
        let reparsed = js_string_to_number(&formatted);
        if number == 0.0 {
            // Surface formatting collapses -0 to "0".
            prop_assert_eq!(reparsed, 0.0);
        } else {
            prop_assert_eq!(reparsed, number, "formatted as {}", formatted);
        }
    }

    #[test]
    fn string_coercion_never_panics(text in ".{0,64}") {
        let _ = js_string_to_number(&text);
    }

    #[test]
    fn constant_predicates_stay_consistent(text in ".{0,32}") {
        let constant = TypedValue::constant(json!(text));
        if constant.is_always_number() {
            prop_assert!(constant.is_always_number_or_nan());
            prop_assert!(!constant.is_never_number());
        }
        if constant.is_never_number() {
            prop_assert!(!constant.is_always_number_or_nan());
        }
    }

    #[test]
    fn constant_number_emission_is_a_numeric_literal(number in proptest::num::f64::ANY) {
        let constant = TypedValue::constant(json!(number));
        let emitted = constant.as_number();
        if emitted != "-0" {
            let reparsed = js_string_to_number(&emitted);
            prop_assert!(!reparsed.is_nan() || emitted == "NaN", "emitted {}", emitted);
        }
    }

    #[test]
    fn name_pools_never_collide(count in 1usize..200) {
        let mut pool = NamePool::new("a");
        let names = (0..count).map(|_| pool.next()).collect::<Vec<_>>();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        prop_assert_eq!(deduped.len(), names.len());
        prop_assert!(names.iter().all(|name| name.starts_with('a')));
    }
}
