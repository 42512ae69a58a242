use super::*;
use proptest::prelude::*;

#[test]
fn int_and_float_compare_numerically() {
    assert_eq!(Value::Int(3).total_cmp(&Value::Float(3.0)), Ordering::Equal);
    assert_eq!(Value::Int(3).total_cmp(&Value::Float(3.5)), Ordering::Less);
    assert_eq!(
        Value::Float(4.5).total_cmp(&Value::Int(4)),
        Ordering::Greater
    );
}

#[test]
fn cross_kind_ordering_is_by_rank() {
    assert!(Value::Null < Value::Bool(false));
    assert!(Value::Bool(true) < Value::Int(i64::MIN));
    assert!(Value::Int(i64::MAX) < Value::Text(String::new()));
}

#[test]
fn enum_conformance_checks_variant_membership() {
    let status = AttributeKind::Enum {
        variants: vec!["READY".to_string(), "DELIVERED".to_string()],
    };

    assert!(Value::Text("READY".to_string()).conforms_to(&status));
    assert!(!Value::Text("LOST".to_string()).conforms_to(&status));
    assert!(Value::Null.conforms_to(&status));
}

#[test]
fn int_literals_fit_float_columns() {
    assert!(Value::Int(7).conforms_to(&AttributeKind::Float));
    assert!(!Value::Float(7.0).conforms_to(&AttributeKind::Int));
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

proptest! {
    #[test]
    fn ordering_is_total_and_antisymmetric(a in arb_value(), b in arb_value()) {
        let ab = a.total_cmp(&b);
        let ba = b.total_cmp(&a);
        prop_assert_eq!(ab, ba.reverse());
    }

    #[test]
    fn ordering_is_transitive(a in arb_value(), b in arb_value(), c in arb_value()) {
        let mut sorted = vec![a, b, c];
        sorted.sort();
        prop_assert!(sorted[0] <= sorted[1] && sorted[1] <= sorted[2]);
        prop_assert!(sorted[0] <= sorted[2]);
    }
}
