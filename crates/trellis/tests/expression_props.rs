//! Property tests for expression parsing, assignment and evaluation.

use proptest::prelude::*;
use trellis::parser::{BindingType, parse};
use trellis::resources::ResourceRegistry;
use trellis::scope::Scope;
use trellis_core::{LifecycleFlags, ObjectRef, Value};

const RESERVED: &[&str] = &["true", "false", "null", "undefined", "typeof", "void", "in", "of", "this"];

fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-zA-Z0-9_]{0,6}".prop_filter("reserved word", |name| !RESERVED.contains(&name.as_str()))
}

fn primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        (-1.0e6f64..1.0e6).prop_map(Value::Number),
        "[ -~]{0,12}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

proptest! {
    #[test]
    fn test_assign_then_evaluate_reads_back(path in prop::collection::vec(identifier(), 1..4), value in primitive()) {
        let registry = ResourceRegistry::standalone();
        let scope = Scope::create(ObjectRef::new()).unwrap();
        let expression = parse(&path.join("."), BindingType::Expression).unwrap();

        expression.assign(LifecycleFlags::NONE, &scope, &*registry, value.clone()).unwrap();
        let read = expression.evaluate(LifecycleFlags::NONE, &scope, &*registry).unwrap();
        prop_assert!(read.same_value(&value));
    }

    #[test]
    fn test_unparsed_expression_evaluates_the_same(a in -1000i32..1000, b in 1i32..1000, c in any::<bool>()) {
        let registry = ResourceRegistry::standalone();
        let vm = ObjectRef::from_pairs([("a", Value::from(a)), ("b", Value::from(b)), ("c", Value::Bool(c))]);
        let scope = Scope::create(vm).unwrap();
        let source = "c ? a % b + 1 : -(a * 2) / b >= 0 && !c";
        let original = parse(source, BindingType::Expression).unwrap();
        let reparsed = parse(&original.to_string(), BindingType::Expression).unwrap();

        let expected = original.evaluate(LifecycleFlags::NONE, &scope, &*registry).unwrap();
        let actual = reparsed.evaluate(LifecycleFlags::NONE, &scope, &*registry).unwrap();
        prop_assert!(actual.same_value(&expected));
    }
}
