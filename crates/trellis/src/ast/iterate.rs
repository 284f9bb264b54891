//! Iteration over for-of sources.
//!
//! Which values can be iterated and how is decided by a table keyed on the
//! value's type tag, so `for item of source` works uniformly over arrays,
//! maps, sets, plain counts and absent sources.

use trellis_core::{ArrayRef, LifecycleFlags, Value, ValueTag};

use super::Expression;
use crate::error::{Error, Result};
use crate::resources::ServiceLocator;
use crate::scope::Scope;

/// How a for-of statement walks one kind of value.
#[derive(Clone, Copy)]
pub struct IterationStrategy {
    /// Number of iterations the value produces.
    pub count: fn(&Value) -> usize,
    /// Call the visitor with each item and its index.
    pub iterate: fn(&Value, &mut dyn FnMut(Value, usize)),
}

/// Iteration strategies by value tag. Tags without an entry are not
/// iterable.
pub static ITERATION_STRATEGIES: &[(ValueTag, IterationStrategy)] = &[
    (
        ValueTag::Array,
        IterationStrategy {
            count: |v| v.as_array().map_or(0, ArrayRef::len),
            iterate: |v, visit| {
                if let Some(array) = v.as_array() {
                    for (i, item) in array.to_vec().into_iter().enumerate() {
                        visit(item, i);
                    }
                }
            },
        },
    ),
    (
        ValueTag::Map,
        IterationStrategy {
            count: |v| match v {
                Value::Map(map) => map.size(),
                _ => 0,
            },
            iterate: |v, visit| {
                if let Value::Map(map) = v {
                    for (i, (key, value)) in map.entries().into_iter().enumerate() {
                        visit(Value::Array(ArrayRef::from(vec![key, value])), i);
                    }
                }
            },
        },
    ),
    (
        ValueTag::Set,
        IterationStrategy {
            count: |v| match v {
                Value::Set(set) => set.size(),
                _ => 0,
            },
            iterate: |v, visit| {
                if let Value::Set(set) = v {
                    for (i, item) in set.values().into_iter().enumerate() {
                        visit(item, i);
                    }
                }
            },
        },
    ),
    (
        ValueTag::Number,
        IterationStrategy {
            count: number_count,
            iterate: |v, visit| {
                for i in 0..number_count(v) {
                    visit(Value::from(i), i);
                }
            },
        },
    ),
    (
        ValueTag::Null,
        IterationStrategy {
            count: |_| 0,
            iterate: |_, _| {},
        },
    ),
    (
        ValueTag::Undefined,
        IterationStrategy {
            count: |_| 0,
            iterate: |_, _| {},
        },
    ),
];

fn number_count(value: &Value) -> usize {
    let n = value.to_number();
    if n.is_finite() && n > 0.0 { n.trunc() as usize } else { 0 }
}

impl IterationStrategy {
    /// The strategy for `value`.
    pub fn for_value(value: &Value) -> Result<IterationStrategy> {
        let tag = value.tag();
        ITERATION_STRATEGIES
            .iter()
            .find(|(candidate, _)| *candidate == tag)
            .map(|(_, strategy)| *strategy)
            .ok_or(Error::NotIterable(tag.name()))
    }
}

impl Expression {
    /// Number of items a for-of statement produces over `iterable`, the
    /// result of evaluating it.
    pub fn count(&self, iterable: &Value) -> Result<usize> {
        let strategy = IterationStrategy::for_value(iterable)?;
        Ok((strategy.count)(iterable))
    }

    /// Visit each item a for-of statement produces over `iterable`.
    pub fn iterate(&self, iterable: &Value, visit: &mut dyn FnMut(Value, usize)) -> Result<()> {
        let strategy = IterationStrategy::for_value(iterable)?;
        (strategy.iterate)(iterable, visit);
        Ok(())
    }

    /// Bind one item to the declaration of a for-of statement, writing the
    /// declared names into `scope`'s locals.
    pub fn declare(&self, flags: LifecycleFlags, scope: &Scope, locator: &dyn ServiceLocator, item: Value) -> Result<()> {
        let declaration: &Expression = match self {
            Self::ForOfStatement { declaration, .. } => declaration,
            other => other,
        };
        declaration.assign(flags, scope, locator, item)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{MapRef, SetRef};

    fn collect(value: &Value) -> Vec<(String, usize)> {
        let strategy = IterationStrategy::for_value(value).unwrap();
        let mut seen = Vec::new();
        (strategy.iterate)(value, &mut |item, i| seen.push((item.to_display_string(), i)));
        assert_eq!((strategy.count)(value), seen.len());
        seen
    }

    #[test]
    fn test_iterate_array_and_number() {
        let array = Value::Array(ArrayRef::from(vec![Value::from("a"), Value::from("b")]));
        assert_eq!(collect(&array), vec![("a".into(), 0), ("b".into(), 1)]);
        assert_eq!(collect(&Value::from(3)), vec![("0".into(), 0), ("1".into(), 1), ("2".into(), 2)]);
    }

    #[test]
    fn test_iterate_map_yields_pairs() {
        let map = Value::Map(MapRef::from_pairs([(Value::from("k"), Value::from(1))]));
        assert_eq!(collect(&map), vec![("k,1".into(), 0)]);
        let set = Value::Set(SetRef::from_values([Value::from(7)]));
        assert_eq!(collect(&set), vec![("7".into(), 0)]);
    }

    #[test]
    fn test_nullish_iterates_zero_times() {
        assert!(collect(&Value::Null).is_empty());
        assert!(collect(&Value::Undefined).is_empty());
    }

    #[test]
    fn test_for_of_declares_destructured_pairs() {
        let registry = crate::resources::ResourceRegistry::standalone();
        let statement = crate::parser::parse("[key, value] of entries", crate::parser::BindingType::Iterator).unwrap();
        let map = MapRef::from_pairs([(Value::from("a"), Value::from(1)), (Value::from("b"), Value::from(2))]);
        let vm = trellis_core::ObjectRef::from_pairs([("entries", Value::Map(map))]);
        let scope = Scope::create(vm).unwrap();

        let iterable = statement.evaluate(LifecycleFlags::NONE, &scope, &*registry).unwrap();
        assert_eq!(statement.count(&iterable).unwrap(), 2);

        let mut items = Vec::new();
        statement.iterate(&iterable, &mut |item, _| items.push(item)).unwrap();
        statement
            .declare(LifecycleFlags::NONE, &scope, &*registry, items[1].clone())
            .unwrap();
        let locals = scope.override_context().locals();
        assert_eq!(locals.get("key"), Value::from("b"));
        assert_eq!(locals.get("value"), Value::from(2));
    }

    #[test]
    fn test_other_values_are_not_iterable() {
        assert_eq!(
            IterationStrategy::for_value(&Value::Bool(true)).err(),
            Some(Error::NotIterable("boolean"))
        );
    }
}
