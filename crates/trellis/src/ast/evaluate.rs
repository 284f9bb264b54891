use std::cmp::Ordering;

use trellis_core::{
    ArrayRef, CollectionRef, Connectable, LifecycleFlags, ObjectRef, Value, format_number,
};

use super::builtins::call_builtin;
use super::{BinaryOperator, BinaryStrategy, Expression, ExpressionRef, UnaryOperator};
use crate::error::{Error, Result};
use crate::resources::{BehaviorTarget, ServiceLocator, ServiceLocatorExt};
use crate::scope::{BindingContext, Scope};

impl Expression {
    /// Compute the value of the expression.
    ///
    /// Calling something that is not a function is an error when the callee
    /// exists, or when `flags` contains
    /// [`MUST_EVALUATE`](LifecycleFlags::MUST_EVALUATE); otherwise a missing
    /// callee yields `undefined`.
    pub fn evaluate(&self, flags: LifecycleFlags, scope: &Scope, locator: &dyn ServiceLocator) -> Result<Value> {
        match self {
            Self::AccessThis { ancestor } => Ok(BindingContext::ancestor(scope.override_context(), *ancestor)
                .map_or(Value::Undefined, |context| context.binding_context().clone())),

            Self::AccessScope { name, ancestor } => {
                let context = BindingContext::get(flags, scope, name, *ancestor);
                Ok(get_property(&context, name))
            }

            Self::AccessMember { object, name } => {
                let instance = object.evaluate(flags, scope, locator)?;
                Ok(get_property(&instance, name))
            }

            Self::AccessKeyed { object, key } => {
                let instance = object.evaluate(flags, scope, locator)?;
                if instance.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = key.evaluate(flags, scope, locator)?;
                Ok(get_keyed(&instance, &key))
            }

            Self::CallScope { name, args, ancestor } => {
                let args = evaluate_list(args, flags, scope, locator)?;
                let context = BindingContext::get(flags, scope, name, *ancestor);
                call_method(flags, &context, name, &args)
            }

            Self::CallMember { object, name, args } => {
                let instance = object.evaluate(flags, scope, locator)?;
                let args = evaluate_list(args, flags, scope, locator)?;
                call_method(flags, &instance, name, &args)
            }

            Self::CallFunction { func, args } => {
                let callee = func.evaluate(flags, scope, locator)?;
                let args = evaluate_list(args, flags, scope, locator)?;
                match callee {
                    Value::Function(f) => Ok(f.call(&Value::Undefined, &args)?),
                    v if v.is_nullish() && !flags.contains(LifecycleFlags::MUST_EVALUATE) => Ok(Value::Undefined),
                    _ => Err(Error::not_a_function(func.to_string())),
                }
            }

            Self::Binary(binary) => {
                let left = binary.left.evaluate(flags, scope, locator)?;
                match binary.strategy {
                    BinaryStrategy::And if !left.is_truthy() => Ok(left),
                    BinaryStrategy::Or if left.is_truthy() => Ok(left),
                    BinaryStrategy::And | BinaryStrategy::Or => binary.right.evaluate(flags, scope, locator),
                    BinaryStrategy::Eager(apply) => {
                        let right = binary.right.evaluate(flags, scope, locator)?;
                        Ok(apply(&left, &right))
                    }
                }
            }

            Self::Unary(unary) => {
                let value = unary.expression.evaluate(flags, scope, locator)?;
                Ok((unary.apply)(&value))
            }

            Self::PrimitiveLiteral(literal) => Ok(literal.to_value()),

            Self::ArrayLiteral { elements } => {
                let items = evaluate_list(elements, flags, scope, locator)?;
                Ok(Value::Array(ArrayRef::from(items)))
            }

            Self::ObjectLiteral { keys, values } => {
                let obj = ObjectRef::new();
                for (key, value) in keys.iter().zip(values) {
                    obj.set(key, value.evaluate(flags, scope, locator)?);
                }
                Ok(Value::Object(obj))
            }

            Self::Template { cooked, expressions } => {
                let mut result = String::new();
                for (i, part) in cooked.iter().enumerate() {
                    result.push_str(part);
                    if let Some(expression) = expressions.get(i) {
                        result.push_str(&expression.evaluate(flags, scope, locator)?.to_display_string());
                    }
                }
                Ok(Value::from(result))
            }

            Self::TaggedTemplate { cooked, func, expressions } => {
                let callee = func.evaluate(flags, scope, locator)?;
                let strings: ArrayRef = cooked.iter().map(|s| Value::from(&**s)).collect();
                let mut args = vec![Value::Array(strings)];
                args.extend(evaluate_list(expressions, flags, scope, locator)?);
                match callee {
                    Value::Function(f) => Ok(f.call(&Value::Undefined, &args)?),
                    v if v.is_nullish() && !flags.contains(LifecycleFlags::MUST_EVALUATE) => Ok(Value::Undefined),
                    _ => Err(Error::not_a_function(func.to_string())),
                }
            }

            Self::Conditional { condition, yes, no } => {
                if condition.evaluate(flags, scope, locator)?.is_truthy() {
                    yes.evaluate(flags, scope, locator)
                } else {
                    no.evaluate(flags, scope, locator)
                }
            }

            Self::Assign { target, value } => {
                let value = value.evaluate(flags, scope, locator)?;
                target.assign(flags, scope, locator, value)
            }

            Self::ValueConverter { expression, name, args } => {
                let converter = locator.value_converter(name)?;
                let value = expression.evaluate(flags, scope, locator)?;
                let args = evaluate_list(args, flags, scope, locator)?;
                converter.to_view(value, &args)
            }

            Self::BindingBehavior { expression, .. } => expression.evaluate(flags, scope, locator),

            Self::BindingIdentifier { name } => Ok(Value::from(&**name)),

            Self::ArrayBindingPattern { .. } => Ok(Value::Undefined),

            Self::ForOfStatement { iterable, .. } => iterable.evaluate(flags, scope, locator),

            Self::Interpolation { parts, expressions } => {
                let mut result = String::new();
                for (i, part) in parts.iter().enumerate() {
                    result.push_str(part);
                    if let Some(expression) = expressions.get(i) {
                        let value = expression.evaluate(flags, scope, locator)?;
                        if !value.is_nullish() {
                            result.push_str(&value.to_display_string());
                        }
                    }
                }
                Ok(Value::from(result))
            }
        }
    }

    /// Write `value` through the expression. Returns the written value, or
    /// `undefined` when the node is not assignable.
    pub fn assign(&self, flags: LifecycleFlags, scope: &Scope, locator: &dyn ServiceLocator, value: Value) -> Result<Value> {
        match self {
            Self::AccessScope { name, ancestor } => {
                let context = BindingContext::get(flags, scope, name, *ancestor);
                set_property(&context, name, value.clone(), flags)?;
                Ok(value)
            }

            Self::AccessMember { object, name } => {
                let mut instance = object.evaluate(flags, scope, locator)?;
                if !instance.is_object_like() {
                    // Writing through a missing intermediate object creates it.
                    instance = Value::Object(ObjectRef::new());
                    object.assign(flags, scope, locator, instance.clone())?;
                }
                set_property(&instance, name, value.clone(), flags)?;
                Ok(value)
            }

            Self::AccessKeyed { object, key } => {
                let instance = object.evaluate(flags, scope, locator)?;
                let key = key.evaluate(flags, scope, locator)?;
                set_keyed(&instance, &key, value.clone(), flags)?;
                Ok(value)
            }

            Self::Assign { target, value: source } => {
                source.assign(flags, scope, locator, value.clone())?;
                target.assign(flags, scope, locator, value)
            }

            Self::ValueConverter { expression, name, args } => {
                let converter = locator.value_converter(name)?;
                let args = evaluate_list(args, flags, scope, locator)?;
                let converted = converter.from_view(value, &args)?;
                expression.assign(flags, scope, locator, converted)
            }

            Self::BindingBehavior { expression, .. } => expression.assign(flags, scope, locator, value),

            Self::BindingIdentifier { name } => {
                scope
                    .override_context()
                    .locals()
                    .set_with_flags(name, value.clone(), flags);
                Ok(value)
            }

            Self::ArrayBindingPattern { elements } => {
                for (i, element) in elements.iter().enumerate() {
                    element.assign(flags, scope, locator, get_keyed(&value, &Value::from(i)))?;
                }
                Ok(value)
            }

            _ => Ok(Value::Undefined),
        }
    }

    /// Report every observable the expression currently depends on.
    ///
    /// Only the branch actually taken by `&&`, `||` and `?:` is connected,
    /// so reconnecting after each change tracks conditional dependencies.
    pub fn connect(
        &self,
        flags: LifecycleFlags,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        binding: &dyn Connectable,
    ) -> Result<()> {
        match self {
            Self::AccessScope { name, ancestor } => {
                let context = BindingContext::get(flags, scope, name, *ancestor);
                observe_member(binding, flags, &context, name);
            }

            Self::AccessMember { object, name } => {
                let instance = object.evaluate(flags, scope, locator)?;
                object.connect(flags, scope, locator, binding)?;
                observe_member(binding, flags, &instance, name);
            }

            Self::AccessKeyed { object, key } => {
                let instance = object.evaluate(flags, scope, locator)?;
                object.connect(flags, scope, locator, binding)?;
                if instance.is_object_like() {
                    key.connect(flags, scope, locator, binding)?;
                    let key = key.evaluate(flags, scope, locator)?;
                    match &instance {
                        // Arrays report element changes through collection
                        // observation, not per index.
                        Value::Array(_) if array_index(&key).is_some() => observe_collection(binding, flags, &instance),
                        Value::Map(_) => observe_collection(binding, flags, &instance),
                        _ => observe_member(binding, flags, &instance, &key.to_display_string()),
                    }
                }
            }

            Self::CallScope { args, .. } => connect_list(args, flags, scope, locator, binding)?,

            Self::CallMember { object, args, .. } => {
                let instance = object.evaluate(flags, scope, locator)?;
                object.connect(flags, scope, locator, binding)?;
                observe_collection(binding, flags, &instance);
                connect_list(args, flags, scope, locator, binding)?;
            }

            Self::CallFunction { func, args } => {
                func.connect(flags, scope, locator, binding)?;
                connect_list(args, flags, scope, locator, binding)?;
            }

            Self::Binary(binary) => {
                binary.left.connect(flags, scope, locator, binding)?;
                let take_right = match binary.strategy {
                    BinaryStrategy::And => binary.left.evaluate(flags, scope, locator)?.is_truthy(),
                    BinaryStrategy::Or => !binary.left.evaluate(flags, scope, locator)?.is_truthy(),
                    BinaryStrategy::Eager(_) => true,
                };
                if take_right {
                    binary.right.connect(flags, scope, locator, binding)?;
                }
            }

            Self::Unary(unary) => unary.expression.connect(flags, scope, locator, binding)?,

            Self::ArrayLiteral { elements } => connect_list(elements, flags, scope, locator, binding)?,
            Self::ObjectLiteral { values, .. } => connect_list(values, flags, scope, locator, binding)?,
            Self::Template { expressions, .. } | Self::Interpolation { expressions, .. } => {
                connect_list(expressions, flags, scope, locator, binding)?
            }
            Self::TaggedTemplate { func, expressions, .. } => {
                func.connect(flags, scope, locator, binding)?;
                connect_list(expressions, flags, scope, locator, binding)?;
            }

            Self::Conditional { condition, yes, no } => {
                condition.connect(flags, scope, locator, binding)?;
                if condition.evaluate(flags, scope, locator)?.is_truthy() {
                    yes.connect(flags, scope, locator, binding)?;
                } else {
                    no.connect(flags, scope, locator, binding)?;
                }
            }

            Self::ValueConverter { expression, name, args } => {
                expression.connect(flags, scope, locator, binding)?;
                connect_list(args, flags, scope, locator, binding)?;
                let converter = locator.value_converter(name)?;
                for signal in converter.signals() {
                    binding.observe_signal(&signal);
                }
            }

            Self::BindingBehavior { expression, .. } => expression.connect(flags, scope, locator, binding)?,

            Self::ForOfStatement { iterable, .. } => {
                iterable.connect(flags, scope, locator, binding)?;
                let value = iterable.evaluate(flags, scope, locator)?;
                observe_collection(binding, flags, &value);
            }

            Self::AccessThis { .. }
            | Self::PrimitiveLiteral(_)
            | Self::Assign { .. }
            | Self::BindingIdentifier { .. }
            | Self::ArrayBindingPattern { .. } => {}
        }
        Ok(())
    }

    /// Apply binding behaviors to `binding`, innermost first.
    ///
    /// Fails if a behavior is not registered or is already applied to the
    /// binding.
    pub fn bind(
        &self,
        flags: LifecycleFlags,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        binding: &dyn BehaviorTarget,
    ) -> Result<()> {
        let Self::BindingBehavior { expression, name, args } = self else {
            return Ok(());
        };
        if expression.has_bind() {
            expression.bind(flags, scope, locator, binding)?;
        }
        let behavior = locator.binding_behavior(name)?;
        if binding.applied_behavior(name).is_some() {
            return Err(Error::BehaviorAlreadyApplied(name.to_string()));
        }
        let args = evaluate_list(args, flags, scope, locator)?;
        binding.set_applied_behavior(name, Some(behavior.clone()));
        behavior.bind(flags, scope, binding, &args)
    }

    /// Remove the behaviors applied by [`bind`](Self::bind), outermost first.
    pub fn unbind(&self, flags: LifecycleFlags, scope: &Scope, binding: &dyn BehaviorTarget) {
        let Self::BindingBehavior { expression, name, .. } = self else {
            return;
        };
        if let Some(behavior) = binding.applied_behavior(name) {
            behavior.unbind(flags, scope, binding);
            binding.set_applied_behavior(name, None);
        }
        if expression.has_bind() {
            expression.unbind(flags, scope, binding);
        }
    }
}

fn evaluate_list(
    list: &[ExpressionRef],
    flags: LifecycleFlags,
    scope: &Scope,
    locator: &dyn ServiceLocator,
) -> Result<Vec<Value>> {
    list.iter().map(|e| e.evaluate(flags, scope, locator)).collect()
}

fn connect_list(
    list: &[ExpressionRef],
    flags: LifecycleFlags,
    scope: &Scope,
    locator: &dyn ServiceLocator,
    binding: &dyn Connectable,
) -> Result<()> {
    list.iter().try_for_each(|e| e.connect(flags, scope, locator, binding))
}

fn observe_member(binding: &dyn Connectable, flags: LifecycleFlags, target: &Value, name: &str) {
    let observable = match target {
        Value::Object(_) => true,
        Value::Array(_) => name == "length",
        Value::Map(_) | Value::Set(_) => name == "size",
        _ => false,
    };
    if observable {
        binding.observe_property(flags, target, name);
    }
}

fn observe_collection(binding: &dyn Connectable, flags: LifecycleFlags, target: &Value) {
    if let Some(collection) = CollectionRef::from_value(target) {
        binding.observe_collection(flags, &collection);
    }
}

fn call_method(flags: LifecycleFlags, target: &Value, name: &str, args: &[Value]) -> Result<Value> {
    let member = get_property(target, name);
    match member {
        Value::Function(f) => return Ok(f.call(target, args)?),
        Value::Undefined => {}
        _ => return Err(Error::not_a_function(name)),
    }
    if let Some(result) = call_builtin(target, name, args) {
        return result;
    }
    if flags.contains(LifecycleFlags::MUST_EVALUATE) {
        return Err(Error::not_a_function(name));
    }
    Ok(Value::Undefined)
}

/// Read `name` from a value. Non-objects only expose their length or size.
pub(crate) fn get_property(target: &Value, name: &str) -> Value {
    match target {
        Value::Object(obj) => obj.get(name),
        Value::Array(array) if name == "length" => Value::from(array.len()),
        Value::Map(map) if name == "size" => Value::from(map.size()),
        Value::Set(set) if name == "size" => Value::from(set.size()),
        Value::String(s) if name == "length" => Value::from(s.encode_utf16().count()),
        Value::Function(f) if name == "name" => Value::from(f.name()),
        _ => Value::Undefined,
    }
}

pub(crate) fn set_property(target: &Value, name: &str, value: Value, flags: LifecycleFlags) -> Result<()> {
    match target {
        Value::Object(obj) => obj.set_with_flags(name, value, flags),
        Value::Array(array) if name == "length" => {
            let len = value.to_number();
            if len.is_finite() && len >= 0.0 {
                array.set_len(len as usize)?;
            }
        }
        _ => tracing::trace!(target: "trellis::expression", property = name, tag = target.tag().name(), "ignoring write to non-object"),
    }
    Ok(())
}

/// A canonical array index: a non-negative integral number, or a string
/// spelling one without leading zeros.
pub(crate) fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 => {
            Some(*n as usize)
        }
        Value::String(s) => {
            let index: u32 = s.parse().ok()?;
            (format_number(index as f64) == **s && index < u32::MAX).then_some(index as usize)
        }
        _ => None,
    }
}

pub(crate) fn get_keyed(target: &Value, key: &Value) -> Value {
    match target {
        Value::Array(array) => match array_index(key) {
            Some(index) => array.get(index),
            None => get_property(target, &key.to_display_string()),
        },
        Value::Map(map) => map.get(key),
        Value::String(s) => match array_index(key) {
            Some(index) => s
                .encode_utf16()
                .nth(index)
                .map_or(Value::Undefined, |unit| Value::from(String::from_utf16_lossy(&[unit]))),
            None => get_property(target, &key.to_display_string()),
        },
        _ => get_property(target, &key.to_display_string()),
    }
}

fn set_keyed(target: &Value, key: &Value, value: Value, flags: LifecycleFlags) -> Result<()> {
    match target {
        Value::Array(array) => match array_index(key) {
            Some(index) => Ok(array.set(index, value)?),
            None => set_property(target, &key.to_display_string(), value, flags),
        },
        Value::Map(map) => {
            map.set(key.clone(), value);
            Ok(())
        }
        _ => set_property(target, &key.to_display_string(), value, flags),
    }
}

pub(super) fn binary_strategy(operator: BinaryOperator) -> BinaryStrategy {
    use BinaryOperator as B;
    match operator {
        B::And => BinaryStrategy::And,
        B::Or => BinaryStrategy::Or,
        B::Equals => BinaryStrategy::Eager(|a, b| Value::Bool(a.loose_equals(b))),
        B::NotEquals => BinaryStrategy::Eager(|a, b| Value::Bool(!a.loose_equals(b))),
        B::StrictEquals => BinaryStrategy::Eager(|a, b| Value::Bool(a.strict_equals(b))),
        B::StrictNotEquals => BinaryStrategy::Eager(|a, b| Value::Bool(!a.strict_equals(b))),
        B::Less => BinaryStrategy::Eager(|a, b| Value::Bool(compare(a, b) == Some(Ordering::Less))),
        B::Greater => BinaryStrategy::Eager(|a, b| Value::Bool(compare(a, b) == Some(Ordering::Greater))),
        B::LessOrEqual => {
            BinaryStrategy::Eager(|a, b| Value::Bool(matches!(compare(a, b), Some(Ordering::Less | Ordering::Equal))))
        }
        B::GreaterOrEqual => {
            BinaryStrategy::Eager(|a, b| Value::Bool(matches!(compare(a, b), Some(Ordering::Greater | Ordering::Equal))))
        }
        B::In => BinaryStrategy::Eager(has_key),
        B::Add => BinaryStrategy::Eager(add),
        B::Subtract => BinaryStrategy::Eager(|a, b| Value::Number(a.to_number() - b.to_number())),
        B::Multiply => BinaryStrategy::Eager(|a, b| Value::Number(a.to_number() * b.to_number())),
        B::Divide => BinaryStrategy::Eager(|a, b| Value::Number(a.to_number() / b.to_number())),
        B::Modulo => BinaryStrategy::Eager(|a, b| Value::Number(a.to_number() % b.to_number())),
    }
}

pub(super) fn unary_fn(operator: UnaryOperator) -> fn(&Value) -> Value {
    match operator {
        UnaryOperator::Not => |v| Value::Bool(!v.is_truthy()),
        UnaryOperator::Negate => |v| Value::Number(-v.to_number()),
        UnaryOperator::Plus => |v| Value::Number(v.to_number()),
        UnaryOperator::TypeOf => |v| Value::from(v.type_of()),
        UnaryOperator::Void => |_| Value::Undefined,
    }
}

fn add(a: &Value, b: &Value) -> Value {
    let concatenate = matches!(a, Value::String(_))
        || matches!(b, Value::String(_))
        || a.is_object_like()
        || b.is_object_like();
    if concatenate {
        Value::from(format!("{}{}", a.to_display_string(), b.to_display_string()))
    } else {
        Value::Number(a.to_number() + b.to_number())
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.encode_utf16().cmp(y.encode_utf16())),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}

fn has_key(key: &Value, target: &Value) -> Value {
    let found = match target {
        Value::Object(obj) => obj.has(&key.to_display_string()),
        Value::Array(array) => match array_index(key) {
            Some(index) => index < array.len(),
            None => key.as_str() == Some("length"),
        },
        Value::Map(_) | Value::Set(_) => key.as_str() == Some("size"),
        _ => false,
    };
    Value::Bool(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::resources::ResourceRegistry;
    use std::rc::Rc;
    use std::sync::Arc;
    use trellis_core::FunctionRef;

    fn eval(expression: &Expression, scope: &Scope) -> Value {
        let registry = ResourceRegistry::standalone();
        expression.evaluate(LifecycleFlags::NONE, scope, &*registry).unwrap()
    }

    fn num(n: f64) -> ExpressionRef {
        Expression::literal(Literal::Number(n))
    }

    fn string(s: &str) -> ExpressionRef {
        Expression::literal(Literal::String(Arc::from(s)))
    }

    #[test]
    fn test_access_scope() {
        let scope = Scope::create(ObjectRef::from_pairs([("x", 42)])).unwrap();
        assert_eq!(eval(&Expression::scope("x"), &scope), Value::from(42));
        assert_eq!(eval(&Expression::scope("missing"), &scope), Value::Undefined);
    }

    #[test]
    fn test_member_of_null_is_undefined() {
        let scope = Scope::create(ObjectRef::from_pairs([("a", Value::Null)])).unwrap();
        let expr = Expression::member(Expression::scope("a"), "b");
        assert_eq!(eval(&expr, &scope), Value::Undefined);
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        let scope = Scope::create(ObjectRef::new()).unwrap();
        let sum = Expression::binary(BinaryOperator::Add, num(1.0), num(2.0));
        assert_eq!(eval(&sum, &scope), Value::from(3));
        let concat = Expression::binary(BinaryOperator::Add, string("a"), num(1.0));
        assert_eq!(eval(&concat, &scope), Value::from("a1"));
        let modulo = Expression::binary(BinaryOperator::Modulo, num(-7.0), num(3.0));
        assert_eq!(eval(&modulo, &scope), Value::from(-1));
    }

    #[test]
    fn test_short_circuit_skips_right() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = calls.clone();
        let vm = ObjectRef::new();
        vm.set(
            "touch",
            FunctionRef::new("touch", move |_, _| {
                counter.set(counter.get() + 1);
                Ok(Value::Bool(true))
            }),
        );
        let scope = Scope::create(vm).unwrap();
        let call = Arc::new(Expression::CallScope {
            name: Arc::from("touch"),
            args: Vec::new(),
            ancestor: 0,
        });
        let and = Expression::binary(BinaryOperator::And, Expression::literal(Literal::Bool(false)), call.clone());
        assert_eq!(eval(&and, &scope), Value::Bool(false));
        let or = Expression::binary(BinaryOperator::Or, Expression::literal(Literal::Bool(true)), call);
        assert_eq!(eval(&or, &scope), Value::Bool(true));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_missing_function_is_lenient_unless_must_evaluate() {
        let scope = Scope::create(ObjectRef::new()).unwrap();
        let registry = ResourceRegistry::standalone();
        let call = Expression::CallScope {
            name: Arc::from("nope"),
            args: Vec::new(),
            ancestor: 0,
        };
        assert_eq!(call.evaluate(LifecycleFlags::NONE, &scope, &*registry).unwrap(), Value::Undefined);
        assert_eq!(
            call.evaluate(LifecycleFlags::MUST_EVALUATE, &scope, &*registry).unwrap_err(),
            Error::not_a_function("nope")
        );
    }

    #[test]
    fn test_calling_non_function_fails() {
        let scope = Scope::create(ObjectRef::from_pairs([("n", 1)])).unwrap();
        let registry = ResourceRegistry::standalone();
        let call = Expression::CallScope {
            name: Arc::from("n"),
            args: Vec::new(),
            ancestor: 0,
        };
        assert!(matches!(
            call.evaluate(LifecycleFlags::NONE, &scope, &*registry),
            Err(Error::NotAFunction { .. })
        ));
    }

    #[test]
    fn test_assign_creates_intermediate_objects() {
        let vm = ObjectRef::new();
        let scope = Scope::create(vm.clone()).unwrap();
        let registry = ResourceRegistry::standalone();
        let path = Expression::member(Expression::member(Expression::scope("user"), "address"), "city");
        path.assign(LifecycleFlags::NONE, &scope, &*registry, Value::from("Oslo")).unwrap();
        assert_eq!(eval(&path, &scope), Value::from("Oslo"));
        assert!(vm.get("user").as_object().is_some());
    }

    #[test]
    fn test_keyed_access_on_collections() {
        let items = ArrayRef::from(vec![Value::from("a"), Value::from("b")]);
        let scope = Scope::create(ObjectRef::from_pairs([("items", items.clone())])).unwrap();
        let registry = ResourceRegistry::standalone();
        let first = Expression::keyed(Expression::scope("items"), num(1.0));
        assert_eq!(eval(&first, &scope), Value::from("b"));

        first.assign(LifecycleFlags::NONE, &scope, &*registry, Value::from("z")).unwrap();
        assert_eq!(items.get(1), Value::from("z"));

        let by_string = Expression::keyed(Expression::scope("items"), string("0"));
        assert_eq!(eval(&by_string, &scope), Value::from("a"));
    }

    #[test]
    fn test_huge_index_write_fails_without_growing() {
        let items = ArrayRef::from(vec![Value::from(1)]);
        let scope = Scope::create(ObjectRef::from_pairs([("items", items.clone())])).unwrap();
        let registry = ResourceRegistry::standalone();
        let far = Expression::keyed(Expression::scope("items"), num(4_000_000_000.0));
        assert!(matches!(
            far.assign(LifecycleFlags::NONE, &scope, &*registry, Value::from(2)),
            Err(Error::Core(trellis_core::Error::ArrayTooLong { .. }))
        ));
        let length = Expression::member(Expression::scope("items"), "length");
        assert!(length.assign(LifecycleFlags::NONE, &scope, &*registry, Value::from(1e12)).is_err());
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_non_assignable_assign_is_noop() {
        let scope = Scope::create(ObjectRef::new()).unwrap();
        let registry = ResourceRegistry::standalone();
        let literal = num(3.0);
        assert_eq!(
            literal.assign(LifecycleFlags::NONE, &scope, &*registry, Value::from(4)).unwrap(),
            Value::Undefined
        );
    }

    #[test]
    fn test_array_index_rules() {
        assert_eq!(array_index(&Value::from(3)), Some(3));
        assert_eq!(array_index(&Value::from("12")), Some(12));
        assert_eq!(array_index(&Value::from("012")), None);
        assert_eq!(array_index(&Value::from(1.5)), None);
        assert_eq!(array_index(&Value::from(-1)), None);
    }
}
