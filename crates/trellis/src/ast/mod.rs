//! Binding expression syntax tree.
//!
//! Expressions are produced by the [`ExpressionParser`](crate::parser::ExpressionParser)
//! and are immutable afterwards: a parsed expression is cached by its source
//! text and shared by every binding that uses the same text, across threads
//! if need be. Runtime state (scopes, observers) is always passed in.
//!
//! Every node supports three operations:
//!
//! - [`evaluate`](Expression::evaluate) computes the value against a scope;
//! - [`assign`](Expression::assign) writes a value back through the node,
//!   which is a no-op returning `undefined` for nodes that are not
//!   assignable;
//! - [`connect`](Expression::connect) reports every observable the node
//!   touches to a [`Connectable`](trellis_core::Connectable) binding.
//!
//! Behavior is chosen from the node's [`ExpressionKind`] mask rather than
//! by inspecting its variant.

mod builtins;
mod evaluate;
mod iterate;
mod unparse;

use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use trellis_core::Value;

use crate::error::{Error, Result};

pub use builtins::call_builtin;
pub use iterate::{ITERATION_STRATEGIES, IterationStrategy};

/// A shared expression node.
pub type ExpressionRef = Arc<Expression>;

bitflags! {
    /// Capabilities of an expression node, fixed at construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExpressionKind: u32 {
        /// Reports observables during connect.
        const CONNECTS           = 1 << 0;
        /// Observes a property directly.
        const OBSERVES           = 1 << 1;
        /// Invokes a function.
        const CALLS_FUNCTION     = 1 << 2;
        /// Resolves names relative to an ancestor override context.
        const HAS_ANCESTOR       = 1 << 3;
        /// A primary expression.
        const IS_PRIMARY         = 1 << 4;
        /// May appear on the left of an assignment.
        const IS_LEFT_HAND_SIDE  = 1 << 5;
        /// Needs a bind hook when its binding binds.
        const HAS_BIND           = 1 << 6;
        /// Needs an unbind hook when its binding unbinds.
        const HAS_UNBIND         = 1 << 7;
        /// `assign` writes somewhere.
        const IS_ASSIGNABLE      = 1 << 8;
        /// A literal value.
        const IS_LITERAL         = 1 << 9;
        /// Refers to a registered resource.
        const IS_RESOURCE        = 1 << 10;
        /// The declaration part of a for-of statement.
        const IS_FOR_DECLARATION = 1 << 11;
        /// A for-of statement; supports `count` and `iterate`.
        const IS_ITERATOR        = 1 << 12;
        /// An interpolated text.
        const IS_INTERPOLATION   = 1 << 13;
    }
}

/// A literal primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string.
    String(Arc<str>),
}

impl Literal {
    /// The runtime value of the literal.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Undefined => Value::Undefined,
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(*n),
            Self::String(s) => Value::from(&**s),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `===`
    StrictEquals,
    /// `!==`
    StrictNotEquals,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessOrEqual,
    /// `>=`
    GreaterOrEqual,
    /// `in`
    In,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
}

impl BinaryOperator {
    /// The operator for a token, if it is a binary operator.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "&&" => Self::And,
            "||" => Self::Or,
            "==" => Self::Equals,
            "!=" => Self::NotEquals,
            "===" => Self::StrictEquals,
            "!==" => Self::StrictNotEquals,
            "<" => Self::Less,
            ">" => Self::Greater,
            "<=" => Self::LessOrEqual,
            ">=" => Self::GreaterOrEqual,
            "in" => Self::In,
            "+" => Self::Add,
            "-" => Self::Subtract,
            "*" => Self::Multiply,
            "/" => Self::Divide,
            "%" => Self::Modulo,
            _ => return None,
        })
    }

    /// The source token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::StrictEquals => "===",
            Self::StrictNotEquals => "!==",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::In => "in",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Equals | Self::NotEquals | Self::StrictEquals | Self::StrictNotEquals => 3,
            Self::Less | Self::Greater | Self::LessOrEqual | Self::GreaterOrEqual | Self::In => 4,
            Self::Add | Self::Subtract => 5,
            Self::Multiply | Self::Divide | Self::Modulo => 6,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// `!`
    Not,
    /// `-`
    Negate,
    /// `+`
    Plus,
    /// `typeof`
    TypeOf,
    /// `void`
    Void,
}

impl UnaryOperator {
    /// The operator for a token, if it is a unary operator.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "!" => Self::Not,
            "-" => Self::Negate,
            "+" => Self::Plus,
            "typeof" => Self::TypeOf,
            "void" => Self::Void,
            _ => return None,
        })
    }

    /// The source token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Negate => "-",
            Self::Plus => "+",
            Self::TypeOf => "typeof",
            Self::Void => "void",
        }
    }
}

impl FromStr for BinaryOperator {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        Self::from_token(token).ok_or_else(|| Error::UnknownOperator(token.to_owned()))
    }
}

impl FromStr for UnaryOperator {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        Self::from_token(token).ok_or_else(|| Error::UnknownOperator(token.to_owned()))
    }
}

/// How a binary node computes its result.
#[derive(Clone, Copy)]
pub(crate) enum BinaryStrategy {
    /// `&&`: the right side is only evaluated if the left is truthy.
    And,
    /// `||`: the right side is only evaluated if the left is falsy.
    Or,
    /// Both sides are evaluated, then combined.
    Eager(fn(&Value, &Value) -> Value),
}

/// A binary operation. The evaluation routine is selected once, when the
/// node is built.
#[derive(Clone)]
pub struct BinaryExpression {
    /// The operator.
    pub operator: BinaryOperator,
    /// Left operand.
    pub left: ExpressionRef,
    /// Right operand.
    pub right: ExpressionRef,
    pub(crate) strategy: BinaryStrategy,
}

impl BinaryExpression {
    /// Build a binary node.
    pub fn new(operator: BinaryOperator, left: ExpressionRef, right: ExpressionRef) -> Self {
        Self {
            operator,
            left,
            right,
            strategy: evaluate::binary_strategy(operator),
        }
    }
}

impl PartialEq for BinaryExpression {
    fn eq(&self, other: &Self) -> bool {
        self.operator == other.operator && self.left == other.left && self.right == other.right
    }
}

impl std::fmt::Debug for BinaryExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryExpression")
            .field("operator", &self.operator)
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

/// A unary operation. The evaluation routine is selected once, when the
/// node is built.
#[derive(Clone)]
pub struct UnaryExpression {
    /// The operator.
    pub operator: UnaryOperator,
    /// The operand.
    pub expression: ExpressionRef,
    pub(crate) apply: fn(&Value) -> Value,
}

impl UnaryExpression {
    /// Build a unary node.
    pub fn new(operator: UnaryOperator, expression: ExpressionRef) -> Self {
        Self {
            operator,
            expression,
            apply: evaluate::unary_fn(operator),
        }
    }
}

impl PartialEq for UnaryExpression {
    fn eq(&self, other: &Self) -> bool {
        self.operator == other.operator && self.expression == other.expression
    }
}

impl std::fmt::Debug for UnaryExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnaryExpression")
            .field("operator", &self.operator)
            .field("expression", &self.expression)
            .finish()
    }
}

/// A binding expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `$this` (ancestor 0) or `$parent` chains.
    AccessThis {
        /// How many override contexts to walk up.
        ancestor: u32,
    },
    /// An unqualified name, optionally behind `$parent.`.
    AccessScope {
        /// The name.
        name: Arc<str>,
        /// How many override contexts to walk up.
        ancestor: u32,
    },
    /// `object.name`
    AccessMember {
        /// The object expression.
        object: ExpressionRef,
        /// The member name.
        name: Arc<str>,
    },
    /// `object[key]`
    AccessKeyed {
        /// The object expression.
        object: ExpressionRef,
        /// The key expression.
        key: ExpressionRef,
    },
    /// `name(args)`
    CallScope {
        /// The function name.
        name: Arc<str>,
        /// Arguments.
        args: Vec<ExpressionRef>,
        /// How many override contexts to walk up.
        ancestor: u32,
    },
    /// `object.name(args)`
    CallMember {
        /// The receiver.
        object: ExpressionRef,
        /// The method name.
        name: Arc<str>,
        /// Arguments.
        args: Vec<ExpressionRef>,
    },
    /// `func(args)` for any other callee.
    CallFunction {
        /// The callee.
        func: ExpressionRef,
        /// Arguments.
        args: Vec<ExpressionRef>,
    },
    /// `left op right`
    Binary(BinaryExpression),
    /// `op expression`
    Unary(UnaryExpression),
    /// A literal primitive.
    PrimitiveLiteral(Literal),
    /// `[a, b]`
    ArrayLiteral {
        /// Element expressions.
        elements: Vec<ExpressionRef>,
    },
    /// `{ a: b }`
    ObjectLiteral {
        /// Property names.
        keys: Vec<Arc<str>>,
        /// Property values, parallel to `keys`.
        values: Vec<ExpressionRef>,
    },
    /// `` `a${b}c` ``
    Template {
        /// Literal strings; always one more than `expressions`.
        cooked: Vec<Arc<str>>,
        /// Embedded expressions.
        expressions: Vec<ExpressionRef>,
    },
    /// ``tag`a${b}c` ``
    TaggedTemplate {
        /// Literal strings; always one more than `expressions`.
        cooked: Vec<Arc<str>>,
        /// The tag function.
        func: ExpressionRef,
        /// Embedded expressions.
        expressions: Vec<ExpressionRef>,
    },
    /// `condition ? yes : no`
    Conditional {
        /// The test.
        condition: ExpressionRef,
        /// Evaluated when the test is truthy.
        yes: ExpressionRef,
        /// Evaluated when the test is falsy.
        no: ExpressionRef,
    },
    /// `target = value`
    Assign {
        /// Where the value is written.
        target: ExpressionRef,
        /// The value.
        value: ExpressionRef,
    },
    /// `expression | name:arg`
    ValueConverter {
        /// The converted expression.
        expression: ExpressionRef,
        /// Registered converter name.
        name: Arc<str>,
        /// Converter arguments.
        args: Vec<ExpressionRef>,
    },
    /// `expression & name:arg`
    BindingBehavior {
        /// The wrapped expression.
        expression: ExpressionRef,
        /// Registered behavior name.
        name: Arc<str>,
        /// Behavior arguments.
        args: Vec<ExpressionRef>,
    },
    /// A declared loop variable.
    BindingIdentifier {
        /// The variable name.
        name: Arc<str>,
    },
    /// `[a, b]` on the left of `of`.
    ArrayBindingPattern {
        /// One identifier per destructured position.
        elements: Vec<ExpressionRef>,
    },
    /// `declaration of iterable`
    ForOfStatement {
        /// A [`BindingIdentifier`](Self::BindingIdentifier) or
        /// [`ArrayBindingPattern`](Self::ArrayBindingPattern).
        declaration: ExpressionRef,
        /// The iterated expression.
        iterable: ExpressionRef,
    },
    /// `text ${expression} text`
    Interpolation {
        /// Literal text; always one more than `expressions`.
        parts: Vec<Arc<str>>,
        /// Embedded expressions.
        expressions: Vec<ExpressionRef>,
    },
}

static_assertions::assert_impl_all!(Expression: Send, Sync);
static_assertions::assert_impl_all!(ExpressionRef: Send, Sync);

impl Expression {
    /// The node's capability mask.
    pub fn kind(&self) -> ExpressionKind {
        use ExpressionKind as K;
        match self {
            Self::AccessThis { .. } => K::IS_PRIMARY | K::HAS_ANCESTOR,
            Self::AccessScope { .. } => {
                K::IS_ASSIGNABLE | K::IS_PRIMARY | K::IS_LEFT_HAND_SIDE | K::HAS_ANCESTOR | K::CONNECTS | K::OBSERVES
            }
            Self::AccessMember { .. } | Self::AccessKeyed { .. } => {
                K::IS_ASSIGNABLE | K::IS_LEFT_HAND_SIDE | K::CONNECTS | K::OBSERVES
            }
            Self::CallScope { .. } => {
                K::IS_PRIMARY | K::IS_LEFT_HAND_SIDE | K::CALLS_FUNCTION | K::HAS_ANCESTOR | K::CONNECTS
            }
            Self::CallMember { .. } | Self::CallFunction { .. } => {
                K::IS_LEFT_HAND_SIDE | K::CALLS_FUNCTION | K::CONNECTS
            }
            Self::Binary(_) | Self::Unary(_) | Self::Conditional { .. } => K::CONNECTS,
            Self::PrimitiveLiteral(_) => K::IS_PRIMARY | K::IS_LITERAL,
            Self::ArrayLiteral { .. } | Self::ObjectLiteral { .. } | Self::Template { .. } => {
                K::IS_PRIMARY | K::IS_LITERAL | K::CONNECTS
            }
            Self::TaggedTemplate { .. } => K::IS_PRIMARY | K::CALLS_FUNCTION | K::CONNECTS,
            Self::Assign { .. } => K::IS_ASSIGNABLE | K::CONNECTS,
            Self::ValueConverter { .. } => K::IS_RESOURCE | K::IS_ASSIGNABLE | K::CONNECTS,
            Self::BindingBehavior { .. } => {
                K::IS_RESOURCE | K::IS_ASSIGNABLE | K::CONNECTS | K::HAS_BIND | K::HAS_UNBIND
            }
            Self::BindingIdentifier { .. } | Self::ArrayBindingPattern { .. } => {
                K::IS_ASSIGNABLE | K::IS_FOR_DECLARATION
            }
            Self::ForOfStatement { .. } => K::IS_ITERATOR | K::CONNECTS,
            Self::Interpolation { .. } => K::IS_INTERPOLATION | K::CONNECTS,
        }
    }

    /// Whether [`assign`](Self::assign) writes anywhere.
    pub fn is_assignable(&self) -> bool {
        self.kind().contains(ExpressionKind::IS_ASSIGNABLE)
    }

    /// Whether the node needs [`bind`](Self::bind) and
    /// [`unbind`](Self::unbind) calls.
    pub fn has_bind(&self) -> bool {
        self.kind().contains(ExpressionKind::HAS_BIND)
    }

    /// A literal node.
    pub fn literal(literal: Literal) -> ExpressionRef {
        Arc::new(Self::PrimitiveLiteral(literal))
    }

    /// An unqualified scope access.
    pub fn scope(name: &str) -> ExpressionRef {
        Arc::new(Self::AccessScope {
            name: Arc::from(name),
            ancestor: 0,
        })
    }

    /// `object.name`
    pub fn member(object: ExpressionRef, name: &str) -> ExpressionRef {
        Arc::new(Self::AccessMember {
            object,
            name: Arc::from(name),
        })
    }

    /// `object[key]`
    pub fn keyed(object: ExpressionRef, key: ExpressionRef) -> ExpressionRef {
        Arc::new(Self::AccessKeyed { object, key })
    }

    /// `left op right`
    pub fn binary(operator: BinaryOperator, left: ExpressionRef, right: ExpressionRef) -> ExpressionRef {
        Arc::new(Self::Binary(BinaryExpression::new(operator, left, right)))
    }

    /// `op expression`
    pub fn unary(operator: UnaryOperator, expression: ExpressionRef) -> ExpressionRef {
        Arc::new(Self::Unary(UnaryExpression::new(operator, expression)))
    }

    /// The embedded expressions of an interpolation; empty for other nodes.
    pub fn interpolation_expressions(&self) -> &[ExpressionRef] {
        match self {
            Self::Interpolation { expressions, .. } => expressions,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_drives_capabilities() {
        let scope = Expression::scope("name");
        assert!(scope.is_assignable());
        assert!(scope.kind().contains(ExpressionKind::OBSERVES));

        let literal = Expression::literal(Literal::Number(1.0));
        assert!(!literal.is_assignable());
        assert!(literal.kind().contains(ExpressionKind::IS_LITERAL));

        let behavior = Expression::BindingBehavior {
            expression: scope.clone(),
            name: Arc::from("oneTime"),
            args: Vec::new(),
        };
        assert!(behavior.has_bind());
        assert!(!scope.has_bind());
    }

    #[test]
    fn test_operator_tokens_round_trip() {
        for token in ["&&", "||", "==", "!=", "===", "!==", "<", ">", "<=", ">=", "in", "+", "-", "*", "/", "%"] {
            let op = BinaryOperator::from_token(token).unwrap();
            assert_eq!(op.as_str(), token);
        }
        assert!(BinaryOperator::from_token("**").is_none());
        assert_eq!("%".parse::<BinaryOperator>(), Ok(BinaryOperator::Modulo));
        assert_eq!(
            "**".parse::<BinaryOperator>(),
            Err(Error::UnknownOperator("**".to_owned()))
        );
        assert_eq!("typeof".parse::<UnaryOperator>(), Ok(UnaryOperator::TypeOf));
        assert!(matches!("~".parse::<UnaryOperator>(), Err(Error::UnknownOperator(op)) if op == "~"));
        assert!(BinaryOperator::Multiply.precedence() > BinaryOperator::Add.precedence());
        assert!(BinaryOperator::And.precedence() > BinaryOperator::Or.precedence());
    }

    #[test]
    fn test_structural_equality_ignores_strategy() {
        let a = Expression::binary(BinaryOperator::Add, Expression::scope("a"), Expression::scope("b"));
        let b = Expression::binary(BinaryOperator::Add, Expression::scope("a"), Expression::scope("b"));
        assert_eq!(a, b);
    }
}
