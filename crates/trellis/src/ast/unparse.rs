use std::fmt::{self, Display, Formatter, Write};

use trellis_core::format_number;

use super::{Expression, ExpressionRef, Literal};

fn write_list(f: &mut Formatter<'_>, items: &[ExpressionRef]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_ancestor(f: &mut Formatter<'_>, ancestor: u32) -> fmt::Result {
    for _ in 0..ancestor {
        f.write_str("$parent.")?;
    }
    Ok(())
}

fn write_quoted(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('\'')?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('\'')
}

fn write_template(f: &mut Formatter<'_>, cooked: &[std::sync::Arc<str>], expressions: &[ExpressionRef]) -> fmt::Result {
    f.write_char('`')?;
    for (i, part) in cooked.iter().enumerate() {
        for c in part.chars() {
            match c {
                '`' => f.write_str("\\`")?,
                '$' => f.write_str("\\$")?,
                '\\' => f.write_str("\\\\")?,
                c => f.write_char(c)?,
            }
        }
        if let Some(expression) = expressions.get(i) {
            write!(f, "${{{expression}}}")?;
        }
    }
    f.write_char('`')
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => write_quoted(f, s),
        }
    }
}

/// Source text for an expression. Re-parsing the output yields an equal
/// tree; binary, conditional and assignment nodes are parenthesized so no
/// precedence information is lost.
impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessThis { ancestor: 0 } => f.write_str("$this"),
            Self::AccessThis { ancestor } => {
                f.write_str("$parent")?;
                for _ in 1..*ancestor {
                    f.write_str(".$parent")?;
                }
                Ok(())
            }
            Self::AccessScope { name, ancestor } => {
                write_ancestor(f, *ancestor)?;
                f.write_str(name)
            }
            Self::AccessMember { object, name } => write!(f, "{object}.{name}"),
            Self::AccessKeyed { object, key } => write!(f, "{object}[{key}]"),
            Self::CallScope { name, args, ancestor } => {
                write_ancestor(f, *ancestor)?;
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_char(')')
            }
            Self::CallMember { object, name, args } => {
                write!(f, "{object}.{name}(")?;
                write_list(f, args)?;
                f.write_char(')')
            }
            Self::CallFunction { func, args } => {
                write!(f, "{func}(")?;
                write_list(f, args)?;
                f.write_char(')')
            }
            Self::Binary(binary) => write!(f, "({} {} {})", binary.left, binary.operator.as_str(), binary.right),
            Self::Unary(unary) => {
                let op = unary.operator.as_str();
                if op.chars().all(char::is_alphabetic) {
                    write!(f, "({op} {})", unary.expression)
                } else {
                    write!(f, "({op}{})", unary.expression)
                }
            }
            Self::PrimitiveLiteral(literal) => write!(f, "{literal}"),
            Self::ArrayLiteral { elements } => {
                f.write_char('[')?;
                write_list(f, elements)?;
                f.write_char(']')
            }
            Self::ObjectLiteral { keys, values } => {
                f.write_char('{')?;
                for (i, (key, value)) in keys.iter().zip(values).enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write_quoted(f, key)?;
                    write!(f, ":{value}")?;
                }
                f.write_char('}')
            }
            Self::Template { cooked, expressions } => write_template(f, cooked, expressions),
            Self::TaggedTemplate { cooked, func, expressions } => {
                write!(f, "{func}")?;
                write_template(f, cooked, expressions)
            }
            Self::Conditional { condition, yes, no } => write!(f, "({condition} ? {yes} : {no})"),
            Self::Assign { target, value } => write!(f, "({target} = {value})"),
            Self::ValueConverter { expression, name, args } => {
                write!(f, "{expression}|{name}")?;
                for arg in args {
                    write!(f, ":{arg}")?;
                }
                Ok(())
            }
            Self::BindingBehavior { expression, name, args } => {
                write!(f, "{expression}&{name}")?;
                for arg in args {
                    write!(f, ":{arg}")?;
                }
                Ok(())
            }
            Self::BindingIdentifier { name } => f.write_str(name),
            Self::ArrayBindingPattern { elements } => {
                f.write_char('[')?;
                write_list(f, elements)?;
                f.write_char(']')
            }
            Self::ForOfStatement { declaration, iterable } => write!(f, "{declaration} of {iterable}"),
            Self::Interpolation { parts, expressions } => {
                for (i, part) in parts.iter().enumerate() {
                    f.write_str(part)?;
                    if let Some(expression) = expressions.get(i) {
                        write!(f, "${{{expression}}}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ast::{BinaryOperator, UnaryOperator};

    #[test]
    fn test_unparse_precedence_is_explicit() {
        let sum = Expression::binary(BinaryOperator::Add, Expression::scope("a"), Expression::scope("b"));
        let product = Expression::binary(BinaryOperator::Multiply, sum, Expression::literal(Literal::Number(2.0)));
        assert_eq!(product.to_string(), "((a + b) * 2)");
    }

    #[test]
    fn test_unparse_members_and_calls() {
        let call = Expression::CallMember {
            object: Expression::member(Expression::scope("user"), "name"),
            name: Arc::from("toUpperCase"),
            args: Vec::new(),
        };
        assert_eq!(call.to_string(), "user.name.toUpperCase()");

        let parent = Expression::AccessScope {
            name: Arc::from("title"),
            ancestor: 2,
        };
        assert_eq!(parent.to_string(), "$parent.$parent.title");
    }

    #[test]
    fn test_unparse_literals() {
        assert_eq!(Expression::literal(Literal::String(Arc::from("it's"))).to_string(), r"'it\'s'");
        assert_eq!(Expression::literal(Literal::Number(1.5)).to_string(), "1.5");
        let not = Expression::unary(UnaryOperator::TypeOf, Expression::scope("x"));
        assert_eq!(not.to_string(), "(typeof x)");
    }
}
