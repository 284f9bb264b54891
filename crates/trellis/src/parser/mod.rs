//! Binding expression parser.
//!
//! Parses the expression language used in binding attributes: member and
//! keyed access, calls, the usual JavaScript operators, literals, template
//! strings, value converters (`| name:arg`), binding behaviors
//! (`& name:arg`), `$this` / `$parent` scope hops, interpolations
//! (`Hello ${name}`) and for-of declarations (`[key, value] of map`).
//!
//! [`ExpressionParser`] caches every result by source text and
//! [`BindingType`], so each distinct expression is parsed once per process.
//!
//! # Example
//!
//! ```
//! use trellis::parser::{BindingType, ExpressionParser};
//!
//! let parser = ExpressionParser::new();
//! let expression = parser.parse("user.name | upper", BindingType::Expression).unwrap();
//! assert_eq!(expression.to_string(), "user.name|upper");
//! ```

mod lexer;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use lexer::{Lexer, Spanned, Token};

use crate::ast::{BinaryOperator, Expression, ExpressionRef, Literal, UnaryOperator};
use crate::error::{Error, Result};

/// What kind of binding the source text belongs to; it selects the entry
/// point of the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// A plain binding expression.
    Expression,
    /// Text with embedded `${...}` expressions.
    Interpolation,
    /// A for-of declaration, as used by repeaters.
    Iterator,
    /// A `ref` target; must be assignable.
    Ref,
}

/// Parses and caches binding expressions.
///
/// Parsed expressions are immutable and `Send + Sync`, so one parser can be
/// shared across threads behind an [`Arc`].
#[derive(Debug, Default)]
pub struct ExpressionParser {
    cache: RwLock<HashMap<(BindingType, String), ExpressionRef>>,
}

impl ExpressionParser {
    /// A parser with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source` as `binding_type`, reusing a cached result.
    pub fn parse(&self, source: &str, binding_type: BindingType) -> Result<ExpressionRef> {
        let key = (binding_type, source.to_string());
        if let Some(cached) = self.cache.read().get(&key) {
            return Ok(cached.clone());
        }
        let expression = parse(source, binding_type)?;
        tracing::trace!(target: "trellis::expression", source, ?binding_type, "parsed expression");
        Ok(self.cache.write().entry(key).or_insert(expression).clone())
    }

    /// Parse `text` as an interpolation, or `None` when it contains no
    /// `${`.
    pub fn parse_interpolation(&self, text: &str) -> Result<Option<ExpressionRef>> {
        let expression = self.parse(text, BindingType::Interpolation)?;
        Ok((!expression.interpolation_expressions().is_empty()).then_some(expression))
    }

    /// Number of cached expressions.
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }
}

/// Parse `source` without caching.
pub fn parse(source: &str, binding_type: BindingType) -> Result<ExpressionRef> {
    match binding_type {
        BindingType::Interpolation => Parser::new(source).parse_interpolation(),
        BindingType::Iterator => {
            let mut parser = Parser::new(source);
            parser.advance()?;
            let expression = parser.parse_for_of()?;
            parser.expect_end()?;
            Ok(expression)
        }
        BindingType::Expression | BindingType::Ref => {
            let mut parser = Parser::new(source);
            parser.advance()?;
            let start = parser.current.start;
            let expression = parser.parse_binding_behavior()?;
            parser.expect_end()?;
            if binding_type == BindingType::Ref && !expression.is_assignable() {
                return Err(Error::parse("Ref target is not assignable", start));
            }
            Ok(expression)
        }
    }
}

struct Parser {
    lexer: Lexer,
    current: Spanned,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            lexer: Lexer::new(source),
            current: Spanned {
                token: Token::Eof,
                start: 0,
            },
        }
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next).token)
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.current.token, Token::Operator(o) if o == op)
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(&self.current.token, Token::Identifier(n) if n == name)
    }

    fn eat_op(&mut self, op: &str) -> Result<bool> {
        if self.is_op(op) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op)? {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{op}'")))
        }
    }

    fn expect_identifier(&mut self) -> Result<Arc<str>> {
        match &self.current.token {
            Token::Identifier(name) => {
                let name = Arc::from(name.as_str());
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.current.token == Token::Eof {
            Ok(())
        } else {
            Err(self.unexpected("expected end of expression"))
        }
    }

    fn unexpected(&self, context: &str) -> Error {
        let found = match &self.current.token {
            Token::Identifier(name) => format!("'{name}'"),
            Token::Number(n) => format!("'{n}'"),
            Token::String(_) => "string".to_string(),
            Token::TemplateStart => "'`'".to_string(),
            Token::Operator(op) => format!("'{op}'"),
            Token::Eof => "end of expression".to_string(),
        };
        Error::parse(format!("Unexpected {found}, {context}"), self.current.start)
    }

    // expression & behavior:arg
    fn parse_binding_behavior(&mut self) -> Result<ExpressionRef> {
        let mut expression = self.parse_value_converter()?;
        while self.eat_op("&")? {
            let name = self.expect_identifier()?;
            let args = self.parse_resource_args()?;
            expression = Arc::new(Expression::BindingBehavior { expression, name, args });
        }
        Ok(expression)
    }

    // expression | converter:arg
    fn parse_value_converter(&mut self) -> Result<ExpressionRef> {
        let mut expression = self.parse_assign()?;
        while self.eat_op("|")? {
            let name = self.expect_identifier()?;
            let args = self.parse_resource_args()?;
            expression = Arc::new(Expression::ValueConverter { expression, name, args });
        }
        Ok(expression)
    }

    fn parse_resource_args(&mut self) -> Result<Vec<ExpressionRef>> {
        let mut args = Vec::new();
        while self.eat_op(":")? {
            args.push(self.parse_conditional()?);
        }
        Ok(args)
    }

    fn parse_assign(&mut self) -> Result<ExpressionRef> {
        let start = self.current.start;
        let target = self.parse_conditional()?;
        if !self.is_op("=") {
            return Ok(target);
        }
        if !target.is_assignable() {
            return Err(Error::parse(format!("Cannot assign to '{target}'"), start));
        }
        self.advance()?;
        let value = self.parse_assign()?;
        Ok(Arc::new(Expression::Assign { target, value }))
    }

    fn parse_conditional(&mut self) -> Result<ExpressionRef> {
        let condition = self.parse_binary(0)?;
        if !self.eat_op("?")? {
            return Ok(condition);
        }
        let yes = self.parse_assign()?;
        self.expect_op(":")?;
        let no = self.parse_assign()?;
        Ok(Arc::new(Expression::Conditional { condition, yes, no }))
    }

    fn current_binary_operator(&self) -> Option<BinaryOperator> {
        match &self.current.token {
            Token::Operator(op) => BinaryOperator::from_token(op),
            Token::Identifier(name) if name == "in" => Some(BinaryOperator::In),
            _ => None,
        }
    }

    // Precedence climbing; every binary operator is left-associative.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<ExpressionRef> {
        let mut left = self.parse_unary()?;
        while let Some(operator) = self.current_binary_operator() {
            let precedence = operator.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.advance()?;
            let right = self.parse_binary(precedence)?;
            left = Expression::binary(operator, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ExpressionRef> {
        let operator = match &self.current.token {
            Token::Operator(op) => UnaryOperator::from_token(op),
            Token::Identifier(name) if name == "typeof" || name == "void" => UnaryOperator::from_token(name),
            _ => None,
        };
        match operator {
            Some(operator) => {
                self.advance()?;
                Ok(Expression::unary(operator, self.parse_unary()?))
            }
            None => self.parse_left_hand_side(),
        }
    }

    fn parse_left_hand_side(&mut self) -> Result<ExpressionRef> {
        let mut expression = self.parse_primary()?;
        loop {
            if self.eat_op(".")? {
                let name = self.expect_identifier()?;
                expression = if self.is_op("(") {
                    let args = self.parse_arguments()?;
                    Arc::new(Expression::CallMember {
                        object: expression,
                        name,
                        args,
                    })
                } else {
                    Arc::new(Expression::AccessMember { object: expression, name })
                };
            } else if self.eat_op("[")? {
                let key = self.parse_assign()?;
                self.expect_op("]")?;
                expression = Expression::keyed(expression, key);
            } else if self.is_op("(") {
                let args = self.parse_arguments()?;
                expression = Arc::new(Expression::CallFunction { func: expression, args });
            } else if self.current.token == Token::TemplateStart {
                let (cooked, expressions) = self.parse_template_parts()?;
                expression = Arc::new(Expression::TaggedTemplate {
                    cooked,
                    func: expression,
                    expressions,
                });
            } else {
                return Ok(expression);
            }
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<ExpressionRef>> {
        self.expect_op("(")?;
        let mut args = Vec::new();
        while !self.is_op(")") {
            args.push(self.parse_assign()?);
            if !self.eat_op(",")? {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<ExpressionRef> {
        match self.current.token.clone() {
            Token::Identifier(name) => match name.as_str() {
                "true" => self.literal(Literal::Bool(true)),
                "false" => self.literal(Literal::Bool(false)),
                "null" => self.literal(Literal::Null),
                "undefined" => self.literal(Literal::Undefined),
                "$this" | "$parent" => self.parse_scope_hop(),
                _ => {
                    self.advance()?;
                    self.parse_scope_access(Arc::from(name.as_str()), 0)
                }
            },
            Token::Number(n) => self.literal(Literal::Number(n)),
            Token::String(s) => self.literal(Literal::String(Arc::from(s.as_str()))),
            Token::TemplateStart => {
                let (cooked, expressions) = self.parse_template_parts()?;
                Ok(Arc::new(Expression::Template { cooked, expressions }))
            }
            Token::Operator("(") => {
                self.advance()?;
                let expression = self.parse_assign()?;
                self.expect_op(")")?;
                Ok(expression)
            }
            Token::Operator("[") => self.parse_array_literal(),
            Token::Operator("{") => self.parse_object_literal(),
            _ => Err(self.unexpected("expected expression")),
        }
    }

    fn literal(&mut self, literal: Literal) -> Result<ExpressionRef> {
        self.advance()?;
        Ok(Expression::literal(literal))
    }

    // name or name(args), resolved `ancestor` override contexts up.
    fn parse_scope_access(&mut self, name: Arc<str>, ancestor: u32) -> Result<ExpressionRef> {
        if self.is_op("(") {
            let args = self.parse_arguments()?;
            Ok(Arc::new(Expression::CallScope { name, args, ancestor }))
        } else {
            Ok(Arc::new(Expression::AccessScope { name, ancestor }))
        }
    }

    // $this, $parent, $parent.$parent..., optionally followed by `.name`.
    fn parse_scope_hop(&mut self) -> Result<ExpressionRef> {
        let mut ancestor = if self.is_ident("$this") { 0 } else { 1 };
        self.advance()?;
        while self.is_op(".") {
            self.advance()?;
            if self.is_ident("$parent") {
                self.advance()?;
                ancestor += 1;
                continue;
            }
            let name = self.expect_identifier()?;
            return self.parse_scope_access(name, ancestor);
        }
        Ok(Arc::new(Expression::AccessThis { ancestor }))
    }

    fn parse_array_literal(&mut self) -> Result<ExpressionRef> {
        self.expect_op("[")?;
        let mut elements = Vec::new();
        while !self.is_op("]") {
            elements.push(self.parse_assign()?);
            if !self.eat_op(",")? {
                break;
            }
        }
        self.expect_op("]")?;
        Ok(Arc::new(Expression::ArrayLiteral { elements }))
    }

    fn parse_object_literal(&mut self) -> Result<ExpressionRef> {
        self.expect_op("{")?;
        let mut keys = Vec::new();
        let mut values = Vec::new();
        while !self.is_op("}") {
            let (key, shorthand): (Arc<str>, bool) = match self.current.token.clone() {
                Token::Identifier(name) => (Arc::from(name.as_str()), true),
                Token::String(s) => (Arc::from(s.as_str()), false),
                Token::Number(n) => (Arc::from(trellis_core::format_number(n).as_str()), false),
                _ => return Err(self.unexpected("expected property name")),
            };
            self.advance()?;
            let value = if self.eat_op(":")? {
                self.parse_assign()?
            } else if shorthand {
                Arc::new(Expression::AccessScope {
                    name: key.clone(),
                    ancestor: 0,
                })
            } else {
                return Err(self.unexpected("expected ':'"));
            };
            keys.push(key);
            values.push(value);
            if !self.eat_op(",")? {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Arc::new(Expression::ObjectLiteral { keys, values }))
    }

    // Called with the current token at the opening backtick.
    fn parse_template_parts(&mut self) -> Result<(Vec<Arc<str>>, Vec<ExpressionRef>)> {
        let mut cooked = Vec::new();
        let mut expressions = Vec::new();
        loop {
            let (text, done) = self.lexer.scan_template_part()?;
            cooked.push(Arc::from(text.as_str()));
            if done {
                break;
            }
            self.advance()?;
            expressions.push(self.parse_assign()?);
            if !self.is_op("}") {
                return Err(self.unexpected("expected '}' in template"));
            }
        }
        self.advance()?;
        Ok((cooked, expressions))
    }

    // declaration of iterable
    fn parse_for_of(&mut self) -> Result<ExpressionRef> {
        let declaration = if self.eat_op("[")? {
            let mut elements = Vec::new();
            while !self.is_op("]") {
                let name = self.expect_identifier()?;
                elements.push(Arc::new(Expression::BindingIdentifier { name }));
                if !self.eat_op(",")? {
                    break;
                }
            }
            self.expect_op("]")?;
            Arc::new(Expression::ArrayBindingPattern { elements })
        } else {
            let name = self.expect_identifier()?;
            Arc::new(Expression::BindingIdentifier { name })
        };
        if !self.is_ident("of") {
            return Err(self.unexpected("expected 'of'"));
        }
        self.advance()?;
        let iterable = self.parse_binding_behavior()?;
        Ok(Arc::new(Expression::ForOfStatement { declaration, iterable }))
    }

    fn parse_interpolation(&mut self) -> Result<ExpressionRef> {
        let mut parts = Vec::new();
        let mut expressions = Vec::new();
        loop {
            let (text, more) = self.lexer.scan_interpolation_text();
            parts.push(Arc::from(text.as_str()));
            if !more {
                break;
            }
            self.advance()?;
            expressions.push(self.parse_binding_behavior()?);
            if !self.is_op("}") {
                return Err(self.unexpected("expected '}' to close interpolation"));
            }
        }
        Ok(Arc::new(Expression::Interpolation { parts, expressions }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn expr(source: &str) -> ExpressionRef {
        parse(source, BindingType::Expression).unwrap()
    }

    #[test]
    fn test_parse_precedence() {
        assert_eq!(expr("a + b * c").to_string(), "(a + (b * c))");
        assert_eq!(expr("a - b - c").to_string(), "((a - b) - c)");
        assert_eq!(expr("a || b && c == d").to_string(), "(a || (b && (c == d)))");
        assert_eq!(expr("!a.b").to_string(), "(!a.b)");
        assert_eq!(expr("x ? y : z ? 1 : 2").to_string(), "(x ? y : (z ? 1 : 2))");
    }

    #[test]
    fn test_parse_members_calls_and_keys() {
        assert_eq!(
            *expr("user.save(1)"),
            Expression::CallMember {
                object: Expression::scope("user"),
                name: Arc::from("save"),
                args: vec![Expression::literal(Literal::Number(1.0))],
            }
        );
        assert_eq!(expr("items[i + 1].name").to_string(), "items[(i + 1)].name");
        assert_eq!(expr("fns[0]('x')").to_string(), "fns[0]('x')");
    }

    #[test]
    fn test_parse_scope_hops() {
        assert_eq!(*expr("$parent.title"), Expression::AccessScope {
            name: Arc::from("title"),
            ancestor: 1
        });
        assert_eq!(*expr("$parent.$parent"), Expression::AccessThis { ancestor: 2 });
        assert_eq!(*expr("$this"), Expression::AccessThis { ancestor: 0 });
        assert_eq!(*expr("$parent.go()"), Expression::CallScope {
            name: Arc::from("go"),
            args: Vec::new(),
            ancestor: 1
        });
    }

    #[test]
    fn test_parse_resources() {
        let parsed = expr("amount | currency:'EUR':2 & signal:'tick'");
        assert_eq!(parsed.to_string(), "amount|currency:'EUR':2&signal:'tick'");
        assert!(parsed.has_bind());
    }

    #[test]
    fn test_parse_literals_and_templates() {
        assert_eq!(expr("[1, 'a', null]").to_string(), "[1, 'a', null]");
        assert_eq!(expr("{a: 1, b}").to_string(), "{'a':1,'b':b}");
        assert_eq!(expr("`Hi ${name}!`").to_string(), "`Hi ${name}!`");
        assert_eq!(expr("tag`x${y}`").to_string(), "tag`x${y}`");
    }

    #[test]
    fn test_parse_assignment_requires_assignable_target() {
        assert_eq!(expr("a.b = c = 1").to_string(), "(a.b = (c = 1))");
        assert!(matches!(parse("1 = a", BindingType::Expression), Err(Error::Parse { .. })));
        assert!(matches!(parse("a + b", BindingType::Ref), Err(Error::Parse { .. })));
        assert!(parse("view.input", BindingType::Ref).is_ok());
    }

    #[test]
    fn test_parse_errors_report_position() {
        assert_eq!(
            parse("a + )", BindingType::Expression).unwrap_err(),
            Error::parse("Unexpected ')', expected expression", 4)
        );
        assert!(parse("a b", BindingType::Expression).is_err());
        assert!(parse("", BindingType::Expression).is_err());
    }

    #[test]
    fn test_parse_for_of() {
        let single = parse("item of items", BindingType::Iterator).unwrap();
        assert_eq!(single.to_string(), "item of items");
        let pattern = parse("[key, value] of map | sorted", BindingType::Iterator).unwrap();
        assert_eq!(pattern.to_string(), "[key, value] of map|sorted");
        assert!(parse("item in items", BindingType::Iterator).is_err());
    }

    #[test]
    fn test_parse_interpolation() {
        let parser = ExpressionParser::new();
        let parsed = parser.parse_interpolation("Hello ${first} ${last | upper}!").unwrap().unwrap();
        assert_eq!(parsed.interpolation_expressions().len(), 2);
        assert_eq!(parsed.to_string(), "Hello ${first} ${last|upper}!");
        assert!(parser.parse_interpolation("plain text").unwrap().is_none());
    }

    #[test]
    fn test_parser_caches_by_source_and_type() {
        let parser = ExpressionParser::new();
        let a = parser.parse("x.y", BindingType::Expression).unwrap();
        let b = parser.parse("x.y", BindingType::Expression).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        parser.parse("x.y", BindingType::Ref).unwrap();
        assert_eq!(parser.cached_count(), 2);
    }

    #[test]
    fn test_unparse_reparses_to_equal_tree() {
        for source in ["a.b[c](d, 'e')", "!(x > 1) && y", "$parent.items.length", "`a${b}c` + 1", "f`t`"] {
            let parsed = expr(source);
            assert_eq!(expr(&parsed.to_string()), parsed, "{source}");
        }
    }
}
