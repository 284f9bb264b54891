//! Tokenizer for binding expressions.

use crate::error::{Error, Result};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// An identifier, including keywords and `$this` / `$parent`.
    Identifier(String),
    /// A numeric literal.
    Number(f64),
    /// A string literal with escapes resolved.
    String(String),
    /// The opening backtick of a template literal. The parser reads the
    /// literal's parts with [`Lexer::scan_template_part`].
    TemplateStart,
    /// An operator or punctuator.
    Operator(&'static str),
    /// End of input.
    Eof,
}

/// A token and the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Character offset of the first character.
    pub start: usize,
}

// Longest first, so `===` wins over `==` and `=`.
const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{", "}", ",", ".", ":", "?", "=", "|",
    "&", "!", "+", "-", "*", "/", "%", "<", ">",
];

/// Splits expression source into [`Token`]s.
pub struct Lexer {
    chars: Vec<char>,
    position: usize,
}

impl Lexer {
    /// A lexer over `source`.
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
        }
    }

    /// Current character offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The next token.
    pub fn next_token(&mut self) -> Result<Spanned> {
        self.skip_whitespace();
        let start = self.position;
        let Some(c) = self.peek() else {
            return Ok(Spanned { token: Token::Eof, start });
        };

        let token = if is_identifier_start(c) {
            self.scan_identifier()
        } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) {
            self.scan_number()?
        } else if c == '\'' || c == '"' {
            self.advance();
            self.scan_string(c)?
        } else if c == '`' {
            self.advance();
            Token::TemplateStart
        } else {
            self.scan_operator()?
        };
        Ok(Spanned { token, start })
    }

    fn scan_identifier(&mut self) -> Token {
        let mut name = String::new();
        while let Some(c) = self.peek().filter(|c| is_identifier_part(*c)) {
            name.push(c);
            self.advance();
        }
        Token::Identifier(name)
    }

    fn scan_number(&mut self) -> Result<Token> {
        let start = self.position;
        let mut text = String::new();
        self.scan_digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            self.scan_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1).filter(|c| *c == '+' || *c == '-');
            let digit_at = if sign.is_some() { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.advance();
                if let Some(sign) = sign {
                    text.push(sign);
                    self.advance();
                }
                self.scan_digits(&mut text);
            }
        }
        if self.peek().is_some_and(is_identifier_start) {
            return Err(Error::parse("Identifier directly after number", self.position));
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| Error::parse(format!("Invalid number '{text}'"), start))
    }

    fn scan_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.advance();
        }
    }

    fn scan_string(&mut self, quote: char) -> Result<Token> {
        let start = self.position - 1;
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(Error::parse("Unterminated string", start)),
                Some(c) if c == quote => return Ok(Token::String(value)),
                Some('\\') => self.scan_escape(&mut value, start)?,
                Some(c) => value.push(c),
            }
        }
    }

    fn scan_escape(&mut self, value: &mut String, start: usize) -> Result<()> {
        let Some(escaped) = self.advance() else {
            return Err(Error::parse("Unterminated escape sequence", start));
        };
        match escaped {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            'b' => value.push('\u{0008}'),
            'f' => value.push('\u{000C}'),
            'v' => value.push('\u{000B}'),
            '0' => value.push('\0'),
            'u' => {
                let mut hex = String::new();
                for _ in 0..4 {
                    match self.advance() {
                        Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                        _ => return Err(Error::parse("Invalid unicode escape", self.position)),
                    }
                }
                let code = u32::from_str_radix(&hex, 16).map_err(|_| Error::parse("Invalid unicode escape", start))?;
                value.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            other => value.push(other),
        }
        Ok(())
    }

    /// Read template text up to the next `${` or the closing backtick.
    ///
    /// Returns the cooked text and whether the template ended. Call it right
    /// after [`Token::TemplateStart`] and again after each embedded
    /// expression's closing `}`.
    pub fn scan_template_part(&mut self) -> Result<(String, bool)> {
        let start = self.position;
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(Error::parse("Unterminated template literal", start)),
                Some('`') => return Ok((value, true)),
                Some('$') if self.peek() == Some('{') => {
                    self.advance();
                    return Ok((value, false));
                }
                Some('\\') => self.scan_escape(&mut value, start)?,
                Some(c) => value.push(c),
            }
        }
    }

    /// Read interpolation text up to the next `${` or the end of input.
    ///
    /// Returns the text and whether an expression follows. `\${` is kept as
    /// literal text.
    pub fn scan_interpolation_text(&mut self) -> (String, bool) {
        let mut value = String::new();
        while let Some(c) = self.advance() {
            match c {
                '\\' if self.peek() == Some('$') => {
                    value.push('$');
                    self.advance();
                }
                '$' if self.peek() == Some('{') => {
                    self.advance();
                    return (value, true);
                }
                c => value.push(c),
            }
        }
        (value, false)
    }

    fn scan_operator(&mut self) -> Result<Token> {
        for op in OPERATORS {
            if op.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c)) {
                self.position += op.chars().count();
                return Ok(Token::Operator(op));
            }
        }
        let c = self.peek().unwrap_or('\0');
        Err(Error::parse(format!("Unexpected character '{c}'"), self.position))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += 1;
        Some(c)
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let spanned = lexer.next_token().unwrap();
            if spanned.token == Token::Eof {
                return out;
            }
            out.push(spanned.token);
        }
    }

    #[test]
    fn test_lexer_operators_longest_match() {
        assert_eq!(
            tokens("a !== b || c"),
            vec![
                Token::Identifier("a".into()),
                Token::Operator("!=="),
                Token::Identifier("b".into()),
                Token::Operator("||"),
                Token::Identifier("c".into()),
            ]
        );
        assert_eq!(tokens("x | y"), vec![
            Token::Identifier("x".into()),
            Token::Operator("|"),
            Token::Identifier("y".into())
        ]);
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(tokens("42 3.5 .25 1e3"), vec![
            Token::Number(42.0),
            Token::Number(3.5),
            Token::Number(0.25),
            Token::Number(1000.0)
        ]);
        // A member access on an integer literal is not a decimal point.
        assert_eq!(tokens("1.x"), vec![Token::Number(1.0), Token::Operator("."), Token::Identifier("x".into())]);
    }

    #[test]
    fn test_lexer_strings_and_escapes() {
        assert_eq!(tokens(r#"'it\'s' "a\nb""#), vec![
            Token::String("it's".into()),
            Token::String("a\nb".into())
        ]);
        assert!(Lexer::new("'open").next_token().is_err());
    }

    #[test]
    fn test_lexer_template_parts() {
        let mut lexer = Lexer::new("`a${x}b`");
        assert_eq!(lexer.next_token().unwrap().token, Token::TemplateStart);
        assert_eq!(lexer.scan_template_part().unwrap(), ("a".to_string(), false));
        assert_eq!(lexer.next_token().unwrap().token, Token::Identifier("x".into()));
        assert_eq!(lexer.next_token().unwrap().token, Token::Operator("}"));
        assert_eq!(lexer.scan_template_part().unwrap(), ("b".to_string(), true));
    }

    #[test]
    fn test_lexer_interpolation_text() {
        let mut lexer = Lexer::new(r"cost: \${x} ${y}");
        assert_eq!(lexer.scan_interpolation_text(), ("cost: ${x} ".to_string(), true));
    }

    #[test]
    fn test_lexer_rejects_unknown_characters() {
        assert_eq!(Lexer::new("#").next_token().unwrap_err(), Error::parse("Unexpected character '#'", 0));
    }
}
