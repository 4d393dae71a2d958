//! Safe expression evaluation for parameter-bound numeric fields.
//!
//! A small hand-rolled tokenizer and recursive-descent parser over a
//! fixed grammar. The function whitelist is a hard boundary: there is
//! no identifier lookup beyond parameters and the two constants, no
//! assignment, and no control flow.
//!
//! Grammar:
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('+' | '-') unary | power
//! power  := atom ('**' unary)?
//! atom   := NUMBER | IDENT | IDENT '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use std::collections::BTreeMap;
use thiserror::Error;

/// Failure while parsing or evaluating an expression.
///
/// Always recoverable; callers keep the previously computed numeric
/// value for the affected field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {0}: {1}")]
    Syntax(usize, String),
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("function not allowed: {0}")]
    UnknownFunction(String),
    #[error("{name}() expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("domain error: {0}")]
    Domain(String),
}

/// Functions callable from expressions. Anything else is rejected.
const ALLOWED_FUNCTIONS: &[(&str, usize)] = &[
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("asin", 1),
    ("acos", 1),
    ("atan", 1),
    ("atan2", 2),
    ("sqrt", 1),
    ("abs", 1),
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleStar,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push((i, Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((i, Token::Minus));
                i += 1;
            }
            '*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    tokens.push((i, Token::DoubleStar));
                    i += 2;
                } else {
                    tokens.push((i, Token::Star));
                    i += 1;
                }
            }
            '/' => {
                tokens.push((i, Token::Slash));
                i += 1;
            }
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                // Exponent suffix: 1e-3, 2.5E+4
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &input[start..i];
                let value = text.parse::<f64>().map_err(|_| {
                    ExpressionError::Syntax(start, format!("invalid number: {text}"))
                })?;
                tokens.push((start, Token::Number(value)));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_string())));
            }
            _ => {
                return Err(ExpressionError::Syntax(
                    i,
                    format!("unexpected character: {c:?}"),
                ));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    pos: usize,
    params: &'a BTreeMap<String, f64>,
    input_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.input_len)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        t
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ExpressionError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExpressionError::Syntax(self.offset(), format!("expected {what}")))
        }
    }

    fn parse_expr(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.parse_unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    if rhs == 0.0 {
                        return Err(ExpressionError::Domain("division by zero".into()));
                    }
                    value /= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_unary(&mut self) -> Result<f64, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.parse_unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<f64, ExpressionError> {
        let base = self.parse_atom()?;
        if self.peek() == Some(&Token::DoubleStar) {
            self.pos += 1;
            // Right-associative; exponent may carry its own unary sign.
            let exp = self.parse_unary()?;
            let value = base.powf(exp);
            if !value.is_finite() {
                return Err(ExpressionError::Domain(format!(
                    "{base} ** {exp} is not finite"
                )));
            }
            return Ok(value);
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<f64, ExpressionError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.parse_call(&name)
                } else {
                    self.lookup(&name)
                }
            }
            Some(other) => Err(ExpressionError::Syntax(
                offset,
                format!("unexpected token: {other:?}"),
            )),
            None => Err(ExpressionError::Syntax(offset, "unexpected end of input".into())),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<f64, ExpressionError> {
        let expected = ALLOWED_FUNCTIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, arity)| *arity)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.parse_expr()?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.parse_expr()?);
            }
        }
        self.expect(Token::RParen, "')'")?;

        if args.len() != expected {
            return Err(ExpressionError::WrongArity {
                name: name.to_string(),
                expected,
                got: args.len(),
            });
        }
        apply_function(name, &args)
    }

    fn lookup(&self, name: &str) -> Result<f64, ExpressionError> {
        if let Some(v) = self.params.get(name) {
            return Ok(*v);
        }
        match name {
            "pi" => Ok(std::f64::consts::PI),
            "e" => Ok(std::f64::consts::E),
            _ => Err(ExpressionError::UnknownIdentifier(name.to_string())),
        }
    }
}

fn apply_function(name: &str, args: &[f64]) -> Result<f64, ExpressionError> {
    let value = match name {
        "sin" => args[0].sin(),
        "cos" => args[0].cos(),
        "tan" => args[0].tan(),
        "asin" => {
            if !(-1.0..=1.0).contains(&args[0]) {
                return Err(ExpressionError::Domain(format!(
                    "asin argument out of range: {}",
                    args[0]
                )));
            }
            args[0].asin()
        }
        "acos" => {
            if !(-1.0..=1.0).contains(&args[0]) {
                return Err(ExpressionError::Domain(format!(
                    "acos argument out of range: {}",
                    args[0]
                )));
            }
            args[0].acos()
        }
        "atan" => args[0].atan(),
        "atan2" => args[0].atan2(args[1]),
        "sqrt" => {
            if args[0] < 0.0 {
                return Err(ExpressionError::Domain(format!(
                    "sqrt of negative value: {}",
                    args[0]
                )));
            }
            args[0].sqrt()
        }
        "abs" => args[0].abs(),
        _ => unreachable!("function gated by whitelist"),
    };
    if !value.is_finite() {
        return Err(ExpressionError::Domain(format!(
            "{name}() produced a non-finite value"
        )));
    }
    Ok(value)
}

/// Evaluate an expression against the given parameter table.
pub fn evaluate(input: &str, params: &BTreeMap<String, f64>) -> Result<f64, ExpressionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExpressionError::Syntax(0, "empty expression".into()));
    }
    let tokens = tokenize(trimmed)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        params,
        input_len: trimmed.len(),
    };
    let value = parser.parse_expr()?;
    if parser.pos != tokens.len() {
        return Err(ExpressionError::Syntax(
            parser.offset(),
            "trailing input after expression".into(),
        ));
    }
    if !value.is_finite() {
        return Err(ExpressionError::Domain("expression is not finite".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn arithmetic_precedence() {
        let p = params(&[]);
        assert_relative_eq!(evaluate("1 + 2 * 3", &p).unwrap(), 7.0);
        assert_relative_eq!(evaluate("(1 + 2) * 3", &p).unwrap(), 9.0);
        assert_relative_eq!(evaluate("2 ** 3 ** 2", &p).unwrap(), 512.0);
        assert_relative_eq!(evaluate("-2 ** 2", &p).unwrap(), -4.0);
        assert_relative_eq!(evaluate("10 / 4", &p).unwrap(), 2.5);
    }

    #[test]
    fn scientific_notation() {
        let p = params(&[]);
        assert_relative_eq!(evaluate("1e-3", &p).unwrap(), 0.001);
        assert_relative_eq!(evaluate("2.5E+2", &p).unwrap(), 250.0);
    }

    #[test]
    fn parameters_and_constants() {
        let p = params(&[("L1", 2.0), ("theta", 0.5)]);
        assert_relative_eq!(evaluate("L1 * cos(theta)", &p).unwrap(), 2.0 * 0.5_f64.cos());
        assert_relative_eq!(evaluate("pi", &p).unwrap(), std::f64::consts::PI);
        assert_relative_eq!(evaluate("e", &p).unwrap(), std::f64::consts::E);
    }

    #[test]
    fn parameter_shadows_constant() {
        let p = params(&[("pi", 3.0)]);
        assert_relative_eq!(evaluate("pi", &p).unwrap(), 3.0);
    }

    #[test]
    fn whitelist_is_closed() {
        let p = params(&[]);
        assert!(matches!(
            evaluate("exec(1)", &p),
            Err(ExpressionError::UnknownFunction(_))
        ));
        assert!(matches!(
            evaluate("unknown_name", &p),
            Err(ExpressionError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            evaluate("atan2(1)", &p),
            Err(ExpressionError::WrongArity { .. })
        ));
    }

    #[test]
    fn domain_errors() {
        let p = params(&[]);
        assert!(matches!(evaluate("1/0", &p), Err(ExpressionError::Domain(_))));
        assert!(matches!(
            evaluate("asin(2)", &p),
            Err(ExpressionError::Domain(_))
        ));
        assert!(matches!(
            evaluate("sqrt(-1)", &p),
            Err(ExpressionError::Domain(_))
        ));
    }

    #[test]
    fn syntax_errors() {
        let p = params(&[]);
        assert!(matches!(evaluate("", &p), Err(ExpressionError::Syntax(..))));
        assert!(matches!(evaluate("1 +", &p), Err(ExpressionError::Syntax(..))));
        assert!(matches!(evaluate("(1", &p), Err(ExpressionError::Syntax(..))));
        assert!(matches!(evaluate("1 2", &p), Err(ExpressionError::Syntax(..))));
        assert!(matches!(evaluate("a = 1", &p), Err(ExpressionError::Syntax(..))));
    }

    #[test]
    fn atan2_two_arguments() {
        let p = params(&[]);
        assert_relative_eq!(
            evaluate("atan2(1, 1)", &p).unwrap(),
            std::f64::consts::FRAC_PI_4
        );
    }
}
