//! Calculator tool: evaluates arithmetic for unit and ratio work.
//!
//! Grammar (recursive descent, lowest precedence first):
//!
//! ```text
//! expr    = term (('+' | '-') term)*
//! term    = unary (('*' | '/') unary)*
//! unary   = '-' unary | power
//! power   = atom ('^' unary)?
//! atom    = NUMBER | IDENT | IDENT '(' expr ')' | '(' expr ')'
//! ```
//!
//! Identifiers are the constants `pi` and `e`, and the functions `sqrt`,
//! `ln`, `log10`, `exp`, `abs`. Numbers accept scientific notation
//! (`6.022e23`).

use async_trait::async_trait;
use matagent_core::error::ToolError;
use matagent_core::schema::{FieldKind, InputSchema};
use matagent_core::tool::{Tool, ToolSpec};
use std::iter::Peekable;
use std::str::Chars;

pub struct CalculatorTool {
    spec: ToolSpec,
}

impl CalculatorTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "calculator",
                "Evaluate a mathematical expression. Supports + - * / ^, parentheses, \
                 scientific notation, pi, e, sqrt, ln, log10, exp and abs.",
                InputSchema::new().required(
                    "expression",
                    FieldKind::String,
                    "The expression to evaluate, e.g. '(2 + 3) * 4' or '1.6e-19 * 3'",
                ),
            ),
        }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments {
                tool_name: self.spec.name.clone(),
                reason: "missing 'expression'".into(),
            })?;

        let value = evaluate(expr).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: self.spec.name.clone(),
            reason,
        })?;
        Ok(format_number(value))
    }
}

/// Integers print without a fractional part; everything else keeps full precision.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluate an expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: expr.chars().peekable(),
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if let Some(c) = parser.chars.peek() {
        return Err(format!("Unexpected character: '{c}'"));
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(value)
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    /// Consume `want` if it is the next non-space character.
    fn eat(&mut self, want: char) -> bool {
        self.skip_ws();
        self.chars.next_if_eq(&want).is_some()
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        loop {
            if self.eat('+') {
                acc += self.term()?;
            } else if self.eat('-') {
                acc -= self.term()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        loop {
            if self.eat('*') {
                acc *= self.unary()?;
            } else if self.eat('/') {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                acc /= divisor;
            } else {
                return Ok(acc);
            }
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.eat('-') {
            return Ok(-self.unary()?);
        }
        self.power()
    }

    // Right-associative, binds tighter than unary minus on its left:
    // -2^2 = -4, 2^-1 = 0.5
    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if self.eat('^') {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, String> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                if !self.eat(')') {
                    return Err("Expected closing parenthesis".into());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => {
                let name = self.ident();
                self.named(&name)
            }
            Some(c) => Err(format!("Unexpected character: '{c}'")),
            None => Err("Unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let mut text = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
            text.push(c);
        }
        if let Some(e) = self.chars.next_if(|c| *c == 'e' || *c == 'E') {
            text.push(e);
            if let Some(sign) = self.chars.next_if(|c| *c == '+' || *c == '-') {
                text.push(sign);
            }
            while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit()) {
                text.push(c);
            }
        }
        text.parse().map_err(|_| format!("Invalid number: {text}"))
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_alphanumeric()) {
            name.push(c);
        }
        name
    }

    fn named(&mut self, name: &str) -> Result<f64, String> {
        match name {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }
        let func: fn(f64) -> f64 = match name {
            "sqrt" => f64::sqrt,
            "ln" => f64::ln,
            "log10" => f64::log10,
            "exp" => f64::exp,
            "abs" => f64::abs,
            _ => return Err(format!("Unknown identifier: {name}")),
        };
        if !self.eat('(') {
            return Err(format!("Expected '(' after {name}"));
        }
        let arg = self.expr()?;
        if !self.eat(')') {
            return Err("Expected closing parenthesis".into());
        }
        Ok(func(arg))
    }
}
