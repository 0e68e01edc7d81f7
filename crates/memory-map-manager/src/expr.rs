//! Evaluation of the arithmetic expressions allowed in map descriptions.
//!
//! Array sizes, bit counts, enum values, defaults and scaling factors may be
//! written as expressions over previously resolved defines, for example
//! `DEF_1 * 2` or `(1 << 4) - 1`. The grammar and operator semantics follow
//! Python arithmetic: `/` is true division, `//` and `%` floor toward
//! negative infinity and `**` binds tighter than unary minus on its left.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// A resolved value: an integer, a float or a string.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// An integer value.
    Int(i128),
    /// A floating point value.
    Float(f64),
    /// A string value.
    Str(String),
}

/// Names known while evaluating an expression.
pub type Env = BTreeMap<String, Scalar>;

/// Errors raised while evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// A name is not a known define.
    #[error("name '{0}' is not defined")]
    UnknownName(String),

    /// An operator was applied to unsupported operand types.
    #[error("unsupported operand type(s) for {op}: {lhs} and {rhs}")]
    Type {
        /// The operator.
        op: &'static str,
        /// Type of the left operand.
        lhs: &'static str,
        /// Type of the right operand.
        rhs: &'static str,
    },

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer result does not fit.
    #[error("integer overflow")]
    Overflow,

    /// The expression is malformed.
    #[error("invalid syntax in '{expr}': {message}")]
    Syntax {
        /// The source text.
        expr: String,
        /// What went wrong.
        message: String,
    },
}

impl ExprError {
    /// Check if this error could go away once more names are defined.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UnknownName(_) | Self::Type { .. })
    }
}

impl Scalar {
    /// Convert a description value into a scalar without evaluating it.
    ///
    /// Booleans become integers. Arrays, objects and null are rejected.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Int(i128::from(*b))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i128::from(i)))
                } else if let Some(u) = n.as_u64() {
                    Some(Self::Int(i128::from(u)))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Return the integer value, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Return the value as a float, if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Str(_) => None,
        }
    }

    /// Truncate a numeric value toward zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn truncated(&self) -> Self {
        match self {
            Self::Float(f) => Self::Int(f.trunc() as i128),
            other => other.clone(),
        }
    }

    /// Python-style name of the value's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(i) => {
                if let Ok(v) = i64::try_from(*i) {
                    serializer.serialize_i64(v)
                } else if let Ok(v) = u64::try_from(*i) {
                    serializer.serialize_u64(v)
                } else {
                    serializer.serialize_str(&i.to_string())
                }
            }
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

/// Evaluate an expression against the given names.
///
/// # Errors
///
/// Returns an error if the expression is malformed, uses an unknown name or
/// applies an operator to unsupported operands.
pub fn evaluate(source: &str, env: &Env) -> Result<Scalar, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        env,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.syntax("unexpected trailing input"));
    }
    Ok(value)
}

/// Evaluate a description value.
///
/// Numbers and booleans are taken as-is and strings are evaluated as
/// expressions.
///
/// # Errors
///
/// Returns an error if the value is null, a container, or a string that
/// fails to evaluate.
pub fn evaluate_value(value: &Value, env: &Env) -> Result<Scalar, ExprError> {
    match value {
        Value::String(s) => evaluate(s, env),
        other => Scalar::from_json(other).ok_or_else(|| ExprError::Syntax {
            expr: other.to_string(),
            message: "expected a number or an expression".to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i128),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 13] = [
    "**", "//", "<<", ">>", "+", "-", "*", "/", "%", "~", "&", "|", "^",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let syntax = |message: String| ExprError::Syntax {
        expr: source.to_string(),
        message,
    };
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                // exponent sign
                if (chars[i] == 'e' || chars[i] == 'E')
                    && matches!(chars.get(i + 1), Some('+' | '-'))
                    && !chars[start..i].iter().any(|c| matches!(c, 'x' | 'X' | 'b' | 'B' | 'o' | 'O'))
                {
                    i += 1;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            tokens.push(parse_number(&text).ok_or_else(|| syntax(format!("invalid number '{text}'")))?);
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i >= chars.len() {
                return Err(syntax("unterminated string".to_string()));
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| syntax(format!("unexpected character '{c}'")))?;
            tokens.push(Token::Op(*op));
            i += op.len();
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Option<Token> {
    let lower = text.to_ascii_lowercase();
    let radix = |prefix: &str, radix: u32| {
        lower
            .strip_prefix(prefix)
            .and_then(|digits| i128::from_str_radix(digits, radix).ok())
            .map(Token::Int)
    };
    if lower.starts_with("0x") {
        radix("0x", 16)
    } else if lower.starts_with("0o") {
        radix("0o", 8)
    } else if lower.starts_with("0b") {
        radix("0b", 2)
    } else if lower.contains(['.', 'e']) {
        lower.parse::<f64>().ok().map(Token::Float)
    } else {
        lower.parse::<i128>().ok().map(Token::Int)
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    env: &'a Env,
}

impl Parser<'_> {
    fn syntax(&self, message: &str) -> ExprError {
        ExprError::Syntax {
            expr: self.source.to_string(),
            message: message.to_string(),
        }
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        let op = self.peek_op().filter(|op| ops.contains(op))?;
        self.pos += 1;
        Some(op)
    }

    fn binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Scalar, ExprError>,
    ) -> Result<Scalar, ExprError> {
        let mut lhs = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let rhs = next(self)?;
            lhs = binary(op, &lhs, &rhs)?;
        }
        Ok(lhs)
    }

    fn expr(&mut self) -> Result<Scalar, ExprError> {
        self.binary_level(&["|"], Self::xor)
    }

    fn xor(&mut self) -> Result<Scalar, ExprError> {
        self.binary_level(&["^"], Self::and)
    }

    fn and(&mut self) -> Result<Scalar, ExprError> {
        self.binary_level(&["&"], Self::shift)
    }

    fn shift(&mut self) -> Result<Scalar, ExprError> {
        self.binary_level(&["<<", ">>"], Self::arith)
    }

    fn arith(&mut self) -> Result<Scalar, ExprError> {
        self.binary_level(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> Result<Scalar, ExprError> {
        self.binary_level(&["*", "/", "//", "%"], Self::factor)
    }

    fn factor(&mut self) -> Result<Scalar, ExprError> {
        if let Some(op) = self.eat_op(&["+", "-", "~"]) {
            let operand = self.factor()?;
            return unary(op, &operand);
        }
        self.power()
    }

    fn power(&mut self) -> Result<Scalar, ExprError> {
        let base = self.atom()?;
        if self.eat_op(&["**"]).is_some() {
            let exponent = self.factor()?;
            return binary("**", &base, &exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Scalar, ExprError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.syntax("unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::Int(i) => Ok(Scalar::Int(i)),
            Token::Float(f) => Ok(Scalar::Float(f)),
            Token::Str(s) => Ok(Scalar::Str(s)),
            Token::Ident(name) => match name.as_str() {
                "True" => Ok(Scalar::Int(1)),
                "False" => Ok(Scalar::Int(0)),
                _ => self
                    .env
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ExprError::UnknownName(name.clone())),
            },
            Token::LParen => {
                let value = self.expr()?;
                if self.tokens.get(self.pos) != Some(&Token::RParen) {
                    return Err(self.syntax("expected ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Token::RParen | Token::Op(_) => Err(self.syntax("unexpected token")),
        }
    }
}

fn unary(op: &'static str, operand: &Scalar) -> Result<Scalar, ExprError> {
    match (op, operand) {
        ("+", Scalar::Int(_) | Scalar::Float(_)) => Ok(operand.clone()),
        ("-", Scalar::Int(i)) => i.checked_neg().map(Scalar::Int).ok_or(ExprError::Overflow),
        ("-", Scalar::Float(f)) => Ok(Scalar::Float(-f)),
        ("~", Scalar::Int(i)) => Ok(Scalar::Int(!i)),
        _ => Err(ExprError::Type {
            op,
            lhs: operand.type_name(),
            rhs: operand.type_name(),
        }),
    }
}

fn floor_div(a: i128, b: i128) -> Option<i128> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i128, b: i128) -> Option<i128> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

#[allow(clippy::cast_precision_loss)]
fn binary(op: &'static str, lhs: &Scalar, rhs: &Scalar) -> Result<Scalar, ExprError> {
    let type_error = || ExprError::Type {
        op,
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    match (lhs, rhs) {
        (Scalar::Str(a), Scalar::Str(b)) if op == "+" => Ok(Scalar::Str(format!("{a}{b}"))),
        (Scalar::Int(a), Scalar::Int(b)) => int_binary(op, *a, *b).ok_or_else(|| {
            if matches!(op, "/" | "//" | "%") && *b == 0 {
                ExprError::DivisionByZero
            } else if matches!(op, "<<" | ">>") && *b < 0 {
                ExprError::Syntax {
                    expr: format!("{a} {op} {b}"),
                    message: "negative shift count".to_string(),
                }
            } else {
                ExprError::Overflow
            }
        }),
        (Scalar::Str(_), _) | (_, Scalar::Str(_)) => Err(type_error()),
        _ => {
            let (a, b) = (
                lhs.as_f64().ok_or_else(type_error)?,
                rhs.as_f64().ok_or_else(type_error)?,
            );
            float_binary(op, a, b)?.ok_or_else(type_error)
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn int_binary(op: &str, a: i128, b: i128) -> Option<Scalar> {
    let int = match op {
        "+" => a.checked_add(b),
        "-" => a.checked_sub(b),
        "*" => a.checked_mul(b),
        "//" => floor_div(a, b),
        "%" => floor_mod(a, b),
        "&" => Some(a & b),
        "|" => Some(a | b),
        "^" => Some(a ^ b),
        "<<" => u32::try_from(b).ok().and_then(|s| {
            let shifted = a.checked_shl(s)?;
            (shifted >> s == a).then_some(shifted)
        }),
        ">>" => u32::try_from(b).ok().map(|s| a >> s.min(127)),
        "/" => {
            return (b != 0).then(|| Scalar::Float(a as f64 / b as f64));
        }
        "**" => {
            if b < 0 {
                return Some(Scalar::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
        _ => None,
    };
    int.map(Scalar::Int)
}

fn float_binary(op: &str, a: f64, b: f64) -> Result<Option<Scalar>, ExprError> {
    let zero_check = || if b == 0.0 { Err(ExprError::DivisionByZero) } else { Ok(()) };
    let value = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => {
            zero_check()?;
            a / b
        }
        "//" => {
            zero_check()?;
            (a / b).floor()
        }
        "%" => {
            zero_check()?;
            a - b * (a / b).floor()
        }
        "**" => a.powf(b),
        _ => return Ok(None),
    };
    Ok(Some(Scalar::Float(value)))
}
