/// Threshold expressions: a closed boolean language over named signals.
///
/// Expressions are compiled once from configuration into an [`Expr`] tree
/// and evaluated by tree walk against a [`Bindings`] map. Nothing is ever
/// executed as source text.

use rustc_hash::FxHashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("unknown signal: {0}")]
    UnknownSignal(String),
    #[error("cannot order {0} and {1}")]
    TypeMismatch(&'static str, &'static str),
}

/// A value flowing through an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Bool(_) => "bool",
        }
    }

    /// Booleans as-is, numbers when non-zero, text when non-empty.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }
}

/// Signal name to value, resolved once per step.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: FxHashMap<String, Value>,
}

impl Bindings {
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Numeric signal, 0 when missing or not a number.
    pub fn number(&self, name: &str) -> f64 {
        match self.values.get(name) {
            Some(Value::Number(n)) => *n,
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    SignalRef(String),
    Comparison {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Compile an expression string.
    ///
    /// Grammar:
    /// - `or  := and (('||' | 'or') and)*`
    /// - `and := not (('&&' | 'and') not)*`
    /// - `not := ('!' | 'not') not | cmp`
    /// - `cmp := primary (op primary)?` with `== != === !== < <= > >=`
    /// - `primary := number | 'text' | "text" | true | false | a.b.c | ( or )`
    pub fn parse(input: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some((position, tok)) = parser.tokens.get(parser.pos) {
            return Err(ExprError::Parse {
                position: *position,
                message: format!("unexpected {tok}"),
            });
        }
        Ok(expr)
    }

    pub fn eval(&self, bindings: &Bindings) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::SignalRef(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownSignal(name.clone())),
            Expr::Comparison { op, lhs, rhs } => {
                let l = lhs.eval(bindings)?;
                let r = rhs.eval(bindings)?;
                compare(*op, &l, &r).map(Value::Bool)
            }
            Expr::And(a, b) => {
                if !a.eval(bindings)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(b.eval(bindings)?.truthy()))
            }
            Expr::Or(a, b) => {
                if a.eval(bindings)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(b.eval(bindings)?.truthy()))
            }
            Expr::Not(e) => Ok(Value::Bool(!e.eval(bindings)?.truthy())),
        }
    }

    /// Evaluate to a boolean.
    pub fn holds(&self, bindings: &Bindings) -> Result<bool, ExprError> {
        self.eval(bindings).map(|v| v.truthy())
    }

    /// Every signal name the expression reads.
    pub fn signals(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_signals(&mut out);
        out
    }

    fn collect_signals<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::SignalRef(name) => out.push(name),
            Expr::Comparison { lhs, rhs, .. } => {
                lhs.collect_signals(out);
                rhs.collect_signals(out);
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect_signals(out);
                b.collect_signals(out);
            }
            Expr::Not(e) => e.collect_signals(out),
        }
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, ExprError> {
    match op {
        CmpOp::Eq => return Ok(l == r),
        CmpOp::Ne => return Ok(l != r),
        _ => {}
    }
    let (Value::Number(a), Value::Number(b)) = (l, r) else {
        return Err(ExprError::TypeMismatch(l.kind(), r.kind()));
    };
    Ok(match op {
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Text(s) => write!(f, "string '{s}'"),
            Token::Ident(s) => write!(f, "identifier '{s}'"),
            Token::Op(op) => write!(f, "operator {op:?}"),
            Token::And => write!(f, "'&&'"),
            Token::Or => write!(f, "'||'"),
            Token::Not => write!(f, "'!'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
        }
    }
}

fn parse_error(position: usize, message: impl Into<String>) -> ExprError {
    ExprError::Parse {
        position,
        message: message.into(),
    }
}

/// A number starts with a digit, a dot, or a minus directly before either.
fn starts_number(chars: &[char], i: usize) -> bool {
    let is_num = |c: &char| c.is_ascii_digit() || *c == '.';
    match chars[i] {
        '-' => chars.get(i + 1).is_some_and(is_num),
        c => is_num(&c),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Is chars[i..] the sequence `s`?
    let at = |i: usize, s: &str| {
        s.chars()
            .enumerate()
            .all(|(k, c)| chars.get(i + k) == Some(&c))
    };

    while i < len {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if at(i, "===") || at(i, "!==") {
            let op = if c == '=' { CmpOp::Eq } else { CmpOp::Ne };
            tokens.push((start, Token::Op(op)));
            i += 3;
            continue;
        }
        let two = [
            ("==", Token::Op(CmpOp::Eq)),
            ("!=", Token::Op(CmpOp::Ne)),
            ("<=", Token::Op(CmpOp::Le)),
            (">=", Token::Op(CmpOp::Ge)),
            ("&&", Token::And),
            ("||", Token::Or),
        ];
        if let Some((_, tok)) = two.iter().find(|(s, _)| at(i, *s)) {
            tokens.push((start, tok.clone()));
            i += 2;
            continue;
        }

        match c {
            '<' => tokens.push((start, Token::Op(CmpOp::Lt))),
            '>' => tokens.push((start, Token::Op(CmpOp::Gt))),
            '!' => tokens.push((start, Token::Not)),
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            '\'' | '"' => {
                let quote = c;
                let mut end = i + 1;
                while end < len && chars[end] != quote {
                    end += 1;
                }
                if end >= len {
                    return Err(parse_error(start, "unterminated string"));
                }
                tokens.push((start, Token::Text(chars[i + 1..end].iter().collect())));
                i = end + 1;
                continue;
            }
            _ if starts_number(&chars, i) => {
                let mut end = i + 1;
                while end < len {
                    let d = chars[end];
                    let exponent_sign = (d == '-' || d == '+') && matches!(chars[end - 1], 'e' | 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        end += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[i..end].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| parse_error(start, format!("invalid number '{text}'")))?;
                tokens.push((start, Token::Number(n)));
                i = end;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i + 1;
                while end < len
                    && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '.')
                {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                if word.ends_with('.') || word.contains("..") {
                    return Err(parse_error(start, format!("malformed name '{word}'")));
                }
                let tok = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                };
                tokens.push((start, tok));
                i = end;
                continue;
            }
            other => return Err(parse_error(start, format!("unexpected character '{other}'"))),
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Comparison {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Text(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                _ => Expr::SignalRef(name),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(parse_error(position, "unclosed parenthesis")),
                }
            }
            Some(tok) => Err(parse_error(position, format!("unexpected {tok}"))),
            None => Err(parse_error(position, "unexpected end of expression")),
        }
    }
}
