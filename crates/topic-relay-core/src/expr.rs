//! Restricted expression language behind the `EVAL:` and `DICT:` markers.
//!
//! Only literals (numbers, strings, booleans, null, lists, dicts) and the
//! arithmetic operators `+ - * / // %` with parentheses are understood.
//! There are no names, calls or attribute lookups.

use crate::error::{RelayError, Result};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{char, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::{fold_many0, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use serde_json::{Map, Number, Value};

/// Deepest bracket or unary `-` nesting accepted.
pub const MAX_NESTING: usize = 64;

/// Most binary operators accepted in one expression.
pub const MAX_OPERATORS: usize = 1024;

/// Longest string an expression may produce, in bytes.
pub const MAX_STRING_LEN: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map_res(
        recognize(tuple((
            digit1,
            opt(pair(char('.'), digit0)),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |text: &str| {
            if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
                text.parse::<f64>().map(Expr::Float).map_err(|e| e.to_string())
            } else {
                text.parse::<i64>().map(Expr::Int).map_err(|e| e.to_string())
            }
        },
    )(input)
}

fn escape_sequence(input: &str) -> IResult<&str, &str> {
    alt((
        value("\\", tag("\\")),
        value("'", tag("'")),
        value("\"", tag("\"")),
        value("\n", tag("n")),
        value("\t", tag("t")),
        value("\r", tag("r")),
    ))(input)
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(
            opt(escaped_transform(
                is_not("\\'"),
                '\\',
                escape_sequence,
            )),
            Option::unwrap_or_default,
        ),
        char('\''),
    )(input)
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                escape_sequence,
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn string(input: &str) -> IResult<&str, Expr> {
    map(alt((single_quoted, double_quoted)), Expr::Str)(input)
}

fn keyword(input: &str) -> IResult<&str, Expr> {
    alt((
        value(Expr::Bool(true), alt((tag("true"), tag("True")))),
        value(Expr::Bool(false), alt((tag("false"), tag("False")))),
        value(Expr::Null, alt((tag("null"), tag("None")))),
    ))(input)
}

fn list(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            ws(char('[')),
            terminated(separated_list0(ws(char(',')), expr), opt(ws(char(',')))),
            ws(char(']')),
        ),
        Expr::List,
    )(input)
}

fn dict(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            ws(char('{')),
            terminated(
                separated_list0(ws(char(',')), separated_pair(expr, ws(char(':')), expr)),
                opt(ws(char(','))),
            ),
            ws(char('}')),
        ),
        Expr::Dict,
    )(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        number,
        string,
        keyword,
        list,
        dict,
        delimited(char('('), expr, char(')')),
    )))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), unary), |e| Expr::Neg(Box::new(e))),
        atom,
    ))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(Op::FloorDiv, tag("//")),
                value(Op::Div, char('/')),
                value(Op::Mul, char('*')),
                value(Op::Rem, char('%')),
            ))),
            unary,
        ),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
    )(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    fold_many0(
        pair(
            ws(alt((value(Op::Add, char('+')), value(Op::Sub, char('-'))))),
            term,
        ),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
    )(input)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn fail(message: impl Into<String>) -> RelayError {
    RelayError::Expression(message.into())
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Self> {
        let Value::Number(n) = value else {
            return None;
        };
        match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn float(f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| fail("result is not a finite number"))
}

fn overflow() -> RelayError {
    fail("integer overflow")
}

fn arithmetic(op: Op, lhs: Num, rhs: Num) -> Result<Value> {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => match op {
            Op::Add => a.checked_add(b).map(Value::from).ok_or_else(overflow),
            Op::Sub => a.checked_sub(b).map(Value::from).ok_or_else(overflow),
            Op::Mul => a.checked_mul(b).map(Value::from).ok_or_else(overflow),
            Op::Div => {
                if b == 0 {
                    return Err(fail("division by zero"));
                }
                float(a as f64 / b as f64)
            }
            Op::FloorDiv => {
                if b == 0 {
                    return Err(fail("division by zero"));
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let floored = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
                Ok(Value::from(floored))
            }
            Op::Rem => {
                if b == 0 {
                    return Err(fail("modulo by zero"));
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                let r = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
                Ok(Value::from(r))
            }
        },
        (lhs, rhs) => {
            let (a, b) = (lhs.as_f64(), rhs.as_f64());
            match op {
                Op::Add => float(a + b),
                Op::Sub => float(a - b),
                Op::Mul => float(a * b),
                Op::Div | Op::FloorDiv | Op::Rem if b == 0.0 => Err(fail("division by zero")),
                Op::Div => float(a / b),
                Op::FloorDiv => float((a / b).floor()),
                Op::Rem => {
                    let r = a % b;
                    float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })
                }
            }
        }
    }
}

fn check_len(len: Option<usize>) -> Result<usize> {
    match len {
        Some(len) if len <= MAX_STRING_LEN => Ok(len),
        _ => Err(fail(format!("string result exceeds {MAX_STRING_LEN} bytes"))),
    }
}

fn repeat(text: &str, times: i64) -> Result<Value> {
    let times = usize::try_from(times).unwrap_or(0);
    check_len(text.len().checked_mul(times))?;
    Ok(Value::String(text.repeat(times)))
}

fn binary(op: Op, lhs: Value, rhs: Value) -> Result<Value> {
    match (op, &lhs, &rhs) {
        (Op::Add, Value::String(a), Value::String(b)) => {
            check_len(a.len().checked_add(b.len()))?;
            Ok(Value::String(format!("{a}{b}")))
        }
        (Op::Add, Value::Array(a), Value::Array(b)) => {
            Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Op::Mul, Value::String(s), Value::Number(n)) | (Op::Mul, Value::Number(n), Value::String(s)) => {
            let times = n.as_i64().ok_or_else(|| fail("can only repeat a string by an integer"))?;
            repeat(s, times)
        }
        _ => match (Num::from_value(&lhs), Num::from_value(&rhs)) {
            (Some(a), Some(b)) => arithmetic(op, a, b),
            _ => Err(fail(format!(
                "unsupported operands for {op:?}: {lhs} and {rhs}"
            ))),
        },
    }
}

fn eval(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Int(i) => Ok(Value::from(*i)),
        Expr::Float(f) => float(*f),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::List(items) => items.iter().map(eval).collect::<Result<Vec<_>>>().map(Value::Array),
        Expr::Dict(pairs) => {
            let mut map = Map::new();
            for (key, val) in pairs {
                let Value::String(key) = eval(key)? else {
                    return Err(fail("dict keys must be strings"));
                };
                map.insert(key, eval(val)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Neg(inner) => match Num::from_value(&eval(inner)?) {
            Some(Num::Int(i)) => i.checked_neg().map(Value::from).ok_or_else(overflow),
            Some(Num::Float(f)) => float(-f),
            None => Err(fail("unary '-' needs a number")),
        },
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs)?, eval(rhs)?),
    }
}

/// Reject input whose parse tree would nest deeper than the recursive
/// parser and evaluator can handle. String literals are skipped.
fn check_shape(source: &str) -> Result<()> {
    let mut depth = 0usize;
    let mut minus_run = 0usize;
    let mut operators = 0usize;
    let mut quote = None;
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => {
                    chars.next();
                }
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if matches!(c, '+' | '-' | '*' | '/' | '%') {
            operators += 1;
        }
        if c == '-' {
            minus_run += 1;
        } else if !c.is_whitespace() {
            minus_run = 0;
        }

        if depth + minus_run > MAX_NESTING {
            return Err(fail(format!("expression nests deeper than {MAX_NESTING} levels")));
        }
        if operators > MAX_OPERATORS {
            return Err(fail(format!("expression has more than {MAX_OPERATORS} operators")));
        }
    }
    Ok(())
}

/// Parse and evaluate `source`. The whole input must form one expression.
pub fn evaluate(source: &str) -> Result<Value> {
    check_shape(source)?;
    let (_, parsed) = all_consuming(ws(expr))(source)
        .map_err(|_| fail(format!("cannot parse '{source}'")))?;
    eval(&parsed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
