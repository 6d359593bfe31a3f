//! Expressions - Syntax Tree and Evaluation
//!
//! Expressions are width independent; evaluation reaches the template's
//! width only through the render context's callback.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};

use crate::callable::{BindError, UserCallable};
use crate::error::ErrorCode;
use crate::globals;
use crate::render::{panic_message, RenderContext, RenderFault, RenderResult};
use crate::value::{Value, ValuesList, ValuesMap};
use crate::width::CharWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Expr>,
    pub named: Vec<(String, Expr)>,
}

impl CallArgs {
    fn eval<W: CharWidth>(
        &self,
        ctx: &RenderContext<'_, W>,
    ) -> RenderResult<(ValuesList, Vec<(String, Value)>)> {
        let positional = self
            .positional
            .iter()
            .map(|arg| arg.eval(ctx))
            .collect::<RenderResult<ValuesList>>()?;
        let named = self
            .named
            .iter()
            .map(|(name, arg)| Ok((name.clone(), arg.eval(ctx)?)))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok((positional, named))
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, CallArgs),
    /// `value | name(args)`: the value becomes the first positional argument.
    Filter(Box<Expr>, String, CallArgs),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval<W: CharWidth>(&self, ctx: &RenderContext<'_, W>) -> RenderResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => Ok(ctx.lookup(name).cloned().unwrap_or_default()),
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|item| item.eval(ctx))
                    .collect::<RenderResult<ValuesList>>()?;
                Ok(Value::from(items))
            }
            Expr::Map(entries) => {
                let mut map = ValuesMap::new();
                for (key, item) in entries {
                    map.insert(key.clone(), item.eval(ctx)?);
                }
                Ok(Value::from(map))
            }
            Expr::Attr(base, name) => Ok(attribute(&base.eval(ctx)?, name)),
            Expr::Index(base, key) => Ok(subscript(&base.eval(ctx)?, &key.eval(ctx)?)),
            Expr::Call(callee, args) => {
                let target = callee.eval(ctx)?;
                let Value::Callable(callable) = &target else {
                    return Err(ctx
                        .callback()
                        .runtime_error(ErrorCode::InvalidValueType, vec![Value::from(target.kind())]));
                };
                let (positional, named) = args.eval(ctx)?;
                invoke(callable, positional, named, ctx, true)
            }
            Expr::Filter(target, name, args) => {
                let value = target.eval(ctx)?;
                let (mut positional, named) = args.eval(ctx)?;
                positional.insert(0, value);
                if let Some(Value::Callable(callable)) = ctx.lookup(name) {
                    return invoke(callable, positional, named, ctx, true);
                }
                match globals::builtin_filter(name) {
                    Some(filter) => invoke(filter, positional, named, ctx, false),
                    None => Err(ctx
                        .callback()
                        .runtime_error(ErrorCode::UnknownFilter, vec![Value::from(name.as_str())])),
                }
            }
            Expr::Unary(op, operand) => {
                let value = operand.eval(ctx)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => Ok(i
                        .checked_neg()
                        .map_or(Value::Double(-(i as f64)), Value::Int)),
                    (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                    (UnaryOp::Neg, other) => Err(ctx.callback().runtime_error(
                        ErrorCode::InvalidValueType,
                        vec![Value::from("-"), Value::from(other.kind())],
                    )),
                }
            }
            Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        }
    }
}

/// Binds and calls `callable`. Builtin filters never read the caller's
/// scope, so `with_context` is false for them.
fn invoke<W: CharWidth>(
    callable: &UserCallable,
    positional: ValuesList,
    named: Vec<(String, Value)>,
    ctx: &RenderContext<'_, W>,
    with_context: bool,
) -> RenderResult<Value> {
    let mut params = callable.bind(positional, named).map_err(|err| match err {
        BindError::MissingMandatoryArgument(name) => ctx
            .callback()
            .runtime_error(ErrorCode::MissingMandatoryArgument, vec![Value::from(name)]),
    })?;
    if with_context {
        params.context = ctx.context_view();
    }
    panic::catch_unwind(AssertUnwindSafe(|| callable.invoke(&params)))
        .map_err(|payload| RenderFault::Unexpected(panic_message(&*payload)))
}

fn attribute(base: &Value, name: &str) -> Value {
    match base {
        Value::Map(map) => map.get(name).cloned().unwrap_or_default(),
        Value::GenericMap(map) => map.value_by_name(name),
        _ => Value::Empty,
    }
}

fn subscript(base: &Value, key: &Value) -> Value {
    if let Some(index) = key.get_int() {
        return match base {
            Value::List(items) => list_index(items.len(), index)
                .map(|idx| items[idx].clone())
                .unwrap_or_default(),
            Value::GenericList(list) => list_index(list.size(), index)
                .map(|idx| list.value_at(idx))
                .unwrap_or_default(),
            _ => Value::Empty,
        };
    }
    match key.string_value() {
        Some(name) => attribute(base, &name),
        None => Value::Empty,
    }
}

/// Resolves a possibly negative index against `len`.
fn list_index(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn eval_binary<W: CharWidth>(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &RenderContext<'_, W>,
) -> RenderResult<Value> {
    let left = lhs.eval(ctx)?;
    match op {
        BinaryOp::Or if left.is_truthy() => return Ok(left),
        BinaryOp::And if !left.is_truthy() => return Ok(left),
        BinaryOp::Or | BinaryOp::And => return rhs.eval(ctx),
        _ => {}
    }
    let right = rhs.eval(ctx)?;
    let type_error = || {
        ctx.callback().runtime_error(
            ErrorCode::InvalidValueType,
            vec![
                Value::from(op.symbol()),
                Value::from(left.kind()),
                Value::from(right.kind()),
            ],
        )
    };

    let result = match op {
        BinaryOp::Eq => Value::Bool(left == right),
        BinaryOp::NotEq => Value::Bool(left != right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right).ok_or_else(type_error)?;
            Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        BinaryOp::In => Value::Bool(contains(&right, &left).ok_or_else(type_error)?),
        BinaryOp::Concat => {
            let callback = ctx.callback();
            let mut text = callback.as_target_string(&left);
            let tail = callback.as_target_string(&right);
            W::append(&mut text, Borrow::<W::Slice>::borrow(&tail));
            W::into_value(text)
        }
        BinaryOp::Add => match (&left, &right) {
            (Value::List(a), Value::List(b)) => {
                Value::from(a.iter().chain(b.iter()).cloned().collect::<ValuesList>())
            }
            _ if left.is_any_string() && right.is_any_string() => {
                let mut text = left.string_value().unwrap_or_default();
                text.push_str(&right.string_value().unwrap_or_default());
                Value::from(text)
            }
            _ => arithmetic(op, &left, &right).ok_or_else(type_error)?,
        },
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if is_zero(&right) => {
            return Err(ctx
                .callback()
                .runtime_error(ErrorCode::InvalidValueType, vec![Value::from("division by zero")]));
        }
        _ => arithmetic(op, &left, &right).ok_or_else(type_error)?,
    };
    Ok(result)
}

fn is_zero(value: &Value) -> bool {
    value.get_number().is_some_and(|n| n == 0.0)
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (left.get_number(), right.get_number()) {
        return a.partial_cmp(&b);
    }
    match (left.string_value(), right.string_value()) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

/// Whether `haystack` holds `needle`: list item, map key or substring.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::List(items) => Some(items.iter().any(|item| item == needle)),
        Value::GenericList(list) => Some(list.iter().any(|item| item == *needle)),
        Value::Map(map) => Some(needle.string_value().is_some_and(|key| map.contains_key(&key))),
        Value::GenericMap(map) => Some(needle.string_value().is_some_and(|key| map.has_value(&key))),
        _ => {
            let text = haystack.string_value()?;
            Some(text.contains(&needle.string_value()?))
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::FloorDiv => floor_div(a, b),
            BinaryOp::Mod => floor_mod(a, b),
            _ => None,
        };
        if let Some(result) = exact {
            return Some(Value::Int(result));
        }
    }

    let (a, b) = (left.get_number()?, right.get_number()?);
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => a - b * (a / b).floor(),
        _ => return None,
    };
    Some(Value::Double(result))
}

/// `None` for a zero divisor and for `i64::MIN // -1`.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let rem = a.wrapping_rem(b);
    if rem != 0 && (rem < 0) != (b < 0) {
        Some(rem + b)
    } else {
        Some(rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_index() {
        assert_eq!(list_index(3, 0), Some(0));
        assert_eq!(list_index(3, -1), Some(2));
        assert_eq!(list_index(3, 3), None);
        assert_eq!(list_index(3, -4), None);
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_mod(-7, 3), Some(2));
        assert_eq!(floor_mod(7, -3), Some(-2));
        assert_eq!(floor_div(1, 0), None);
    }

    #[test]
    fn test_integer_overflow_promotes_to_double() {
        let min = Value::from(i64::MIN);
        let minus_one = Value::from(-1);
        assert_eq!(
            arithmetic(BinaryOp::FloorDiv, &min, &minus_one),
            Some(Value::Double(9_223_372_036_854_775_808.0))
        );
        assert_eq!(arithmetic(BinaryOp::Mod, &min, &minus_one), Some(Value::Int(0)));
        assert_eq!(
            arithmetic(BinaryOp::Add, &Value::from(i64::MAX), &Value::from(1)),
            Some(Value::Double(9_223_372_036_854_775_808.0))
        );
    }

    #[test]
    fn test_arithmetic_promotes_to_double() {
        let sum = arithmetic(BinaryOp::Add, &Value::from(1), &Value::from(0.5));
        assert_eq!(sum, Some(Value::Double(1.5)));
        let quotient = arithmetic(BinaryOp::Div, &Value::from(3), &Value::from(2));
        assert_eq!(quotient, Some(Value::Double(1.5)));
        assert_eq!(arithmetic(BinaryOp::Sub, &Value::from("a"), &Value::from(1)), None);
    }

    #[test]
    fn test_contains() {
        let list = Value::from(vec![Value::from(1), Value::from("b")]);
        assert_eq!(contains(&list, &Value::from("b")), Some(true));
        assert_eq!(contains(&Value::from("hello"), &Value::from("ell")), Some(true));
        assert_eq!(contains(&Value::from(3), &Value::from(3)), None);
    }

    #[test]
    fn test_attribute_and_subscript() {
        let mut map = ValuesMap::new();
        map.insert("name".into(), Value::from("stencil"));
        let map = Value::from(map);
        assert_eq!(attribute(&map, "name"), Value::from("stencil"));
        assert_eq!(subscript(&map, &Value::from("name")), Value::from("stencil"));
        assert_eq!(attribute(&map, "missing"), Value::Empty);

        let list = Value::from(vec![10, 20, 30]);
        assert_eq!(subscript(&list, &Value::from(-1)), Value::from(30));
    }
}
