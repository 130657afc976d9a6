//! Host-side evaluation of parameter-free expressions (constant folding).

use super::{BinaryOp, Expr, UnaryOp};
use crate::dialect::{Dialect, TypeTag, lookup};
use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value, ValueType};
use chrono::TimeDelta;
use std::cmp::Ordering;

pub(super) fn evaluate(expr: &Expr) -> OrmResult<Value> {
    match expr {
        Expr::Constant(v) => Ok(v.clone()),
        Expr::Variable { value, .. } => Ok(value.clone()),
        Expr::Host { thunk, .. } => (thunk.0)(),
        Expr::Param(_) | Expr::Lambda(_) => Err(OrmError::unsupported(format!(
            "{expr} cannot be evaluated on the host"
        ))),
        Expr::Member { target, member } => match evaluate(target)? {
            Value::Record(r) => r
                .get(member)
                .cloned()
                .ok_or_else(|| OrmError::missing_member("record", member.as_str())),
            Value::Null => Ok(Value::Null),
            other => call_builtin(None, member, vec![other], expr),
        },
        Expr::Call {
            target,
            tag,
            method,
            args,
        } => {
            let mut operands = Vec::with_capacity(args.len() + 1);
            if let Some(t) = target {
                operands.push(evaluate(t)?);
            }
            for a in args {
                operands.push(evaluate(a)?);
            }
            call_builtin(*tag, method, operands, expr)
        }
        Expr::Binary { op, left, right } => binary(*op, evaluate(left)?, evaluate(right)?),
        Expr::Unary { op, operand } => unary(*op, evaluate(operand)?),
        Expr::New { members, .. } => {
            let mut record = Record::new();
            for (name, e) in members {
                record.set(name.clone(), evaluate(e)?);
            }
            Ok(Value::Record(record))
        }
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => match evaluate(test)? {
            Value::Bool(true) => evaluate(then),
            Value::Bool(false) | Value::Null => evaluate(otherwise),
            other => Err(OrmError::conversion(format!(
                "condition evaluated to {}, expected bool",
                other.kind_name()
            ))),
        },
    }
}

/// Run a built-in operation's host evaluator.
pub(crate) fn call_builtin(
    tag: Option<TypeTag>,
    method: &str,
    operands: Vec<Value>,
    expr: &Expr,
) -> OrmResult<Value> {
    let tag = tag.or_else(|| operands.first().and_then(|v| TypeTag::for_type(&v.value_type())));
    let Some(tag) = tag else {
        return Err(OrmError::unsupported(expr));
    };
    let rule = lookup(Dialect::Postgres, tag, method)
        .or_else(|| (tag == TypeTag::Date).then(|| lookup(Dialect::Postgres, TypeTag::DateTime, method)).flatten());
    match rule.and_then(|r| r.eval) {
        Some(eval) => eval(&operands),
        None => Err(OrmError::unsupported(expr)),
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (l.as_datetime(), r.as_datetime()) {
        return Some(a.cmp(&b));
    }
    match (l, r) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> OrmError {
    OrmError::conversion(format!(
        "cannot apply '{}' to {} and {}",
        op.sql(),
        l.kind_name(),
        r.kind_name()
    ))
}

/// Narrow an integer result back to the operands' common width.
fn integer(v: i64, l: &Value, r: &Value) -> Value {
    match l.value_type().merge(&r.value_type()) {
        ValueType::I16 => i16::try_from(v).map(Value::I16).unwrap_or(Value::I64(v)),
        ValueType::I32 => i32::try_from(v).map(Value::I32).unwrap_or(Value::I64(v)),
        _ => Value::I64(v),
    }
}

fn shift(dt: &Value, secs: f64) -> Option<Value> {
    let delta = TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)?;
    let shifted = dt.as_datetime()?.checked_add_signed(delta)?;
    Some(match dt {
        Value::DateTimeUtc(_) => Value::DateTimeUtc(shifted.and_utc()),
        Value::Date(_) => Value::Date(shifted.date()),
        _ => Value::DateTime(shifted),
    })
}

pub(crate) fn binary(op: BinaryOp, l: Value, r: Value) -> OrmResult<Value> {
    match op {
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = if l.is_null() || r.is_null() {
                l.is_null() && r.is_null()
            } else {
                compare(&l, &r) == Some(Ordering::Equal)
            };
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            let ord = compare(&l, &r).ok_or_else(|| mismatch(op, &l, &r))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::And | BinaryOp::Or => match (l.as_bool(), r.as_bool()) {
            (Some(a), Some(b)) => Ok(Value::Bool(if op == BinaryOp::And { a && b } else { a || b })),
            _ => Err(mismatch(op, &l, &r)),
        },
        BinaryOp::Coalesce => Ok(if l.is_null() { r } else { l }),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, l, r)
        }
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> OrmResult<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match (&l, &r) {
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => {
            return Ok(Value::Text(format!("{a}{b}")));
        }
        (Value::Interval(a), Value::Interval(b)) if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            return Ok(Value::Interval(if op == BinaryOp::Add { a + b } else { a - b }));
        }
        (dt, Value::Interval(secs)) if dt.value_type().is_temporal() => {
            let secs = match op {
                BinaryOp::Add => *secs,
                BinaryOp::Sub => -*secs,
                _ => return Err(mismatch(op, &l, &r)),
            };
            return shift(dt, secs).ok_or_else(|| OrmError::conversion("date arithmetic out of range"));
        }
        (a, b) if op == BinaryOp::Sub && a.value_type().is_temporal() && b.value_type().is_temporal() => {
            let (a, b) = (a.as_datetime(), b.as_datetime());
            if let (Some(a), Some(b)) = (a, b) {
                return Ok(Value::Interval((a - b).num_milliseconds() as f64 / 1000.0));
            }
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        let out = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            _ => a.checked_rem(b),
        };
        return out
            .map(|v| integer(v, &l, &r))
            .ok_or_else(|| OrmError::conversion(format!("integer overflow or division by zero in '{}'", op.sql())));
    }
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return Ok(Value::F64(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            _ => a % b,
        }));
    }
    Err(mismatch(op, &l, &r))
}

pub(crate) fn unary(op: UnaryOp, v: Value) -> OrmResult<Value> {
    match (op, v) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::I16(x)) => x.checked_neg().map(Value::I16).ok_or_else(|| neg_overflow(x)),
        (UnaryOp::Neg, Value::I32(x)) => x.checked_neg().map(Value::I32).ok_or_else(|| neg_overflow(x)),
        (UnaryOp::Neg, Value::I64(x)) => x.checked_neg().map(Value::I64).ok_or_else(|| neg_overflow(x)),
        (UnaryOp::Neg, Value::F64(x)) => Ok(Value::F64(-x)),
        (UnaryOp::Neg, Value::Interval(x)) => Ok(Value::Interval(-x)),
        (op, other) => Err(OrmError::conversion(format!(
            "cannot apply {op:?} to {}",
            other.kind_name()
        ))),
    }
}

fn neg_overflow(x: impl std::fmt::Display) -> OrmError {
    OrmError::conversion(format!("integer overflow negating {x}"))
}
