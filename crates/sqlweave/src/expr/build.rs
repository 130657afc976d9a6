//! Combinators for building expressions.

use super::{BinaryOp, Expr, HostFn, Lambda, UnaryOp};
use crate::dialect::TypeTag;
use crate::error::OrmResult;
use crate::value::Value;
use std::sync::Arc;

/// Reference a lambda parameter.
pub fn param(name: impl Into<String>) -> Expr {
    Expr::Param(name.into())
}

/// A constant.
pub fn value(v: impl Into<Value>) -> Expr {
    Expr::Constant(v.into())
}

/// A named captured value.
pub fn var(name: impl Into<String>, v: impl Into<Value>) -> Expr {
    Expr::Variable {
        name: name.into(),
        value: v.into(),
    }
}

/// A host computation, evaluated when the statement is compiled.
pub fn host<F>(label: impl Into<String>, f: F) -> Expr
where
    F: Fn() -> OrmResult<Value> + Send + Sync + 'static,
{
    Expr::Host {
        label: label.into(),
        thunk: HostFn(Arc::new(f)),
    }
}

/// Build a lambda over positional table sources.
pub fn lambda<I, S>(params: I, body: Expr) -> Lambda
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Lambda {
        params: params.into_iter().map(Into::into).collect(),
        body,
    }
}

/// Object construction. Pass `Some(entity)` to build a mapped type.
pub fn new_object<I, S>(entity: Option<&str>, members: I) -> Expr
where
    I: IntoIterator<Item = (S, Expr)>,
    S: Into<String>,
{
    Expr::New {
        entity: entity.map(str::to_string),
        members: members.into_iter().map(|(n, e)| (n.into(), e)).collect(),
    }
}

/// `test ? then : otherwise`
pub fn when(test: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::Conditional {
        test: Box::new(test),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn field(self, member: impl Into<String>) -> Expr {
        Expr::Member {
            target: Box::new(self),
            member: member.into(),
        }
    }

    /// Instance method call.
    pub fn call<I>(self, method: impl Into<String>, args: I) -> Expr
    where
        I: IntoIterator<Item = Expr>,
    {
        Expr::Call {
            target: Some(Box::new(self)),
            tag: None,
            method: method.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Static call on a built-in type.
    pub fn call_static<I>(tag: TypeTag, method: impl Into<String>, args: I) -> Expr
    where
        I: IntoIterator<Item = Expr>,
    {
        Expr::Call {
            target: None,
            tag: Some(tag),
            method: method.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn now() -> Expr {
        Self::call_static(TypeTag::DateTime, "now", [])
    }

    pub fn utc_now() -> Expr {
        Self::call_static(TypeTag::DateTime, "utc_now", [])
    }

    pub fn today() -> Expr {
        Self::call_static(TypeTag::DateTime, "today", [])
    }

    pub fn new_uuid() -> Expr {
        Self::call_static(TypeTag::Uuid, "new", [])
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Div, other)
    }

    pub fn rem(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Mod, other)
    }

    pub fn coalesce(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Coalesce, other)
    }

    pub fn is_null(self) -> Expr {
        self.eq(Expr::Constant(Value::Null))
    }

    pub fn is_not_null(self) -> Expr {
        self.ne(Expr::Constant(Value::Null))
    }

    pub fn negate(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    /// Collection membership: `self` is the collection.
    pub fn contains(self, item: Expr) -> Expr {
        self.call("contains", [item])
    }

    /// Membership of `self` in a collection.
    pub fn is_in(self, collection: Expr) -> Expr {
        collection.contains(self)
    }

    pub fn starts_with(self, prefix: Expr) -> Expr {
        self.call("starts_with", [prefix])
    }

    pub fn ends_with(self, suffix: Expr) -> Expr {
        self.call("ends_with", [suffix])
    }

    /// Aggregate over a grouping: `g.sum(lambda(["o"], ...))`.
    pub fn aggregate(self, function: &str, selector: Option<Lambda>) -> Expr {
        let args = selector
            .map(|l| vec![Expr::Lambda(Box::new(l))])
            .unwrap_or_default();
        self.call(function, args)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}
