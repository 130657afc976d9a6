//! Query/mutation expression trees.
//!
//! Expressions are built explicitly through the combinators in this module
//! (`param("o").field("total").gt(value(100))`) and handed to a statement
//! builder inside a [`Lambda`] whose parameters name the table sources the
//! body refers to.

mod build;
mod display;
pub(crate) mod eval;

pub use build::{host, lambda, new_object, param, value, var, when};

use crate::dialect::TypeTag;
use crate::error::OrmResult;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Coalesce,
}

impl BinaryOp {
    /// SQL operator symbol. `Coalesce` renders as a function instead.
    pub fn sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Coalesce => "COALESCE",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A host computation evaluated once, at compile time.
#[derive(Clone)]
pub struct HostFn(pub(crate) Arc<dyn Fn() -> OrmResult<Value> + Send + Sync>);

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFn")
    }
}

/// An expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Reference to a lambda parameter (a table source).
    Param(String),
    /// `target.member`
    Member { target: Box<Expr>, member: String },
    /// Instance (`target.method(args)`) or static (`Type::method(args)`) call.
    Call {
        target: Option<Box<Expr>>,
        tag: Option<TypeTag>,
        method: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Object construction. `entity` names the mapped type being built, if any.
    New {
        entity: Option<String>,
        members: Vec<(String, Expr)>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Constant(Value),
    /// A named captured value. Bound once per statement however often it appears.
    Variable { name: String, value: Value },
    Host { label: String, thunk: HostFn },
    /// A nested lambda, e.g. an aggregate's selector.
    Lambda(Box<Lambda>),
}

/// A lambda: parameter names bound positionally to the current table sources.
#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
}

impl Expr {
    /// The parameter a member chain is rooted at, if any.
    pub fn root_param(&self) -> Option<&str> {
        match self {
            Expr::Param(name) => Some(name),
            Expr::Member { target, .. } => target.root_param(),
            _ => None,
        }
    }

    /// Whether any lambda parameter occurs in this expression.
    pub fn contains_param(&self) -> bool {
        match self {
            Expr::Param(_) => true,
            Expr::Member { target, .. } => target.contains_param(),
            Expr::Call { target, args, .. } => {
                target.as_ref().is_some_and(|t| t.contains_param())
                    || args.iter().any(Expr::contains_param)
            }
            Expr::Binary { left, right, .. } => left.contains_param() || right.contains_param(),
            Expr::Unary { operand, .. } => operand.contains_param(),
            Expr::New { members, .. } => members.iter().any(|(_, e)| e.contains_param()),
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => test.contains_param() || then.contains_param() || otherwise.contains_param(),
            Expr::Lambda(_) => true,
            Expr::Constant(_) | Expr::Variable { .. } | Expr::Host { .. } => false,
        }
    }

    /// Evaluate a parameter-free expression on the host.
    pub fn evaluate(&self) -> OrmResult<Value> {
        eval::evaluate(self)
    }

    /// The member path below the root parameter: `o.customer.name` → `["customer", "name"]`.
    pub(crate) fn member_path(&self) -> Option<(&str, Vec<&str>)> {
        match self {
            Expr::Param(name) => Some((name, Vec::new())),
            Expr::Member { target, member } => {
                let (root, mut path) = target.member_path()?;
                path.push(member);
                Some((root, path))
            }
            _ => None,
        }
    }
}
