use super::{BinaryOp, Expr, Lambda, UnaryOp};
use std::fmt;

fn op_text(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Coalesce => "??",
        other => other.sql(),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(name) => f.write_str(name),
            Expr::Member { target, member } => write!(f, "{target}.{member}"),
            Expr::Call {
                target,
                tag,
                method,
                args,
            } => {
                match (target, tag) {
                    (Some(t), _) => write!(f, "{t}.{method}(")?,
                    (None, Some(tag)) => write!(f, "{tag:?}::{method}(")?,
                    (None, None) => write!(f, "{method}(")?,
                }
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op_text(*op)),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
            },
            Expr::New { entity, members } => {
                f.write_str("new ")?;
                if let Some(e) = entity {
                    write!(f, "{e} ")?;
                }
                f.write_str("{ ")?;
                for (i, (name, e)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {e}")?;
                }
                f.write_str(" }")
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => write!(f, "({test} ? {then} : {otherwise})"),
            Expr::Constant(v) => write!(f, "{v}"),
            Expr::Variable { name, .. } => f.write_str(name),
            Expr::Host { label, .. } => f.write_str(label),
            Expr::Lambda(l) => write!(f, "{l}"),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.params.as_slice() {
            [one] => write!(f, "{one} => {}", self.body),
            many => write!(f, "({}) => {}", many.join(", "), self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{lambda, param, value};

    #[test]
    fn renders_readable_text() {
        let l = lambda(["u"], param("u").field("age").ge(value(18_i32)));
        assert_eq!(l.to_string(), "u => (u.age >= 18)");
        let e = param("o").field("placed").call("format", [value("yyyy")]);
        assert_eq!(e.to_string(), "o.placed.format(\"yyyy\")");
    }
}
