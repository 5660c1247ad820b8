//! Static types of CAOS values.
//!
//! Variables take the type of their initializer. Parameters and call
//! results are `Unknown`: operations involving them are accepted here and
//! checked by the executor instead.

use std::fmt;

use crate::ast::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Integer,
    Real,
    Str,
    Boolean,
    Unknown,
    Function { arity: usize },
}

impl Type {
    pub fn is_numeric(self) -> bool {
        matches!(self, Type::Integer | Type::Real)
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// Whether a value of type `value` may be stored in a slot of type
    /// `self`. Integers widen to reals.
    pub fn accepts(self, value: Type) -> bool {
        match (self, value) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Real, Type::Integer) => true,
            (Type::Function { .. }, _) | (_, Type::Function { .. }) => false,
            (a, b) => a == b,
        }
    }

    /// Whether `==`/`!=` may compare the two types.
    pub fn comparable_with(self, other: Type) -> bool {
        match (self, other) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (Type::Function { .. }, _) | (_, Type::Function { .. }) => false,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Integer => f.write_str("integer"),
            Type::Real => f.write_str("real"),
            Type::Str => f.write_str("string"),
            Type::Boolean => f.write_str("boolean"),
            Type::Unknown => f.write_str("unknown"),
            Type::Function { arity } => write!(f, "function/{arity}"),
        }
    }
}

fn numeric_result(lhs: Type, rhs: Type) -> Type {
    if lhs == Type::Integer && rhs == Type::Integer {
        Type::Integer
    } else if lhs.is_unknown() || rhs.is_unknown() {
        Type::Unknown
    } else {
        Type::Real
    }
}

fn numeric_or_unknown(ty: Type) -> bool {
    ty.is_numeric() || ty.is_unknown()
}

/// Result type of a binary operator, or `None` when the operands are
/// incompatible.
pub fn binary_result(op: BinaryOp, lhs: Type, rhs: Type) -> Option<Type> {
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Type::Str, Type::Str) => Some(Type::Str),
            (Type::Str, Type::Unknown) | (Type::Unknown, Type::Str) => Some(Type::Unknown),
            (l, r) if numeric_or_unknown(l) && numeric_or_unknown(r) => {
                Some(numeric_result(l, r))
            }
            _ => None,
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            if numeric_or_unknown(lhs) && numeric_or_unknown(rhs) {
                Some(numeric_result(lhs, rhs))
            } else {
                None
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let numbers = numeric_or_unknown(lhs) && numeric_or_unknown(rhs);
            let strings = matches!(lhs, Type::Str | Type::Unknown)
                && matches!(rhs, Type::Str | Type::Unknown);
            (numbers || strings).then_some(Type::Boolean)
        }
        BinaryOp::Eq | BinaryOp::Ne => lhs.comparable_with(rhs).then_some(Type::Boolean),
        BinaryOp::And | BinaryOp::Or => {
            let logical = |t: Type| matches!(t, Type::Boolean | Type::Unknown);
            (logical(lhs) && logical(rhs)).then_some(Type::Boolean)
        }
    }
}

/// Result type of a unary operator, or `None` when the operand is
/// incompatible.
pub fn unary_result(op: UnaryOp, operand: Type) -> Option<Type> {
    match (op, operand) {
        (UnaryOp::Neg, t) if numeric_or_unknown(t) => Some(t),
        (UnaryOp::Not, Type::Boolean | Type::Unknown) => Some(Type::Boolean),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_promotes_to_real() {
        assert_eq!(
            binary_result(BinaryOp::Add, Type::Integer, Type::Integer),
            Some(Type::Integer)
        );
        assert_eq!(
            binary_result(BinaryOp::Mul, Type::Integer, Type::Real),
            Some(Type::Real)
        );
        assert_eq!(
            binary_result(BinaryOp::Sub, Type::Unknown, Type::Real),
            Some(Type::Unknown)
        );
    }

    #[test]
    fn strings_concatenate_but_do_not_subtract() {
        assert_eq!(binary_result(BinaryOp::Add, Type::Str, Type::Str), Some(Type::Str));
        assert_eq!(binary_result(BinaryOp::Add, Type::Str, Type::Integer), None);
        assert_eq!(binary_result(BinaryOp::Sub, Type::Str, Type::Str), None);
        assert_eq!(
            binary_result(BinaryOp::Lt, Type::Str, Type::Str),
            Some(Type::Boolean)
        );
    }

    #[test]
    fn logic_requires_booleans() {
        assert_eq!(binary_result(BinaryOp::And, Type::Boolean, Type::Integer), None);
        assert_eq!(
            binary_result(BinaryOp::Or, Type::Boolean, Type::Unknown),
            Some(Type::Boolean)
        );
        assert_eq!(unary_result(UnaryOp::Not, Type::Integer), None);
        assert_eq!(unary_result(UnaryOp::Neg, Type::Real), Some(Type::Real));
    }

    #[test]
    fn assignment_compatibility() {
        assert!(Type::Real.accepts(Type::Integer));
        assert!(!Type::Integer.accepts(Type::Real));
        assert!(Type::Str.accepts(Type::Unknown));
        assert!(!Type::Boolean.accepts(Type::Str));
        assert!(Type::Integer.comparable_with(Type::Real));
        assert!(!Type::Str.comparable_with(Type::Boolean));
    }
}
