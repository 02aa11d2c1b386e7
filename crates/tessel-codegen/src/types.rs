use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tessel_syntax::{BinaryOp, TypeName, UnaryOp};

/// Types of host values, plus `Void` for procedures without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Float,
    String,
    Key,
    Vector,
    Rotation,
    List,
    Void,
}

impl ValueType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "integer" => ValueType::Integer,
            "float" => ValueType::Float,
            "string" => ValueType::String,
            "key" => ValueType::Key,
            "vector" => ValueType::Vector,
            "rotation" => ValueType::Rotation,
            "list" => ValueType::List,
            "void" => ValueType::Void,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Float)
    }

    fn is_text(self) -> bool {
        matches!(self, ValueType::String | ValueType::Key)
    }
}

impl From<TypeName> for ValueType {
    fn from(ty: TypeName) -> Self {
        match ty {
            TypeName::Integer => ValueType::Integer,
            TypeName::Float => ValueType::Float,
            TypeName::String => ValueType::String,
            TypeName::Key => ValueType::Key,
            TypeName::Vector => ValueType::Vector,
            TypeName::Rotation => ValueType::Rotation,
            TypeName::List => ValueType::List,
        }
    }
}

/// Whether a value of type `from` may be stored where `to` is expected
/// without an explicit cast. Returns the cast to insert, if any.
pub fn implicit_conversion(from: ValueType, to: ValueType) -> Option<Option<ValueType>> {
    if from == to {
        return Some(None);
    }
    match (from, to) {
        (ValueType::Integer, ValueType::Float) => Some(Some(ValueType::Float)),
        (ValueType::String, ValueType::Key) => Some(Some(ValueType::Key)),
        (ValueType::Key, ValueType::String) => Some(Some(ValueType::String)),
        _ => None,
    }
}

/// Result type of a binary operator, or `None` when the operands do not combine
pub fn binary_result(op: BinaryOp, lhs: ValueType, rhs: ValueType) -> Option<ValueType> {
    use ValueType::*;

    if lhs == Void || rhs == Void {
        return None;
    }

    let numeric = |l: ValueType, r: ValueType| -> Option<ValueType> {
        match (l, r) {
            (Integer, Integer) => Some(Integer),
            (Integer, Float) | (Float, Integer) | (Float, Float) => Some(Float),
            _ => None,
        }
    };

    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (List, _) | (_, List) => Some(List),
            (String, String) | (String, Key) | (Key, String) => Some(String),
            (Vector, Vector) => Some(Vector),
            (Rotation, Rotation) => Some(Rotation),
            _ => numeric(lhs, rhs),
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (Vector, Vector) => Some(Vector),
            (Rotation, Rotation) => Some(Rotation),
            _ => numeric(lhs, rhs),
        },
        BinaryOp::Mul => match (lhs, rhs) {
            (Vector, Vector) => Some(Float),
            (Vector, Integer) | (Vector, Float) | (Integer, Vector) | (Float, Vector) => {
                Some(Vector)
            }
            (Vector, Rotation) => Some(Vector),
            (Rotation, Rotation) => Some(Rotation),
            _ => numeric(lhs, rhs),
        },
        BinaryOp::Div => match (lhs, rhs) {
            (Vector, Integer) | (Vector, Float) => Some(Vector),
            (Vector, Rotation) => Some(Vector),
            (Rotation, Rotation) => Some(Rotation),
            _ => numeric(lhs, rhs),
        },
        BinaryOp::Mod => match (lhs, rhs) {
            (Integer, Integer) => Some(Integer),
            (Vector, Vector) => Some(Vector),
            _ => None,
        },
        BinaryOp::Eq | BinaryOp::Ne => {
            let comparable = lhs == rhs
                || (lhs.is_numeric() && rhs.is_numeric())
                || (lhs.is_text() && rhs.is_text());
            comparable.then_some(Integer)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            numeric(lhs, rhs).map(|_| Integer)
        }
        BinaryOp::And
        | BinaryOp::Or
        | BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::Shl
        | BinaryOp::Shr => (lhs == Integer && rhs == Integer).then_some(Integer),
    }
}

/// Result type of a unary operator
pub fn unary_result(op: UnaryOp, operand: ValueType) -> Option<ValueType> {
    match (op, operand) {
        (UnaryOp::Neg, ValueType::Integer | ValueType::Float | ValueType::Vector | ValueType::Rotation) => {
            Some(operand)
        }
        (UnaryOp::Not | UnaryOp::BitNot, ValueType::Integer) => Some(ValueType::Integer),
        _ => None,
    }
}

/// Whether an explicit `(type)` cast is permitted
pub fn castable(from: ValueType, to: ValueType) -> bool {
    use ValueType::*;
    if from == Void || to == Void {
        return false;
    }
    if from == to || to == String || to == List {
        return true;
    }
    match to {
        Integer => matches!(from, Float | String | Key),
        Float => matches!(from, Integer | String | Key),
        Key => matches!(from, String),
        Vector | Rotation => matches!(from, String | Key),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(
            binary_result(BinaryOp::Add, ValueType::Integer, ValueType::Float),
            Some(ValueType::Float)
        );
        assert_eq!(
            binary_result(BinaryOp::Mod, ValueType::Float, ValueType::Integer),
            None
        );
    }

    #[test]
    fn test_vector_products() {
        assert_eq!(
            binary_result(BinaryOp::Mul, ValueType::Vector, ValueType::Vector),
            Some(ValueType::Float)
        );
        assert_eq!(
            binary_result(BinaryOp::Mod, ValueType::Vector, ValueType::Vector),
            Some(ValueType::Vector)
        );
        assert_eq!(
            binary_result(BinaryOp::Mul, ValueType::Vector, ValueType::Rotation),
            Some(ValueType::Vector)
        );
    }

    #[test]
    fn test_list_append_accepts_anything() {
        assert_eq!(
            binary_result(BinaryOp::Add, ValueType::Integer, ValueType::List),
            Some(ValueType::List)
        );
    }

    #[test]
    fn test_implicit_conversions() {
        assert_eq!(
            implicit_conversion(ValueType::Integer, ValueType::Float),
            Some(Some(ValueType::Float))
        );
        assert_eq!(implicit_conversion(ValueType::Float, ValueType::Integer), None);
        assert_eq!(implicit_conversion(ValueType::List, ValueType::List), Some(None));
    }

    #[test]
    fn test_casts() {
        assert!(castable(ValueType::Vector, ValueType::String));
        assert!(castable(ValueType::String, ValueType::Vector));
        assert!(!castable(ValueType::Vector, ValueType::Integer));
    }
}
