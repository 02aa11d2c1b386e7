use crate::types::ValueType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Integer(i32),
    Float(f64),
    Str(&'static str),
    Key(&'static str),
    Vector([f64; 3]),
    Rotation([f64; 4]),
}

impl ConstValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstValue::Integer(_) => ValueType::Integer,
            ConstValue::Float(_) => ValueType::Float,
            ConstValue::Str(_) => ValueType::String,
            ConstValue::Key(_) => ValueType::Key,
            ConstValue::Vector(_) => ValueType::Vector,
            ConstValue::Rotation(_) => ValueType::Rotation,
        }
    }
}

pub const NULL_KEY: &str = "00000000-0000-0000-0000-000000000000";

const CONSTANTS: &[(&str, ConstValue)] = &[
    ("TRUE", ConstValue::Integer(1)),
    ("FALSE", ConstValue::Integer(0)),
    ("PI", ConstValue::Float(std::f64::consts::PI)),
    ("TWO_PI", ConstValue::Float(std::f64::consts::TAU)),
    ("PI_BY_TWO", ConstValue::Float(std::f64::consts::FRAC_PI_2)),
    ("DEG_TO_RAD", ConstValue::Float(std::f64::consts::PI / 180.0)),
    ("RAD_TO_DEG", ConstValue::Float(180.0 / std::f64::consts::PI)),
    ("SQRT2", ConstValue::Float(std::f64::consts::SQRT_2)),
    ("NULL_KEY", ConstValue::Key(NULL_KEY)),
    ("EOF", ConstValue::Str("\n\n\n")),
    ("ZERO_VECTOR", ConstValue::Vector([0.0, 0.0, 0.0])),
    ("ZERO_ROTATION", ConstValue::Rotation([0.0, 0.0, 0.0, 1.0])),
    ("PUBLIC_CHANNEL", ConstValue::Integer(0)),
    ("DEBUG_CHANNEL", ConstValue::Integer(0x7FFF_FFFF)),
    ("AGENT", ConstValue::Integer(1)),
    ("ACTIVE", ConstValue::Integer(2)),
    ("PASSIVE", ConstValue::Integer(4)),
    ("SCRIPTED", ConstValue::Integer(8)),
    ("CHANGED_INVENTORY", ConstValue::Integer(0x1)),
    ("CHANGED_COLOR", ConstValue::Integer(0x2)),
    ("CHANGED_SHAPE", ConstValue::Integer(0x4)),
    ("CHANGED_SCALE", ConstValue::Integer(0x8)),
    ("CHANGED_TEXTURE", ConstValue::Integer(0x10)),
    ("CHANGED_LINK", ConstValue::Integer(0x20)),
    ("CHANGED_ALLOWED_DROP", ConstValue::Integer(0x40)),
    ("CHANGED_OWNER", ConstValue::Integer(0x80)),
    ("CHANGED_REGION", ConstValue::Integer(0x100)),
    ("CHANGED_TELEPORT", ConstValue::Integer(0x200)),
    ("LINK_ROOT", ConstValue::Integer(1)),
    ("LINK_SET", ConstValue::Integer(-1)),
    ("LINK_ALL_OTHERS", ConstValue::Integer(-2)),
    ("LINK_ALL_CHILDREN", ConstValue::Integer(-3)),
    ("LINK_THIS", ConstValue::Integer(-4)),
    ("STRING_TRIM_HEAD", ConstValue::Integer(1)),
    ("STRING_TRIM_TAIL", ConstValue::Integer(2)),
    ("STRING_TRIM", ConstValue::Integer(3)),
    ("HTTP_METHOD", ConstValue::Integer(0)),
    ("HTTP_MIMETYPE", ConstValue::Integer(1)),
    ("HTTP_BODY_MAXLENGTH", ConstValue::Integer(2)),
    ("HTTP_VERIFY_CERT", ConstValue::Integer(3)),
    ("PERMISSION_DEBIT", ConstValue::Integer(0x2)),
    ("PERMISSION_TAKE_CONTROLS", ConstValue::Integer(0x4)),
    ("PERMISSION_TRIGGER_ANIMATION", ConstValue::Integer(0x10)),
    ("PERMISSION_ATTACH", ConstValue::Integer(0x20)),
];

/// Look up a built-in named constant
pub fn lookup(name: &str) -> Option<ConstValue> {
    CONSTANTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, value)| *value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("TRUE"), Some(ConstValue::Integer(1)));
        assert_eq!(lookup("NULL_KEY").map(|c| c.value_type()), Some(ValueType::Key));
        assert_eq!(lookup("true"), None);
    }
}
