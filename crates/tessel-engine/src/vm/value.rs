use std::fmt;

use serde::{Deserialize, Serialize};
use tessel_codegen::constants::NULL_KEY;
use tessel_codegen::ValueType;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, o: Vector3) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    pub fn cross(self, o: Vector3) -> Vector3 {
        Vector3::new(
            self.y * o.z - self.z * o.y,
            self.z * o.x - self.x * o.z,
            self.x * o.y - self.y * o.x,
        )
    }

    pub fn magnitude(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn scale(self, f: f64) -> Vector3 {
        Vector3::new(self.x * f, self.y * f, self.z * f)
    }

    /// Rotate by a unit quaternion
    pub fn rotate(self, q: Quat) -> Vector3 {
        let u = Vector3::new(q.x, q.y, q.z);
        let t = u.cross(self).scale(2.0);
        Vector3::new(
            self.x + q.s * t.x + u.cross(t).x,
            self.y + q.s * t.y + u.cross(t).y,
            self.z + q.s * t.z + u.cross(t).z,
        )
    }
}

/// Rotation as a quaternion; `s` is the real part
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub s: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        s: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, s: f64) -> Self {
        Self { x, y, z, s }
    }

    /// `self * other` applies `self` first, then `other`
    pub fn compose(self, o: Quat) -> Quat {
        let (a, b) = (o, self);
        Quat::new(
            a.s * b.x + a.x * b.s + a.y * b.z - a.z * b.y,
            a.s * b.y - a.x * b.z + a.y * b.s + a.z * b.x,
            a.s * b.z + a.x * b.y - a.y * b.x + a.z * b.s,
            a.s * b.s - a.x * b.x - a.y * b.y - a.z * b.z,
        )
    }

    pub fn conjugate(self) -> Quat {
        Quat::new(-self.x, -self.y, -self.z, self.s)
    }
}

/// A guest value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Integer(i32),
    Float(f64),
    String(String),
    Key(String),
    Vector(Vector3),
    Rotation(Quat),
    List(Vec<Value>),
}

impl Value {
    pub fn default_for(ty: ValueType) -> Value {
        match ty {
            ValueType::Integer | ValueType::Void => Value::Integer(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::Key => Value::Key(String::new()),
            ValueType::Vector => Value::Vector(Vector3::ZERO),
            ValueType::Rotation => Value::Rotation(Quat::IDENTITY),
            ValueType::List => Value::List(Vec::new()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Key(_) => ValueType::Key,
            Value::Vector(_) => ValueType::Vector,
            Value::Rotation(_) => ValueType::Rotation,
            Value::List(_) => ValueType::List,
        }
    }

    /// Truth value used by conditions
    pub fn is_true(&self) -> bool {
        match self {
            Value::Integer(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Key(k) => is_valid_key(k) && k != NULL_KEY,
            Value::Vector(v) => *v != Vector3::ZERO,
            Value::Rotation(r) => *r != Quat::IDENTITY,
            Value::List(l) => !l.is_empty(),
        }
    }

    pub fn as_integer(&self) -> i32 {
        match self {
            Value::Integer(v) => *v,
            Value::Float(v) => float_to_int(*v),
            Value::String(s) | Value::Key(s) => parse_leading_int(s),
            _ => 0,
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Integer(v) => *v as f64,
            Value::Float(v) => *v,
            Value::String(s) | Value::Key(s) => parse_leading_float(s),
            _ => 0.0,
        }
    }

    pub fn as_vector(&self) -> Vector3 {
        match self {
            Value::Vector(v) => *v,
            Value::String(s) | Value::Key(s) => match parse_components(s).as_deref() {
                Some([x, y, z]) => Vector3::new(*x, *y, *z),
                _ => Vector3::ZERO,
            },
            _ => Vector3::ZERO,
        }
    }

    pub fn as_rotation(&self) -> Quat {
        match self {
            Value::Rotation(r) => *r,
            Value::String(s) | Value::Key(s) => match parse_components(s).as_deref() {
                Some([x, y, z, w]) => Quat::new(*x, *y, *z, *w),
                _ => Quat::IDENTITY,
            },
            _ => Quat::IDENTITY,
        }
    }

    /// Text of a value as produced by a `(string)` cast
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) | Value::Key(s) => s.clone(),
            Value::List(items) => items.iter().map(Value::to_text).collect(),
            other => other.to_string(),
        }
    }

    pub fn cast(&self, to: ValueType) -> Value {
        match to {
            ValueType::Integer => Value::Integer(self.as_integer()),
            ValueType::Float => Value::Float(self.as_float()),
            ValueType::String => Value::String(self.to_text()),
            ValueType::Key => Value::Key(self.to_text()),
            ValueType::Vector => Value::Vector(self.as_vector()),
            ValueType::Rotation => Value::Rotation(self.as_rotation()),
            ValueType::List => match self {
                Value::List(_) => self.clone(),
                other => Value::List(vec![other.clone()]),
            },
            ValueType::Void => self.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:.6}", v),
            Value::String(s) | Value::Key(s) => f.write_str(s),
            Value::Vector(v) => write!(f, "<{:.5}, {:.5}, {:.5}>", v.x, v.y, v.z),
            Value::Rotation(r) => write!(f, "<{:.5}, {:.5}, {:.5}, {:.5}>", r.x, r.y, r.z, r.s),
            Value::List(items) => {
                for item in items {
                    write!(f, "{}", item.to_text())?;
                }
                Ok(())
            }
        }
    }
}

fn float_to_int(v: f64) -> i32 {
    if v.is_nan() {
        return 0;
    }
    // `as` saturates, truncating toward zero
    v as i32
}

/// Leading integer of a string, decimal or `0x` hex; 0 when there is none
pub fn parse_leading_int(s: &str) -> i32 {
    let t = s.trim_start();
    let (negative, body) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };

    let value: i64 = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).take(8).collect();
        i64::from_str_radix(&digits, 16).unwrap_or(0)
    } else {
        let digits: String = body.chars().take_while(|c| c.is_ascii_digit()).take(11).collect();
        digits.parse().unwrap_or(0)
    };

    let value = if negative { -value } else { value };
    if value > u32::MAX as i64 || value < i32::MIN as i64 {
        -1
    } else {
        value as i32
    }
}

/// Leading float of a string; 0.0 when there is none
pub fn parse_leading_float(s: &str) -> f64 {
    let t = s.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = t.as_bytes();
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'0'..=b'9' => seen_digit = true,
            b'-' | b'+' if end == 0 => {}
            b'-' | b'+' if seen_exp && matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }
    let mut candidate = &t[..end];
    while !candidate.is_empty() {
        if let Ok(v) = candidate.parse::<f64>() {
            return v;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    0.0
}

fn parse_components(s: &str) -> Option<Vec<f64>> {
    let inner = s.trim().strip_prefix('<')?.strip_suffix('>')?;
    Some(inner.split(',').map(parse_leading_float).collect())
}

/// Whether text has the shape `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
pub fn is_valid_key(k: &str) -> bool {
    k.len() == 36
        && k.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}
