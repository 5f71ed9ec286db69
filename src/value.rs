use super::object::{GcRef, ObjData};
use std::fmt;

/// The tagged union every stack slot, constant, and field holds. `Obj` is a
/// `Copy` handle into the heap (see `object::GcRef`), so `Value` itself stays
/// `Copy` too — only strings/functions/closures/classes/instances live behind
/// the indirection.
#[derive(Clone, Copy)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Obj(GcRef),
}

impl Value {
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Obj(r) => r.as_obj().data.type_name(),
        }
    }

    pub fn as_obj(&self) -> Option<GcRef> {
        match self {
            Value::Obj(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::Obj(r) => match &r.as_obj().data {
                ObjData::String(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Identity equality for the `==` operator: numbers/bools by value, objects
    /// by heap identity (sound because strings are interned, so two equal
    /// strings are always the same object).
    pub fn values_equal(a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.ptr_eq(&b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Obj(r) => write!(f, "{}", r.as_obj().data),
        }
    }
}
