//! Runtime Value Representation
//!
//! Values seen by running scripts. Scalars are held inline; everything
//! else lives on the heap behind a generation-checked `ObjectRef`.
//! Capabilities are never values.

use std::fmt;
use std::rc::Rc;

use crate::gate::format_number;

/// Index into the heap plus the generation of the slot when the object was allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectRef {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value
    Null,

    /// Boolean value
    Bool(bool),

    /// Numeric value (IEEE 754)
    Number(f64),

    /// Immutable string
    Str(Rc<str>),

    /// Heap object: record, list or function
    Ref(ObjectRef),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Ref(_) => true,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Scalar type name; heap objects report `"object"`, see `Heap::type_name`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Ref(_) => "object",
        }
    }

    /// Text of a scalar as printed or concatenated.
    pub(crate) fn scalar_text(&self) -> Option<String> {
        match self {
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Str(s) => Some(s.to_string()),
            Value::Ref(_) => None,
        }
    }

    /// Strict equality: same type and value, heap objects by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("x").truthy());
        assert!(Value::Ref(ObjectRef { index: 0, generation: 0 }).truthy());
    }

    #[test]
    fn strict_equality_does_not_coerce() {
        assert!(Value::Number(1.0).strict_eq(&Value::Number(1.0)));
        assert!(!Value::Number(1.0).strict_eq(&Value::str("1")));
        assert!(!Value::Null.strict_eq(&Value::Bool(false)));
        let a = ObjectRef { index: 1, generation: 0 };
        let b = ObjectRef { index: 1, generation: 1 };
        assert!(!Value::Ref(a).strict_eq(&Value::Ref(b)));
    }
}
