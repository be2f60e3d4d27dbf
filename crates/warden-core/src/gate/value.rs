//! Plain data values
//!
//! The only value shape that crosses a trust boundary: untrusted payloads,
//! native capability arguments/results and sandbox injections. Holds no
//! references and no code.

use std::collections::BTreeMap;
use std::fmt;

/// Plain recursive data value with JSON semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum PlainValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PlainValue>),
    Object(BTreeMap<String, PlainValue>),
}

/// Result type of the Untrusted Data Gate.
pub type UntrustedValue = PlainValue;

impl PlainValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlainValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PlainValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlainValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PlainValue> {
        match self {
            PlainValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PlainValue::Null => "null",
            PlainValue::Bool(_) => "boolean",
            PlainValue::Number(_) => "number",
            PlainValue::String(_) => "string",
            PlainValue::Array(_) => "array",
            PlainValue::Object(_) => "object",
        }
    }

    /// Standard JSON text
    pub fn to_json(&self) -> String {
        let mut out = String::new();
        write_json(self, &mut out);
        out
    }

    /// Text used when data is printed: strings unquoted, everything else as JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            PlainValue::String(s) => s.clone(),
            other => other.to_json(),
        }
    }
}

impl fmt::Display for PlainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl From<&str> for PlainValue {
    fn from(s: &str) -> Self {
        PlainValue::String(s.to_string())
    }
}

impl From<String> for PlainValue {
    fn from(s: String) -> Self {
        PlainValue::String(s)
    }
}

impl From<f64> for PlainValue {
    fn from(n: f64) -> Self {
        PlainValue::Number(n)
    }
}

impl From<bool> for PlainValue {
    fn from(b: bool) -> Self {
        PlainValue::Bool(b)
    }
}

/// Format a number the way both the gate and the interpreter print it.
pub fn format_number(n: f64) -> String {
    if n.is_finite() {
        format!("{}", n)
    } else {
        "null".to_string()
    }
}

fn write_json(value: &PlainValue, out: &mut String) {
    match value {
        PlainValue::Null => out.push_str("null"),
        PlainValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        PlainValue::Number(n) => out.push_str(&format_number(*n)),
        PlainValue::String(s) => write_json_string(s, out),
        PlainValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(item, out);
            }
            out.push(']');
        }
        PlainValue::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_json(item, out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_standard_json() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), PlainValue::Array(vec![1.0.into(), true.into(), PlainValue::Null]));
        map.insert("a".to_string(), PlainValue::from("q\"\n\u{1}"));
        let value = PlainValue::Object(map);
        assert_eq!(value.to_json(), r#"{"a":"q\"\n\u0001","b":[1,true,null]}"#);
    }

    #[test]
    fn non_finite_numbers_render_as_null() {
        assert_eq!(PlainValue::Number(f64::NAN).to_json(), "null");
        assert_eq!(PlainValue::Number(f64::INFINITY).to_json(), "null");
        assert_eq!(PlainValue::Number(-2.5).to_json(), "-2.5");
    }

    #[test]
    fn display_string_leaves_strings_bare() {
        assert_eq!(PlainValue::from("hi").to_display_string(), "hi");
        assert_eq!(PlainValue::Number(3.0).to_display_string(), "3");
    }
}
