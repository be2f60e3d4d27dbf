//! Untrusted Data Gate parser
//!
//! Strict recursive-descent JSON parser. Produces plain data only and never
//! touches the interpreter. Recursion is bounded by `max_depth`, input by
//! `max_payload_bytes`; both are checked before any value is built.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use super::value::UntrustedValue;
use crate::config::GateLimits;
use crate::error::{WardenError, WardenResult};

/// The only entry point for wholly untrusted external data.
#[derive(Debug, Clone)]
pub struct DataGate {
    limits: GateLimits,
}

impl Default for DataGate {
    fn default() -> Self {
        DataGate::new(GateLimits::default())
    }
}

impl DataGate {
    pub fn new(limits: GateLimits) -> Self {
        DataGate { limits }
    }

    pub fn limits(&self) -> &GateLimits {
        &self.limits
    }

    /// Reject a payload of `len` bytes before reading or parsing it.
    pub fn check_size(&self, len: u64) -> WardenResult<()> {
        if len > self.limits.max_payload_bytes as u64 {
            warn!(len, limit = self.limits.max_payload_bytes, "untrusted payload too large");
            return Err(WardenError::SizeExceeded {
                limit: self.limits.max_payload_bytes,
                actual: len,
            });
        }
        Ok(())
    }

    /// Parse raw bytes; invalid UTF-8 is an illegal token.
    pub fn parse_bytes(&self, bytes: &[u8]) -> WardenResult<UntrustedValue> {
        self.check_size(bytes.len() as u64)?;
        match std::str::from_utf8(bytes) {
            Ok(text) => self.parse(text),
            Err(e) => {
                let offset = e.valid_up_to();
                let (line, column) = line_column(&bytes[..offset]);
                Err(WardenError::IllegalToken {
                    offset,
                    line,
                    column,
                    found: "invalid UTF-8".to_string(),
                })
            }
        }
    }

    pub fn parse(&self, text: &str) -> WardenResult<UntrustedValue> {
        self.check_size(text.len() as u64)?;
        let mut parser = Parser {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            depth: 0,
            max_depth: self.limits.max_depth,
        };
        parser.document().map_err(|e| {
            warn!(error = %e, "untrusted payload rejected");
            e
        })
    }
}

fn line_column(consumed: &[u8]) -> (u32, u32) {
    let line = consumed.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = consumed.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    (line as u32, (consumed.len() - line_start + 1) as u32)
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn document(&mut self) -> WardenResult<UntrustedValue> {
        let value = self.value()?;
        self.skip_ws();
        if self.pos != self.bytes.len() {
            return Err(self.illegal_here());
        }
        Ok(value)
    }

    fn value(&mut self) -> WardenResult<UntrustedValue> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.illegal(self.pos, "end of input")),
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => self.string().map(UntrustedValue::String),
            Some(b't') => self.literal("true", UntrustedValue::Bool(true)),
            Some(b'f') => self.literal("false", UntrustedValue::Bool(false)),
            Some(b'n') => self.literal("null", UntrustedValue::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(self.illegal_here()),
        }
    }

    fn object(&mut self) -> WardenResult<UntrustedValue> {
        self.enter()?;
        self.pos += 1;
        let mut map = BTreeMap::new();

        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(UntrustedValue::Object(map));
        }

        loop {
            self.skip_ws();
            if self.peek() != Some(b'"') {
                return Err(self.illegal_here());
            }
            let key = self.string()?;
            self.skip_ws();
            self.expect(b':')?;
            let value = self.value()?;
            if map.insert(key, value).is_some() {
                trace!(offset = self.pos, "duplicate key replaced");
            }

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.illegal_here()),
            }
        }

        self.depth -= 1;
        Ok(UntrustedValue::Object(map))
    }

    fn array(&mut self) -> WardenResult<UntrustedValue> {
        self.enter()?;
        self.pos += 1;
        let mut items = Vec::new();

        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(UntrustedValue::Array(items));
        }

        loop {
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.illegal_here()),
            }
        }

        self.depth -= 1;
        Ok(UntrustedValue::Array(items))
    }

    fn string(&mut self) -> WardenResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();

        loop {
            let run_start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'"' || b == b'\\' || b < 0x20 {
                    break;
                }
                self.pos += 1;
            }
            out.push_str(&self.text[run_start..self.pos]);

            match self.peek() {
                None => return Err(self.illegal(start, "unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    out.push(self.escape()?);
                }
                Some(_) => return Err(self.illegal(self.pos, "control character in string")),
            }
        }
    }

    fn escape(&mut self) -> WardenResult<char> {
        let at = self.pos;
        let c = match self.peek() {
            Some(b'"') => '"',
            Some(b'\\') => '\\',
            Some(b'/') => '/',
            Some(b'b') => '\u{08}',
            Some(b'f') => '\u{0c}',
            Some(b'n') => '\n',
            Some(b'r') => '\r',
            Some(b't') => '\t',
            Some(b'u') => {
                self.pos += 1;
                let high = self.hex4()?;
                return match high {
                    0xD800..=0xDBFF => {
                        if self.bytes.get(self.pos..self.pos + 2) != Some(b"\\u".as_slice()) {
                            return Err(self.illegal(at, "unpaired surrogate escape"));
                        }
                        self.pos += 2;
                        let low = self.hex4()?;
                        if !(0xDC00..=0xDFFF).contains(&low) {
                            return Err(self.illegal(at, "unpaired surrogate escape"));
                        }
                        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                        char::from_u32(code).ok_or_else(|| self.illegal(at, "invalid escape"))
                    }
                    0xDC00..=0xDFFF => Err(self.illegal(at, "unpaired surrogate escape")),
                    _ => char::from_u32(high).ok_or_else(|| self.illegal(at, "invalid escape")),
                };
            }
            _ => return Err(self.illegal(at, "invalid escape")),
        };
        self.pos += 1;
        Ok(c)
    }

    fn hex4(&mut self) -> WardenResult<u32> {
        let digits = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.illegal(self.pos, "truncated \\u escape"))?;
        let mut code = 0u32;
        for &d in digits {
            let v = (d as char)
                .to_digit(16)
                .ok_or_else(|| self.illegal(self.pos, "invalid \\u escape"))?;
            code = code * 16 + v;
        }
        self.pos += 4;
        Ok(code)
    }

    fn number(&mut self) -> WardenResult<UntrustedValue> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }

        match self.peek() {
            Some(b'0') => {
                self.pos += 1;
                if matches!(self.peek(), Some(b'0'..=b'9')) {
                    return Err(self.illegal(start, "leading zero"));
                }
            }
            Some(b'1'..=b'9') => self.digits(),
            _ => return Err(self.illegal(start, "malformed number")),
        }

        if self.peek() == Some(b'.') {
            self.pos += 1;
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(self.illegal(start, "malformed number"));
            }
            self.digits();
        }

        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(self.illegal(start, "malformed number"));
            }
            self.digits();
        }

        let n: f64 = self.text[start..self.pos]
            .parse()
            .map_err(|_| self.illegal(start, "malformed number"))?;
        if !n.is_finite() {
            return Err(self.illegal(start, "number out of range"));
        }
        Ok(UntrustedValue::Number(n))
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn literal(&mut self, word: &str, value: UntrustedValue) -> WardenResult<UntrustedValue> {
        let end = self.pos + word.len();
        let exact = self.bytes.get(self.pos..end) == Some(word.as_bytes());
        let followed_by_word = self.bytes.get(end).is_some_and(|b| is_word_byte(*b));
        if !exact || followed_by_word {
            return Err(self.illegal_here());
        }
        self.pos = end;
        Ok(value)
    }

    fn enter(&mut self) -> WardenResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(WardenError::DepthExceeded { limit: self.max_depth });
        }
        Ok(())
    }

    fn expect(&mut self, byte: u8) -> WardenResult<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.illegal_here())
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Illegal token at the cursor, naming whatever word or character sits there.
    fn illegal_here(&self) -> WardenError {
        let rest = &self.text[self.pos..];
        let word_len = rest.bytes().take_while(|b| is_word_byte(*b)).count();
        let found = if word_len > 0 {
            format!("`{}`", &rest[..word_len])
        } else {
            match rest.chars().next() {
                Some(c) => format!("`{}`", c.escape_default()),
                None => "end of input".to_string(),
            }
        };
        self.illegal(self.pos, &found)
    }

    fn illegal(&self, offset: usize, found: &str) -> WardenError {
        let (line, column) = line_column(&self.bytes[..offset]);
        WardenError::IllegalToken {
            offset,
            line,
            column,
            found: found.to_string(),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> DataGate {
        DataGate::default()
    }

    fn gate_with_depth(max_depth: usize) -> DataGate {
        DataGate::new(GateLimits { max_depth, ..GateLimits::default() })
    }

    fn nested_arrays(depth: usize) -> String {
        format!("{}{}", "[".repeat(depth), "]".repeat(depth))
    }

    #[test]
    fn parses_mapping_with_array() {
        let value = gate().parse("{\"x\": [1,2,3]}").expect("valid json");
        assert_eq!(
            value.get("x"),
            Some(&UntrustedValue::Array(vec![1.0.into(), 2.0.into(), 3.0.into()]))
        );
    }

    #[test]
    fn duplicate_keys_last_write_wins() {
        let value = gate().parse(r#"{"a":1,"a":2}"#).expect("duplicates allowed");
        match value {
            UntrustedValue::Object(map) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map.get("a"), Some(&UntrustedValue::Number(2.0)));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn code_is_an_illegal_token() {
        let err = gate().parse("function(){}").expect_err("code rejected");
        match err {
            WardenError::IllegalToken { offset, found, .. } => {
                assert_eq!(offset, 0);
                assert_eq!(found, "`function`");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn depth_limit_is_exact() {
        let g = gate_with_depth(4);
        assert!(g.parse(&nested_arrays(4)).is_ok());
        assert!(matches!(
            g.parse(&nested_arrays(5)),
            Err(WardenError::DepthExceeded { limit: 4 })
        ));
        assert!(g.parse(r#"{"a":{"b":{"c":{"d":1}}}}"#).is_ok());
        assert!(matches!(
            g.parse(r#"{"a":{"b":{"c":{"d":{}}}}}"#),
            Err(WardenError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn adversarial_depth_does_not_overflow_the_stack() {
        let hostile = "[".repeat(1_000_000);
        assert!(matches!(gate().parse(&hostile), Err(WardenError::DepthExceeded { limit: 128 })));
    }

    #[test]
    fn size_limit() {
        let g = DataGate::new(GateLimits { max_payload_bytes: 8, ..GateLimits::default() });
        assert!(g.parse("[1,2,3]").is_ok());
        assert!(matches!(
            g.parse("[1,2,3,4,5]"),
            Err(WardenError::SizeExceeded { limit: 8, actual: 11 })
        ));
    }

    #[test]
    fn strict_grammar_rejections() {
        let rejected = [
            "",
            "   ",
            "[1,2,]",
            r#"{"a":1,}"#,
            "// comment\n1",
            "/* c */ 1",
            "'single'",
            "01",
            "-",
            "1.",
            ".5",
            "1e",
            "NaN",
            "Infinity",
            "undefined",
            "truex",
            "[1 2]",
            r#"{"a" 1}"#,
            r#"{a:1}"#,
            "\"tab\there\"",
            r#""\x41""#,
            r#""\ud800""#,
            r#""\udc00""#,
            "1e400",
            "[1] [2]",
            "\u{feff}1",
        ];
        for input in rejected {
            assert!(
                matches!(gate().parse(input), Err(WardenError::IllegalToken { .. })),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn escapes_decode() {
        let value = gate()
            .parse(r#""a\"b\\c\/d\b\f\n\r\tAé😀""#)
            .expect("escapes");
        assert_eq!(value, UntrustedValue::from("a\"b\\c/d\u{8}\u{c}\n\r\tAé😀"));
    }

    #[test]
    fn numbers_follow_json() {
        let value = gate().parse("[0, -0, 12.5, -3e2, 1E+2, 2.5e-1]").expect("numbers");
        assert_eq!(
            value,
            UntrustedValue::Array(vec![0.0.into(), 0.0.into(), 12.5.into(), (-300.0).into(), 100.0.into(), 0.25.into()])
        );
    }

    #[test]
    fn error_location_is_reported() {
        let err = gate().parse("{\n  \"a\": tru\n}").expect_err("bad literal");
        match err {
            WardenError::IllegalToken { line, column, found, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, 8);
                assert_eq!(found, "`tru`");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn invalid_utf8_is_illegal() {
        let err = gate().parse_bytes(b"[\"ok\", \"\xff\"]").expect_err("invalid utf-8");
        assert!(matches!(err, WardenError::IllegalToken { offset: 8, .. }));
    }

    #[test]
    fn agrees_with_reference_json() {
        let input = r#"{"name":"warden","tags":["a","b"],"n":-1.5e3,"ok":true,"none":null,"nested":{"k":[{}]}}"#;
        let ours = gate().parse(input).expect("valid");
        let reference: serde_json::Value = serde_json::from_str(input).expect("reference");
        let reference_back: serde_json::Value = serde_json::from_str(&ours.to_json()).expect("re-read");
        assert_eq!(reference, reference_back);
    }
}
