//! Purpose: Pull-based JSON token reader driven by emitted decoders.
//! Exports: `TokenStream`, `TokenKind`, `MAX_DEPTH`.
//! Role: The structural-navigation and primitive-read surface resolved strategies consume.
//! Invariants: Errors carry the byte offset; no partial value escapes a failed read.
//! Invariants: Container nesting is capped at `MAX_DEPTH` to keep decoder recursion bounded.
//! Notes: Out-of-range integers fall back to f64, matching serde_json's parser.

use serde_json::{Map, Number, Value};

use crate::core::error::{Error, ErrorKind};

pub const MAX_DEPTH: usize = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Null,
    Bool,
    Number,
    String,
    Object,
    Array,
}

pub struct TokenStream<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> TokenStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    pub fn from_str(input: &'a str) -> Self {
        Self::new(input.as_bytes())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn fail(&self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Decode)
            .with_message(message)
            .with_offset(self.pos as u64)
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.buf.get(self.pos) {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }

    fn peek_byte(&mut self) -> Result<u8, Error> {
        self.skip_ws();
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.fail("unexpected end of input"))
    }

    fn expect_byte(&mut self, expected: u8, message: &str) -> Result<(), Error> {
        if self.peek_byte()? != expected {
            return Err(self.fail(message));
        }
        self.pos += 1;
        Ok(())
    }

    fn expect_literal(&mut self, literal: &[u8], message: &str) -> Result<(), Error> {
        self.skip_ws();
        if self.buf[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(self.fail(message))
        }
    }

    pub fn peek_kind(&mut self) -> Result<TokenKind, Error> {
        match self.peek_byte()? {
            b'n' => Ok(TokenKind::Null),
            b't' | b'f' => Ok(TokenKind::Bool),
            b'"' => Ok(TokenKind::String),
            b'{' => Ok(TokenKind::Object),
            b'[' => Ok(TokenKind::Array),
            b'-' | b'0'..=b'9' => Ok(TokenKind::Number),
            b => Err(self.fail(format!("unexpected character `{}`", b as char))),
        }
    }

    /// Consumes a `null` literal if one is next; leaves the stream untouched otherwise.
    pub fn try_read_null(&mut self) -> Result<bool, Error> {
        self.skip_ws();
        if self.buf.get(self.pos) == Some(&b'n') {
            self.expect_literal(b"null", "expected null")?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        match self.peek_byte()? {
            b't' => {
                self.expect_literal(b"true", "expected boolean")?;
                Ok(true)
            }
            b'f' => {
                self.expect_literal(b"false", "expected boolean")?;
                Ok(false)
            }
            _ => Err(self.fail("expected boolean")),
        }
    }

    pub fn read_number(&mut self) -> Result<Number, Error> {
        self.skip_ws();
        let start = self.pos;
        let mut is_float = false;

        if self.buf.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        match self.buf.get(self.pos) {
            Some(b'0') => {
                self.pos += 1;
                if matches!(self.buf.get(self.pos), Some(b) if b.is_ascii_digit()) {
                    return Err(self.fail("leading zeros are not allowed"));
                }
            }
            Some(b'1'..=b'9') => {
                while matches!(self.buf.get(self.pos), Some(b) if b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
            _ => return Err(self.fail("expected number")),
        }
        if self.buf.get(self.pos) == Some(&b'.') {
            is_float = true;
            self.pos += 1;
            if !matches!(self.buf.get(self.pos), Some(b) if b.is_ascii_digit()) {
                return Err(self.fail("expected digit after decimal point"));
            }
            while matches!(self.buf.get(self.pos), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.buf.get(self.pos), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.buf.get(self.pos), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if !matches!(self.buf.get(self.pos), Some(b) if b.is_ascii_digit()) {
                return Err(self.fail("expected digit in exponent"));
            }
            while matches!(self.buf.get(self.pos), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text = std::str::from_utf8(&self.buf[start..self.pos])
            .map_err(|_| self.fail("invalid number"))?;
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Number::from(n));
            }
            if let Ok(n) = text.parse::<u64>() {
                return Ok(Number::from(n));
            }
        }
        let n = text
            .parse::<f64>()
            .map_err(|_| self.fail("invalid number"))?;
        Number::from_f64(n).ok_or_else(|| self.fail("number out of range"))
    }

    pub fn read_string(&mut self) -> Result<String, Error> {
        self.expect_byte(b'"', "expected string")?;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let b = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| self.fail("unterminated string"))?;
            self.pos += 1;
            match b {
                b'"' => break,
                b'\\' => {
                    let esc = *self
                        .buf
                        .get(self.pos)
                        .ok_or_else(|| self.fail("unterminated escape"))?;
                    self.pos += 1;
                    match esc {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let c = self.read_unicode_escape()?;
                            let mut encoded = [0u8; 4];
                            out.extend_from_slice(c.encode_utf8(&mut encoded).as_bytes());
                        }
                        _ => return Err(self.fail("invalid escape sequence")),
                    }
                }
                0x00..=0x1f => return Err(self.fail("control character in string")),
                _ => out.push(b),
            }
        }
        String::from_utf8(out).map_err(|_| self.fail("invalid utf-8 in string"))
    }

    fn read_unicode_escape(&mut self) -> Result<char, Error> {
        let high = self.read_hex4()?;
        if (0xdc00..=0xdfff).contains(&high) {
            return Err(self.fail("lone surrogate in string"));
        }
        if (0xd800..=0xdbff).contains(&high) {
            self.expect_literal(b"\\u", "expected low surrogate")?;
            let low = self.read_hex4()?;
            if !(0xdc00..=0xdfff).contains(&low) {
                return Err(self.fail("invalid surrogate pair"));
            }
            let code = 0x10000 + ((high - 0xd800) << 10) + (low - 0xdc00);
            return char::from_u32(code).ok_or_else(|| self.fail("invalid surrogate pair"));
        }
        char::from_u32(high).ok_or_else(|| self.fail("invalid unicode escape"))
    }

    fn read_hex4(&mut self) -> Result<u32, Error> {
        let mut code: u32 = 0;
        for _ in 0..4 {
            let b = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| self.fail("unterminated unicode escape"))?;
            self.pos += 1;
            let digit = match b {
                b'0'..=b'9' => u32::from(b - b'0'),
                b'a'..=b'f' => u32::from(b - b'a') + 10,
                b'A'..=b'F' => u32::from(b - b'A') + 10,
                _ => return Err(self.fail("invalid unicode escape")),
            };
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn enter(&mut self) -> Result<(), Error> {
        if self.depth >= MAX_DEPTH {
            return Err(self.fail("nesting depth exceeded"));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn begin_object(&mut self) -> Result<(), Error> {
        self.expect_byte(b'{', "expected object")?;
        self.enter()
    }

    /// Advances to the next object member; returns its key, or `None` at `}`.
    pub fn object_next(&mut self, first: bool) -> Result<Option<String>, Error> {
        if self.peek_byte()? == b'}' {
            self.pos += 1;
            self.depth -= 1;
            return Ok(None);
        }
        if !first {
            self.expect_byte(b',', "expected `,` or `}`")?;
        }
        let key = match self.peek_byte()? {
            b'"' => self.read_string()?,
            _ => return Err(self.fail("expected object key")),
        };
        self.expect_byte(b':', "expected `:`")?;
        Ok(Some(key))
    }

    pub fn begin_array(&mut self) -> Result<(), Error> {
        self.expect_byte(b'[', "expected array")?;
        self.enter()
    }

    /// Returns whether another element follows; consumes `,` and `]`.
    pub fn array_next(&mut self, first: bool) -> Result<bool, Error> {
        match self.peek_byte()? {
            b']' => {
                self.pos += 1;
                self.depth -= 1;
                Ok(false)
            }
            b',' if first => Err(self.fail("expected value")),
            _ if first => Ok(true),
            b',' => {
                self.pos += 1;
                if self.peek_byte()? == b']' {
                    return Err(self.fail("trailing comma in array"));
                }
                Ok(true)
            }
            _ => Err(self.fail("expected `,` or `]`")),
        }
    }

    pub fn skip_value(&mut self) -> Result<(), Error> {
        match self.peek_kind()? {
            TokenKind::Null => self.expect_literal(b"null", "expected null"),
            TokenKind::Bool => self.read_bool().map(|_| ()),
            TokenKind::Number => self.read_number().map(|_| ()),
            TokenKind::String => self.skip_string(),
            TokenKind::Object => {
                self.begin_object()?;
                let mut first = true;
                loop {
                    if self.peek_byte()? == b'}' {
                        self.pos += 1;
                        self.depth -= 1;
                        return Ok(());
                    }
                    if !first {
                        self.expect_byte(b',', "expected `,` or `}`")?;
                    }
                    if self.peek_byte()? != b'"' {
                        return Err(self.fail("expected object key"));
                    }
                    self.skip_string()?;
                    self.expect_byte(b':', "expected `:`")?;
                    self.skip_value()?;
                    first = false;
                }
            }
            TokenKind::Array => {
                self.begin_array()?;
                let mut first = true;
                while self.array_next(first)? {
                    self.skip_value()?;
                    first = false;
                }
                Ok(())
            }
        }
    }

    fn skip_string(&mut self) -> Result<(), Error> {
        self.expect_byte(b'"', "expected string")?;
        loop {
            let b = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| self.fail("unterminated string"))?;
            self.pos += 1;
            match b {
                b'"' => return Ok(()),
                b'\\' => {
                    if self.buf.get(self.pos).is_none() {
                        return Err(self.fail("unterminated escape"));
                    }
                    self.pos += 1;
                }
                0x00..=0x1f => return Err(self.fail("control character in string")),
                _ => {}
            }
        }
    }

    /// Reads whatever value comes next into a `serde_json::Value`.
    pub fn read_value(&mut self) -> Result<Value, Error> {
        match self.peek_kind()? {
            TokenKind::Null => {
                self.expect_literal(b"null", "expected null")?;
                Ok(Value::Null)
            }
            TokenKind::Bool => Ok(Value::Bool(self.read_bool()?)),
            TokenKind::Number => Ok(Value::Number(self.read_number()?)),
            TokenKind::String => Ok(Value::String(self.read_string()?)),
            TokenKind::Array => {
                self.begin_array()?;
                let mut items = Vec::new();
                let mut first = true;
                while self.array_next(first)? {
                    items.push(self.read_value()?);
                    first = false;
                }
                Ok(Value::Array(items))
            }
            TokenKind::Object => {
                self.begin_object()?;
                let mut map = Map::new();
                let mut first = true;
                while let Some(key) = self.object_next(first)? {
                    let value = self.read_value()?;
                    map.insert(key, value);
                    first = false;
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Asserts the input is fully consumed apart from trailing whitespace.
    pub fn expect_end(&mut self) -> Result<(), Error> {
        self.skip_ws();
        if self.pos != self.buf.len() {
            return Err(self.fail("trailing characters after value"));
        }
        Ok(())
    }
}
