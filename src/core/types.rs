//! Purpose: Canonical type identity for decoder resolution.
//! Exports: `RawType`, `TypeDescriptor`, `TypeShape`.
//! Role: Pure data layer; cache keys are the canonical rendering of a descriptor.
//! Invariants: Descriptors are immutable once constructed.
//! Invariants: `parse` and `Display` round-trip exactly, so plans can reference
//! sub-strategies by cache key and recover the descriptor later.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

/// Raw type identity: builtin scalars, container families, or a schema-registered name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RawType {
    Any,
    Bool,
    Int,
    Float,
    Str,
    Array,
    List,
    Set,
    Map,
    Vec,
    HashSet,
    BTreeSet,
    HashMap,
    BTreeMap,
    Named(Arc<str>),
}

impl RawType {
    pub fn name(&self) -> &str {
        match self {
            RawType::Any => "any",
            RawType::Bool => "bool",
            RawType::Int => "int",
            RawType::Float => "float",
            RawType::Str => "str",
            RawType::Array => "array",
            RawType::List => "list",
            RawType::Set => "set",
            RawType::Map => "map",
            RawType::Vec => "vec",
            RawType::HashSet => "hashset",
            RawType::BTreeSet => "btreeset",
            RawType::HashMap => "hashmap",
            RawType::BTreeMap => "btreemap",
            RawType::Named(name) => name,
        }
    }

    pub fn from_name(name: &str) -> RawType {
        match name {
            "any" => RawType::Any,
            "bool" => RawType::Bool,
            "int" => RawType::Int,
            "float" => RawType::Float,
            "str" => RawType::Str,
            "array" => RawType::Array,
            "list" => RawType::List,
            "set" => RawType::Set,
            "map" => RawType::Map,
            "vec" => RawType::Vec,
            "hashset" => RawType::HashSet,
            "btreeset" => RawType::BTreeSet,
            "hashmap" => RawType::HashMap,
            "btreemap" => RawType::BTreeMap,
            other => RawType::Named(Arc::from(other)),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            RawType::Any | RawType::Bool | RawType::Int | RawType::Float | RawType::Str
        )
    }

    pub fn is_list_like(&self) -> bool {
        matches!(self, RawType::List | RawType::Vec)
    }

    pub fn is_set_like(&self) -> bool {
        matches!(self, RawType::Set | RawType::HashSet | RawType::BTreeSet)
    }

    pub fn is_collection_like(&self) -> bool {
        self.is_list_like() || self.is_set_like()
    }

    pub fn is_map_like(&self) -> bool {
        matches!(self, RawType::Map | RawType::HashMap | RawType::BTreeMap)
    }

    pub fn is_abstract_container(&self) -> bool {
        matches!(self, RawType::List | RawType::Set | RawType::Map)
    }
}

impl TryFrom<String> for RawType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        if !is_valid_name(&value) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid type name `{value}`")));
        }
        Ok(RawType::from_name(&value))
    }
}

impl From<RawType> for String {
    fn from(raw: RawType) -> String {
        raw.name().to_string()
    }
}

/// Closed shape classification computed once per descriptor during normalization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeShape {
    Scalar,
    Array,
    Collection,
    Map,
    Enum,
    Structured,
}

/// A raw type plus its ordered, resolved type arguments.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeDescriptor {
    raw: RawType,
    args: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    pub fn new(raw: RawType, args: Vec<TypeDescriptor>) -> Self {
        Self { raw, args }
    }

    pub fn simple(raw: RawType) -> Self {
        Self {
            raw,
            args: Vec::new(),
        }
    }

    pub fn named(name: impl AsRef<str>) -> Self {
        Self::simple(RawType::Named(Arc::from(name.as_ref())))
    }

    pub fn raw(&self) -> &RawType {
        &self.raw
    }

    pub fn args(&self) -> &[TypeDescriptor] {
        &self.args
    }

    /// Cache identity: the canonical type expression of the requested descriptor.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }

    pub fn parse(input: &str) -> Result<TypeDescriptor, Error> {
        let mut parser = ExprParser {
            bytes: input.as_bytes(),
            pos: 0,
        };
        let descriptor = parser.parse_type(input)?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(invalid_expr(input));
        }
        Ok(descriptor)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw.name())?;
        if !self.args.is_empty() {
            f.write_str("[")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl FromStr for TypeDescriptor {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Error> {
        TypeDescriptor::parse(input)
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        TypeDescriptor::parse(&value)
    }
}

impl From<TypeDescriptor> for String {
    fn from(descriptor: TypeDescriptor) -> String {
        descriptor.to_string()
    }
}

fn invalid_expr(input: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("invalid type expression `{input}`"))
        .with_hint("Use a form like `str`, `vec[int]`, or `map[str,demo.Node]`.")
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.ends_with('.')
        && !name.contains("..")
}

struct ExprParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl ExprParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos] == b' ' {
            self.pos += 1;
        }
    }

    fn parse_type(&mut self, input: &str) -> Result<TypeDescriptor, Error> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name = &input[start..self.pos];
        if !is_valid_name(name) {
            return Err(invalid_expr(input));
        }
        let raw = RawType::from_name(name);
        let mut args = Vec::new();
        self.skip_ws();
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b'[' {
            self.pos += 1;
            loop {
                args.push(self.parse_type(input)?);
                self.skip_ws();
                match self.bytes.get(self.pos) {
                    Some(b',') => self.pos += 1,
                    Some(b']') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(invalid_expr(input)),
                }
            }
        }
        Ok(TypeDescriptor::new(raw, args))
    }
}

#[cfg(test)]
mod tests {
    use super::{RawType, TypeDescriptor};

    #[test]
    fn parse_and_display_round_trip() {
        let cases = [
            "any",
            "int",
            "vec[int]",
            "array[str]",
            "map[str,any]",
            "hashmap[int,vec[float]]",
            "demo.Node",
            "map[str,demo.Node]",
            "set[orders.LineItem]",
        ];

        for case in cases {
            let descriptor = TypeDescriptor::parse(case).expect(case);
            assert_eq!(descriptor.to_string(), case);
            assert_eq!(descriptor.cache_key(), case);
        }
    }

    #[test]
    fn parse_tolerates_spacing_but_prints_canonically() {
        let descriptor = TypeDescriptor::parse("map[ str , demo.Node ]").expect("parse");
        assert_eq!(descriptor.to_string(), "map[str,demo.Node]");
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        let cases = [
            "",
            "vec[",
            "vec[]",
            "map[str,]",
            "map[str",
            "1foo",
            "foo..bar",
            "foo.",
            "vec[str] junk",
            "vec[str]]",
        ];

        for case in cases {
            assert!(TypeDescriptor::parse(case).is_err(), "accepted `{case}`");
        }
    }

    #[test]
    fn raw_type_families() {
        assert!(RawType::Vec.is_list_like());
        assert!(RawType::List.is_abstract_container());
        assert!(RawType::BTreeSet.is_set_like());
        assert!(RawType::HashMap.is_map_like());
        assert!(!RawType::HashMap.is_abstract_container());
        assert!(RawType::Any.is_scalar());
        assert_eq!(RawType::from_name("demo.Node").name(), "demo.Node");
    }

    #[test]
    fn equal_descriptors_share_cache_keys() {
        let a = TypeDescriptor::parse("map[int,vec[demo.Node]]").expect("a");
        let b = TypeDescriptor::new(
            RawType::Map,
            vec![
                TypeDescriptor::simple(RawType::Int),
                TypeDescriptor::new(RawType::Vec, vec![TypeDescriptor::named("demo.Node")]),
            ],
        );
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
