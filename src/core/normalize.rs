//! Purpose: Resolve abstract container types to concrete shapes with resolved arguments.
//! Exports: `ResolvedType`, `normalize`, `KeyDecoder`, `KeyDecoderRegistry`.
//! Role: The only stage that inspects raw container families; everything downstream
//! works from the closed `TypeShape` computed here.
//! Invariants: Deterministic given fixed configuration; the sole side effect is
//! idempotent key-decoder registration for non-string map keys.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Number;

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{SchemaRegistry, TypeDef};
use crate::core::types::{RawType, TypeDescriptor, TypeShape};

/// A normalized descriptor plus its shape, computed once per resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedType {
    pub descriptor: TypeDescriptor,
    pub shape: TypeShape,
}

/// Parses a JSON object key's string form into its canonical rendering.
pub trait KeyDecoder: Send + Sync {
    fn decode_key(&self, raw: &str) -> Result<String, Error>;
}

struct StrKey;

impl KeyDecoder for StrKey {
    fn decode_key(&self, raw: &str) -> Result<String, Error> {
        Ok(raw.to_string())
    }
}

struct IntKey;

impl KeyDecoder for IntKey {
    fn decode_key(&self, raw: &str) -> Result<String, Error> {
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(n.to_string());
        }
        if let Ok(n) = raw.parse::<u64>() {
            return Ok(n.to_string());
        }
        Err(Error::new(ErrorKind::Decode).with_message(format!("invalid integer key `{raw}`")))
    }
}

struct FloatKey;

impl KeyDecoder for FloatKey {
    fn decode_key(&self, raw: &str) -> Result<String, Error> {
        let parsed = raw
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .and_then(Number::from_f64);
        match parsed {
            Some(n) => Ok(n.to_string()),
            None => Err(
                Error::new(ErrorKind::Decode).with_message(format!("invalid float key `{raw}`"))
            ),
        }
    }
}

struct BoolKey;

impl KeyDecoder for BoolKey {
    fn decode_key(&self, raw: &str) -> Result<String, Error> {
        match raw {
            "true" | "false" => Ok(raw.to_string()),
            _ => Err(
                Error::new(ErrorKind::Decode).with_message(format!("invalid boolean key `{raw}`"))
            ),
        }
    }
}

/// Append-only registry of key decoders, one per distinct key raw type.
#[derive(Default)]
pub struct KeyDecoderRegistry {
    map: RwLock<HashMap<RawType, Arc<dyn KeyDecoder>>>,
}

impl KeyDecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the key decoder for `raw` if absent and returns it.
    pub fn ensure(&self, raw: &RawType) -> Result<Arc<dyn KeyDecoder>, Error> {
        {
            let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = map.get(raw) {
                return Ok(existing.clone());
            }
        }
        let decoder: Arc<dyn KeyDecoder> = match raw {
            RawType::Str => Arc::new(StrKey),
            RawType::Int => Arc::new(IntKey),
            RawType::Float => Arc::new(FloatKey),
            RawType::Bool => Arc::new(BoolKey),
            other => {
                return Err(Error::new(ErrorKind::InvalidTypeArguments)
                    .with_message(format!("unsupported map key type `{}`", other.name())));
            }
        };
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.entry(raw.clone()).or_insert(decoder).clone())
    }

    pub fn len(&self) -> usize {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn normalize(
    descriptor: &TypeDescriptor,
    config: &Config,
    schemas: &SchemaRegistry,
    key_decoders: &KeyDecoderRegistry,
) -> Result<ResolvedType, Error> {
    // Named-type overrides apply exactly once; the substituted type is not
    // re-consulted, so override tables cannot loop.
    let mut current = descriptor.clone();
    if matches!(current.raw(), RawType::Named(_)) {
        if let Some(target) = config.override_for(current.raw()) {
            current = TypeDescriptor::new(target.clone(), current.args().to_vec());
        }
    }

    let raw = current.raw().clone();
    let args = current.args();

    if raw.is_collection_like() {
        let element = match args.len() {
            0 => TypeDescriptor::simple(RawType::Any),
            1 => args[0].clone(),
            _ => {
                return Err(arity_error(
                    descriptor,
                    "collection types take at most one type argument",
                ));
            }
        };
        let default = if raw.is_set_like() {
            RawType::HashSet
        } else {
            RawType::Vec
        };
        let concrete = concrete_container(&raw, config, default);
        if !concrete.is_collection_like() {
            return Err(bad_override(&raw, &concrete, "a collection type"));
        }
        return Ok(ResolvedType {
            descriptor: TypeDescriptor::new(concrete, vec![element]),
            shape: TypeShape::Collection,
        });
    }

    if raw.is_map_like() {
        let (key, value) = match args.len() {
            0 => (
                TypeDescriptor::simple(RawType::Str),
                TypeDescriptor::simple(RawType::Any),
            ),
            2 => (args[0].clone(), args[1].clone()),
            _ => {
                return Err(arity_error(
                    descriptor,
                    "map types take zero or two type arguments",
                ));
            }
        };
        // An unbounded key slot means "string" as far as JSON objects go.
        let key = if *key.raw() == RawType::Any {
            TypeDescriptor::simple(RawType::Str)
        } else {
            key
        };
        if !key.args().is_empty() {
            return Err(arity_error(descriptor, "map keys take no type arguments"));
        }
        key_decoders
            .ensure(key.raw())
            .map_err(|err| err.with_type_expr(descriptor.to_string()))?;
        let concrete = concrete_container(&raw, config, RawType::HashMap);
        if !concrete.is_map_like() {
            return Err(bad_override(&raw, &concrete, "a map type"));
        }
        return Ok(ResolvedType {
            descriptor: TypeDescriptor::new(concrete, vec![key, value]),
            shape: TypeShape::Map,
        });
    }

    if raw == RawType::Array {
        if args.len() != 1 {
            return Err(arity_error(
                descriptor,
                "array types take exactly one type argument",
            ));
        }
        return Ok(ResolvedType {
            descriptor: current,
            shape: TypeShape::Array,
        });
    }

    if raw.is_scalar() {
        if !args.is_empty() {
            return Err(arity_error(
                descriptor,
                "scalar types take no type arguments",
            ));
        }
        return Ok(ResolvedType {
            descriptor: current,
            shape: TypeShape::Scalar,
        });
    }

    let RawType::Named(name) = &raw else {
        return Err(Error::new(ErrorKind::Internal)
            .with_message("unclassified raw type")
            .with_type_expr(descriptor.to_string()));
    };
    if !args.is_empty() {
        return Err(arity_error(
            descriptor,
            "generic named types are not supported",
        ));
    }
    match schemas.get(name) {
        Some(TypeDef::Struct(_)) => Ok(ResolvedType {
            descriptor: current.clone(),
            shape: TypeShape::Structured,
        }),
        Some(TypeDef::Enum(_)) => Ok(ResolvedType {
            descriptor: current.clone(),
            shape: TypeShape::Enum,
        }),
        None => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("type `{name}` is not registered"))
            .with_type_expr(descriptor.to_string())
            .with_hint("Register the type in the schema before resolving a decoder.")),
    }
}

fn concrete_container(raw: &RawType, config: &Config, default: RawType) -> RawType {
    if raw.is_abstract_container() {
        config.override_for(raw).cloned().unwrap_or(default)
    } else {
        raw.clone()
    }
}

fn arity_error(descriptor: &TypeDescriptor, message: &str) -> Error {
    Error::new(ErrorKind::InvalidTypeArguments)
        .with_message(message)
        .with_type_expr(descriptor.to_string())
}

fn bad_override(from: &RawType, to: &RawType, wanted: &str) -> Error {
    Error::new(ErrorKind::Usage).with_message(format!(
        "configured override `{}` -> `{}` is not {wanted}",
        from.name(),
        to.name()
    ))
}
