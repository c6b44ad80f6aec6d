//! Purpose: Turn resolved types into plans and plans into runnable decoders.
//! Exports: `Decoder`, `native_decoder`, `emit_plan`, `compile_plan`, `reflective_decoder`.
//! Role: The specialization backend; a compiled decoder is a composed table of
//! sub-decoders resolved through the cache.
//! Invariants: Decoding identical input through an emitted, compiled-from-artifact,
//! or reflective decoder yields value-equal results and identical failure outcomes.
//! Invariants: No partial value escapes a failed decode.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind};
use crate::core::mode::{self, FieldDispatch};
use crate::core::normalize::{KeyDecoder, KeyDecoderRegistry, ResolvedType};
use crate::core::plan::{KeyKind, Plan, PlanBinding, PlanField};
use crate::core::schema::{ClassDescriptor, EnumDescriptor, SchemaRegistry, TypeDef};
use crate::core::types::{RawType, TypeDescriptor, TypeShape};
use crate::json::stream::{TokenKind, TokenStream};

/// Capability converting a token stream into a value for one resolved type.
pub trait Decoder: Send + Sync {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error>;

    /// True only for the transient recursion sentinel published mid-generation.
    fn is_placeholder(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Decoder")
    }
}

/// Callback resolving a referenced cache key to its decoder.
pub(crate) type RefResolver<'a> = dyn FnMut(&str) -> Result<Arc<dyn Decoder>, Error> + 'a;

struct AnyDecoder;

impl Decoder for AnyDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        stream.read_value()
    }
}

struct BoolDecoder;

impl Decoder for BoolDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        Ok(Value::Bool(stream.read_bool()?))
    }
}

struct IntDecoder;

impl Decoder for IntDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        let n = stream.read_number()?;
        if n.is_i64() || n.is_u64() {
            Ok(Value::Number(n))
        } else {
            Err(Error::new(ErrorKind::Decode)
                .with_message("expected integer")
                .with_offset(stream.position() as u64))
        }
    }
}

struct FloatDecoder;

impl Decoder for FloatDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        Ok(Value::Number(stream.read_number()?))
    }
}

struct StrDecoder;

impl Decoder for StrDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        if stream.try_read_null()? {
            return Ok(Value::Null);
        }
        Ok(Value::String(stream.read_string()?))
    }
}

/// Builtin decoder table keyed by normalized raw type.
pub(crate) fn native_decoder(raw: &RawType) -> Option<Arc<dyn Decoder>> {
    match raw {
        RawType::Any => Some(Arc::new(AnyDecoder)),
        RawType::Bool => Some(Arc::new(BoolDecoder)),
        RawType::Int => Some(Arc::new(IntDecoder)),
        RawType::Float => Some(Arc::new(FloatDecoder)),
        RawType::Str => Some(Arc::new(StrDecoder)),
        _ => None,
    }
}

struct SeqDecoder {
    element: Arc<dyn Decoder>,
    dedupe: bool,
}

impl Decoder for SeqDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        if stream.try_read_null()? {
            return Ok(Value::Null);
        }
        stream.begin_array()?;
        let mut items: Vec<Value> = Vec::new();
        let mut first = true;
        while stream.array_next(first)? {
            let item = self.element.decode(stream)?;
            if !self.dedupe || !items.contains(&item) {
                items.push(item);
            }
            first = false;
        }
        Ok(Value::Array(items))
    }
}

struct MapDecoder {
    key: Arc<dyn KeyDecoder>,
    value: Arc<dyn Decoder>,
}

impl Decoder for MapDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        if stream.try_read_null()? {
            return Ok(Value::Null);
        }
        stream.begin_object()?;
        let mut map = Map::new();
        let mut first = true;
        while let Some(key) = stream.object_next(first)? {
            let canonical = self
                .key
                .decode_key(&key)
                .map_err(|err| err.with_offset(stream.position() as u64))?;
            let value = self.value.decode(stream)?;
            map.insert(canonical, value);
            first = false;
        }
        Ok(Value::Object(map))
    }
}

struct EnumDecoder {
    variants: Vec<String>,
    index: HashMap<String, usize>,
    default: Option<usize>,
}

impl EnumDecoder {
    fn new(variants: Vec<String>, default: Option<usize>) -> Result<Self, Error> {
        if let Some(d) = default {
            if d >= variants.len() {
                return Err(Error::new(ErrorKind::Generation)
                    .with_message("enum default ordinal out of range"));
            }
        }
        let index = variants
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i))
            .collect();
        Ok(Self {
            variants,
            index,
            default,
        })
    }

    fn fallback(&self, stream: &TokenStream<'_>, message: String) -> Result<Value, Error> {
        match self.default {
            Some(d) => Ok(Value::String(self.variants[d].clone())),
            None => Err(Error::new(ErrorKind::Decode)
                .with_message(message)
                .with_offset(stream.position() as u64)),
        }
    }
}

impl Decoder for EnumDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        if stream.try_read_null()? {
            return Ok(Value::Null);
        }
        match stream.peek_kind()? {
            TokenKind::String => {
                let name = stream.read_string()?;
                match self.index.get(&name) {
                    Some(&i) => Ok(Value::String(self.variants[i].clone())),
                    None => self.fallback(stream, format!("unknown variant `{name}`")),
                }
            }
            TokenKind::Number => {
                let n = stream.read_number()?;
                match n.as_u64() {
                    Some(ordinal) if (ordinal as usize) < self.variants.len() => {
                        Ok(Value::String(self.variants[ordinal as usize].clone()))
                    }
                    _ => self.fallback(stream, format!("variant ordinal `{n}` out of range")),
                }
            }
            _ => Err(Error::new(ErrorKind::Decode)
                .with_message("expected variant name or ordinal")
                .with_offset(stream.position() as u64)),
        }
    }
}

struct StrictBinding {
    field: String,
    required: bool,
    extra: bool,
    skip: bool,
    value: Option<Arc<dyn Decoder>>,
}

/// Binding-lookup decode with required/extra/skip bookkeeping over the whole object.
struct StrictObjectDecoder {
    bindings: Vec<StrictBinding>,
    index: HashMap<String, usize>,
    track_extras: bool,
}

impl Decoder for StrictObjectDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        if stream.try_read_null()? {
            return Ok(Value::Null);
        }
        stream.begin_object()?;
        let mut object = Map::new();
        let mut seen = vec![false; self.bindings.len()];
        let mut first = true;
        while let Some(key) = stream.object_next(first)? {
            first = false;
            let Some(&slot) = self.index.get(&key) else {
                if self.track_extras {
                    return Err(Error::new(ErrorKind::Decode)
                        .with_message(format!("unknown field `{key}`"))
                        .with_offset(stream.position() as u64));
                }
                stream.skip_value()?;
                continue;
            };
            let binding = &self.bindings[slot];
            if binding.extra {
                return Err(Error::new(ErrorKind::Decode)
                    .with_message(format!("field `{key}` must not be present"))
                    .with_offset(stream.position() as u64));
            }
            seen[slot] = true;
            if binding.skip {
                stream.skip_value()?;
                continue;
            }
            let decoder = binding.value.as_ref().ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("binding has no sub-decoder")
            })?;
            let value = decoder.decode(stream)?;
            object.insert(binding.field.clone(), value);
        }
        let missing: Vec<&str> = self
            .bindings
            .iter()
            .zip(&seen)
            .filter(|(binding, seen)| binding.required && !**seen)
            .map(|(binding, _)| binding.field.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::new(ErrorKind::Decode)
                .with_message(format!("missing required field(s): {}", missing.join(", ")))
                .with_offset(stream.position() as u64));
        }
        Ok(Value::Object(object))
    }
}

/// Name-to-handler dispatch with no presence bookkeeping.
struct HashObjectDecoder {
    index: HashMap<String, (String, Arc<dyn Decoder>)>,
}

impl Decoder for HashObjectDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        if stream.try_read_null()? {
            return Ok(Value::Null);
        }
        stream.begin_object()?;
        let mut object = Map::new();
        let mut first = true;
        while let Some(key) = stream.object_next(first)? {
            first = false;
            match self.index.get(&key) {
                Some((field, decoder)) => {
                    let value = decoder.decode(stream)?;
                    object.insert(field.clone(), value);
                }
                None => stream.skip_value()?,
            }
        }
        Ok(Value::Object(object))
    }
}

fn class_descriptor<'a>(
    schemas: &'a SchemaRegistry,
    descriptor: &TypeDescriptor,
) -> Result<&'a ClassDescriptor, Error> {
    if let RawType::Named(name) = descriptor.raw() {
        if let Some(TypeDef::Struct(desc)) = schemas.get(name) {
            return Ok(desc);
        }
    }
    Err(Error::new(ErrorKind::Internal)
        .with_message("structured shape without a struct definition")
        .with_type_expr(descriptor.to_string()))
}

fn enum_descriptor<'a>(
    schemas: &'a SchemaRegistry,
    descriptor: &TypeDescriptor,
) -> Result<&'a EnumDescriptor, Error> {
    if let RawType::Named(name) = descriptor.raw() {
        if let Some(TypeDef::Enum(desc)) = schemas.get(name) {
            return Ok(desc);
        }
    }
    Err(Error::new(ErrorKind::Internal)
        .with_message("enum shape without an enum definition")
        .with_type_expr(descriptor.to_string()))
}

fn enum_plan(descriptor: &TypeDescriptor, desc: &EnumDescriptor) -> Result<Plan, Error> {
    let default = match &desc.default {
        None => None,
        Some(name) => match desc.default_index() {
            Some(index) => Some(index),
            None => {
                return Err(Error::new(ErrorKind::Generation)
                    .with_message(format!("default variant `{name}` is not a member"))
                    .with_type_expr(descriptor.to_string()));
            }
        },
    };
    Ok(Plan::Enum {
        variants: desc.variants.clone(),
        default,
    })
}

/// Builds the specialization plan for one resolved, non-native type.
pub(crate) fn emit_plan(
    resolved: &ResolvedType,
    config: &Config,
    schemas: &SchemaRegistry,
) -> Result<Plan, Error> {
    let descriptor = &resolved.descriptor;
    match resolved.shape {
        TypeShape::Scalar => Err(Error::new(ErrorKind::Internal)
            .with_message("scalar types use the native decoder table")
            .with_type_expr(descriptor.to_string())),
        TypeShape::Array => Ok(Plan::Array {
            element: descriptor.args()[0].cache_key(),
        }),
        TypeShape::Collection => Ok(Plan::Collection {
            element: descriptor.args()[0].cache_key(),
            dedupe: descriptor.raw().is_set_like(),
        }),
        TypeShape::Map => {
            let key = KeyKind::from_raw(descriptor.args()[0].raw()).ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message("map key survived normalization without a key decoder")
                    .with_type_expr(descriptor.to_string())
            })?;
            Ok(Plan::Map {
                key,
                value: descriptor.args()[1].cache_key(),
            })
        }
        TypeShape::Enum => enum_plan(descriptor, enum_descriptor(schemas, descriptor)?),
        TypeShape::Structured => {
            let desc = class_descriptor(schemas, descriptor)?;
            match mode::select(config, desc) {
                FieldDispatch::Strict => {
                    let bindings = desc
                        .bindings
                        .iter()
                        .map(|b| PlanBinding {
                            field: b.name.clone(),
                            names: b.accepted_names().iter().map(|n| n.to_string()).collect(),
                            required: b.required,
                            extra: b.extra,
                            skip: b.skip,
                            value: b.value.cache_key(),
                        })
                        .collect();
                    Ok(Plan::StrictObject {
                        bindings,
                        track_extras: desc.track_extras,
                    })
                }
                FieldDispatch::Permissive => {
                    let mut fields = Vec::new();
                    for b in &desc.bindings {
                        for name in b.accepted_names() {
                            fields.push(PlanField {
                                name: name.to_string(),
                                field: b.name.clone(),
                                value: b.value.cache_key(),
                            });
                        }
                    }
                    Ok(Plan::HashObject { fields })
                }
            }
        }
    }
}

/// Compiles a plan into a decoder, resolving sub-strategy references through `resolve`.
pub(crate) fn compile_plan(
    plan: &Plan,
    keys: &KeyDecoderRegistry,
    resolve: &mut RefResolver<'_>,
) -> Result<Arc<dyn Decoder>, Error> {
    match plan {
        Plan::Array { element } => Ok(Arc::new(SeqDecoder {
            element: resolve(element)?,
            dedupe: false,
        })),
        Plan::Collection { element, dedupe } => Ok(Arc::new(SeqDecoder {
            element: resolve(element)?,
            dedupe: *dedupe,
        })),
        Plan::Map { key, value } => Ok(Arc::new(MapDecoder {
            key: keys.ensure(&key.raw())?,
            value: resolve(value)?,
        })),
        Plan::Enum { variants, default } => {
            Ok(Arc::new(EnumDecoder::new(variants.clone(), *default)?))
        }
        Plan::StrictObject {
            bindings,
            track_extras,
        } => {
            let mut rows = Vec::with_capacity(bindings.len());
            let mut index = HashMap::new();
            for (slot, binding) in bindings.iter().enumerate() {
                let value = if binding.skip {
                    None
                } else {
                    Some(resolve(&binding.value)?)
                };
                for name in &binding.names {
                    index.insert(name.clone(), slot);
                }
                rows.push(StrictBinding {
                    field: binding.field.clone(),
                    required: binding.required,
                    extra: binding.extra,
                    skip: binding.skip,
                    value,
                });
            }
            Ok(Arc::new(StrictObjectDecoder {
                bindings: rows,
                index,
                track_extras: *track_extras,
            }))
        }
        Plan::HashObject { fields } => {
            let mut index = HashMap::new();
            for field in fields {
                let decoder = resolve(&field.value)?;
                index.insert(field.name.clone(), (field.field.clone(), decoder));
            }
            Ok(Arc::new(HashObjectDecoder { index }))
        }
    }
}

/// Descriptor-driven decoder with full bookkeeping; no plan, no mode selection.
pub(crate) fn reflective_decoder(
    resolved: &ResolvedType,
    schemas: &SchemaRegistry,
    keys: &KeyDecoderRegistry,
    resolve: &mut RefResolver<'_>,
) -> Result<Arc<dyn Decoder>, Error> {
    let descriptor = &resolved.descriptor;
    match resolved.shape {
        TypeShape::Scalar => Err(Error::new(ErrorKind::Internal)
            .with_message("scalar types use the native decoder table")
            .with_type_expr(descriptor.to_string())),
        TypeShape::Array => Ok(Arc::new(SeqDecoder {
            element: resolve(&descriptor.args()[0].cache_key())?,
            dedupe: false,
        })),
        TypeShape::Collection => Ok(Arc::new(SeqDecoder {
            element: resolve(&descriptor.args()[0].cache_key())?,
            dedupe: descriptor.raw().is_set_like(),
        })),
        TypeShape::Map => Ok(Arc::new(MapDecoder {
            key: keys.ensure(descriptor.args()[0].raw())?,
            value: resolve(&descriptor.args()[1].cache_key())?,
        })),
        TypeShape::Enum => {
            let desc = enum_descriptor(schemas, descriptor)?;
            let Plan::Enum { variants, default } = enum_plan(descriptor, desc)? else {
                return Err(Error::new(ErrorKind::Internal).with_message("enum plan mismatch"));
            };
            Ok(Arc::new(EnumDecoder::new(variants, default)?))
        }
        TypeShape::Structured => {
            let desc = class_descriptor(schemas, descriptor)?;
            let mut rows = Vec::with_capacity(desc.bindings.len());
            let mut index = HashMap::new();
            for (slot, binding) in desc.bindings.iter().enumerate() {
                let value = if binding.skip {
                    None
                } else {
                    Some(resolve(&binding.value.cache_key())?)
                };
                for name in binding.accepted_names() {
                    index.insert(name.to_string(), slot);
                }
                rows.push(StrictBinding {
                    field: binding.name.clone(),
                    required: binding.required,
                    extra: binding.extra,
                    skip: binding.skip,
                    value,
                });
            }
            Ok(Arc::new(StrictObjectDecoder {
                bindings: rows,
                index,
                track_extras: desc.track_extras,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::{Decoder, compile_plan, native_decoder};
    use crate::core::error::ErrorKind;
    use crate::core::normalize::KeyDecoderRegistry;
    use crate::core::plan::{KeyKind, Plan, PlanBinding, PlanField};
    use crate::core::types::RawType;
    use crate::json::stream::TokenStream;

    fn resolve_native(key: &str) -> Result<Arc<dyn Decoder>, crate::core::error::Error> {
        native_decoder(&RawType::from_name(key)).ok_or_else(|| {
            crate::core::error::Error::new(ErrorKind::Internal)
                .with_message(format!("test resolver has no decoder for `{key}`"))
        })
    }

    fn decode(plan: &Plan, input: &str) -> Result<Value, crate::core::error::Error> {
        let keys = KeyDecoderRegistry::new();
        let decoder = compile_plan(plan, &keys, &mut resolve_native).expect("compile");
        let mut stream = TokenStream::from_str(input);
        let value = decoder.decode(&mut stream)?;
        stream.expect_end()?;
        Ok(value)
    }

    #[test]
    fn sequence_decoding_and_set_dedupe() {
        let list = Plan::Collection {
            element: "int".into(),
            dedupe: false,
        };
        assert_eq!(decode(&list, "[1, 2, 2]").unwrap(), json!([1, 2, 2]));

        let set = Plan::Collection {
            element: "int".into(),
            dedupe: true,
        };
        assert_eq!(decode(&set, "[1, 2, 2, 1]").unwrap(), json!([1, 2]));

        assert_eq!(decode(&list, "null").unwrap(), Value::Null);
        assert!(decode(&list, r#"[1, "x"]"#).is_err());
    }

    #[test]
    fn integer_elements_reject_fractions() {
        let list = Plan::Array {
            element: "int".into(),
        };
        assert_eq!(decode(&list, "[1, -2]").unwrap(), json!([1, -2]));
        let err = decode(&list, "[1.5]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn map_keys_are_canonicalized() {
        let map = Plan::Map {
            key: KeyKind::Int,
            value: "str".into(),
        };
        assert_eq!(
            decode(&map, r#"{"007": "a", "-3": "b"}"#).unwrap(),
            json!({"7": "a", "-3": "b"})
        );
        assert!(decode(&map, r#"{"seven": "a"}"#).is_err());
    }

    #[test]
    fn enum_names_ordinals_and_default() {
        let color = Plan::Enum {
            variants: vec!["red".into(), "green".into()],
            default: None,
        };
        assert_eq!(decode(&color, r#""green""#).unwrap(), json!("green"));
        assert_eq!(decode(&color, "0").unwrap(), json!("red"));
        assert!(decode(&color, r#""blue""#).is_err());
        assert!(decode(&color, "7").is_err());
        assert!(decode(&color, "true").is_err());

        let lenient = Plan::Enum {
            variants: vec!["red".into(), "green".into()],
            default: Some(0),
        };
        assert_eq!(decode(&lenient, r#""blue""#).unwrap(), json!("red"));
        assert_eq!(decode(&lenient, "7").unwrap(), json!("red"));
    }

    #[test]
    fn strict_object_enforces_bookkeeping() {
        let plan = Plan::StrictObject {
            bindings: vec![
                PlanBinding {
                    field: "id".into(),
                    names: vec!["id".into()],
                    required: true,
                    extra: false,
                    skip: false,
                    value: "int".into(),
                },
                PlanBinding {
                    field: "legacy".into(),
                    names: vec!["legacy".into()],
                    required: false,
                    extra: true,
                    skip: false,
                    value: "any".into(),
                },
                PlanBinding {
                    field: "debug".into(),
                    names: vec!["debug".into()],
                    required: false,
                    extra: false,
                    skip: true,
                    value: "any".into(),
                },
            ],
            track_extras: false,
        };

        assert_eq!(
            decode(&plan, r#"{"id": 7, "debug": {"noisy": true}}"#).unwrap(),
            json!({"id": 7})
        );
        assert_eq!(
            decode(&plan, r#"{"id": 7, "unknown": [1]}"#).unwrap(),
            json!({"id": 7})
        );

        let err = decode(&plan, r#"{"debug": 1}"#).unwrap_err();
        assert!(err.to_string().contains("missing required field(s): id"));

        let err = decode(&plan, r#"{"id": 7, "legacy": 1}"#).unwrap_err();
        assert!(err.to_string().contains("`legacy` must not be present"));
    }

    #[test]
    fn strict_object_rejects_unknowns_when_tracking_extras() {
        let plan = Plan::StrictObject {
            bindings: vec![PlanBinding {
                field: "id".into(),
                names: vec!["id".into()],
                required: false,
                extra: false,
                skip: false,
                value: "int".into(),
            }],
            track_extras: true,
        };
        assert_eq!(decode(&plan, r#"{"id": 1}"#).unwrap(), json!({"id": 1}));
        let err = decode(&plan, r#"{"id": 1, "other": 2}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field `other`"));
    }

    #[test]
    fn hash_object_dispatches_without_bookkeeping() {
        let plan = Plan::HashObject {
            fields: vec![
                PlanField {
                    name: "n".into(),
                    field: "name".into(),
                    value: "str".into(),
                },
                PlanField {
                    name: "name".into(),
                    field: "name".into(),
                    value: "str".into(),
                },
            ],
        };
        assert_eq!(
            decode(&plan, r#"{"n": "a", "unknown": {"deep": [1]}}"#).unwrap(),
            json!({"name": "a"})
        );
        assert_eq!(decode(&plan, r#"{}"#).unwrap(), json!({}));
        assert_eq!(decode(&plan, "null").unwrap(), Value::Null);
    }

    #[test]
    fn corrupt_enum_default_fails_compilation() {
        let keys = KeyDecoderRegistry::new();
        let plan = Plan::Enum {
            variants: vec!["red".into()],
            default: Some(5),
        };
        let err = compile_plan(&plan, &keys, &mut resolve_native).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);
    }
}
