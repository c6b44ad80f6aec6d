//! Purpose: Runtime type definitions backing named-type resolution.
//! Exports: `Binding`, `ClassDescriptor`, `EnumDescriptor`, `TypeDef`, `SchemaRegistry`, `SchemaFile`.
//! Role: The crate's stand-in for reflection; decoders are specialized against these records.
//! Invariants: Descriptors are plain data and never mutated after registration.
//! Invariants: Schema files are strict (unknown keys rejected) so typos fail loudly.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind};
use crate::core::types::TypeDescriptor;

/// One structured-type field: accepted input names plus decode-time flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Binding {
    pub name: String,
    #[serde(rename = "type")]
    pub value: TypeDescriptor,
    /// Accepted input names. `None` means "the field name itself"; an explicit
    /// empty list models a binding no input name can reach.
    #[serde(rename = "names", default, skip_serializing_if = "Option::is_none")]
    pub from_names: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub extra: bool,
    #[serde(default)]
    pub skip: bool,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            value,
            from_names: None,
            required: false,
            extra: false,
            skip: false,
        }
    }

    pub fn with_from_names(mut self, names: Vec<String>) -> Self {
        self.from_names = Some(names);
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_extra(mut self, extra: bool) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn accepted_names(&self) -> Vec<&str> {
        match &self.from_names {
            None => vec![self.name.as_str()],
            Some(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn has_accepted_name(&self) -> bool {
        match &self.from_names {
            None => true,
            Some(names) => !names.is_empty(),
        }
    }
}

/// The binding set for a structured type plus object-level decode flags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDescriptor {
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Unknown input names are rejected instead of skipped.
    #[serde(default)]
    pub track_extras: bool,
    /// Key/value wrapper transforms are declared for this type. Consulted by
    /// mode selection only; applying the transforms stays with the schema consumer.
    #[serde(default)]
    pub wrapper_transforms: bool,
}

impl ClassDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_track_extras(mut self, track_extras: bool) -> Self {
        self.track_extras = track_extras;
        self
    }

    pub fn with_wrapper_transforms(mut self, wrapper_transforms: bool) -> Self {
        self.wrapper_transforms = wrapper_transforms;
        self
    }
}

/// Variant names in declaration order; ordinal input indexes into this list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumDescriptor {
    pub variants: Vec<String>,
    /// Fallback variant for unmatched input; absent means unmatched input is an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl EnumDescriptor {
    pub fn new<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variants: variants.into_iter().map(Into::into).collect(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn default_index(&self) -> Option<usize> {
        let default = self.default.as_deref()?;
        self.variants.iter().position(|v| v == default)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeDef {
    Struct(ClassDescriptor),
    Enum(EnumDescriptor),
}

/// Named-type lookup table consulted during normalization and emission.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, TypeDef>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_struct(mut self, name: impl Into<String>, descriptor: ClassDescriptor) -> Self {
        self.types.insert(name.into(), TypeDef::Struct(descriptor));
        self
    }

    pub fn with_enum(mut self, name: impl Into<String>, descriptor: EnumDescriptor) -> Self {
        self.types.insert(name.into(), TypeDef::Enum(descriptor));
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// On-disk schema document: process configuration plus named-type definitions.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDef>,
}

impl SchemaFile {
    pub fn from_json(input: &str) -> Result<SchemaFile, Error> {
        serde_json::from_str(input).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("malformed schema document")
                .with_hint("Expected `{\"config\": {...}, \"types\": {\"name\": {\"struct\"|\"enum\": ...}}}`.")
                .with_source(err)
        })
    }

    pub fn registry(&self) -> SchemaRegistry {
        SchemaRegistry {
            types: self
                .types
                .iter()
                .map(|(name, def)| (name.clone(), def.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Binding, ClassDescriptor, EnumDescriptor, SchemaFile, TypeDef};
    use crate::core::types::TypeDescriptor;

    fn ty(expr: &str) -> TypeDescriptor {
        TypeDescriptor::parse(expr).expect(expr)
    }

    #[test]
    fn accepted_names_default_to_field_name() {
        let binding = Binding::new("count", ty("int"));
        assert_eq!(binding.accepted_names(), vec!["count"]);
        assert!(binding.has_accepted_name());

        let renamed = Binding::new("count", ty("int"))
            .with_from_names(vec!["count".into(), "n".into()]);
        assert_eq!(renamed.accepted_names(), vec!["count", "n"]);

        let unbound = Binding::new("count", ty("int")).with_from_names(Vec::new());
        assert!(unbound.accepted_names().is_empty());
        assert!(!unbound.has_accepted_name());
    }

    #[test]
    fn enum_default_index_requires_membership() {
        let known = EnumDescriptor::new(["red", "green"]).with_default("green");
        assert_eq!(known.default_index(), Some(1));

        let unknown = EnumDescriptor::new(["red", "green"]).with_default("blue");
        assert_eq!(unknown.default_index(), None);
    }

    #[test]
    fn schema_file_parses_structs_and_enums() {
        let doc = r#"{
            "types": {
                "demo.Node": {
                    "struct": {
                        "bindings": [
                            {"name": "name", "type": "str", "required": true},
                            {"name": "children", "type": "vec[demo.Node]"}
                        ]
                    }
                },
                "demo.Color": {
                    "enum": {"variants": ["red", "green"], "default": "red"}
                }
            }
        }"#;

        let schema = SchemaFile::from_json(doc).expect("schema");
        let registry = schema.registry();
        assert_eq!(registry.len(), 2);
        match registry.get("demo.Node") {
            Some(TypeDef::Struct(desc)) => {
                assert_eq!(desc.bindings.len(), 2);
                assert!(desc.bindings[0].required);
                assert_eq!(desc.bindings[1].value, ty("vec[demo.Node]"));
            }
            other => panic!("unexpected def: {other:?}"),
        }
        match registry.get("demo.Color") {
            Some(TypeDef::Enum(desc)) => assert_eq!(desc.default_index(), Some(0)),
            other => panic!("unexpected def: {other:?}"),
        }
    }

    #[test]
    fn schema_file_rejects_unknown_keys() {
        let doc = r#"{"types": {"demo.T": {"struct": {"bindingz": []}}}}"#;
        assert!(SchemaFile::from_json(doc).is_err());
    }

    #[test]
    fn builders_compose() {
        let desc = ClassDescriptor::new()
            .with_binding(Binding::new("id", ty("int")).with_required(true))
            .with_binding(Binding::new("debug", ty("any")).with_skip(true))
            .with_track_extras(true);
        assert_eq!(desc.bindings.len(), 2);
        assert!(desc.track_extras);
        assert!(!desc.wrapper_transforms);
    }
}
