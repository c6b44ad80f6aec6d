//! Purpose: Pure specialization plans describing one decode strategy per resolved type.
//! Exports: `Plan`, `PlanBinding`, `PlanField`, `KeyKind`.
//! Role: Planning layer separated from execution; doubles as the exported artifact format.
//! Invariants: No side effects; a plan depends only on the resolved type and its schema.
//! Invariants: Sub-strategies are referenced by cache key, keeping recursive plans finite.

use serde::{Deserialize, Serialize};

use crate::core::types::RawType;

/// Map-key families with a registered key decoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Str,
    Int,
    Float,
    Bool,
}

impl KeyKind {
    pub fn raw(&self) -> RawType {
        match self {
            KeyKind::Str => RawType::Str,
            KeyKind::Int => RawType::Int,
            KeyKind::Float => RawType::Float,
            KeyKind::Bool => RawType::Bool,
        }
    }

    pub fn from_raw(raw: &RawType) -> Option<KeyKind> {
        match raw {
            RawType::Str => Some(KeyKind::Str),
            RawType::Int => Some(KeyKind::Int),
            RawType::Float => Some(KeyKind::Float),
            RawType::Bool => Some(KeyKind::Bool),
            _ => None,
        }
    }
}

/// Strict-mode binding row: lookup names plus presence bookkeeping flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanBinding {
    pub field: String,
    pub names: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub extra: bool,
    #[serde(default)]
    pub skip: bool,
    pub value: String,
}

/// Permissive-mode dispatch row: one accepted input name to one handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanField {
    pub name: String,
    pub field: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Plan {
    Array {
        element: String,
    },
    Collection {
        element: String,
        #[serde(default)]
        dedupe: bool,
    },
    Map {
        key: KeyKind,
        value: String,
    },
    Enum {
        variants: Vec<String>,
        #[serde(default)]
        default: Option<usize>,
    },
    StrictObject {
        bindings: Vec<PlanBinding>,
        #[serde(default)]
        track_extras: bool,
    },
    HashObject {
        fields: Vec<PlanField>,
    },
}

impl Plan {
    /// Cache keys of the sub-strategies this plan drives. Skipped bindings are
    /// consumed without decoding, so their types are not referenced.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Plan::Array { element } | Plan::Collection { element, .. } => vec![element.as_str()],
            Plan::Map { value, .. } => vec![value.as_str()],
            Plan::Enum { .. } => Vec::new(),
            Plan::StrictObject { bindings, .. } => bindings
                .iter()
                .filter(|b| !b.skip)
                .map(|b| b.value.as_str())
                .collect(),
            Plan::HashObject { fields } => fields.iter().map(|f| f.value.as_str()).collect(),
        }
    }

    pub fn render_json(&self) -> String {
        match serde_json::to_string_pretty(self) {
            Ok(rendered) => rendered,
            Err(_) => String::from("<plan serialization failed>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyKind, Plan, PlanBinding, PlanField};

    fn strict_sample() -> Plan {
        Plan::StrictObject {
            bindings: vec![
                PlanBinding {
                    field: "name".into(),
                    names: vec!["name".into()],
                    required: true,
                    extra: false,
                    skip: false,
                    value: "str".into(),
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
            track_extras: true,
        }
    }

    #[test]
    fn serialization_round_trips() {
        let plans = [
            Plan::Array {
                element: "int".into(),
            },
            Plan::Collection {
                element: "demo.Node".into(),
                dedupe: true,
            },
            Plan::Map {
                key: KeyKind::Int,
                value: "vec[str]".into(),
            },
            Plan::Enum {
                variants: vec!["red".into(), "green".into()],
                default: Some(0),
            },
            strict_sample(),
            Plan::HashObject {
                fields: vec![PlanField {
                    name: "n".into(),
                    field: "name".into(),
                    value: "str".into(),
                }],
            },
        ];

        for plan in plans {
            let rendered = serde_json::to_string(&plan).expect("serialize");
            let parsed: Plan = serde_json::from_str(&rendered).expect("deserialize");
            assert_eq!(parsed, plan);
        }
    }

    #[test]
    fn references_exclude_skipped_bindings() {
        assert_eq!(strict_sample().references(), vec!["str"]);
        let map = Plan::Map {
            key: KeyKind::Str,
            value: "demo.Node".into(),
        };
        assert_eq!(map.references(), vec!["demo.Node"]);
        let color = Plan::Enum {
            variants: vec!["red".into()],
            default: None,
        };
        assert!(color.references().is_empty());
    }

    #[test]
    fn artifact_form_is_tagged_by_strategy() {
        let rendered = serde_json::to_string(&Plan::Array {
            element: "int".into(),
        })
        .expect("serialize");
        assert!(rendered.contains(r#""strategy":"array""#));
    }
}
