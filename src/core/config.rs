// Process-wide resolution configuration consulted at cache construction time.
use std::collections::HashMap;
use std::env;

use serde::Deserialize;

use crate::core::types::RawType;

/// How decoders come into existence for this process.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// Decode generically through descriptors; no specialization plans.
    Reflective,
    /// Resolve lazily, consulting exported artifacts before emitting fresh plans.
    #[default]
    Hybrid,
    /// Serve only preloaded artifacts; any other key is an error.
    AheadOfTime,
}

/// Environment switch mirrored into `dump_plans` unless overridden explicitly.
pub const DUMP_PLANS_ENV: &str = "CASTITE_DUMP_PLANS";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    mode: ResolutionMode,
    strict_all: bool,
    overrides: HashMap<RawType, RawType>,
    dump_plans: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ResolutionMode::default(),
            strict_all: false,
            overrides: HashMap::new(),
            dump_plans: dump_plans_from_env(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strict_matching(mut self, strict_all: bool) -> Self {
        self.strict_all = strict_all;
        self
    }

    pub fn with_override(mut self, from: RawType, to: RawType) -> Self {
        self.overrides.insert(from, to);
        self
    }

    pub fn with_dump_plans(mut self, dump_plans: bool) -> Self {
        self.dump_plans = dump_plans;
        self
    }

    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    pub fn strict_all(&self) -> bool {
        self.strict_all
    }

    pub fn override_for(&self, raw: &RawType) -> Option<&RawType> {
        self.overrides.get(raw)
    }

    pub fn dump_plans(&self) -> bool {
        self.dump_plans
    }
}

fn dump_plans_from_env() -> bool {
    match env::var(DUMP_PLANS_ENV) {
        Ok(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}
