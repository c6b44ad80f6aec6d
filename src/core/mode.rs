// Strict-vs-permissive field dispatch decision for structured types. Pure; no I/O.
use crate::core::config::Config;
use crate::core::schema::ClassDescriptor;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldDispatch {
    /// Binding lookup with required/extra/skip bookkeeping over the whole object.
    Strict,
    /// Direct name-to-handler dispatch; unmatched names are skipped silently.
    Permissive,
}

pub fn select(config: &Config, descriptor: &ClassDescriptor) -> FieldDispatch {
    if config.strict_all() {
        return FieldDispatch::Strict;
    }
    for binding in &descriptor.bindings {
        if binding.required || binding.extra || binding.skip {
            return FieldDispatch::Strict;
        }
    }
    if descriptor.track_extras {
        return FieldDispatch::Strict;
    }
    if descriptor.wrapper_transforms {
        return FieldDispatch::Strict;
    }
    // A schema with no reachable input name cannot use name dispatch at all.
    if !descriptor.bindings.iter().any(|b| b.has_accepted_name()) {
        return FieldDispatch::Strict;
    }
    FieldDispatch::Permissive
}
