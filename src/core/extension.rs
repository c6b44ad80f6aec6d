// Pluggable providers consulted, in registration order, before default resolution.
use std::sync::Arc;

use crate::core::emit::Decoder;
use crate::core::types::TypeDescriptor;

/// One resolution provider. The cache's singleflight property guarantees each
/// hook runs at most once per cache key per process.
pub trait Extension: Send + Sync {
    /// Rewrites the requested descriptor (e.g. binds an abstract type to a
    /// concrete implementation). `None` leaves it unchanged.
    fn rewrite(&self, _descriptor: &TypeDescriptor) -> Option<TypeDescriptor> {
        None
    }

    /// Supplies a finished decoder for the (key, descriptor) pair. The first
    /// provider returning `Some` wins and default resolution is skipped.
    fn provide(&self, _key: &str, _descriptor: &TypeDescriptor) -> Option<Arc<dyn Decoder>> {
        None
    }
}
