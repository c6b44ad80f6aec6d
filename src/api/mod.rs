//! Purpose: Define the stable public Rust API boundary for Castite.
//! Exports: Cache, schema, configuration, plan, and token-stream types.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the only public path consumers should import from.
//! Invariants: Internal helpers stay private and are not directly exposed.

pub use crate::core::artifact::{ArtifactStore, DirArtifacts};
pub use crate::core::cache::DecoderCache;
pub use crate::core::config::{Config, DUMP_PLANS_ENV, ResolutionMode};
pub use crate::core::emit::Decoder;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::extension::Extension;
pub use crate::core::mode::{FieldDispatch, select};
pub use crate::core::normalize::{KeyDecoder, KeyDecoderRegistry, ResolvedType, normalize};
pub use crate::core::plan::{KeyKind, Plan, PlanBinding, PlanField};
pub use crate::core::schema::{
    Binding, ClassDescriptor, EnumDescriptor, SchemaFile, SchemaRegistry, TypeDef,
};
pub use crate::core::types::{RawType, TypeDescriptor, TypeShape};
pub use crate::json::stream::{MAX_DEPTH, TokenKind, TokenStream};
