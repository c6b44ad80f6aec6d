//! Purpose: Shared core library crate used by the `castite` CLI and tests.
//! Exports: `api` (stable surface), `core` (cache, schema, planning, errors), `json` (token reader).
//! Role: Internal library backing the binary; not yet a stable public SDK.
//! Invariants: Treat the crate API as internal until a dedicated library release.
//! Invariants: Decoder resolution state is explicit (`DecoderCache` values, no ambient globals).
pub mod api;
pub mod core;
pub mod json;
