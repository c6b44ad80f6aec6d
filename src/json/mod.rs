//! Purpose: Internal JSON token boundary shared by emitted decoders.
//! Exports: `stream` module with the pull reader decoders drive.
//! Role: Single seam for token-level scanning so decode strategies avoid ad hoc byte logic.
//! Invariants: Runtime token reads go through `TokenStream`; no other module touches raw input.
//! Invariants: Reader APIs stay small and deterministic (no hidden global state).

pub mod stream;
