//! Interchangeable attention mechanisms for decoder-only transformers.
//!
//! The crate exposes a single construction entry point,
//! [`create_attention`], which maps a configuration tag to one of four
//! concrete implementations of the [`AttentionLayer`] trait:
//!
//! * `causal` — scaled dot-product self-attention with a causal mask,
//! * `grouped` — grouped-query attention sharing K/V heads across query
//!   head groups,
//! * `retention` — multi-scale retention with a per-head decaying
//!   recurrence instead of softmax scoring,
//! * `memory` — causal attention over the sequence extended with learned
//!   persistent memory slots (also reachable via the legacy `hkproj` tag).
//!
//! Every variant accepts and returns tensors shaped `[batch, seq_len,
//! n_embd]` and composes the shared [`QkvProjection`] front end: one fused
//! linear producing Q, K, and V, reshaped to `[batch, n_heads, seq_len,
//! head_dim]` before variant-specific scoring.
//!
//! Dropout is applied only when the configured probability is positive, so
//! forwards with `dropout == 0.0` are deterministic. Each constructed module
//! owns its parameters; nothing is shared between instances.

pub mod core;
pub mod factory;
pub mod masks;
pub mod projection;
pub mod variants;

pub(crate) mod fused;

pub use crate::core::{
    AttentionConfig, AttentionError, AttentionLayer, BackendSelection, PositionalEncoding,
};
pub use factory::create_attention;
pub use projection::{Backend, ProjectedQkv, QkvProjection};
