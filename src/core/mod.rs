//! Core trait and types shared across attention implementations.
//!
//! Every implementation consumes hidden states shaped `[batch, seq_len,
//! n_embd]` and returns a tensor of the same shape and dtype. Variant
//! selection happens once, at construction time, through
//! [`create_attention`](crate::factory::create_attention); afterwards the
//! caller only sees this trait.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{AttentionConfig, BackendSelection, PositionalEncoding};
pub use errors::AttentionError;

/// Unified interface over the attention variants.
///
/// * `hidden` is shaped `[batch, seq_len, n_embd]`.
/// * The returned tensor mirrors the input shape and dtype.
/// * Parameters are read-only during `forward`; callers must not run an
///   optimizer step on the same instance concurrently.
pub trait AttentionLayer: std::fmt::Debug + Send + Sync {
    /// Run one forward pass over a batch of hidden states.
    fn forward(&self, hidden: &Tensor) -> Result<Tensor, AttentionError>;

    /// Short tag identifying the concrete variant, e.g. `"causal"`.
    fn kind(&self) -> &'static str;
}
