//! Configuration consumed by the attention factory and every variant.
//!
//! The struct is produced by an external configuration-loading collaborator
//! and treated as immutable once a module has been constructed. Validation
//! happens in [`AttentionConfig::validate`] before any parameter allocation.

use candle_core::{DType, Device};

use super::errors::AttentionError;

/// Positional-encoding strategy tag.
///
/// The projection front end stores but does not consume this; variants may
/// use it to decide how positions are injected upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionalEncoding {
    #[default]
    Learned,
    Rotary,
    Alibi,
}

/// Preferred execution backend for the attention kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendSelection {
    /// Use the fused kernel when available, fall back to the reference path.
    #[default]
    Auto,
    /// Always take the reference path, even when a fused kernel exists.
    ReferenceOnly,
    /// Require the fused kernel; construction fails when it is unavailable.
    /// Only the softmax-scoring variants (`causal`, `grouped`) have a fused
    /// code path; `retention` and `memory` reject this selection outright.
    FusedOnly,
}

/// Configuration driving attention construction.
#[derive(Debug, Clone)]
pub struct AttentionConfig {
    /// Variant tag dispatched by [`create_attention`](crate::factory::create_attention).
    pub attention_type: String,
    /// Total embedding width; must be divisible by `n_head`.
    pub n_embd: usize,
    /// Number of query heads.
    pub n_head: usize,
    /// Number of key/value heads for grouped-query attention. `None` means
    /// one K/V head per query head (standard multi-head attention).
    pub n_kv_head: Option<usize>,
    /// Probability for attention-weight and residual dropout, in `[0, 1)`.
    pub dropout: f32,
    /// Whether linear projections carry an additive bias.
    pub bias: bool,
    /// Maximum sequence length; sizes the reference-path causal mask.
    pub block_size: usize,
    /// Opaque model-family tag, stored for variants.
    pub model_type: String,
    /// Positional-encoding tag, stored for variants.
    pub pos_enc_type: PositionalEncoding,
    /// Number of learned persistent slots for the memory variant.
    pub memory_slots: usize,
    /// Execution backend preference.
    pub backend: BackendSelection,
    /// Parameter and activation dtype.
    pub dtype: DType,
    /// Device parameters are allocated on.
    pub device: Device,
}

impl AttentionConfig {
    /// Build a configuration with project defaults for the remaining knobs.
    pub fn new(attention_type: impl Into<String>, n_embd: usize, n_head: usize) -> Self {
        Self {
            attention_type: attention_type.into(),
            n_embd,
            n_head,
            n_kv_head: None,
            dropout: 0.0,
            bias: true,
            block_size: 1024,
            model_type: "gpt".to_string(),
            pos_enc_type: PositionalEncoding::default(),
            memory_slots: 16,
            backend: BackendSelection::default(),
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    /// Width of one attention head.
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Effective number of key/value heads.
    pub fn kv_heads(&self) -> usize {
        self.n_kv_head.unwrap_or(self.n_head)
    }

    /// Check structural invariants. Must pass before parameters are
    /// allocated; the variant tag itself is checked by the factory, not here.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.n_embd == 0 {
            return Err(invalid("n_embd must be greater than zero"));
        }
        if self.n_head == 0 {
            return Err(invalid("n_head must be greater than zero"));
        }
        if self.n_embd % self.n_head != 0 {
            return Err(AttentionError::InvalidConfig {
                message: format!(
                    "n_embd ({}) must be divisible by n_head ({})",
                    self.n_embd, self.n_head
                ),
            });
        }
        if let Some(kv) = self.n_kv_head {
            if kv == 0 || self.n_head % kv != 0 {
                return Err(AttentionError::InvalidConfig {
                    message: format!(
                        "n_head ({}) must be divisible by n_kv_head ({kv})",
                        self.n_head
                    ),
                });
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(AttentionError::InvalidConfig {
                message: format!("dropout must be in [0, 1), got {}", self.dropout),
            });
        }
        if self.block_size == 0 {
            return Err(invalid("block_size must be greater than zero"));
        }
        if self.memory_slots == 0 {
            return Err(invalid("memory_slots must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> AttentionError {
    AttentionError::InvalidConfig {
        message: message.to_string(),
    }
}
