//! Causal self-attention: masked scaled dot-product scoring.

use candle_core::Tensor;

use crate::core::{AttentionConfig, AttentionError, AttentionLayer};
use crate::projection::{Backend, QkvProjection};

use super::{attention_probs, expand_kv_heads};

/// Scaled dot-product self-attention where each token attends to itself and
/// its predecessors only.
#[derive(Debug)]
pub struct CausalSelfAttention {
    proj: QkvProjection,
    scale: f64,
}

impl CausalSelfAttention {
    pub fn new(config: &AttentionConfig) -> Result<Self, AttentionError> {
        let proj = QkvProjection::new(config)?;
        let scale = 1.0 / (proj.head_dim() as f64).sqrt();
        Ok(Self { proj, scale })
    }
}

impl AttentionLayer for CausalSelfAttention {
    fn forward(&self, hidden: &Tensor) -> Result<Tensor, AttentionError> {
        let projected = self.proj.project(hidden)?;
        let repeats = self.proj.n_head() / self.proj.kv_heads();
        let k = expand_kv_heads(&projected.k, repeats)?;
        let v = expand_kv_heads(&projected.v, repeats)?;

        let context = match self.proj.backend() {
            Backend::Fused => crate::fused::flash_attention(&projected.q, &k, &v, self.scale as f32)?,
            Backend::Reference => {
                let mask = self.proj.causal_mask(projected.seq_len, projected.seq_len)?;
                let probs = attention_probs(&projected.q, &k, Some(&mask), self.scale)?;
                let probs = self.proj.attn_dropout(&probs)?;
                probs.matmul(&v)?
            }
        };

        let merged = self.proj.merge_heads(&context)?;
        self.proj.finish(&merged)
    }

    fn kind(&self) -> &'static str {
        "causal"
    }
}
