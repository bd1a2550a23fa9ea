//! Multi-scale retention: decaying recurrence instead of softmax scoring.

use candle_core::Tensor;

use crate::core::{AttentionConfig, AttentionError, AttentionLayer, BackendSelection};
use crate::masks::build_decay_matrix;
use crate::projection::QkvProjection;

use super::expand_kv_heads;

/// Retention re-weights past positions with a per-head exponential decay
/// rather than pairwise softmax scores. Head `h` uses
/// `gamma_h = 1 - 2^-(5 + h)`, so later heads see further back.
#[derive(Debug)]
pub struct MultiScaleRetention {
    proj: QkvProjection,
    scale: f64,
}

impl MultiScaleRetention {
    pub fn new(config: &AttentionConfig) -> Result<Self, AttentionError> {
        // Retention scores without softmax, so no fused kernel applies.
        if config.backend == BackendSelection::FusedOnly {
            return Err(AttentionError::InvalidConfig {
                message: "retention has no fused kernel; backend must allow the reference path"
                    .to_string(),
            });
        }
        let proj = QkvProjection::new(config)?;
        let scale = 1.0 / (proj.head_dim() as f64).sqrt();
        Ok(Self { proj, scale })
    }
}

impl AttentionLayer for MultiScaleRetention {
    fn forward(&self, hidden: &Tensor) -> Result<Tensor, AttentionError> {
        let projected = self.proj.project(hidden)?;
        let repeats = self.proj.n_head() / self.proj.kv_heads();
        let k = expand_kv_heads(&projected.k, repeats)?;
        let v = expand_kv_heads(&projected.v, repeats)?;

        let k_t = k.transpose(2, 3)?.contiguous()?;
        let scores = projected.q.matmul(&k_t)?.affine(self.scale, 0.0)?;

        // The decay matrix is lower triangular, so retention is causal by
        // construction and needs no additive mask or softmax.
        let decay = build_decay_matrix(scores.device(), self.proj.n_head(), projected.seq_len)?;
        let decay = if decay.dtype() == scores.dtype() {
            decay
        } else {
            decay.to_dtype(scores.dtype())?
        };
        let retained = scores.broadcast_mul(&decay)?;
        let retained = self.proj.attn_dropout(&retained)?;

        let context = retained.matmul(&v)?;
        let merged = self.proj.merge_heads(&context)?;
        self.proj.finish(&merged)
    }

    fn kind(&self) -> &'static str {
        "retention"
    }
}
