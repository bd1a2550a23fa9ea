//! Attention over the sequence extended with learned persistent memory.

use candle_core::Tensor;

use crate::core::{AttentionConfig, AttentionError, AttentionLayer, BackendSelection};
use crate::projection::QkvProjection;

use super::{attention_probs, expand_kv_heads};

/// Causal self-attention where every query additionally attends to a fixed
/// number of learned key/value slots prepended to the sequence.
///
/// The slots are ordinary parameters, independent of the input, and are
/// visible to all positions; the sequence portion stays causally masked.
#[derive(Debug)]
pub struct MemoryAttention {
    proj: QkvProjection,
    mem_k: Tensor,
    mem_v: Tensor,
    slots: usize,
    scale: f64,
}

impl MemoryAttention {
    pub fn new(config: &AttentionConfig) -> Result<Self, AttentionError> {
        // The memory prefix needs the extended mask, which only the
        // reference path provides.
        if config.backend == BackendSelection::FusedOnly {
            return Err(AttentionError::InvalidConfig {
                message: "memory attention has no fused kernel; backend must allow the reference path"
                    .to_string(),
            });
        }
        let proj = QkvProjection::new(config)?;
        let shape = (1, proj.kv_heads(), config.memory_slots, proj.head_dim());
        let mem_k = Tensor::randn(0f32, 0.02, shape, &config.device)?.to_dtype(config.dtype)?;
        let mem_v = Tensor::randn(0f32, 0.02, shape, &config.device)?.to_dtype(config.dtype)?;
        let scale = 1.0 / (proj.head_dim() as f64).sqrt();
        Ok(Self {
            proj,
            mem_k,
            mem_v,
            slots: config.memory_slots,
            scale,
        })
    }

    fn tile_for_batch(&self, slots: &Tensor, batch: usize) -> Result<Tensor, AttentionError> {
        if batch == 1 {
            return Ok(slots.clone());
        }
        Ok(Tensor::cat(&vec![slots; batch], 0)?)
    }
}

impl AttentionLayer for MemoryAttention {
    fn forward(&self, hidden: &Tensor) -> Result<Tensor, AttentionError> {
        let projected = self.proj.project(hidden)?;

        let mem_k = self.tile_for_batch(&self.mem_k, projected.batch)?;
        let mem_v = self.tile_for_batch(&self.mem_v, projected.batch)?;
        let k = Tensor::cat(&[&mem_k, &projected.k], 2)?;
        let v = Tensor::cat(&[&mem_v, &projected.v], 2)?;

        let repeats = self.proj.n_head() / self.proj.kv_heads();
        let k = expand_kv_heads(&k, repeats)?;
        let v = expand_kv_heads(&v, repeats)?;

        // Extended-prefix mask: the leading memory columns are visible to
        // every query, the sequence tail stays causal.
        let mask = self
            .proj
            .causal_mask(projected.seq_len, self.slots + projected.seq_len)?;
        let probs = attention_probs(&projected.q, &k, Some(&mask), self.scale)?;
        let probs = self.proj.attn_dropout(&probs)?;
        let context = probs.matmul(&v)?;

        let merged = self.proj.merge_heads(&context)?;
        self.proj.finish(&merged)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn config() -> AttentionConfig {
        let mut config = AttentionConfig::new("memory", 16, 4);
        config.memory_slots = 4;
        config.block_size = 32;
        config
    }

    fn input(batch: usize, seq_len: usize) -> Tensor {
        let data: Vec<f32> = (0..batch * seq_len * 16)
            .map(|i| ((i * 41 % 103) as f32) * 0.02 - 1.0)
            .collect();
        Tensor::from_vec(data, (batch, seq_len, 16), &Device::Cpu).unwrap()
    }

    #[test]
    fn forward_preserves_shape() {
        let attn = MemoryAttention::new(&config()).unwrap();
        let out = attn.forward(&input(2, 5)).unwrap();
        assert_eq!(out.dims(), &[2, 5, 16]);
        let values = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn forward_is_deterministic_without_dropout() {
        let attn = MemoryAttention::new(&config()).unwrap();
        let x = input(1, 4);
        let a = attn.forward(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = attn.forward(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fused_only_backend_is_rejected_at_construction() {
        let mut config = config();
        config.backend = BackendSelection::FusedOnly;
        let err = MemoryAttention::new(&config).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig { .. }));
        assert!(err.to_string().contains("fused"));
    }

    #[test]
    fn sequence_tail_stays_causal_with_memory_prefix() {
        let attn = MemoryAttention::new(&config()).unwrap();
        let x = input(1, 6);
        let base = attn.forward(&x).unwrap();

        let noise = Tensor::rand(-1f32, 1f32, (1, 1, 16), &Device::Cpu).unwrap();
        let last = x.narrow(1, 5, 1).unwrap().add(&noise).unwrap();
        let perturbed = Tensor::cat(&[&x.narrow(1, 0, 5).unwrap(), &last], 1).unwrap();
        let out = attn.forward(&perturbed).unwrap();

        let diff = base
            .narrow(1, 0, 5)
            .unwrap()
            .sub(&out.narrow(1, 0, 5).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_vec0::<f32>()
            .unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn batched_forward_matches_single_rows() {
        let attn = MemoryAttention::new(&config()).unwrap();
        let batched = input(2, 4);
        let out = attn.forward(&batched).unwrap();

        for row in 0..2 {
            let single = batched.narrow(0, row, 1).unwrap().contiguous().unwrap();
            let row_out = attn.forward(&single).unwrap();
            let diff = row_out
                .sub(&out.narrow(0, row, 1).unwrap())
                .unwrap()
                .abs()
                .unwrap()
                .max_all()
                .unwrap()
                .to_vec0::<f32>()
                .unwrap();
            assert!(diff < 1e-5, "batch row {row} diverged by {diff}");
        }
    }
}
