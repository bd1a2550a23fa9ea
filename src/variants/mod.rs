//! Concrete attention variants selectable through the factory.
//!
//! Each variant owns a [`QkvProjection`](crate::projection::QkvProjection)
//! and supplies its own scoring step: masked softmax for `causal` and
//! `grouped`, a decaying recurrence for `retention`, and an extended K/V
//! prefix for `memory`.

pub mod causal;
pub mod grouped;
pub mod memory;
pub mod retention;

use candle_core::Tensor;
use candle_nn::ops::softmax_last_dim;

use crate::core::AttentionError;

pub use causal::CausalSelfAttention;
pub use grouped::GroupedSelfAttention;
pub use memory::MemoryAttention;
pub use retention::MultiScaleRetention;

/// Softmax attention weights: `softmax(Q Kᵀ · scale + mask)`.
///
/// `q` is `[batch, heads, q_len, head_dim]` and `k` is
/// `[batch, heads, k_len, head_dim]`; the mask, when present, broadcasts over
/// batch and heads and is cast to the score dtype.
pub(crate) fn attention_probs(
    q: &Tensor,
    k: &Tensor,
    mask: Option<&Tensor>,
    scale: f64,
) -> Result<Tensor, AttentionError> {
    let k_t = k.transpose(2, 3)?.contiguous()?;
    let scores = q.matmul(&k_t)?.affine(scale, 0.0)?;
    let scores = match mask {
        Some(mask) => {
            let mask = if mask.dtype() == scores.dtype() {
                mask.clone()
            } else {
                mask.to_dtype(scores.dtype())?
            };
            scores.broadcast_add(&mask)?
        }
        None => scores,
    };
    Ok(softmax_last_dim(&scores)?)
}

/// Repeat each K/V head so the head count matches the query head count.
///
/// No-op when `repeats == 1`. Uses concatenation rather than a strided
/// broadcast so the result is contiguous for the following matmul.
pub(crate) fn expand_kv_heads(xs: &Tensor, repeats: usize) -> Result<Tensor, AttentionError> {
    if repeats == 1 {
        return Ok(xs.clone());
    }
    let (batch, kv_heads, seq_len, head_dim) = xs.dims4()?;
    let tiled = Tensor::cat(&vec![xs; repeats], 2)?;
    Ok(tiled.reshape((batch, kv_heads * repeats, seq_len, head_dim))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn probs_match_naive_softmax() {
        let device = Device::Cpu;
        let q_data: Vec<f32> = vec![0.1, 0.2, -0.3, 0.4, 0.5, -0.1];
        let k_data: Vec<f32> = vec![0.3, -0.2, 0.1, 0.6, -0.4, 0.2];
        let q = Tensor::from_vec(q_data.clone(), (1, 1, 3, 2), &device).unwrap();
        let k = Tensor::from_vec(k_data.clone(), (1, 1, 3, 2), &device).unwrap();
        let scale = 1.0 / (2f64).sqrt();

        let probs = attention_probs(&q, &k, None, scale).unwrap();
        let got = probs.flatten_all().unwrap().to_vec1::<f32>().unwrap();

        for row in 0..3 {
            let mut logits = [0f32; 3];
            for col in 0..3 {
                let dot = q_data[row * 2] * k_data[col * 2] + q_data[row * 2 + 1] * k_data[col * 2 + 1];
                logits[col] = dot * scale as f32;
            }
            let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
            let denom: f32 = exps.iter().sum();
            for col in 0..3 {
                let expected = exps[col] / denom;
                assert!(
                    (got[row * 3 + col] - expected).abs() < 1e-5,
                    "row {row} col {col}: got {} expected {expected}",
                    got[row * 3 + col]
                );
            }
        }
    }

    #[test]
    fn masked_probs_ignore_future_positions() {
        let device = Device::Cpu;
        let q = Tensor::rand(-1f32, 1f32, (1, 2, 4, 8), &device).unwrap();
        let k = Tensor::rand(-1f32, 1f32, (1, 2, 4, 8), &device).unwrap();
        let mask = crate::masks::build_causal_mask(&device, 4, 4).unwrap();
        let probs = attention_probs(&q, &k, Some(&mask), 0.35).unwrap();
        let flat = probs.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for h in 0..2 {
            for row in 0..4 {
                for col in (row + 1)..4 {
                    assert_eq!(flat[h * 16 + row * 4 + col], 0.0);
                }
            }
        }
    }

    #[test]
    fn probs_rows_sum_to_one() {
        let device = Device::Cpu;
        let q = Tensor::rand(-1f32, 1f32, (2, 2, 3, 4), &device).unwrap();
        let k = Tensor::rand(-1f32, 1f32, (2, 2, 3, 4), &device).unwrap();
        let probs = attention_probs(&q, &k, None, 0.5).unwrap();
        let sums = probs.sum(3).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn kv_expansion_repeats_each_head() {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..2 * 2 * 3).map(|i| i as f32).collect();
        let kv = Tensor::from_vec(data, (1, 2, 2, 3), &device).unwrap();
        let expanded = expand_kv_heads(&kv, 2).unwrap();
        assert_eq!(expanded.dims(), &[1, 4, 2, 3]);

        let original = kv.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let flat = expanded.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let head = 2 * 3;
        // Heads come out as [kv0, kv0, kv1, kv1].
        assert_eq!(&flat[0..head], &original[0..head]);
        assert_eq!(&flat[head..2 * head], &original[0..head]);
        assert_eq!(&flat[2 * head..3 * head], &original[head..2 * head]);
        assert_eq!(&flat[3 * head..4 * head], &original[head..2 * head]);
    }

    #[test]
    fn kv_expansion_is_identity_for_one_repeat() {
        let device = Device::Cpu;
        let kv = Tensor::rand(-1f32, 1f32, (1, 2, 3, 4), &device).unwrap();
        let expanded = expand_kv_heads(&kv, 1).unwrap();
        assert_eq!(expanded.dims(), kv.dims());
    }
}
