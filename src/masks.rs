//! Mask and decay-matrix builders shared by the attention variants.
//!
//! Additive masks have dtype [`MASK_DTYPE`] and shape `[1, 1, q_len, k_len]`
//! with `0.0` where attention is permitted and `f32::NEG_INFINITY` otherwise.
//! The multiplicative decay matrix used by retention is shaped
//! `[1, n_head, seq_len, seq_len]`.

use candle_core::{DType, Device, Result, Tensor};

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Construct a causal mask for the supplied sequence dimensions.
///
/// When `k_len > q_len`, queries align with the most recent `q_len` keys and
/// the extra leading keys are visible to every query. This is how persistent
/// memory slots prepended to K/V become unconditionally attendable.
pub fn build_causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let mut data = vec![0f32; q_len * k_len];
    let offset = k_len.saturating_sub(q_len);

    for q in 0..q_len {
        let row_start = q * k_len;
        let max_k = q + offset;
        for k in (max_k + 1)..k_len {
            data[row_start + k] = f32::NEG_INFINITY;
        }
    }

    Tensor::from_vec(data, (1, 1, q_len, k_len), device)
}

/// Construct the multi-scale retention decay matrix.
///
/// Head `h` decays with `gamma_h = 1 - 2^-(5 + h)`, so later heads retain
/// context longer. Entry `[h, n, m]` is `gamma_h^(n - m)` for `m <= n` and
/// `0` above the diagonal.
pub fn build_decay_matrix(device: &Device, n_head: usize, seq_len: usize) -> Result<Tensor> {
    let mut data = vec![0f32; n_head * seq_len * seq_len];

    for h in 0..n_head {
        let gamma = 1.0 - 2f64.powi(-(5 + h as i32));
        let head_start = h * seq_len * seq_len;
        for n in 0..seq_len {
            let row_start = head_start + n * seq_len;
            for m in 0..=n {
                data[row_start + m] = gamma.powi((n - m) as i32) as f32;
            }
        }
    }

    Tensor::from_vec(data, (1, n_head, seq_len, seq_len), device)
}
